// SPDX-License-Identifier: GPL-3.0-only

//! Webcam Hub - a uniform, thread-safe webcam layer
//!
//! Application code asks a [`WebcamHub`] for webcams and gets [`Webcam`]
//! sessions that look the same no matter which backend produces the frames.
//! The crate takes care of the parts backends usually get wrong: calls into
//! backends that cannot be used from several threads are serialized, devices
//! coming and going are tracked, and frames are pumped in the background so
//! readers never block.
//!
//! # Architecture
//!
//! - [`backends`]: device and driver contracts plus bundled drivers
//! - [`processor`]: call serializer for non-thread-safe drivers
//! - [`session`]: the [`Webcam`] handle and its lifecycle events
//! - [`discovery`]: canonical webcam list and hot-plug reconciliation
//! - [`capture`]: background loops and the per-session frame pump
//! - [`render`]: display refresh scheduling
//! - [`motion`]: frame-difference motion detection
//! - [`hub`]: the object owning all of the above for one driver
//! - [`config`]: user configuration handling
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use webcam_hub::{TestPatternDriver, WebcamHub};
//!
//! let hub = WebcamHub::new(Arc::new(TestPatternDriver::new(1)));
//! if let Some(webcam) = hub.default_webcam()? {
//!     webcam.open()?;
//!     let frame = webcam.image()?;
//!     println!("{} delivered {}x{}", webcam.name(), frame.width(), frame.height());
//! }
//! hub.shutdown();
//! # Ok::<(), webcam_hub::WebcamError>(())
//! ```

pub mod backends;
pub mod capture;
pub mod config;
pub mod constants;
pub mod discovery;
pub mod errors;
pub mod hub;
pub mod listeners;
pub mod motion;
pub mod processor;
pub mod render;
pub mod session;

// Re-export commonly used types
pub use backends::{
    BackendError, BackendResult, CameraDevice, CameraDriver, CameraFrame, CompositeDriver,
    ImageDirectoryDriver, Resolution, TestPatternDriver,
};
pub use config::Config;
pub use discovery::{DiscoveryEvent, DiscoveryListener, DiscoveryService, reconcile};
pub use errors::{WebcamError, WebcamResult};
pub use hub::WebcamHub;
pub use motion::{MotionDetector, MotionEvent, MotionListener};
pub use processor::{CallSerializer, Task};
pub use render::{Placeholder, RenderContent, RenderScheduler, RenderState, RenderSurface};
pub use session::{ImageTransformer, Webcam, WebcamEvent, WebcamListener};
