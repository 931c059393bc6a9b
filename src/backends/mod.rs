// SPDX-License-Identifier: GPL-3.0-only

//! Backend contracts consumed by the webcam core
//!
//! Concrete capture backends live outside this crate. They plug in by
//! implementing [`CameraDriver`] and [`CameraDevice`]; everything above this
//! layer talks to them only through these traits.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  Application code   │
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ WebcamHub / Webcam  │  ← Sessions, discovery, pump, motion
//! └──────────┬──────────┘
//!            │  every call routed through the CallSerializer
//!            ▼
//! ┌─────────────────────┐
//! │ CameraDriver Trait  │  ← Common interface
//! └──────────┬──────────┘
//!            │
//!            ▼
//!  ┌──────────┬──────────┬───────────┐
//!  │ TestPat. │ ImageDir │ Composite │  ← Bundled implementations
//!  └──────────┴──────────┴───────────┘
//! ```

pub mod composite;
pub mod image_dir;
pub mod test_pattern;
pub mod types;

pub use composite::CompositeDriver;
pub use image_dir::ImageDirectoryDriver;
pub use test_pattern::TestPatternDriver;
pub use types::*;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// A single capture endpoint
///
/// Devices are shared between the discovery service, sessions and the
/// serializer worker, so all methods take `&self`; implementations keep
/// their mutable state behind their own locks. Whether two calls may run
/// concurrently is declared by the owning driver, not by the device.
///
/// The device name is its only identity: two devices with equal names are
/// the same physical device.
pub trait CameraDevice: Send + Sync {
    /// Name reported by the backend
    fn name(&self) -> String;

    /// Resolutions the device can deliver
    fn resolutions(&self) -> Vec<Resolution>;

    /// Currently configured resolution
    fn resolution(&self) -> Resolution;

    /// Change the resolution, only valid while closed
    fn set_resolution(&self, resolution: Resolution) -> BackendResult<()>;

    /// Fetch the current frame, `None` when nothing is available yet
    fn frame(&self) -> BackendResult<Option<CameraFrame>>;

    fn open(&self) -> BackendResult<()>;

    fn close(&self) -> BackendResult<()>;

    /// Release every resource; the device is unusable afterwards
    fn dispose(&self) -> BackendResult<()>;

    fn is_open(&self) -> bool;

    // ===== Optional capabilities =====

    /// Frame rate measured by the backend itself
    ///
    /// When present it replaces the smoothed estimate computed by the pump.
    fn reported_fps(&self) -> Option<f64> {
        None
    }

    /// Raw buffer access, if the backend can hand out bytes without decoding
    fn buffer_access(&self) -> Option<&dyn BufferAccess> {
        None
    }

    /// Key/value parameter setter, if the backend exposes tunables
    fn parameters(&self) -> Option<&dyn DeviceParameters> {
        None
    }
}

/// Raw RGBA buffer access capability
pub trait BufferAccess: Send + Sync {
    /// Copy of the current frame as tightly packed RGBA bytes
    fn read_buffer(&self) -> BackendResult<Vec<u8>>;
}

/// Key/value parameter capability
pub trait DeviceParameters: Send + Sync {
    /// Apply backend specific parameters; unknown keys are an error
    fn set_parameters(&self, parameters: &BTreeMap<String, serde_json::Value>)
    -> BackendResult<()>;
}

/// Discovery capability of a driver
pub trait DiscoverySupport: Send + Sync {
    /// Interval between two scans
    fn scan_interval(&self) -> Duration;

    /// False when the device registry cannot be queried right now
    fn is_scan_possible(&self) -> bool;
}

/// A factory of devices
pub trait CameraDriver: Send + Sync {
    /// Human readable driver name for logging
    fn name(&self) -> String {
        std::any::type_name::<Self>()
            .rsplit("::")
            .next()
            .unwrap_or("driver")
            .to_string()
    }

    /// Enumerate the devices present right now
    fn devices(&self) -> BackendResult<Vec<Arc<dyn CameraDevice>>>;

    /// True when calls against this driver's devices may run concurrently
    fn is_thread_safe(&self) -> bool;

    /// Discovery capability, `None` for on-demand enumeration only
    fn discovery(&self) -> Option<&dyn DiscoverySupport> {
        None
    }
}
