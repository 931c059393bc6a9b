// SPDX-License-Identifier: GPL-3.0-only

//! Webcam session
//!
//! A [`Webcam`] couples one [`CameraDevice`] with open/closed state, a
//! listener set and the frame pump that runs while it is open. Every device
//! call goes through the [`CallSerializer`], using the thread-safety flag the
//! owning driver reported when the session was created.
//!
//! Sessions are created by the discovery service and handed out as
//! `Arc<Webcam>`; the same `Arc` is returned for as long as the device keeps
//! appearing in scans. A disposed session cannot be reopened.

use crate::backends::{BackendError, BackendResult, CameraDevice, CameraFrame, Resolution};
use crate::capture::{FramePump, FrameSlot, FrameSource};
use crate::constants::session::PUMP_STOP_TIMEOUT;
use crate::errors::{WebcamError, WebcamResult};
use crate::listeners::ListenerSet;
use crate::processor::CallSerializer;
use image::RgbaImage;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tracing::{debug, info, warn};

/// Lifecycle notifications of a session
#[derive(Debug, Clone)]
pub enum WebcamEvent {
    Opened,
    Closed,
    Disposed,
    /// A new frame was pumped from the device
    ImageObtained(CameraFrame),
}

/// Receives [`WebcamEvent`]s
///
/// Any `Fn(&Webcam, &WebcamEvent)` closure is a listener.
pub trait WebcamListener: Send + Sync {
    fn on_webcam_event(&self, webcam: &Webcam, event: &WebcamEvent);
}

impl<F> WebcamListener for F
where
    F: Fn(&Webcam, &WebcamEvent) + Send + Sync,
{
    fn on_webcam_event(&self, webcam: &Webcam, event: &WebcamEvent) {
        self(webcam, event)
    }
}

/// Transformation applied to frames before they are handed out
pub trait ImageTransformer: Send + Sync {
    fn transform(&self, image: &RgbaImage) -> RgbaImage;
}

impl<F> ImageTransformer for F
where
    F: Fn(&RgbaImage) -> RgbaImage + Send + Sync,
{
    fn transform(&self, image: &RgbaImage) -> RgbaImage {
        self(image)
    }
}

/// Application-facing handle of one camera device
pub struct Webcam {
    name: String,
    device: Arc<dyn CameraDevice>,
    serializer: CallSerializer,
    thread_safe: bool,
    open: AtomicBool,
    disposed: AtomicBool,
    auto_open: AtomicBool,
    /// Serializes open, close and dispose
    lifecycle: Mutex<()>,
    listeners: ListenerSet<dyn WebcamListener>,
    view_size: Mutex<Option<Resolution>>,
    custom_sizes: Mutex<Vec<Resolution>>,
    transformer: RwLock<Option<Arc<dyn ImageTransformer>>>,
    pump: FramePump,
    this: Weak<Webcam>,
}

impl Webcam {
    /// Wrap `device`
    ///
    /// `thread_safe` is the owning driver's answer at creation time and
    /// decides how every device call of this session is routed.
    pub fn new(
        device: Arc<dyn CameraDevice>,
        serializer: CallSerializer,
        thread_safe: bool,
        target_fps: f64,
    ) -> Arc<Self> {
        let name = device.name();
        Arc::new_cyclic(|this| Self {
            name,
            device,
            serializer,
            thread_safe,
            open: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            auto_open: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            listeners: ListenerSet::new(),
            view_size: Mutex::new(None),
            custom_sizes: Mutex::new(Vec::new()),
            transformer: RwLock::new(None),
            pump: FramePump::new(target_fps),
            this: this.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &Arc<dyn CameraDevice> {
        &self.device
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    // ===== Lifecycle =====

    /// Open the device and start pumping frames
    ///
    /// Returns `Ok(false)` if the session was already open.
    pub fn open(&self) -> WebcamResult<bool> {
        {
            let _guard = self.lock_lifecycle();
            self.ensure_not_disposed()?;
            if self.is_open() {
                return Ok(false);
            }

            if let Some(size) = self.view_size() {
                self.call("set resolution", move |d| d.set_resolution(size))?;
            }
            self.call("open", |d| d.open())?;
            self.open.store(true, Ordering::SeqCst);

            if let Some(this) = self.this.upgrade() {
                self.pump.start(Arc::new(PumpSource(Arc::downgrade(&this))));
            }
            info!(webcam = %self.name, "Webcam opened");
        }

        self.notify(WebcamEvent::Opened);
        Ok(true)
    }

    /// Stop the pump and close the device
    ///
    /// Returns `Ok(false)` if the session was not open. The session is marked
    /// closed even when the device reports a failure while closing.
    pub fn close(&self) -> WebcamResult<bool> {
        let result = {
            let _guard = self.lock_lifecycle();
            if !self.is_open() {
                return Ok(false);
            }
            self.shut_down_pump();
            let result = self.call("close", |d| d.close());
            self.open.store(false, Ordering::SeqCst);
            self.pump.slot().clear();
            info!(webcam = %self.name, "Webcam closed");
            result
        };

        self.notify(WebcamEvent::Closed);
        result.map(|_| true)
    }

    /// Close if needed and release the device for good
    ///
    /// Disposing twice is a no-op.
    pub fn dispose(&self) -> WebcamResult<()> {
        let (was_open, result) = {
            let _guard = self.lock_lifecycle();
            if self.disposed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }

            let was_open = self.open.swap(false, Ordering::SeqCst);
            if was_open {
                self.shut_down_pump();
                if let Err(e) = self.call("close", |d| d.close()) {
                    warn!(webcam = %self.name, error = %e, "Close before dispose failed");
                }
                self.pump.slot().clear();
            }
            let result = self.call("dispose", |d| d.dispose());
            info!(webcam = %self.name, "Webcam disposed");
            (was_open, result)
        };

        if was_open {
            self.notify(WebcamEvent::Closed);
        }
        self.notify(WebcamEvent::Disposed);
        result
    }

    // ===== Frames =====

    /// Latest frame
    ///
    /// Served from the pump without blocking. Right after opening, before
    /// the pump has published anything, one frame is read synchronously.
    /// A closed session opens itself first when auto-open is enabled.
    pub fn image(&self) -> WebcamResult<Arc<CameraFrame>> {
        self.ensure_not_disposed()?;
        self.ensure_open()?;

        let slot = self.pump.slot();
        if let Some(frame) = slot.latest() {
            return Ok(frame);
        }
        let frame = self.read_frame()?;
        if slot.peek().is_none() {
            slot.publish(frame.clone());
        }
        Ok(Arc::new(frame))
    }

    /// Read one frame from the device now, bypassing the pump
    pub fn read_frame(&self) -> WebcamResult<CameraFrame> {
        self.ensure_not_disposed()?;
        self.ensure_open()?;
        self.fetch()?
            .ok_or_else(|| WebcamError::NoFrame(self.name.clone()))
    }

    /// Latest frame as tightly packed RGBA bytes
    ///
    /// Uses the device's raw buffer access when it has one.
    pub fn image_bytes(&self) -> WebcamResult<Vec<u8>> {
        self.ensure_not_disposed()?;
        self.ensure_open()?;
        if self.device.buffer_access().is_some() {
            return self.call("read buffer", |d| match d.buffer_access() {
                Some(buffer) => buffer.read_buffer(),
                None => Err(BackendError::Other("buffer access disappeared".into())),
            });
        }
        Ok(self.image()?.as_bytes().to_vec())
    }

    /// True when the pump delivered a frame not yet returned by [`Webcam::image`]
    pub fn is_image_new(&self) -> bool {
        self.pump.slot().is_image_new()
    }

    /// Frame rate reported by the device, or the pump's smoothed estimate
    pub fn fps(&self) -> f64 {
        self.device
            .reported_fps()
            .unwrap_or_else(|| self.pump.slot().fps())
    }

    /// True while the pump's last read failed
    pub fn is_errored(&self) -> bool {
        self.pump.slot().is_errored()
    }

    pub fn frame_slot(&self) -> Arc<FrameSlot> {
        self.pump.slot()
    }

    // ===== Settings =====

    pub fn is_auto_open(&self) -> bool {
        self.auto_open.load(Ordering::SeqCst)
    }

    pub fn set_auto_open(&self, auto_open: bool) {
        self.auto_open.store(auto_open, Ordering::SeqCst);
    }

    /// View size applied on the next open, `None` for the device default
    pub fn view_size(&self) -> Option<Resolution> {
        *self.view_size.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sizes accepted by [`Webcam::set_view_size`]
    pub fn view_sizes(&self) -> WebcamResult<Vec<Resolution>> {
        let mut sizes = self.call("get resolutions", |d| Ok(d.resolutions()))?;
        for custom in self.custom_view_sizes() {
            if !sizes.contains(&custom) {
                sizes.push(custom);
            }
        }
        Ok(sizes)
    }

    /// Choose the size to open the device with
    ///
    /// Rejected while the session is open, and for sizes neither the device
    /// nor the custom size list provides.
    pub fn set_view_size(&self, size: Resolution) -> WebcamResult<()> {
        if self.is_open() {
            return Err(WebcamError::Configuration(format!(
                "cannot change view size of {} while it is open",
                self.name
            )));
        }
        if size.width == 0 || size.height == 0 {
            return Err(WebcamError::Configuration(format!(
                "view size {} has no pixels",
                size
            )));
        }
        let supported = self.view_sizes()?;
        if !supported.contains(&size) {
            let list: Vec<String> = supported.iter().map(|s| s.to_string()).collect();
            return Err(WebcamError::Configuration(format!(
                "view size {} is not supported by {}, use one of [{}]",
                size,
                self.name,
                list.join(", ")
            )));
        }
        *self.view_size.lock().unwrap_or_else(|e| e.into_inner()) = Some(size);
        Ok(())
    }

    pub fn custom_view_sizes(&self) -> Vec<Resolution> {
        self.custom_sizes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Sizes to accept in addition to the ones the device lists
    pub fn set_custom_view_sizes(&self, sizes: Vec<Resolution>) {
        *self.custom_sizes.lock().unwrap_or_else(|e| e.into_inner()) = sizes;
    }

    /// Transformer applied to every fetched frame, `None` to remove it
    pub fn set_image_transformer(&self, transformer: Option<Arc<dyn ImageTransformer>>) {
        *self.transformer.write().unwrap_or_else(|e| e.into_inner()) = transformer;
    }

    /// Pass backend specific key/value parameters to the device
    pub fn set_parameters(
        &self,
        parameters: BTreeMap<String, serde_json::Value>,
    ) -> WebcamResult<()> {
        self.ensure_not_disposed()?;
        if self.device.parameters().is_none() {
            return Err(WebcamError::Unsupported(format!(
                "{} does not accept parameters",
                self.name
            )));
        }
        self.call("set parameters", move |d| match d.parameters() {
            Some(target) => target.set_parameters(&parameters),
            None => Err(BackendError::Other("parameter access disappeared".into())),
        })
    }

    // ===== Listeners =====

    pub fn add_listener(&self, listener: Arc<dyn WebcamListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn WebcamListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    // ===== Internals =====

    /// Run one device operation through the serializer
    fn call<T, F>(&self, operation: &'static str, f: F) -> WebcamResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CameraDevice) -> BackendResult<T> + Send + 'static,
    {
        let device = Arc::clone(&self.device);
        self.serializer
            .run(operation, self.thread_safe, move || f(device.as_ref()))
    }

    /// Read and transform one frame
    fn fetch(&self) -> WebcamResult<Option<CameraFrame>> {
        let Some(frame) = self.call("read frame", |d| d.frame())? else {
            return Ok(None);
        };
        let transformer = self
            .transformer
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        Ok(Some(match transformer {
            Some(t) => CameraFrame {
                image: Arc::new(t.transform(&frame.image)),
                captured_at: frame.captured_at,
            },
            None => frame,
        }))
    }

    fn ensure_not_disposed(&self) -> WebcamResult<()> {
        if self.is_disposed() {
            Err(WebcamError::Disposed(self.name.clone()))
        } else {
            Ok(())
        }
    }

    fn ensure_open(&self) -> WebcamResult<()> {
        if self.is_open() {
            return Ok(());
        }
        if self.is_auto_open() {
            debug!(webcam = %self.name, "Auto-opening webcam");
            self.open()?;
            return Ok(());
        }
        Err(WebcamError::NotOpen(self.name.clone()))
    }

    fn shut_down_pump(&self) {
        if !self.pump.stop(PUMP_STOP_TIMEOUT) {
            warn!(webcam = %self.name, "Frame pump did not stop in time");
        }
    }

    fn notify(&self, event: WebcamEvent) {
        self.listeners
            .notify("webcam", |listener| listener.on_webcam_event(self, &event));
    }

    fn lock_lifecycle(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for Webcam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Webcam")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .field("disposed", &self.is_disposed())
            .field("thread_safe", &self.thread_safe)
            .finish()
    }
}

impl fmt::Display for Webcam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Webcam {}", self.name)
    }
}

/// Pump-side view of a session; weak so the pump does not keep it alive
struct PumpSource(Weak<Webcam>);

impl FrameSource for PumpSource {
    fn name(&self) -> String {
        self.0
            .upgrade()
            .map(|w| w.name.clone())
            .unwrap_or_else(|| "dropped webcam".into())
    }

    fn fetch(&self) -> WebcamResult<Option<CameraFrame>> {
        let Some(webcam) = self.0.upgrade() else {
            return Ok(None);
        };
        let frame = webcam.fetch()?;
        if let Some(frame) = &frame
            && !webcam.listeners.is_empty()
        {
            webcam.notify(WebcamEvent::ImageObtained(frame.clone()));
        }
        Ok(frame)
    }

    fn reported_fps(&self) -> Option<f64> {
        self.0.upgrade().and_then(|w| w.device.reported_fps())
    }
}
