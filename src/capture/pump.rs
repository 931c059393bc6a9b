// SPDX-License-Identifier: GPL-3.0-only

//! Per-session frame pump
//!
//! While a webcam is open, a pump thread keeps reading frames and publishes
//! the most recent one into a [`FrameSlot`]. Readers never wait on a read in
//! progress: they get the previous frame or the newest complete one.
//!
//! Each iteration sleeps `max(0, period - elapsed)` where the period comes
//! from a ceiling rate, so a fast backend is not hammered and a slow one is
//! read back to back.

use super::frame_loop::{LoopAction, LoopController};
use crate::backends::CameraFrame;
use crate::constants::pump::{FPS_SMOOTHING_WEIGHT, TARGET_FPS, target_period};
use crate::errors::WebcamResult;
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Where a pump gets its frames from
///
/// Implemented by sessions, which route every read through the call
/// serializer; tests plug in synthetic sources.
pub trait FrameSource: Send + Sync + 'static {
    /// Name used in log fields
    fn name(&self) -> String;

    /// Read the current frame, `Ok(None)` when the backend has nothing yet
    fn fetch(&self) -> WebcamResult<Option<CameraFrame>>;

    /// Backend-measured frame rate, replacing the smoothed estimate
    fn reported_fps(&self) -> Option<f64> {
        None
    }
}

/// Latest frame of one session plus pump statistics
#[derive(Default)]
pub struct FrameSlot {
    frame: ArcSwapOption<CameraFrame>,
    /// `f64` bits of the smoothed frame rate
    fps: AtomicU64,
    image_new: AtomicBool,
    errored: AtomicBool,
    published: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame
    pub fn publish(&self, frame: CameraFrame) {
        self.frame.store(Some(Arc::new(frame)));
        self.image_new.store(true, Ordering::Release);
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Latest frame, marking it as seen
    pub fn latest(&self) -> Option<Arc<CameraFrame>> {
        self.image_new.store(false, Ordering::Release);
        self.frame.load_full()
    }

    /// Latest frame without touching the "new image" flag
    pub fn peek(&self) -> Option<Arc<CameraFrame>> {
        self.frame.load_full()
    }

    /// True when a frame arrived since the last [`FrameSlot::latest`]
    pub fn is_image_new(&self) -> bool {
        self.image_new.load(Ordering::Acquire)
    }

    pub fn fps(&self) -> f64 {
        f64::from_bits(self.fps.load(Ordering::Relaxed))
    }

    pub fn set_fps(&self, fps: f64) {
        self.fps.store(fps.to_bits(), Ordering::Relaxed);
    }

    /// True while the last read failed
    pub fn is_errored(&self) -> bool {
        self.errored.load(Ordering::Acquire)
    }

    pub fn set_errored(&self, errored: bool) {
        self.errored.store(errored, Ordering::Release);
    }

    /// Number of frames published since creation
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Forget the frame and statistics, used when the session closes
    pub fn clear(&self) {
        self.frame.store(None);
        self.image_new.store(false, Ordering::Release);
        self.errored.store(false, Ordering::Release);
        self.set_fps(0.0);
    }
}

/// Exponentially smoothed rate update for one read that took `elapsed`
pub fn smooth_fps(previous: f64, elapsed: Duration) -> f64 {
    let ms = (elapsed.as_secs_f64() * 1000.0).max(1.0);
    (FPS_SMOOTHING_WEIGHT * previous + 1000.0 / ms) / (FPS_SMOOTHING_WEIGHT + 1.0)
}

/// Background reader feeding a [`FrameSlot`]
pub struct FramePump {
    slot: Arc<FrameSlot>,
    period: Duration,
    controller: Mutex<Option<LoopController>>,
}

impl Default for FramePump {
    fn default() -> Self {
        Self::new(TARGET_FPS)
    }
}

impl FramePump {
    /// Create a stopped pump reading at most `target_fps` frames per second
    pub fn new(target_fps: f64) -> Self {
        let target_fps = if target_fps.is_finite() && target_fps > 0.0 {
            target_fps
        } else {
            TARGET_FPS
        };
        Self {
            slot: Arc::new(FrameSlot::new()),
            period: target_period(target_fps),
            controller: Mutex::new(None),
        }
    }

    pub fn slot(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.slot)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.lock_controller()
            .as_ref()
            .is_some_and(|controller| controller.is_running())
    }

    /// Start reading from `source`; no-op if already running
    pub fn start(&self, source: Arc<dyn FrameSource>) {
        let mut controller = self.lock_controller();
        if controller.as_ref().is_some_and(|c| c.is_running()) {
            return;
        }

        let name = source.name();
        let slot = Arc::clone(&self.slot);
        let period = self.period;
        debug!(webcam = %name, period_ms = period.as_millis() as u64, "Starting frame pump");

        *controller = Some(LoopController::start(
            &format!("pump-{}", name),
            move |_| {
                let started = Instant::now();
                match source.fetch() {
                    Ok(Some(frame)) => {
                        slot.publish(frame);
                        slot.set_errored(false);
                    }
                    Ok(None) => {
                        debug!(webcam = %name, "No frame available, keeping previous one");
                    }
                    Err(e) => {
                        if !slot.is_errored() {
                            warn!(webcam = %name, error = %e, "Frame read failed, keeping previous frame");
                        }
                        slot.set_errored(true);
                    }
                }

                let elapsed = started.elapsed();
                let fps = source
                    .reported_fps()
                    .unwrap_or_else(|| smooth_fps(slot.fps(), elapsed));
                slot.set_fps(fps);

                LoopAction::Wait(period.saturating_sub(elapsed))
            },
        ));
    }

    /// Stop the pump, waiting at most `timeout` for the current read
    ///
    /// Returns `false` when the thread had to be detached. Stopping a pump
    /// that is not running is a no-op.
    pub fn stop(&self, timeout: Duration) -> bool {
        let controller = self.lock_controller().take();
        match controller {
            Some(mut controller) => controller.stop_timeout(timeout),
            None => true,
        }
    }

    fn lock_controller(&self) -> std::sync::MutexGuard<'_, Option<LoopController>> {
        self.controller.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for FramePump {
    fn drop(&mut self) {
        self.stop(Duration::from_secs(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::BackendError;
    use crate::errors::WebcamError;
    use image::RgbaImage;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    /// Source taking a fixed time per read
    struct PeriodicSource {
        period: Duration,
        reads: AtomicUsize,
    }

    impl FrameSource for PeriodicSource {
        fn name(&self) -> String {
            "periodic".into()
        }

        fn fetch(&self) -> WebcamResult<Option<CameraFrame>> {
            thread::sleep(self.period);
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(Some(CameraFrame::new(RgbaImage::new(2, 2))))
        }
    }

    /// Source that delivers one frame and then only fails
    struct FailingSource {
        reads: AtomicUsize,
    }

    impl FrameSource for FailingSource {
        fn name(&self) -> String {
            "failing".into()
        }

        fn fetch(&self) -> WebcamResult<Option<CameraFrame>> {
            if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Some(CameraFrame::new(RgbaImage::new(3, 1))))
            } else {
                Err(WebcamError::CallFailed {
                    operation: "read frame",
                    source: BackendError::Crashed("unplugged".into()),
                })
            }
        }

        fn reported_fps(&self) -> Option<f64> {
            Some(12.5)
        }
    }

    #[test]
    fn test_smoothing_formula() {
        let next = smooth_fps(10.0, Duration::from_millis(50));
        assert!((next - 12.0).abs() < 1e-9);
        // Sub-millisecond reads are clamped to 1 ms
        assert!((smooth_fps(0.0, Duration::ZERO) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_fps_converges_to_source_period() {
        let source = Arc::new(PeriodicSource {
            period: Duration::from_millis(40),
            reads: AtomicUsize::new(0),
        });
        let pump = FramePump::default();
        pump.start(source.clone());

        thread::sleep(Duration::from_millis(1600));
        let fps = pump.slot().fps();
        assert!(pump.stop(Duration::from_secs(2)));

        assert!(source.reads.load(Ordering::SeqCst) > 20);
        assert!((fps - 25.0).abs() < 25.0 * 0.15, "fps was {}", fps);
    }

    #[test]
    fn test_read_rate_is_capped() {
        let source = Arc::new(PeriodicSource {
            period: Duration::ZERO,
            reads: AtomicUsize::new(0),
        });
        let pump = FramePump::new(50.0);
        pump.start(source.clone());
        thread::sleep(Duration::from_millis(500));
        pump.stop(Duration::from_secs(2));

        // 50 reads per second ceiling, with some slack for scheduling
        assert!(source.reads.load(Ordering::SeqCst) <= 30);
    }

    #[test]
    fn test_failure_keeps_previous_frame() {
        let pump = FramePump::default();
        let slot = pump.slot();
        pump.start(Arc::new(FailingSource {
            reads: AtomicUsize::new(0),
        }));
        thread::sleep(Duration::from_millis(200));

        assert!(pump.is_running());
        assert!(slot.is_errored());
        let frame = slot.latest().expect("first frame stays published");
        assert_eq!(frame.width(), 3);
        assert_eq!(slot.fps(), 12.5);
        assert!(pump.stop(Duration::from_secs(2)));
    }

    #[test]
    fn test_image_new_flag() {
        let slot = FrameSlot::new();
        assert!(!slot.is_image_new());
        slot.publish(CameraFrame::new(RgbaImage::new(1, 1)));
        assert!(slot.is_image_new());
        assert!(slot.peek().is_some());
        assert!(slot.is_image_new());
        assert!(slot.latest().is_some());
        assert!(!slot.is_image_new());
        slot.clear();
        assert!(slot.peek().is_none());
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let source = Arc::new(PeriodicSource {
            period: Duration::from_millis(5),
            reads: AtomicUsize::new(0),
        });
        let pump = FramePump::default();
        pump.start(source.clone());
        pump.start(source.clone());
        assert!(pump.is_running());
        assert!(pump.stop(Duration::from_secs(2)));
        assert!(pump.stop(Duration::from_secs(2)));
        assert!(!pump.is_running());
    }
}
