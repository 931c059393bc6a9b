// SPDX-License-Identifier: GPL-3.0-only

//! Motion detection on top of a webcam session
//!
//! On every tick the detector takes the webcam's latest frame, transforms it
//! (blur then grayscale by default) and compares it with the previous
//! transformed frame. When the moved area falls within the configured bounds
//! motion is declared and held for the inertia duration; ticks during that
//! time skip the comparison. Listeners hear about every tick whose area is in
//! bounds, so notifications repeat for as long as motion continues.
//!
//! Thresholds and zones may be changed while the detector runs; the next
//! tick sees the new values.

pub mod algorithm;
pub mod filters;

pub use algorithm::{Detection, DetectionParams, Point, Zone, compare};
pub use filters::{BlurGrayscale, Identity};

use crate::capture::{LoopAction, LoopController};
use crate::config::MotionConfig;
use crate::constants::motion::{DEFAULT_INTERVAL, MIN_INTERVAL};
use crate::errors::{WebcamError, WebcamResult};
use crate::listeners::ListenerSet;
use crate::session::{ImageTransformer, Webcam};
use image::RgbaImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Reject detection intervals shorter than 100 ms
pub fn validate_interval(interval: Duration) -> WebcamResult<()> {
    if interval < MIN_INTERVAL {
        return Err(WebcamError::Configuration(format!(
            "motion check interval cannot be less than {} ms, got {} ms",
            MIN_INTERVAL.as_millis(),
            interval.as_millis()
        )));
    }
    Ok(())
}

fn validate_area(name: &str, value: f64) -> WebcamResult<()> {
    if !(0.0..=100.0).contains(&value) {
        return Err(WebcamError::Configuration(format!(
            "{} must be within 0..=100 percent, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Both bounds within 0..=100 and not inverted
pub fn validate_area_thresholds(min: f64, max: f64) -> WebcamResult<()> {
    validate_area("area threshold", min)?;
    validate_area("maximum area threshold", max)?;
    if min > max {
        return Err(WebcamError::Configuration(format!(
            "area threshold {} is above the maximum {}",
            min, max
        )));
    }
    Ok(())
}

/// One tick that found motion
#[derive(Debug, Clone)]
pub struct MotionEvent {
    pub webcam: String,
    /// Percentage of the frame that moved
    pub area: f64,
    pub cog: Point,
    pub points: Vec<Point>,
    /// Untransformed frame the motion was found in
    pub image: Arc<RgbaImage>,
}

pub trait MotionListener: Send + Sync {
    fn motion_detected(&self, event: &MotionEvent);
}

impl<F> MotionListener for F
where
    F: Fn(&MotionEvent) + Send + Sync,
{
    fn motion_detected(&self, event: &MotionEvent) {
        self(event)
    }
}

/// Mutable detection state, rebuilt on every comparison
struct MotionState {
    previous: Option<RgbaImage>,
    last: Option<Detection>,
    revert_at: Option<Instant>,
    last_motion_at: Option<Instant>,
}

struct Shared {
    params: Mutex<DetectionParams>,
    interval: Mutex<Duration>,
    inertia: Mutex<Option<Duration>>,
    transformer: RwLock<Arc<dyn ImageTransformer>>,
    state: Mutex<MotionState>,
    motion: AtomicBool,
    fetch_failed: AtomicBool,
    listeners: ListenerSet<dyn MotionListener>,
}

impl Shared {
    fn interval(&self) -> Duration {
        *lock(&self.interval)
    }

    fn inertia(&self) -> Duration {
        (*lock(&self.inertia)).unwrap_or_else(|| self.interval() / 2)
    }

    /// Drop expired motion; returns whether motion still holds
    fn refresh_motion(&self, now: Instant) -> bool {
        let mut state = lock(&self.state);
        if let Some(revert_at) = state.revert_at
            && now >= revert_at
        {
            state.revert_at = None;
            self.motion.store(false, Ordering::SeqCst);
            debug!("Motion inertia elapsed");
        }
        self.motion.load(Ordering::SeqCst)
    }
}

/// Periodic frame comparison for one webcam
pub struct MotionDetector {
    webcam: Arc<Webcam>,
    shared: Arc<Shared>,
    controller: Mutex<Option<LoopController>>,
    /// Set when `start()` had to open the webcam
    opened_webcam: AtomicBool,
}

impl MotionDetector {
    pub fn new(webcam: Arc<Webcam>) -> Self {
        Self {
            webcam,
            shared: Arc::new(Shared {
                params: Mutex::new(DetectionParams::default()),
                interval: Mutex::new(DEFAULT_INTERVAL),
                inertia: Mutex::new(None),
                transformer: RwLock::new(Arc::new(BlurGrayscale::default())),
                state: Mutex::new(MotionState {
                    previous: None,
                    last: None,
                    revert_at: None,
                    last_motion_at: None,
                }),
                motion: AtomicBool::new(false),
                fetch_failed: AtomicBool::new(false),
                listeners: ListenerSet::new(),
            }),
            controller: Mutex::new(None),
            opened_webcam: AtomicBool::new(false),
        }
    }

    /// Detector with every tunable taken from `config`
    pub fn with_config(webcam: Arc<Webcam>, config: &MotionConfig) -> WebcamResult<Self> {
        let detector = Self::new(webcam);
        detector.set_interval(config.interval())?;
        detector.set_pixel_threshold(config.pixel_threshold);
        validate_area_thresholds(config.area_threshold, config.area_threshold_max)?;
        {
            // Both at once, either order could trip over the defaults
            let mut params = lock(&detector.shared.params);
            params.area_threshold = config.area_threshold;
            params.area_threshold_max = config.area_threshold_max;
        }
        if let Some(inertia) = config.inertia() {
            detector.set_inertia(inertia);
        }
        detector.set_max_points(config.max_points);
        detector.set_point_range(config.point_range);
        Ok(detector)
    }

    pub fn webcam(&self) -> &Arc<Webcam> {
        &self.webcam
    }

    // ===== Lifecycle =====

    /// Open the webcam if needed and start ticking
    ///
    /// Returns `Ok(false)` if already running.
    pub fn start(&self) -> WebcamResult<bool> {
        let mut controller = lock(&self.controller);
        if controller.as_ref().is_some_and(|c| c.is_running()) {
            return Ok(false);
        }

        if !self.webcam.is_open() {
            self.webcam.open()?;
            self.opened_webcam.store(true, Ordering::SeqCst);
        }

        info!(
            webcam = %self.webcam.name(),
            interval_ms = self.shared.interval().as_millis() as u64,
            "Starting motion detector"
        );

        let webcam = Arc::clone(&self.webcam);
        let shared = Arc::clone(&self.shared);
        let mut next_tick = Instant::now();
        *controller = Some(LoopController::start(
            &format!("motion-{}", self.webcam.name()),
            move |_| {
                let now = Instant::now();
                let in_motion = shared.refresh_motion(now);

                if now >= next_tick {
                    if in_motion {
                        debug!(webcam = %webcam.name(), "Motion still active, skipping comparison");
                    } else {
                        tick(&webcam, &shared);
                    }
                    let interval = shared.interval();
                    next_tick += interval;
                    if next_tick <= Instant::now() {
                        next_tick = Instant::now() + interval;
                    }
                }

                let wake = match lock(&shared.state).revert_at {
                    Some(revert_at) => next_tick.min(revert_at),
                    None => next_tick,
                };
                LoopAction::Wait(wake.saturating_duration_since(Instant::now()))
            },
        ));
        Ok(true)
    }

    /// Stop ticking; closes the webcam only if `start()` opened it
    ///
    /// Returns `false` if not running.
    pub fn stop(&self) -> bool {
        let controller = lock(&self.controller).take();
        let Some(mut controller) = controller else {
            return false;
        };
        controller.stop();
        info!(webcam = %self.webcam.name(), "Motion detector stopped");

        if self.opened_webcam.swap(false, Ordering::SeqCst)
            && let Err(e) = self.webcam.close()
        {
            warn!(webcam = %self.webcam.name(), error = %e, "Cannot close webcam");
        }
        true
    }

    pub fn is_running(&self) -> bool {
        lock(&self.controller)
            .as_ref()
            .is_some_and(|c| c.is_running())
    }

    // ===== Detection =====

    /// Compare `image` with the previous frame and update the motion state
    ///
    /// This is what every tick runs; calling it directly gives deterministic
    /// control over the frame sequence. The first frame only primes the
    /// comparison. Listeners are notified when the area is within bounds.
    pub fn detect(&self, image: &RgbaImage) -> Detection {
        detect(self.webcam.name(), &self.shared, Arc::new(image.clone()))
    }

    /// True while declared motion holds
    pub fn is_motion(&self) -> bool {
        self.shared.refresh_motion(Instant::now())
    }

    /// Area of the last comparison, percent
    pub fn motion_area(&self) -> f64 {
        lock(&self.shared.state).last.as_ref().map_or(0.0, |d| d.area)
    }

    /// Center of gravity of the last comparison, `None` before the first one
    pub fn motion_cog(&self) -> Option<Point> {
        lock(&self.shared.state).last.as_ref().map(|d| d.cog)
    }

    /// Sampled points of the last comparison
    pub fn motion_points(&self) -> Vec<Point> {
        lock(&self.shared.state)
            .last
            .as_ref()
            .map(|d| d.points.clone())
            .unwrap_or_default()
    }

    /// When motion was last declared
    pub fn last_motion_at(&self) -> Option<Instant> {
        lock(&self.shared.state).last_motion_at
    }

    // ===== Settings =====

    pub fn interval(&self) -> Duration {
        self.shared.interval()
    }

    /// Time between ticks, at least 100 ms
    pub fn set_interval(&self, interval: Duration) -> WebcamResult<()> {
        validate_interval(interval)?;
        *lock(&self.shared.interval) = interval;
        Ok(())
    }

    /// How long declared motion holds, half the interval unless set
    pub fn inertia(&self) -> Duration {
        self.shared.inertia()
    }

    pub fn set_inertia(&self, inertia: Duration) {
        *lock(&self.shared.inertia) = Some(inertia);
    }

    /// Go back to the interval-derived inertia
    pub fn clear_inertia(&self) {
        *lock(&self.shared.inertia) = None;
    }

    pub fn params(&self) -> DetectionParams {
        lock(&self.shared.params).clone()
    }

    pub fn set_pixel_threshold(&self, threshold: u8) {
        lock(&self.shared.params).pixel_threshold = threshold;
    }

    /// Lower bound of the motion area in percent, 0..=100 and not above the maximum
    pub fn set_area_threshold(&self, threshold: f64) -> WebcamResult<()> {
        let mut params = lock(&self.shared.params);
        validate_area_thresholds(threshold, params.area_threshold_max)?;
        params.area_threshold = threshold;
        Ok(())
    }

    /// Upper bound of the motion area in percent, 0..=100 and not below the minimum
    pub fn set_area_threshold_max(&self, threshold: f64) -> WebcamResult<()> {
        let mut params = lock(&self.shared.params);
        validate_area_thresholds(params.area_threshold, threshold)?;
        params.area_threshold_max = threshold;
        Ok(())
    }

    pub fn set_max_points(&self, max_points: usize) {
        lock(&self.shared.params).max_points = max_points;
    }

    pub fn set_point_range(&self, range: u32) {
        lock(&self.shared.params).point_range = range;
    }

    pub fn add_do_not_engage_zone(&self, zone: Zone) {
        lock(&self.shared.params).do_not_engage.push(zone);
    }

    pub fn set_do_not_engage_zones(&self, zones: Vec<Zone>) {
        lock(&self.shared.params).do_not_engage = zones;
    }

    pub fn clear_do_not_engage_zones(&self) {
        lock(&self.shared.params).do_not_engage.clear();
    }

    /// Replace the transform applied before comparison
    pub fn set_transformer(&self, transformer: Arc<dyn ImageTransformer>) {
        *self
            .shared
            .transformer
            .write()
            .unwrap_or_else(|e| e.into_inner()) = transformer;
        // Frames transformed differently are not comparable
        lock(&self.shared.state).previous = None;
    }

    // ===== Listeners =====

    pub fn add_listener(&self, listener: Arc<dyn MotionListener>) -> bool {
        self.shared.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn MotionListener>) -> bool {
        self.shared.listeners.remove(listener)
    }
}

impl Drop for MotionDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One scheduled comparison against the webcam's latest frame
fn tick(webcam: &Webcam, shared: &Shared) {
    match webcam.image() {
        Ok(frame) => {
            if shared.fetch_failed.swap(false, Ordering::SeqCst) {
                info!(webcam = %webcam.name(), "Motion detector receiving frames again");
            }
            detect(webcam.name(), shared, Arc::clone(&frame.image));
        }
        Err(e) => {
            if !shared.fetch_failed.swap(true, Ordering::SeqCst) {
                warn!(webcam = %webcam.name(), error = %e, "Motion detector cannot get frame");
            }
        }
    }
}

fn detect(name: &str, shared: &Shared, image: Arc<RgbaImage>) -> Detection {
    let transformer = Arc::clone(&shared.transformer.read().unwrap_or_else(|e| e.into_inner()));
    let transformed = transformer.transform(&image);
    let params = lock(&shared.params).clone();

    let (detection, motion) = {
        let mut state = lock(&shared.state);
        let (detection, had_previous) = match state.previous.as_ref() {
            Some(previous) => (compare(previous, &transformed, &params), true),
            None => (
                Detection::still(transformed.width(), transformed.height()),
                false,
            ),
        };
        state.previous = Some(transformed);
        state.last = Some(detection.clone());

        let motion = had_previous && params.is_motion_area(detection.area);
        if motion {
            let now = Instant::now();
            state.revert_at = Some(now + shared.inertia());
            state.last_motion_at = Some(now);
            shared.motion.store(true, Ordering::SeqCst);
        }
        (detection, motion)
    };

    if motion {
        debug!(webcam = %name, area = detection.area, "Motion detected");
        let event = MotionEvent {
            webcam: name.to_string(),
            area: detection.area,
            cog: detection.cog,
            points: detection.points.clone(),
            image,
        };
        shared
            .listeners
            .notify("motion", |listener| listener.motion_detected(&event));
    }
    detection
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_pattern::TestPatternDevice;
    use crate::processor::CallSerializer;
    use image::Rgba;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn webcam() -> Arc<Webcam> {
        Webcam::new(
            Arc::new(TestPatternDevice::new(0)),
            CallSerializer::new(),
            false,
            50.0,
        )
    }

    fn frame(square_at: Option<(u32, u32)>) -> RgbaImage {
        let mut image = RgbaImage::from_pixel(64, 48, Rgba([0, 0, 0, 255]));
        if let Some((x0, y0)) = square_at {
            for y in y0..y0 + 8 {
                for x in x0..x0 + 8 {
                    image.put_pixel(x, y, Rgba([255, 255, 255, 255]));
                }
            }
        }
        image
    }

    #[test]
    fn test_defaults() {
        let detector = MotionDetector::new(webcam());
        assert_eq!(detector.interval(), DEFAULT_INTERVAL);
        assert_eq!(detector.inertia(), DEFAULT_INTERVAL / 2);
        detector.set_inertia(Duration::from_millis(300));
        assert_eq!(detector.inertia(), Duration::from_millis(300));
        detector.clear_inertia();
        assert_eq!(detector.inertia(), DEFAULT_INTERVAL / 2);
    }

    #[test]
    fn test_invalid_settings_rejected_synchronously() {
        let detector = MotionDetector::new(webcam());
        assert!(detector.set_interval(Duration::from_millis(50)).unwrap_err().is_configuration());
        assert!(detector.set_area_threshold(-1.0).is_err());
        assert!(detector.set_area_threshold(f64::NAN).is_err());
        assert!(detector.set_area_threshold_max(101.0).is_err());
        assert_eq!(detector.interval(), DEFAULT_INTERVAL);
    }

    #[test]
    fn test_inverted_area_bounds_rejected() {
        let detector = MotionDetector::new(webcam());
        detector.set_area_threshold_max(10.0).unwrap();
        assert!(detector.set_area_threshold(50.0).unwrap_err().is_configuration());
        detector.set_area_threshold(5.0).unwrap();
        assert!(detector.set_area_threshold_max(4.0).unwrap_err().is_configuration());

        let params = detector.params();
        assert_eq!(params.area_threshold, 5.0);
        assert_eq!(params.area_threshold_max, 10.0);
    }

    #[test]
    fn test_config_bounds_below_default_minimum() {
        let config = MotionConfig {
            area_threshold: 0.05,
            area_threshold_max: 0.1,
            ..MotionConfig::default()
        };
        let detector = MotionDetector::with_config(webcam(), &config).unwrap();
        assert_eq!(detector.params().area_threshold_max, 0.1);
    }

    #[test]
    fn test_first_frame_only_primes() {
        let detector = MotionDetector::new(webcam());
        detector.set_transformer(Arc::new(Identity));
        let detection = detector.detect(&frame(Some((4, 4))));
        assert_eq!(detection.area, 0.0);
        assert!(!detector.is_motion());
    }

    #[test]
    fn test_motion_declared_and_listeners_notified() {
        let detector = MotionDetector::new(webcam());
        detector.set_transformer(Arc::new(Identity));
        detector.set_inertia(Duration::from_millis(200));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        detector.add_listener(Arc::new(move |event: &MotionEvent| {
            assert!(event.area > 0.0);
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        detector.detect(&frame(None));
        let detection = detector.detect(&frame(Some((10, 10))));
        assert!((detection.area - 100.0 * 64.0 / (64.0 * 48.0)).abs() < 1e-9);
        assert!(detector.is_motion());
        assert_eq!(detector.motion_cog(), Some(Point::new(13, 13)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Still moving: notified again while inertia holds
        detector.detect(&frame(Some((30, 20))));
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        thread::sleep(Duration::from_millis(100));
        assert!(detector.is_motion());
        thread::sleep(Duration::from_millis(200));
        assert!(!detector.is_motion());
    }

    #[test]
    fn test_area_above_maximum_is_not_motion() {
        let detector = MotionDetector::new(webcam());
        detector.set_transformer(Arc::new(Identity));
        detector.set_area_threshold_max(1.0).unwrap();
        detector.detect(&frame(None));
        let detection = detector.detect(&frame(Some((0, 0))));
        assert!(detection.area > 1.0);
        assert!(!detector.is_motion());
    }

    #[test]
    fn test_start_stop_manages_webcam() {
        let cam = webcam();
        let detector = MotionDetector::new(Arc::clone(&cam));
        detector.set_interval(MIN_INTERVAL).unwrap();

        assert!(detector.start().unwrap());
        assert!(!detector.start().unwrap());
        assert!(cam.is_open());
        thread::sleep(Duration::from_millis(350));
        assert!(detector.motion_cog().is_some());

        assert!(detector.stop());
        assert!(!detector.stop());
        assert!(!cam.is_open());
        cam.dispose().unwrap();
    }

    #[test]
    fn test_stop_leaves_externally_opened_webcam() {
        let cam = webcam();
        cam.open().unwrap();
        let detector = MotionDetector::new(Arc::clone(&cam));
        detector.start().unwrap();
        detector.stop();
        assert!(cam.is_open());
        cam.dispose().unwrap();
    }
}
