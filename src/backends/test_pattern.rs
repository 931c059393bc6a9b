// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic test pattern backend
//!
//! Produces a shifting gradient with a moving square. The driver declares
//! itself not thread-safe so that every call goes through the serializer,
//! and it supports discovery: changing the device count at runtime simulates
//! cameras being plugged in and out.

use super::{
    BackendError, BackendResult, BufferAccess, CameraDevice, CameraDriver, CameraFrame,
    DeviceParameters, DiscoverySupport, Resolution,
};
use image::{Rgba, RgbaImage};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

const RESOLUTIONS: [Resolution; 3] = [Resolution::QQVGA, Resolution::QVGA, Resolution::VGA];

/// Simulated per-frame backend latency (~30 fps)
const FRAME_DELAY: Duration = Duration::from_millis(1000 / 30);

/// Driver producing `count` synthetic devices
pub struct TestPatternDriver {
    count: AtomicUsize,
    scan_interval: Duration,
}

impl TestPatternDriver {
    pub fn new(count: usize) -> Self {
        Self {
            count: AtomicUsize::new(count),
            scan_interval: Duration::from_secs(10),
        }
    }

    /// Override the discovery scan interval
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    /// Change how many devices the next enumeration reports
    pub fn set_count(&self, count: usize) {
        self.count.store(count, Ordering::SeqCst);
    }
}

impl CameraDriver for TestPatternDriver {
    fn name(&self) -> String {
        "TestPatternDriver".to_string()
    }

    fn devices(&self) -> BackendResult<Vec<Arc<dyn CameraDevice>>> {
        let count = self.count.load(Ordering::SeqCst);
        Ok((0..count)
            .map(|i| Arc::new(TestPatternDevice::new(i)) as Arc<dyn CameraDevice>)
            .collect())
    }

    fn is_thread_safe(&self) -> bool {
        false
    }

    fn discovery(&self) -> Option<&dyn DiscoverySupport> {
        Some(self)
    }
}

impl DiscoverySupport for TestPatternDriver {
    fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    fn is_scan_possible(&self) -> bool {
        true
    }
}

/// One synthetic camera
pub struct TestPatternDevice {
    name: String,
    index: usize,
    open: AtomicBool,
    disposed: AtomicBool,
    resolution: Mutex<Resolution>,
    frame_counter: AtomicU64,
    moving_square: AtomicBool,
}

impl TestPatternDevice {
    pub fn new(index: usize) -> Self {
        Self {
            name: format!("Test Pattern {}", index),
            index,
            open: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            resolution: Mutex::new(RESOLUTIONS[0]),
            frame_counter: AtomicU64::new(0),
            moving_square: AtomicBool::new(true),
        }
    }

    fn current_resolution(&self) -> Resolution {
        *self.resolution.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn render(&self) -> RgbaImage {
        let Resolution { width, height } = self.current_resolution();
        let n = self.frame_counter.fetch_add(1, Ordering::Relaxed);
        let tint = (self.index as u32).wrapping_mul(67) % 256;
        let shift = (n % 256) as u32;

        let mut img = RgbaImage::from_fn(width, height, |x, y| {
            let r = ((x * 255 / width.max(1)) + shift) % 256;
            let g = ((y * 255 / height.max(1)) + tint) % 256;
            Rgba([r as u8, g as u8, tint as u8, 255])
        });

        if self.moving_square.load(Ordering::Relaxed) {
            let side = (width.min(height) / 4).max(1);
            let span = width.saturating_sub(side).max(1) as u64;
            let x0 = ((n * 4) % span) as u32;
            let y0 = (height - side) / 2;
            for y in y0..(y0 + side).min(height) {
                for x in x0..(x0 + side).min(width) {
                    img.put_pixel(x, y, Rgba([255, 255, 255, 255]));
                }
            }
        }

        img
    }

    fn ensure_usable(&self) -> BackendResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(BackendError::NotAvailable(format!("{} disposed", self.name)));
        }
        if !self.open.load(Ordering::SeqCst) {
            return Err(BackendError::NotOpen(self.name.clone()));
        }
        Ok(())
    }
}

impl CameraDevice for TestPatternDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn resolutions(&self) -> Vec<Resolution> {
        RESOLUTIONS.to_vec()
    }

    fn resolution(&self) -> Resolution {
        self.current_resolution()
    }

    fn set_resolution(&self, resolution: Resolution) -> BackendResult<()> {
        if !RESOLUTIONS.contains(&resolution) {
            return Err(BackendError::FormatNotSupported(resolution.to_string()));
        }
        *self.resolution.lock().unwrap_or_else(|e| e.into_inner()) = resolution;
        Ok(())
    }

    fn frame(&self) -> BackendResult<Option<CameraFrame>> {
        self.ensure_usable()?;
        std::thread::sleep(FRAME_DELAY);
        Ok(Some(CameraFrame::new(self.render())))
    }

    fn open(&self) -> BackendResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(BackendError::NotAvailable(format!("{} disposed", self.name)));
        }
        if !self.open.swap(true, Ordering::SeqCst) {
            debug!(device = %self.name, "Test pattern opened");
        }
        Ok(())
    }

    fn close(&self) -> BackendResult<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!(device = %self.name, "Test pattern closed");
        }
        Ok(())
    }

    fn dispose(&self) -> BackendResult<()> {
        self.close()?;
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn buffer_access(&self) -> Option<&dyn BufferAccess> {
        Some(self)
    }

    fn parameters(&self) -> Option<&dyn DeviceParameters> {
        Some(self)
    }
}

impl BufferAccess for TestPatternDevice {
    fn read_buffer(&self) -> BackendResult<Vec<u8>> {
        self.ensure_usable()?;
        Ok(self.render().into_raw())
    }
}

impl DeviceParameters for TestPatternDevice {
    fn set_parameters(
        &self,
        parameters: &BTreeMap<String, serde_json::Value>,
    ) -> BackendResult<()> {
        for (key, value) in parameters {
            match (key.as_str(), value.as_bool()) {
                ("moving_square", Some(enabled)) => {
                    self.moving_square.store(enabled, Ordering::Relaxed)
                }
                _ => {
                    return Err(BackendError::Other(format!(
                        "Unsupported parameter {}={}",
                        key, value
                    )));
                }
            }
        }
        Ok(())
    }
}
