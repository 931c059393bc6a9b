// SPDX-License-Identifier: GPL-3.0-only

//! Scripted backends shared by the integration tests

#![allow(dead_code)]

use image::{Rgba, RgbaImage};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use webcam_hub::backends::DiscoverySupport;
use webcam_hub::{BackendError, BackendResult, CameraDevice, CameraDriver, CameraFrame, Resolution};

/// Tracks how many device calls run at the same time
#[derive(Default)]
pub struct Concurrency {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl Concurrency {
    pub fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    pub fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub struct ScriptedDevice {
    name: String,
    open: AtomicBool,
    delay: Duration,
    concurrency: Arc<Concurrency>,
}

impl ScriptedDevice {
    pub const SIZE: Resolution = Resolution::new(32, 24);

    pub fn new(name: &str, delay: Duration, concurrency: Arc<Concurrency>) -> Self {
        Self {
            name: name.to_string(),
            open: AtomicBool::new(false),
            delay,
            concurrency,
        }
    }

    fn tracked<T>(&self, f: impl FnOnce() -> T) -> T {
        self.concurrency.enter();
        std::thread::sleep(self.delay);
        let result = f();
        self.concurrency.leave();
        result
    }
}

impl CameraDevice for ScriptedDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn resolutions(&self) -> Vec<Resolution> {
        vec![Self::SIZE]
    }

    fn resolution(&self) -> Resolution {
        Self::SIZE
    }

    fn set_resolution(&self, _resolution: Resolution) -> BackendResult<()> {
        Ok(())
    }

    fn frame(&self) -> BackendResult<Option<CameraFrame>> {
        self.tracked(|| {
            if !self.open.load(Ordering::SeqCst) {
                return Err(BackendError::NotOpen(self.name.clone()));
            }
            Ok(Some(CameraFrame::new(RgbaImage::from_pixel(
                Self::SIZE.width,
                Self::SIZE.height,
                Rgba([10, 20, 30, 255]),
            ))))
        })
    }

    fn open(&self) -> BackendResult<()> {
        self.tracked(|| self.open.store(true, Ordering::SeqCst));
        Ok(())
    }

    fn close(&self) -> BackendResult<()> {
        self.tracked(|| self.open.store(false, Ordering::SeqCst));
        Ok(())
    }

    fn dispose(&self) -> BackendResult<()> {
        self.close()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Driver whose device list is set by the test
pub struct ScriptedDriver {
    names: Mutex<Vec<String>>,
    thread_safe: bool,
    delay: Duration,
    pub concurrency: Arc<Concurrency>,
}

impl ScriptedDriver {
    pub fn new(names: &[&str], thread_safe: bool) -> Self {
        Self::with_delay(names, thread_safe, Duration::ZERO)
    }

    pub fn with_delay(names: &[&str], thread_safe: bool, delay: Duration) -> Self {
        Self {
            names: Mutex::new(names.iter().map(|n| n.to_string()).collect()),
            thread_safe,
            delay,
            concurrency: Arc::new(Concurrency::default()),
        }
    }

    pub fn set_names(&self, names: &[&str]) {
        *self.names.lock().unwrap() = names.iter().map(|n| n.to_string()).collect();
    }
}

impl CameraDriver for ScriptedDriver {
    fn devices(&self) -> BackendResult<Vec<Arc<dyn CameraDevice>>> {
        // Fresh instances every time, identity is the name only
        Ok(self
            .names
            .lock()
            .unwrap()
            .iter()
            .map(|name| {
                Arc::new(ScriptedDevice::new(
                    name,
                    self.delay,
                    Arc::clone(&self.concurrency),
                )) as Arc<dyn CameraDevice>
            })
            .collect())
    }

    fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }

    fn discovery(&self) -> Option<&dyn DiscoverySupport> {
        Some(self)
    }
}

impl DiscoverySupport for ScriptedDriver {
    fn scan_interval(&self) -> Duration {
        Duration::from_secs(3600)
    }

    fn is_scan_possible(&self) -> bool {
        true
    }
}
