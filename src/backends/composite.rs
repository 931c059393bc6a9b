// SPDX-License-Identifier: GPL-3.0-only

//! Driver aggregating the devices of several drivers

use super::{BackendResult, CameraDevice, CameraDriver, DiscoverySupport};
use crate::constants::discovery::DEFAULT_SCAN_INTERVAL;
use std::sync::Arc;
use std::time::Duration;

/// Presents several drivers as one
///
/// It is thread-safe only if every member is, so a single non-thread-safe
/// member routes all calls through the serializer.
pub struct CompositeDriver {
    drivers: Vec<Arc<dyn CameraDriver>>,
    scan_interval: Option<Duration>,
}

impl CompositeDriver {
    pub fn new(drivers: Vec<Arc<dyn CameraDriver>>) -> Self {
        Self {
            drivers,
            scan_interval: None,
        }
    }

    pub fn add(&mut self, driver: Arc<dyn CameraDriver>) {
        self.drivers.push(driver);
    }

    pub fn drivers(&self) -> &[Arc<dyn CameraDriver>] {
        &self.drivers
    }

    /// Override the scan interval; zero restores the default
    pub fn set_scan_interval(&mut self, interval: Duration) {
        self.scan_interval = (!interval.is_zero()).then_some(interval);
    }
}

impl CameraDriver for CompositeDriver {
    fn name(&self) -> String {
        let names: Vec<String> = self.drivers.iter().map(|d| d.name()).collect();
        format!("CompositeDriver[{}]", names.join(", "))
    }

    fn devices(&self) -> BackendResult<Vec<Arc<dyn CameraDevice>>> {
        let mut all = Vec::new();
        for driver in &self.drivers {
            all.extend(driver.devices()?);
        }
        Ok(all)
    }

    fn is_thread_safe(&self) -> bool {
        self.drivers.iter().all(|d| d.is_thread_safe())
    }

    fn discovery(&self) -> Option<&dyn DiscoverySupport> {
        Some(self)
    }
}

impl DiscoverySupport for CompositeDriver {
    fn scan_interval(&self) -> Duration {
        self.scan_interval.unwrap_or(DEFAULT_SCAN_INTERVAL)
    }

    fn is_scan_possible(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::TestPatternDriver;

    struct SafeEmpty;

    impl CameraDriver for SafeEmpty {
        fn devices(&self) -> BackendResult<Vec<Arc<dyn CameraDevice>>> {
            Ok(Vec::new())
        }

        fn is_thread_safe(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_thread_safety_is_conjunction() {
        let safe = CompositeDriver::new(vec![Arc::new(SafeEmpty), Arc::new(SafeEmpty)]);
        assert!(safe.is_thread_safe());

        let mixed = CompositeDriver::new(vec![
            Arc::new(SafeEmpty),
            Arc::new(TestPatternDriver::new(1)),
        ]);
        assert!(!mixed.is_thread_safe());
    }

    #[test]
    fn test_devices_are_concatenated() {
        let composite = CompositeDriver::new(vec![
            Arc::new(TestPatternDriver::new(2)),
            Arc::new(SafeEmpty),
            Arc::new(TestPatternDriver::new(1)),
        ]);
        assert_eq!(composite.devices().unwrap().len(), 3);
    }

    #[test]
    fn test_scan_interval_default_and_override() {
        let mut composite = CompositeDriver::new(Vec::new());
        assert_eq!(composite.scan_interval(), DEFAULT_SCAN_INTERVAL);
        composite.set_scan_interval(Duration::from_millis(250));
        assert_eq!(composite.scan_interval(), Duration::from_millis(250));
        composite.set_scan_interval(Duration::ZERO);
        assert_eq!(composite.scan_interval(), DEFAULT_SCAN_INTERVAL);
    }
}
