// SPDX-License-Identifier: GPL-3.0-only

//! Entry point tying a driver to its serializer and discovery service
//!
//! One [`WebcamHub`] per driver replaces process-wide state: it is created
//! explicitly, handed to whoever needs webcams, and torn down with
//! [`WebcamHub::shutdown`] (also run on drop).

use crate::backends::CameraDriver;
use crate::config::Config;
use crate::discovery::{DiscoveryEvent, DiscoveryListener, DiscoveryService};
use crate::errors::{WebcamError, WebcamResult};
use crate::processor::CallSerializer;
use crate::session::Webcam;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub struct WebcamHub {
    driver: Arc<dyn CameraDriver>,
    serializer: CallSerializer,
    discovery: Arc<DiscoveryService>,
    initial_timeout: Duration,
    shut_down: AtomicBool,
}

impl WebcamHub {
    /// Hub with default settings
    pub fn new(driver: Arc<dyn CameraDriver>) -> Self {
        let config = Config::default();
        Self::build(driver, &config)
    }

    /// Hub configured from `config`, which is validated first
    pub fn with_config(driver: Arc<dyn CameraDriver>, config: &Config) -> WebcamResult<Self> {
        config.validate()?;
        Ok(Self::build(driver, config))
    }

    fn build(driver: Arc<dyn CameraDriver>, config: &Config) -> Self {
        let serializer = CallSerializer::with_handoff_timeout(config.processor.handoff_timeout());
        let discovery = DiscoveryService::new(Arc::clone(&driver), serializer.clone());
        discovery.set_enabled(config.discovery.enabled);
        discovery.set_scan_interval(config.discovery.scan_interval());
        discovery.set_target_fps(config.pump.target_fps);
        discovery.set_auto_open(config.auto_open);

        info!(
            driver = %driver.name(),
            thread_safe = driver.is_thread_safe(),
            "Webcam hub created"
        );

        Self {
            driver,
            serializer,
            discovery,
            initial_timeout: config.discovery.initial_timeout(),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn driver(&self) -> &Arc<dyn CameraDriver> {
        &self.driver
    }

    pub fn serializer(&self) -> &CallSerializer {
        &self.serializer
    }

    pub fn discovery(&self) -> &Arc<DiscoveryService> {
        &self.discovery
    }

    /// All webcams, waiting at most the configured initial timeout
    pub fn webcams(&self) -> WebcamResult<Vec<Arc<Webcam>>> {
        self.webcams_timeout(self.initial_timeout)
    }

    /// All webcams, waiting at most `timeout` for the first enumeration
    ///
    /// Starts the periodic scan loop once the list is known.
    pub fn webcams_timeout(&self, timeout: Duration) -> WebcamResult<Vec<Arc<Webcam>>> {
        if self.is_shutdown() {
            return Err(WebcamError::ProcessorShutdown);
        }
        let webcams = self.discovery.webcams(timeout)?;
        debug!(count = webcams.len(), "Webcams found");
        self.discovery.start();
        Ok(webcams)
    }

    /// First webcam, `None` when there is none
    pub fn default_webcam(&self) -> WebcamResult<Option<Arc<Webcam>>> {
        let webcam = self.webcams()?.into_iter().next();
        match &webcam {
            Some(webcam) => debug!(webcam = %webcam.name(), "Default webcam selected"),
            None => warn!(driver = %self.driver.name(), "No webcam has been detected"),
        }
        Ok(webcam)
    }

    /// Webcam whose device reports `name`
    pub fn webcam(&self, name: &str) -> WebcamResult<Option<Arc<Webcam>>> {
        Ok(self.webcams()?.into_iter().find(|w| w.name() == name))
    }

    pub fn add_discovery_listener(&self, listener: Arc<dyn DiscoveryListener>) -> bool {
        self.discovery.add_listener(listener)
    }

    pub fn remove_discovery_listener(&self, listener: &Arc<dyn DiscoveryListener>) -> bool {
        self.discovery.remove_listener(listener)
    }

    /// Async stream of discovery events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.discovery.subscribe()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Stop discovery, dispose every webcam and stop the serializer worker
    ///
    /// Safe to call more than once and from a signal handler thread.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down webcam hub");
        self.discovery.shutdown();
        self.serializer.shutdown();
    }
}

impl Drop for WebcamHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}
