// SPDX-License-Identifier: GPL-3.0-only

//! Persistent configuration
//!
//! Stored as pretty JSON in `<config dir>/webcam-hub/config.json`. Every
//! field has a default, so partial files and missing files both load.

use crate::constants::{config_file, discovery, motion, processor, pump, render};
use crate::errors::{WebcamError, WebcamResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Run the periodic scan loop
    pub enabled: bool,
    /// Wait budget of the first enumeration
    pub initial_timeout_ms: u64,
    /// Scan interval override, driver default when unset
    pub scan_interval_ms: Option<u64>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_timeout_ms: discovery::DEFAULT_INITIAL_TIMEOUT.as_millis() as u64,
            scan_interval_ms: None,
        }
    }
}

impl DiscoveryConfig {
    pub fn initial_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_timeout_ms)
    }

    pub fn scan_interval(&self) -> Option<Duration> {
        self.scan_interval_ms.map(Duration::from_millis)
    }
}

/// Call serializer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// How long a caller waits for the worker to accept a task
    pub handoff_timeout_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            handoff_timeout_ms: processor::HANDOFF_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ProcessorConfig {
    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }
}

/// Frame pump settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    /// Ceiling on reads per second
    pub target_fps: f64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            target_fps: pump::TARGET_FPS,
        }
    }
}

/// Render scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub fps: f64,
    /// False for free-running refresh
    pub fps_limited: bool,
    /// Open the webcam on start and close it on stop
    pub manage_webcam: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            fps: render::DEFAULT_FPS,
            fps_limited: false,
            manage_webcam: true,
        }
    }
}

/// Motion detector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub interval_ms: u64,
    pub pixel_threshold: u8,
    /// Percent of the frame
    pub area_threshold: f64,
    /// Percent of the frame
    pub area_threshold_max: f64,
    /// Half the interval when unset
    pub inertia_ms: Option<u64>,
    pub max_points: usize,
    pub point_range: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            interval_ms: motion::DEFAULT_INTERVAL.as_millis() as u64,
            pixel_threshold: motion::DEFAULT_PIXEL_THRESHOLD,
            area_threshold: motion::DEFAULT_AREA_THRESHOLD,
            area_threshold_max: motion::DEFAULT_AREA_THRESHOLD_MAX,
            inertia_ms: None,
            max_points: motion::DEFAULT_MAX_POINTS,
            point_range: motion::DEFAULT_POINT_RANGE,
        }
    }
}

impl MotionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn inertia(&self) -> Option<Duration> {
        self.inertia_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sessions open themselves on the first frame request
    pub auto_open: bool,
    pub discovery: DiscoveryConfig,
    pub processor: ProcessorConfig,
    pub pump: PumpConfig,
    pub render: RenderConfig,
    pub motion: MotionConfig,
}

impl Config {
    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(config_file::APP_DIR).join(config_file::FILE_NAME))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> WebcamResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            Some(path) => {
                debug!(path = %path.display(), "No configuration file, using defaults");
                Ok(Self::default())
            }
            None => {
                debug!("No configuration directory on this platform, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load and validate the file at `path`
    pub fn load_from(path: &Path) -> WebcamResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Write to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> WebcamResult<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Reject values no component would accept
    pub fn validate(&self) -> WebcamResult<()> {
        if self.discovery.initial_timeout_ms == 0 {
            return Err(invalid("discovery.initial_timeout_ms must be positive"));
        }
        if self.processor.handoff_timeout_ms == 0 {
            return Err(invalid("processor.handoff_timeout_ms must be positive"));
        }
        if !(self.pump.target_fps.is_finite() && self.pump.target_fps > 0.0) {
            return Err(invalid(format!(
                "pump.target_fps must be a positive number, got {}",
                self.pump.target_fps
            )));
        }
        if !(self.render.fps.is_finite() && self.render.fps > 0.0) {
            return Err(invalid(format!(
                "render.fps must be a positive number, got {}",
                self.render.fps
            )));
        }
        crate::motion::validate_interval(self.motion.interval())?;
        crate::motion::validate_area_thresholds(
            self.motion.area_threshold,
            self.motion.area_threshold_max,
        )?;
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> WebcamError {
    WebcamError::Configuration(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "auto_open": true, "motion": { "pixel_threshold": 40 } }"#)
                .unwrap();
        assert!(config.auto_open);
        assert_eq!(config.motion.pixel_threshold, 40);
        assert_eq!(config.motion.max_points, motion::DEFAULT_MAX_POINTS);
        assert_eq!(config.render, RenderConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.pump.target_fps = f64::NAN;
        assert!(config.validate().unwrap_err().is_configuration());

        let mut config = Config::default();
        config.motion.area_threshold = 150.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.motion.interval_ms = 10;
        assert!(config.validate().is_err());
    }
}
