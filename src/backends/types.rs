// SPDX-License-Identifier: GPL-3.0-only

//! Value types exchanged between drivers and the webcam core

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Frame size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// 160x120
    pub const QQVGA: Resolution = Resolution::new(160, 120);
    /// 320x240
    pub const QVGA: Resolution = Resolution::new(320, 240);
    /// 640x480
    pub const VGA: Resolution = Resolution::new(640, 480);
    /// 1920x1080
    pub const FHD: Resolution = Resolution::new(1920, 1080);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels in a frame of this size
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A single decoded frame
///
/// Pixels are always RGBA; format conversion belongs to the backend that
/// produced the frame. The image is shared, so cloning a frame is cheap.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Decoded pixels
    pub image: Arc<RgbaImage>,
    /// When the backend handed the frame over
    pub captured_at: Instant,
}

impl CameraFrame {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    /// Raw RGBA bytes, row-major, 4 bytes per pixel
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Failure reported by a driver or device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The driver cannot work on this machine
    NotAvailable(String),
    /// No device with that name, usually unplugged
    DeviceNotFound(String),
    NotOpen(String),
    /// Requested resolution or pixel format is not offered
    FormatNotSupported(String),
    /// The call panicked or the device stopped answering
    Crashed(String),
    IoError(String),
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotAvailable(msg) => write!(f, "Driver unavailable: {}", msg),
            BackendError::DeviceNotFound(name) => write!(f, "No such device: {}", name),
            BackendError::NotOpen(name) => write!(f, "Device {} is not open", name),
            BackendError::FormatNotSupported(msg) => write!(f, "Unsupported format: {}", msg),
            BackendError::Crashed(msg) => write!(f, "Device call crashed: {}", msg),
            BackendError::IoError(msg) => write!(f, "Device I/O failed: {}", msg),
            BackendError::Other(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::IoError(err.to_string())
    }
}

impl From<image::ImageError> for BackendError {
    fn from(err: image::ImageError) -> Self {
        BackendError::Other(err.to_string())
    }
}
