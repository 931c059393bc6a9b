// SPDX-License-Identifier: GPL-3.0-only

//! Still-image directory backend
//!
//! Every supported image file in a directory is exposed as one device whose
//! frames are the decoded file. Adding or removing files is picked up by the
//! discovery scan, which makes this backend handy for exercising hot-plug
//! handling without hardware. Decoding is pure Rust, so the driver is
//! thread-safe.

use super::{
    BackendError, BackendResult, CameraDevice, CameraDriver, CameraFrame, DiscoverySupport,
    Resolution,
};
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// Supported image file extensions
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Check if a file extension is a supported image format
pub fn is_image_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

/// Driver exposing image files of one directory as cameras
pub struct ImageDirectoryDriver {
    dir: PathBuf,
    scan_interval: Duration,
}

impl ImageDirectoryDriver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            scan_interval: Duration::from_secs(2),
        }
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn image_files(&self) -> BackendResult<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .filter(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(is_image_extension)
            })
            .collect();
        files.sort();
        Ok(files)
    }
}

impl CameraDriver for ImageDirectoryDriver {
    fn name(&self) -> String {
        format!("ImageDirectoryDriver({})", self.dir.display())
    }

    fn devices(&self) -> BackendResult<Vec<Arc<dyn CameraDevice>>> {
        let files = self.image_files()?;
        debug!(dir = %self.dir.display(), count = files.len(), "Enumerated image files");
        Ok(files
            .into_iter()
            .map(|path| Arc::new(ImageFileDevice::new(path)) as Arc<dyn CameraDevice>)
            .collect())
    }

    fn is_thread_safe(&self) -> bool {
        true
    }

    fn discovery(&self) -> Option<&dyn DiscoverySupport> {
        Some(self)
    }
}

impl DiscoverySupport for ImageDirectoryDriver {
    fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    fn is_scan_possible(&self) -> bool {
        self.dir.is_dir()
    }
}

/// Decoded image together with the file modification time it came from
struct CachedImage {
    modified: Option<SystemTime>,
    image: Arc<RgbaImage>,
}

/// One image file presented as a camera
pub struct ImageFileDevice {
    path: PathBuf,
    name: String,
    open: AtomicBool,
    disposed: AtomicBool,
    cache: Mutex<Option<CachedImage>>,
}

impl ImageFileDevice {
    pub fn new(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            path,
            name,
            open: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            cache: Mutex::new(None),
        }
    }

    /// Decode the file, reusing the cached pixels while the file is unchanged
    fn load(&self) -> BackendResult<Arc<RgbaImage>> {
        let modified = std::fs::metadata(&self.path)?.modified().ok();
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(cached) = cache.as_ref()
            && cached.modified == modified
        {
            return Ok(Arc::clone(&cached.image));
        }

        let started = Instant::now();
        let image = Arc::new(image::open(&self.path)?.to_rgba8());
        info!(
            path = %self.path.display(),
            width = image.width(),
            height = image.height(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Image file decoded"
        );
        *cache = Some(CachedImage {
            modified,
            image: Arc::clone(&image),
        });
        Ok(image)
    }
}

impl CameraDevice for ImageFileDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn resolutions(&self) -> Vec<Resolution> {
        vec![self.resolution()]
    }

    fn resolution(&self) -> Resolution {
        match image::image_dimensions(&self.path) {
            Ok((width, height)) => Resolution::new(width, height),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot read image dimensions");
                Resolution::new(0, 0)
            }
        }
    }

    fn set_resolution(&self, resolution: Resolution) -> BackendResult<()> {
        if resolution == self.resolution() {
            Ok(())
        } else {
            Err(BackendError::FormatNotSupported(format!(
                "{} only provides its native size",
                self.name
            )))
        }
    }

    fn frame(&self) -> BackendResult<Option<CameraFrame>> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(BackendError::NotOpen(self.name.clone()));
        }
        let image = self.load()?;
        Ok(Some(CameraFrame {
            image,
            captured_at: Instant::now(),
        }))
    }

    fn open(&self) -> BackendResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(BackendError::NotAvailable(format!("{} disposed", self.name)));
        }
        if !self.path.is_file() {
            return Err(BackendError::DeviceNotFound(self.path.display().to_string()));
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> BackendResult<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn dispose(&self) -> BackendResult<()> {
        self.open.store(false, Ordering::SeqCst);
        self.disposed.store(true, Ordering::SeqCst);
        *self.cache.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
