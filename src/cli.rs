// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Saving snapshots
//! - Watching hot-plug events
//! - Printing motion events

use chrono::Local;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use webcam_hub::motion::MotionDetector;
use webcam_hub::{
    CameraDriver, CompositeDriver, Config, DiscoveryEvent, ImageDirectoryDriver, MotionEvent,
    TestPatternDriver, Webcam, WebcamHub,
};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Settings shared by every command
pub struct Context {
    config: Config,
    config_path: Option<PathBuf>,
    dir: Option<PathBuf>,
    cameras: usize,
}

impl Context {
    pub fn new(
        config_path: Option<PathBuf>,
        dir: Option<PathBuf>,
        cameras: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let config = match config_path.as_deref() {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };
        Ok(Self {
            config,
            config_path,
            dir,
            cameras,
        })
    }

    /// Test patterns, an image directory, or both behind a composite driver
    fn driver(&self) -> Arc<dyn CameraDriver> {
        let patterns = (self.cameras > 0).then(|| TestPatternDriver::new(self.cameras));
        let images = self.dir.as_ref().map(ImageDirectoryDriver::new);

        match (patterns, images) {
            (Some(patterns), Some(images)) => {
                let mut composite =
                    CompositeDriver::new(vec![Arc::new(patterns), Arc::new(images)]);
                if let Some(interval) = self.config.discovery.scan_interval() {
                    composite.set_scan_interval(interval);
                }
                Arc::new(composite)
            }
            (None, Some(images)) => Arc::new(images),
            (Some(patterns), None) => Arc::new(patterns),
            (None, None) => Arc::new(TestPatternDriver::new(0)),
        }
    }

    fn hub(&self) -> Result<Arc<WebcamHub>, Box<dyn std::error::Error>> {
        Ok(Arc::new(WebcamHub::with_config(self.driver(), &self.config)?))
    }
}

/// List all available cameras
pub fn list_cameras(context: &Context) -> CliResult {
    let hub = context.hub()?;
    let webcams = hub.webcams()?;

    if webcams.is_empty() {
        println!("No cameras found.");
        hub.shutdown();
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for (index, webcam) in webcams.iter().enumerate() {
        println!("  [{}] {}", index, webcam.name());
        match webcam.view_sizes() {
            Ok(sizes) if !sizes.is_empty() => {
                let sizes: Vec<String> = sizes.iter().map(|s| s.to_string()).collect();
                println!("      Resolutions: {}", sizes.join(", "));
            }
            Ok(_) => {}
            Err(e) => println!("      Resolutions unavailable: {}", e),
        }
        println!();
    }

    hub.shutdown();
    Ok(())
}

/// Save a single frame of the selected camera
pub fn take_snapshot(context: &Context, camera: usize, output: Option<PathBuf>) -> CliResult {
    let hub = context.hub()?;
    let webcam = select_webcam(&hub, camera)?;
    println!("Using camera: {}", webcam.name());

    let path = match output {
        Some(path) if path.is_dir() => path.join(snapshot_file_name()),
        Some(path) => path,
        None => default_snapshot_dir().join(snapshot_file_name()),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    webcam.open()?;
    let frame = webcam.read_frame();
    webcam.close()?;
    let frame = frame?;

    save_frame(&frame.image, &path)?;
    println!(
        "Saved {}x{} frame to {}",
        frame.width(),
        frame.height(),
        path.display()
    );

    hub.shutdown();
    Ok(())
}

/// Print discovery events until Ctrl-C
pub fn watch(context: &Context) -> CliResult {
    let hub = context.hub()?;
    hub.add_discovery_listener(Arc::new(|event: &DiscoveryEvent| match event {
        DiscoveryEvent::Found(webcam) => {
            println!("{} found: {}", timestamp(), webcam.name())
        }
        DiscoveryEvent::Gone(webcam) => {
            println!("{} gone:  {}", timestamp(), webcam.name())
        }
    }));

    let webcams = hub.webcams()?;
    if !hub.discovery().is_running() {
        println!("Driver does not support hot-plug scanning, showing the initial list only.");
    }
    println!("Watching {} camera(s), press Ctrl-C to stop.", webcams.len());

    wait_for_interrupt(&hub)?;
    Ok(())
}

/// Print motion events of the selected camera until Ctrl-C
pub fn detect_motion(context: &Context, camera: usize) -> CliResult {
    let hub = context.hub()?;
    let webcam = select_webcam(&hub, camera)?;
    let detector = MotionDetector::with_config(Arc::clone(&webcam), &context.config.motion)?;

    detector.add_listener(Arc::new(|event: &MotionEvent| {
        println!(
            "{} motion on {}: area {:.2}% around ({}, {}), {} point(s)",
            timestamp(),
            event.webcam,
            event.area,
            event.cog.x,
            event.cog.y,
            event.points.len()
        );
    }));

    detector.start()?;
    println!(
        "Detecting motion on {} every {} ms, press Ctrl-C to stop.",
        webcam.name(),
        detector.interval().as_millis()
    );

    wait_for_interrupt(&hub)?;
    detector.stop();
    Ok(())
}

/// Print the effective configuration, optionally saving it
pub fn show_config(context: &Context, save: bool) -> CliResult {
    println!("{}", serde_json::to_string_pretty(&context.config)?);

    if save {
        let path = context
            .config_path
            .clone()
            .or_else(Config::default_path)
            .ok_or("No configuration directory on this platform")?;
        context.config.save_to(&path)?;
        println!("Saved to {}", path.display());
    }
    Ok(())
}

fn select_webcam(hub: &WebcamHub, index: usize) -> Result<Arc<Webcam>, Box<dyn std::error::Error>> {
    let webcams = hub.webcams()?;
    if webcams.is_empty() {
        return Err("No cameras found".into());
    }
    webcams.get(index).cloned().ok_or_else(|| {
        format!(
            "Camera index {} out of range (0-{})",
            index,
            webcams.len() - 1
        )
        .into()
    })
}

/// Block until Ctrl-C, then shut the hub down
fn wait_for_interrupt(hub: &Arc<WebcamHub>) -> CliResult {
    let (tx, rx) = crossbeam_channel::bounded::<()>(1);
    let handler_hub = Arc::clone(hub);
    ctrlc::set_handler(move || {
        handler_hub.shutdown();
        let _ = tx.try_send(());
    })?;

    let _ = rx.recv();
    println!();
    println!("Stopped.");
    Ok(())
}

/// Write a frame, dropping alpha for formats that cannot store it
fn save_frame(image: &RgbaImage, path: &Path) -> image::ImageResult<()> {
    match ImageFormat::from_path(path)? {
        ImageFormat::Png => image.save(path),
        _ => DynamicImage::ImageRgba8(image.clone()).to_rgb8().save(path),
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn snapshot_file_name() -> String {
    format!("snapshot_{}.png", Local::now().format("%Y%m%d_%H%M%S"))
}

fn default_snapshot_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("webcam-hub")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join(format!("webcam-hub-cli-{}-{}", std::process::id(), name));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_snapshot_saves_jpeg_and_png() {
        let dir = scratch_dir("snapshot");
        let image = RgbaImage::from_pixel(8, 6, Rgba([200, 40, 10, 255]));

        let jpeg = dir.join("frame.jpg");
        save_frame(&image, &jpeg).unwrap();
        let loaded = image::open(&jpeg).unwrap();
        assert_eq!((loaded.width(), loaded.height()), (8, 6));

        let png = dir.join("frame.png");
        save_frame(&image, &png).unwrap();
        assert_eq!(image::open(&png).unwrap().to_rgba8(), image);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_snapshot_rejects_unknown_extension() {
        let dir = scratch_dir("unknown");
        let image = RgbaImage::new(2, 2);
        assert!(save_frame(&image, &dir.join("frame.xyz")).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
