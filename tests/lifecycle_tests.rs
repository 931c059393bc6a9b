// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for start/stop idempotence and session lifecycle

mod common;

use common::ScriptedDriver;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use webcam_hub::render::RenderInfo;
use webcam_hub::{
    MotionDetector, RenderContent, RenderScheduler, WebcamError, WebcamEvent, WebcamHub,
};

fn hub(names: &[&str]) -> (Arc<ScriptedDriver>, WebcamHub) {
    let driver = Arc::new(ScriptedDriver::new(names, false));
    let hub = WebcamHub::new(driver.clone());
    (driver, hub)
}

#[test]
fn test_session_open_close_dispose() {
    let (_driver, hub) = hub(&["cam0"]);
    let webcam = hub.default_webcam().unwrap().unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    webcam.add_listener(Arc::new(move |_: &webcam_hub::Webcam, event: &WebcamEvent| {
        let label = match event {
            WebcamEvent::Opened => "opened",
            WebcamEvent::Closed => "closed",
            WebcamEvent::Disposed => "disposed",
            WebcamEvent::ImageObtained(_) => return,
        };
        sink.lock().unwrap().push(label);
    }));

    assert!(webcam.open().unwrap());
    assert!(!webcam.open().unwrap());
    assert!(webcam.close().unwrap());
    assert!(!webcam.close().unwrap());
    webcam.open().unwrap();
    webcam.dispose().unwrap();
    webcam.dispose().unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec!["opened", "closed", "opened", "closed", "disposed"]
    );
    assert!(matches!(webcam.open(), Err(WebcamError::Disposed(_))));
    hub.shutdown();
}

#[test]
fn test_closed_session_without_auto_open_has_no_image() {
    let (_driver, hub) = hub(&["cam0"]);
    let webcam = hub.default_webcam().unwrap().unwrap();

    assert!(matches!(webcam.image(), Err(WebcamError::NotOpen(_))));
    webcam.set_auto_open(true);
    let frame = webcam.image().unwrap();
    assert_eq!((frame.width(), frame.height()), (32, 24));
    assert!(webcam.is_open());
    hub.shutdown();
}

#[test]
fn test_discovery_start_stop_idempotent() {
    let (_driver, hub) = hub(&["cam0"]);
    let discovery = hub.discovery();
    hub.webcams().unwrap();

    assert!(discovery.is_running());
    discovery.start();
    assert!(discovery.is_running());
    discovery.stop();
    discovery.stop();
    assert!(!discovery.is_running());

    discovery.set_enabled(false);
    discovery.start();
    assert!(!discovery.is_running());
    hub.shutdown();
}

#[test]
fn test_render_start_stop_idempotent() {
    let (_driver, hub) = hub(&["cam0"]);
    let webcam = hub.default_webcam().unwrap().unwrap();
    let scheduler = RenderScheduler::new(webcam, Arc::new(|_: &RenderContent, _: &RenderInfo| {}));

    assert!(!scheduler.stop());
    assert!(scheduler.start());
    assert!(!scheduler.start());
    assert!(scheduler.stop());
    assert!(!scheduler.stop());
    assert!(scheduler.start());
    assert!(scheduler.stop());
    hub.shutdown();
}

#[test]
fn test_motion_start_stop_idempotent() {
    let (_driver, hub) = hub(&["cam0"]);
    let webcam = hub.default_webcam().unwrap().unwrap();
    webcam.open().unwrap();
    let detector = MotionDetector::new(Arc::clone(&webcam));
    detector.set_interval(Duration::from_millis(100)).unwrap();

    assert!(!detector.stop());
    assert!(detector.start().unwrap());
    assert!(!detector.start().unwrap());
    assert!(detector.stop());
    assert!(!detector.stop());
    // The detector did not open it, so it leaves it open
    assert!(webcam.is_open());
    hub.shutdown();
}

#[test]
fn test_hub_shutdown_disposes_everything() {
    let (_driver, hub) = hub(&["cam0", "cam1"]);
    let webcams = hub.webcams().unwrap();
    webcams[0].open().unwrap();

    hub.shutdown();
    hub.shutdown();
    assert!(hub.is_shutdown());
    assert!(webcams.iter().all(|w| w.is_disposed()));
    assert!(!hub.discovery().is_running());
    assert!(matches!(hub.webcams(), Err(WebcamError::ProcessorShutdown)));
}
