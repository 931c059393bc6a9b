// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for call serialization against non-thread-safe drivers

mod common;

use common::ScriptedDriver;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use webcam_hub::{CallSerializer, WebcamError, WebcamHub};

#[test]
fn test_device_calls_never_overlap() {
    let driver = Arc::new(ScriptedDriver::with_delay(
        &["cam0", "cam1", "cam2"],
        false,
        Duration::from_millis(2),
    ));
    let hub = WebcamHub::new(driver.clone());
    let webcams = hub.webcams().unwrap();
    for webcam in &webcams {
        webcam.open().unwrap();
    }

    // Pumps run in the background while readers hammer the sessions
    let readers: Vec<_> = webcams
        .iter()
        .cloned()
        .map(|webcam| {
            thread::spawn(move || {
                for _ in 0..20 {
                    webcam.read_frame().unwrap();
                    let _ = webcam.image().unwrap();
                }
            })
        })
        .collect();
    for reader in readers {
        reader.join().unwrap();
    }

    assert!(driver.concurrency.calls() > 60);
    assert_eq!(driver.concurrency.peak(), 1);
    hub.shutdown();
}

#[test]
fn test_thread_safe_driver_runs_on_callers() {
    let driver = Arc::new(ScriptedDriver::with_delay(
        &["cam0", "cam1"],
        true,
        Duration::from_millis(20),
    ));
    let hub = WebcamHub::new(driver.clone());
    let webcams = hub.webcams().unwrap();
    for webcam in &webcams {
        webcam.open().unwrap();
    }

    let readers: Vec<_> = webcams
        .iter()
        .cloned()
        .map(|webcam| {
            thread::spawn(move || {
                for _ in 0..10 {
                    webcam.read_frame().unwrap();
                }
            })
        })
        .collect();
    for reader in readers {
        reader.join().unwrap();
    }

    // Nothing forces the calls apart
    assert!(driver.concurrency.peak() > 1);
    assert!(!hub.serializer().is_started());
    hub.shutdown();
}

#[test]
fn test_calls_after_shutdown_fail() {
    let serializer = CallSerializer::new();
    assert_eq!(serializer.run("warm up", false, || Ok(1)).unwrap(), 1);
    serializer.shutdown();

    let result = serializer.run("late", false, || Ok(2));
    assert!(matches!(result, Err(WebcamError::ProcessorShutdown)));
}
