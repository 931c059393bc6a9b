// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for hot-plug discovery

mod common;

use common::ScriptedDriver;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use webcam_hub::{CallSerializer, DiscoveryEvent, DiscoveryService, WebcamHub};

/// Record events as "found:name" / "gone:name"
fn record(service: &DiscoveryService) -> Arc<Mutex<Vec<String>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    service.add_listener(Arc::new(move |event: &DiscoveryEvent| {
        let label = match event {
            DiscoveryEvent::Found(w) => format!("found:{}", w.name()),
            DiscoveryEvent::Gone(w) => format!("gone:{}", w.name()),
        };
        sink.lock().unwrap().push(label);
    }));
    events
}

fn take(events: &Mutex<Vec<String>>) -> Vec<String> {
    std::mem::take(&mut *events.lock().unwrap())
}

#[test]
fn test_scan_scenario() {
    let driver = Arc::new(ScriptedDriver::new(&["cam0"], false));
    let service = DiscoveryService::new(driver.clone(), CallSerializer::new());
    let events = record(&service);

    service.scan().unwrap();
    assert_eq!(take(&events), vec!["found:cam0"]);

    service.scan().unwrap();
    assert!(take(&events).is_empty(), "unchanged list must not emit events");

    driver.set_names(&[]);
    service.scan().unwrap();
    assert_eq!(take(&events), vec!["gone:cam0"]);
    assert!(service.cached().unwrap().is_empty());

    driver.set_names(&["cam1"]);
    service.scan().unwrap();
    assert_eq!(take(&events), vec!["found:cam1"]);
    assert_eq!(service.cached().unwrap()[0].name(), "cam1");
}

#[test]
fn test_removals_are_announced_before_additions() {
    let driver = Arc::new(ScriptedDriver::new(&["a", "b"], true));
    let service = DiscoveryService::new(driver.clone(), CallSerializer::new());
    service.webcams(Duration::from_secs(5)).unwrap();
    let events = record(&service);

    driver.set_names(&["c", "b", "d"]);
    service.scan().unwrap();
    assert_eq!(take(&events), vec!["gone:a", "found:c", "found:d"]);

    let names: Vec<String> = service
        .cached()
        .unwrap()
        .iter()
        .map(|w| w.name().to_string())
        .collect();
    assert_eq!(names, vec!["c", "b", "d"]);
}

#[test]
fn test_gone_session_is_disposed_before_notification() {
    let driver = Arc::new(ScriptedDriver::new(&["cam0"], true));
    let service = DiscoveryService::new(driver.clone(), CallSerializer::new());
    let disposed_when_notified = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&disposed_when_notified);
    let observer = Arc::clone(&service);
    service.add_listener(Arc::new(move |event: &DiscoveryEvent| {
        if let DiscoveryEvent::Gone(webcam) = event {
            let still_listed = observer.webcam(webcam.name()).is_some();
            *sink.lock().unwrap() = Some((webcam.is_disposed(), still_listed));
        }
    }));

    let webcam = service.webcams(Duration::from_secs(5)).unwrap()[0].clone();
    webcam.open().unwrap();
    driver.set_names(&[]);
    service.scan().unwrap();

    assert_eq!(*disposed_when_notified.lock().unwrap(), Some((true, false)));
    assert!(!webcam.is_open());
}

#[test]
fn test_panicking_listener_does_not_block_others() {
    let driver = Arc::new(ScriptedDriver::new(&["cam0", "cam1"], true));
    let service = DiscoveryService::new(driver, CallSerializer::new());
    service.add_listener(Arc::new(|_: &DiscoveryEvent| panic!("listener bug")));
    let events = record(&service);

    service.scan().unwrap();
    assert_eq!(take(&events), vec!["found:cam0", "found:cam1"]);
}

#[test]
fn test_subscribers_receive_events() {
    let driver = Arc::new(ScriptedDriver::new(&["cam0"], true));
    let service = DiscoveryService::new(driver.clone(), CallSerializer::new());
    let mut receiver = service.subscribe();

    service.scan().unwrap();
    driver.set_names(&[]);
    service.scan().unwrap();

    match receiver.try_recv().unwrap() {
        DiscoveryEvent::Found(webcam) => assert_eq!(webcam.name(), "cam0"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(receiver.try_recv().unwrap(), DiscoveryEvent::Gone(_)));
    assert!(receiver.try_recv().is_err());
}

#[test]
fn test_scan_loop_picks_up_changes() {
    let driver = Arc::new(ScriptedDriver::new(&["cam0"], false));
    let service = DiscoveryService::new(driver.clone(), CallSerializer::new());
    service.set_scan_interval(Some(Duration::from_millis(50)));
    service.webcams(Duration::from_secs(5)).unwrap();
    let events = record(&service);

    service.start();
    driver.set_names(&["cam0", "cam9"]);
    std::thread::sleep(Duration::from_millis(400));
    service.stop();

    assert_eq!(take(&events), vec!["found:cam9"]);
}

#[test]
fn test_hub_initial_list_announces_found() {
    let driver = Arc::new(ScriptedDriver::new(&["cam0", "cam1"], false));
    let hub = WebcamHub::new(driver);
    let events = record(hub.discovery());

    let first = hub.webcams().unwrap();
    let second = hub.webcams().unwrap();
    assert_eq!(take(&events), vec!["found:cam0", "found:cam1"]);
    assert!(Arc::ptr_eq(&first[0], &second[0]));
    assert_eq!(hub.webcam("cam1").unwrap().unwrap().name(), "cam1");
    hub.shutdown();
}

#[test]
fn test_listener_may_shut_service_down() {
    let driver = Arc::new(ScriptedDriver::new(&["cam0"], false));
    let service = DiscoveryService::new(driver.clone(), CallSerializer::new());
    service.webcams(Duration::from_secs(5)).unwrap();

    let weak = Arc::downgrade(&service);
    service.add_listener(Arc::new(move |event: &DiscoveryEvent| {
        if let (DiscoveryEvent::Gone(_), Some(service)) = (event, weak.upgrade()) {
            service.shutdown();
        }
    }));

    driver.set_names(&[]);
    let (tx, rx) = crossbeam_channel::bounded(1);
    let scanner = Arc::clone(&service);
    std::thread::spawn(move || {
        let _ = tx.send(scanner.scan());
    });

    let result = rx
        .recv_timeout(Duration::from_secs(3))
        .expect("scan blocked by a listener calling shutdown");
    assert!(result.is_ok());
    assert!(service.cached().is_none());
}

#[test]
fn test_listener_may_rescan_without_reordering() {
    let driver = Arc::new(ScriptedDriver::new(&["cam0"], true));
    let service = DiscoveryService::new(driver.clone(), CallSerializer::new());
    service.webcams(Duration::from_secs(5)).unwrap();
    let events = record(&service);

    // Rescan from inside the Gone notification with a new device present
    let weak = Arc::downgrade(&service);
    let rescan_driver = Arc::clone(&driver);
    service.add_listener(Arc::new(move |event: &DiscoveryEvent| {
        if let (DiscoveryEvent::Gone(_), Some(service)) = (event, weak.upgrade()) {
            rescan_driver.set_names(&["cam1"]);
            service.scan().unwrap();
        }
    }));

    driver.set_names(&[]);
    service.scan().unwrap();
    assert_eq!(take(&events), vec!["gone:cam0", "found:cam1"]);
}
