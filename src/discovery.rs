// SPDX-License-Identifier: GPL-3.0-only

//! Hot-plug discovery
//!
//! The [`DiscoveryService`] owns the canonical list of [`Webcam`] sessions.
//! Each scan asks the driver for its current devices and reconciles them by
//! name against the cached list:
//!
//! ```text
//!   cached names ──┐
//!                  ├── reconcile ──► removed ─► dispose, drop from list, Gone
//!   driver names ──┘                 added   ─► new session, add to list, Found
//!                                    unchanged (session reused, no event)
//! ```
//!
//! All removals of a pass are handled before any addition. Events are queued
//! in order while the scan runs and delivered once the scan lock has been
//! released, so listeners may call back into the service, even `shutdown()`.
//! One thread at a time delivers; a caller that finds delivery in progress
//! leaves its events to that thread.

use crate::backends::{CameraDevice, CameraDriver};
use crate::capture::{LoopAction, LoopController};
use crate::constants::discovery::EVENT_CHANNEL_CAPACITY;
use crate::constants::pump::TARGET_FPS;
use crate::errors::{WebcamError, WebcamResult};
use crate::listeners::ListenerSet;
use crate::processor::CallSerializer;
use crate::session::Webcam;
use crossbeam_channel::RecvTimeoutError;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Name-based difference between two device lists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// In the new list only, in new-list order
    pub added: Vec<String>,
    /// In the old list only, in old-list order
    pub removed: Vec<String>,
    /// In both lists, in new-list order
    pub unchanged: Vec<String>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Partition two name lists into added, removed and unchanged
///
/// Names are the only device identity. A name listed twice counts once.
pub fn reconcile<A, B>(old: &[A], new: &[B]) -> Reconciliation
where
    A: AsRef<str>,
    B: AsRef<str>,
{
    let old_set: HashSet<&str> = old.iter().map(AsRef::as_ref).collect();
    let new_set: HashSet<&str> = new.iter().map(AsRef::as_ref).collect();

    let mut result = Reconciliation::default();
    let mut seen = HashSet::new();
    for name in new.iter().map(AsRef::as_ref) {
        if !seen.insert(name) {
            continue;
        }
        if old_set.contains(name) {
            result.unchanged.push(name.to_string());
        } else {
            result.added.push(name.to_string());
        }
    }

    let mut seen = HashSet::new();
    for name in old.iter().map(AsRef::as_ref) {
        if seen.insert(name) && !new_set.contains(name) {
            result.removed.push(name.to_string());
        }
    }
    result
}

/// Device appeared or disappeared
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    Found(Arc<Webcam>),
    Gone(Arc<Webcam>),
}

impl DiscoveryEvent {
    pub fn webcam(&self) -> &Arc<Webcam> {
        match self {
            DiscoveryEvent::Found(webcam) | DiscoveryEvent::Gone(webcam) => webcam,
        }
    }
}

/// Receives [`DiscoveryEvent`]s
pub trait DiscoveryListener: Send + Sync {
    fn on_discovery_event(&self, event: &DiscoveryEvent);
}

impl<F> DiscoveryListener for F
where
    F: Fn(&DiscoveryEvent) + Send + Sync,
{
    fn on_discovery_event(&self, event: &DiscoveryEvent) {
        self(event)
    }
}

/// Owner of the canonical session list
pub struct DiscoveryService {
    driver: Arc<dyn CameraDriver>,
    serializer: CallSerializer,
    /// `None` until the first enumeration succeeded
    webcams: Mutex<Option<Vec<Arc<Webcam>>>>,
    /// Serializes scans, including the first enumeration
    scan_lock: Mutex<()>,
    listeners: ListenerSet<dyn DiscoveryListener>,
    events: broadcast::Sender<DiscoveryEvent>,
    /// Events of finished passes not yet handed to listeners
    pending: Mutex<VecDeque<DiscoveryEvent>>,
    delivering: AtomicBool,
    enabled: AtomicBool,
    scan_interval: Mutex<Option<Duration>>,
    target_fps: Mutex<f64>,
    auto_open: AtomicBool,
    controller: Mutex<Option<LoopController>>,
    this: Weak<DiscoveryService>,
}

impl DiscoveryService {
    pub fn new(driver: Arc<dyn CameraDriver>, serializer: CallSerializer) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new_cyclic(|this| Self {
            driver,
            serializer,
            webcams: Mutex::new(None),
            scan_lock: Mutex::new(()),
            listeners: ListenerSet::new(),
            events,
            pending: Mutex::new(VecDeque::new()),
            delivering: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            scan_interval: Mutex::new(None),
            target_fps: Mutex::new(TARGET_FPS),
            auto_open: AtomicBool::new(false),
            controller: Mutex::new(None),
            this: this.clone(),
        })
    }

    pub fn driver(&self) -> &Arc<dyn CameraDriver> {
        &self.driver
    }

    // ===== Settings =====

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Disabled discovery keeps enumerating on demand but never starts the scan loop
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Override the driver's scan interval, `None` to use the driver's
    pub fn set_scan_interval(&self, interval: Option<Duration>) {
        *lock(&self.scan_interval) = interval.filter(|i| !i.is_zero());
    }

    /// Effective scan interval, `None` if the driver cannot be scanned
    pub fn scan_interval(&self) -> Option<Duration> {
        let support = self.driver.discovery()?;
        Some((*lock(&self.scan_interval)).unwrap_or_else(|| support.scan_interval()))
    }

    /// Pump ceiling of sessions created from now on
    pub fn set_target_fps(&self, fps: f64) {
        *lock(&self.target_fps) = fps;
    }

    /// Auto-open mode of sessions created from now on
    pub fn set_auto_open(&self, auto_open: bool) {
        self.auto_open.store(auto_open, Ordering::SeqCst);
    }

    // ===== Listeners =====

    pub fn add_listener(&self, listener: Arc<dyn DiscoveryListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn DiscoveryListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Async stream of every event sent from now on
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    // ===== Session list =====

    /// Cached sessions, `None` before the first enumeration
    pub fn cached(&self) -> Option<Vec<Arc<Webcam>>> {
        self.lock_list().clone()
    }

    /// Session of the device named `name`
    pub fn webcam(&self, name: &str) -> Option<Arc<Webcam>> {
        self.lock_list()
            .as_ref()?
            .iter()
            .find(|w| w.name() == name)
            .cloned()
    }

    /// Current sessions, enumerating first if nothing is cached yet
    ///
    /// The first enumeration runs on its own thread and is abandoned after
    /// `timeout`, in which case nothing is cached and a later call retries.
    /// Sessions found by it are announced with [`DiscoveryEvent::Found`].
    pub fn webcams(&self, timeout: Duration) -> WebcamResult<Vec<Arc<Webcam>>> {
        if let Some(list) = self.cached() {
            return Ok(list);
        }

        let scan = lock(&self.scan_lock);
        if let Some(list) = self.cached() {
            return Ok(list);
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        let driver = Arc::clone(&self.driver);
        let serializer = self.serializer.clone();
        thread::Builder::new()
            .name("webcam-discovery".to_string())
            .spawn(move || {
                // The receiver is gone when the caller timed out
                let _ = tx.send(enumerate(&driver, &serializer));
            })?;

        let devices = match rx.recv_timeout(timeout) {
            Ok(result) => result?,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    driver = %self.driver.name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "First webcam enumeration timed out"
                );
                return Err(WebcamError::DiscoveryTimeout(timeout));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(WebcamError::CallFailed {
                    operation: "get devices",
                    source: crate::backends::BackendError::Crashed(
                        "discovery thread exited without a result".into(),
                    ),
                });
            }
        };

        let list = self.apply(devices);
        drop(scan);
        self.deliver_pending();
        Ok(list)
    }

    /// Run one reconciliation pass against the driver
    pub fn scan(&self) -> WebcamResult<()> {
        {
            let _scan = lock(&self.scan_lock);
            let devices = enumerate(&self.driver, &self.serializer)?;
            self.apply(devices);
        }
        self.deliver_pending();
        Ok(())
    }

    /// Reconcile `devices` against the cache; caller holds the scan lock
    fn apply(&self, devices: Vec<Arc<dyn CameraDevice>>) -> Vec<Arc<Webcam>> {
        let old = self.cached().unwrap_or_default();
        let old_names: Vec<&str> = old.iter().map(|w| w.name()).collect();
        let new_names: Vec<String> = devices.iter().map(|d| d.name()).collect();
        let diff = reconcile(&old_names, &new_names);

        if !diff.is_empty() {
            debug!(
                added = ?diff.added,
                removed = ?diff.removed,
                unchanged = diff.unchanged.len(),
                "Webcam list changed"
            );
        }

        // Removals first: dispose, update the list, then queue
        let removed: HashSet<&str> = diff.removed.iter().map(String::as_str).collect();
        let gone: Vec<Arc<Webcam>> = old
            .iter()
            .filter(|w| removed.contains(w.name()))
            .cloned()
            .collect();
        if !gone.is_empty() {
            for webcam in &gone {
                if let Err(e) = webcam.dispose() {
                    warn!(webcam = %webcam.name(), error = %e, "Dispose of removed webcam failed");
                }
            }
            if let Some(list) = self.lock_list().as_mut() {
                list.retain(|w| !removed.contains(w.name()));
            }
            for webcam in gone {
                info!(webcam = %webcam.name(), "Webcam gone");
                self.queue(DiscoveryEvent::Gone(webcam));
            }
        }

        // Then additions, keeping the driver's order and reusing sessions
        let mut existing: HashMap<&str, &Arc<Webcam>> = old
            .iter()
            .filter(|w| !removed.contains(w.name()))
            .map(|w| (w.name(), w))
            .collect();
        let thread_safe = self.driver.is_thread_safe();
        let target_fps = *lock(&self.target_fps);
        let auto_open = self.auto_open.load(Ordering::SeqCst);

        let mut list = Vec::with_capacity(devices.len());
        let mut found = Vec::new();
        let mut seen = HashSet::new();
        for (device, name) in devices.into_iter().zip(&new_names) {
            if !seen.insert(name.as_str()) {
                warn!(webcam = %name, "Driver reported a device name twice, ignoring duplicate");
                continue;
            }
            match existing.remove(name.as_str()) {
                Some(webcam) => list.push(Arc::clone(webcam)),
                None => {
                    let webcam = Webcam::new(device, self.serializer.clone(), thread_safe, target_fps);
                    webcam.set_auto_open(auto_open);
                    found.push(Arc::clone(&webcam));
                    list.push(webcam);
                }
            }
        }

        *self.lock_list() = Some(list.clone());
        for webcam in found {
            info!(webcam = %webcam.name(), "Webcam found");
            self.queue(DiscoveryEvent::Found(webcam));
        }
        list
    }

    /// Caller holds the scan lock, which fixes the event order
    fn queue(&self, event: DiscoveryEvent) {
        lock(&self.pending).push_back(event);
    }

    /// Hand queued events to listeners and subscribers; never under the scan lock
    fn deliver_pending(&self) {
        loop {
            if self
                .delivering
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
            loop {
                let next = lock(&self.pending).pop_front();
                let Some(event) = next else {
                    break;
                };
                self.listeners
                    .notify("discovery", |listener| listener.on_discovery_event(&event));
                // No subscribers is not an error
                let _ = self.events.send(event);
            }
            self.delivering.store(false, Ordering::SeqCst);
            // Events queued between the last pop and the reset
            if lock(&self.pending).is_empty() {
                return;
            }
        }
    }

    // ===== Scan loop =====

    /// Start the periodic scan loop
    ///
    /// A no-op when discovery is disabled, the driver has no discovery
    /// support, scanning is not possible right now, or the loop already runs.
    pub fn start(&self) {
        if !self.is_enabled() {
            info!("Discovery service has been disabled and thus it will not be started");
            return;
        }
        let Some(support) = self.driver.discovery() else {
            debug!(driver = %self.driver.name(), "Driver does not support discovery");
            return;
        };
        if !support.is_scan_possible() {
            debug!(driver = %self.driver.name(), "Scanning is not possible right now");
            return;
        }

        let mut controller = lock(&self.controller);
        if controller.as_ref().is_some_and(|c| c.is_running()) {
            return;
        }

        let this = self.this.clone();
        *controller = Some(LoopController::start("webcam-discovery-service", move |stop| {
            let Some(service) = this.upgrade() else {
                return LoopAction::Stop;
            };
            let Some(interval) = service.scan_interval() else {
                return LoopAction::Stop;
            };
            drop(service);

            if stop.wait(interval) {
                return LoopAction::Stop;
            }
            let Some(service) = this.upgrade() else {
                return LoopAction::Stop;
            };

            let possible = service
                .driver
                .discovery()
                .is_some_and(|support| support.is_scan_possible());
            if possible && let Err(e) = service.scan() {
                error!(driver = %service.driver.name(), error = %e, "Webcam scan failed");
            }
            LoopAction::Continue
        }));
    }

    pub fn is_running(&self) -> bool {
        lock(&self.controller)
            .as_ref()
            .is_some_and(|c| c.is_running())
    }

    /// Stop the scan loop; a scan in progress finishes first
    pub fn stop(&self) {
        let controller = lock(&self.controller).take();
        if let Some(mut controller) = controller {
            controller.stop();
        }
    }

    /// Stop scanning and dispose every session
    ///
    /// The cache is cleared, so a later [`DiscoveryService::webcams`] call
    /// enumerates again.
    pub fn shutdown(&self) {
        self.stop();
        let _scan = lock(&self.scan_lock);
        let webcams = self.lock_list().take().unwrap_or_default();
        for webcam in webcams {
            if let Err(e) = webcam.dispose() {
                warn!(webcam = %webcam.name(), error = %e, "Dispose during shutdown failed");
            }
        }
    }

    fn lock_list(&self) -> MutexGuard<'_, Option<Vec<Arc<Webcam>>>> {
        lock(&self.webcams)
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Ask the driver for its devices through the serializer
fn enumerate(
    driver: &Arc<dyn CameraDriver>,
    serializer: &CallSerializer,
) -> WebcamResult<Vec<Arc<dyn CameraDevice>>> {
    let target = Arc::clone(driver);
    serializer.run("get devices", driver.is_thread_safe(), move || target.devices())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
