// SPDX-License-Identifier: GPL-3.0-only

//! Listener registration and panic-isolated dispatch
//!
//! A listener that panics is logged and skipped; the remaining listeners are
//! still notified and the notifying loop keeps running.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing::error;

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Ordered set of listeners, compared by pointer identity
pub struct ListenerSet<L: ?Sized> {
    listeners: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> Default for ListenerSet<L> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<L: ?Sized> ListenerSet<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; returns `false` if it was already registered
    pub fn add(&self, listener: Arc<L>) -> bool {
        let mut listeners = self.lock();
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Unregister a listener; returns `false` if it was not registered
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current registrations
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.lock().clone()
    }

    /// Call `f` for every listener, outside the registration lock
    ///
    /// Returns how many listeners panicked.
    pub fn notify<F>(&self, event: &'static str, f: F) -> usize
    where
        F: Fn(&L),
    {
        let mut failures = 0;
        for listener in self.snapshot() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| f(&listener))) {
                failures += 1;
                error!(
                    event,
                    panic = %panic_message(payload.as_ref()),
                    "Listener panicked, continuing with the remaining listeners"
                );
            }
        }
        failures
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<L>>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}
