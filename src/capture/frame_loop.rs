// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for background loops
//!
//! Every periodic worker in the crate (frame pump, discovery scan, render
//! scheduler, motion detector) runs on a [`LoopController`]. Cancellation is
//! cooperative: the stop signal is checked at iteration boundaries and wakes
//! any [`StopSignal::wait`] in progress, but an iteration that is blocked in a
//! backend call finishes first.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Action returned by the loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Run the next iteration immediately
    Continue,
    /// Sleep, waking early if stop is requested, then run the next iteration
    Wait(Duration),
    /// Leave the loop
    Stop,
}

/// Stop flag that a sleeping loop can be woken from
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake every waiter
    pub fn request(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner()) = true;
        cvar.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep for `timeout` unless stop is requested first
    ///
    /// Returns `true` when the wait ended because of a stop request.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut stopped = lock.lock().unwrap_or_else(|e| e.into_inner());
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            stopped = match cvar.wait_timeout(stopped, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

/// Controller for a loop running in a separate thread
///
/// # Example
///
/// ```ignore
/// let controller = LoopController::start("frame-pump", move |stop| {
///     match fetch_frame() {
///         Ok(frame) => publish(frame),
///         Err(e) => warn!("Capture error: {}", e), // keep trying
///     }
///     LoopAction::Wait(Duration::from_millis(20))
/// });
///
/// controller.stop();
/// ```
pub struct LoopController {
    /// `None` once joined or detached
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: StopSignal,
    /// Name for logging
    name: String,
}

impl LoopController {
    /// Start a new loop in a named thread
    ///
    /// The closure is called repeatedly until it returns [`LoopAction::Stop`]
    /// or the controller is stopped. It receives the stop signal so that long
    /// iterations can wait on it themselves.
    pub fn start<F>(name: &str, mut loop_fn: F) -> Self
    where
        F: FnMut(&StopSignal) -> LoopAction + Send + 'static,
    {
        let stop_signal = StopSignal::new();
        let signal = stop_signal.clone();
        let thread_name = name.to_string();

        info!(name = %name, "Starting loop");

        let spawned = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(name = %thread_name, "Loop thread started");

                loop {
                    if signal.is_requested() {
                        debug!(name = %thread_name, "Stop signal received");
                        break;
                    }

                    match loop_fn(&signal) {
                        LoopAction::Continue => {}
                        LoopAction::Wait(delay) => {
                            if signal.wait(delay) {
                                debug!(name = %thread_name, "Stop signal received while waiting");
                                break;
                            }
                        }
                        LoopAction::Stop => {
                            debug!(name = %thread_name, "Loop requested stop");
                            break;
                        }
                    }
                }

                info!(name = %thread_name, "Loop thread exiting");
            });

        let thread_handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(name = %name, error = %e, "Failed to spawn loop thread");
                None
            }
        };

        Self {
            thread_handle,
            stop_signal,
            name: name.to_string(),
        }
    }

    /// False once the thread exited or was detached
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    fn request_stop(&self) {
        debug!(name = %self.name, "Requesting loop stop");
        self.stop_signal.request();
    }

    /// Request a stop and block until the thread is gone
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Stop the loop and wait at most `timeout` for the thread to finish
    ///
    /// Returns `true` when the thread has terminated. On timeout the thread is
    /// detached; it still exits at its next iteration boundary.
    pub fn stop_timeout(&mut self, timeout: Duration) -> bool {
        self.request_stop();

        let on_loop_thread = match self.thread_handle.as_ref() {
            Some(handle) => handle.thread().id() == thread::current().id(),
            None => return true,
        };

        if on_loop_thread {
            // Called from inside the loop itself, it exits after this iteration
            self.thread_handle = None;
            return true;
        }

        let deadline = Instant::now() + timeout;
        while !self.thread_handle.as_ref().is_none_or(|h| h.is_finished()) {
            if Instant::now() >= deadline {
                warn!(name = %self.name, timeout_ms = timeout.as_millis() as u64, "Loop did not stop in time, detaching");
                self.thread_handle = None;
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }

        self.join();
        true
    }

    /// Block until a loop that returned [`LoopAction::Stop`] has exited
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            debug!(name = %self.name, "Waiting for loop thread to finish");
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Loop thread panicked: {:?}", e);
            } else {
                debug!(name = %self.name, "Loop thread finished");
            }
        }
    }
}

impl Drop for LoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "LoopController dropped, stopping loop");
            self.stop();
        }
    }
}
