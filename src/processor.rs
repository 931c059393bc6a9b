// SPDX-License-Identifier: GPL-3.0-only

//! Call serializer for backends that cannot take concurrent calls
//!
//! Every operation against a device is wrapped in a [`Task`]. Tasks of a
//! thread-safe driver run directly on the calling thread. Tasks of a driver
//! that is not thread-safe are handed to a single worker thread through a
//! zero-capacity (rendezvous) channel, so at most one such call is in flight
//! at any time no matter how many sessions or threads issue them. The caller
//! blocks until the worker reports back, and a failure captured by the worker
//! is returned on the caller's thread.
//!
//! The worker starts lazily on the first serialized task and lives until
//! [`CallSerializer::shutdown`].

use crate::backends::{BackendError, BackendResult};
use crate::constants::processor::{HANDOFF_TIMEOUT, WORKER_THREAD_NAME};
use crate::errors::{WebcamError, WebcamResult};
use crate::listeners::panic_message;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

thread_local! {
    /// Serializer owning the current worker thread, 0 elsewhere
    static ON_WORKER: Cell<usize> = const { Cell::new(0) };
}

type Job = Box<dyn FnOnce() + Send>;

type Handler<T> = Box<dyn FnOnce() -> BackendResult<T> + Send>;

/// One operation against a device or driver
///
/// The thread-safety flag is captured when the task is created, so a task
/// keeps its routing even if the driver's answer changes later.
pub struct Task<T> {
    operation: &'static str,
    thread_safe: bool,
    handler: Handler<T>,
}

impl<T: Send + 'static> Task<T> {
    pub fn new<F>(operation: &'static str, thread_safe: bool, handler: F) -> Self
    where
        F: FnOnce() -> BackendResult<T> + Send + 'static,
    {
        Self {
            operation,
            thread_safe,
            handler: Box::new(handler),
        }
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }

    /// Run the handler, turning both errors and panics into a captured failure
    fn execute(self) -> WebcamResult<T> {
        let operation = self.operation;
        match panic::catch_unwind(AssertUnwindSafe(self.handler)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(WebcamError::CallFailed { operation, source }),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(operation, panic = %message, "Task handler panicked");
                Err(WebcamError::CallFailed {
                    operation,
                    source: BackendError::Crashed(message),
                })
            }
        }
    }
}

enum WorkerState {
    /// No serialized task has been processed yet
    Idle,
    Running {
        sender: Sender<Job>,
        handle: JoinHandle<()>,
    },
    Shutdown,
}

struct SerializerInner {
    state: Mutex<WorkerState>,
    handoff_timeout: Duration,
}

/// Serializes calls against non-thread-safe drivers
///
/// Cheap to clone; all clones share the same worker.
#[derive(Clone)]
pub struct CallSerializer {
    inner: Arc<SerializerInner>,
}

impl Default for CallSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl CallSerializer {
    pub fn new() -> Self {
        Self::with_handoff_timeout(HANDOFF_TIMEOUT)
    }

    /// Create a serializer that gives up on a handoff after `timeout`
    pub fn with_handoff_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(SerializerInner {
                state: Mutex::new(WorkerState::Idle),
                handoff_timeout: timeout,
            }),
        }
    }

    pub fn handoff_timeout(&self) -> Duration {
        self.inner.handoff_timeout
    }

    /// Process one task
    ///
    /// Thread-safe tasks, and tasks issued from inside a task of this same
    /// serializer, run inline. Everything else goes to the worker, including
    /// tasks issued from another serializer's worker.
    pub fn process<T: Send + 'static>(&self, task: Task<T>) -> WebcamResult<T> {
        if task.thread_safe || ON_WORKER.get() == self.key() {
            return task.execute();
        }

        let operation = task.operation;
        let sender = self.sender()?;
        let (reply_tx, reply_rx) = crossbeam_channel::bounded::<WebcamResult<T>>(1);

        let job: Job = Box::new(move || {
            let result = task.execute();
            // The caller may have gone away; nothing left to report to
            let _ = reply_tx.send(result);
        });

        let started = Instant::now();
        match sender.send_timeout(job, self.inner.handoff_timeout) {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                let waited = started.elapsed();
                warn!(
                    operation,
                    waited_ms = waited.as_millis() as u64,
                    "Processor did not accept task, worker presumed stuck, task dropped"
                );
                return Err(WebcamError::HandoffTimeout { operation, waited });
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                return Err(WebcamError::ProcessorShutdown);
            }
        }
        drop(sender);

        reply_rx.recv().map_err(|_| {
            error!(operation, "Processor worker exited before completing task");
            WebcamError::ProcessorShutdown
        })?
    }

    /// Convenience wrapper creating the task in place
    pub fn run<T, F>(&self, operation: &'static str, thread_safe: bool, handler: F) -> WebcamResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> BackendResult<T> + Send + 'static,
    {
        self.process(Task::new(operation, thread_safe, handler))
    }

    /// True once the worker thread has been created
    pub fn is_started(&self) -> bool {
        matches!(*self.lock_state(), WorkerState::Running { .. })
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(*self.lock_state(), WorkerState::Shutdown)
    }

    /// Stop the worker
    ///
    /// The worker finishes the task it is running, if any. Serialized tasks
    /// submitted afterwards fail with [`WebcamError::ProcessorShutdown`];
    /// thread-safe tasks keep running inline.
    pub fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), WorkerState::Shutdown);

        let WorkerState::Running { sender, handle } = previous else {
            return;
        };

        debug!("Shutting down webcam processor");
        drop(sender);

        if handle.thread().id() == thread::current().id() {
            return;
        }

        let deadline = Instant::now() + self.inner.handoff_timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("Processor worker still busy after shutdown, detaching");
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        if handle.join().is_err() {
            warn!("Processor worker panicked");
        }
        debug!("All tasks have been terminated");
    }

    /// Identity shared by all clones
    fn key(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, WorkerState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sender of the running worker, starting it on first use
    fn sender(&self) -> WebcamResult<Sender<Job>> {
        let mut state = self.lock_state();
        match &*state {
            WorkerState::Running { sender, .. } => return Ok(sender.clone()),
            WorkerState::Shutdown => return Err(WebcamError::ProcessorShutdown),
            WorkerState::Idle => {}
        }

        let (sender, receiver) = crossbeam_channel::bounded::<Job>(0);
        let owner = self.key();
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || worker_loop(owner, receiver))
            .map_err(|e| WebcamError::CallFailed {
                operation: "start processor",
                source: BackendError::Other(e.to_string()),
            })?;

        info!("Webcam processor started");
        *state = WorkerState::Running {
            sender: sender.clone(),
            handle,
        };
        Ok(sender)
    }
}

fn worker_loop(owner: usize, receiver: Receiver<Job>) {
    ON_WORKER.set(owner);
    for job in receiver.iter() {
        job();
    }
    debug!("Webcam processor worker exiting");
}
