// SPDX-License-Identifier: GPL-3.0-only

//! Render scheduler
//!
//! Drives the refresh of a display surface bound to one webcam. The cadence
//! is independent from the frame pump: the scheduler reads the latest
//! published frame when its own timer fires.
//!
//! # State machine
//!
//! ```text
//!            start()               webcam open
//!  STOPPED ──────────► STARTING ──────────────► RUNNING ◄──► PAUSED
//!     ▲                   │                        │   pause/resume
//!     └───────────────────┴────────────────────────┘
//!                          stop()
//! ```
//!
//! While STARTING the scheduler polls the webcam every 500 ms and shows the
//! "initializing" placeholder. Failures never end the loop; they raise the
//! errored flag and the surface gets the "device error" placeholder until a
//! frame can be fetched again.

use crate::backends::CameraFrame;
use crate::capture::{LoopAction, LoopController};
use crate::config::RenderConfig;
use crate::constants::render::{
    DEFAULT_FPS, FREE_RUN_GAP, FREE_RUN_INITIAL_DELAY, MAX_FPS, MIN_FPS, STARTING_POLL_INTERVAL,
    STOP_TIMEOUT,
};
use crate::errors::{WebcamError, WebcamResult};
use crate::session::Webcam;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle state of a [`RenderScheduler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RenderState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Paused = 3,
}

impl RenderState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RenderState::Starting,
            2 => RenderState::Running,
            3 => RenderState::Paused,
            _ => RenderState::Stopped,
        }
    }
}

/// What to draw when there is no frame to show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// Waiting for the webcam to open
    Initializing,
    /// Open, but no frame has been produced
    NoImage,
    /// The last fetch failed
    DeviceError,
}

impl Placeholder {
    /// Caption a surface may print on the placeholder
    pub fn caption(&self) -> &'static str {
        match self {
            Placeholder::Initializing => "Initializing Device",
            Placeholder::NoImage => "No Image",
            Placeholder::DeviceError => "Device Error",
        }
    }
}

/// Content of one refresh
#[derive(Debug, Clone)]
pub enum RenderContent {
    Frame(Arc<CameraFrame>),
    Placeholder(Placeholder),
}

/// Extra values handed to the surface on every refresh
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RenderInfo {
    /// Webcam frame rate, only when FPS display is enabled
    pub fps: Option<f64>,
}

/// A display surface
///
/// Called from the scheduler thread, never after [`RenderScheduler::stop`]
/// has returned.
pub trait RenderSurface: Send + Sync {
    fn render(&self, content: &RenderContent, info: &RenderInfo);
}

impl<F> RenderSurface for F
where
    F: Fn(&RenderContent, &RenderInfo) + Send + Sync,
{
    fn render(&self, content: &RenderContent, info: &RenderInfo) {
        self(content, info)
    }
}

/// Clamp a requested render rate into the supported range
///
/// NaN is rejected; infinities clamp to the bounds.
pub fn clamp_fps(fps: f64) -> WebcamResult<f64> {
    if fps.is_nan() {
        return Err(WebcamError::Configuration("render FPS cannot be NaN".into()));
    }
    Ok(fps.clamp(MIN_FPS, MAX_FPS))
}

/// State shared with the scheduler thread
struct Shared {
    state: AtomicU8,
    fps: AtomicU64,
    fps_limited: AtomicBool,
    manage_webcam: AtomicBool,
    show_fps: AtomicBool,
    errored: AtomicBool,
    /// Held for the duration of every surface call
    gate: Mutex<()>,
    renders: AtomicU64,
}

/// One `start()`..`stop()` span
///
/// A loop thread detached by a timed-out stop keeps its own run, so it can
/// neither render nor change state once a later `start()` is under way.
#[derive(Default)]
struct Run {
    /// Cleared by `stop()` before it waits for the gate
    alive: AtomicBool,
    thread: Mutex<Option<ThreadId>>,
}

impl Run {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl Shared {
    fn state(&self) -> RenderState {
        RenderState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: RenderState, to: RenderState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn fps(&self) -> f64 {
        f64::from_bits(self.fps.load(Ordering::Relaxed))
    }

    fn period(&self) -> Duration {
        if self.fps_limited.load(Ordering::Relaxed) {
            Duration::from_secs_f64(1.0 / self.fps())
        } else {
            FREE_RUN_GAP
        }
    }
}

/// Drives a [`RenderSurface`] from a [`Webcam`]
pub struct RenderScheduler {
    webcam: Arc<Webcam>,
    surface: Arc<dyn RenderSurface>,
    shared: Arc<Shared>,
    run: Mutex<Option<Arc<Run>>>,
    controller: Mutex<Option<LoopController>>,
    stop_timeout: Mutex<Duration>,
}

impl RenderScheduler {
    /// Free-running scheduler (5 FPS once limited) that opens and closes the webcam itself
    pub fn new(webcam: Arc<Webcam>, surface: Arc<dyn RenderSurface>) -> Self {
        Self {
            webcam,
            surface,
            shared: Arc::new(Shared {
                state: AtomicU8::new(RenderState::Stopped as u8),
                fps: AtomicU64::new(DEFAULT_FPS.to_bits()),
                fps_limited: AtomicBool::new(false),
                manage_webcam: AtomicBool::new(true),
                show_fps: AtomicBool::new(false),
                errored: AtomicBool::new(false),
                gate: Mutex::new(()),
                renders: AtomicU64::new(0),
            }),
            run: Mutex::new(None),
            controller: Mutex::new(None),
            stop_timeout: Mutex::new(STOP_TIMEOUT),
        }
    }

    pub fn with_config(
        webcam: Arc<Webcam>,
        surface: Arc<dyn RenderSurface>,
        config: &RenderConfig,
    ) -> WebcamResult<Self> {
        let scheduler = Self::new(webcam, surface);
        scheduler.set_fps(config.fps)?;
        scheduler.set_fps_limited(config.fps_limited);
        scheduler.set_manage_webcam(config.manage_webcam);
        Ok(scheduler)
    }

    pub fn webcam(&self) -> &Arc<Webcam> {
        &self.webcam
    }

    pub fn state(&self) -> RenderState {
        self.shared.state()
    }

    /// True unless stopped
    pub fn is_started(&self) -> bool {
        self.state() != RenderState::Stopped
    }

    pub fn is_errored(&self) -> bool {
        self.shared.errored.load(Ordering::SeqCst)
    }

    /// Number of surface calls made so far
    pub fn render_count(&self) -> u64 {
        self.shared.renders.load(Ordering::SeqCst)
    }

    // ===== Settings =====

    pub fn fps(&self) -> f64 {
        self.shared.fps()
    }

    /// Set the render rate, clamped to 0.016..=50; returns the applied value
    pub fn set_fps(&self, fps: f64) -> WebcamResult<f64> {
        let clamped = clamp_fps(fps)?;
        if clamped != fps {
            debug!(requested = fps, applied = clamped, "Render FPS clamped");
        }
        self.shared.fps.store(clamped.to_bits(), Ordering::Relaxed);
        Ok(clamped)
    }

    pub fn is_fps_limited(&self) -> bool {
        self.shared.fps_limited.load(Ordering::Relaxed)
    }

    /// False switches to free-running refresh
    pub fn set_fps_limited(&self, limited: bool) {
        self.shared.fps_limited.store(limited, Ordering::Relaxed);
    }

    /// Current delay between two refreshes
    pub fn period(&self) -> Duration {
        self.shared.period()
    }

    pub fn set_manage_webcam(&self, manage: bool) {
        self.shared.manage_webcam.store(manage, Ordering::SeqCst);
    }

    /// How long `stop()` waits for the scheduler thread before detaching it
    pub fn set_stop_timeout(&self, timeout: Duration) {
        *lock(&self.stop_timeout) = timeout;
    }

    /// Pass the webcam frame rate to the surface
    pub fn set_show_fps(&self, show: bool) {
        self.shared.show_fps.store(show, Ordering::Relaxed);
    }

    // ===== Lifecycle =====

    /// Start refreshing; returns `false` if already started
    pub fn start(&self) -> bool {
        if !self.shared.transition(RenderState::Stopped, RenderState::Starting) {
            return false;
        }
        info!(webcam = %self.webcam.name(), "Starting render scheduler");
        self.shared.errored.store(false, Ordering::SeqCst);

        let webcam = Arc::clone(&self.webcam);
        let surface = Arc::clone(&self.surface);
        let shared = Arc::clone(&self.shared);
        let run = Arc::new(Run::default());
        run.alive.store(true, Ordering::SeqCst);
        *lock(&self.run) = Some(Arc::clone(&run));

        let controller = LoopController::start(
            &format!("render-{}", self.webcam.name()),
            move |_| cycle(&webcam, surface.as_ref(), &shared, &run),
        );
        *lock(&self.controller) = Some(controller);
        true
    }

    /// Stop refreshing; returns `false` if already stopped
    ///
    /// Waits up to five seconds (see [`RenderScheduler::set_stop_timeout`])
    /// for the scheduler thread. Once this returns
    /// the surface is not called again until the next [`RenderScheduler::start`].
    pub fn stop(&self) -> bool {
        let previous = self.shared.state.swap(RenderState::Stopped as u8, Ordering::SeqCst);
        if RenderState::from_u8(previous) == RenderState::Stopped {
            return false;
        }
        info!(webcam = %self.webcam.name(), "Stopping render scheduler");

        let run = lock(&self.run).take();
        if let Some(run) = &run {
            run.alive.store(false, Ordering::SeqCst);
        }
        let on_loop_thread = run
            .as_ref()
            .is_some_and(|run| *lock(&run.thread) == Some(thread::current().id()));
        if !on_loop_thread {
            // Wait out a refresh in progress
            drop(lock(&self.shared.gate));
        }

        let timeout = *lock(&self.stop_timeout);
        let controller = lock(&self.controller).take();
        if let Some(mut controller) = controller
            && !controller.stop_timeout(timeout)
        {
            warn!(webcam = %self.webcam.name(), "Render scheduler did not stop in time");
        }

        if self.shared.manage_webcam.load(Ordering::SeqCst)
            && let Err(e) = self.webcam.close()
        {
            warn!(webcam = %self.webcam.name(), error = %e, "Cannot close webcam");
        }
        true
    }

    /// Suspend refreshing; returns `false` unless running
    pub fn pause(&self) -> bool {
        let paused = self.shared.transition(RenderState::Running, RenderState::Paused);
        if paused {
            debug!(webcam = %self.webcam.name(), "Render scheduler paused");
        }
        paused
    }

    /// Resume after [`RenderScheduler::pause`]; returns `false` unless paused
    pub fn resume(&self) -> bool {
        let resumed = self.shared.transition(RenderState::Paused, RenderState::Running);
        if resumed {
            debug!(webcam = %self.webcam.name(), "Render scheduler resumed");
        }
        resumed
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One scheduler iteration
fn cycle(webcam: &Webcam, surface: &dyn RenderSurface, shared: &Shared, run: &Run) -> LoopAction {
    if !run.is_alive() {
        return LoopAction::Stop;
    }
    {
        let mut loop_thread = lock(&run.thread);
        if loop_thread.is_none() {
            *loop_thread = Some(thread::current().id());
        }
    }

    match shared.state() {
        RenderState::Stopped => LoopAction::Stop,
        RenderState::Starting => {
            if shared.manage_webcam.load(Ordering::SeqCst)
                && !webcam.is_open()
                && let Err(e) = webcam.open()
            {
                if !shared.errored.swap(true, Ordering::SeqCst) {
                    warn!(webcam = %webcam.name(), error = %e, "Cannot open webcam");
                }
            }
            if !run.is_alive() {
                return LoopAction::Stop;
            }

            if webcam.is_open() {
                shared.errored.store(false, Ordering::SeqCst);
                if shared.transition(RenderState::Starting, RenderState::Running) {
                    debug!(webcam = %webcam.name(), "Webcam open, rendering");
                }
                if shared.fps_limited.load(Ordering::Relaxed) {
                    LoopAction::Continue
                } else {
                    LoopAction::Wait(FREE_RUN_INITIAL_DELAY)
                }
            } else {
                let placeholder = if shared.errored.load(Ordering::SeqCst) {
                    Placeholder::DeviceError
                } else {
                    Placeholder::Initializing
                };
                deliver(surface, shared, run, &RenderContent::Placeholder(placeholder), None);
                LoopAction::Wait(STARTING_POLL_INTERVAL)
            }
        }
        RenderState::Paused => LoopAction::Wait(shared.period().min(STARTING_POLL_INTERVAL)),
        RenderState::Running => {
            let content = if !webcam.is_open() {
                RenderContent::Placeholder(Placeholder::NoImage)
            } else {
                match webcam.image() {
                    Ok(frame) => {
                        if shared.errored.swap(false, Ordering::SeqCst) {
                            info!(webcam = %webcam.name(), "Frames available again");
                        }
                        RenderContent::Frame(frame)
                    }
                    Err(e) => {
                        if !shared.errored.swap(true, Ordering::SeqCst) {
                            warn!(webcam = %webcam.name(), error = %e, "Cannot fetch frame to render");
                        }
                        RenderContent::Placeholder(Placeholder::DeviceError)
                    }
                }
            };
            let fps = shared
                .show_fps
                .load(Ordering::Relaxed)
                .then(|| webcam.fps());
            deliver(surface, shared, run, &content, fps);
            LoopAction::Wait(shared.period())
        }
    }
}

/// Call the surface unless a stop is under way
fn deliver(
    surface: &dyn RenderSurface,
    shared: &Shared,
    run: &Run,
    content: &RenderContent,
    fps: Option<f64>,
) {
    let _gate = lock(&shared.gate);
    if !run.is_alive() {
        return;
    }
    surface.render(content, &RenderInfo { fps });
    shared.renders.fetch_add(1, Ordering::SeqCst);
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
