// SPDX-License-Identifier: GPL-3.0-only

//! Library-wide constants
//!
//! Timing values are grouped by the component that owns them so that the
//! configuration defaults and the components agree on a single source.

use std::time::Duration;

/// Call serializer timing
pub mod processor {
    use super::Duration;

    /// How long a caller waits for the serializer worker to accept a task
    /// before the task is dropped and the worker is presumed stuck
    pub const HANDOFF_TIMEOUT: Duration = Duration::from_secs(5);

    /// Thread name of the serializer worker
    pub const WORKER_THREAD_NAME: &str = "atomic-processor";
}

/// Discovery service timing
pub mod discovery {
    use super::Duration;

    /// Scan interval used by drivers that do not specify their own
    pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(3000);

    /// Default wait budget for the very first enumeration
    pub const DEFAULT_INITIAL_TIMEOUT: Duration = Duration::from_secs(30);

    /// Capacity of the async discovery event channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 64;
}

/// Frame pump timing
pub mod pump {
    use super::Duration;

    /// Ceiling on frame reads per second
    pub const TARGET_FPS: f64 = 50.0;

    /// Weight of the previous estimate in the smoothed FPS value
    pub const FPS_SMOOTHING_WEIGHT: f64 = 4.0;

    /// Target period derived from [`TARGET_FPS`]
    pub fn target_period(target_fps: f64) -> Duration {
        Duration::from_secs_f64(1.0 / target_fps)
    }
}

/// Render scheduler timing
pub mod render {
    use super::Duration;

    /// Lowest accepted render rate (one frame per minute)
    pub const MIN_FPS: f64 = 0.016;

    /// Highest accepted render rate
    pub const MAX_FPS: f64 = 50.0;

    /// Default render rate when limited
    pub const DEFAULT_FPS: f64 = 5.0;

    /// Poll period while waiting for the webcam to open
    pub const STARTING_POLL_INTERVAL: Duration = Duration::from_millis(500);

    /// Gap between cycles in free-running mode
    pub const FREE_RUN_GAP: Duration = Duration::from_millis(1);

    /// Delay before the first free-running cycle
    pub const FREE_RUN_INITIAL_DELAY: Duration = Duration::from_millis(100);

    /// Bound on how long `stop()` waits for the scheduler thread
    pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Motion detector defaults
pub mod motion {
    use super::Duration;

    /// Default interval between detection ticks
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

    /// Smallest accepted detection interval
    pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

    /// Default per-pixel intensity threshold (0-255)
    pub const DEFAULT_PIXEL_THRESHOLD: u8 = 25;

    /// Default lower bound of the motion area, in percent
    pub const DEFAULT_AREA_THRESHOLD: f64 = 0.2;

    /// Default upper bound of the motion area, in percent
    pub const DEFAULT_AREA_THRESHOLD_MAX: f64 = 100.0;

    /// Default maximum number of sampled motion points
    pub const DEFAULT_MAX_POINTS: usize = 100;

    /// Default minimum distance between two sampled motion points
    pub const DEFAULT_POINT_RANGE: u32 = 50;

    /// Gaussian sigma of the default blur transform
    pub const DEFAULT_BLUR_SIGMA: f32 = 3.0;
}

/// Session timing
pub mod session {
    use super::Duration;

    /// Bound on how long closing a session waits for its frame pump to stop
    pub const PUMP_STOP_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Configuration file location
pub mod config_file {
    /// Directory name under the platform config dir
    pub const APP_DIR: &str = "webcam-hub";

    /// File name of the JSON configuration
    pub const FILE_NAME: &str = "config.json";
}
