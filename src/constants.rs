//! # Engine Constants
//!
//! Default timings and sentinel labels. Defaults only seed [`crate::config::ConvergeConfig`];
//! the engine itself reads timings from the values passed into each call.

use std::time::Duration;

/// State reported by the poller when the observable has disappeared and
/// disappearance is one of the targets
pub const ABSENT_STATE: &str = "destroyed";

/// Closing line of every partial-failure report
pub const MANUAL_REMEDIATION_NOTICE: &str =
    "These are no longer managed by the reconciler and must be removed manually.";

/// Operation labels used in errors and structured logs
pub mod operations {
    pub const CREATE: &str = "create";
    pub const READ: &str = "read";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
    pub const MUTATE: &str = "mutate";
    pub const OBSERVE: &str = "observe";
    pub const DELETE_PRIMARY: &str = "delete_primary";
    pub const DELETE_DEPENDENT: &str = "delete_dependent";
    pub const UPDATE_FIELD: &str = "update_field";
    pub const AWAIT_STATE: &str = "await_state";
}

/// Default timings, matching the long-running image lifecycle they were tuned for
pub mod defaults {
    use super::Duration;

    pub const CREATE_TIMEOUT: Duration = Duration::from_secs(40 * 60);
    pub const UPDATE_TIMEOUT: Duration = Duration::from_secs(40 * 60);
    pub const DELETE_TIMEOUT: Duration = Duration::from_secs(90 * 60);

    pub const POLL_DELAY: Duration = Duration::from_secs(5);
    pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(3);
    pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(10);
    pub const CONTINUOUS_TARGET_OCCURRENCE: u32 = 1;

    pub const READ_RETRY_TIMEOUT: Duration = Duration::from_secs(60);
    pub const MUTATE_RETRY_TIMEOUT: Duration = Duration::from_secs(2 * 60);
    pub const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
    pub const MAX_BACKOFF: Duration = Duration::from_secs(10);
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const JITTER_FACTOR: f64 = 0.1;

    /// Zero means every dependent is deleted concurrently
    pub const FAN_OUT_CONCURRENCY: usize = 0;
}
