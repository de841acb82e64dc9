//! # Convergence Configuration
//!
//! Timings for polling, retrying and lifecycle deadlines, loaded from YAML with
//! per-environment overrides. Nothing in the engine reads these values implicitly:
//! the reconciler receives a [`ConvergeConfig`] and converts it into the
//! [`PollSpec`] and [`RetryPolicy`] each call runs with, so tests can use short
//! deadlines without touching process-wide state.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use converge_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration (environment auto-detected)
//! let manager = ConfigManager::load()?;
//!
//! let timeouts = manager.config().lifecycle_timeouts();
//! let policy = manager.config().read_retry_policy();
//! # let _ = (timeouts, policy);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::defaults;
use crate::convergence::{PartialFailureAggregator, PollSpec, RetryPolicy};
use crate::reconciler::LifecycleTimeouts;

/// Root configuration structure mirroring converge-config.yaml
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConvergeConfig {
    /// Detected environment; always overwritten by the loader
    pub environment: String,

    /// Poll cadence shared by every convergence wait
    pub poll: PollConfig,

    /// Backoff shape and retry windows
    pub retry: RetryConfig,

    /// Default per-operation deadlines
    pub timeouts: TimeoutsConfig,

    /// Dependent sub-resource fan-out
    pub fan_out: FanOutConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PollConfig {
    pub delay_ms: u64,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub continuous_target_occurrence: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
    /// How long a freshly created resource may stay invisible to reads
    pub read_timeout_seconds: u64,
    /// Upper bound for retrying a single mutating call
    pub mutate_timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub create_seconds: u64,
    pub update_seconds: u64,
    pub delete_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FanOutConfig {
    /// Concurrent dependent deletions; 0 runs all of them at once
    pub max_concurrency: usize,
}

impl Default for ConvergeConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            poll: PollConfig::default(),
            retry: RetryConfig::default(),
            timeouts: TimeoutsConfig::default(),
            fan_out: FanOutConfig::default(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            delay_ms: duration_ms(defaults::POLL_DELAY),
            min_interval_ms: duration_ms(defaults::MIN_POLL_INTERVAL),
            max_interval_ms: duration_ms(defaults::MAX_POLL_INTERVAL),
            continuous_target_occurrence: defaults::CONTINUOUS_TARGET_OCCURRENCE,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: duration_ms(defaults::INITIAL_BACKOFF),
            max_backoff_ms: duration_ms(defaults::MAX_BACKOFF),
            backoff_multiplier: defaults::BACKOFF_MULTIPLIER,
            jitter_factor: defaults::JITTER_FACTOR,
            read_timeout_seconds: defaults::READ_RETRY_TIMEOUT.as_secs(),
            mutate_timeout_seconds: defaults::MUTATE_RETRY_TIMEOUT.as_secs(),
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            create_seconds: defaults::CREATE_TIMEOUT.as_secs(),
            update_seconds: defaults::UPDATE_TIMEOUT.as_secs(),
            delete_seconds: defaults::DELETE_TIMEOUT.as_secs(),
        }
    }
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            max_concurrency: defaults::FAN_OUT_CONCURRENCY,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl PollConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

impl RetryConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }

    pub fn mutate_timeout(&self) -> Duration {
        Duration::from_secs(self.mutate_timeout_seconds)
    }
}

impl ConvergeConfig {
    /// Validate configuration for consistency and required values
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let poll = &self.poll;
        if poll.min_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "poll.min_interval_ms",
                "0",
                "min_interval_ms must be greater than 0",
            ));
        }
        if poll.max_interval_ms < poll.min_interval_ms {
            return Err(ConfigurationError::invalid_value(
                "poll.max_interval_ms",
                poll.max_interval_ms.to_string(),
                format!(
                    "max_interval_ms must be at least min_interval_ms ({})",
                    poll.min_interval_ms
                ),
            ));
        }
        if poll.continuous_target_occurrence == 0 {
            return Err(ConfigurationError::invalid_value(
                "poll.continuous_target_occurrence",
                "0",
                "at least one target observation is required",
            ));
        }

        let retry = &self.retry;
        if retry.initial_backoff_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.initial_backoff_ms",
                "0",
                "initial_backoff_ms must be greater than 0",
            ));
        }
        if retry.max_backoff_ms < retry.initial_backoff_ms {
            return Err(ConfigurationError::invalid_value(
                "retry.max_backoff_ms",
                retry.max_backoff_ms.to_string(),
                "max_backoff_ms must be at least initial_backoff_ms",
            ));
        }
        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "retry.backoff_multiplier",
                retry.backoff_multiplier.to_string(),
                "backoff_multiplier must be a finite value >= 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&retry.jitter_factor) {
            return Err(ConfigurationError::invalid_value(
                "retry.jitter_factor",
                retry.jitter_factor.to_string(),
                "jitter_factor must be between 0.0 and 1.0",
            ));
        }
        for (field, seconds) in [
            ("retry.read_timeout_seconds", retry.read_timeout_seconds),
            ("retry.mutate_timeout_seconds", retry.mutate_timeout_seconds),
        ] {
            if seconds == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    "0",
                    "retry windows must be greater than 0",
                ));
            }
        }

        for (field, seconds) in [
            ("timeouts.create_seconds", self.timeouts.create_seconds),
            ("timeouts.update_seconds", self.timeouts.update_seconds),
            ("timeouts.delete_seconds", self.timeouts.delete_seconds),
        ] {
            if Duration::from_secs(seconds) <= poll.delay() {
                return Err(ConfigurationError::invalid_value(
                    field,
                    seconds.to_string(),
                    format!("operation timeouts must exceed poll.delay_ms ({})", poll.delay_ms),
                ));
            }
        }

        Ok(())
    }

    /// Check if running in test environment
    pub fn is_test_environment(&self) -> bool {
        self.environment == "test"
    }

    /// Wait specification using the configured cadence.
    ///
    /// The initial delay is shortened when the remaining budget cannot cover it,
    /// so a nearly exhausted deadline still gets one observation.
    pub fn poll_spec<P, T, S>(
        &self,
        subject: impl Into<String>,
        pending: P,
        target: T,
        timeout: Duration,
    ) -> PollSpec
    where
        P: IntoIterator<Item = S>,
        T: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let delay = if self.poll.delay() < timeout {
            self.poll.delay()
        } else {
            timeout / 2
        };

        PollSpec::new(subject, pending, target, timeout)
            .with_delay(delay)
            .with_intervals(self.poll.min_interval(), self.poll.max_interval())
            .with_continuous_target_occurrence(self.poll.continuous_target_occurrence)
    }

    /// Retry policy with the configured backoff shape and the given window
    pub fn retry_policy(&self, timeout: Duration) -> RetryPolicy {
        RetryPolicy::new(timeout)
            .with_backoff(
                Duration::from_millis(self.retry.initial_backoff_ms),
                Duration::from_millis(self.retry.max_backoff_ms),
            )
            .with_multiplier(self.retry.backoff_multiplier)
            .with_jitter(self.retry.jitter_factor)
    }

    pub fn read_retry_policy(&self) -> RetryPolicy {
        self.retry_policy(self.retry.read_timeout())
    }

    pub fn mutate_retry_policy(&self) -> RetryPolicy {
        self.retry_policy(self.retry.mutate_timeout())
    }

    pub fn lifecycle_timeouts(&self) -> LifecycleTimeouts {
        LifecycleTimeouts {
            create: Duration::from_secs(self.timeouts.create_seconds),
            update: Duration::from_secs(self.timeouts.update_seconds),
            delete: Duration::from_secs(self.timeouts.delete_seconds),
        }
    }

    pub fn aggregator(&self) -> PartialFailureAggregator {
        PartialFailureAggregator::new(self.fan_out.max_concurrency)
    }

    /// Compact settings for tests: no initial delay, one-second polls, no jitter
    pub fn for_testing() -> Self {
        Self {
            environment: "test".to_string(),
            poll: PollConfig {
                delay_ms: 0,
                min_interval_ms: 1_000,
                max_interval_ms: 10_000,
                continuous_target_occurrence: 1,
            },
            retry: RetryConfig {
                initial_backoff_ms: 500,
                max_backoff_ms: 5_000,
                backoff_multiplier: 2.0,
                jitter_factor: 0.0,
                read_timeout_seconds: 10,
                mutate_timeout_seconds: 20,
            },
            timeouts: TimeoutsConfig {
                create_seconds: 60,
                update_seconds: 60,
                delete_seconds: 120,
            },
            fan_out: FanOutConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_image_lifecycle_timings() {
        let config = ConvergeConfig::default();
        assert!(config.validate().is_ok());

        let timeouts = config.lifecycle_timeouts();
        assert_eq!(timeouts.create, Duration::from_secs(40 * 60));
        assert_eq!(timeouts.update, Duration::from_secs(40 * 60));
        assert_eq!(timeouts.delete, Duration::from_secs(90 * 60));

        assert_eq!(config.poll.delay(), Duration::from_secs(5));
        assert_eq!(config.poll.min_interval(), Duration::from_secs(3));
        assert_eq!(config.read_retry_policy().timeout, Duration::from_secs(60));
        assert_eq!(config.mutate_retry_policy().timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_config_validation_errors() {
        let mut config = ConvergeConfig::default();
        config.poll.min_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "poll.min_interval_ms"
        ));

        let mut config = ConvergeConfig::default();
        config.retry.jitter_factor = 1.5;
        assert!(config.validate().is_err());

        let mut config = ConvergeConfig::default();
        config.timeouts.delete_seconds = 5;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "timeouts.delete_seconds"
        ));
    }

    #[test]
    fn test_poll_spec_uses_configured_cadence() {
        let config = ConvergeConfig::for_testing();
        let spec = config.poll_spec("ami-1", ["pending"], ["available"], Duration::from_secs(30));

        assert!(spec.validate().is_ok());
        assert_eq!(spec.delay, Duration::ZERO);
        assert_eq!(spec.min_interval, Duration::from_secs(1));
        assert!(spec.target.contains("available"));
    }

    #[test]
    fn test_poll_spec_shrinks_delay_for_short_budget() {
        let config = ConvergeConfig::default();
        let spec = config.poll_spec("ami-1", ["pending"], ["available"], Duration::from_secs(4));

        assert_eq!(spec.delay, Duration::from_secs(2));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_retry_policy_carries_backoff_shape() {
        let config = ConvergeConfig::for_testing();
        let policy = config.retry_policy(Duration::from_secs(7));

        assert_eq!(policy.timeout, Duration::from_secs(7));
        assert_eq!(policy.initial_backoff, Duration::from_millis(500));
        assert_eq!(policy.jitter_factor, 0.0);
        assert!(policy.validate().is_ok());
    }
}
