//! # Retry Executor
//!
//! Runs an operation until it succeeds, fails fatally, or the policy's deadline
//! elapses. Retryable failures back off geometrically with jitter between attempts.
//!
//! Once the deadline has passed the executor makes exactly one more direct attempt
//! before giving up. A deadline that fires just as the remote side becomes ready
//! then still yields success instead of a spurious timeout.
//!
//! The operation may run more than once, so it must be safe to repeat: a read, or a
//! mutation whose remote effect is naturally idempotent.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::constants::defaults;
use crate::convergence::cancel::{CancellationSignal, Wake};
use crate::error::{ConvergeError, Result};

/// Bounds and backoff shape of one retry loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total time budget for retrying
    pub timeout: Duration,
    /// Delay after the first retryable failure
    pub initial_backoff: Duration,
    /// Ceiling for any single backoff delay (before jitter)
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Extra random delay, as a fraction of the capped delay (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl RetryPolicy {
    /// Policy with the given deadline and default backoff shape
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            initial_backoff: defaults::INITIAL_BACKOFF,
            max_backoff: defaults::MAX_BACKOFF,
            multiplier: defaults::BACKOFF_MULTIPLIER,
            jitter_factor: defaults::JITTER_FACTOR,
        }
    }

    pub fn with_backoff(mut self, initial_backoff: Duration, max_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Same shape, different deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_backoff.is_zero() {
            return Err(ConvergeError::invalid_spec(
                "initial_backoff must be greater than 0",
            ));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(ConvergeError::invalid_spec(
                "max_backoff must be at least initial_backoff",
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConvergeError::invalid_spec(
                "multiplier must be a finite value >= 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConvergeError::invalid_spec(
                "jitter_factor must be between 0.0 and 1.0",
            ));
        }
        Ok(())
    }

    /// Un-jittered delay after the `retry`-th retryable failure (0-based).
    ///
    /// Formula: min(initial_backoff * multiplier^retry, max_backoff)
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_backoff)
    }

    /// Add up to `jitter_factor` of `base` as random extra delay
    pub fn jittered(&self, base: Duration) -> Duration {
        if self.jitter_factor <= 0.0 || base.is_zero() {
            return base;
        }
        let jitter_range = base.as_secs_f64() * self.jitter_factor;
        let jitter = rand::thread_rng().gen_range(0.0..=jitter_range);
        base + Duration::try_from_secs_f64(jitter).unwrap_or(Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(defaults::READ_RETRY_TIMEOUT)
    }
}

/// Failure of one attempt, tagged with whether another attempt is worthwhile
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError {
    Retryable(ConvergeError),
    Fatal(ConvergeError),
}

impl RetryError {
    /// Tag by the error's own class: only remote transients are retryable
    pub fn classify(error: ConvergeError) -> Self {
        if error.is_retryable() {
            Self::Retryable(error)
        } else {
            Self::Fatal(error)
        }
    }

    pub fn into_inner(self) -> ConvergeError {
        match self {
            Self::Retryable(error) | Self::Fatal(error) => error,
        }
    }
}

impl From<ConvergeError> for RetryError {
    fn from(error: ConvergeError) -> Self {
        Self::classify(error)
    }
}

/// Retry loop bound to one operation on one resource
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    cancel: CancellationSignal,
    operation: String,
    resource_id: String,
}

impl RetryExecutor {
    pub fn new(
        policy: RetryPolicy,
        operation: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            policy,
            cancel: CancellationSignal::never(),
            operation: operation.into(),
            resource_id: resource_id.into(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until success, a fatal failure, or the deadline plus one final attempt
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, RetryError>>,
    {
        self.policy.validate()?;

        let start = Instant::now();
        let deadline = start + self.policy.timeout;
        let mut retries: u32 = 0;

        loop {
            match op().await {
                Ok(value) => {
                    debug!(
                        operation = %self.operation,
                        resource_id = %self.resource_id,
                        attempts = retries + 1,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Operation succeeded"
                    );
                    return Ok(value);
                }
                Err(RetryError::Fatal(error)) => {
                    debug!(
                        operation = %self.operation,
                        resource_id = %self.resource_id,
                        error = %error,
                        "Non-retryable failure"
                    );
                    return Err(error);
                }
                Err(RetryError::Retryable(error)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(
                            operation = %self.operation,
                            resource_id = %self.resource_id,
                            attempts = retries + 1,
                            last_error = %error,
                            "Retry deadline reached, making final attempt"
                        );
                        return self.final_attempt(&mut op, start).await;
                    }

                    let delay = self
                        .policy
                        .jittered(self.policy.backoff_for(retries))
                        .min(deadline - now);
                    retries = retries.saturating_add(1);

                    debug!(
                        operation = %self.operation,
                        resource_id = %self.resource_id,
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retryable failure, backing off"
                    );

                    if self.cancel.sleep(delay).await == Wake::Cancelled {
                        return Err(ConvergeError::cancelled(
                            self.operation.clone(),
                            start.elapsed(),
                        ));
                    }
                }
            }
        }
    }

    async fn final_attempt<T, F, Fut>(&self, op: &mut F, start: Instant) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, RetryError>>,
    {
        match op().await {
            Ok(value) => Ok(value),
            Err(RetryError::Fatal(error)) => Err(error),
            Err(RetryError::Retryable(error)) => Err(ConvergeError::Timeout {
                operation: self.operation.clone(),
                resource_id: self.resource_id.clone(),
                last_state: None,
                elapsed: start.elapsed(),
                last_error: Some(error.to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::cancel::CancellationSource;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(timeout: Duration) -> RetryPolicy {
        RetryPolicy::new(timeout)
            .with_backoff(Duration::from_millis(100), Duration::from_secs(1))
            .with_jitter(0.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let executor = RetryExecutor::new(fast_policy(Duration::from_secs(5)), "read", "r-1");
        let result = executor.run(|| async { Ok::<_, RetryError>(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fast_policy(Duration::from_secs(5)), "read", "r-1");

        let counter = calls.clone();
        let result: Result<()> = executor
            .run(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(RetryError::Fatal(ConvergeError::fatal("read", "denied")))
                }
            })
            .await;

        assert_eq!(result, Err(ConvergeError::fatal("read", "denied")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fast_policy(Duration::from_secs(5)), "read", "r-1");

        let counter = calls.clone();
        let result = executor
            .run(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(RetryError::Retryable(ConvergeError::retryable("read", "lag")))
                    } else {
                        Ok("ready")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("ready"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_retryable_times_out_after_final_attempt() {
        let attempts_after_deadline = Arc::new(AtomicU32::new(0));
        let timeout = Duration::from_secs(2);
        let start = Instant::now();
        let executor = RetryExecutor::new(fast_policy(timeout), "read", "r-1");

        let late = attempts_after_deadline.clone();
        let result: Result<()> = executor
            .run(|| {
                let late = late.clone();
                async move {
                    if start.elapsed() >= timeout {
                        late.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(RetryError::Retryable(ConvergeError::retryable("read", "lag")))
                }
            })
            .await;

        match result {
            Err(ConvergeError::Timeout { last_error, .. }) => {
                assert!(last_error.unwrap_or_default().contains("lag"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        // The attempt that discovers the deadline plus the final direct attempt
        assert_eq!(attempts_after_deadline.load(Ordering::SeqCst), 2);
        assert_eq!(start.elapsed(), timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_attempt_can_succeed() {
        let timeout = Duration::from_secs(1);
        let start = Instant::now();
        let late_calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fast_policy(timeout), "read", "r-1");

        let late = late_calls.clone();
        let result = executor
            .run(|| {
                let late = late.clone();
                async move {
                    if start.elapsed() < timeout {
                        return Err(RetryError::Retryable(ConvergeError::retryable("read", "lag")));
                    }
                    // The attempt that discovers the deadline still fails; the final one succeeds
                    if late.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(RetryError::Retryable(ConvergeError::retryable("read", "lag")))
                    } else {
                        Ok("ready")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("ready"));
        assert_eq!(late_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_backoff() {
        let source = CancellationSource::new();
        let executor = RetryExecutor::new(fast_policy(Duration::from_secs(600)), "read", "r-1")
            .with_cancellation(source.signal());
        source.cancel();

        let result: Result<()> = executor
            .run(|| async { Err(RetryError::Retryable(ConvergeError::retryable("read", "lag"))) })
            .await;

        assert!(result.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = fast_policy(Duration::from_secs(60));
        assert_eq!(policy.backoff_for(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(800));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::default().with_jitter(1.5).validate().is_err());
        assert!(RetryPolicy::default().with_multiplier(0.5).validate().is_err());
        assert!(RetryPolicy::default()
            .with_backoff(Duration::from_secs(2), Duration::from_secs(1))
            .validate()
            .is_err());
    }
}
