//! # State Poller
//!
//! Samples an observable until its state lands in a target set, leaves the declared
//! pending/target sets, or the deadline passes. "Wait until available" and "wait until
//! destroyed" are the same state machine with different [`PollSpec`]s.
//!
//! ## Per-poll outcomes
//!
//! ```text
//! observe() ──▶ not found ──▶ absence is a target?  yes ─▶ Converged(ABSENT_STATE)
//!     │                                            no  ─▶ NotFound (fatal)
//!     ├──────▶ state ∈ target  ─▶ Converged(state)
//!     ├──────▶ state ∈ pending ─▶ sleep, poll again
//!     └──────▶ anything else   ─▶ UnexpectedState (fatal, never retried)
//! ```
//!
//! ## Cadence
//!
//! The first poll happens after `delay`. Later intervals start at `min_interval` and
//! double up to `max_interval`. Growth also stops once the interval would exceed a
//! quarter of the time left, so polling keeps a steady pace near the deadline.
//! Intervals never decrease. Each sleep is clipped to the time left, which puts the
//! last observation exactly at the deadline instead of past it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::constants::{defaults, operations, ABSENT_STATE};
use crate::convergence::cancel::{CancellationSignal, Wake};
use crate::error::{ConvergeError, Result};

/// An interval stops growing once it would exceed `remaining / REMAINING_TIME_DIVISOR`
const REMAINING_TIME_DIVISOR: u32 = 4;

/// One sample of a remote resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Provider-assigned identifier
    pub resource_id: String,
    /// Current state label, e.g. `pending` or `available`
    pub state: String,
    /// Resource-specific fields as reported by the driver
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl Observation {
    pub fn new(resource_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            state: state.into(),
            attributes: serde_json::Value::Null,
        }
    }

    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Parameters of one convergence wait
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSpec {
    /// Identifier of the observable, used in diagnostics
    pub subject: String,
    /// States expected before success
    pub pending: BTreeSet<String>,
    /// States that end the wait successfully
    pub target: BTreeSet<String>,
    /// Total time budget
    pub timeout: Duration,
    /// Wait before the first observation
    pub delay: Duration,
    /// Floor of the inter-poll interval
    pub min_interval: Duration,
    /// Ceiling of the inter-poll interval
    pub max_interval: Duration,
    /// Consecutive target observations required before success
    pub continuous_target_occurrence: u32,
}

impl PollSpec {
    pub fn new<P, T, S>(subject: impl Into<String>, pending: P, target: T, timeout: Duration) -> Self
    where
        P: IntoIterator<Item = S>,
        T: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subject: subject.into(),
            pending: pending.into_iter().map(Into::into).collect(),
            target: target.into_iter().map(Into::into).collect(),
            timeout,
            delay: defaults::POLL_DELAY,
            min_interval: defaults::MIN_POLL_INTERVAL,
            max_interval: defaults::MAX_POLL_INTERVAL,
            continuous_target_occurrence: defaults::CONTINUOUS_TARGET_OCCURRENCE,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_intervals(mut self, min_interval: Duration, max_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self.max_interval = max_interval;
        self
    }

    pub fn with_continuous_target_occurrence(mut self, occurrences: u32) -> Self {
        self.continuous_target_occurrence = occurrences;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.target.is_empty() {
            return Err(ConvergeError::invalid_spec("target state set must not be empty"));
        }
        if self.timeout <= self.delay {
            return Err(ConvergeError::invalid_spec(format!(
                "timeout ({:?}) must exceed delay ({:?})",
                self.timeout, self.delay
            )));
        }
        if self.min_interval.is_zero() {
            return Err(ConvergeError::invalid_spec(
                "min_interval must be greater than 0",
            ));
        }
        if self.max_interval < self.min_interval {
            return Err(ConvergeError::invalid_spec(
                "max_interval must be at least min_interval",
            ));
        }
        if self.continuous_target_occurrence == 0 {
            return Err(ConvergeError::invalid_spec(
                "continuous_target_occurrence must be at least 1",
            ));
        }
        Ok(())
    }

    /// Whether disappearance of the observable counts as success
    pub fn accepts_absence(&self) -> bool {
        self.target.contains(ABSENT_STATE)
    }

    /// Interval following `previous` with `remaining` time left: double it within
    /// [min_interval, max_interval], unless that overshoots a fraction of `remaining`
    pub fn next_interval(&self, previous: Option<Duration>, remaining: Duration) -> Duration {
        let grown = previous
            .map(|interval| interval.saturating_mul(2))
            .unwrap_or(self.min_interval)
            .clamp(self.min_interval, self.max_interval);

        let ceiling = remaining / REMAINING_TIME_DIVISOR;
        if grown <= ceiling {
            return grown;
        }
        previous
            .unwrap_or(self.min_interval)
            .max(ceiling)
            .clamp(self.min_interval, self.max_interval)
    }

    fn expected_states(&self) -> Vec<String> {
        self.pending.union(&self.target).cloned().collect()
    }
}

/// Successful end of a wait
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    /// Target state reached, or [`ABSENT_STATE`] when the observable disappeared
    pub state: String,
    /// Last observation, absent when the observable disappeared
    pub observation: Option<Observation>,
    /// Number of calls made to `observe`
    pub polls: u32,
    pub elapsed: Duration,
}

/// Runs [`PollSpec`] waits, aborting when the cancellation signal fires
#[derive(Debug, Clone)]
pub struct StatePoller {
    spec: PollSpec,
    cancel: CancellationSignal,
}

impl StatePoller {
    pub fn new(spec: PollSpec) -> Self {
        Self {
            spec,
            cancel: CancellationSignal::never(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn spec(&self) -> &PollSpec {
        &self.spec
    }

    /// Poll `observe` until a target state is reached.
    ///
    /// `observe` yields `Ok(None)` when the observable does not exist. Retryable
    /// observation errors count as a poll without new information; any other error
    /// ends the wait.
    pub async fn await_state<F, Fut>(&self, mut observe: F) -> Result<PollOutcome>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<Observation>>>,
    {
        let spec = &self.spec;
        spec.validate()?;

        let start = Instant::now();
        let deadline = start + spec.timeout;

        debug!(
            resource_id = %spec.subject,
            pending = ?spec.pending,
            target = ?spec.target,
            timeout_ms = spec.timeout.as_millis() as u64,
            "Waiting for state"
        );

        if !spec.delay.is_zero() && self.cancel.sleep(spec.delay).await == Wake::Cancelled {
            return Err(ConvergeError::cancelled(operations::AWAIT_STATE, start.elapsed()));
        }

        let mut polls: u32 = 0;
        let mut target_streak: u32 = 0;
        let mut interval: Option<Duration> = None;
        let mut last_state: Option<String> = None;
        let mut last_observation: Option<Observation> = None;

        loop {
            polls = polls.saturating_add(1);

            match observe().await {
                Err(error) if error.is_retryable() => {
                    target_streak = 0;
                    debug!(
                        resource_id = %spec.subject,
                        poll = polls,
                        error = %error,
                        "Transient observation failure, polling again"
                    );
                }
                Err(error) => return Err(error),
                Ok(None) => {
                    if !spec.accepts_absence() {
                        warn!(resource_id = %spec.subject, poll = polls, "Observable disappeared");
                        return Err(ConvergeError::not_found(spec.subject.clone()));
                    }
                    last_state = Some(ABSENT_STATE.to_string());
                    last_observation = None;
                    target_streak = target_streak.saturating_add(1);
                }
                Ok(Some(observation)) => {
                    let state = observation.state.clone();
                    debug!(resource_id = %spec.subject, poll = polls, state = %state, "Observed state");

                    if spec.target.contains(&state) {
                        target_streak = target_streak.saturating_add(1);
                    } else if spec.pending.contains(&state) {
                        target_streak = 0;
                    } else {
                        warn!(
                            resource_id = %spec.subject,
                            state = %state,
                            "Observable entered a state outside pending and target"
                        );
                        return Err(ConvergeError::unexpected_state(
                            spec.subject.clone(),
                            state,
                            spec.expected_states(),
                        ));
                    }

                    last_state = Some(state);
                    last_observation = Some(observation);
                }
            }

            if target_streak >= spec.continuous_target_occurrence {
                let state = last_state.unwrap_or_else(|| ABSENT_STATE.to_string());
                info!(
                    resource_id = %spec.subject,
                    state = %state,
                    polls = polls,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "State converged"
                );
                return Ok(PollOutcome {
                    state,
                    observation: last_observation,
                    polls,
                    elapsed: start.elapsed(),
                });
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    resource_id = %spec.subject,
                    last_state = ?last_state,
                    polls = polls,
                    "Timed out waiting for state"
                );
                return Err(ConvergeError::Timeout {
                    operation: operations::AWAIT_STATE.to_string(),
                    resource_id: spec.subject.clone(),
                    last_state,
                    elapsed: start.elapsed(),
                    last_error: None,
                });
            }

            let next = spec.next_interval(interval, deadline - now);
            interval = Some(next);

            if self.cancel.sleep(next.min(deadline - now)).await == Wake::Cancelled {
                return Err(ConvergeError::cancelled(operations::AWAIT_STATE, start.elapsed()));
            }
        }
    }
}
