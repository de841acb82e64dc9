//! Property-based tests for backoff, jitter and poll cadence.

mod common;

use common::strategies::{interval_bounds_strategy, retry_policy_strategy};
use common::{fast_spec, ScriptedObservable};
use proptest::prelude::*;
use std::time::Duration;

use converge_core::{PollSpec, StatePoller};

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    /// Backoff never exceeds its cap and never shrinks
    #[test]
    fn test_backoff_is_capped_and_non_decreasing(policy in retry_policy_strategy()) {
        let mut previous = Duration::ZERO;
        for retry in 0..40u32 {
            let backoff = policy.backoff_for(retry);
            prop_assert!(backoff <= policy.max_backoff);
            prop_assert!(backoff >= previous);
            previous = backoff;
        }
    }

    /// Jitter only ever adds, by at most the configured fraction
    #[test]
    fn test_jitter_stays_within_factor(
        policy in retry_policy_strategy(),
        base_ms in 1u64..60_000,
    ) {
        let base = Duration::from_millis(base_ms);
        let jittered = policy.jittered(base);
        let ceiling = base.as_secs_f64() * (1.0 + policy.jitter_factor);

        prop_assert!(jittered >= base);
        prop_assert!(jittered.as_secs_f64() <= ceiling + 1e-6);
    }

    /// Poll intervals stay within bounds and never decrease as the deadline nears
    #[test]
    fn test_poll_interval_bounded_and_non_decreasing(
        (min_interval, max_interval) in interval_bounds_strategy(),
        timeout_secs in 1u64..7_200,
    ) {
        let timeout = Duration::from_secs(timeout_secs);
        let spec = PollSpec::new("r-1", ["pending"], ["available"], timeout)
            .with_intervals(min_interval, max_interval);

        let mut interval = None;
        let mut previous = Duration::ZERO;
        let mut elapsed = Duration::ZERO;
        for _ in 0..64 {
            let remaining = timeout.saturating_sub(elapsed);
            let next = spec.next_interval(interval, remaining);
            prop_assert!(next >= min_interval);
            prop_assert!(next <= max_interval);
            prop_assert!(next >= previous);
            prop_assert!(next <= (remaining / 4).max(previous).max(min_interval));
            previous = next;
            interval = Some(next);
            elapsed += next.min(remaining);
        }
    }

    /// A resource reaching its target after n pending observations is observed n + 1 times
    #[test]
    fn test_poller_observation_count(pending_polls in 0usize..12) {
        let observable = ScriptedObservable::pending_then("r-1", pending_polls, "pending", "available");
        let observed = &observable;

        let outcome = paused_runtime().block_on(async move {
            StatePoller::new(fast_spec(&["pending"], &["available"], Duration::from_secs(3600)))
                .await_state(move || observed.observe())
                .await
        });

        let outcome = outcome.unwrap();
        prop_assert_eq!(outcome.state.as_str(), "available");
        prop_assert_eq!(observable.calls() as usize, pending_polls + 1);
    }
}
