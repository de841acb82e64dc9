use proptest::prelude::*;
use std::time::Duration;

use converge_core::RetryPolicy;

/// Backoff shapes that pass `RetryPolicy::validate`
pub fn retry_policy_strategy() -> impl Strategy<Value = RetryPolicy> {
    (1u64..5_000, 1u64..20, 1.0f64..4.0, 0.0f64..=1.0).prop_map(
        |(initial_ms, cap_factor, multiplier, jitter)| {
            let initial = Duration::from_millis(initial_ms);
            RetryPolicy::new(Duration::from_secs(60))
                .with_backoff(initial, initial * cap_factor as u32)
                .with_multiplier(multiplier)
                .with_jitter(jitter)
        },
    )
}

/// (min_interval, max_interval) pairs with min <= max
pub fn interval_bounds_strategy() -> impl Strategy<Value = (Duration, Duration)> {
    (1u64..10_000, 0u64..60_000).prop_map(|(min_ms, extra_ms)| {
        (
            Duration::from_millis(min_ms),
            Duration::from_millis(min_ms + extra_ms),
        )
    })
}
