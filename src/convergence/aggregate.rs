//! # Partial-Failure Aggregator
//!
//! Runs one sub-operation per item, never short-circuiting, and records every
//! outcome. Sub-operations target independent remote sub-resources, so they run
//! concurrently up to a configurable limit.
//!
//! A failed fan-out turns into one [`ConvergeError::PartialFailure`] naming each failed
//! key and its cause. Those items are not retried: once reported they are considered
//! orphaned and outside the reconciler's management.

use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use tracing::{debug, error, info};

use crate::error::{ConvergeError, Result, SubOperationFailure};

/// Outcome of every sub-operation, keyed by sub-resource
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregateResult {
    outcomes: BTreeMap<String, Result<()>>,
}

impl AggregateResult {
    /// True iff every sub-operation succeeded (vacuously true when empty)
    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(|outcome| outcome.is_ok())
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcome(&self, key: &str) -> Option<&Result<()>> {
        self.outcomes.get(key)
    }

    pub fn outcomes(&self) -> &BTreeMap<String, Result<()>> {
        &self.outcomes
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_ok())
            .map(|(key, _)| key.as_str())
    }

    pub fn failures(&self) -> Vec<SubOperationFailure> {
        self.outcomes
            .iter()
            .filter_map(|(key, outcome)| {
                outcome.as_ref().err().map(|error| SubOperationFailure {
                    key: key.clone(),
                    error: error.to_string(),
                })
            })
            .collect()
    }

    /// Collapse into a single result for the owning resource
    pub fn into_result(self, resource_id: &str, primary_deleted: bool) -> Result<()> {
        if self.is_success() {
            return Ok(());
        }
        Err(ConvergeError::PartialFailure {
            resource_id: resource_id.to_string(),
            failures: self.failures(),
            primary_deleted,
        })
    }
}

/// Fan-out runner with bounded concurrency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialFailureAggregator {
    max_concurrency: usize,
}

impl PartialFailureAggregator {
    /// `max_concurrency` of 0 runs every item at once
    pub fn new(max_concurrency: usize) -> Self {
        Self { max_concurrency }
    }

    /// One item at a time
    pub fn sequential() -> Self {
        Self::new(1)
    }

    /// Attempt `op` exactly once per distinct key and record every outcome
    pub async fn run_all<I, F, Fut>(&self, items: I, op: F) -> AggregateResult
    where
        I: IntoIterator<Item = String>,
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let keys: BTreeSet<String> = items.into_iter().collect();
        if keys.is_empty() {
            return AggregateResult::default();
        }

        let limit = match self.max_concurrency {
            0 => keys.len(),
            limit => limit,
        };
        let total = keys.len();
        debug!(items = total, concurrency = limit, "Running fan-out sub-operations");

        let outcomes: BTreeMap<String, Result<()>> = stream::iter(keys.into_iter().map(|key| {
            let pending = op(key.clone());
            async move { (key, pending.await) }
        }))
        .buffer_unordered(limit)
        .collect()
        .await;

        let result = AggregateResult { outcomes };
        for failure in result.failures() {
            error!(key = %failure.key, error = %failure.error, "Sub-operation failed");
        }
        info!(
            items = total,
            failed = total - result.succeeded().count(),
            "Fan-out complete"
        );
        result
    }
}

impl Default for PartialFailureAggregator {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn keys(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    #[tokio::test]
    async fn test_every_item_attempted_despite_failure() {
        let attempted = Arc::new(Mutex::new(Vec::new()));
        let seen = attempted.clone();

        let result = PartialFailureAggregator::sequential()
            .run_all(keys(&["A", "B", "C"]), move |key| {
                let seen = seen.clone();
                async move {
                    seen.lock().push(key.clone());
                    if key == "B" {
                        Err(ConvergeError::fatal("delete_dependent", "access denied"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(*attempted.lock(), keys(&["A", "B", "C"]));
        assert!(!result.is_success());
        assert_eq!(result.outcome("A"), Some(&Ok(())));
        assert_eq!(result.outcome("C"), Some(&Ok(())));
        assert_eq!(
            result.outcome("B"),
            Some(&Err(ConvergeError::fatal("delete_dependent", "access denied")))
        );
    }

    #[tokio::test]
    async fn test_combined_error_lists_only_failures() {
        let result = PartialFailureAggregator::default()
            .run_all(keys(&["snap-1", "snap-2"]), |key| async move {
                if key == "snap-2" {
                    Err(ConvergeError::fatal("delete_dependent", "in use"))
                } else {
                    Ok(())
                }
            })
            .await;

        let err = result.into_result("ami-1", true).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("snap-2"));
        assert!(message.contains("in use"));
        assert!(!message.contains("snap-1"));
        assert!(message.contains("removed manually"));
    }

    #[tokio::test]
    async fn test_duplicate_keys_attempted_once() {
        let count = Arc::new(Mutex::new(0u32));
        let counter = count.clone();

        let result = PartialFailureAggregator::default()
            .run_all(keys(&["snap-1", "snap-1"]), move |_| {
                let counter = counter.clone();
                async move {
                    *counter.lock() += 1;
                    Ok(())
                }
            })
            .await;

        assert_eq!(*count.lock(), 1);
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_fan_out_succeeds() {
        let result = PartialFailureAggregator::default()
            .run_all(Vec::new(), |_| async { Ok(()) })
            .await;

        assert!(result.is_empty());
        assert!(result.into_result("ami-1", true).is_ok());
    }
}
