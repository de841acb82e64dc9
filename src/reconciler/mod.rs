//! # Lifecycle Reconciler
//!
//! Create, Read, Update and Delete for any [`ResourceDriver`], built from the
//! convergence primitives:
//!
//! ```text
//! create ─▶ mutate (retried if rejected) ─▶ await stable ─▶ apply update plan ─▶ fresh read
//! read   ─▶ observe (retried) ─▶ stable │ provisioning ─▶ await stable │ gone
//! update ─▶ field steps (fail-fast) + groups (fan-out) ─▶ read
//! delete ─▶ list dependents ─▶ primary delete (retried) ─▶ dependents (fan-out)
//!        ─▶ await destroyed ─▶ report partial failure, if any
//! ```
//!
//! Every operation runs against its own deadline. Exceeding it stops polling and
//! retrying but never undoes a committed remote effect: a resource that was created
//! but never stabilized is left in place for the caller to clean up.
//!
//! Operations on one resource identifier are expected to be serialized by the caller.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ConvergeConfig;
use crate::constants::{defaults, operations};
use crate::convergence::{
    CancellationSignal, Observation, PollOutcome, RetryError, RetryExecutor, StatePoller,
};
use crate::driver::{ErrorClass, FieldChange, ResourceDriver, UpdatePlan, UpdateStep};
use crate::error::{ConvergeError, Result};
use crate::logging::{log_error, log_lifecycle_operation};

/// Default deadlines for the three mutating operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleTimeouts {
    pub create: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for LifecycleTimeouts {
    fn default() -> Self {
        Self {
            create: defaults::CREATE_TIMEOUT,
            update: defaults::UPDATE_TIMEOUT,
            delete: defaults::DELETE_TIMEOUT,
        }
    }
}

/// A created resource that reached its stable state
#[derive(Debug, Clone, PartialEq)]
pub struct Created {
    pub resource_id: String,
    pub observation: Observation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Found(Observation),
    /// The resource no longer exists; callers should stop tracking it
    Gone,
}

impl ReadOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn observation(&self) -> Option<&Observation> {
        match self {
            Self::Found(observation) => Some(observation),
            Self::Gone => None,
        }
    }

    pub fn into_observation(self) -> Option<Observation> {
        match self {
            Self::Found(observation) => Some(observation),
            Self::Gone => None,
        }
    }
}

/// How a read treats absence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadMode {
    /// Right after creation: absence is read-after-write lag and is retried
    FreshlyCreated,
    /// Absence means the resource is gone
    Existing,
}

pub struct LifecycleReconciler<D: ResourceDriver> {
    driver: Arc<D>,
    config: ConvergeConfig,
    cancel: CancellationSignal,
}

impl<D: ResourceDriver> Clone for LifecycleReconciler<D> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
            config: self.config.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<D: ResourceDriver> std::fmt::Debug for LifecycleReconciler<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleReconciler")
            .field("kind", &self.driver.kind())
            .field("config", &self.config)
            .finish()
    }
}

impl<D: ResourceDriver> LifecycleReconciler<D> {
    pub fn new(driver: Arc<D>, config: ConvergeConfig) -> Self {
        Self {
            driver,
            config,
            cancel: CancellationSignal::never(),
        }
    }

    /// Abort waits and backoffs of every operation once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn config(&self) -> &ConvergeConfig {
        &self.config
    }

    /// Configured default deadlines, for callers without their own
    pub fn timeouts(&self) -> LifecycleTimeouts {
        self.config.lifecycle_timeouts()
    }

    /// Create the resource and wait until it is stable.
    ///
    /// A failure after the create call leaves the resource in place and is logged
    /// with its identifier, so the caller can clean it up.
    pub async fn create(&self, desired: &D::Desired, timeout: Duration) -> Result<Created> {
        let start = Instant::now();
        let deadline = start + timeout;
        let kind = self.driver.kind();
        log_lifecycle_operation(operations::CREATE, None, "started", None, Some(kind));

        let this = self;
        let mutate_window = self.config.retry.mutate_timeout().min(timeout);
        let resource_id = RetryExecutor::new(
            self.config.retry_policy(mutate_window),
            operations::MUTATE,
            kind,
        )
        .with_cancellation(self.cancel.clone())
        .run(move || async move {
            this.driver
                .mutate(desired)
                .await
                .map_err(|error| this.mutate_error(error))
        })
        .await
        .map_err(|error| self.failed(operations::CREATE, None, error, start))?;

        info!(resource_id = %resource_id, kind = %kind, "Creation issued, waiting for stable state");

        let id = resource_id.as_str();
        let states = self.driver.state_model();
        let budget = Self::remaining(operations::CREATE, id, start, deadline)
            .map_err(|error| self.failed(operations::CREATE, Some(id), error, start))?;
        let outcome = self
            .await_states(
                id,
                states.provisioning.clone(),
                BTreeSet::from([states.stable.clone()]),
                budget,
                Some(Instant::now() + self.config.retry.read_timeout()),
            )
            .await
            .map_err(|error| self.failed(operations::CREATE, Some(id), error, start))?;
        debug!(resource_id = %id, polls = outcome.polls, "Resource stabilized");

        let plan = self.driver.update_plan(id, desired);
        self.apply_plan(id, plan, deadline)
            .await
            .map_err(|error| self.failed(operations::CREATE, Some(id), error, start))?;

        match self
            .read_with(id, ReadMode::FreshlyCreated, Some(deadline))
            .await
            .map_err(|error| self.failed(operations::CREATE, Some(id), error, start))?
        {
            ReadOutcome::Found(observation) => {
                log_lifecycle_operation(
                    operations::CREATE,
                    Some(id),
                    "succeeded",
                    Some(elapsed_ms(start)),
                    Some(&observation.state),
                );
                Ok(Created {
                    resource_id,
                    observation,
                })
            }
            ReadOutcome::Gone => Err(self.failed(
                operations::CREATE,
                Some(id),
                ConvergeError::not_found(id),
                start,
            )),
        }
    }

    /// Observe the resource, absorbing transient errors within the read window.
    ///
    /// A resource still provisioning is awaited until stable with the configured
    /// create timeout.
    pub async fn read(&self, resource_id: &str) -> Result<ReadOutcome> {
        let start = Instant::now();
        let outcome = self
            .read_with(resource_id, ReadMode::Existing, None)
            .await
            .map_err(|error| self.failed(operations::READ, Some(resource_id), error, start))?;

        if outcome.is_found() {
            debug!(resource_id = %resource_id, "Resource read");
        } else {
            info!(resource_id = %resource_id, "Resource is gone");
        }
        Ok(outcome)
    }

    /// Apply the driver's update plan, then refresh the observation
    pub async fn update(
        &self,
        resource_id: &str,
        desired: &D::Desired,
        timeout: Duration,
    ) -> Result<Observation> {
        let start = Instant::now();
        let deadline = start + timeout;
        log_lifecycle_operation(operations::UPDATE, Some(resource_id), "started", None, None);

        let plan = self.driver.update_plan(resource_id, desired);
        self.apply_plan(resource_id, plan, deadline)
            .await
            .map_err(|error| self.failed(operations::UPDATE, Some(resource_id), error, start))?;

        match self
            .read_with(resource_id, ReadMode::Existing, Some(deadline))
            .await
            .map_err(|error| self.failed(operations::UPDATE, Some(resource_id), error, start))?
        {
            ReadOutcome::Found(observation) => {
                log_lifecycle_operation(
                    operations::UPDATE,
                    Some(resource_id),
                    "succeeded",
                    Some(elapsed_ms(start)),
                    Some(&observation.state),
                );
                Ok(observation)
            }
            ReadOutcome::Gone => Err(self.failed(
                operations::UPDATE,
                Some(resource_id),
                ConvergeError::not_found(resource_id),
                start,
            )),
        }
    }

    /// Delete the resource and its dependents, then wait until it is destroyed.
    ///
    /// The primary deletion is always issued before any dependent is touched.
    /// Dependents that fail to delete are reported once, in a
    /// [`ConvergeError::PartialFailure`], and never retried.
    pub async fn delete(&self, resource_id: &str, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        let deadline = start + timeout;
        log_lifecycle_operation(operations::DELETE, Some(resource_id), "started", None, None);

        let this = self;
        let discovery_window = self.config.retry.read_timeout().min(timeout);
        let dependents = RetryExecutor::new(
            self.config.retry_policy(discovery_window),
            operations::OBSERVE,
            resource_id,
        )
        .with_cancellation(self.cancel.clone())
        .run(move || async move {
            this.driver
                .dependents(resource_id)
                .await
                .map_err(|error| this.retry_error(operations::OBSERVE, error))
        })
        .await
        .map_err(|error| self.failed(operations::DELETE, Some(resource_id), error, start))?;

        let budget = Self::remaining(operations::DELETE, resource_id, start, deadline)
            .map_err(|error| self.failed(operations::DELETE, Some(resource_id), error, start))?;
        RetryExecutor::new(
            self.config.retry_policy(budget),
            operations::DELETE_PRIMARY,
            resource_id,
        )
        .with_cancellation(self.cancel.clone())
        .run(move || async move {
            this.driver
                .delete(resource_id)
                .await
                .map_err(|error| this.retry_error(operations::DELETE_PRIMARY, error))
        })
        .await
        .map_err(|error| self.failed(operations::DELETE, Some(resource_id), error, start))?;

        info!(
            resource_id = %resource_id,
            dependents = dependents.len(),
            "Primary deletion issued"
        );

        let fan_out = self
            .config
            .aggregator()
            .run_all(dependents, move |key| async move {
                this.driver
                    .delete_sub_resource(&key)
                    .await
                    .map_err(|error| this.remote_error(operations::DELETE_DEPENDENT, error))
            })
            .await;

        let states = self.driver.state_model();
        let waited = match Self::remaining(operations::DELETE, resource_id, start, deadline) {
            Ok(budget) => {
                self.await_states(
                    resource_id,
                    states.deleting.clone(),
                    states.destroyed_states(),
                    budget,
                    None,
                )
                .await
            }
            Err(error) => Err(error),
        };

        if let Err(error) = waited {
            if !fan_out.is_success() {
                warn!(
                    resource_id = %resource_id,
                    failures = ?fan_out.failures(),
                    "Dependent deletions failed before the destruction wait failed"
                );
            }
            return Err(self.failed(operations::DELETE, Some(resource_id), error, start));
        }

        match fan_out.into_result(resource_id, true) {
            Ok(()) => {
                log_lifecycle_operation(
                    operations::DELETE,
                    Some(resource_id),
                    "succeeded",
                    Some(elapsed_ms(start)),
                    None,
                );
                Ok(())
            }
            Err(error) => {
                log_error(
                    "reconciler",
                    operations::DELETE,
                    &error.to_string(),
                    Some(resource_id),
                );
                Err(error)
            }
        }
    }

    /// Observe and classify. With a `deadline`, both the read retries and any
    /// provisioning wait are clipped to it; without one the configured read
    /// window and create timeout apply.
    async fn read_with(
        &self,
        resource_id: &str,
        mode: ReadMode,
        deadline: Option<Instant>,
    ) -> Result<ReadOutcome> {
        let start = Instant::now();
        let this = self;
        let read_window = match deadline {
            Some(deadline) => self
                .config
                .retry
                .read_timeout()
                .min(Self::remaining(operations::READ, resource_id, start, deadline)?),
            None => self.config.retry.read_timeout(),
        };
        let observed = RetryExecutor::new(
            self.config.retry_policy(read_window),
            operations::READ,
            resource_id,
        )
        .with_cancellation(self.cancel.clone())
        .run(move || async move {
            match this.observe(resource_id).await {
                Ok(None) if mode == ReadMode::FreshlyCreated => {
                    Err(RetryError::Retryable(ConvergeError::not_found(resource_id)))
                }
                Ok(observed) => Ok(observed),
                Err(error) => Err(RetryError::classify(error)),
            }
        })
        .await?;

        let Some(observation) = observed else {
            return Ok(ReadOutcome::Gone);
        };

        let states = self.driver.state_model();
        if states.is_gone(&observation.state) {
            return Ok(ReadOutcome::Gone);
        }
        if states.is_stable(&observation.state) {
            return Ok(ReadOutcome::Found(observation));
        }
        if states.is_provisioning(&observation.state) {
            debug!(
                resource_id = %resource_id,
                state = %observation.state,
                "Resource still provisioning, waiting for stable state"
            );
            let wait_budget = match deadline {
                Some(deadline) => self
                    .config
                    .lifecycle_timeouts()
                    .create
                    .min(Self::remaining(operations::READ, resource_id, start, deadline)?),
                None => self.config.lifecycle_timeouts().create,
            };
            let waited = self
                .await_states(
                    resource_id,
                    states.provisioning.clone(),
                    BTreeSet::from([states.stable.clone()]),
                    wait_budget,
                    None,
                )
                .await;
            return match waited {
                Ok(outcome) => Ok(outcome
                    .observation
                    .map_or(ReadOutcome::Gone, ReadOutcome::Found)),
                Err(error) if error.is_not_found() => Ok(ReadOutcome::Gone),
                Err(error) => Err(error),
            };
        }

        Err(ConvergeError::unexpected_state(
            resource_id,
            observation.state,
            [states.stable.clone()],
        ))
    }

    /// Run an update plan: fields fail fast, groups fan out
    async fn apply_plan(&self, resource_id: &str, plan: UpdatePlan, deadline: Instant) -> Result<()> {
        for step in plan.into_steps() {
            match step {
                UpdateStep::Field(change) => {
                    self.mutate_field(resource_id, &change, deadline).await?;
                }
                UpdateStep::Group(changes) => {
                    let by_field: HashMap<String, FieldChange> = changes
                        .into_iter()
                        .map(|change| (change.field.clone(), change))
                        .collect();
                    let fields: Vec<String> = by_field.keys().cloned().collect();
                    let by_field = &by_field;

                    self.config
                        .aggregator()
                        .run_all(fields, move |field| async move {
                            match by_field.get(&field) {
                                Some(change) => self.mutate_field(resource_id, change, deadline).await,
                                None => Ok(()),
                            }
                        })
                        .await
                        .into_result(resource_id, false)?;
                }
            }
        }
        Ok(())
    }

    async fn mutate_field(
        &self,
        resource_id: &str,
        change: &FieldChange,
        deadline: Instant,
    ) -> Result<()> {
        let this = self;
        let window = deadline.saturating_duration_since(Instant::now());
        debug!(resource_id = %resource_id, field = %change.field, "Updating field");

        RetryExecutor::new(
            self.config.retry_policy(window),
            operations::UPDATE_FIELD,
            resource_id,
        )
        .with_cancellation(self.cancel.clone())
        .run(move || async move {
            this.driver
                .mutate_field(resource_id, change)
                .await
                .map_err(|error| this.retry_error(operations::UPDATE_FIELD, error))
        })
        .await
    }

    /// Poll until a target state. Before `visible_by`, absence counts as
    /// read-after-write lag rather than disappearance.
    async fn await_states(
        &self,
        resource_id: &str,
        pending: BTreeSet<String>,
        target: BTreeSet<String>,
        timeout: Duration,
        visible_by: Option<Instant>,
    ) -> Result<PollOutcome> {
        let this = self;
        let spec = self.config.poll_spec(resource_id, pending, target, timeout);

        StatePoller::new(spec)
            .with_cancellation(self.cancel.clone())
            .await_state(move || async move {
                match this.observe(resource_id).await {
                    Ok(None) if visible_by.is_some_and(|until| Instant::now() < until) => Err(
                        ConvergeError::retryable(operations::OBSERVE, "resource not visible yet"),
                    ),
                    other => other,
                }
            })
            .await
    }

    async fn observe(&self, resource_id: &str) -> Result<Option<Observation>> {
        self.driver
            .observe(resource_id)
            .await
            .map_err(|error| self.remote_error(operations::OBSERVE, error))
    }

    fn remote_error(&self, operation: &str, error: D::Error) -> ConvergeError {
        match self.driver.classify_error(&error) {
            ErrorClass::Retryable => ConvergeError::retryable(operation, error.to_string()),
            ErrorClass::Fatal => ConvergeError::fatal(operation, error.to_string()),
        }
    }

    /// Only rejected-without-effect create failures are retried
    fn mutate_error(&self, error: D::Error) -> RetryError {
        match self.driver.classify_mutate_error(&error) {
            ErrorClass::Retryable => {
                RetryError::Retryable(ConvergeError::retryable(operations::MUTATE, error.to_string()))
            }
            ErrorClass::Fatal => {
                RetryError::Fatal(ConvergeError::fatal(operations::MUTATE, error.to_string()))
            }
        }
    }

    fn retry_error(&self, operation: &str, error: D::Error) -> RetryError {
        RetryError::classify(self.remote_error(operation, error))
    }

    /// Time left before `deadline`, or a timeout once it has passed
    fn remaining(
        operation: &str,
        resource_id: &str,
        start: Instant,
        deadline: Instant,
    ) -> Result<Duration> {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(ConvergeError::Timeout {
                operation: operation.to_string(),
                resource_id: resource_id.to_string(),
                last_state: None,
                elapsed: start.elapsed(),
                last_error: None,
            });
        }
        Ok(left)
    }

    fn failed(
        &self,
        operation: &str,
        resource_id: Option<&str>,
        error: ConvergeError,
        start: Instant,
    ) -> ConvergeError {
        let error = match resource_id {
            Some(id) => error.with_operation(operation).with_resource(id),
            None => error.with_operation(operation),
        };
        log_lifecycle_operation(
            operation,
            resource_id,
            "failed",
            Some(elapsed_ms(start)),
            Some(&error.to_string()),
        );
        error
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ImageSpec, MemoryDriver, MemoryRemote, RemoteError, RemoteOperation};

    fn reconciler(remote: &MemoryRemote) -> LifecycleReconciler<MemoryDriver> {
        LifecycleReconciler::new(
            Arc::new(MemoryDriver::new(remote.clone())),
            ConvergeConfig::for_testing(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_existing_missing_resource_is_gone() {
        let remote = MemoryRemote::new();

        let outcome = reconciler(&remote).read("ami-missing").await.unwrap();

        assert_eq!(outcome, ReadOutcome::Gone);
        assert_eq!(remote.call_count(RemoteOperation::Describe), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_gone_state_is_gone() {
        let remote = MemoryRemote::new();
        remote.insert_image("ami-1", "deregistered", Vec::<String>::new());

        let outcome = reconciler(&remote).read("ami-1").await.unwrap();
        assert_eq!(outcome, ReadOutcome::Gone);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_waits_for_provisioning_resource() {
        let remote = MemoryRemote::new();
        remote.insert_image("ami-1", "pending", Vec::<String>::new());
        remote.script_states("ami-1", ["pending", "pending", "available"]);

        let outcome = reconciler(&remote).read("ami-1").await.unwrap();

        assert_eq!(outcome.observation().map(|o| o.state.as_str()), Some("available"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_unexpected_state_is_fatal() {
        let remote = MemoryRemote::new();
        remote.insert_image("ami-1", "failed", Vec::<String>::new());

        let err = reconciler(&remote).read("ami-1").await.unwrap_err();

        assert!(matches!(err, ConvergeError::UnexpectedState { ref state, .. } if state == "failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_absorbs_throttling() {
        let remote = MemoryRemote::new();
        remote.insert_image("ami-1", "available", Vec::<String>::new());
        remote.fail_times(
            RemoteOperation::Describe,
            RemoteError::new("RequestLimitExceeded", "slow down"),
            2,
        );

        let outcome = reconciler(&remote).read("ami-1").await.unwrap();

        assert!(outcome.is_found());
        assert_eq!(remote.call_count(RemoteOperation::Describe), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_retries_throttled_mutation() {
        let remote = MemoryRemote::new();
        remote.fail_next(
            RemoteOperation::Register,
            RemoteError::new("Throttling", "rate exceeded"),
        );

        let created = reconciler(&remote)
            .create(&ImageSpec::new("web"), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(created.observation.state, "available");
        assert_eq!(remote.call_count(RemoteOperation::Register), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_fatal_mutation_is_not_retried() {
        let remote = MemoryRemote::new();
        remote.fail_next(
            RemoteOperation::Register,
            RemoteError::new("InvalidParameterValue", "bad name"),
        );

        let err = reconciler(&remote)
            .create(&ImageSpec::new("web"), Duration::from_secs(60))
            .await
            .unwrap_err();

        assert_eq!(err, ConvergeError::fatal("create", "InvalidParameterValue: bad name"));
        assert_eq!(remote.call_count(RemoteOperation::Register), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_applies_update_plan() {
        let remote = MemoryRemote::new();
        let spec = ImageSpec::new("web")
            .with_tag("env", "prod")
            .with_description("web tier");

        let created = reconciler(&remote)
            .create(&spec, Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(created.observation.attributes["description"], "web tier");
        assert_eq!(created.observation.attributes["tags"]["env"], "prod");
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_field_failure_is_surfaced() {
        let remote = MemoryRemote::new();
        remote.insert_image("ami-1", "available", Vec::<String>::new());
        remote.fail_next(
            RemoteOperation::Modify,
            RemoteError::new("UnauthorizedOperation", "denied"),
        );

        let spec = ImageSpec::new("web").with_description("web tier");
        let err = reconciler(&remote)
            .update("ami-1", &spec, Duration::from_secs(60))
            .await
            .unwrap_err();

        assert!(matches!(err, ConvergeError::FatalRemote { ref operation, .. } if operation == "update"));
        assert_eq!(remote.call_count(RemoteOperation::Modify), 1);
        assert_eq!(remote.call_count(RemoteOperation::Describe), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_group_failure_aborts_later_steps() {
        let remote = MemoryRemote::new();
        remote.insert_image("ami-1", "available", Vec::<String>::new());
        remote.fail_next(
            RemoteOperation::Modify,
            RemoteError::new("UnauthorizedOperation", "denied"),
        );

        // Tags run as a group before the description field
        let spec = ImageSpec::new("web")
            .with_tag("env", "prod")
            .with_description("web tier");
        let err = reconciler(&remote)
            .update("ami-1", &spec, Duration::from_secs(60))
            .await
            .unwrap_err();

        match err {
            ConvergeError::PartialFailure {
                failures,
                primary_deleted,
                ..
            } => {
                assert!(!primary_deleted);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].key, "tags.env");
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
        assert_eq!(remote.call_count(RemoteOperation::Modify), 1);
        assert!(remote.attributes("ami-1").unwrap().get("description").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_of_vanished_resource_is_not_found() {
        let remote = MemoryRemote::new();

        let err = reconciler(&remote)
            .update("ami-missing", &ImageSpec::new("web"), Duration::from_secs(60))
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }
}
