//! # Resource Drivers
//!
//! The resource-specific half of the engine. A driver knows how to issue mutations
//! for one kind of remote resource, how to observe it, and which of its errors are
//! worth retrying. Everything else (polling, retrying, fan-out, deadlines) lives in
//! [`crate::reconciler`] and [`crate::convergence`] and is shared by every driver.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐  mutate / observe / delete   ┌─────────────────┐
//! │ LifecycleReconciler  │─────────────────────────────▶│ ResourceDriver  │──▶ remote API
//! │ (generic over D)     │◀─────────────────────────────│ (one per kind)  │
//! └──────────────────────┘  Observation / D::Error      └─────────────────┘
//!            │                                                   │
//!            └────────── classify_error(&D::Error) ──────────────┘
//!                        Retryable | Fatal
//! ```
//!
//! Drivers are stateless between calls: all durable state is in the remote system.

pub mod classifier;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::constants::ABSENT_STATE;
use crate::convergence::Observation;

pub use classifier::{ClassificationRule, RuleClassifier};
pub use memory::{ImageSpec, MemoryDriver, MemoryRemote, RemoteCall, RemoteOperation};

/// Error reported by a control-plane API: a machine-readable code plus a message
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct RemoteError {
    pub code: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Whether a failed driver call is worth repeating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transient: eventual-consistency lag, throttling, brief unavailability
    Retryable,
    /// Repeating the call cannot succeed
    Fatal,
}

/// State labels of one resource kind, shared by every wait the reconciler runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateModel {
    /// States a resource passes through before becoming usable
    pub provisioning: BTreeSet<String>,
    /// The usable state
    pub stable: String,
    /// States a resource may report while its deletion is in progress
    pub deleting: BTreeSet<String>,
    /// States meaning the resource no longer exists even though it is still listed
    pub gone: BTreeSet<String>,
}

impl StateModel {
    /// Model where deletion may report any provisioning state or the stable state
    pub fn new<I, S>(provisioning: I, stable: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let provisioning: BTreeSet<String> = provisioning.into_iter().map(Into::into).collect();
        let stable = stable.into();
        let mut deleting = provisioning.clone();
        deleting.insert(stable.clone());

        Self {
            provisioning,
            stable,
            deleting,
            gone: BTreeSet::new(),
        }
    }

    pub fn with_deleting<I, S>(mut self, deleting: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deleting = deleting.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_gone<I, S>(mut self, gone: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.gone = gone.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_stable(&self, state: &str) -> bool {
        self.stable == state
    }

    pub fn is_provisioning(&self, state: &str) -> bool {
        self.provisioning.contains(state)
    }

    pub fn is_gone(&self, state: &str) -> bool {
        self.gone.contains(state)
    }

    /// Target set of a "wait until destroyed": absence or any gone state
    pub fn destroyed_states(&self) -> BTreeSet<String> {
        let mut target = self.gone.clone();
        target.insert(ABSENT_STATE.to_string());
        target
    }
}

/// New value for one mutable field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub value: serde_json::Value,
}

impl FieldChange {
    pub fn new(field: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }
}

/// One step of an update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpdateStep {
    /// Applied alone; its failure aborts the rest of the plan
    Field(FieldChange),
    /// Independent changes; every one is attempted and failures are reported together
    Group(Vec<FieldChange>),
}

/// Ordered field mutations needed to move a resource to its desired state
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdatePlan {
    steps: Vec<UpdateStep>,
}

impl UpdatePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        self.steps
            .push(UpdateStep::Field(FieldChange::new(field, value)));
        self
    }

    /// Append a group; empty groups are dropped
    pub fn group(mut self, changes: impl IntoIterator<Item = FieldChange>) -> Self {
        let changes: Vec<FieldChange> = changes.into_iter().collect();
        if !changes.is_empty() {
            self.steps.push(UpdateStep::Group(changes));
        }
        self
    }

    pub fn steps(&self) -> &[UpdateStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn into_steps(self) -> Vec<UpdateStep> {
        self.steps
    }
}

/// Resource-specific callbacks used by the reconciler.
///
/// Every method except [`mutate`](ResourceDriver::mutate) may be called more than
/// once for the same logical request, so implementations must be safe to repeat.
/// `mutate` is only repeated when [`classify_mutate_error`](ResourceDriver::classify_mutate_error)
/// says the previous call was rejected without effect.
#[async_trait]
pub trait ResourceDriver: Send + Sync {
    /// Declarative description of the resource to create or converge to
    type Desired: Send + Sync;

    /// Error type of the underlying API
    type Error: std::error::Error + Send + Sync + 'static;

    /// Resource kind, used in diagnostics before an identifier exists
    fn kind(&self) -> &str;

    fn state_model(&self) -> &StateModel;

    /// Issue the create call; returns the provider-assigned identifier
    async fn mutate(&self, desired: &Self::Desired) -> Result<String, Self::Error>;

    /// Current state, or `None` when the resource does not exist
    async fn observe(&self, resource_id: &str) -> Result<Option<Observation>, Self::Error>;

    /// Issue the primary deletion call
    async fn delete(&self, resource_id: &str) -> Result<(), Self::Error>;

    /// Field mutations needed to converge `resource_id` to `desired`
    fn update_plan(&self, _resource_id: &str, _desired: &Self::Desired) -> UpdatePlan {
        UpdatePlan::default()
    }

    /// Apply one field of an [`UpdatePlan`]
    async fn mutate_field(&self, _resource_id: &str, _change: &FieldChange) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Keys of sub-resources owned by `resource_id` that must be deleted with it
    async fn dependents(&self, _resource_id: &str) -> Result<Vec<String>, Self::Error> {
        Ok(Vec::new())
    }

    async fn delete_sub_resource(&self, _key: &str) -> Result<(), Self::Error> {
        Ok(())
    }

    fn classify_error(&self, error: &Self::Error) -> ErrorClass;

    /// Classification for failures of [`mutate`](ResourceDriver::mutate). A create
    /// that failed ambiguously may already exist remotely, so nothing is retried
    /// unless the driver opts in.
    fn classify_mutate_error(&self, _error: &Self::Error) -> ErrorClass {
        ErrorClass::Fatal
    }
}
