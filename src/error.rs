//! # Convergence Error Taxonomy
//!
//! Every failure the engine can surface to a caller. Variants carry enough context
//! (resource identifier, last observed state, elapsed time) to diagnose a failure
//! without re-querying the remote system.
//!
//! Only [`ConvergeError::RetryableRemote`] is ever absorbed internally, and only up to
//! the configured deadline. Everything else propagates to the caller immediately.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigurationError;
use crate::constants::MANUAL_REMEDIATION_NOTICE;

/// One failed sub-operation of a fan-out, kept verbatim for reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubOperationFailure {
    /// Sub-resource key, e.g. a snapshot identifier
    pub key: String,
    /// Rendered cause reported by the driver
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConvergeError {
    /// Resource is absent. Frequently not an error, depending on the caller.
    #[error("Resource {resource_id} not found{}", render_operation(.operation))]
    NotFound {
        resource_id: String,
        operation: Option<String>,
    },

    /// Transient remote failure (eventual-consistency lag, throttling)
    #[error(
        "Retryable remote error during {operation}{}: {message}",
        render_resource(.resource_id)
    )]
    RetryableRemote {
        operation: String,
        resource_id: Option<String>,
        message: String,
    },

    /// Remote failure the driver classified as non-retryable
    #[error("Remote error during {operation}{}: {message}", render_resource(.resource_id))]
    FatalRemote {
        operation: String,
        resource_id: Option<String>,
        message: String,
    },

    /// Observed state is outside the declared pending and target sets
    #[error(
        "Resource {resource_id} entered unexpected state '{state}' (expected one of {expected:?}){}",
        render_operation(.operation)
    )]
    UnexpectedState {
        resource_id: String,
        state: String,
        expected: Vec<String>,
        operation: Option<String>,
    },

    /// Deadline exceeded while polling or retrying
    #[error(
        "Timeout after {elapsed:?} during {operation} on {resource_id} (last state: {}){}",
        .last_state.as_deref().unwrap_or("unknown"),
        render_last_error(.last_error)
    )]
    Timeout {
        operation: String,
        resource_id: String,
        last_state: Option<String>,
        elapsed: Duration,
        last_error: Option<String>,
    },

    /// A subset of fan-out sub-operations failed
    #[error("{}", partial_failure_message(.resource_id, .failures))]
    PartialFailure {
        resource_id: String,
        failures: Vec<SubOperationFailure>,
        primary_deleted: bool,
    },

    /// Caller aborted the operation
    #[error(
        "Operation {operation}{} cancelled after {elapsed:?}",
        render_resource(.resource_id)
    )]
    Cancelled {
        operation: String,
        resource_id: Option<String>,
        elapsed: Duration,
    },

    /// A poll or retry specification violates its invariants
    #[error("Invalid specification: {reason}")]
    InvalidSpec { reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ConvergeError {
    pub fn not_found(resource_id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_id: resource_id.into(),
            operation: None,
        }
    }

    pub fn retryable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RetryableRemote {
            operation: operation.into(),
            resource_id: None,
            message: message.into(),
        }
    }

    pub fn fatal(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FatalRemote {
            operation: operation.into(),
            resource_id: None,
            message: message.into(),
        }
    }

    pub fn unexpected_state<I, S>(
        resource_id: impl Into<String>,
        state: impl Into<String>,
        expected: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::UnexpectedState {
            resource_id: resource_id.into(),
            state: state.into(),
            expected: expected.into_iter().map(Into::into).collect(),
            operation: None,
        }
    }

    pub fn cancelled(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Cancelled {
            operation: operation.into(),
            resource_id: None,
            elapsed,
        }
    }

    pub fn invalid_spec(reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            reason: reason.into(),
        }
    }

    /// Only transient remote failures may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryableRemote { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Last observed state, when the error carries one
    pub fn last_state(&self) -> Option<&str> {
        match self {
            Self::Timeout { last_state, .. } => last_state.as_deref(),
            Self::UnexpectedState { state, .. } => Some(state),
            _ => None,
        }
    }

    /// Resource the error concerns, when known
    pub fn resource_id(&self) -> Option<&str> {
        match self {
            Self::NotFound { resource_id, .. }
            | Self::UnexpectedState { resource_id, .. }
            | Self::Timeout { resource_id, .. }
            | Self::PartialFailure { resource_id, .. } => Some(resource_id),
            Self::RetryableRemote { resource_id, .. }
            | Self::FatalRemote { resource_id, .. }
            | Self::Cancelled { resource_id, .. } => resource_id.as_deref(),
            Self::InvalidSpec { .. } | Self::Configuration(_) => None,
        }
    }

    /// Re-label the operation an error is reported against, keeping its class
    pub fn with_operation(self, operation: &str) -> Self {
        let relabelled = Some(operation.to_string());
        match self {
            Self::NotFound { resource_id, .. } => Self::NotFound {
                resource_id,
                operation: relabelled,
            },
            Self::RetryableRemote {
                resource_id,
                message,
                ..
            } => Self::RetryableRemote {
                operation: operation.to_string(),
                resource_id,
                message,
            },
            Self::FatalRemote {
                resource_id,
                message,
                ..
            } => Self::FatalRemote {
                operation: operation.to_string(),
                resource_id,
                message,
            },
            Self::UnexpectedState {
                resource_id,
                state,
                expected,
                ..
            } => Self::UnexpectedState {
                resource_id,
                state,
                expected,
                operation: relabelled,
            },
            Self::Timeout {
                resource_id,
                last_state,
                elapsed,
                last_error,
                ..
            } => Self::Timeout {
                operation: operation.to_string(),
                resource_id,
                last_state,
                elapsed,
                last_error,
            },
            Self::Cancelled {
                resource_id,
                elapsed,
                ..
            } => Self::Cancelled {
                operation: operation.to_string(),
                resource_id,
                elapsed,
            },
            other => other,
        }
    }

    /// Attach the resource identifier to errors raised before it was known
    pub fn with_resource(self, id: &str) -> Self {
        match self {
            Self::RetryableRemote {
                operation,
                resource_id: None,
                message,
            } => Self::RetryableRemote {
                operation,
                resource_id: Some(id.to_string()),
                message,
            },
            Self::FatalRemote {
                operation,
                resource_id: None,
                message,
            } => Self::FatalRemote {
                operation,
                resource_id: Some(id.to_string()),
                message,
            },
            Self::Cancelled {
                operation,
                resource_id: None,
                elapsed,
            } => Self::Cancelled {
                operation,
                resource_id: Some(id.to_string()),
                elapsed,
            },
            other => other,
        }
    }
}

impl From<ConfigurationError> for ConvergeError {
    fn from(error: ConfigurationError) -> Self {
        ConvergeError::Configuration(error.to_string())
    }
}

fn render_operation(operation: &Option<String>) -> String {
    match operation {
        Some(operation) => format!(" during {operation}"),
        None => String::new(),
    }
}

fn render_resource(resource_id: &Option<String>) -> String {
    match resource_id {
        Some(resource_id) => format!(" on {resource_id}"),
        None => String::new(),
    }
}

fn render_last_error(last_error: &Option<String>) -> String {
    match last_error {
        Some(error) => format!(": {error}"),
        None => String::new(),
    }
}

/// Multi-line report naming every failed sub-resource and its cause
fn partial_failure_message(resource_id: &str, failures: &[SubOperationFailure]) -> String {
    let mut message = format!("Errors while processing sub-resources of {resource_id}:");
    for failure in failures {
        let _ = write!(message, "\n{}: {}", failure.key, failure.error);
    }
    message.push('\n');
    message.push_str(MANUAL_REMEDIATION_NOTICE);
    message
}

pub type Result<T> = std::result::Result<T, ConvergeError>;
