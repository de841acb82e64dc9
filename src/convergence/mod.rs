//! # Convergence Primitives
//!
//! Resource-agnostic building blocks of the engine:
//!
//! - **Retry Executor** ([`retry`]): repeat an operation until success, a fatal error,
//!   or a deadline followed by one final attempt
//! - **State Poller** ([`poller`]): sample an observable until it reaches a target state
//! - **Partial-Failure Aggregator** ([`aggregate`]): fan out independent sub-operations
//!   and report every failure together
//! - **Cancellation** ([`cancel`]): abort any of the above while it is sleeping
//!
//! The [`crate::reconciler`] composes these into Create/Read/Update/Delete.

pub mod aggregate;
pub mod cancel;
pub mod poller;
pub mod retry;

pub use aggregate::{AggregateResult, PartialFailureAggregator};
pub use cancel::{CancellationSignal, CancellationSource, Wake};
pub use poller::{Observation, PollOutcome, PollSpec, StatePoller};
pub use retry::{RetryError, RetryExecutor, RetryPolicy};
