#![allow(clippy::doc_markdown)] // Allow technical terms like EBS, AMI in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Converge Core
//!
//! Lifecycle engine for remote resources behind asynchronous, eventually-consistent
//! control-plane APIs.
//!
//! ## Overview
//!
//! A mutating call against such an API returns long before the resource is usable:
//! the resource moves through intermediate states (`pending`, `deleting`) and the
//! only way to learn it has arrived is to poll. Reads issued right after a create
//! may briefly report the new resource as missing. A single logical delete may fan
//! out into several independent sub-resource deletions, any of which can fail on
//! its own.
//!
//! This crate owns that hard part once, generically, and leaves field mapping to a
//! small per-resource [`ResourceDriver`].
//!
//! ## Module Organization
//!
//! - [`convergence`] - Retry executor, state poller, fan-out aggregator, cancellation
//! - [`driver`] - Driver trait, error classification, in-memory simulated remote
//! - [`reconciler`] - Create/Read/Update/Delete orchestration
//! - [`config`] - YAML configuration with environment overrides
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging bootstrap
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use converge_core::config::ConvergeConfig;
//! use converge_core::driver::{ImageSpec, MemoryDriver, MemoryRemote};
//! use converge_core::reconciler::LifecycleReconciler;
//!
//! # async fn example() -> converge_core::Result<()> {
//! let config = ConvergeConfig::default();
//! let timeouts = config.lifecycle_timeouts();
//! let reconciler = LifecycleReconciler::new(Arc::new(MemoryDriver::new(MemoryRemote::new())), config);
//!
//! let created = reconciler
//!     .create(&ImageSpec::new("web").with_snapshot("snap-1"), timeouts.create)
//!     .await?;
//! println!("{} is {}", created.resource_id, created.observation.state);
//!
//! reconciler.delete(&created.resource_id, timeouts.delete).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod convergence;
pub mod driver;
pub mod error;
pub mod logging;
pub mod reconciler;

pub use config::{ConfigManager, ConvergeConfig};
pub use convergence::{
    CancellationSignal, CancellationSource, Observation, PartialFailureAggregator, PollSpec,
    RetryPolicy, StatePoller,
};
pub use driver::{ErrorClass, RemoteError, ResourceDriver, StateModel};
pub use error::{ConvergeError, Result};
pub use reconciler::{Created, LifecycleReconciler, LifecycleTimeouts, ReadOutcome};
