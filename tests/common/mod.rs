#![allow(dead_code)]

pub mod strategies;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use converge_core::config::ConvergeConfig;
use converge_core::driver::{MemoryDriver, MemoryRemote};
use converge_core::{LifecycleReconciler, Observation, PollSpec, Result};

/// Observable that replays a fixed script of states; `None` means not found.
/// Once the script is exhausted the last entry repeats.
pub struct ScriptedObservable {
    resource_id: String,
    script: Mutex<VecDeque<Option<String>>>,
    last: Mutex<Option<String>>,
    calls: AtomicU32,
}

impl ScriptedObservable {
    pub fn new(resource_id: &str, script: &[Option<&str>]) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            script: Mutex::new(script.iter().map(|state| state.map(str::to_string)).collect()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
        }
    }

    /// `pending` repeated `n` times, then `target`
    pub fn pending_then(resource_id: &str, n: usize, pending: &str, target: &str) -> Self {
        let mut script = vec![Some(pending); n];
        script.push(Some(target));
        Self::new(resource_id, &script)
    }

    pub async fn observe(&self) -> Result<Option<Observation>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = match self.script.lock().pop_front() {
            Some(next) => {
                *self.last.lock() = next.clone();
                next
            }
            None => self.last.lock().clone(),
        };
        Ok(state.map(|state| Observation::new(self.resource_id.clone(), state)))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Wait spec with no initial delay and 1s..10s intervals
pub fn fast_spec(pending: &[&str], target: &[&str], timeout: Duration) -> PollSpec {
    PollSpec::new("r-1", pending.iter().copied(), target.iter().copied(), timeout)
        .with_delay(Duration::ZERO)
        .with_intervals(Duration::from_secs(1), Duration::from_secs(10))
}

pub fn test_reconciler(remote: &MemoryRemote) -> LifecycleReconciler<MemoryDriver> {
    LifecycleReconciler::new(
        Arc::new(MemoryDriver::new(remote.clone())),
        ConvergeConfig::for_testing(),
    )
}
