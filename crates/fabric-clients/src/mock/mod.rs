//! In-memory fabric clients for unit testing
//!
//! Every mock records its calls into a [`CallJournal`]. Hand the same journal
//! to all mocks (and to the cluster-node mock) to assert cross-system ordering.
//!
//! - `compute.rs` - service profiles, blades and power state
//! - `storage.rs` - volumes, LUNs, snapshots and repositories
//! - `ipam.rs` - address allocation
//! - `shell.rs` - scripted remote command output

mod compute;
mod ipam;
mod shell;
mod storage;

pub use compute::{MockCompute, MockServer};
pub use ipam::MockIpam;
pub use shell::MockShell;
pub use storage::{MockStorage, MockVolume};

use crate::error::FabricError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordered record of mock calls, shared between mocks
#[derive(Debug, Clone, Default)]
pub struct CallJournal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallJournal {
    /// Create an empty journal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle for mocks living in other crates
    #[must_use]
    pub fn handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.entries)
    }

    pub fn record(&self, entry: impl Into<String>) {
        lock(&self.entries).push(entry.into());
    }

    /// Snapshot of recorded calls
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        lock(&self.entries).clone()
    }

    /// Recorded calls starting with `prefix`
    #[must_use]
    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        lock(&self.entries)
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Index of the first call starting with `prefix`
    #[must_use]
    pub fn position(&self, prefix: &str) -> Option<usize> {
        lock(&self.entries).iter().position(|c| c.starts_with(prefix))
    }

    #[must_use]
    pub fn contains(&self, prefix: &str) -> bool {
        self.position(prefix).is_some()
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}

impl From<Arc<Mutex<Vec<String>>>> for CallJournal {
    fn from(entries: Arc<Mutex<Vec<String>>>) -> Self {
        Self { entries }
    }
}

/// Injected failures keyed by method name
#[derive(Debug, Clone, Default)]
pub(crate) struct Failures {
    by_method: Arc<Mutex<HashMap<String, String>>>,
}

impl Failures {
    pub(crate) fn set(&self, method: &str, message: &str) {
        lock(&self.by_method).insert(method.to_string(), message.to_string());
    }

    pub(crate) fn clear(&self) {
        lock(&self.by_method).clear();
    }

    /// Err built by `make` if a failure is registered for `method`
    pub(crate) fn check(&self, method: &str, make: fn(String) -> FabricError) -> Result<(), FabricError> {
        match lock(&self.by_method).get(method) {
            Some(message) => Err(make(message.clone())),
            None => Ok(()),
        }
    }
}
