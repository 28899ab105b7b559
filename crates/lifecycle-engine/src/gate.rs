//! Update gate
//!
//! Serializes fabric-mutating updates across nodes when
//! `synchronized_updates` is enabled. The gate is a poison lock: once a
//! holder records an error, every later acquirer is handed that error and
//! must not proceed. A disabled gate never blocks and never poisons.

use crate::error::EngineError;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct GateState {
    last_error: Option<String>,
}

/// Process-wide poison lock for synchronized updates
#[derive(Debug)]
pub struct UpdateGate {
    enabled: bool,
    state: Mutex<GateState>,
}

/// Held gate; released on drop
#[derive(Debug)]
pub struct GateGuard<'a> {
    guard: Option<MutexGuard<'a, GateState>>,
}

impl UpdateGate {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            state: Mutex::new(GateState::default()),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Wait for the gate
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Poisoned`] carrying the error recorded by an
    /// earlier holder. The gate is released before returning in that case.
    pub async fn acquire(&self) -> Result<GateGuard<'_>, EngineError> {
        if !self.enabled {
            return Ok(GateGuard { guard: None });
        }
        let guard = self.state.lock().await;
        if let Some(previous) = guard.last_error.clone() {
            warn!("Update gate is poisoned: {}", previous);
            return Err(EngineError::Poisoned(previous));
        }
        debug!("Update gate acquired");
        Ok(GateGuard { guard: Some(guard) })
    }

    /// Clear a recorded failure so synchronized updates can resume
    pub async fn reset(&self) {
        self.state.lock().await.last_error = None;
    }
}

impl GateGuard<'_> {
    /// Poison the gate with `error`; no-op on a disabled gate
    pub fn set_error(&mut self, error: &EngineError) {
        if let Some(state) = self.guard.as_mut() {
            state.last_error = Some(error.to_string());
        }
    }

    /// Poison the gate if `result` failed, passing it through
    pub fn record<T>(&mut self, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(e) = &result {
            self.set_error(e);
        }
        result
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        if self.guard.take().is_some() {
            debug!("Update gate released");
        }
    }
}
