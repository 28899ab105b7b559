//! State polling with settle-down
//!
//! Control planes flap through intermediate states while converging, so a
//! target state only counts once it has been observed on `settle + 1`
//! consecutive polls with no state change in between.

use crate::error::ClusterError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::debug;

/// How long a node may be missing while it (re)registers
pub const NODE_NOT_FOUND_GRACE: Duration = Duration::from_secs(120);
/// Extra consecutive observations a node state must hold
pub const NODE_SETTLE: u32 = 2;

/// Consecutive-observation counter, reset on every state change
#[derive(Debug, Clone)]
pub struct SettleDown {
    required: u32,
    remaining: u32,
    last: Option<String>,
}

impl SettleDown {
    #[must_use]
    pub fn new(required: u32) -> Self {
        Self {
            required,
            remaining: required,
            last: None,
        }
    }

    /// Feed one observation; true once a target state has settled
    pub fn observe(&mut self, state: &str, targets: &[&str]) -> bool {
        if self.last.as_deref() != Some(state) {
            self.remaining = self.required;
            self.last = Some(state.to_string());
        }
        if !targets.contains(&state) {
            return false;
        }
        if self.remaining == 0 {
            return true;
        }
        self.remaining -= 1;
        false
    }
}

/// Polling policy for a state wait
#[derive(Debug, Clone, Copy)]
pub struct StateWait {
    pub interval: Duration,
    /// Extra consecutive observations required after the first match
    pub settle: u32,
    /// Window during which not-found is treated as "not there yet"
    pub not_found_grace: Duration,
    /// Succeed at the deadline if the last observed state is a target
    pub accept_last_at_deadline: bool,
}

impl StateWait {
    /// Plain poll: first match wins, no not-found tolerance
    #[must_use]
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            settle: 0,
            not_found_grace: Duration::ZERO,
            accept_last_at_deadline: false,
        }
    }

    /// Node poll: settles and rides out a node missing while it registers
    #[must_use]
    pub fn node(interval: Duration) -> Self {
        Self::every(interval)
            .settle(NODE_SETTLE)
            .tolerate_not_found(NODE_NOT_FOUND_GRACE)
    }

    #[must_use]
    pub fn settle(mut self, settle: u32) -> Self {
        self.settle = settle;
        self
    }

    #[must_use]
    pub fn tolerate_not_found(mut self, grace: Duration) -> Self {
        self.not_found_grace = grace;
        self
    }

    #[must_use]
    pub fn accept_last_at_deadline(mut self) -> Self {
        self.accept_last_at_deadline = true;
        self
    }

    /// Poll `fetch` until it returns one of `targets` or `timeout` elapses
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::Timeout` carrying the last observed state, or the
    /// first non-tolerated fetch error.
    pub async fn run<F, Fut>(
        &self,
        what: &str,
        targets: &[&str],
        timeout: Duration,
        mut fetch: F,
    ) -> Result<String, ClusterError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<String, ClusterError>> + Send,
    {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut settle = SettleDown::new(self.settle);
        let mut last = String::new();
        while Instant::now() < deadline {
            match fetch().await {
                Ok(state) => {
                    if settle.observe(&state, targets) {
                        return Ok(state);
                    }
                    last = state;
                }
                Err(e) if e.is_not_found() && start.elapsed() < self.not_found_grace => {
                    debug!("{} not found yet, retrying", what);
                }
                Err(e) => return Err(e),
            }
            sleep(self.interval).await;
        }
        if self.accept_last_at_deadline && targets.contains(&last.as_str()) {
            return Ok(last);
        }
        Err(ClusterError::Timeout(format!(
            "wait for {} state exceeded timeout={}: expected states={}, last state={}",
            what,
            timeout.as_secs(),
            targets.join(","),
            last
        )))
    }
}

/// Split a comma-separated state list
#[must_use]
pub fn parse_states(states: &str) -> Vec<&str> {
    states.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
}
