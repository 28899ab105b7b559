//! Transient-error retry
//!
//! Fixed-interval retry for orchestrator calls. Only errors classified by
//! [`ClusterError::is_transient`] are retried; anything else propagates on the
//! first attempt.

use crate::error::ClusterError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Pause between attempts for Kubernetes API calls
pub const RETRY_WAIT: Duration = Duration::from_secs(5);

/// Fixed-interval retry policy
#[derive(Debug, Clone, Copy)]
pub struct Retry {
    pub attempts: u32,
    pub wait: Duration,
}

impl Retry {
    #[must_use]
    pub fn new(attempts: u32, wait: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            wait,
        }
    }

    /// Run `op` until it succeeds, fails permanently or attempts run out
    ///
    /// # Errors
    ///
    /// Returns the last error, prefixed with `what`.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ClusterError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, ClusterError>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    warn!("{} failed with transient error (attempt {}/{}): {}", what, attempt, self.attempts, e);
                    sleep(self.wait).await;
                }
                Err(e) => return Err(e.context(what)),
            }
        }
    }
}
