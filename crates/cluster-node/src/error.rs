//! Cluster node errors

use thiserror::Error;

/// Substrings marking errors worth retrying
pub const TRANSIENT_ERRORS: &[&str] = &[
    "the object has been modified; please apply your changes to the latest version and try again",
    "connection timed out",
    "i/o timeout",
    "handshake timeout",
    "connection reset by peer",
    "context deadline exceeded",
];

/// Errors that can occur when talking to the cluster orchestrator
#[derive(Debug, Error)]
pub enum ClusterError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Orchestrator API returned an error
    #[error("Cluster API error: {0}")]
    Api(String),

    /// Node or cluster not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Polling loop exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Client could not be created
    #[error("Connection error: {0}")]
    Connect(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterError {
    /// Rate limiting, temporary unavailability or an optimistic-concurrency conflict
    #[must_use]
    pub fn is_transient(&self) -> bool {
        let message = self.to_string();
        TRANSIENT_ERRORS.iter().any(|s| message.contains(s))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        if matches!(self, ClusterError::NotFound(_)) {
            return true;
        }
        let message = self.to_string();
        message.contains("not found") || message.contains("NotFound")
    }

    /// Prefix the message with the failing operation
    #[must_use]
    pub fn context(self, op: &str) -> Self {
        match self {
            ClusterError::Api(msg) => ClusterError::Api(format!("{op}: {msg}")),
            ClusterError::NotFound(msg) => ClusterError::NotFound(format!("{op}: {msg}")),
            ClusterError::Timeout(msg) => ClusterError::Timeout(format!("{op}: {msg}")),
            ClusterError::Connect(msg) => ClusterError::Connect(format!("{op}: {msg}")),
            other => ClusterError::Api(format!("{op}: {other}")),
        }
    }
}
