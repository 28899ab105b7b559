//! Engine error types.
//!
//! Wraps the errors of the config, fabric and cluster crates and adds the
//! failure classes only the engine can produce: aggregated preflight and
//! cleanup failures, poisoned update gates and safe-removal refusals.

use cluster_node::ClusterError;
use fabric_clients::FabricError;
use node_config::ConfigError;
use thiserror::Error;

/// Errors returned by engine entry points.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Request rejected before any remote call
    #[error("Validation error: {0}")]
    Validation(String),

    /// One or more preflight checks failed; nothing was changed
    #[error("Preflight failed: {}", .0.join("; "))]
    Preflight(Vec<String>),

    /// Compute, storage, IPAM or remote shell failure
    #[error("Fabric error: {0}")]
    Fabric(#[from] FabricError),

    /// Cluster API failure
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Configuration could not be built or decrypted
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Polling loop exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Node is powered on and safe removal is requested
    #[error("{0}")]
    SafeRemoval(String),

    /// A previous synchronized update failed
    #[error("Update gate poisoned by earlier failure: {0}")]
    Poisoned(String),

    /// Snapshot protocol failure (fsfreeze, remote command, storage)
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Several independent steps failed
    #[error("{}", .0.join(", "))]
    Aggregate(Vec<String>),

    /// Sub-call failure tagged with the engine operation
    #[error("{op}: {source}")]
    Operation {
        op: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Prefix the error with the engine operation that failed
    #[must_use]
    pub fn context(self, op: impl Into<String>) -> Self {
        EngineError::Operation {
            op: op.into(),
            source: Box::new(self),
        }
    }

    /// Error refusing to power off a node with safe removal set
    #[must_use]
    pub fn safe_removal(op: &str, hostname: &str) -> Self {
        EngineError::SafeRemoval(format!(
            "{op}: node {hostname} has power state up, safe_removal is set; power off the node first"
        ))
    }
}

/// Attach an operation name to any error convertible into [`EngineError`]
pub(crate) trait ResultExt<T> {
    fn op(self, op: &str) -> Result<T, EngineError>;
}

impl<T, E: Into<EngineError>> ResultExt<T> for Result<T, E> {
    fn op(self, op: &str) -> Result<T, EngineError> {
        self.map_err(|e| e.into().context(op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preflight_joins_failures() {
        let err = EngineError::Preflight(vec!["no blade".to_string(), "volume exists".to_string()]);
        assert_eq!(err.to_string(), "Preflight failed: no blade; volume exists");
    }

    #[test]
    fn test_operation_context() {
        let result: Result<(), FabricError> = Err(FabricError::Storage("lun busy".to_string()));
        let err = result.op("delete_boot_luns").unwrap_err();
        assert_eq!(err.to_string(), "delete_boot_luns: Fabric error: Storage error: lun busy");
        assert!(matches!(err, EngineError::Operation { .. }));
    }
}
