//! Fabric client errors

use thiserror::Error;

/// Errors returned by compute, storage, IPAM and remote shell clients
#[derive(Debug, Error)]
pub enum FabricError {
    /// Compute fabric rejected or failed a request
    #[error("Compute fabric error: {0}")]
    Compute(String),

    /// Storage controller rejected or failed a request
    #[error("Storage error: {0}")]
    Storage(String),

    /// IPAM rejected or failed a request
    #[error("IPAM error: {0}")]
    Ipam(String),

    /// Remote command could not be started or exited non-zero
    #[error("Remote command error: {0}")]
    Remote(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Selected backend has no implementation
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Local I/O failure (process spawn, key file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
