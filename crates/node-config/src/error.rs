//! Node configuration errors

use thiserror::Error;

/// Errors raised while loading, defaulting or validating node configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration is structurally valid but semantically wrong
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Subnet is not a valid CIDR
    #[error("failed to parse CIDR {cidr}: {reason}")]
    Cidr { cidr: String, reason: String },

    /// Blade constraint (range or pattern) could not be evaluated
    #[error("Invalid constraint: {0}")]
    Constraint(String),

    /// Secret encryption/decryption failure
    #[error("Crypt error: {0}")]
    Crypt(String),

    /// YAML parse or render failure
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parse or render failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading a configuration file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
