//! Fabric-wide provider configuration
//!
//! Loaded once per process from a YAML or JSON document. Carries credentials
//! for every external system plus the cluster API settings shared by all nodes.

use crate::crypt::decrypt_string;
use crate::error::ConfigError;
use crate::model::{Credentials, IpamCredentials, StorageCredentials};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::Path;
use tracing::info;

/// Environment variable naming the provider configuration document
pub const CONFIG_PATH_ENV: &str = "FABRIC_CONFIG";
/// Environment variable overriding `pass_phrase`
pub const PASS_PHRASE_ENV: &str = "FABRIC_PASS_PHRASE";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpamProvider {
    #[default]
    Internal,
    Infoblox,
}

impl fmt::Display for IpamProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpamProvider::Internal => f.write_str("Internal"),
            IpamProvider::Infoblox => f.write_str("Infoblox"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IpamSettings {
    pub provider: IpamProvider,
    pub credentials: IpamSettingsCredentials,
    pub dns_zone: String,
}

/// IPAM credentials in provider (snake_case) form
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IpamSettingsCredentials {
    #[serde(flatten)]
    pub credentials: Credentials,
    pub wapi_version: String,
    pub dns_view: String,
    pub network_view: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeSettings {
    pub credentials: Credentials,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettingsCredentials {
    #[serde(flatten)]
    pub credentials: Credentials,
    /// `zapi` or `rest`
    pub api_method: String,
    pub zapi_version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub credentials: StorageSettingsCredentials,
}

/// Cluster orchestrator flavour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterProvider {
    #[default]
    Rancher2,
    Rke,
    Rke2,
    Harvester,
}

impl fmt::Display for ClusterProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClusterProvider::Rancher2 => "rancher2",
            ClusterProvider::Rke => "rke",
            ClusterProvider::Rke2 => "rke2",
            ClusterProvider::Harvester => "harvester",
        };
        f.write_str(name)
    }
}

/// Drain policy applied by cordon/drain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainInput {
    pub delete_local_data: bool,
    pub force: bool,
    /// Pod termination grace period, seconds
    pub grace_period: i64,
    pub ignore_daemon_sets: bool,
    /// Overall drain timeout, seconds
    pub timeout: u64,
}

impl Default for DrainInput {
    fn default() -> Self {
        Self {
            delete_local_data: false,
            force: false,
            grace_period: 60,
            ignore_daemon_sets: true,
            timeout: 1800,
        }
    }
}

/// Cluster API connection settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterApiConfig {
    pub enabled: bool,
    pub provider: ClusterProvider,
    pub api_url: String,
    pub token_key: String,
    pub insecure: bool,
    pub server_ca_data: String,
    pub client_cert_data: String,
    pub client_key_data: String,
    pub cluster_id: String,
    /// Attempts for transient errors (rke2)
    pub retries: u32,
    pub wait_for_node_timeout: u64,
    pub node_grace_timeout: u64,
    pub drain_input: DrainInput,
}

impl Default for ClusterApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: ClusterProvider::default(),
            api_url: String::new(),
            token_key: String::new(),
            insecure: false,
            server_ca_data: String::new(),
            client_cert_data: String::new(),
            client_key_data: String::new(),
            cluster_id: String::new(),
            retries: 3,
            wait_for_node_timeout: 0,
            node_grace_timeout: 0,
            drain_input: DrainInput::default(),
        }
    }
}

impl fmt::Debug for ClusterApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterApiConfig")
            .field("enabled", &self.enabled)
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .field("token_key", &"<redacted>")
            .field("insecure", &self.insecure)
            .field("client_key_data", &"<redacted>")
            .field("cluster_id", &self.cluster_id)
            .field("retries", &self.retries)
            .field("wait_for_node_timeout", &self.wait_for_node_timeout)
            .field("node_grace_timeout", &self.node_grace_timeout)
            .field("drain_input", &self.drain_input)
            .finish_non_exhaustive()
    }
}

/// Provider configuration document
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub pass_phrase: String,
    pub synchronized_updates: bool,
    pub ipam: IpamSettings,
    pub compute: ComputeSettings,
    pub storage: StorageSettings,
    pub cluster_api: Option<ClusterApiConfig>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("pass_phrase", &"<redacted>")
            .field("synchronized_updates", &self.synchronized_updates)
            .field("ipam", &self.ipam)
            .field("compute", &self.compute)
            .field("storage", &self.storage)
            .field("cluster_api", &self.cluster_api)
            .finish()
    }
}

impl ProviderConfig {
    /// Parse a YAML or JSON document
    ///
    /// # Errors
    ///
    /// Returns a parse error for malformed documents.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        if text.trim_start().starts_with('{') {
            Ok(serde_json::from_str(text)?)
        } else {
            Ok(serde_yaml::from_str(text)?)
        }
    }

    /// Load from a file path
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Load from `FABRIC_CONFIG`, letting `FABRIC_PASS_PHRASE` override the pass phrase
    ///
    /// # Errors
    ///
    /// Fails if `FABRIC_CONFIG` is unset or the document cannot be loaded.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = env::var(CONFIG_PATH_ENV).map_err(|_| {
            ConfigError::InvalidConfig(format!("{CONFIG_PATH_ENV} environment variable not set"))
        })?;
        info!("Loading provider configuration from {}", path);
        let mut config = Self::load(&path)?;
        if let Ok(pass_phrase) = env::var(PASS_PHRASE_ENV) {
            config.pass_phrase = pass_phrase;
        }
        Ok(config)
    }

    /// Pass phrase, if configured
    #[must_use]
    pub fn pass_phrase(&self) -> Option<&str> {
        Some(self.pass_phrase.as_str()).filter(|p| !p.is_empty())
    }

    /// Enabled cluster API settings with the token decrypted
    ///
    /// # Errors
    ///
    /// Fails if the token cannot be decrypted.
    pub fn cluster_api_resolved(&self) -> Result<Option<ClusterApiConfig>, ConfigError> {
        let Some(cluster) = self.cluster_api.as_ref().filter(|c| c.enabled) else {
            return Ok(None);
        };
        let mut cluster = cluster.clone();
        if let Some(pass_phrase) = self.pass_phrase() {
            cluster.token_key = decrypt_string(&cluster.token_key, pass_phrase)?;
        }
        Ok(Some(cluster))
    }

    /// Node-document IPAM credentials derived from provider settings
    #[must_use]
    pub fn ipam_credentials(&self) -> IpamCredentials {
        let creds = &self.ipam.credentials;
        IpamCredentials {
            credentials: creds.credentials.clone(),
            wapi_version: creds.wapi_version.clone(),
            dns_view: creds.dns_view.clone(),
            network_view: creds.network_view.clone(),
        }
    }

    /// Node-document storage credentials derived from provider settings
    #[must_use]
    pub fn storage_credentials(&self) -> StorageCredentials {
        let creds = &self.storage.credentials;
        StorageCredentials {
            credentials: creds.credentials.clone(),
            api_method: creds.api_method.clone(),
            zapi_version: creds.zapi_version.clone(),
        }
    }
}
