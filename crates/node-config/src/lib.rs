//! Node configuration
//!
//! Data model and configuration plumbing for bare-metal nodes that boot from
//! storage-controller LUNs and join a Kubernetes-family cluster.
//!
//! # Example
//!
//! ```no_run
//! use node_config::{NodeSpec, ProviderConfig};
//!
//! # fn example() -> Result<(), node_config::ConfigError> {
//! let provider = ProviderConfig::from_env()?;
//! let spec = NodeSpec::parse(&std::fs::read_to_string("node.yaml")?)?;
//! let config = spec.to_node_config(&provider)?;
//! println!("{}", config.to_yaml()?);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Model**: `NodeConfig` with compute, storage, network and cluster metadata
//! - **Defaulting**: storage object names, iSCSI initiator names, LUN ids
//! - **Blade constraints**: range and pattern containment checks
//! - **Secrets**: AES-256-GCM encryption of credentials keyed by a pass phrase
//! - **Annotations**: compute/storage payloads published on cluster nodes

pub mod annotations;
pub mod blade;
pub mod change;
pub mod crypt;
pub mod defaults;
pub mod error;
pub mod model;
pub mod provider;
pub mod request;

pub use annotations::{NODE_ANNOTATION_COMPUTE, NODE_ANNOTATION_STORAGE, node_annotations};
pub use blade::{matches_pattern, value_in_range};
pub use change::ChangeFlags;
pub use crypt::{decrypt_node_config, decrypt_string, encrypt_node_config, encrypt_string};
pub use defaults::{NodeOverrides, set_defaults};
pub use error::ConfigError;
pub use model::*;
pub use provider::{
    ClusterApiConfig, ClusterProvider, DrainInput, IpamProvider, ProviderConfig,
};
pub use request::{
    MaintenanceSpec, MaintenanceTask, NodeSpec, RestoreSpec, SnapshotSpec,
};

/// Parse a node configuration document, JSON if it starts with `{`, YAML otherwise
///
/// # Errors
///
/// Returns a parse error for malformed documents.
pub fn parse_node_config(text: &str) -> Result<NodeConfig, ConfigError> {
    if text.trim_start().starts_with('{') {
        Ok(serde_json::from_str(text)?)
    } else {
        Ok(serde_yaml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_config_yaml_and_json() {
        let yaml = r"
compute:
  hostName: node1
  spOrg: org-root
  spTemplate: tmpl
  powerState: down
storage:
  bootLun:
    name: node1_iboot
    size: 10
    osImage:
      name: ubuntu
network:
  node:
    - name: eth2
      subnet: 10.0.0.0/24
      netlen: '24'
  iscsiInitiator: []
";
        let config = parse_node_config(yaml).unwrap();
        assert_eq!(config.compute.host_name, "node1");
        assert_eq!(config.compute.power_state, PowerState::Down);
        assert_eq!(config.storage.boot_lun.lun.size, 10);
        assert_eq!(config.network.node[0].net_len, "24");

        let json = config.to_json().unwrap();
        assert_eq!(parse_node_config(&json).unwrap(), config);
    }

    #[test]
    fn test_provider_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provider.yaml");
        std::fs::write(&path, "synchronized_updates: true\nipam:\n  provider: Infoblox\n").unwrap();
        let provider = ProviderConfig::load(&path).unwrap();
        assert!(provider.synchronized_updates);
        assert_eq!(provider.ipam.provider, IpamProvider::Infoblox);
        assert!(provider.cluster_api.is_none());
    }
}
