//! Built-in IPAM providers
//!
//! `Internal` trusts the addresses written in the node document: it only
//! checks that every NIC and initiator carries an IP and FQDN. External IPAM
//! backends plug in through [`IpamClient`].

use crate::error::FabricError;
use crate::fabric_trait::IpamClient;
use node_config::{IpamProvider, NodeConfig};
use std::sync::Arc;
use tracing::debug;

/// IPAM backed by statically configured addresses
#[derive(Debug, Clone, Copy, Default)]
pub struct InternalIpam;

impl InternalIpam {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn check(config: &NodeConfig) -> Result<(), FabricError> {
        let missing = |section: &str, i: usize, field: &str| {
            FabricError::Ipam(format!("Allocate: expected network.{section}[{i}].{field} in configuration"))
        };
        for (i, nic) in config.network.node.iter().enumerate() {
            if nic.ip.is_empty() {
                return Err(missing("node", i, "ip"));
            }
            if nic.fqdn.is_empty() {
                return Err(missing("node", i, "fqdn"));
            }
        }
        for (i, initiator) in config.network.iscsi_initiator.iter().enumerate() {
            if initiator.interface.ip.is_empty() {
                return Err(missing("iscsiInitiator", i, "ip"));
            }
            if initiator.interface.fqdn.is_empty() {
                return Err(missing("iscsiInitiator", i, "fqdn"));
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl IpamClient for InternalIpam {
    async fn allocate_preflight(&self, config: &NodeConfig) -> Result<(), FabricError> {
        Self::check(config)
    }

    async fn allocate(&self, config: &mut NodeConfig) -> Result<(), FabricError> {
        Self::check(config)
    }

    async fn assign(&self, ip: &str, fqdn: &str) -> Result<(), FabricError> {
        debug!("Internal IPAM: {} -> {} is statically assigned", fqdn, ip);
        Ok(())
    }

    async fn discover(&self, config: &mut NodeConfig) -> Result<(), FabricError> {
        Self::check(config)
    }

    async fn release(&self, _config: &NodeConfig) -> Result<(), FabricError> {
        Ok(())
    }
}

/// Instantiate the built-in provider selected in configuration
///
/// # Errors
///
/// Returns `FabricError::NotImplemented` for providers without a built-in client.
pub fn ipam_provider(provider: IpamProvider) -> Result<Arc<dyn IpamClient>, FabricError> {
    match provider {
        IpamProvider::Internal => Ok(Arc::new(InternalIpam::new())),
        IpamProvider::Infoblox => Err(FabricError::NotImplemented(format!(
            "IPAM provider {provider} is not implemented"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_config::{IscsiInitiator, NetworkInterface};

    fn nic(ip: &str, fqdn: &str) -> NetworkInterface {
        NetworkInterface {
            name: "eth".to_string(),
            ip: ip.to_string(),
            fqdn: fqdn.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_internal_requires_addresses() {
        let ipam = InternalIpam::new();
        let mut config = NodeConfig::default();
        config.network.node.push(nic("10.0.0.5", "node1.example.com"));
        config.network.iscsi_initiator.push(IscsiInitiator {
            interface: nic("", "node1-iscsi.example.com"),
            ..Default::default()
        });

        let err = ipam.allocate(&mut config).await.unwrap_err();
        assert!(err.to_string().contains("expected network.iscsiInitiator[0].ip"));

        config.network.iscsi_initiator[0].interface.ip = "10.0.1.5".to_string();
        ipam.allocate_preflight(&config).await.unwrap();
        ipam.discover(&mut config).await.unwrap();
        ipam.release(&config).await.unwrap();
    }

    #[test]
    fn test_infoblox_not_implemented() {
        let err = ipam_provider(IpamProvider::Infoblox).err().unwrap();
        assert_eq!(err.to_string(), "Not implemented: IPAM provider Infoblox is not implemented");
        assert!(ipam_provider(IpamProvider::Internal).is_ok());
    }
}
