//! Mock IPAM

use super::{CallJournal, Failures, lock};
use crate::error::FabricError;
use crate::fabric_trait::IpamClient;
use node_config::NodeConfig;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// In-memory IPAM tracking FQDN -> IP bindings
#[derive(Debug, Clone)]
pub struct MockIpam {
    bindings: Arc<Mutex<BTreeMap<String, String>>>,
    journal: CallJournal,
    failures: Failures,
}

impl MockIpam {
    /// Create a mock recording into `journal`
    #[must_use]
    pub fn new(journal: CallJournal) -> Self {
        Self {
            bindings: Arc::new(Mutex::new(BTreeMap::new())),
            journal,
            failures: Failures::default(),
        }
    }

    /// Current FQDN -> IP bindings
    #[must_use]
    pub fn bindings(&self) -> BTreeMap<String, String> {
        lock(&self.bindings).clone()
    }

    /// Fail every call to `method` with `message`
    pub fn fail_on(&self, method: &str, message: &str) {
        self.failures.set(method, message);
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    fn enter(&self, method: &str) -> Result<(), FabricError> {
        self.journal.record(format!("ipam.{method}"));
        self.failures.check(method, FabricError::Ipam)
    }
}

#[async_trait::async_trait]
impl IpamClient for MockIpam {
    async fn allocate_preflight(&self, _config: &NodeConfig) -> Result<(), FabricError> {
        self.enter("allocate_preflight")
    }

    async fn allocate(&self, config: &mut NodeConfig) -> Result<(), FabricError> {
        self.enter("allocate")?;
        let mut bindings = lock(&self.bindings);
        let interfaces = config
            .network
            .node
            .iter()
            .chain(config.network.iscsi_initiator.iter().map(|i| &i.interface));
        for nic in interfaces.filter(|nic| !nic.fqdn.is_empty()) {
            bindings.insert(nic.fqdn.clone(), nic.ip.clone());
        }
        Ok(())
    }

    async fn assign(&self, ip: &str, fqdn: &str) -> Result<(), FabricError> {
        self.enter("assign")?;
        lock(&self.bindings).insert(fqdn.to_string(), ip.to_string());
        Ok(())
    }

    async fn discover(&self, _config: &mut NodeConfig) -> Result<(), FabricError> {
        self.failures.check("discover", FabricError::Ipam)
    }

    async fn release(&self, config: &NodeConfig) -> Result<(), FabricError> {
        self.enter("release")?;
        let mut bindings = lock(&self.bindings);
        for nic in &config.network.node {
            bindings.remove(&nic.fqdn);
        }
        for initiator in &config.network.iscsi_initiator {
            bindings.remove(&initiator.interface.fqdn);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_config::NetworkInterface;

    #[tokio::test]
    async fn test_allocate_and_release() {
        let ipam = MockIpam::new(CallJournal::new());
        let mut config = NodeConfig::default();
        config.network.node.push(NetworkInterface {
            ip: "10.0.0.5".to_string(),
            fqdn: "node1.example.com".to_string(),
            ..Default::default()
        });
        ipam.allocate(&mut config).await.unwrap();
        assert_eq!(ipam.bindings()["node1.example.com"], "10.0.0.5");
        ipam.release(&config).await.unwrap();
        assert!(ipam.bindings().is_empty());
    }
}
