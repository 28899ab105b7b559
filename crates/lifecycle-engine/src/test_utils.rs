//! Test utilities for unit testing the reconciler
//!
//! This module provides a fully mocked fabric sharing one call journal and
//! helpers for building desired node states.

#[cfg(test)]
use crate::context::{EngineContext, MockConnector};
#[cfg(test)]
use crate::reconciler::Reconciler;
#[cfg(test)]
use cluster_node::MockClusterNode;
#[cfg(test)]
use fabric_clients::{CallJournal, MockCompute, MockIpam, MockShell, MockStorage, SshTarget};
#[cfg(test)]
use node_config::{
    IscsiInitiator, Network, NetworkInterface, NodeConfig, NodeSpec, PowerState, ProviderConfig,
    SnapshotSpec,
};
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
pub const HOSTNAME: &str = "node1";

/// Interface with an address and subnet
#[cfg(test)]
pub fn nic(name: &str, ip: &str, fqdn: &str, subnet: &str) -> NetworkInterface {
    NetworkInterface {
        name: name.to_string(),
        ip: ip.to_string(),
        fqdn: fqdn.to_string(),
        subnet: subnet.to_string(),
        ..Default::default()
    }
}

/// Desired state for `node1`: one node NIC, two initiators, SSH enabled
#[cfg(test)]
pub fn node_spec() -> NodeSpec {
    let mut spec = NodeSpec::default();
    spec.compute.hostname = HOSTNAME.to_string();
    spec.compute.sp_org = "org-root/org-k8s".to_string();
    spec.compute.sp_template = "org-root/org-k8s/ls-k8s".to_string();
    spec.compute.safe_removal = false;
    spec.compute.ssh_user = "ubuntu".to_string();
    spec.compute.ssh_private_key = "PRIVATE KEY".to_string();
    spec.compute.wait_for_ssh_timeout = 600;
    spec.storage.svm_name = "svm-k8s".to_string();
    spec.storage.boot_lun.size = 20;
    spec.storage.boot_lun.os_image = "ubuntu-22.04".to_string();
    spec.storage.seed_lun.seed_template = "seeds/ubuntu.tmpl".to_string();
    spec.network = Network {
        node: vec![nic("eth2", "192.168.1.10", "node1.example.com", "192.168.1.0/24")],
        iscsi_initiator: vec![
            IscsiInitiator {
                interface: nic("iscsi0", "192.168.2.10", "node1-i0.example.com", "192.168.2.0/24"),
                ..Default::default()
            },
            IscsiInitiator {
                interface: nic("iscsi1", "192.168.3.10", "node1-i1.example.com", "192.168.3.0/24"),
                ..Default::default()
            },
        ],
        nvme_host: Vec::new(),
    };
    spec
}

#[cfg(test)]
pub fn snapshot(name: &str, fsfreeze: bool) -> SnapshotSpec {
    SnapshotSpec {
        name: name.to_string(),
        fsfreeze,
    }
}

/// Engine wired to in-memory clients
#[cfg(test)]
pub struct TestFabric {
    pub journal: CallJournal,
    pub compute: MockCompute,
    pub storage: MockStorage,
    pub ipam: MockIpam,
    pub shell: MockShell,
    pub node: MockClusterNode,
    pub ctx: Arc<EngineContext>,
}

#[cfg(test)]
impl TestFabric {
    pub fn new() -> Self {
        Self::with_provider(ProviderConfig::default())
    }

    pub fn synchronized() -> Self {
        Self::with_provider(ProviderConfig {
            synchronized_updates: true,
            ..ProviderConfig::default()
        })
    }

    pub fn with_provider(provider: ProviderConfig) -> Self {
        let journal = CallJournal::new();
        let compute = MockCompute::new(journal.clone());
        let storage = MockStorage::new(journal.clone());
        let ipam = MockIpam::new(journal.clone());
        let shell = MockShell::new(journal.clone());
        let node = MockClusterNode::new(journal.handle());
        let connector = MockConnector::new(node.clone(), journal.handle());
        let ctx = EngineContext::new(
            provider,
            Arc::new(compute.clone()),
            Arc::new(storage.clone()),
            Arc::new(ipam.clone()),
            Arc::new(shell.clone()),
            Arc::new(connector),
        )
        .unwrap();
        Self {
            journal,
            compute,
            storage,
            ipam,
            shell,
            node,
            ctx: Arc::new(ctx),
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(Arc::clone(&self.ctx))
    }

    /// Server and volume for `node_spec()` exist; the journal is cleared
    pub fn existing_node(&self, power: PowerState) -> NodeConfig {
        let mut config = self.ctx.node_config(&node_spec()).unwrap();
        self.compute.add_server(HOSTNAME, power);
        self.storage.add_volume(&config);
        config.compute.sp_dn = format!("org-root/ls-{HOSTNAME}");
        config.compute.power_state = power;
        self.journal.clear();
        config
    }

    pub fn ssh_target(&self) -> SshTarget {
        SshTarget::new("192.168.1.10", "ubuntu", "PRIVATE KEY")
    }

    /// Calls recorded so far, excluding cluster connects
    pub fn calls(&self) -> Vec<String> {
        self.journal
            .calls()
            .into_iter()
            .filter(|c| !c.starts_with("cluster.connect"))
            .collect()
    }

    /// Index of the first call equal to `call`, panicking if absent
    pub fn pos(&self, call: &str) -> usize {
        let calls = self.journal.calls();
        calls
            .iter()
            .position(|c| c == call)
            .unwrap_or_else(|| panic!("{call} not called; calls: {calls:?}"))
    }
}
