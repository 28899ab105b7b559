//! Engine context
//!
//! Everything an engine entry point needs, passed explicitly: provider
//! settings, the four fabric clients, the cluster connector, the update gate
//! and the node-config cache.

use crate::error::EngineError;
use crate::gate::UpdateGate;
use cluster_node::{ClusterError, ClusterNode, connect_cluster_node};
use fabric_clients::{
    ComputeClient, IpamClient, OpenSshShell, RemoteShell, StorageClient, ipam_provider,
};
use node_config::{ClusterApiConfig, NodeConfig, NodeSpec, ProviderConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Opens cluster handles for nodes
#[async_trait::async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Handle for the node at `node_ip`; `wait_for_node` waits for registration
    async fn connect(
        &self,
        config: &NodeConfig,
        wait_for_node: bool,
    ) -> Result<Box<dyn ClusterNode>, ClusterError>;
}

/// Connector selecting the driver from the provider's cluster API settings
#[derive(Debug, Clone, Default)]
pub struct ApiClusterConnector {
    cluster_api: Option<ClusterApiConfig>,
}

impl ApiClusterConnector {
    #[must_use]
    pub fn new(cluster_api: Option<ClusterApiConfig>) -> Self {
        Self { cluster_api }
    }
}

#[async_trait::async_trait]
impl ClusterConnector for ApiClusterConnector {
    async fn connect(
        &self,
        config: &NodeConfig,
        wait_for_node: bool,
    ) -> Result<Box<dyn ClusterNode>, ClusterError> {
        connect_cluster_node(
            self.cluster_api.as_ref(),
            config.primary_ip().unwrap_or_default(),
            &config.compute.host_name,
            wait_for_node,
        )
        .await
    }
}

#[derive(Debug, Clone)]
struct CachedConfig {
    spec: NodeSpec,
    config: NodeConfig,
}

/// Shared state for engine operations
pub struct EngineContext {
    pub provider: ProviderConfig,
    /// Cluster API settings with the token decrypted
    pub cluster_api: Option<ClusterApiConfig>,
    pub compute: Arc<dyn ComputeClient>,
    pub storage: Arc<dyn StorageClient>,
    pub ipam: Arc<dyn IpamClient>,
    pub shell: Arc<dyn RemoteShell>,
    pub cluster: Arc<dyn ClusterConnector>,
    pub gate: UpdateGate,
    cache: Mutex<HashMap<String, CachedConfig>>,
}

impl EngineContext {
    /// Assemble a context from explicit clients
    ///
    /// # Errors
    ///
    /// Fails when the cluster API token cannot be decrypted.
    pub fn new(
        provider: ProviderConfig,
        compute: Arc<dyn ComputeClient>,
        storage: Arc<dyn StorageClient>,
        ipam: Arc<dyn IpamClient>,
        shell: Arc<dyn RemoteShell>,
        cluster: Arc<dyn ClusterConnector>,
    ) -> Result<Self, EngineError> {
        let cluster_api = provider.cluster_api_resolved()?;
        let gate = UpdateGate::new(provider.synchronized_updates);
        Ok(Self {
            provider,
            cluster_api,
            compute,
            storage,
            ipam,
            shell,
            cluster,
            gate,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Context using the built-in IPAM provider, the OpenSSH shell and the
    /// configured cluster driver
    ///
    /// # Errors
    ///
    /// Fails when the IPAM provider has no built-in implementation or the
    /// cluster API token cannot be decrypted.
    pub fn with_defaults(
        provider: ProviderConfig,
        compute: Arc<dyn ComputeClient>,
        storage: Arc<dyn StorageClient>,
    ) -> Result<Self, EngineError> {
        let ipam = ipam_provider(provider.ipam.provider)?;
        let cluster = Arc::new(ApiClusterConnector::new(provider.cluster_api_resolved()?));
        Self::new(provider, compute, storage, ipam, Arc::new(OpenSshShell::new()), cluster)
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, CachedConfig>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Defaulted node configuration for `spec`, reusing the cached one when
    /// the desired state is unchanged
    ///
    /// # Errors
    ///
    /// Fails when defaulting or secret decryption fails.
    pub fn node_config(&self, spec: &NodeSpec) -> Result<NodeConfig, EngineError> {
        let hostname = spec.hostname();
        if let Some(cached) = self.cache().get(hostname).filter(|c| c.spec == *spec) {
            debug!("Using cached node configuration for {}", hostname);
            return Ok(cached.config.clone());
        }
        let config = spec.to_node_config(&self.provider)?;
        self.cache().insert(
            hostname.to_string(),
            CachedConfig {
                spec: spec.clone(),
                config: config.clone(),
            },
        );
        Ok(config)
    }

    /// Drop the cached configuration of a removed node
    pub fn forget(&self, hostname: &str) {
        self.cache().remove(hostname);
    }

    #[must_use]
    pub fn is_cached(&self, hostname: &str) -> bool {
        self.cache().contains_key(hostname)
    }

    /// Timeout waiting for a node to register after boot, seconds
    #[must_use]
    pub fn wait_for_node_timeout(&self) -> u64 {
        self.cluster_api.as_ref().map_or(0, |c| c.wait_for_node_timeout)
    }

    /// Settle delay after a node becomes active, seconds
    #[must_use]
    pub fn node_grace_timeout(&self) -> u64 {
        self.cluster_api.as_ref().map_or(0, |c| c.node_grace_timeout)
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockConnector;

#[cfg(any(test, feature = "test-util"))]
mod mock {
    use super::ClusterConnector;
    use cluster_node::{ClusterError, ClusterNode, MockClusterNode};
    use node_config::NodeConfig;
    use std::sync::{Arc, Mutex};

    /// Connector handing out clones of one scripted node
    #[derive(Debug, Clone)]
    pub struct MockConnector {
        node: MockClusterNode,
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl MockConnector {
        #[must_use]
        pub fn new(node: MockClusterNode, journal: Arc<Mutex<Vec<String>>>) -> Self {
            Self { node, journal }
        }

        #[must_use]
        pub fn node(&self) -> &MockClusterNode {
            &self.node
        }
    }

    #[async_trait::async_trait]
    impl ClusterConnector for MockConnector {
        async fn connect(
            &self,
            _config: &NodeConfig,
            wait_for_node: bool,
        ) -> Result<Box<dyn ClusterNode>, ClusterError> {
            self.journal
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(format!("cluster.connect(wait={wait_for_node})"));
            Ok(Box::new(self.node.clone()))
        }
    }
}
