//! RKE and RKE2 drivers
//!
//! Both flavours manage the node through the downstream API server. They
//! differ in the control-plane role label, in whether a missing node is an
//! error, and in which waits are meaningful: RKE1 has no node state tracking
//! and leaves membership removal to the cluster tooling.

use crate::cluster_trait::{ClusterNode, NodeRoles};
use crate::drain::drain_node;
use crate::error::ClusterError;
use crate::kube_api::{
    KubeNodeApi, NodeApi, kube_client, label_is_true, node_host_ip, node_is_ready, node_labels, node_taints,
    set_node_taints, set_unschedulable,
};
use crate::metadata::{merge_taints, update_labels, update_taints};
use crate::retry::{RETRY_WAIT, Retry};
use crate::wait::StateWait;
use node_config::{ClusterApiConfig, DrainInput, Taint};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

const WORKER_LABEL: &str = "node-role.kubernetes.io/worker";
const ETCD_LABEL: &str = "node-role.kubernetes.io/etcd";

/// Which Rancher Kubernetes distribution runs the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KubeFlavor {
    Rke,
    Rke2,
}

impl KubeFlavor {
    fn control_plane_label(self) -> &'static str {
        match self {
            KubeFlavor::Rke => "node-role.kubernetes.io/controlplane",
            KubeFlavor::Rke2 => "node-role.kubernetes.io/control-plane",
        }
    }
}

/// Kube-backed node handle
pub struct KubeNode {
    api: Arc<dyn NodeApi>,
    flavor: KubeFlavor,
    node_name: String,
    roles: NodeRoles,
    drain: DrainInput,
    retry: Retry,
}

impl std::fmt::Debug for KubeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeNode")
            .field("flavor", &self.flavor)
            .field("node_name", &self.node_name)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

impl KubeNode {
    /// Connect to the API server described by `cfg` and locate the node
    ///
    /// # Errors
    ///
    /// Fails if the client cannot be built or the node lookup fails.
    pub async fn connect(
        cfg: &ClusterApiConfig,
        flavor: KubeFlavor,
        node_ip: &str,
        wait_for_node: bool,
    ) -> Result<Self, ClusterError> {
        let client = kube_client(cfg).await?;
        let wait = if wait_for_node && cfg.wait_for_node_timeout > 0 {
            Duration::from_secs(cfg.wait_for_node_timeout)
        } else {
            Duration::ZERO
        };
        Self::with_api(Arc::new(KubeNodeApi::new(client)), flavor, cfg, node_ip, wait).await
    }

    /// Locate the node through an existing [`NodeApi`]
    ///
    /// A non-zero `wait` keeps looking for the node until it registers.
    ///
    /// # Errors
    ///
    /// RKE2 treats a node missing after `wait` as an error; RKE yields an
    /// unregistered handle instead.
    pub async fn with_api(
        api: Arc<dyn NodeApi>,
        flavor: KubeFlavor,
        cfg: &ClusterApiConfig,
        node_ip: &str,
        wait: Duration,
    ) -> Result<Self, ClusterError> {
        let attempts = match flavor {
            KubeFlavor::Rke => 1,
            KubeFlavor::Rke2 => cfg.retries,
        };
        let mut node = Self {
            api,
            flavor,
            node_name: String::new(),
            roles: NodeRoles::default(),
            drain: cfg.drain_input.clone(),
            retry: Retry::new(attempts, RETRY_WAIT),
        };
        let deadline = Instant::now() + wait;
        loop {
            if let Some(name) = node.find_node_name(node_ip).await? {
                node.node_name = name;
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(RETRY_WAIT).await;
        }
        if node.node_name.is_empty() {
            if flavor == KubeFlavor::Rke2 {
                return Err(ClusterError::NotFound(format!("node with IP address {node_ip} not found")));
            }
            return Ok(node);
        }
        let found = node.get_node().await?;
        node.roles = NodeRoles {
            control_plane: label_is_true(&found, flavor.control_plane_label()),
            etcd: label_is_true(&found, ETCD_LABEL),
            worker: label_is_true(&found, WORKER_LABEL),
        };
        debug!("{:?} node {} resolved with roles {:?}", flavor, node.node_name, node.roles);
        Ok(node)
    }

    async fn find_node_name(&self, node_ip: &str) -> Result<Option<String>, ClusterError> {
        let nodes = self.retry.run("list nodes", || self.api.list_nodes()).await?;
        Ok(nodes
            .iter()
            .find(|n| node_host_ip(n) == Some(node_ip))
            .and_then(|n| n.metadata.name.clone()))
    }

    async fn get_node(&self) -> Result<k8s_openapi::api::core::v1::Node, ClusterError> {
        self.retry.run("get node", || self.api.get_node(&self.node_name)).await
    }

    /// Read-modify-replace the node, retrying conflicts and transient errors
    async fn modify_node<F>(&self, what: &str, mut change: F) -> Result<(), ClusterError>
    where
        F: FnMut(&mut k8s_openapi::api::core::v1::Node) + Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match self.api.get_node(&self.node_name).await {
                Ok(mut node) => {
                    change(&mut node);
                    self.api.replace_node(&node).await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.retry.attempts => {
                    warn!("{} on node {} failed (attempt {}): {}", what, self.node_name, attempt, e);
                    sleep(self.retry.wait).await;
                }
                Err(e) => return Err(e.context(what)),
            }
        }
    }

    fn has_node(&self) -> bool {
        !self.node_name.is_empty()
    }

    fn tracks_state(&self) -> bool {
        self.flavor == KubeFlavor::Rke2 && self.has_node()
    }
}

#[async_trait::async_trait]
impl ClusterNode for KubeNode {
    fn node_id(&self) -> &str {
        &self.node_name
    }

    fn is_control_plane(&self) -> bool {
        self.roles.control_plane
    }

    fn is_etcd(&self) -> bool {
        self.roles.etcd
    }

    fn is_worker(&self) -> bool {
        self.roles.worker
    }

    fn is_rke1(&self) -> bool {
        self.flavor == KubeFlavor::Rke
    }

    fn is_rke2(&self) -> bool {
        self.flavor == KubeFlavor::Rke2
    }

    async fn cluster_wait_for_state(&self, _states: &[&str], _timeout: Duration) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn cluster_wait_for_transitioning(&self, _timeout: Duration) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_get_state(&self) -> Result<String, ClusterError> {
        if !self.tracks_state() {
            return Ok(String::new());
        }
        let node = self.get_node().await?;
        Ok(if node_is_ready(&node) { "active" } else { "notReady" }.to_string())
    }

    async fn node_wait_for_state(&self, states: &[&str], timeout: Duration) -> Result<(), ClusterError> {
        if !self.tracks_state() {
            return Ok(());
        }
        StateWait::node(RETRY_WAIT)
            .run("node", states, timeout, || self.node_get_state())
            .await
            .map(|_| ())
    }

    async fn node_wait_until_deleted(&self, _timeout: Duration) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_wait_for_grace_period(&self, grace: Duration) -> Result<(), ClusterError> {
        if !self.tracks_state() {
            return Ok(());
        }
        let deadline = Instant::now() + grace;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            self.node_wait_for_state(&["active"], remaining).await?;
            sleep(RETRY_WAIT).await;
        }
    }

    async fn node_cordon(&self) -> Result<(), ClusterError> {
        if !self.has_node() {
            return Ok(());
        }
        self.modify_node("node cordon", |node| set_unschedulable(node, true)).await?;
        info!("Cordoned node {}", self.node_name);
        Ok(())
    }

    async fn node_cordon_drain(&self) -> Result<(), ClusterError> {
        if !self.has_node() {
            return Ok(());
        }
        self.node_cordon().await?;
        let drain_timeout = Duration::from_secs(self.drain.timeout);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            match drain_node(self.api.as_ref(), &self.node_name, &self.drain).await {
                Ok(()) => return Ok(()),
                Err(e) if started.elapsed() >= drain_timeout => {
                    warn!("Drain of node {} exceeded {}s, continuing: {}", self.node_name, self.drain.timeout, e);
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < self.retry.attempts => {
                    warn!("Drain of node {} failed (attempt {}): {}", self.node_name, attempt, e);
                    sleep(self.retry.wait).await;
                }
                Err(e) => return Err(e.context("node drain")),
            }
        }
    }

    async fn node_uncordon(&self) -> Result<(), ClusterError> {
        if !self.has_node() {
            return Ok(());
        }
        self.modify_node("node uncordon", |node| set_unschedulable(node, false)).await?;
        info!("Uncordoned node {}", self.node_name);
        Ok(())
    }

    async fn node_delete(&self) -> Result<(), ClusterError> {
        if self.flavor == KubeFlavor::Rke || !self.has_node() {
            return Ok(());
        }
        let result = self
            .retry
            .run("node delete", || async {
                match self.api.get_node(&self.node_name).await {
                    Ok(_) => self.api.delete_node(&self.node_name).await,
                    Err(e) => Err(e),
                }
            })
            .await;
        match result {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    async fn node_force_delete(&self) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_set_annotations_labels_taints(
        &self,
        annotations: &BTreeMap<String, String>,
        labels: &BTreeMap<String, String>,
        taints: &[Taint],
    ) -> Result<(), ClusterError> {
        if !self.has_node() {
            return Ok(());
        }
        self.modify_node("node set annotations", |node| {
            node.metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
            node.metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
            let mut merged = node_taints(node);
            merge_taints(&mut merged, taints);
            set_node_taints(node, &merged);
        })
        .await
    }

    async fn node_get_labels(&self) -> Result<Option<BTreeMap<String, String>>, ClusterError> {
        if !self.has_node() {
            return Ok(None);
        }
        Ok(Some(node_labels(&self.get_node().await?)))
    }

    async fn node_update_labels(
        &self,
        old: &BTreeMap<String, String>,
        new: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        if !self.has_node() {
            return Ok(());
        }
        self.modify_node("node update labels", |node| {
            update_labels(node.metadata.labels.get_or_insert_with(BTreeMap::new), old, new);
        })
        .await
    }

    async fn node_get_taints(&self) -> Result<Option<Vec<Taint>>, ClusterError> {
        if !self.has_node() {
            return Ok(None);
        }
        Ok(Some(node_taints(&self.get_node().await?)))
    }

    async fn node_update_taints(&self, old: &[Taint], new: &[Taint]) -> Result<(), ClusterError> {
        if !self.has_node() {
            return Ok(());
        }
        self.modify_node("node update taints", |node| {
            let updated = update_taints(&node_taints(node), old, new);
            set_node_taints(node, &updated);
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockNodeApi;
    use k8s_openapi::api::core::v1::{Node, Pod};
    use node_config::ClusterProvider;
    use serde_json::json;
    use std::sync::Mutex;

    fn kube_node(name: &str, ip: &str, labels: serde_json::Value) -> Node {
        serde_json::from_value(json!({
            "metadata": {"name": name, "labels": labels},
            "spec": {"taints": [{"key": "dedicated", "value": "db", "effect": "NoSchedule"}]},
            "status": {
                "addresses": [{"type": "Hostname", "address": name}, {"type": "InternalIP", "address": ip}],
                "conditions": [{"type": "Ready", "status": "True"}]
            }
        }))
        .unwrap()
    }

    fn replica_pod(name: &str, node: &str) -> Pod {
        serde_json::from_value(json!({
            "metadata": {
                "name": name,
                "namespace": "apps",
                "ownerReferences": [{"apiVersion": "apps/v1", "kind": "ReplicaSet", "name": "web", "uid": "1"}]
            },
            "spec": {"nodeName": node, "containers": [{"name": "web"}]}
        }))
        .unwrap()
    }

    fn cfg(provider: ClusterProvider) -> ClusterApiConfig {
        ClusterApiConfig {
            enabled: true,
            provider,
            ..ClusterApiConfig::default()
        }
    }

    fn api() -> (Arc<Mutex<Vec<String>>>, MockNodeApi) {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let api = MockNodeApi::new(Arc::clone(&journal));
        api.add_node(kube_node(
            "node1",
            "10.0.0.11",
            json!({
                "node-role.kubernetes.io/control-plane": "true",
                "node-role.kubernetes.io/etcd": "true",
                "zone": "a"
            }),
        ));
        api.add_node(kube_node("node2", "10.0.0.12", json!({"node-role.kubernetes.io/worker": "true"})));
        (journal, api)
    }

    #[tokio::test(start_paused = true)]
    async fn test_roles_from_flavour_labels() {
        let (_, api) = api();
        let api = Arc::new(api);
        let rke2 = KubeNode::with_api(api.clone(), KubeFlavor::Rke2, &cfg(ClusterProvider::Rke2), "10.0.0.11", Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(rke2.node_id(), "node1");
        assert!(rke2.is_control_plane() && rke2.is_etcd() && !rke2.is_worker());

        // RKE1 uses the `controlplane` label
        let rke = KubeNode::with_api(api, KubeFlavor::Rke, &cfg(ClusterProvider::Rke), "10.0.0.11", Duration::ZERO)
            .await
            .unwrap();
        assert!(!rke.is_control_plane() && rke.is_etcd());
        assert!(rke.is_rke1() && !rke.is_rke2());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_node() {
        let (journal, api) = api();
        let api = Arc::new(api);
        let err = KubeNode::with_api(api.clone(), KubeFlavor::Rke2, &cfg(ClusterProvider::Rke2), "10.0.0.99", Duration::ZERO)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("10.0.0.99"));

        let rke = KubeNode::with_api(api, KubeFlavor::Rke, &cfg(ClusterProvider::Rke), "10.0.0.99", Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(rke.node_id(), "");
        journal.lock().unwrap().clear();
        rke.node_cordon_drain().await.unwrap();
        rke.node_update_labels(&BTreeMap::new(), &BTreeMap::from([("a".to_string(), "b".to_string())]))
            .await
            .unwrap();
        assert_eq!(rke.node_get_labels().await.unwrap(), None);
        assert!(journal.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cordon_drain_evicts_and_uncordon_restores() {
        let (journal, api) = api();
        api.add_pod(replica_pod("web-1", "node2"));
        api.add_pod(replica_pod("web-2", "node1"));
        let api = Arc::new(api);
        let node = KubeNode::with_api(api.clone(), KubeFlavor::Rke2, &cfg(ClusterProvider::Rke2), "10.0.0.12", Duration::ZERO)
            .await
            .unwrap();

        node.node_cordon_drain().await.unwrap();
        let cordoned = api.node("node2").unwrap();
        assert_eq!(cordoned.spec.unwrap().unschedulable, Some(true));
        let remaining: Vec<_> = api.pods().iter().filter_map(|p| p.metadata.name.clone()).collect();
        assert_eq!(remaining, vec!["web-2"]);
        assert!(journal.lock().unwrap().contains(&"kube.evict_pod(apps/web-1)".to_string()));

        node.node_uncordon().await.unwrap();
        assert_eq!(api.node("node2").unwrap().spec.unwrap().unschedulable, Some(false));
        assert_eq!(node.node_get_state().await.unwrap(), "active");
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_wait_rides_out_reregistration() {
        let (_, api) = api();
        let api = Arc::new(api);
        let node = KubeNode::with_api(api.clone(), KubeFlavor::Rke2, &cfg(ClusterProvider::Rke2), "10.0.0.11", Duration::ZERO)
            .await
            .unwrap();
        node.node_delete().await.unwrap();
        assert!(api.node("node1").is_none());

        let registrar = Arc::clone(&api);
        let rejoin = tokio::spawn(async move {
            sleep(Duration::from_secs(20)).await;
            registrar.add_node(kube_node("node1", "10.0.0.11", json!({"node-role.kubernetes.io/etcd": "true"})));
        });

        node.node_wait_for_state(&["active"], Duration::from_secs(600)).await.unwrap();
        rejoin.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_wait_gives_up_on_missing_node() {
        let (_, api) = api();
        let api = Arc::new(api);
        let node = KubeNode::with_api(api.clone(), KubeFlavor::Rke2, &cfg(ClusterProvider::Rke2), "10.0.0.11", Duration::ZERO)
            .await
            .unwrap();
        node.node_delete().await.unwrap();

        let err = node
            .node_wait_for_state(&["active"], Duration::from_secs(600))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_modify_retries_conflicts() {
        let (_, api) = api();
        api.fail_next(
            "replace_node",
            "the object has been modified; please apply your changes to the latest version and try again",
            2,
        );
        let api = Arc::new(api);
        let node = KubeNode::with_api(api.clone(), KubeFlavor::Rke2, &cfg(ClusterProvider::Rke2), "10.0.0.11", Duration::ZERO)
            .await
            .unwrap();
        node.node_cordon().await.unwrap();
        assert_eq!(api.node("node1").unwrap().spec.unwrap().unschedulable, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_labels_and_taints() {
        let (_, api) = api();
        let api = Arc::new(api);
        let node = KubeNode::with_api(api.clone(), KubeFlavor::Rke2, &cfg(ClusterProvider::Rke2), "10.0.0.11", Duration::ZERO)
            .await
            .unwrap();

        node.node_update_labels(
            &BTreeMap::from([("zone".to_string(), "a".to_string())]),
            &BTreeMap::from([("rack".to_string(), "r7".to_string())]),
        )
        .await
        .unwrap();
        let labels = node.node_get_labels().await.unwrap().unwrap();
        assert!(!labels.contains_key("zone"));
        assert_eq!(labels.get("rack").map(String::as_str), Some("r7"));

        let dedicated = Taint {
            key: "dedicated".to_string(),
            value: "db".to_string(),
            effect: "NoSchedule".to_string(),
        };
        let gpu = Taint {
            key: "gpu".to_string(),
            value: String::new(),
            effect: "NoExecute".to_string(),
        };
        node.node_update_taints(std::slice::from_ref(&dedicated), std::slice::from_ref(&gpu))
            .await
            .unwrap();
        assert_eq!(node.node_get_taints().await.unwrap(), Some(vec![gpu.clone()]));

        node.node_set_annotations_labels_taints(
            &BTreeMap::from([("lifecycle/owner".to_string(), "provider".to_string())]),
            &BTreeMap::new(),
            &[gpu.clone(), dedicated.clone()],
        )
        .await
        .unwrap();
        assert_eq!(node.node_get_taints().await.unwrap(), Some(vec![gpu, dedicated]));
        let stored = api.node("node1").unwrap();
        assert_eq!(
            stored.metadata.annotations.unwrap().get("lifecycle/owner").map(String::as_str),
            Some("provider")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete() {
        let (journal, api) = api();
        let api = Arc::new(api);
        let rke = KubeNode::with_api(api.clone(), KubeFlavor::Rke, &cfg(ClusterProvider::Rke), "10.0.0.12", Duration::ZERO)
            .await
            .unwrap();
        rke.node_delete().await.unwrap();
        assert!(api.node("node2").is_some());

        let rke2 = KubeNode::with_api(api.clone(), KubeFlavor::Rke2, &cfg(ClusterProvider::Rke2), "10.0.0.12", Duration::ZERO)
            .await
            .unwrap();
        rke2.node_delete().await.unwrap();
        assert!(api.node("node2").is_none());
        // Already gone
        rke2.node_delete().await.unwrap();
        assert_eq!(
            journal
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.starts_with("kube.delete_node"))
                .count(),
            1
        );
    }
}
