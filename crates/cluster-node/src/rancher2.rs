//! Rancher 2 management API driver
//!
//! Talks to the `/v3` management API. Nodes are located by cluster id and
//! primary IP address; cordon, drain and uncordon are issued as node actions
//! once the cluster reports `active`.

use crate::cluster_trait::{ClusterNode, NodeRoles};
use crate::error::ClusterError;
use crate::http::{Auth, RestClient, TlsOptions};
use crate::metadata::{merge_taints, update_labels, update_taints};
use crate::wait::StateWait;
use node_config::{ClusterApiConfig, DrainInput, Taint};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Timeout for the cluster to settle before node actions
pub const CLUSTER_STATE_TIMEOUT: Duration = Duration::from_secs(1800);
/// Timeout for node state transitions
pub const NODE_STATE_TIMEOUT: Duration = Duration::from_secs(600);

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const STABILIZE_WAIT: Duration = Duration::from_secs(3);
const STABILIZE_MAX: u32 = 10;
const CLUSTER_SETTLE: u32 = 10;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RancherCluster {
    state: String,
    transitioning: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct Collection<T> {
    data: Vec<T>,
}

/// Node object of the management API; unknown fields are carried through updates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RancherNode {
    id: String,
    state: String,
    control_plane: bool,
    etcd: bool,
    worker: bool,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    taints: Vec<Taint>,
    actions: BTreeMap<String, String>,
    #[serde(flatten)]
    other: serde_json::Map<String, serde_json::Value>,
}

impl RancherNode {
    fn roles(&self) -> NodeRoles {
        NodeRoles {
            control_plane: self.control_plane,
            etcd: self.etcd,
            worker: self.worker,
        }
    }
}

/// Strip any path from the API URL
fn root_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix("/v3").unwrap_or(trimmed);
    match trimmed.find("://") {
        Some(scheme_end) => match trimmed[scheme_end + 3..].find('/') {
            Some(path_start) => trimmed[..scheme_end + 3 + path_start].to_string(),
            None => trimmed.to_string(),
        },
        None => trimmed.to_string(),
    }
}

/// Rancher 2 node handle
#[derive(Debug)]
pub struct Rancher2Node {
    client: RestClient,
    cluster_id: String,
    node_ip: String,
    node_id: String,
    roles: NodeRoles,
    drain: DrainInput,
    retries: u32,
}

impl Rancher2Node {
    /// Connect, locate the node by IP and resolve its roles
    ///
    /// With `wait_for_node` and a non-zero `wait_for_node_timeout`, waits for
    /// the cluster to become active and the node to register and go active.
    ///
    /// # Errors
    ///
    /// Fails if the API never answers its readiness probe or a lookup fails.
    pub async fn connect(cfg: &ClusterApiConfig, node_ip: &str, wait_for_node: bool) -> Result<Self, ClusterError> {
        let root = root_url(&cfg.api_url);
        let client = RestClient::new(
            &format!("{root}/v3"),
            Auth::Bearer(cfg.token_key.clone()),
            &TlsOptions {
                insecure: cfg.insecure,
                ca_data: cfg.server_ca_data.clone(),
            },
        )?;
        let mut node = Self {
            client,
            cluster_id: cfg.cluster_id.clone(),
            node_ip: node_ip.to_string(),
            node_id: String::new(),
            roles: NodeRoles::default(),
            drain: cfg.drain_input.clone(),
            retries: cfg.retries.max(1),
        };
        node.wait_ready().await?;
        if let Some(found) = node.find_node(node_ip).await? {
            node.node_id = found.id.clone();
            node.roles = found.roles();
        }
        if wait_for_node && cfg.wait_for_node_timeout > 0 {
            node.wait_for_registration(node_ip, Duration::from_secs(cfg.wait_for_node_timeout))
                .await?;
        }
        debug!("Rancher node {} resolved with roles {:?}", node.node_id, node.roles);
        Ok(node)
    }

    async fn wait_for_registration(&mut self, node_ip: &str, timeout: Duration) -> Result<(), ClusterError> {
        let deadline = Instant::now() + timeout;
        self.cluster_wait_for_state(&["active"], timeout).await?;
        while Instant::now() < deadline {
            match self.find_node(node_ip).await {
                Ok(Some(found)) => {
                    self.node_id = found.id;
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    self.node_wait_for_state(&["active"], remaining).await?;
                    self.roles = self.get_node().await?.roles();
                    return Ok(());
                }
                Ok(None) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            sleep(Duration::from_secs(1)).await;
        }
        Ok(())
    }

    /// Probe `/ping` until it answers `pong` on consecutive polls
    async fn wait_ready(&self) -> Result<(), ClusterError> {
        let ping = format!("{}/ping", root_url(self.client.base_url()));
        let mut last_error = String::new();
        for _ in 0..self.retries {
            let mut stable = true;
            for _ in 0..STABILIZE_MAX {
                match self.client.get_text(&ping).await {
                    Ok(body) if body.trim() == "pong" => sleep(STABILIZE_WAIT).await,
                    Ok(body) => {
                        last_error = format!("unexpected ping response: {body}");
                        stable = false;
                        break;
                    }
                    Err(e) => {
                        last_error = e.to_string();
                        stable = false;
                        break;
                    }
                }
            }
            if stable {
                return Ok(());
            }
            sleep(POLL_INTERVAL).await;
        }
        Err(ClusterError::Connect(format!(
            "rancher is not ready after {} attempts in {} seconds, last error: {}",
            self.retries,
            POLL_INTERVAL.as_secs() * u64::from(self.retries),
            last_error
        )))
    }

    /// GET with one readiness-probed retry
    async fn get_resilient<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ClusterError> {
        match self.client.get(path).await {
            Ok(value) => Ok(value),
            Err(e) if e.is_not_found() => Err(e),
            Err(e) => {
                warn!("GET {} failed, probing rancher readiness: {}", path, e);
                self.wait_ready().await?;
                self.client.get(path).await
            }
        }
    }

    async fn find_node(&self, node_ip: &str) -> Result<Option<RancherNode>, ClusterError> {
        let clusters: Collection<serde_json::Value> =
            self.get_resilient(&format!("/clusters?id={}", self.cluster_id)).await?;
        if clusters.data.is_empty() {
            return Ok(None);
        }
        let nodes: Collection<RancherNode> = self
            .get_resilient(&format!("/nodes?clusterId={}&ipAddress={}", self.cluster_id, node_ip))
            .await?;
        Ok(nodes.data.into_iter().next())
    }

    async fn get_node(&self) -> Result<RancherNode, ClusterError> {
        self.get_resilient(&format!("/nodes/{}", self.node_id)).await
    }

    async fn get_cluster(&self) -> Result<RancherCluster, ClusterError> {
        self.get_resilient(&format!("/clusters/{}", self.cluster_id))
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    ClusterError::NotFound(format!("cluster {} not found", self.cluster_id))
                } else {
                    e
                }
            })
    }

    async fn put_node(&self, node: &RancherNode) -> Result<(), ClusterError> {
        let body = serde_json::to_value(node)?;
        let _: serde_json::Value = self.client.put(&format!("/nodes/{}", self.node_id), &body).await?;
        Ok(())
    }

    async fn action(&self, node: &RancherNode, action: &str, body: serde_json::Value) -> Result<bool, ClusterError> {
        let Some(url) = node.actions.get(action) else {
            return Ok(false);
        };
        self.client.post(url, &body).await?;
        Ok(true)
    }

    fn drain_body(&self) -> serde_json::Value {
        json!({
            "deleteLocalData": self.drain.delete_local_data,
            "force": self.drain.force,
            "gracePeriod": self.drain.grace_period,
            "ignoreDaemonSets": self.drain.ignore_daemon_sets,
            "timeout": self.drain.timeout,
        })
    }

    fn has_node(&self) -> bool {
        !self.node_id.is_empty()
    }
}

#[async_trait::async_trait]
impl ClusterNode for Rancher2Node {
    fn node_id(&self) -> &str {
        &self.node_id
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

    async fn node_refresh_id(&mut self) -> Result<(), ClusterError> {
        let Some(found) = self.find_node(&self.node_ip).await? else {
            return Err(ClusterError::NotFound(format!(
                "node with IP address {} not found",
                self.node_ip
            )));
        };
        if found.id != self.node_id {
            info!("Rancher node {} re-registered as {}", self.node_id, found.id);
        }
        self.roles = found.roles();
        self.node_id = found.id;
        Ok(())
    }

    async fn cluster_wait_for_state(&self, states: &[&str], timeout: Duration) -> Result<(), ClusterError> {
        StateWait::every(POLL_INTERVAL)
            .settle(CLUSTER_SETTLE)
            .accept_last_at_deadline()
            .run("cluster", states, timeout, || async {
                self.get_cluster().await.map(|cluster| cluster.state)
            })
            .await
            .map(|_| ())
    }

    async fn cluster_wait_for_transitioning(&self, timeout: Duration) -> Result<(), ClusterError> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let cluster = self.get_cluster().await?;
            if matches!(cluster.state.as_str(), "updating" | "upgrading")
                && matches!(cluster.transitioning.as_str(), "yes" | "error")
            {
                return Ok(());
            }
            sleep(POLL_INTERVAL).await;
        }
        Err(ClusterError::Timeout(format!(
            "wait for cluster transitioning exceeded timeout={}",
            timeout.as_secs()
        )))
    }

    async fn node_get_state(&self) -> Result<String, ClusterError> {
        if !self.has_node() {
            return Ok(String::new());
        }
        Ok(self.get_node().await?.state)
    }

    async fn node_wait_for_state(&self, states: &[&str], timeout: Duration) -> Result<(), ClusterError> {
        if !self.has_node() {
            return Ok(());
        }
        StateWait::node(POLL_INTERVAL)
            .run("node", states, timeout, || async { self.get_node().await.map(|node| node.state) })
            .await
            .map(|_| ())
    }

    async fn node_wait_until_deleted(&self, timeout: Duration) -> Result<(), ClusterError> {
        if !self.has_node() {
            return Ok(());
        }
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match self.get_node().await {
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
                Ok(_) => sleep(POLL_INTERVAL).await,
            }
        }
        Err(ClusterError::Timeout(format!(
            "wait for node {} deletion exceeded timeout={}",
            self.node_id,
            timeout.as_secs()
        )))
    }

    async fn node_wait_for_grace_period(&self, grace: Duration) -> Result<(), ClusterError> {
        if !self.has_node() {
            return Ok(());
        }
        let deadline = Instant::now() + grace;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            self.node_wait_for_state(&["active"], remaining).await?;
            sleep(Duration::from_secs(1)).await;
        }
    }

    async fn node_cordon(&self) -> Result<(), ClusterError> {
        if !self.has_node() {
            return Ok(());
        }
        self.cluster_wait_for_state(&["active"], CLUSTER_STATE_TIMEOUT).await?;
        let node = self.get_node().await?;
        self.action(&node, "cordon", json!({})).await.map_err(|e| e.context("node cordon"))?;
        info!("Cordoned rancher node {}", self.node_id);
        Ok(())
    }

    async fn node_cordon_drain(&self) -> Result<(), ClusterError> {
        if !self.has_node() {
            return Ok(());
        }
        self.cluster_wait_for_state(&["active"], CLUSTER_STATE_TIMEOUT).await?;
        let node = self.get_node().await?;
        self.action(&node, "cordon", json!({})).await.map_err(|e| e.context("node cordon"))?;
        if !self.action(&node, "drain", self.drain_body()).await.map_err(|e| e.context("node drain"))? {
            return Ok(());
        }
        let timeout = Duration::from_secs(self.drain.timeout + u64::try_from(self.drain.grace_period).unwrap_or(0));
        self.node_wait_for_state(&["draining", "drained"], timeout).await?;
        if let Err(e) = self.node_wait_for_state(&["drained"], timeout).await {
            // A stuck drain is re-issued once and then left to finish on its own
            warn!("Drain of rancher node {} did not complete, retrying: {}", self.node_id, e);
            let _ = self.action(&node, "drain", self.drain_body()).await;
            let _ = self
                .node_wait_for_state(&["drained"], Duration::from_secs(self.drain.timeout))
                .await;
        }
        info!("Drained rancher node {}", self.node_id);
        Ok(())
    }

    async fn node_uncordon(&self) -> Result<(), ClusterError> {
        if !self.has_node() {
            return Ok(());
        }
        self.cluster_wait_for_state(&["active"], CLUSTER_STATE_TIMEOUT).await?;
        self.node_wait_for_state(&["active", "drained", "cordoned"], NODE_STATE_TIMEOUT).await?;
        let node = self.get_node().await?;
        self.action(&node, "uncordon", json!({})).await.map_err(|e| e.context("node uncordon"))?;
        self.node_wait_for_state(&["active"], NODE_STATE_TIMEOUT).await
    }

    async fn node_delete(&self) -> Result<(), ClusterError> {
        if !self.has_node() {
            return Ok(());
        }
        self.client
            .delete(&format!("/nodes/{}", self.node_id))
            .await
            .map_err(|e| e.context("node delete"))
    }

    async fn node_force_delete(&self) -> Result<(), ClusterError> {
        self.node_delete().await
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
        let mut node = self.get_node().await?;
        node.annotations.extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        node.labels.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        merge_taints(&mut node.taints, taints);
        self.put_node(&node).await.map_err(|e| e.context("node set annotations"))
    }

    async fn node_get_labels(&self) -> Result<Option<BTreeMap<String, String>>, ClusterError> {
        if !self.has_node() {
            return Ok(None);
        }
        Ok(Some(self.get_node().await?.labels))
    }

    async fn node_update_labels(
        &self,
        old: &BTreeMap<String, String>,
        new: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        if !self.has_node() {
            return Ok(());
        }
        let mut node = self.get_node().await?;
        update_labels(&mut node.labels, old, new);
        self.put_node(&node).await.map_err(|e| e.context("node update labels"))
    }

    async fn node_get_taints(&self) -> Result<Option<Vec<Taint>>, ClusterError> {
        if !self.has_node() {
            return Ok(None);
        }
        Ok(Some(self.get_node().await?.taints))
    }

    async fn node_update_taints(&self, old: &[Taint], new: &[Taint]) -> Result<(), ClusterError> {
        if !self.has_node() {
            return Ok(());
        }
        let mut node = self.get_node().await?;
        node.taints = update_taints(&node.taints, old, new);
        self.put_node(&node).await.map_err(|e| e.context("node update taints"))
    }
}
