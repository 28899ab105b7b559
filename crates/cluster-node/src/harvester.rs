//! Harvester hypervisor driver
//!
//! Harvester hosts are managed through its own node API: readiness comes from
//! the kubelet Ready condition, and taking a host out of service is done with
//! maintenance mode rather than cordon/drain.

use crate::cluster_trait::ClusterNode;
use crate::error::ClusterError;
use crate::http::{Auth, RestClient, TlsOptions};
use k8s_openapi::api::core::v1::Node;
use node_config::{ClusterApiConfig, Taint};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

/// Annotation set to `completed` once maintenance mode is in effect
pub const MAINTENANCE_STATUS_ANNOTATION: &str = "harvesterhci.io/maintain-status";

const NODE_API: &str = "/v1/harvester/nodes/";
const STATE_POLL: Duration = Duration::from_secs(5);
const THROTTLE_ATTEMPTS: u32 = 10;
const THROTTLE_WAIT: Duration = Duration::from_secs(15);

/// Ready condition with reason `KubeletReady` and status `True`
#[must_use]
pub fn is_kubelet_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions.iter().any(|c| {
                c.type_ == "Ready" && c.reason.as_deref() == Some("KubeletReady") && c.status == "True"
            })
        })
}

/// Unschedulable with maintenance status `completed`
#[must_use]
pub fn is_in_maintenance(node: &Node) -> bool {
    let unschedulable = node.spec.as_ref().and_then(|s| s.unschedulable).unwrap_or(false);
    unschedulable
        && node
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(MAINTENANCE_STATUS_ANNOTATION))
            .is_some_and(|status| status == "completed")
}

/// Harvester host handle, addressed by hostname
#[derive(Debug)]
pub struct HarvesterNode {
    client: RestClient,
    hostname: String,
    node_id: String,
    retries: u32,
}

impl HarvesterNode {
    /// Connect to the Harvester API
    ///
    /// With `wait_for_node` and a non-zero `wait_for_node_timeout`, waits for
    /// the host to report Ready.
    ///
    /// # Errors
    ///
    /// Fails if the client cannot be built or the host does not become ready.
    pub async fn connect(cfg: &ClusterApiConfig, hostname: &str, wait_for_node: bool) -> Result<Self, ClusterError> {
        let client = RestClient::new(
            &cfg.api_url,
            Auth::Basic(cfg.token_key.clone()),
            &TlsOptions {
                insecure: true,
                ca_data: String::new(),
            },
        )?
        .with_throttle_retry(THROTTLE_ATTEMPTS, THROTTLE_WAIT);
        let mut node = Self {
            client,
            hostname: hostname.to_string(),
            node_id: String::new(),
            retries: cfg.retries.max(1),
        };
        if wait_for_node && cfg.wait_for_node_timeout > 0 {
            node.node_wait_until_ready(Duration::from_secs(cfg.wait_for_node_timeout))
                .await?;
        }
        match node.get_node().await {
            Ok(found) => node.node_id = found.metadata.uid.unwrap_or_default(),
            Err(e) if e.is_not_found() => debug!("Harvester host {} not registered", hostname),
            Err(e) => return Err(e),
        }
        Ok(node)
    }

    async fn wait_ready(&self) -> Result<(), ClusterError> {
        let mut last_error = None;
        for attempt in 0..self.retries {
            match self.client.get_text("/ping").await {
                Ok(_) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
            if attempt + 1 < self.retries {
                sleep(STATE_POLL).await;
            }
        }
        Err(ClusterError::Connect(format!(
            "harvester is not ready after {} attempts, last error: {}",
            self.retries,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn node_path(&self) -> String {
        format!("{NODE_API}{}", self.hostname)
    }

    async fn get_node(&self) -> Result<Node, ClusterError> {
        self.wait_ready().await?;
        self.client.get(&self.node_path()).await
    }

    async fn node_action(&self, action: &str) -> Result<(), ClusterError> {
        self.wait_ready().await?;
        self.client
            .post(&format!("{}?action={action}", self.node_path()), &json!({}))
            .await
            .map_err(|e| e.context(action))
    }

    async fn set_maintenance(&self, enable: bool, timeout: Duration) -> Result<(), ClusterError> {
        let action = if enable { "enableMaintenanceMode" } else { "disableMaintenanceMode" };
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if is_in_maintenance(&self.get_node().await?) == enable {
                info!("Harvester host {} maintenance mode {}", self.hostname, if enable { "enabled" } else { "disabled" });
                return Ok(());
            }
            self.node_action(action).await?;
            sleep(STATE_POLL).await;
        }
        Err(ClusterError::Timeout(format!(
            "node \"{}\" is not in {} maintenance mode after {} timeout",
            self.hostname,
            if enable { "enabled" } else { "disabled" },
            timeout.as_secs()
        )))
    }
}

#[async_trait::async_trait]
impl ClusterNode for HarvesterNode {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn node_refresh_id(&mut self) -> Result<(), ClusterError> {
        self.node_id = self.get_node().await?.metadata.uid.unwrap_or_default();
        Ok(())
    }

    fn is_control_plane(&self) -> bool {
        false
    }

    fn is_etcd(&self) -> bool {
        false
    }

    fn is_worker(&self) -> bool {
        false
    }

    fn is_rke2(&self) -> bool {
        true
    }

    async fn cluster_wait_for_state(&self, _states: &[&str], _timeout: Duration) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn cluster_wait_for_transitioning(&self, _timeout: Duration) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_get_state(&self) -> Result<String, ClusterError> {
        Ok(String::new())
    }

    async fn node_wait_for_state(&self, _states: &[&str], _timeout: Duration) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_wait_until_deleted(&self, _timeout: Duration) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_wait_for_grace_period(&self, grace: Duration) -> Result<(), ClusterError> {
        let deadline = Instant::now() + grace;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            self.node_wait_until_ready(remaining).await?;
            sleep(STATE_POLL).await;
        }
    }

    async fn node_cordon(&self) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_cordon_drain(&self) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_uncordon(&self) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_delete(&self) -> Result<(), ClusterError> {
        self.wait_ready().await?;
        self.client
            .delete(&self.node_path())
            .await
            .map_err(|e| e.context("node delete"))
    }

    async fn node_force_delete(&self) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_set_annotations_labels_taints(
        &self,
        _annotations: &BTreeMap<String, String>,
        _labels: &BTreeMap<String, String>,
        _taints: &[Taint],
    ) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_get_labels(&self) -> Result<Option<BTreeMap<String, String>>, ClusterError> {
        Ok(None)
    }

    async fn node_update_labels(
        &self,
        _old: &BTreeMap<String, String>,
        _new: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_get_taints(&self) -> Result<Option<Vec<Taint>>, ClusterError> {
        Ok(None)
    }

    async fn node_update_taints(&self, _old: &[Taint], _new: &[Taint]) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_wait_until_ready(&self, timeout: Duration) -> Result<(), ClusterError> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match self.get_node().await {
                Ok(node) if is_kubelet_ready(&node) => return Ok(()),
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            sleep(STATE_POLL).await;
        }
        Err(ClusterError::Timeout(format!(
            "node \"{}\" is not ready after {} timeout",
            self.hostname,
            timeout.as_secs()
        )))
    }

    async fn enable_maintenance_mode(&self, timeout: Duration) -> Result<(), ClusterError> {
        self.set_maintenance(true, timeout).await
    }

    async fn disable_maintenance_mode(&self, timeout: Duration) -> Result<(), ClusterError> {
        self.set_maintenance(false, timeout).await
    }
}
