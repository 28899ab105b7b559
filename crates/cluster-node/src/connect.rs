//! Driver selection

use crate::cluster_trait::ClusterNode;
use crate::disabled::DisabledNode;
use crate::error::ClusterError;
use crate::harvester::HarvesterNode;
use crate::kube_node::{KubeFlavor, KubeNode};
use crate::rancher2::Rancher2Node;
use node_config::{ClusterApiConfig, ClusterProvider};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Attempts when the rancher2 API resets connections during connect
pub const CONN_RESET_TRIES: u32 = 12;
pub const CONN_RESET_SLEEP: Duration = Duration::from_secs(60);

/// Open a cluster handle for one node
///
/// `cfg` of `None` or a disabled config yields the no-op driver. The node is
/// located by `node_ip` (rancher2, rke, rke2) or `hostname` (harvester).
///
/// # Errors
///
/// Returns the driver's connection or lookup error, prefixed with the
/// provider name.
pub async fn connect_cluster_node(
    cfg: Option<&ClusterApiConfig>,
    node_ip: &str,
    hostname: &str,
    wait_for_node: bool,
) -> Result<Box<dyn ClusterNode>, ClusterError> {
    let Some(cfg) = cfg.filter(|c| c.enabled) else {
        return Ok(Box::new(DisabledNode));
    };
    info!("Connecting to {} cluster API for node {}", cfg.provider, hostname);
    let node: Box<dyn ClusterNode> = match cfg.provider {
        ClusterProvider::Rancher2 => {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match Rancher2Node::connect(cfg, node_ip, wait_for_node).await {
                    Ok(node) => break Box::new(node),
                    Err(e) if e.to_string().contains("connection reset by peer") && attempt < CONN_RESET_TRIES => {
                        warn!("Rancher connection reset (attempt {}/{}), retrying", attempt, CONN_RESET_TRIES);
                        sleep(CONN_RESET_SLEEP).await;
                    }
                    Err(e) => return Err(e.context("rancher2 connect")),
                }
            }
        }
        ClusterProvider::Rke => Box::new(
            KubeNode::connect(cfg, KubeFlavor::Rke, node_ip, wait_for_node)
                .await
                .map_err(|e| e.context("rke connect"))?,
        ),
        ClusterProvider::Rke2 => Box::new(
            KubeNode::connect(cfg, KubeFlavor::Rke2, node_ip, wait_for_node)
                .await
                .map_err(|e| e.context("rke2 connect"))?,
        ),
        ClusterProvider::Harvester => Box::new(
            HarvesterNode::connect(cfg, hostname, wait_for_node)
                .await
                .map_err(|e| e.context("harvester connect"))?,
        ),
    };
    Ok(node)
}
