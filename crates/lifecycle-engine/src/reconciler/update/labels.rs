//! Cluster labels and taints

use crate::error::{EngineError, ResultExt};
use crate::reconcile_helpers::connect_cluster;
use crate::reconciler::Reconciler;
use node_config::{NodeConfig, NodeSpec};
use tracing::info;

impl Reconciler {
    pub(crate) async fn update_labels(&self, old: &NodeSpec, new: &NodeSpec, config: &NodeConfig) -> Result<(), EngineError> {
        if old.labels == new.labels {
            return Ok(());
        }
        info!("Updating labels of node {}", config.compute.host_name);
        let wait = new.compute.powerstate.is_up();
        let node = connect_cluster(&self.ctx, config, wait, "cluster connect").await?;
        node.node_update_labels(&old.labels, &new.labels)
            .await
            .op("update node labels")
    }

    pub(crate) async fn update_taints(&self, old: &NodeSpec, new: &NodeSpec, config: &NodeConfig) -> Result<(), EngineError> {
        if old.taints == new.taints {
            return Ok(());
        }
        info!("Updating taints of node {}", config.compute.host_name);
        let wait = new.compute.powerstate.is_up();
        let node = connect_cluster(&self.ctx, config, wait, "cluster connect").await?;
        node.node_update_taints(&old.taints, &new.taints)
            .await
            .op("update node taints")
    }
}
