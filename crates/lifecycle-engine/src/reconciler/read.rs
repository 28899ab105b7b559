//! Node discovery

use super::Reconciler;
use crate::error::{EngineError, ResultExt};
use crate::reconcile_helpers::connect_cluster;
use cluster_node::discover_node;
use node_config::{NodeConfig, NodeSpec};
use tracing::{debug, info};

impl Reconciler {
    pub(crate) async fn read_node(&self, spec: &NodeSpec) -> Result<Option<NodeConfig>, EngineError> {
        let ctx = &self.ctx;
        let mut config = ctx.node_config(spec)?;
        let host = config.compute.host_name.clone();

        if !ctx.compute.discover_server(&mut config).await.op("discover server")? {
            info!("Server for node {} not found", host);
            return Ok(None);
        }
        if !ctx.storage.discover_boot_storage(&mut config).await.op("discover boot storage")? {
            info!("Boot storage for node {} not found", host);
            return Ok(None);
        }
        ctx.ipam.discover(&mut config).await.op("discover IP addresses")?;

        let node = connect_cluster(ctx, &config, false, "cluster connect").await?;
        discover_node(node.as_ref(), &mut config).await.op("discover cluster node")?;
        debug!("Node {} power state {}", host, config.compute.power_state);
        Ok(Some(config))
    }
}
