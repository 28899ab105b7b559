//! Node update
//!
//! Change classes are applied one after another, never as one transaction:
//! - `snapshots`: snapshot set reconciliation
//! - `compute`: blade reassignment, power state and profile attributes
//! - `storage`: re-imaging and disk resize
//! - `labels`: cluster labels and taints
//! - `maintenance`: cordon/drain/uncordon/restart tasks
//! - `restore`: one-shot restore from a snapshot

pub mod compute;
pub mod labels;
pub mod maintenance;
pub mod restore;
pub mod snapshots;
pub mod storage;

#[cfg(test)]
mod update_test;

use super::{Reconciler, UpdateOutcome};
use crate::error::{EngineError, ResultExt};
use crate::reconcile_helpers::{connect_cluster, ssh_target};
use node_config::{ChangeFlags, NodeConfig, NodeSpec, node_annotations};
use tracing::{info, warn};

impl Reconciler {
    pub(crate) async fn update_node(&self, old: &NodeSpec, new: &mut NodeSpec) -> Result<UpdateOutcome, EngineError> {
        let ctx = &self.ctx;
        let mut config = ctx.node_config(new)?;
        let host = config.compute.host_name.clone();
        if !ctx.compute.discover_server(&mut config).await.op("discover server")? {
            return Err(EngineError::Validation(format!("server {host} not found")));
        }
        let ssh = ssh_target(ctx, new, &config)?;
        let mut changes = ChangeFlags::default();

        self.update_snapshots(old, new, &config, ssh.as_ref(), &mut changes).await?;

        if let Err(e) = self.update_compute(old, new, &mut config, ssh.as_ref(), &mut changes).await {
            self.refresh_after_failure(new).await;
            return Err(e);
        }
        if let Err(e) = self.update_storage(old, new, &mut config, ssh.as_ref(), &mut changes).await {
            self.refresh_after_failure(new).await;
            return Err(e);
        }
        new.storage.force_update = false;

        self.update_labels(old, new, &config).await?;
        self.update_taints(old, new, &config).await?;
        self.run_maintenance(new, &config, ssh.as_ref()).await?;
        self.restore(new, &config, ssh.as_ref(), &mut changes).await?;

        let observed = self.read_node(new).await?;
        if changes.needs_reannounce() {
            self.reannounce(new, &config).await?;
        }
        info!("Node {} updated: {:?}", host, changes);
        Ok(UpdateOutcome {
            config: observed,
            changes,
        })
    }

    /// Re-read the node after a failed phase so the failure is logged
    /// against the state actually left behind
    async fn refresh_after_failure(&self, spec: &NodeSpec) {
        match self.read_node(spec).await {
            Ok(Some(observed)) => warn!(
                "Node {} left with power state {}, image {}",
                observed.compute.host_name,
                observed.compute.power_state,
                observed.storage.boot_lun.os_image.name
            ),
            Ok(None) => warn!("Node {} no longer exists", spec.hostname()),
            Err(e) => warn!("Refreshing node {} failed: {}", spec.hostname(), e),
        }
    }

    /// Publish annotations after changes they describe
    async fn reannounce(&self, spec: &NodeSpec, config: &NodeConfig) -> Result<(), EngineError> {
        let wait = spec.compute.powerstate.is_up();
        info!("Re-publishing node {} annotations", config.compute.host_name);
        let node = connect_cluster(&self.ctx, config, wait, "cluster connect").await?;
        let annotations = node_annotations(config)?;
        node.node_set_annotations_labels_taints(&annotations, &config.labels, &config.taints)
            .await
            .op("set node annotations")
    }
}
