//! Storage updates: re-imaging the boot LUN and growing disks
//!
//! Re-imaging replaces the boot and seed LUNs while the server is off. The
//! node leaves the cluster first when it carries etcd or control-plane
//! duties (or runs RKE2) and rejoins on its own after the new image boots;
//! workers are only drained and uncordoned again.

use crate::error::{EngineError, ResultExt};
use crate::reconcile_helpers::{
    auto_snapshot_name, check_safe_removal, connect_cluster, resize_changes, ssh_wait, wait_and_init, wait_grace,
};
use crate::reconciler::Reconciler;
use crate::wait::{graceful_shutdown, power_on, run_commands};
use chrono::Utc;
use cluster_node::ClusterNode;
use cluster_node::rancher2::{CLUSTER_STATE_TIMEOUT, NODE_STATE_TIMEOUT};
use fabric_clients::SshTarget;
use node_config::{ChangeFlags, NodeConfig, NodeSpec, PowerState};
use tracing::{info, warn};

/// Whether the node must leave the cluster before its disk is replaced
fn leaves_cluster(node: &dyn ClusterNode) -> bool {
    node.is_etcd() || node.is_control_plane() || node.is_rke2()
}

impl Reconciler {
    pub(crate) async fn update_storage(
        &self,
        old: &NodeSpec,
        new: &NodeSpec,
        config: &mut NodeConfig,
        ssh: Option<&SshTarget>,
        changes: &mut ChangeFlags,
    ) -> Result<(), EngineError> {
        let image_changed = old.storage.boot_lun.os_image != new.storage.boot_lun.os_image;
        let seed_changed = old.storage.seed_lun.seed_template != new.storage.seed_lun.seed_template;
        let force = new.storage.force_update;

        if image_changed || seed_changed || force {
            changes.os_image |= image_changed || force;
            changes.seed_template |= seed_changed || force;
            info!(
                "Re-imaging node {}: image {} -> {}, seed {} -> {}, forced {}",
                config.compute.host_name,
                old.storage.boot_lun.os_image,
                new.storage.boot_lun.os_image,
                old.storage.seed_lun.seed_template,
                new.storage.seed_lun.seed_template,
                force
            );
            let mut gate = self.ctx.gate.acquire().await?;
            let result = self
                .reimage(new, config, ssh)
                .await
                .map_err(|e| e.context("update storage"));
            gate.record(result)?;
        }

        self.resize_storage(old, new, config, ssh, changes).await
    }

    async fn reimage(&self, spec: &NodeSpec, config: &mut NodeConfig, ssh: Option<&SshTarget>) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        let host = config.compute.host_name.clone();
        let power_up = ctx.compute.get_power_state(config).await.op("get power state")?.is_up();

        let mut errors = Vec::new();
        if let Err(e) = ctx.storage.create_boot_storage_preflight(config).await {
            errors.push(format!("boot storage preflight: {e}"));
        }
        if let Err(e) = ctx.storage.create_seed_storage_preflight(config).await {
            errors.push(format!("seed storage preflight: {e}"));
        }
        if !errors.is_empty() {
            return Err(EngineError::Preflight(errors));
        }
        check_safe_removal("re-image", spec, power_up)?;

        let mut node = connect_cluster(ctx, config, false, "cluster connect").await?;
        if power_up && node.is_worker() {
            node.node_cordon_drain().await?;
        }
        let rejoins = leaves_cluster(node.as_ref());
        if rejoins {
            info!("Removing node {} from the cluster before re-imaging", host);
            node.node_delete().await?;
            if let Err(e) = node.cluster_wait_for_transitioning(CLUSTER_STATE_TIMEOUT).await {
                warn!("Cluster did not start transitioning after removing {}: {}", host, e);
            }
            node.cluster_wait_for_state(&["active"], CLUSTER_STATE_TIMEOUT).await?;
        }
        if power_up {
            graceful_shutdown(ctx, config, ssh).await?;
        }

        if spec.storage.auto_snapshot_on_update {
            // name the snapshot after what is on the LUN right now
            let mut current = config.clone();
            ctx.storage
                .discover_boot_storage(&mut current)
                .await
                .op("discover boot storage")?;
            let name = auto_snapshot_name(
                &current.storage.boot_lun.os_image.name,
                &current.storage.seed_lun.seed_template.name,
                Utc::now(),
            );
            info!("Creating snapshot {} before re-imaging {}", name, host);
            ctx.storage
                .create_snapshot(config, &name, "created before re-imaging")
                .await
                .op(&format!("create snapshot {name}"))?;
        }

        ctx.storage.delete_boot_luns(config).await.op("delete boot LUNs")?;
        ctx.storage.create_boot_storage(config).await.op("create boot storage")?;
        if config.storage.data_nvme.size > 0 {
            ctx.storage.create_nvme_storage(config).await.op("create NVMe storage")?;
        }
        ctx.storage.create_seed_storage(config).await.op("create seed storage")?;
        if !spec.compute.powerstate.is_up() {
            info!("Node {} re-imaged, left powered off", host);
            config.compute.power_state = PowerState::Down;
            return Ok(());
        }
        power_on(ctx, config).await?;

        if ssh_wait(spec, ssh).is_some() {
            wait_and_init(ctx, spec, config, ssh).await?;
            node.cluster_wait_for_state(&["active"], CLUSTER_STATE_TIMEOUT).await?;
        }
        if rejoins {
            info!("Waiting for node {} to rejoin the cluster", host);
            if let Err(e) = node.cluster_wait_for_transitioning(CLUSTER_STATE_TIMEOUT).await {
                warn!("Cluster did not start transitioning after {} booted: {}", host, e);
            }
            node.cluster_wait_for_state(&["active"], CLUSTER_STATE_TIMEOUT).await?;
            node.node_refresh_id().await?;
        } else if node.is_worker() {
            node.cluster_wait_for_state(&["active"], CLUSTER_STATE_TIMEOUT).await?;
            node.node_uncordon().await?;
        }
        node.node_wait_for_state(&["active"], NODE_STATE_TIMEOUT).await?;
        wait_grace(node.as_ref(), ctx.node_grace_timeout()).await?;
        config.compute.power_state = PowerState::Up;
        Ok(())
    }

    /// Grow boot and data LUNs, then let the OS pick up the new size
    async fn resize_storage(
        &self,
        old: &NodeSpec,
        new: &NodeSpec,
        config: &NodeConfig,
        ssh: Option<&SshTarget>,
        changes: &mut ChangeFlags,
    ) -> Result<(), EngineError> {
        let resized = resize_changes(old, new)?;
        if !resized.boot_disk_size && !resized.data_disk_size {
            return Ok(());
        }
        let ctx = &self.ctx;
        info!(
            "Resizing disks of node {}: boot {}, data {}",
            config.compute.host_name, resized.boot_disk_size, resized.data_disk_size
        );
        ctx.storage.resize_boot_storage(config).await.op("resize boot storage")?;
        changes.merge(resized);

        let Some((target, _)) = ssh_wait(new, ssh) else {
            return Ok(());
        };
        let compute = &new.compute;
        if resized.boot_disk_size {
            run_commands(ctx, target, &compute.ssh_node_bootdisk_resize_commands).await?;
        }
        if resized.data_disk_size {
            run_commands(ctx, target, &compute.ssh_node_datadisk_resize_commands).await?;
        }
        Ok(())
    }
}
