//! Snapshot set reconciliation

use crate::error::{EngineError, ResultExt};
use crate::reconcile_helpers::{create_snapshot, snapshot_plan};
use crate::reconciler::Reconciler;
use fabric_clients::SshTarget;
use node_config::{ChangeFlags, NodeConfig, NodeSpec};
use tracing::info;

impl Reconciler {
    /// Delete snapshots dropped from the desired list and create new ones
    pub(crate) async fn update_snapshots(
        &self,
        old: &NodeSpec,
        new: &NodeSpec,
        config: &NodeConfig,
        ssh: Option<&SshTarget>,
        changes: &mut ChangeFlags,
    ) -> Result<(), EngineError> {
        let old_names = old.snapshot_names();
        let new_names = new.snapshot_names();
        if old_names == new_names {
            return Ok(());
        }
        let ctx = &self.ctx;
        let existing = ctx.storage.get_snapshots(config).await.op("list snapshots")?;
        let (delete, create) = snapshot_plan(&old_names, &new_names, &existing);

        for name in delete {
            info!("Deleting snapshot {} of node {}", name, config.compute.host_name);
            ctx.storage
                .delete_snapshot(config, name)
                .await
                .op(&format!("delete snapshot {name}"))?;
            changes.snapshot_delete = true;
        }
        for name in create {
            let Some(snapshot) = new.snapshots.iter().find(|s| s.name == name) else {
                continue;
            };
            create_snapshot(ctx, config, ssh, snapshot).await?;
            changes.snapshot_create = true;
        }
        Ok(())
    }
}
