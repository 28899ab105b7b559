//! One-shot restore of the boot LUN from a snapshot

use crate::error::{EngineError, ResultExt};
use crate::reconcile_helpers::{check_safe_removal, latest_snapshot, ssh_wait};
use crate::reconciler::Reconciler;
use crate::wait::{graceful_shutdown, power_on, wait_for_ssh};
use fabric_clients::SshTarget;
use node_config::{ChangeFlags, NodeConfig, NodeSpec};
use tracing::info;

impl Reconciler {
    /// Restore the requested snapshot and clear the request
    ///
    /// An empty snapshot name selects the most recent timestamped snapshot.
    pub(crate) async fn restore(
        &self,
        spec: &mut NodeSpec,
        config: &NodeConfig,
        ssh: Option<&SshTarget>,
        changes: &mut ChangeFlags,
    ) -> Result<(), EngineError> {
        let Some(request) = spec.restore.as_ref().filter(|r| r.restore) else {
            return Ok(());
        };
        let ctx = &self.ctx;
        let host = &config.compute.host_name;

        let name = if request.snapshot_name.is_empty() {
            let snapshots = ctx.storage.get_snapshots(config).await.op("list snapshots")?;
            latest_snapshot(&snapshots)
                .map(str::to_string)
                .ok_or_else(|| EngineError::Snapshot("snapshot not found, expected snapshot_name".to_string()))?
        } else {
            request.snapshot_name.clone()
        };
        info!("Restoring node {} from snapshot {}", host, name);

        let power_up = ctx.compute.get_power_state(config).await.op("get power state")?.is_up();
        check_safe_removal("restore snapshot", spec, power_up)?;
        if power_up {
            graceful_shutdown(ctx, config, ssh).await?;
        }
        ctx.storage
            .restore_snapshot(config, &name)
            .await
            .op(&format!("restore snapshot {name}"))?;
        ctx.storage.lun_restore_mapping(config).await.op("restore LUN mapping")?;
        power_on(ctx, config).await?;
        if let Some((target, timeout)) = ssh_wait(spec, ssh) {
            wait_for_ssh(ctx, config, target, timeout).await?;
        }

        changes.snapshot_restore = true;
        if let Some(request) = spec.restore.as_mut() {
            request.restore = false;
        }
        Ok(())
    }
}
