//! Compute updates: blade reassignment, power state and profile attributes

use crate::error::{EngineError, ResultExt};
use crate::reconcile_helpers::{check_safe_removal, connect_cluster, ssh_wait, wait_grace};
use crate::reconciler::Reconciler;
use crate::wait::{graceful_shutdown, power_on, wait_for_ssh};
use cluster_node::rancher2::CLUSTER_STATE_TIMEOUT;
use fabric_clients::SshTarget;
use node_config::{BladeSpec, ChangeFlags, NodeConfig, NodeSpec, PowerState};
use tracing::info;

impl Reconciler {
    pub(crate) async fn update_compute(
        &self,
        old: &NodeSpec,
        new: &NodeSpec,
        config: &mut NodeConfig,
        ssh: Option<&SshTarget>,
        changes: &mut ChangeFlags,
    ) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        let blade_changed = match &new.compute.blade_spec {
            Some(spec) => {
                let previous = old
                    .compute
                    .blade_spec
                    .clone()
                    .unwrap_or_else(|| BladeSpec::from_assigned(&config.compute.blade_assigned));
                spec.requires_reassignment(&previous, &config.compute.blade_assigned)?
            }
            None => false,
        };
        let current = ctx.compute.get_power_state(config).await.op("get power state")?;
        let desired = new.compute.powerstate;

        if blade_changed || current != desired {
            changes.blade_spec |= blade_changed;
            changes.power_state |= current != desired;
            info!(
                "Updating compute of node {}: blade change {}, power {} -> {}",
                config.compute.host_name, blade_changed, current, desired
            );
            let mut gate = ctx.gate.acquire().await?;
            let result = self
                .power_cycle(new, config, ssh, current, desired, blade_changed)
                .await
                .map_err(|e| e.context("update compute"));
            gate.record(result)?;
        }

        if old.compute.description != new.compute.description || old.compute.label != new.compute.label {
            info!("Updating service profile attributes of node {}", config.compute.host_name);
            ctx.compute
                .update_server_attributes(config)
                .await
                .op("update server attributes")?;
        }
        Ok(())
    }

    async fn power_cycle(
        &self,
        spec: &NodeSpec,
        config: &mut NodeConfig,
        ssh: Option<&SshTarget>,
        current: PowerState,
        desired: PowerState,
        blade_changed: bool,
    ) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        if blade_changed {
            ctx.compute
                .update_server_preflight(config)
                .await
                .op("update server preflight")?;
        }
        let node = connect_cluster(ctx, config, false, "cluster connect").await?;
        if current.is_up() {
            check_safe_removal("update compute", spec, true)?;
            if node.is_worker() {
                node.node_cordon_drain().await?;
            }
            graceful_shutdown(ctx, config, ssh).await?;
        }
        if blade_changed {
            info!("Reassigning blade for node {}", config.compute.host_name);
            ctx.compute.update_server(config).await.op("update server")?;
        }
        if desired.is_up() {
            power_on(ctx, config).await?;
            if let Some((target, timeout)) = ssh_wait(spec, ssh) {
                wait_for_ssh(ctx, config, target, timeout).await?;
            }
            if node.is_worker() {
                node.node_uncordon().await?;
            }
            node.cluster_wait_for_state(&["active"], CLUSTER_STATE_TIMEOUT).await?;
            wait_grace(node.as_ref(), ctx.node_grace_timeout()).await?;
        }
        config.compute.power_state = desired;
        Ok(())
    }
}
