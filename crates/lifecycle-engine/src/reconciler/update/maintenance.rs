//! Maintenance tasks
//!
//! Tasks run in the order given on a powered-on node. Each task adds the
//! node states it can leave behind; once all tasks ran the node must reach
//! one of them within `wait_for_node_timeout`.

use crate::error::{EngineError, ResultExt};
use crate::reconcile_helpers::{connect_cluster, ssh_wait, wait_grace};
use crate::reconciler::Reconciler;
use crate::wait::{GRACEFUL_POWER_OFF, graceful_shutdown, power_off, power_on, wait_for_ssh};
use cluster_node::ClusterNode;
use fabric_clients::SshTarget;
use node_config::{MaintenanceTask, NodeConfig, NodeSpec};
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

/// States a node can settle in after `task`
fn expected_states(task: MaintenanceTask) -> &'static [&'static str] {
    match task {
        MaintenanceTask::Cordon => &["cordoned"],
        MaintenanceTask::Uncordon => &["active"],
        MaintenanceTask::Drain => &["cordoned", "drained"],
        MaintenanceTask::Restart => &["cordoned", "drained", "active"],
    }
}

impl Reconciler {
    pub(crate) async fn run_maintenance(
        &self,
        spec: &NodeSpec,
        config: &NodeConfig,
        ssh: Option<&SshTarget>,
    ) -> Result<(), EngineError> {
        let Some(maintenance) = spec.maintenance.as_ref().filter(|m| m.execute && !m.tasks.is_empty()) else {
            return Ok(());
        };
        let ctx = &self.ctx;
        let host = &config.compute.host_name;
        if !ctx.compute.get_power_state(config).await.op("get power state")?.is_up() {
            info!("Skipping maintenance of node {}: powered off", host);
            return Ok(());
        }

        let node = connect_cluster(ctx, config, false, "cluster connect").await?;
        let mut gate = if maintenance.synchronized_run {
            Some(ctx.gate.acquire().await?)
        } else {
            None
        };

        let mut states: Vec<&str> = Vec::new();
        let mut result = Ok(());
        for &task in &maintenance.tasks {
            info!("Running maintenance task {:?} on node {}", task, host);
            result = self.run_task(task, node.as_ref(), spec, config, ssh).await;
            if result.is_err() {
                break;
            }
            for &state in expected_states(task) {
                if !states.contains(&state) {
                    states.push(state);
                }
            }
        }
        if result.is_ok() && !states.is_empty() {
            result = async {
                node.node_wait_for_state(&states, Duration::from_secs(maintenance.wait_for_node_timeout))
                    .await?;
                wait_grace(node.as_ref(), maintenance.node_grace_timeout).await
            }
            .await;
        }
        let result = result.map_err(|e| e.context("maintenance"));
        match gate.as_mut() {
            Some(gate) => gate.record(result),
            None => result,
        }
    }

    async fn run_task(
        &self,
        task: MaintenanceTask,
        node: &dyn ClusterNode,
        spec: &NodeSpec,
        config: &NodeConfig,
        ssh: Option<&SshTarget>,
    ) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        match task {
            MaintenanceTask::Cordon => node.node_cordon().await?,
            MaintenanceTask::Uncordon => node.node_uncordon().await?,
            MaintenanceTask::Drain => node.node_cordon_drain().await?,
            MaintenanceTask::Restart => match ssh_wait(spec, ssh) {
                Some((target, timeout)) => {
                    graceful_shutdown(ctx, config, ssh).await?;
                    power_on(ctx, config).await?;
                    wait_for_ssh(ctx, config, target, timeout).await?;
                }
                None => {
                    power_off(ctx, config).await?;
                    sleep(GRACEFUL_POWER_OFF).await;
                    power_on(ctx, config).await?;
                }
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::expected_states;
    use node_config::MaintenanceTask;

    #[test]
    fn test_expected_states() {
        assert_eq!(expected_states(MaintenanceTask::Drain), ["cordoned", "drained"]);
        assert!(expected_states(MaintenanceTask::Restart).contains(&"active"));
    }
}
