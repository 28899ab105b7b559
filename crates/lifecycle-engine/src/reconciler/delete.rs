//! Node decommissioning
//!
//! The node is drained and removed from the cluster, powered off, and its
//! service profile, boot storage and addresses are released. Cluster and
//! cleanup steps keep going after a failure; every failure is reported
//! together at the end.

use super::Reconciler;
use crate::error::{EngineError, ResultExt};
use crate::reconcile_helpers::{aggregate, check_safe_removal, connect_cluster, ssh_target};
use crate::wait::graceful_shutdown;
use cluster_node::ClusterNode;
use cluster_node::rancher2::CLUSTER_STATE_TIMEOUT;
use node_config::{NodeConfig, NodeSpec};
use tracing::{info, warn};

impl Reconciler {
    pub(crate) async fn delete_node(&self, spec: &NodeSpec) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        let mut config = ctx.node_config(spec)?;
        let host = config.compute.host_name.clone();
        let mut errors = Vec::new();

        if ctx.compute.discover_server(&mut config).await.op("discover server")? {
            let ssh = ssh_target(ctx, spec, &config)?;
            let power_up = ctx.compute.get_power_state(&config).await.op("get power state")?.is_up();
            check_safe_removal("delete", spec, power_up)?;

            match connect_cluster(ctx, &config, false, "cluster connect").await {
                Ok(node) => {
                    if let Err(e) = leave_cluster(node.as_ref(), &config, power_up).await {
                        warn!("Removing node {} from the cluster failed: {}", host, e);
                        errors.push(e.to_string());
                    }
                }
                Err(e) => errors.push(e.to_string()),
            }
            if power_up {
                graceful_shutdown(ctx, &config, ssh.as_ref()).await?;
            }
            if let Err(e) = ctx.compute.delete_server(&config).await {
                errors.push(format!("delete server: {e}"));
            }
        } else {
            info!("Server for node {} already gone", host);
        }

        if let Err(e) = ctx.storage.delete_boot_storage(&config).await {
            errors.push(format!("delete boot storage: {e}"));
        }
        if let Err(e) = ctx.ipam.release(&config).await {
            errors.push(format!("release IP addresses: {e}"));
        }
        ctx.forget(&host);

        if errors.is_empty() {
            info!("Node {} deleted", host);
        }
        aggregate(errors)
    }
}

/// Drain and deregister the node; control-plane and etcd nodes wait for the
/// cluster to settle without them
async fn leave_cluster(node: &dyn ClusterNode, config: &NodeConfig, power_up: bool) -> Result<(), EngineError> {
    if power_up && node.is_worker() {
        node.node_cordon_drain().await?;
    }
    info!("Removing node {} from the cluster", config.compute.host_name);
    node.node_delete().await?;
    if power_up && (node.is_etcd() || node.is_control_plane()) {
        if let Err(e) = node.cluster_wait_for_transitioning(CLUSTER_STATE_TIMEOUT).await {
            warn!("Cluster did not start transitioning after removing {}: {}", config.compute.host_name, e);
        }
        node.cluster_wait_for_state(&["active"], CLUSTER_STATE_TIMEOUT).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::error::EngineError;
    use crate::test_utils::{HOSTNAME, TestFabric, node_spec};
    use cluster_node::NodeRoles;
    use node_config::PowerState;

    #[tokio::test(start_paused = true)]
    async fn test_delete_order() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);

        fabric.reconciler().delete(&node_spec()).await.unwrap();

        let order = [
            "cluster.node_cordon_drain",
            "cluster.node_delete",
            "compute.set_power_state(down)",
            "compute.delete_server",
            "storage.delete_boot_storage",
            "ipam.release",
        ];
        for pair in order.windows(2) {
            assert!(fabric.pos(pair[0]) < fabric.pos(pair[1]), "{} before {}", pair[0], pair[1]);
        }
        assert!(fabric.compute.server(HOSTNAME).is_none());
        assert!(fabric.storage.volume("node1_iboot").is_none());
        assert!(!fabric.ctx.is_cached(HOSTNAME));
    }

    #[tokio::test]
    async fn test_delete_refused_with_safe_removal() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        let mut spec = node_spec();
        spec.compute.safe_removal = true;

        let err = fabric.reconciler().delete(&spec).await.unwrap_err();

        assert!(matches!(err, EngineError::SafeRemoval(_)));
        assert_eq!(fabric.calls(), vec!["compute.discover_server"]);
        assert!(fabric.compute.server(HOSTNAME).is_some());
    }

    #[tokio::test]
    async fn test_delete_powered_off_with_safe_removal() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Down);
        let mut spec = node_spec();
        spec.compute.safe_removal = true;

        fabric.reconciler().delete(&spec).await.unwrap();

        assert!(!fabric.journal.contains("cluster.node_cordon_drain"));
        assert!(!fabric.journal.contains("compute.set_power_state"));
        assert!(fabric.journal.contains("cluster.node_delete"));
    }

    #[tokio::test]
    async fn test_delete_continues_past_failures() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Down);
        fabric.compute.fail_on("delete_server", "profile locked");
        fabric.ipam.fail_on("release", "record not found");
        fabric.node.fail_on("node_delete", "forbidden");

        let err = fabric.reconciler().delete(&node_spec()).await.unwrap_err();

        let EngineError::Aggregate(failures) = &err else {
            panic!("expected aggregated failures, got {err}");
        };
        assert_eq!(failures.len(), 3);
        assert!(failures[0].contains("forbidden"));
        assert!(failures[1].starts_with("delete server: "));
        assert!(failures[2].starts_with("release IP addresses: "));
        // storage was still removed
        assert!(fabric.storage.volume("node1_iboot").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_control_plane_waits_for_cluster() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        fabric.node.set_roles(NodeRoles {
            control_plane: true,
            etcd: true,
            worker: false,
        });

        fabric.reconciler().delete(&node_spec()).await.unwrap();

        assert!(!fabric.journal.contains("cluster.node_cordon_drain"));
        assert!(fabric.pos("cluster.node_delete") < fabric.pos("cluster.cluster_wait_for_transitioning"));
        assert!(
            fabric.pos("cluster.cluster_wait_for_state(active)") < fabric.pos("compute.set_power_state(down)")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_tolerates_stalled_transition() {
        let fabric = TestFabric::new();
        fabric.existing_node(PowerState::Up);
        fabric.node.set_roles(NodeRoles {
            control_plane: true,
            etcd: true,
            worker: false,
        });
        fabric.node.fail_on("cluster_wait_for_transitioning", "wait for cluster transitioning exceeded timeout=1800");

        fabric.reconciler().delete(&node_spec()).await.unwrap();

        assert!(
            fabric.pos("cluster.cluster_wait_for_transitioning") < fabric.pos("cluster.cluster_wait_for_state(active)")
        );
        assert!(fabric.compute.server(HOSTNAME).is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_server_cleans_storage() {
        let fabric = TestFabric::new();
        let config = fabric.ctx.node_config(&node_spec()).unwrap();
        fabric.storage.add_volume(&config);

        fabric.reconciler().delete(&node_spec()).await.unwrap();

        assert!(fabric.storage.volume("node1_iboot").is_none());
        assert!(!fabric.journal.contains("cluster."));
    }
}
