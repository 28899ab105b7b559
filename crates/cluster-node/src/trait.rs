//! Cluster node contract
//!
//! One handle per node per operation, bound to a single orchestrator driver.
//! Roles are resolved when the handle is created. A handle for a node that is
//! not (yet) registered, or for a disabled cluster API, turns every mutating
//! call into a successful no-op.

use crate::error::ClusterError;
use node_config::Taint;
use std::collections::BTreeMap;
use std::time::Duration;

/// Node roles as reported by the orchestrator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeRoles {
    pub control_plane: bool,
    pub etcd: bool,
    pub worker: bool,
}

/// Cluster membership and scheduling operations for one node
#[async_trait::async_trait]
pub trait ClusterNode: Send + Sync {
    /// False for the disabled driver
    fn is_enabled(&self) -> bool {
        true
    }

    /// Orchestrator node identifier, empty when the node is not registered
    fn node_id(&self) -> &str;

    fn is_control_plane(&self) -> bool;

    fn is_etcd(&self) -> bool;

    fn is_worker(&self) -> bool;

    fn is_rke1(&self) -> bool {
        false
    }

    fn is_rke2(&self) -> bool {
        false
    }

    /// Look the node up again after it re-registered under a new id
    async fn node_refresh_id(&mut self) -> Result<(), ClusterError> {
        Ok(())
    }

    /// Wait until the cluster reaches one of `states`
    async fn cluster_wait_for_state(&self, states: &[&str], timeout: Duration) -> Result<(), ClusterError>;

    /// Wait until the cluster starts updating/upgrading
    async fn cluster_wait_for_transitioning(&self, timeout: Duration) -> Result<(), ClusterError>;

    async fn node_get_state(&self) -> Result<String, ClusterError>;

    /// Wait until the node reaches one of `states`
    async fn node_wait_for_state(&self, states: &[&str], timeout: Duration) -> Result<(), ClusterError>;

    async fn node_wait_until_deleted(&self, timeout: Duration) -> Result<(), ClusterError>;

    /// Keep checking the node stays active for `grace`
    async fn node_wait_for_grace_period(&self, grace: Duration) -> Result<(), ClusterError>;

    async fn node_cordon(&self) -> Result<(), ClusterError>;

    /// Cordon and evict workloads using the configured drain policy
    async fn node_cordon_drain(&self) -> Result<(), ClusterError>;

    async fn node_uncordon(&self) -> Result<(), ClusterError>;

    /// Remove the node from cluster membership
    async fn node_delete(&self) -> Result<(), ClusterError>;

    async fn node_force_delete(&self) -> Result<(), ClusterError>;

    /// Merge annotations and labels; add taints not already present
    async fn node_set_annotations_labels_taints(
        &self,
        annotations: &BTreeMap<String, String>,
        labels: &BTreeMap<String, String>,
        taints: &[Taint],
    ) -> Result<(), ClusterError>;

    /// Current labels, `None` when the driver does not track labels
    async fn node_get_labels(&self) -> Result<Option<BTreeMap<String, String>>, ClusterError>;

    /// Remove keys of `old`, then add or overwrite keys of `new`
    async fn node_update_labels(
        &self,
        old: &BTreeMap<String, String>,
        new: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError>;

    /// Current taints, `None` when the driver does not track taints
    async fn node_get_taints(&self) -> Result<Option<Vec<Taint>>, ClusterError>;

    /// Remove taints in `old`, then add taints of `new` not already present
    async fn node_update_taints(&self, old: &[Taint], new: &[Taint]) -> Result<(), ClusterError>;

    /// Wait until the node reports Ready (hypervisor driver)
    async fn node_wait_until_ready(&self, _timeout: Duration) -> Result<(), ClusterError> {
        Ok(())
    }

    /// Enter maintenance mode (hypervisor driver)
    async fn enable_maintenance_mode(&self, _timeout: Duration) -> Result<(), ClusterError> {
        Ok(())
    }

    /// Leave maintenance mode (hypervisor driver)
    async fn disable_maintenance_mode(&self, _timeout: Duration) -> Result<(), ClusterError> {
        Ok(())
    }
}
