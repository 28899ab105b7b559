//! Driver used when the cluster API is disabled or not configured

use crate::cluster_trait::ClusterNode;
use crate::error::ClusterError;
use node_config::Taint;
use std::collections::BTreeMap;
use std::time::Duration;

/// Cluster handle that does nothing and always succeeds
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledNode;

#[async_trait::async_trait]
impl ClusterNode for DisabledNode {
    fn is_enabled(&self) -> bool {
        false
    }

    fn node_id(&self) -> &str {
        ""
    }

    fn is_control_plane(&self) -> bool {
        false
    }

    fn is_etcd(&self) -> bool {
        false
    }

    fn is_worker(&self) -> bool {
        false
    }

    async fn cluster_wait_for_state(&self, _states: &[&str], _timeout: Duration) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn cluster_wait_for_transitioning(&self, _timeout: Duration) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_get_state(&self) -> Result<String, ClusterError> {
        Ok(String::new())
    }

    async fn node_wait_for_state(&self, _states: &[&str], _timeout: Duration) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_wait_until_deleted(&self, _timeout: Duration) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_wait_for_grace_period(&self, _grace: Duration) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_cordon(&self) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_cordon_drain(&self) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_uncordon(&self) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_delete(&self) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_force_delete(&self) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_set_annotations_labels_taints(
        &self,
        _annotations: &BTreeMap<String, String>,
        _labels: &BTreeMap<String, String>,
        _taints: &[Taint],
    ) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_get_labels(&self) -> Result<Option<BTreeMap<String, String>>, ClusterError> {
        Ok(None)
    }

    async fn node_update_labels(
        &self,
        _old: &BTreeMap<String, String>,
        _new: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        Ok(())
    }

    async fn node_get_taints(&self) -> Result<Option<Vec<Taint>>, ClusterError> {
        Ok(None)
    }

    async fn node_update_taints(&self, _old: &[Taint], _new: &[Taint]) -> Result<(), ClusterError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_call_is_noop() {
        let node = DisabledNode;
        assert!(!node.is_enabled());
        assert!(!node.is_worker() && !node.is_control_plane() && !node.is_etcd());
        node.node_cordon_drain().await.unwrap();
        node.node_delete().await.unwrap();
        node.node_wait_for_state(&["active"], Duration::ZERO).await.unwrap();
        node.enable_maintenance_mode(Duration::ZERO).await.unwrap();
        assert!(node.node_get_labels().await.unwrap().is_none());
        assert!(node.node_get_taints().await.unwrap().is_none());
    }
}
