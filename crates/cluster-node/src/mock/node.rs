//! Mock cluster node

use super::lock;
use crate::cluster_trait::{ClusterNode, NodeRoles};
use crate::error::ClusterError;
use crate::metadata::{merge_taints, update_labels, update_taints};
use node_config::Taint;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct NodeState {
    roles: NodeRoles,
    state: String,
    annotations: BTreeMap<String, String>,
    labels: Option<BTreeMap<String, String>>,
    taints: Option<Vec<Taint>>,
    failures: HashMap<String, String>,
}

/// Scripted cluster node; clones share state
#[derive(Debug, Clone)]
pub struct MockClusterNode {
    node_id: String,
    state: Arc<Mutex<NodeState>>,
    journal: Arc<Mutex<Vec<String>>>,
}

impl MockClusterNode {
    /// Registered, active worker with empty labels and taints
    #[must_use]
    pub fn new(journal: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            node_id: "node-1".to_string(),
            state: Arc::new(Mutex::new(NodeState {
                roles: NodeRoles {
                    worker: true,
                    ..NodeRoles::default()
                },
                state: "active".to_string(),
                labels: Some(BTreeMap::new()),
                taints: Some(Vec::new()),
                ..NodeState::default()
            })),
            journal,
        }
    }

    pub fn set_roles(&self, roles: NodeRoles) {
        lock(&self.state).roles = roles;
    }

    /// Empty id mimics a node not registered with the cluster
    #[must_use]
    pub fn with_node_id(mut self, node_id: &str) -> Self {
        self.node_id = node_id.to_string();
        self
    }

    pub fn set_state(&self, state: &str) {
        lock(&self.state).state = state.to_string();
    }

    /// `None` mimics a driver that does not track labels
    pub fn set_labels(&self, labels: Option<BTreeMap<String, String>>) {
        lock(&self.state).labels = labels;
    }

    /// `None` mimics a driver that does not track taints
    pub fn set_taints(&self, taints: Option<Vec<Taint>>) {
        lock(&self.state).taints = taints;
    }

    #[must_use]
    pub fn labels(&self) -> Option<BTreeMap<String, String>> {
        lock(&self.state).labels.clone()
    }

    #[must_use]
    pub fn taints(&self) -> Option<Vec<Taint>> {
        lock(&self.state).taints.clone()
    }

    #[must_use]
    pub fn annotations(&self) -> BTreeMap<String, String> {
        lock(&self.state).annotations.clone()
    }

    /// Fail every call to `method` with `message`
    pub fn fail_on(&self, method: &str, message: &str) {
        lock(&self.state)
            .failures
            .insert(method.to_string(), message.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.state).failures.clear();
    }

    fn enter(&self, method: &str) -> Result<(), ClusterError> {
        lock(&self.journal).push(format!("cluster.{method}"));
        match lock(&self.state).failures.get(method) {
            Some(message) => Err(ClusterError::Api(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl ClusterNode for MockClusterNode {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn is_control_plane(&self) -> bool {
        lock(&self.state).roles.control_plane
    }

    fn is_etcd(&self) -> bool {
        lock(&self.state).roles.etcd
    }

    fn is_worker(&self) -> bool {
        lock(&self.state).roles.worker
    }

    async fn node_refresh_id(&mut self) -> Result<(), ClusterError> {
        self.enter("node_refresh_id")
    }

    async fn cluster_wait_for_state(&self, states: &[&str], _timeout: Duration) -> Result<(), ClusterError> {
        self.enter(&format!("cluster_wait_for_state({})", states.join(",")))
    }

    async fn cluster_wait_for_transitioning(&self, _timeout: Duration) -> Result<(), ClusterError> {
        self.enter("cluster_wait_for_transitioning")
    }

    async fn node_get_state(&self) -> Result<String, ClusterError> {
        Ok(lock(&self.state).state.clone())
    }

    async fn node_wait_for_state(&self, states: &[&str], _timeout: Duration) -> Result<(), ClusterError> {
        self.enter(&format!("node_wait_for_state({})", states.join(",")))?;
        let current = lock(&self.state).state.clone();
        if states.contains(&current.as_str()) {
            Ok(())
        } else {
            Err(ClusterError::Timeout(format!(
                "wait for node state exceeded timeout=0: expected states={}, last state={}",
                states.join(","),
                current
            )))
        }
    }

    async fn node_wait_until_deleted(&self, _timeout: Duration) -> Result<(), ClusterError> {
        self.enter("node_wait_until_deleted")
    }

    async fn node_wait_for_grace_period(&self, _grace: Duration) -> Result<(), ClusterError> {
        self.enter("node_wait_for_grace_period")
    }

    async fn node_cordon(&self) -> Result<(), ClusterError> {
        self.enter("node_cordon")?;
        lock(&self.state).state = "cordoned".to_string();
        Ok(())
    }

    async fn node_cordon_drain(&self) -> Result<(), ClusterError> {
        self.enter("node_cordon_drain")?;
        lock(&self.state).state = "drained".to_string();
        Ok(())
    }

    async fn node_uncordon(&self) -> Result<(), ClusterError> {
        self.enter("node_uncordon")?;
        lock(&self.state).state = "active".to_string();
        Ok(())
    }

    async fn node_delete(&self) -> Result<(), ClusterError> {
        self.enter("node_delete")
    }

    async fn node_force_delete(&self) -> Result<(), ClusterError> {
        self.enter("node_force_delete")
    }

    async fn node_set_annotations_labels_taints(
        &self,
        annotations: &BTreeMap<String, String>,
        labels: &BTreeMap<String, String>,
        taints: &[Taint],
    ) -> Result<(), ClusterError> {
        self.enter("node_set_annotations_labels_taints")?;
        let mut state = lock(&self.state);
        state
            .annotations
            .extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(current) = state.labels.as_mut() {
            current.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(current) = state.taints.as_mut() {
            merge_taints(current, taints);
        }
        Ok(())
    }

    async fn node_get_labels(&self) -> Result<Option<BTreeMap<String, String>>, ClusterError> {
        Ok(lock(&self.state).labels.clone())
    }

    async fn node_update_labels(
        &self,
        old: &BTreeMap<String, String>,
        new: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        self.enter("node_update_labels")?;
        if let Some(current) = lock(&self.state).labels.as_mut() {
            update_labels(current, old, new);
        }
        Ok(())
    }

    async fn node_get_taints(&self) -> Result<Option<Vec<Taint>>, ClusterError> {
        Ok(lock(&self.state).taints.clone())
    }

    async fn node_update_taints(&self, old: &[Taint], new: &[Taint]) -> Result<(), ClusterError> {
        self.enter("node_update_taints")?;
        let mut state = lock(&self.state);
        if let Some(current) = state.taints.as_ref() {
            let updated = update_taints(current, old, new);
            state.taints = Some(updated);
        }
        Ok(())
    }

    async fn node_wait_until_ready(&self, _timeout: Duration) -> Result<(), ClusterError> {
        self.enter("node_wait_until_ready")
    }

    async fn enable_maintenance_mode(&self, _timeout: Duration) -> Result<(), ClusterError> {
        self.enter("enable_maintenance_mode")
    }

    async fn disable_maintenance_mode(&self, _timeout: Duration) -> Result<(), ClusterError> {
        self.enter("disable_maintenance_mode")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_tracks_state() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let node = MockClusterNode::new(Arc::clone(&journal));
        node.node_cordon_drain().await.unwrap();
        assert_eq!(node.node_get_state().await.unwrap(), "drained");
        node.node_uncordon().await.unwrap();
        node.node_wait_for_state(&["active"], Duration::ZERO).await.unwrap();
        assert_eq!(
            *journal.lock().unwrap(),
            vec![
                "cluster.node_cordon_drain",
                "cluster.node_uncordon",
                "cluster.node_wait_for_state(active)"
            ]
        );
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let node = MockClusterNode::new(Arc::new(Mutex::new(Vec::new())));
        node.fail_on("node_delete", "etcd member busy");
        let err = node.node_delete().await.unwrap_err();
        assert_eq!(err.to_string(), "Cluster API error: etcd member busy");
    }
}
