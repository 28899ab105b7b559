//! Mock Kubernetes node API

use super::lock;
use crate::error::ClusterError;
use crate::kube_api::NodeApi;
use k8s_openapi::api::core::v1::{Node, Pod};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Store {
    nodes: BTreeMap<String, Node>,
    pods: Vec<Pod>,
    /// Remaining injected failures per method
    failures: HashMap<String, (String, u32)>,
}

/// In-memory node and pod store
#[derive(Debug, Clone)]
pub struct MockNodeApi {
    store: Arc<Mutex<Store>>,
    journal: Arc<Mutex<Vec<String>>>,
}

impl MockNodeApi {
    #[must_use]
    pub fn new(journal: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::default())),
            journal,
        }
    }

    pub fn add_node(&self, node: Node) {
        let name = node.metadata.name.clone().unwrap_or_default();
        lock(&self.store).nodes.insert(name, node);
    }

    pub fn add_pod(&self, pod: Pod) {
        lock(&self.store).pods.push(pod);
    }

    #[must_use]
    pub fn node(&self, name: &str) -> Option<Node> {
        lock(&self.store).nodes.get(name).cloned()
    }

    #[must_use]
    pub fn pods(&self) -> Vec<Pod> {
        lock(&self.store).pods.clone()
    }

    /// Fail the next `times` calls to `method` with `message`
    pub fn fail_next(&self, method: &str, message: &str, times: u32) {
        lock(&self.store)
            .failures
            .insert(method.to_string(), (message.to_string(), times));
    }

    fn enter(&self, entry: String, method: &str) -> Result<(), ClusterError> {
        lock(&self.journal).push(entry);
        let mut store = lock(&self.store);
        if let Some((message, remaining)) = store.failures.get_mut(method) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClusterError::Api(message.clone()));
            }
        }
        Ok(())
    }

    fn not_found(kind: &str, name: &str) -> ClusterError {
        ClusterError::NotFound(format!("{kind} \"{name}\" not found"))
    }
}

fn on_node(pod: &Pod, node_name: &str) -> bool {
    pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) == Some(node_name)
}

fn matches(pod: &Pod, namespace: &str, name: &str) -> bool {
    pod.metadata.namespace.as_deref() == Some(namespace) && pod.metadata.name.as_deref() == Some(name)
}

#[async_trait::async_trait]
impl NodeApi for MockNodeApi {
    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        self.enter("kube.list_nodes".to_string(), "list_nodes")?;
        Ok(lock(&self.store).nodes.values().cloned().collect())
    }

    async fn get_node(&self, name: &str) -> Result<Node, ClusterError> {
        self.enter(format!("kube.get_node({name})"), "get_node")?;
        lock(&self.store)
            .nodes
            .get(name)
            .cloned()
            .ok_or_else(|| Self::not_found("nodes", name))
    }

    async fn replace_node(&self, node: &Node) -> Result<(), ClusterError> {
        let name = node.metadata.name.clone().unwrap_or_default();
        self.enter(format!("kube.replace_node({name})"), "replace_node")?;
        let mut store = lock(&self.store);
        if !store.nodes.contains_key(&name) {
            return Err(Self::not_found("nodes", &name));
        }
        store.nodes.insert(name, node.clone());
        Ok(())
    }

    async fn delete_node(&self, name: &str) -> Result<(), ClusterError> {
        self.enter(format!("kube.delete_node({name})"), "delete_node")?;
        lock(&self.store)
            .nodes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Self::not_found("nodes", name))
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>, ClusterError> {
        self.enter(format!("kube.list_pods_on_node({node_name})"), "list_pods_on_node")?;
        Ok(lock(&self.store)
            .pods
            .iter()
            .filter(|p| on_node(p, node_name))
            .cloned()
            .collect())
    }

    async fn evict_pod(&self, namespace: &str, name: &str, _grace_period: i64) -> Result<(), ClusterError> {
        self.enter(format!("kube.evict_pod({namespace}/{name})"), "evict_pod")?;
        let mut store = lock(&self.store);
        let before = store.pods.len();
        store.pods.retain(|p| !matches(p, namespace, name));
        if store.pods.len() == before {
            return Err(Self::not_found("pods", name));
        }
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str, _grace_period: i64) -> Result<(), ClusterError> {
        self.enter(format!("kube.delete_pod({namespace}/{name})"), "delete_pod")?;
        lock(&self.store).pods.retain(|p| !matches(p, namespace, name));
        Ok(())
    }
}
