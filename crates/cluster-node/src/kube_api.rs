//! Kubernetes node API seam
//!
//! The rke and rke2 drivers talk to the downstream cluster's API server
//! directly. [`NodeApi`] narrows that to the calls they need so the drivers can
//! be exercised against an in-memory implementation.

use crate::error::ClusterError;
use k8s_openapi::api::core::v1::{Node, Pod, Taint as KubeTaint};
use kube::api::{Api, DeleteParams, EvictParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use node_config::{ClusterApiConfig, Taint};
use serde_json::json;
use std::collections::BTreeMap;

/// Node and pod calls used by the kube-backed drivers
#[async_trait::async_trait]
pub trait NodeApi: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError>;

    async fn get_node(&self, name: &str) -> Result<Node, ClusterError>;

    /// Replace the node object (optimistic concurrency via resourceVersion)
    async fn replace_node(&self, node: &Node) -> Result<(), ClusterError>;

    async fn delete_node(&self, name: &str) -> Result<(), ClusterError>;

    /// Pods scheduled on `node_name`, all namespaces
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>, ClusterError>;

    /// Evict through the eviction subresource so disruption budgets apply
    async fn evict_pod(&self, namespace: &str, name: &str, grace_period: i64) -> Result<(), ClusterError>;

    async fn delete_pod(&self, namespace: &str, name: &str, grace_period: i64) -> Result<(), ClusterError>;
}

/// [`NodeApi`] backed by a `kube` client
#[derive(Clone)]
pub struct KubeNodeApi {
    client: Client,
}

impl KubeNodeApi {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn delete_params(grace_period: i64) -> DeleteParams {
    DeleteParams {
        grace_period_seconds: u32::try_from(grace_period).ok(),
        ..DeleteParams::default()
    }
}

#[async_trait::async_trait]
impl NodeApi for KubeNodeApi {
    async fn list_nodes(&self) -> Result<Vec<Node>, ClusterError> {
        Ok(self.nodes().list(&ListParams::default()).await?.items)
    }

    async fn get_node(&self, name: &str) -> Result<Node, ClusterError> {
        Ok(self.nodes().get(name).await?)
    }

    async fn replace_node(&self, node: &Node) -> Result<(), ClusterError> {
        let name = node.metadata.name.clone().unwrap_or_default();
        self.nodes().replace(&name, &PostParams::default(), node).await?;
        Ok(())
    }

    async fn delete_node(&self, name: &str) -> Result<(), ClusterError> {
        self.nodes().delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>, ClusterError> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&format!("spec.nodeName={node_name}"));
        Ok(pods.list(&params).await?.items)
    }

    async fn evict_pod(&self, namespace: &str, name: &str, grace_period: i64) -> Result<(), ClusterError> {
        let params = EvictParams {
            delete_options: Some(delete_params(grace_period)),
            post_options: PostParams::default(),
        };
        self.pods(namespace).evict(name, &params).await?;
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str, grace_period: i64) -> Result<(), ClusterError> {
        self.pods(namespace).delete(name, &delete_params(grace_period)).await?;
        Ok(())
    }
}

/// Build a client for the downstream API server from cluster API settings
///
/// # Errors
///
/// Returns `Connect` if the generated kubeconfig is rejected.
pub async fn kube_client(cfg: &ClusterApiConfig) -> Result<Client, ClusterError> {
    // kube's rustls backend needs a process-wide crypto provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut cluster = json!({ "server": cfg.api_url });
    if !cfg.server_ca_data.is_empty() {
        cluster["certificate-authority-data"] = json!(cfg.server_ca_data);
    }
    if cfg.insecure {
        cluster["insecure-skip-tls-verify"] = json!(true);
    }
    let mut user = json!({});
    if !cfg.token_key.is_empty() {
        user["token"] = json!(cfg.token_key);
    }
    if !cfg.client_cert_data.is_empty() && !cfg.client_key_data.is_empty() {
        user["client-certificate-data"] = json!(cfg.client_cert_data);
        user["client-key-data"] = json!(cfg.client_key_data);
    }
    let document = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": "downstream", "cluster": cluster }],
        "users": [{ "name": "lifecycle", "user": user }],
        "contexts": [{ "name": "downstream", "context": { "cluster": "downstream", "user": "lifecycle" } }],
        "current-context": "downstream",
    });
    let kubeconfig: Kubeconfig = serde_json::from_value(document)?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| ClusterError::Connect(format!("failed to build config: {e}")))?;
    Ok(Client::try_from(config)?)
}

/// Primary host address: first InternalIP, else first ExternalIP
#[must_use]
pub fn node_host_ip(node: &Node) -> Option<&str> {
    let addresses = node.status.as_ref()?.addresses.as_ref()?;
    ["InternalIP", "ExternalIP"].iter().find_map(|kind| {
        addresses
            .iter()
            .find(|a| a.type_ == *kind)
            .map(|a| a.address.as_str())
    })
}

/// Ready condition is `True`
#[must_use]
pub fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| conditions.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
}

#[must_use]
pub fn node_labels(node: &Node) -> BTreeMap<String, String> {
    node.metadata.labels.clone().unwrap_or_default()
}

/// Label set to `"true"` (case-insensitive)
#[must_use]
pub fn label_is_true(node: &Node, key: &str) -> bool {
    node.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .is_some_and(|value| value.eq_ignore_ascii_case("true"))
}

#[must_use]
pub fn node_taints(node: &Node) -> Vec<Taint> {
    node.spec
        .as_ref()
        .and_then(|s| s.taints.as_ref())
        .map(|taints| {
            taints
                .iter()
                .map(|t| Taint {
                    key: t.key.clone(),
                    value: t.value.clone().unwrap_or_default(),
                    effect: t.effect.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Overwrite the node's taints, keeping `timeAdded` of taints that survive
pub fn set_node_taints(node: &mut Node, taints: &[Taint]) {
    let spec = node.spec.get_or_insert_with(Default::default);
    let existing = spec.taints.take().unwrap_or_default();
    let merged = taints
        .iter()
        .map(|t| {
            existing
                .iter()
                .find(|e| e.key == t.key && e.value.as_deref().unwrap_or_default() == t.value && e.effect == t.effect)
                .cloned()
                .unwrap_or_else(|| KubeTaint {
                    key: t.key.clone(),
                    value: Some(t.value.clone()).filter(|v| !v.is_empty()),
                    effect: t.effect.clone(),
                    time_added: None,
                })
        })
        .collect();
    spec.taints = Some(merged);
}

pub fn set_unschedulable(node: &mut Node, unschedulable: bool) {
    node.spec.get_or_insert_with(Default::default).unschedulable = Some(unschedulable);
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeAddress, NodeCondition, NodeSpec, NodeStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn node() -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some("node1".to_string()),
                labels: Some(BTreeMap::from([
                    ("node-role.kubernetes.io/worker".to_string(), "True".to_string()),
                    ("node-role.kubernetes.io/etcd".to_string(), "false".to_string()),
                ])),
                ..ObjectMeta::default()
            },
            spec: Some(NodeSpec {
                taints: Some(vec![KubeTaint {
                    key: "gpu".to_string(),
                    effect: "NoSchedule".to_string(),
                    ..KubeTaint::default()
                }]),
                ..NodeSpec::default()
            }),
            status: Some(NodeStatus {
                addresses: Some(vec![
                    NodeAddress {
                        address: "node1".to_string(),
                        type_: "Hostname".to_string(),
                    },
                    NodeAddress {
                        address: "10.0.0.11".to_string(),
                        type_: "InternalIP".to_string(),
                    },
                ]),
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    reason: Some("KubeletReady".to_string()),
                    ..NodeCondition::default()
                }]),
                ..NodeStatus::default()
            }),
        }
    }

    #[test]
    fn test_node_accessors() {
        let node = node();
        assert_eq!(node_host_ip(&node), Some("10.0.0.11"));
        assert!(node_is_ready(&node));
        assert!(label_is_true(&node, "node-role.kubernetes.io/worker"));
        assert!(!label_is_true(&node, "node-role.kubernetes.io/etcd"));
        assert!(!label_is_true(&node, "node-role.kubernetes.io/control-plane"));
        assert_eq!(node_taints(&node)[0].key, "gpu");
        assert_eq!(node_taints(&node)[0].value, "");
    }

    #[test]
    fn test_set_node_taints() {
        let mut node = node();
        set_node_taints(
            &mut node,
            &[Taint {
                key: "db".to_string(),
                value: "primary".to_string(),
                effect: "NoExecute".to_string(),
            }],
        );
        let taints = node.spec.as_ref().unwrap().taints.as_ref().unwrap();
        assert_eq!(taints.len(), 1);
        assert_eq!(taints[0].value.as_deref(), Some("primary"));
    }

    #[test]
    fn test_set_unschedulable() {
        let mut node = Node::default();
        set_unschedulable(&mut node, true);
        assert_eq!(node.spec.unwrap().unschedulable, Some(true));
    }
}
