//! Node drain over the Kubernetes API
//!
//! Mirrors `kubectl drain`: classify the pods on the node, refuse if a pod
//! would be lost without the matching override, evict the rest and wait for
//! them to go away.

use crate::error::ClusterError;
use crate::kube_api::NodeApi;
use k8s_openapi::api::core::v1::Pod;
use node_config::DrainInput;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";
const EVICT_RETRY_WAIT: Duration = Duration::from_secs(5);
const POD_GONE_POLL: Duration = Duration::from_secs(5);

/// What drain does with a pod
#[derive(Debug, Clone, PartialEq, Eq)]
enum PodDisposition {
    Skip,
    Evict,
    Refuse(String),
}

fn pod_key(pod: &Pod) -> (String, String) {
    (
        pod.metadata.namespace.clone().unwrap_or_default(),
        pod.metadata.name.clone().unwrap_or_default(),
    )
}

fn classify(pod: &Pod, drain: &DrainInput) -> PodDisposition {
    let (namespace, name) = pod_key(pod);
    let meta = &pod.metadata;
    if meta
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(MIRROR_POD_ANNOTATION))
    {
        return PodDisposition::Skip;
    }
    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref()).unwrap_or_default();
    if matches!(phase, "Succeeded" | "Failed") {
        return PodDisposition::Evict;
    }
    let owners = meta.owner_references.as_deref().unwrap_or_default();
    if owners.iter().any(|o| o.kind == "DaemonSet") {
        return if drain.ignore_daemon_sets {
            PodDisposition::Skip
        } else {
            PodDisposition::Refuse(format!("{namespace}/{name} is managed by a DaemonSet"))
        };
    }
    if owners.is_empty() && !drain.force {
        return PodDisposition::Refuse(format!("{namespace}/{name} is not managed by a controller"));
    }
    let has_local_storage = pod
        .spec
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .is_some_and(|volumes| volumes.iter().any(|v| v.empty_dir.is_some()));
    if has_local_storage && !drain.delete_local_data {
        return PodDisposition::Refuse(format!("{namespace}/{name} uses local storage (emptyDir)"));
    }
    PodDisposition::Evict
}

/// Evict every evictable pod on `node_name` and wait until they are gone
///
/// # Errors
///
/// Fails if a pod cannot be drained under the policy, an eviction fails for a
/// reason other than a disruption budget, or pods remain after the timeout.
pub async fn drain_node(api: &dyn NodeApi, node_name: &str, drain: &DrainInput) -> Result<(), ClusterError> {
    let deadline = Instant::now() + Duration::from_secs(drain.timeout);
    let pods = api.list_pods_on_node(node_name).await?;
    let mut refused = Vec::new();
    let mut to_evict = Vec::new();
    for pod in &pods {
        match classify(pod, drain) {
            PodDisposition::Skip => debug!("Drain {}: skipping {:?}", node_name, pod_key(pod)),
            PodDisposition::Evict => to_evict.push(pod_key(pod)),
            PodDisposition::Refuse(reason) => refused.push(reason),
        }
    }
    if !refused.is_empty() {
        return Err(ClusterError::Api(format!(
            "cannot drain node {}: {}",
            node_name,
            refused.join("; ")
        )));
    }

    for (namespace, name) in &to_evict {
        loop {
            match api.evict_pod(namespace, name, drain.grace_period).await {
                Ok(()) => break,
                Err(e) if e.is_not_found() => break,
                // 429: blocked by a PodDisruptionBudget
                Err(e) if e.to_string().contains("429") || e.to_string().contains("TooManyRequests") => {
                    if Instant::now() >= deadline {
                        return Err(ClusterError::Timeout(format!(
                            "drain node {node_name}: eviction of {namespace}/{name} blocked: {e}"
                        )));
                    }
                    warn!("Eviction of {}/{} blocked by disruption budget, retrying", namespace, name);
                    sleep(EVICT_RETRY_WAIT).await;
                }
                Err(e) => return Err(e.context("evict pod")),
            }
        }
    }

    loop {
        let remaining: Vec<_> = api
            .list_pods_on_node(node_name)
            .await?
            .iter()
            .map(pod_key)
            .filter(|key| to_evict.contains(key))
            .collect();
        if remaining.is_empty() {
            info!("Drained node {} ({} pods evicted)", node_name, to_evict.len());
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(ClusterError::Timeout(format!(
                "drain node {} exceeded timeout={}: {} pods remaining",
                node_name,
                drain.timeout,
                remaining.len()
            )));
        }
        sleep(POD_GONE_POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{EmptyDirVolumeSource, PodSpec, Volume};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use std::collections::BTreeMap;

    fn pod(name: &str, owner: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                owner_references: owner.map(|kind| {
                    vec![OwnerReference {
                        kind: kind.to_string(),
                        name: "owner".to_string(),
                        ..OwnerReference::default()
                    }]
                }),
                ..ObjectMeta::default()
            },
            ..Pod::default()
        }
    }

    #[test]
    fn test_classify_default_policy() {
        let drain = DrainInput::default();
        assert_eq!(classify(&pod("web", Some("ReplicaSet")), &drain), PodDisposition::Evict);
        assert_eq!(classify(&pod("agent", Some("DaemonSet")), &drain), PodDisposition::Skip);
        assert!(matches!(classify(&pod("bare", None), &drain), PodDisposition::Refuse(_)));
    }

    #[test]
    fn test_classify_mirror_pod_skipped() {
        let mut mirror = pod("kube-apiserver", None);
        mirror.metadata.annotations = Some(BTreeMap::from([(MIRROR_POD_ANNOTATION.to_string(), "x".to_string())]));
        assert_eq!(classify(&mirror, &DrainInput::default()), PodDisposition::Skip);
    }

    #[test]
    fn test_classify_local_storage() {
        let mut cache = pod("cache", Some("ReplicaSet"));
        cache.spec = Some(PodSpec {
            volumes: Some(vec![Volume {
                name: "scratch".to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Volume::default()
            }]),
            ..PodSpec::default()
        });
        assert!(matches!(classify(&cache, &DrainInput::default()), PodDisposition::Refuse(_)));
        let drain = DrainInput {
            delete_local_data: true,
            ..DrainInput::default()
        };
        assert_eq!(classify(&cache, &drain), PodDisposition::Evict);
    }

    #[test]
    fn test_classify_force_and_daemonsets() {
        let drain = DrainInput {
            force: true,
            ignore_daemon_sets: false,
            ..DrainInput::default()
        };
        assert_eq!(classify(&pod("bare", None), &drain), PodDisposition::Evict);
        assert!(matches!(classify(&pod("agent", Some("DaemonSet")), &drain), PodDisposition::Refuse(_)));
    }
}
