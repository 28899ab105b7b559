//! Label and taint bookkeeping shared by all drivers

use crate::cluster_trait::ClusterNode;
use crate::error::ClusterError;
use node_config::{NodeConfig, Taint};
use std::collections::BTreeMap;
use tracing::debug;

/// Append taints from `add` that are not already present
pub fn merge_taints(current: &mut Vec<Taint>, add: &[Taint]) {
    for taint in add {
        if !current.contains(taint) {
            current.push(taint.clone());
        }
    }
}

/// Drop keys of `old`, then insert every entry of `new`
pub fn update_labels(
    current: &mut BTreeMap<String, String>,
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) {
    for key in old.keys() {
        current.remove(key);
    }
    current.extend(new.iter().map(|(k, v)| (k.clone(), v.clone())));
}

/// Taints left after removing `old` and adding `new`
#[must_use]
pub fn update_taints(current: &[Taint], old: &[Taint], new: &[Taint]) -> Vec<Taint> {
    let mut taints: Vec<Taint> = current.iter().filter(|t| !old.contains(t)).cloned().collect();
    merge_taints(&mut taints, new);
    taints
}

/// Reconcile declared labels and taints with what the node actually carries
///
/// Labels declared in `config` but missing on the node are dropped; only
/// declared taints present on the node are kept. Drivers that do not track
/// labels or taints leave the declaration untouched.
///
/// # Errors
///
/// Returns the driver error if labels or taints cannot be read.
pub async fn discover_node(cluster: &dyn ClusterNode, config: &mut NodeConfig) -> Result<(), ClusterError> {
    let labels = cluster.node_get_labels().await.map_err(|e| e.context("discover node labels"))?;
    let taints = cluster.node_get_taints().await.map_err(|e| e.context("discover node taints"))?;
    if let Some(labels) = labels {
        config.labels.retain(|key, _| labels.contains_key(key));
    }
    if let Some(node_taints) = taints {
        config.taints.retain(|declared| node_taints.contains(declared));
    }
    debug!(
        "Discovered {} labels and {} taints on node {}",
        config.labels.len(),
        config.taints.len(),
        config.compute.host_name
    );
    Ok(())
}
