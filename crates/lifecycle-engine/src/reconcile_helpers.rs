//! Helper functions shared by the reconcile phases.
//!
//! Pure decisions (snapshot set differences, restore snapshot selection,
//! disk resize classification) live here so they can be tested without any
//! client, next to the small async helpers every phase calls.

use crate::context::EngineContext;
use crate::error::{EngineError, ResultExt};
use crate::fsfreeze::create_consistent_snapshot;
use crate::wait::{run_commands, wait_for_ssh};
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use cluster_node::ClusterNode;
use fabric_clients::SshTarget;
use node_config::{ChangeFlags, NodeConfig, NodeSpec, SnapshotSpec, decrypt_string};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info};

/// Timestamp suffix of automatic snapshot names
static SNAPSHOT_TIMESTAMP: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"20[0-9][0-9]-[0-9][0-9]-[0-9][0-9]T[0-9][0-9]:[0-9][0-9]:[0-9][0-9]-[0-9][0-9]:[0-9][0-9]$")
});

/// SSH target for the node, when the desired state carries credentials and
/// the node has a primary IP
///
/// # Errors
///
/// Fails when the private key cannot be decrypted.
pub fn ssh_target(ctx: &EngineContext, spec: &NodeSpec, config: &NodeConfig) -> Result<Option<SshTarget>, EngineError> {
    let compute = &spec.compute;
    if compute.ssh_user.is_empty() || compute.ssh_private_key.is_empty() {
        return Ok(None);
    }
    let Some(host) = config.primary_ip() else {
        return Ok(None);
    };
    let key = match ctx.provider.pass_phrase() {
        Some(pass_phrase) => decrypt_string(&compute.ssh_private_key, pass_phrase)?,
        None => compute.ssh_private_key.clone(),
    };
    Ok(Some(SshTarget::new(host, compute.ssh_user.as_str(), key)))
}

/// SSH target when the desired state also asks to wait for SSH
#[must_use]
pub fn ssh_wait<'a>(spec: &NodeSpec, ssh: Option<&'a SshTarget>) -> Option<(&'a SshTarget, Duration)> {
    let timeout = spec.compute.wait_for_ssh_timeout;
    ssh.filter(|_| timeout > 0).map(|t| (t, Duration::from_secs(timeout)))
}

/// Wait for SSH and run the node init commands, if configured
///
/// # Errors
///
/// Returns the wait or command failure.
pub async fn wait_and_init(
    ctx: &EngineContext,
    spec: &NodeSpec,
    config: &NodeConfig,
    ssh: Option<&SshTarget>,
) -> Result<(), EngineError> {
    if let Some((target, timeout)) = ssh_wait(spec, ssh) {
        wait_for_ssh(ctx, config, target, timeout).await?;
        run_commands(ctx, target, &spec.compute.ssh_node_init_commands).await?;
    }
    Ok(())
}

/// Create one requested snapshot, frozen or plain
///
/// # Errors
///
/// Fails when a frozen snapshot has no SSH target or the snapshot fails.
pub async fn create_snapshot(
    ctx: &EngineContext,
    config: &NodeConfig,
    ssh: Option<&SshTarget>,
    snapshot: &SnapshotSpec,
) -> Result<(), EngineError> {
    info!("Creating snapshot {} for node {}", snapshot.name, config.compute.host_name);
    if snapshot.fsfreeze {
        let target = ssh.ok_or_else(|| {
            EngineError::Validation(format!(
                "snapshot {}: fsfreeze requires compute.ssh_user and compute.ssh_private_key",
                snapshot.name
            ))
        })?;
        create_consistent_snapshot(ctx, config, target, &snapshot.name).await
    } else {
        ctx.storage
            .create_snapshot(config, &snapshot.name, "")
            .await
            .op(&format!("create snapshot {}", snapshot.name))
    }
}

/// Refuse to power off a running node that requires safe removal
///
/// # Errors
///
/// Returns [`EngineError::SafeRemoval`] when `power_up` and `safe_removal`
/// are both set.
pub fn check_safe_removal(op: &str, spec: &NodeSpec, power_up: bool) -> Result<(), EngineError> {
    if power_up && spec.compute.safe_removal {
        return Err(EngineError::safe_removal(op, spec.hostname()));
    }
    Ok(())
}

/// Open a cluster handle for the node
///
/// # Errors
///
/// Returns the connector error tagged with `op`.
pub async fn connect_cluster(
    ctx: &EngineContext,
    config: &NodeConfig,
    wait_for_node: bool,
    op: &str,
) -> Result<Box<dyn ClusterNode>, EngineError> {
    debug!("Connecting cluster node {} (wait={})", config.compute.host_name, wait_for_node);
    ctx.cluster.connect(config, wait_for_node).await.op(op)
}

/// Wait for the grace period when one is configured
///
/// # Errors
///
/// Returns the cluster error when the node leaves `active`.
pub async fn wait_grace(node: &dyn ClusterNode, grace_secs: u64) -> Result<(), EngineError> {
    if grace_secs > 0 {
        node.node_wait_for_grace_period(Duration::from_secs(grace_secs)).await?;
    }
    Ok(())
}

/// Snapshots to delete and create when moving from `old` to `new`
///
/// Names kept in both lists are never touched. Old names are deleted only if
/// storage still has them; new names are created only if storage lacks them.
#[must_use]
pub fn snapshot_plan<'a>(
    old: &[&'a str],
    new: &[&'a str],
    existing: &[String],
) -> (Vec<&'a str>, Vec<&'a str>) {
    let kept: Vec<&str> = old.iter().filter(|name| new.contains(name)).copied().collect();
    let in_storage = |name: &str| existing.iter().any(|s| s == name);
    let delete = old
        .iter()
        .filter(|name| in_storage(name) && !kept.contains(name))
        .copied()
        .collect();
    let create = new
        .iter()
        .filter(|name| !in_storage(name) && !kept.contains(name))
        .copied()
        .collect();
    (delete, create)
}

/// Timestamp embedded at the end of an automatic snapshot name
fn snapshot_timestamp(name: &str) -> Option<DateTime<FixedOffset>> {
    let re = SNAPSHOT_TIMESTAMP.as_ref().ok()?;
    let found = re.find(name)?;
    DateTime::parse_from_rfc3339(found.as_str()).ok()
}

/// Most recent snapshot carrying a timestamp suffix
#[must_use]
pub fn latest_snapshot(names: &[String]) -> Option<&str> {
    names
        .iter()
        .filter_map(|name| snapshot_timestamp(name).map(|ts| (ts, name.as_str())))
        .max_by_key(|(ts, _)| *ts)
        .map(|(_, name)| name)
}

/// Name of the snapshot taken before re-imaging
#[must_use]
pub fn auto_snapshot_name(os_image: &str, seed_template: &str, now: DateTime<Utc>) -> String {
    format!(
        "terraform:{os_image}:{seed_template}-{}",
        now.to_rfc3339_opts(SecondsFormat::Secs, false).replace("+00:00", "-00:00")
    )
}

/// Disk size change flags between `old` and `new`
///
/// # Errors
///
/// Returns [`EngineError::Validation`] when a LUN would shrink.
pub fn resize_changes(old: &NodeSpec, new: &NodeSpec) -> Result<ChangeFlags, EngineError> {
    let mut changes = ChangeFlags::default();
    let (old_boot, new_boot) = (old.storage.boot_lun.size, new.storage.boot_lun.size);
    if old_boot != new_boot {
        if new_boot < old_boot {
            return Err(EngineError::Validation(format!(
                "boot LUN size cannot shrink from {old_boot} to {new_boot}"
            )));
        }
        changes.boot_disk_size = true;
    }
    if let (Some(old_data), Some(new_data)) = (&old.storage.data_lun, &new.storage.data_lun) {
        if old_data.size != new_data.size {
            if new_data.size < old_data.size {
                return Err(EngineError::Validation(format!(
                    "data LUN size cannot shrink from {} to {}",
                    old_data.size, new_data.size
                )));
            }
            changes.data_disk_size = true;
        }
    }
    Ok(changes)
}

/// Collapse collected step failures into one error
///
/// # Errors
///
/// Returns [`EngineError::Aggregate`] when any step failed.
pub fn aggregate(errors: Vec<String>) -> Result<(), EngineError> {
    if errors.is_empty() { Ok(()) } else { Err(EngineError::Aggregate(errors)) }
}
