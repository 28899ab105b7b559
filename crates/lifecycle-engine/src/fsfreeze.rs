//! Consistent snapshots
//!
//! Freezes every device-mapper backed filesystem and `/` on the node, takes
//! the storage snapshot while the node reports `frozen`, and always waits for
//! the remote command so the unfreeze tail runs.

use crate::context::EngineContext;
use crate::error::EngineError;
use fabric_clients::SshTarget;
use node_config::NodeConfig;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Printed by the remote command once every filesystem is frozen
pub const FROZEN_SENTINEL: &str = "frozen";
/// Sentinel poll attempts
pub const SENTINEL_POLLS: u32 = 30;
pub const SENTINEL_INTERVAL: Duration = Duration::from_millis(500);

/// Mount points of filesystems on `/dev/mapper` devices, one per line
pub const LIST_FILESYSTEMS: &str = r"cat /proc/mounts | sed -n 's/^\/dev\/mapper\/[^ ]\+[ ]\+\(\/[^ \/]\{1,64\}\).*/\1/p' | uniq";

/// Composite freeze command for `filesystems`
///
/// `/` is frozen last and thawed first.
#[must_use]
pub fn freeze_command(filesystems: &[&str]) -> String {
    let freeze: Vec<String> = filesystems
        .iter()
        .map(|fs| format!("fsfreeze -f {fs}"))
        .chain(std::iter::once("fsfreeze -f /".to_string()))
        .collect();
    let thaw: Vec<String> = std::iter::once("fsfreeze -u /".to_string())
        .chain(filesystems.iter().map(|fs| format!("fsfreeze -u {fs}")))
        .collect();
    format!(
        "sudo -n sh -c 'sync && sleep 5 && sync && {{ {} ; }} && (echo -n {FROZEN_SENTINEL} && sleep 5); {{ {} ; }}'",
        freeze.join(" && "),
        thaw.join("; ")
    )
}

/// Create snapshot `name` with the node's filesystems frozen
///
/// Succeeds without effect when the snapshot already exists.
///
/// # Errors
///
/// Returns [`EngineError::Snapshot`] joining, in order, a missing sentinel,
/// a snapshot failure and a remote command failure.
pub async fn create_consistent_snapshot(
    ctx: &EngineContext,
    config: &NodeConfig,
    target: &SshTarget,
    name: &str,
) -> Result<(), EngineError> {
    if ctx.storage.snapshot_exists(config, name).await? {
        info!("Snapshot {} of node {} already exists", name, config.compute.host_name);
        return Ok(());
    }
    let mounts = ctx
        .shell
        .run(target, LIST_FILESYSTEMS)
        .await
        .map_err(|e| EngineError::Snapshot(format!("failed to list filesystems: {e}")))?;
    let filesystems: Vec<&str> = mounts.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    info!("Freezing {} filesystem(s) on node {} for snapshot {}", filesystems.len() + 1, config.compute.host_name, name);
    let process = ctx
        .shell
        .start(target, &freeze_command(&filesystems))
        .await
        .map_err(|e| EngineError::Snapshot(format!("failed to start fsfreeze: {e}")))?;

    let mut frozen = false;
    for _ in 0..SENTINEL_POLLS {
        if process.output().contains(FROZEN_SENTINEL) {
            frozen = true;
            break;
        }
        sleep(SENTINEL_INTERVAL).await;
    }

    let mut errors = Vec::new();
    if frozen {
        if let Err(e) = ctx.storage.create_snapshot(config, name, "fsfreeze").await {
            errors.push(format!("failed to create snapshot {name}: {e}"));
        }
    } else {
        errors.push("fsfreeze did not complete, snapshot is not created".to_string());
    }
    if let Err(e) = process.wait().await {
        errors.push(format!("fsfreeze command failed: {e}"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        warn!("Consistent snapshot {} of node {} failed", name, config.compute.host_name);
        Err(EngineError::Snapshot(errors.join(" , ")))
    }
}
