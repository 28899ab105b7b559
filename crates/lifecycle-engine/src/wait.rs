//! Power and reachability helpers
//!
//! Bounded polling loops around the compute fabric and the remote shell:
//! waiting for SSH after boot (power-cycling a node that never comes up),
//! graceful shutdown with a forced power-off fallback, and plain power
//! switching.

use crate::context::EngineContext;
use crate::error::EngineError;
use fabric_clients::SshTarget;
use node_config::{NodeConfig, PowerState};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Interval between power, operational state and network polls
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// How long `uname -a` is retried once the SSH port answers
pub const SSH_PROBE_WINDOW: Duration = Duration::from_secs(60);
/// Power-cycle a node that stays unreachable this long
pub const NODE_RESTART_TIMEOUT: Duration = Duration::from_secs(600);
/// Wait for the OS to power the server off after `shutdown`
pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);
/// Delay before polling for power-off after `shutdown`
pub const GRACEFUL_POWER_OFF: Duration = Duration::from_secs(10);

const SHUTDOWN_COMMAND: &str = "sudo shutdown -h 0";
const PROBE_COMMAND: &str = "uname -a";

/// Power the server on
///
/// # Errors
///
/// Returns the compute fabric error.
pub async fn power_on(ctx: &EngineContext, config: &NodeConfig) -> Result<(), EngineError> {
    info!("Powering on node {}", config.compute.host_name);
    ctx.compute.set_power_state(config, PowerState::Up).await?;
    Ok(())
}

/// Power the server off without waiting for the OS
///
/// # Errors
///
/// Returns the compute fabric error.
pub async fn power_off(ctx: &EngineContext, config: &NodeConfig) -> Result<(), EngineError> {
    info!("Powering off node {}", config.compute.host_name);
    ctx.compute.set_power_state(config, PowerState::Down).await?;
    Ok(())
}

/// Shut the OS down over SSH, then force power off
///
/// The shutdown command and the power-off poll are best effort; only the
/// final forced power-off can fail the call. Without SSH credentials the
/// server is powered off directly.
///
/// # Errors
///
/// Returns the compute fabric error of the forced power-off.
pub async fn graceful_shutdown(
    ctx: &EngineContext,
    config: &NodeConfig,
    ssh: Option<&SshTarget>,
) -> Result<(), EngineError> {
    if let Some(target) = ssh {
        info!("Shutting down node {}", config.compute.host_name);
        if let Err(e) = ctx.shell.run(target, SHUTDOWN_COMMAND).await {
            debug!("Shutdown command on {} ended with: {}", target.host, e);
        }
        sleep(GRACEFUL_POWER_OFF).await;
        if !wait_for_operational_state(ctx, config, "power-off", GRACEFUL_SHUTDOWN_TIMEOUT).await {
            warn!(
                "Node {} did not power off within {:?}, forcing power off",
                config.compute.host_name, GRACEFUL_SHUTDOWN_TIMEOUT
            );
        }
    }
    power_off(ctx, config).await
}

/// Poll the fabric's operational state until it equals `state`
pub(crate) async fn wait_for_operational_state(
    ctx: &EngineContext,
    config: &NodeConfig,
    state: &str,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match ctx.compute.get_operational_state(config).await {
            Ok(current) if current == state => return true,
            Ok(current) => debug!("Node {} operational state {}", config.compute.host_name, current),
            Err(e) => debug!("Operational state of {}: {}", config.compute.host_name, e),
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Poll the fabric until the server reports power `state`
///
/// # Errors
///
/// Returns the compute error, or [`EngineError::Timeout`] with the last
/// observed state.
pub async fn wait_for_power_state(
    ctx: &EngineContext,
    config: &NodeConfig,
    state: PowerState,
    timeout: Duration,
) -> Result<(), EngineError> {
    let deadline = Instant::now() + timeout;
    loop {
        let current = ctx.compute.get_power_state(config).await?;
        if current == state {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(EngineError::Timeout(format!(
                "node {} power state {current} after {}s, expected {state}",
                config.compute.host_name,
                timeout.as_secs()
            )));
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Wait until the SSH port of `host` accepts connections
///
/// # Errors
///
/// Returns [`EngineError::Timeout`] once `timeout` is exceeded.
pub async fn wait_for_host_network(ctx: &EngineContext, host: &str, timeout: Duration) -> Result<(), EngineError> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if ctx.shell.port_open(host).await {
            return Ok(());
        }
        sleep(POLL_INTERVAL).await;
    }
    Err(EngineError::Timeout(format!(
        "host {host} not on network after {}s",
        timeout.as_secs()
    )))
}

/// Wait until the node answers `uname -a` over SSH
///
/// A node that stays unreachable for [`NODE_RESTART_TIMEOUT`] is power
/// cycled and the wait continues.
///
/// # Errors
///
/// Returns [`EngineError::Timeout`] with the last remote error once
/// `timeout` is exceeded, or the compute error of a power cycle.
pub async fn wait_for_ssh(
    ctx: &EngineContext,
    config: &NodeConfig,
    target: &SshTarget,
    timeout: Duration,
) -> Result<(), EngineError> {
    info!("Waiting for SSH on node {} ({})", config.compute.host_name, target.host);
    let deadline = Instant::now() + timeout;
    let mut restart_at = Instant::now() + NODE_RESTART_TIMEOUT;
    let mut last_error: Option<String> = None;
    while Instant::now() < deadline {
        if ctx.shell.port_open(&target.host).await {
            let probe_deadline = Instant::now() + SSH_PROBE_WINDOW;
            loop {
                match ctx.shell.run(target, PROBE_COMMAND).await {
                    Ok(_) => {
                        info!("Node {} is reachable over SSH", config.compute.host_name);
                        return Ok(());
                    }
                    Err(e) => last_error = Some(e.to_string()),
                }
                if Instant::now() >= probe_deadline {
                    break;
                }
                sleep(POLL_INTERVAL).await;
            }
        }
        if Instant::now() >= restart_at {
            warn!("Node {} unreachable, power cycling", config.compute.host_name);
            power_off(ctx, config).await?;
            power_on(ctx, config).await?;
            restart_at = Instant::now() + NODE_RESTART_TIMEOUT;
        }
        sleep(POLL_INTERVAL).await;
    }
    let secs = timeout.as_secs();
    Err(EngineError::Timeout(match last_error {
        Some(e) => format!("exceeded timeout {secs}: {e}"),
        None => format!("exceeded timeout {secs}"),
    }))
}

/// Run commands over SSH in order, stopping at the first failure
///
/// # Errors
///
/// Returns the failed command with its remote error.
pub async fn run_commands(
    ctx: &EngineContext,
    target: &SshTarget,
    commands: &[String],
) -> Result<(), EngineError> {
    for command in commands {
        debug!("Running on {}: {}", target.host, command);
        ctx.shell
            .run(target, command)
            .await
            .map_err(|e| EngineError::from(e).context(format!("command \"{command}\"")))?;
    }
    Ok(())
}
