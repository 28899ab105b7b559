//! Harvester hypervisor hosts
//!
//! A Harvester host installs itself. Its first boot runs the installer from
//! a bootstrap LUN copied out of the image repository; the installer writes
//! the blank boot LUN mapped behind it and halts the server. The storage is
//! then re-mapped so the boot LUN comes first and the installed system
//! boots. Hosts leave service through Harvester maintenance mode rather
//! than cordon and drain, and their storage is fixed once installed: an
//! update only applies compute changes.

use super::{Reconciler, UpdateOutcome, operation_span, traced};
use crate::error::{EngineError, ResultExt};
use crate::reconcile_helpers::{aggregate, check_safe_removal, connect_cluster, ssh_target};
use crate::wait::{
    graceful_shutdown, power_off, power_on, run_commands, wait_for_host_network, wait_for_operational_state,
    wait_for_power_state, wait_for_ssh,
};
use fabric_clients::SshTarget;
use node_config::{BladeSpec, ChangeFlags, NodeConfig, NodeSpec, PowerState};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info, warn};

/// Installer run, from first boot until it halts the server
pub const INSTALLER_TIMEOUT: Duration = Duration::from_secs(1800);
/// SSH wait after the installed system boots, unless the desired state sets one
pub const INSTALLED_BOOT_TIMEOUT: Duration = Duration::from_secs(1800);
/// Installer must bring the host network up within this
pub const INSTALLER_NETWORK_TIMEOUT: Duration = Duration::from_secs(300);

const POWER_STATE_TIMEOUT: Duration = Duration::from_secs(60);
const READY_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const MAINTENANCE_TIMEOUT: Duration = Duration::from_secs(600);
const STORAGE_ATTEMPTS: u32 = 5;
const STORAGE_RETRY_WAIT: Duration = Duration::from_secs(15);

impl Reconciler {
    /// Provision and install a new Harvester host
    ///
    /// # Errors
    ///
    /// Fails when the host exists, a preflight check fails, or a step of
    /// the installation fails. Storage is removed again only when the
    /// failure happens before the first boot.
    pub async fn create_harvester(&self, spec: &NodeSpec) -> Result<NodeConfig, EngineError> {
        traced("create", spec, self.create_harvester_node(spec)).await
    }

    /// Observed configuration, or `None` without a server or boot LUN
    ///
    /// # Errors
    ///
    /// Returns the discovery failure.
    pub async fn read_harvester(&self, spec: &NodeSpec) -> Result<Option<NodeConfig>, EngineError> {
        traced("read", spec, self.read_harvester_node(spec)).await
    }

    /// Adopt an existing Harvester host; same as [`Reconciler::read_harvester`]
    ///
    /// # Errors
    ///
    /// Returns the discovery failure.
    pub async fn import_harvester(&self, spec: &NodeSpec) -> Result<Option<NodeConfig>, EngineError> {
        traced("import", spec, self.read_harvester_node(spec)).await
    }

    /// Apply blade, power state and profile attribute changes
    ///
    /// # Errors
    ///
    /// Returns the failed step after logging the state left behind.
    pub async fn update_harvester(&self, old: &NodeSpec, new: &NodeSpec) -> Result<UpdateOutcome, EngineError> {
        let span = operation_span("update", new.hostname());
        self.update_harvester_node(old, new).instrument(span).await
    }

    /// Decommission the host
    ///
    /// # Errors
    ///
    /// Refuses a running host with safe removal set, and stops when the
    /// host cannot be taken out of the cluster. Cleanup failures are
    /// returned together.
    pub async fn delete_harvester(&self, spec: &NodeSpec) -> Result<(), EngineError> {
        traced("delete", spec, self.delete_harvester_node(spec)).await
    }

    async fn create_harvester_node(&self, spec: &NodeSpec) -> Result<NodeConfig, EngineError> {
        let ctx = &self.ctx;
        let mut config = ctx.node_config(spec)?;
        let host = config.compute.host_name.clone();
        if config.storage.bootstrap_lun.os_image.name.is_empty() {
            return Err(EngineError::Validation(format!(
                "Harvester host {host} requires storage.bootstrap_lun.os_image"
            )));
        }
        let ssh = ssh_target(ctx, spec, &config)?;

        if ctx.compute.discover_server(&mut config).await.op("discover server")? {
            return Err(EngineError::Validation(format!("server {host} already exists")));
        }
        self.harvester_preflight(&mut config).await?;

        info!("Allocating IP addresses for Harvester host {}", host);
        ctx.ipam.allocate(&mut config).await.op("allocate IP addresses")?;

        if let Err(e) = self.provision_harvester(&mut config).await {
            error!("Creating Harvester host {} failed: {}", host, e);
            if let Err(e) = ctx.storage.delete_harvester_storage(&config).await {
                warn!("Storage rollback for Harvester host {} failed: {}", host, e);
            }
            return Err(e);
        }
        self.install_harvester(spec, &config, ssh.as_ref()).await?;
        config.compute.power_state = PowerState::Up;

        info!("Waiting for Harvester host {} to register", host);
        connect_cluster(ctx, &config, true, "cluster connect").await?;
        info!("Harvester host {} created", host);
        Ok(config)
    }

    async fn harvester_preflight(&self, config: &mut NodeConfig) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        info!("Running create preflight checks for Harvester host {}", config.compute.host_name);
        let checks = [
            ("IPAM", ctx.ipam.allocate_preflight(config).await),
            ("Harvester storage", ctx.storage.create_harvester_storage_preflight(config).await),
            ("compute", ctx.compute.create_server_preflight(config).await),
            ("seed storage", ctx.storage.create_seed_storage_preflight(config).await),
        ];
        let failures: Vec<String> = checks
            .into_iter()
            .filter_map(|(check, result)| result.err().map(|e| format!("{check} preflight: {e}")))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Preflight(failures))
        }
    }

    /// Storage, service profile and seed, retrying the storage steps
    async fn provision_harvester(&self, config: &mut NodeConfig) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        let host = config.compute.host_name.clone();

        info!("Creating Harvester storage for host {}", host);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match ctx.storage.create_harvester_storage(config).await {
                Ok(()) => break,
                Err(e) if attempt < STORAGE_ATTEMPTS => {
                    warn!("Harvester storage for {} failed (attempt {}): {}", host, attempt, e);
                    sleep(STORAGE_RETRY_WAIT).await;
                    if let Err(e) = ctx.storage.delete_harvester_storage(config).await {
                        debug!("Cleaning partial storage of {}: {}", host, e);
                    }
                    sleep(STORAGE_RETRY_WAIT * attempt).await;
                }
                Err(e) => return Err(EngineError::from(e).context("create Harvester storage")),
            }
        }

        info!("Creating service profile for Harvester host {}", host);
        ctx.compute.create_server(config).await.op("create server")?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match ctx.storage.create_seed_storage(config).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < STORAGE_ATTEMPTS => {
                    warn!("Seed storage for {} failed (attempt {}): {}", host, attempt, e);
                    sleep(STORAGE_RETRY_WAIT * attempt).await;
                }
                Err(e) => return Err(EngineError::from(e).context("create seed storage")),
            }
        }
    }

    /// Run the installer, swap the boot LUN in and boot the installed system
    async fn install_harvester(
        &self,
        spec: &NodeSpec,
        config: &NodeConfig,
        ssh: Option<&SshTarget>,
    ) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        let host = &config.compute.host_name;
        let ip = config
            .primary_ip()
            .ok_or_else(|| EngineError::Validation(format!("Harvester host {host} has no node IP address")))?;

        power_on(ctx, config).await?;
        wait_for_host_network(ctx, ip, INSTALLER_NETWORK_TIMEOUT)
            .await
            .op("wait for installer network")?;
        info!("Waiting for the installer on {} to finish", host);
        if !wait_for_operational_state(ctx, config, "power-off", INSTALLER_TIMEOUT).await {
            return Err(EngineError::Timeout(format!(
                "installer on {host} did not halt within {}s",
                INSTALLER_TIMEOUT.as_secs()
            )));
        }
        if let Err(e) = power_off(ctx, config).await {
            warn!("Powering off halted host {} failed: {}", host, e);
        }
        wait_for_power_state(ctx, config, PowerState::Down, POWER_STATE_TIMEOUT).await?;

        info!("Mapping installed boot LUN of {}", host);
        ctx.storage
            .remap_harvester_storage(config)
            .await
            .op("remap Harvester storage")?;
        power_on(ctx, config).await?;
        if let Some(target) = ssh {
            wait_for_ssh(ctx, config, target, installed_boot_timeout(spec)).await?;
            run_commands(ctx, target, &spec.compute.ssh_node_init_commands).await?;
        }
        Ok(())
    }

    async fn read_harvester_node(&self, spec: &NodeSpec) -> Result<Option<NodeConfig>, EngineError> {
        let ctx = &self.ctx;
        let mut config = ctx.node_config(spec)?;
        let host = config.compute.host_name.clone();

        if !ctx.compute.discover_server(&mut config).await.op("discover server")? {
            info!("Server for Harvester host {} not found", host);
            return Ok(None);
        }
        if !ctx
            .storage
            .discover_harvester_storage(&mut config)
            .await
            .op("discover Harvester storage")?
        {
            info!("Boot LUN for Harvester host {} not found", host);
            return Ok(None);
        }
        ctx.ipam.discover(&mut config).await.op("discover IP addresses")?;
        Ok(Some(config))
    }

    async fn update_harvester_node(&self, old: &NodeSpec, new: &NodeSpec) -> Result<UpdateOutcome, EngineError> {
        let ctx = &self.ctx;
        let mut config = ctx.node_config(new)?;
        let host = config.compute.host_name.clone();
        if !ctx.compute.discover_server(&mut config).await.op("discover server")? {
            return Err(EngineError::Validation(format!("server {host} not found")));
        }
        let ssh = ssh_target(ctx, new, &config)?;
        let mut changes = ChangeFlags::default();

        if let Err(e) = self
            .update_harvester_compute(old, new, &mut config, ssh.as_ref(), &mut changes)
            .await
        {
            match self.read_harvester_node(new).await {
                Ok(Some(observed)) => warn!(
                    "Harvester host {} left with power state {}",
                    host, observed.compute.power_state
                ),
                Ok(None) => warn!("Harvester host {} no longer exists", host),
                Err(e) => warn!("Refreshing Harvester host {} failed: {}", host, e),
            }
            return Err(e);
        }
        if old.storage != new.storage {
            warn!("Storage of installed Harvester host {} is not changed", host);
        }

        let observed = self.read_harvester_node(new).await?;
        info!("Harvester host {} updated: {:?}", host, changes);
        Ok(UpdateOutcome {
            config: observed,
            changes,
        })
    }

    async fn update_harvester_compute(
        &self,
        old: &NodeSpec,
        new: &NodeSpec,
        config: &mut NodeConfig,
        ssh: Option<&SshTarget>,
        changes: &mut ChangeFlags,
    ) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        let blade_changed = match &new.compute.blade_spec {
            Some(spec) => {
                let previous = old
                    .compute
                    .blade_spec
                    .clone()
                    .unwrap_or_else(|| BladeSpec::from_assigned(&config.compute.blade_assigned));
                spec.requires_reassignment(&previous, &config.compute.blade_assigned)?
            }
            None => false,
        };
        let current = ctx.compute.get_power_state(config).await.op("get power state")?;
        let desired = new.compute.powerstate;

        if blade_changed || current != desired {
            changes.blade_spec |= blade_changed;
            changes.power_state |= current != desired;
            info!(
                "Updating Harvester host {}: blade change {}, power {} -> {}",
                config.compute.host_name, blade_changed, current, desired
            );
            let mut gate = ctx.gate.acquire().await?;
            let result = self
                .cycle_harvester(new, config, ssh, current, desired, blade_changed)
                .await
                .map_err(|e| e.context("update compute"));
            gate.record(result)?;
        }

        if old.compute.description != new.compute.description || old.compute.label != new.compute.label {
            ctx.compute
                .update_server_attributes(config)
                .await
                .op("update server attributes")?;
        }
        Ok(())
    }

    async fn cycle_harvester(
        &self,
        spec: &NodeSpec,
        config: &mut NodeConfig,
        ssh: Option<&SshTarget>,
        current: PowerState,
        desired: PowerState,
        blade_changed: bool,
    ) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        let host = config.compute.host_name.clone();
        if blade_changed {
            ctx.compute
                .update_server_preflight(config)
                .await
                .op("update server preflight")?;
        }
        if current.is_up() {
            check_safe_removal("update compute", spec, true)?;
            let running = ctx.compute.get_operational_state(config).await.op("get operational state")? == "ok";
            if running {
                let node = connect_cluster(ctx, config, true, "cluster connect").await?;
                node.enable_maintenance_mode(self.maintenance_timeout()).await?;
                let shutdown = ssh.filter(|_| spec.compute.wait_for_ssh_timeout > 0);
                graceful_shutdown(ctx, config, shutdown).await?;
            } else {
                power_off(ctx, config).await?;
            }
        }
        if blade_changed {
            info!("Reassigning blade for Harvester host {}", host);
            ctx.compute.update_server(config).await.op("update server")?;
        }
        if desired.is_up() {
            power_on(ctx, config).await?;
            if let Some(target) = ssh {
                wait_for_ssh(ctx, config, target, installed_boot_timeout(spec)).await?;
            }
            let node = connect_cluster(ctx, config, true, "cluster connect").await?;
            node.disable_maintenance_mode(self.maintenance_timeout()).await?;
        }
        config.compute.power_state = desired;
        Ok(())
    }

    async fn delete_harvester_node(&self, spec: &NodeSpec) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        let mut config = ctx.node_config(spec)?;
        let host = config.compute.host_name.clone();
        let mut errors = Vec::new();

        if ctx.compute.discover_server(&mut config).await.op("discover server")? {
            let power_up = ctx.compute.get_power_state(&config).await.op("get power state")?.is_up();
            let running =
                power_up && ctx.compute.get_operational_state(&config).await.op("get operational state")? == "ok";
            check_safe_removal("delete", spec, running)?;

            let mut node = connect_cluster(ctx, &config, false, "cluster connect").await?;
            if running {
                let ready = match node.node_refresh_id().await {
                    Ok(()) => node.node_wait_until_ready(READY_CHECK_TIMEOUT).await,
                    Err(e) => Err(e),
                };
                match ready {
                    Ok(()) => node
                        .enable_maintenance_mode(self.maintenance_timeout())
                        .await
                        .op("enable maintenance mode")?,
                    Err(e) => info!("Harvester host {} not ready, skipping maintenance mode: {}", host, e),
                }
            }
            info!("Removing Harvester host {} from the cluster", host);
            node.node_delete().await.op("remove host from cluster")?;
            if power_up {
                power_off(ctx, &config).await?;
            }
            if let Err(e) = ctx.compute.delete_server(&config).await {
                errors.push(format!("delete server: {e}"));
            }
        } else {
            info!("Server for Harvester host {} already gone", host);
        }

        if let Err(e) = ctx.storage.delete_harvester_storage(&config).await {
            errors.push(format!("delete Harvester storage: {e}"));
        }
        if let Err(e) = ctx.ipam.release(&config).await {
            errors.push(format!("release IP addresses: {e}"));
        }
        ctx.forget(&host);
        aggregate(errors)
    }

    fn maintenance_timeout(&self) -> Duration {
        match self.ctx.wait_for_node_timeout() {
            0 => MAINTENANCE_TIMEOUT,
            secs => Duration::from_secs(secs),
        }
    }
}

fn installed_boot_timeout(spec: &NodeSpec) -> Duration {
    match spec.compute.wait_for_ssh_timeout {
        0 => INSTALLED_BOOT_TIMEOUT,
        secs => Duration::from_secs(secs),
    }
}

#[cfg(test)]
mod tests {
    use crate::error::EngineError;
    use crate::test_utils::{HOSTNAME, TestFabric, node_spec};
    use fabric_clients::RepoKind;
    use node_config::request::BootstrapLunSpec;
    use node_config::{NodeSpec, PowerState};

    const INSTALLER: &str = "harvester-v1.3.1-amd64";

    fn harvester_spec() -> NodeSpec {
        let mut spec = node_spec();
        spec.storage.boot_lun.os_image.clear();
        spec.storage.seed_lun.seed_template = "seeds/harvester-config.tmpl".to_string();
        spec.storage.bootstrap_lun = Some(BootstrapLunSpec {
            name: String::new(),
            os_image: INSTALLER.to_string(),
        });
        spec.compute.ssh_user = "rancher".to_string();
        spec.compute.ssh_node_init_commands = vec!["sudo systemctl is-active rke2-server".to_string()];
        spec
    }

    fn fabric_with_installer() -> TestFabric {
        let fabric = TestFabric::new();
        fabric
            .storage
            .add_repo_item(RepoKind::Image, INSTALLER, "http://images/harvester.iso");
        fabric.compute.halt_after_boots(1);
        fabric
    }

    /// Installed, running host with a cleared journal
    async fn installed_host() -> TestFabric {
        let fabric = fabric_with_installer();
        fabric.reconciler().create_harvester(&harvester_spec()).await.unwrap();
        fabric.journal.clear();
        fabric
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_installs_then_boots_installed_system() {
        let fabric = fabric_with_installer();

        let config = fabric.reconciler().create_harvester(&harvester_spec()).await.unwrap();

        assert_eq!(
            fabric.calls(),
            vec![
                "compute.discover_server",
                "ipam.allocate_preflight",
                "storage.create_harvester_storage_preflight",
                "compute.create_server_preflight",
                "storage.create_seed_storage_preflight",
                "ipam.allocate",
                "storage.create_harvester_storage",
                "compute.create_server",
                "storage.create_seed_storage",
                "compute.set_power_state(up)",
                "compute.set_power_state(down)",
                "storage.remap_harvester_storage",
                "compute.set_power_state(up)",
                "shell.run(uname -a)",
                "shell.run(sudo systemctl is-active rke2-server)",
            ]
        );
        let volume = fabric.storage.volume("node1_iboot").unwrap();
        assert!(!volume.bootstrap && !volume.seed);
        assert_eq!(volume.boot_lun_id, 0);
        assert_eq!(config.storage.bootstrap_lun.lun.name, "node1_bootstrap");
        assert_eq!(config.storage.bootstrap_lun.lun.size, 8);
        assert_eq!(config.compute.power_state, PowerState::Up);
        assert!(fabric.journal.contains("cluster.connect(wait=true)"));
    }

    #[tokio::test]
    async fn test_create_requires_installer_image() {
        let fabric = fabric_with_installer();
        let mut spec = harvester_spec();
        spec.storage.bootstrap_lun = None;

        let err = fabric.reconciler().create_harvester(&spec).await.unwrap_err();

        assert!(matches!(err, EngineError::Validation(_)));
        assert!(fabric.journal.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_preflight_reports_missing_installer() {
        let fabric = TestFabric::new();

        let err = fabric.reconciler().create_harvester(&harvester_spec()).await.unwrap_err();

        let EngineError::Preflight(failures) = &err else {
            panic!("expected preflight error, got {err}");
        };
        assert_eq!(failures.len(), 1);
        assert!(failures[0].starts_with("Harvester storage preflight"));
        assert!(failures[0].contains(INSTALLER));
        assert!(!fabric.calls().iter().any(|c| c == "ipam.allocate"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_failures_retry_then_roll_back() {
        let fabric = fabric_with_installer();
        fabric.storage.fail_on("create_harvester_storage", "aggregate offline");

        let err = fabric.reconciler().create_harvester(&harvester_spec()).await.unwrap_err();

        assert!(err.to_string().contains("create Harvester storage"));
        assert!(err.to_string().contains("aggregate offline"));
        let calls = fabric.calls();
        assert_eq!(calls.iter().filter(|c| *c == "storage.create_harvester_storage").count(), 5);
        // cleanup between attempts plus the final rollback
        assert_eq!(calls.iter().filter(|c| *c == "storage.delete_harvester_storage").count(), 5);
        assert!(!calls.iter().any(|c| c == "compute.create_server"));
        assert!(fabric.compute.server(HOSTNAME).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_installer_that_never_halts_times_out() {
        let fabric = fabric_with_installer();
        fabric.compute.halt_after_boots(0);

        let err = fabric.reconciler().create_harvester(&harvester_spec()).await.unwrap_err();

        assert_eq!(err.to_string(), "Timeout: installer on node1 did not halt within 1800s");
        assert!(!fabric.journal.contains("storage.remap_harvester_storage"));
        // a booted host keeps its storage for inspection
        assert!(fabric.storage.volume("node1_iboot").unwrap().bootstrap);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_and_import_installed_host() {
        let fabric = installed_host().await;
        let reconciler = fabric.reconciler();

        let read = reconciler.read_harvester(&harvester_spec()).await.unwrap().unwrap();
        let imported = reconciler.import_harvester(&harvester_spec()).await.unwrap().unwrap();

        assert_eq!(read, imported);
        assert_eq!(read.storage.boot_lun.os_image.name, INSTALLER);
        assert_eq!(read.storage.boot_lun.lun.size, 20);
        assert_eq!(read.compute.power_state, PowerState::Up);
        assert!(!fabric.journal.contains("cluster."));
    }

    #[tokio::test]
    async fn test_read_missing_host() {
        let fabric = TestFabric::new();
        assert!(fabric.reconciler().read_harvester(&harvester_spec()).await.unwrap().is_none());
        assert_eq!(fabric.calls(), vec!["compute.discover_server"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_off_goes_through_maintenance_mode() {
        let fabric = installed_host().await;
        let old = harvester_spec();
        let mut new = harvester_spec();
        new.compute.powerstate = PowerState::Down;

        let outcome = fabric.reconciler().update_harvester(&old, &new).await.unwrap();

        assert!(outcome.changes.power_state);
        assert!(fabric.pos("cluster.enable_maintenance_mode") < fabric.pos("shell.run(sudo shutdown -h 0)"));
        assert!(fabric.pos("shell.run(sudo shutdown -h 0)") < fabric.pos("compute.set_power_state(down)"));
        assert!(!fabric.journal.contains("cluster.node_cordon_drain"));
        assert!(!fabric.journal.contains("cluster.disable_maintenance_mode"));
        assert_eq!(fabric.compute.server(HOSTNAME).unwrap().power, PowerState::Down);

        fabric.journal.clear();
        fabric.reconciler().update_harvester(&new, &old).await.unwrap();

        assert!(fabric.pos("compute.set_power_state(up)") < fabric.pos("shell.run(uname -a)"));
        assert!(fabric.pos("shell.run(uname -a)") < fabric.pos("cluster.disable_maintenance_mode"));
        assert!(!fabric.journal.contains("cluster.enable_maintenance_mode"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_maintenance_mode_keeps_host_running() {
        let fabric = installed_host().await;
        fabric.node.fail_on("enable_maintenance_mode", "VMs cannot be migrated");
        let old = harvester_spec();
        let mut new = harvester_spec();
        new.compute.powerstate = PowerState::Down;

        let err = fabric.reconciler().update_harvester(&old, &new).await.unwrap_err();

        assert!(err.to_string().contains("VMs cannot be migrated"));
        assert!(!fabric.journal.contains("compute.set_power_state"));
        assert_eq!(fabric.compute.server(HOSTNAME).unwrap().power, PowerState::Up);
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_change_is_not_applied() {
        let fabric = installed_host().await;
        let old = harvester_spec();
        let mut new = harvester_spec();
        new.storage.boot_lun.size = 40;

        let outcome = fabric.reconciler().update_harvester(&old, &new).await.unwrap();

        assert_eq!(outcome.changes, node_config::ChangeFlags::default());
        assert_eq!(fabric.storage.volume("node1_iboot").unwrap().boot_size, 20);
        assert!(!fabric.journal.contains("compute.set_power_state"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_running_host() {
        let fabric = installed_host().await;

        fabric.reconciler().delete_harvester(&harvester_spec()).await.unwrap();

        let order = [
            "cluster.node_refresh_id",
            "cluster.node_wait_until_ready",
            "cluster.enable_maintenance_mode",
            "cluster.node_delete",
            "compute.set_power_state(down)",
            "compute.delete_server",
            "storage.delete_harvester_storage",
            "ipam.release",
        ];
        for pair in order.windows(2) {
            assert!(fabric.pos(pair[0]) < fabric.pos(pair[1]), "{} before {}", pair[0], pair[1]);
        }
        assert!(fabric.storage.volume("node1_iboot").is_none());
        assert!(!fabric.ctx.is_cached(HOSTNAME));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_unready_host_skips_maintenance_mode() {
        let fabric = installed_host().await;
        fabric.node.fail_on("node_wait_until_ready", "kubelet not ready");

        fabric.reconciler().delete_harvester(&harvester_spec()).await.unwrap();

        assert!(!fabric.journal.contains("cluster.enable_maintenance_mode"));
        assert!(fabric.journal.contains("cluster.node_delete"));
        assert!(fabric.compute.server(HOSTNAME).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_refused_with_safe_removal() {
        let fabric = installed_host().await;
        let mut spec = harvester_spec();
        spec.compute.safe_removal = true;

        let err = fabric.reconciler().delete_harvester(&spec).await.unwrap_err();

        assert!(matches!(err, EngineError::SafeRemoval(_)));
        assert!(!fabric.journal.contains("cluster."));
        assert!(fabric.storage.volume("node1_iboot").is_some());
    }
}
