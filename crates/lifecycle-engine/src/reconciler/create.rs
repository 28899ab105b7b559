//! Node creation

use super::Reconciler;
use crate::error::{EngineError, ResultExt};
use crate::reconcile_helpers::{connect_cluster, create_snapshot, ssh_target, wait_and_init};
use crate::wait::power_on;
use fabric_clients::SshTarget;
use node_config::{NodeConfig, NodeSpec, node_annotations};
use tracing::{error, info, warn};

impl Reconciler {
    pub(crate) async fn create_node(&self, spec: &NodeSpec) -> Result<NodeConfig, EngineError> {
        let ctx = &self.ctx;
        let mut config = ctx.node_config(spec)?;
        let host = config.compute.host_name.clone();
        let ssh = ssh_target(ctx, spec, &config)?;
        if ssh.is_none() && spec.snapshots.iter().any(|s| s.fsfreeze) {
            return Err(EngineError::Validation(
                "fsfreeze snapshots require compute.ssh_user and compute.ssh_private_key".to_string(),
            ));
        }

        if ctx.compute.discover_server(&mut config).await.op("discover server")? {
            return Err(EngineError::Validation(format!("server {host} already exists")));
        }

        self.create_preflight(&config).await?;

        info!("Allocating IP addresses for node {}", host);
        ctx.ipam.allocate(&mut config).await.op("allocate IP addresses")?;

        // Storage created from here on is rolled back if provisioning fails
        if let Err(e) = self.provision(spec, &mut config, ssh.as_ref()).await {
            error!("Creating node {} failed: {}", host, e);
            self.rollback_storage(&config).await;
            return Err(e);
        }

        if spec.compute.powerstate.is_up() {
            info!("Publishing node {} annotations to the cluster", host);
            let node = connect_cluster(ctx, &config, true, "cluster connect").await?;
            let annotations = node_annotations(&config)?;
            node.node_set_annotations_labels_taints(&annotations, &config.labels, &config.taints)
                .await
                .op("set node annotations")?;
        }
        config.storage.snapshots = ctx.storage.get_snapshots(&config).await.op("list snapshots")?;
        info!("Node {} created", host);
        Ok(config)
    }

    /// Run every create preflight and report all failures together
    async fn create_preflight(&self, config: &NodeConfig) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        info!("Running create preflight checks for node {}", config.compute.host_name);
        let checks = [
            ("IPAM", ctx.ipam.allocate_preflight(config).await),
            ("boot storage", ctx.storage.create_boot_storage_preflight(config).await),
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

    async fn provision(
        &self,
        spec: &NodeSpec,
        config: &mut NodeConfig,
        ssh: Option<&SshTarget>,
    ) -> Result<(), EngineError> {
        let ctx = &self.ctx;
        let host = config.compute.host_name.clone();

        info!("Creating boot storage for node {}", host);
        ctx.storage.create_boot_storage(config).await.op("create boot storage")?;

        info!("Creating service profile for node {}", host);
        ctx.compute.create_server(config).await.op("create server")?;

        if config.storage.data_nvme.size > 0 {
            info!("Creating NVMe data storage for node {}", host);
            ctx.storage.create_nvme_storage(config).await.op("create NVMe storage")?;
        }

        info!("Creating seed storage for node {}", host);
        ctx.storage.create_seed_storage(config).await.op("create seed storage")?;

        if spec.compute.powerstate.is_up() {
            power_on(ctx, config).await?;
            config.compute.power_state = spec.compute.powerstate;
            wait_and_init(ctx, spec, config, ssh).await?;
        }

        for snapshot in &spec.snapshots {
            create_snapshot(ctx, config, ssh, snapshot).await?;
        }
        Ok(())
    }

    /// Best-effort removal of storage created by a failed create
    async fn rollback_storage(&self, config: &NodeConfig) {
        warn!("Rolling back storage of node {}", config.compute.host_name);
        if let Err(e) = self.ctx.storage.delete_boot_storage(config).await {
            warn!("Storage rollback for node {} failed: {}", config.compute.host_name, e);
        }
    }
}
