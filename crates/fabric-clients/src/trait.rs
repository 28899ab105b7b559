//! Fabric client traits
//!
//! The lifecycle engine only talks to the compute fabric, storage controller,
//! IPAM and remote hosts through these traits. Vendor clients implement them;
//! tests use the mocks behind the `test-util` feature.
//! All async methods must be `Send` to work with Tokio's work-stealing runtime.

use crate::error::FabricError;
use node_config::{NodeConfig, PowerState};
use std::fmt;

/// Compute fabric (service profiles and blades)
///
/// Methods taking `&mut NodeConfig` fill in discovered attributes: the
/// service profile DN, the assigned blade, NIC MAC addresses and the power
/// state.
#[async_trait::async_trait]
pub trait ComputeClient: Send + Sync {
    /// Look up the service profile for `config.compute.host_name`
    async fn discover_server(&self, config: &mut NodeConfig) -> Result<bool, FabricError>;

    /// Validate blade availability and template vNICs before creating
    async fn create_server_preflight(&self, config: &NodeConfig) -> Result<(), FabricError>;

    /// Create the service profile and bind a blade matching `blade_spec`
    async fn create_server(&self, config: &mut NodeConfig) -> Result<(), FabricError>;

    /// Validate a blade matching the new `blade_spec` is available
    async fn update_server_preflight(&self, config: &NodeConfig) -> Result<(), FabricError>;

    /// Re-bind the service profile to a blade matching `blade_spec`
    async fn update_server(&self, config: &mut NodeConfig) -> Result<(), FabricError>;

    /// Update description/label without touching the blade binding
    async fn update_server_attributes(&self, config: &NodeConfig) -> Result<(), FabricError>;

    async fn delete_server(&self, config: &NodeConfig) -> Result<(), FabricError>;

    async fn get_power_state(&self, config: &NodeConfig) -> Result<PowerState, FabricError>;

    async fn set_power_state(&self, config: &NodeConfig, state: PowerState) -> Result<(), FabricError>;

    /// Operational state as reported by the fabric (e.g. `ok`, `power-off`)
    async fn get_operational_state(&self, config: &NodeConfig) -> Result<String, FabricError>;
}

/// Repository content kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepoKind {
    Image,
    Template,
}

impl fmt::Display for RepoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoKind::Image => f.write_str("image"),
            RepoKind::Template => f.write_str("template"),
        }
    }
}

/// Storage controller (LUNs, snapshots, repositories)
///
/// Every call is scoped by the storage VM and volume in `config.storage`.
#[async_trait::async_trait]
pub trait StorageClient: Send + Sync {
    async fn create_boot_storage_preflight(&self, config: &NodeConfig) -> Result<(), FabricError>;

    /// Create volume, igroup and boot LUN; fills discovered iSCSI targets
    async fn create_boot_storage(&self, config: &mut NodeConfig) -> Result<(), FabricError>;

    /// Whether boot storage exists; fills discovered LUN and target details
    async fn discover_boot_storage(&self, config: &mut NodeConfig) -> Result<bool, FabricError>;

    async fn delete_boot_storage(&self, config: &NodeConfig) -> Result<(), FabricError>;

    /// Delete boot and seed LUNs, keeping the volume and data LUN
    async fn delete_boot_luns(&self, config: &NodeConfig) -> Result<(), FabricError>;

    /// Grow boot/data LUNs to the configured sizes
    async fn resize_boot_storage(&self, config: &NodeConfig) -> Result<(), FabricError>;

    async fn create_seed_storage_preflight(&self, config: &NodeConfig) -> Result<(), FabricError>;

    async fn create_seed_storage(&self, config: &NodeConfig) -> Result<(), FabricError>;

    /// Create the NVMe data namespace; fills discovered NVMe targets
    async fn create_nvme_storage(&self, config: &mut NodeConfig) -> Result<(), FabricError>;

    async fn snapshot_exists(&self, config: &NodeConfig, name: &str) -> Result<bool, FabricError>;

    async fn get_snapshots(&self, config: &NodeConfig) -> Result<Vec<String>, FabricError>;

    async fn create_snapshot(&self, config: &NodeConfig, name: &str, comment: &str) -> Result<(), FabricError>;

    async fn delete_snapshot(&self, config: &NodeConfig, name: &str) -> Result<(), FabricError>;

    async fn restore_snapshot(&self, config: &NodeConfig, name: &str) -> Result<(), FabricError>;

    /// Re-map LUNs to the igroup after a restore
    async fn lun_restore_mapping(&self, config: &NodeConfig) -> Result<(), FabricError>;

    /// Validate the aggregate and installer image; fills iSCSI targets
    async fn create_harvester_storage_preflight(&self, config: &mut NodeConfig) -> Result<(), FabricError>;

    /// Create volume, igroup, the installer LUN copied from the image
    /// repository (mapped first) and a blank boot LUN behind it
    async fn create_harvester_storage(&self, config: &mut NodeConfig) -> Result<(), FabricError>;

    /// Whether the Harvester boot LUN exists; fills LUN, target and
    /// snapshot details
    async fn discover_harvester_storage(&self, config: &mut NodeConfig) -> Result<bool, FabricError>;

    /// Drop installer and seed LUNs and map the boot LUN first
    async fn remap_harvester_storage(&self, config: &NodeConfig) -> Result<(), FabricError>;

    /// Remove every Harvester LUN, the igroup and the volume
    async fn delete_harvester_storage(&self, config: &NodeConfig) -> Result<(), FabricError>;

    async fn list_repo(&self, config: &NodeConfig, kind: RepoKind) -> Result<Vec<String>, FabricError>;

    async fn upload_repo_item(
        &self,
        config: &NodeConfig,
        kind: RepoKind,
        name: &str,
        location: &str,
    ) -> Result<(), FabricError>;

    async fn delete_repo_item(&self, config: &NodeConfig, kind: RepoKind, name: &str) -> Result<(), FabricError>;
}

/// IP address management
#[async_trait::async_trait]
pub trait IpamClient: Send + Sync {
    /// Validate addresses can be allocated without committing
    async fn allocate_preflight(&self, config: &NodeConfig) -> Result<(), FabricError>;

    /// Allocate and assign addresses for every node NIC and initiator
    async fn allocate(&self, config: &mut NodeConfig) -> Result<(), FabricError>;

    /// Bind an explicit address to an FQDN
    async fn assign(&self, ip: &str, fqdn: &str) -> Result<(), FabricError>;

    /// Reverse-lookup addresses for the node
    async fn discover(&self, config: &mut NodeConfig) -> Result<(), FabricError>;

    async fn release(&self, config: &NodeConfig) -> Result<(), FabricError>;
}

/// Where and as whom to run remote commands
#[derive(Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    pub private_key: String,
}

impl SshTarget {
    #[must_use]
    pub fn new(host: impl Into<String>, user: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            private_key: private_key.into(),
        }
    }
}

impl fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshTarget")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Remote command channel
#[async_trait::async_trait]
pub trait RemoteShell: Send + Sync {
    /// Whether the SSH port accepts TCP connections
    async fn port_open(&self, host: &str) -> bool;

    /// Run `command` to completion and return its stdout
    async fn run(&self, target: &SshTarget, command: &str) -> Result<String, FabricError>;

    /// Start `command` without waiting for it
    async fn start(&self, target: &SshTarget, command: &str) -> Result<Box<dyn RemoteProcess>, FabricError>;
}

/// Handle on a command started with [`RemoteShell::start`]
#[async_trait::async_trait]
pub trait RemoteProcess: Send {
    /// Stdout received so far
    fn output(&self) -> String;

    /// Wait for exit; errors carry stderr
    async fn wait(self: Box<Self>) -> Result<String, FabricError>;
}
