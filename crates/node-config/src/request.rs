//! Per-node desired state
//!
//! `NodeSpec` is what the caller asks for: compute, storage and network
//! settings, snapshots, restore and maintenance requests, and cluster
//! metadata. `to_node_config` merges it with provider settings into the
//! `NodeConfig` every engine phase works on.

use crate::defaults::{NodeOverrides, set_defaults};
use crate::error::ConfigError;
use crate::model::{
    BladeSpec, Compute, DataNvme, Ipam, Lun, Network, NodeConfig, PowerState, Storage, Taint,
};
use crate::provider::ProviderConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Compute section of the desired state
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeSpec {
    pub hostname: String,
    pub sp_org: String,
    pub sp_template: String,
    pub description: String,
    pub label: String,
    pub blade_spec: Option<BladeSpec>,
    pub powerstate: PowerState,
    pub safe_removal: bool,
    pub ssh_user: String,
    /// Possibly encrypted (`base64:`) private key
    pub ssh_private_key: String,
    pub wait_for_ssh_timeout: u64,
    pub ssh_node_init_commands: Vec<String>,
    pub ssh_node_bootdisk_resize_commands: Vec<String>,
    pub ssh_node_datadisk_resize_commands: Vec<String>,
}

impl Default for ComputeSpec {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            sp_org: String::new(),
            sp_template: String::new(),
            description: String::new(),
            label: String::new(),
            blade_spec: None,
            powerstate: PowerState::Up,
            safe_removal: true,
            ssh_user: String::new(),
            ssh_private_key: String::new(),
            wait_for_ssh_timeout: 0,
            ssh_node_init_commands: Vec::new(),
            ssh_node_bootdisk_resize_commands: Vec::new(),
            ssh_node_datadisk_resize_commands: Vec::new(),
        }
    }
}

impl fmt::Debug for ComputeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeSpec")
            .field("hostname", &self.hostname)
            .field("sp_org", &self.sp_org)
            .field("sp_template", &self.sp_template)
            .field("blade_spec", &self.blade_spec)
            .field("powerstate", &self.powerstate)
            .field("safe_removal", &self.safe_removal)
            .field("ssh_user", &self.ssh_user)
            .field("ssh_private_key", &"<redacted>")
            .field("wait_for_ssh_timeout", &self.wait_for_ssh_timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootLunSpec {
    pub name: String,
    pub size: u64,
    pub os_image: String,
}

/// Installer image LUN of a Harvester host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapLunSpec {
    pub name: String,
    pub os_image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedLunSpec {
    pub name: String,
    /// Template path; its basename is the template name
    pub seed_template: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLunSpec {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataNvmeSpec {
    pub namespace: String,
    pub subsystem: String,
    pub size: u64,
}

/// Storage section of the desired state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSpec {
    pub svm_name: String,
    pub image_repo_name: String,
    pub volume_name: String,
    pub igroup_name: String,
    pub boot_lun: BootLunSpec,
    /// Set for Harvester hosts only
    pub bootstrap_lun: Option<BootstrapLunSpec>,
    pub seed_lun: SeedLunSpec,
    pub data_lun: Option<DataLunSpec>,
    pub data_nvme: Option<DataNvmeSpec>,
    /// Re-image even when image and template are unchanged
    pub force_update: bool,
    pub auto_snapshot_on_update: bool,
}

/// Requested snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSpec {
    pub name: String,
    /// Freeze filesystems over SSH while the snapshot is taken
    pub fsfreeze: bool,
}

/// One-shot restore request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreSpec {
    pub restore: bool,
    /// Explicit snapshot; empty selects the latest timestamped snapshot
    pub snapshot_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaintenanceTask {
    Cordon,
    Uncordon,
    Drain,
    Restart,
}

/// Maintenance request executed during update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceSpec {
    pub execute: bool,
    pub tasks: Vec<MaintenanceTask>,
    pub synchronized_run: bool,
    pub wait_for_node_timeout: u64,
    pub node_grace_timeout: u64,
}

/// Desired state of one node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSpec {
    pub compute: ComputeSpec,
    pub storage: StorageSpec,
    pub network: Network,
    pub snapshots: Vec<SnapshotSpec>,
    pub restore: Option<RestoreSpec>,
    pub maintenance: Option<MaintenanceSpec>,
    pub labels: BTreeMap<String, String>,
    pub taints: Vec<Taint>,
    pub cloud_args: BTreeMap<String, String>,
}

impl NodeSpec {
    /// Parse a YAML or JSON document
    ///
    /// # Errors
    ///
    /// Returns a parse error for malformed documents.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        if text.trim_start().starts_with('{') {
            Ok(serde_json::from_str(text)?)
        } else {
            Ok(serde_yaml::from_str(text)?)
        }
    }

    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.compute.hostname
    }

    /// Names of requested snapshots
    #[must_use]
    pub fn snapshot_names(&self) -> Vec<&str> {
        self.snapshots.iter().map(|s| s.name.as_str()).collect()
    }

    /// Merge with provider settings and apply defaults
    ///
    /// # Errors
    ///
    /// Fails when defaulting or secret decryption fails.
    pub fn to_node_config(&self, provider: &ProviderConfig) -> Result<NodeConfig, ConfigError> {
        let compute = &self.compute;
        let storage = &self.storage;
        let mut config = NodeConfig {
            ipam: Ipam {
                provider: provider.ipam.provider.to_string(),
                credentials: provider.ipam_credentials(),
                dns_zone: provider.ipam.dns_zone.clone(),
            },
            compute: Compute {
                ucsm_credentials: provider.compute.credentials.clone(),
                sp_org: compute.sp_org.clone(),
                sp_template: compute.sp_template.clone(),
                blade_spec: compute.blade_spec.clone().unwrap_or_default(),
                power_state: compute.powerstate,
                description: compute.description.clone(),
                label: compute.label.clone(),
                ..Default::default()
            },
            storage: Storage {
                cdot_credentials: provider.storage_credentials(),
                svm_name: storage.svm_name.clone(),
                image_repo_name: storage.image_repo_name.clone(),
                volume_name: storage.volume_name.clone(),
                igroup_name: storage.igroup_name.clone(),
                ..Default::default()
            },
            network: self.network.clone(),
            cloud_args: self.cloud_args.clone(),
            labels: self.labels.clone(),
            taints: self.taints.clone(),
        };
        config.storage.boot_lun.lun = Lun {
            name: storage.boot_lun.name.clone(),
            id: 0,
            size: storage.boot_lun.size,
        };
        config.storage.seed_lun.lun.name = storage.seed_lun.name.clone();
        let mut image = storage.boot_lun.os_image.clone();
        if let Some(bootstrap) = &storage.bootstrap_lun {
            config.storage.bootstrap_lun.lun.name = bootstrap.name.clone();
            config.storage.bootstrap_lun.os_image.name = bootstrap.os_image.clone();
            if image.is_empty() {
                image = bootstrap.os_image.clone();
            }
        }
        if let Some(data) = &storage.data_lun {
            config.storage.data_lun = Lun { name: data.name.clone(), id: 0, size: data.size };
        }
        if let Some(nvme) = &storage.data_nvme {
            config.storage.data_nvme = DataNvme {
                namespace: nvme.namespace.clone(),
                subsystem: nvme.subsystem.clone(),
                size: nvme.size,
            };
        }
        let overrides = NodeOverrides {
            host_name: Some(compute.hostname.clone()),
            image: Some(image),
            template_path: Some(storage.seed_lun.seed_template.clone()),
        };
        set_defaults(&mut config, &overrides, provider.pass_phrase())?;
        Ok(config)
    }
}
