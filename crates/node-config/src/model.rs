//! Node configuration model
//!
//! `NodeConfig` is the aggregate desired/observed state of one node. It is
//! persisted as YAML or JSON with camelCase field names, so every struct here
//! derives `Serialize`/`Deserialize` and tolerates missing sections.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Host/user/password triple shared by every external system
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Credentials {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// IPAM credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IpamCredentials {
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub wapi_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dns_view: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub network_view: String,
}

/// Storage controller credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageCredentials {
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_method: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub zapi_version: String,
}

/// A single NIC, either a node interface or the base of an iSCSI initiator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkInterface {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub macaddr: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ip: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fqdn: String,
    pub subnet: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ip_range: String,
    #[serde(rename = "netlen", skip_serializing_if = "String::is_empty")]
    pub net_len: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub gateway: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dns_server1: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dns_server2: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dns_server3: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dns_domain: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

/// Discovered iSCSI target; never configured by the user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IscsiTarget {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub node_name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<String>,
}

/// iSCSI initiator: a NIC plus its initiator name and discovered target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IscsiInitiator {
    #[serde(flatten)]
    pub interface: NetworkInterface,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub initiator_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iscsi_target: Option<IscsiTarget>,
}

/// Discovered NVMe-oF target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NvmeTarget {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target_nqn: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<String>,
}

/// NVMe-oF host interface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NvmeHost {
    pub host_interface: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ip: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subnet: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host_nqn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nvme_target: Option<NvmeTarget>,
}

/// IPAM section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Ipam {
    pub provider: String,
    #[serde(rename = "ibCredentials")]
    pub credentials: IpamCredentials,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dns_zone: String,
}

/// Blade selection constraint
///
/// Each field is either an exact value, an inclusive numeric range (`"4-8"`)
/// or, for `dn` and `model`, a regular expression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BladeSpec {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dn: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub num_of_cpus: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub num_of_cores: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub num_of_threads: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub total_memory: String,
}

/// Concrete attributes of the blade bound to the service profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BladeAssigned {
    #[serde(flatten)]
    pub spec: BladeSpec,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub serial: String,
}

/// Server power state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    #[default]
    Up,
    Down,
}

impl PowerState {
    /// Wire representation (`"up"` / `"down"`)
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PowerState::Up => "up",
            PowerState::Down => "down",
        }
    }

    #[must_use]
    pub fn is_up(self) -> bool {
        self == PowerState::Up
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute fabric section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Compute {
    pub ucsm_credentials: Credentials,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host_name: String,
    pub sp_org: String,
    pub sp_template: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sp_dn: String,
    pub blade_spec: BladeSpec,
    pub blade_assigned: BladeAssigned,
    pub power_state: PowerState,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub label: String,
}

/// Image or template reference (name plus optional source location)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteFile {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub location: String,
}

/// LUN identity and size (GB)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Lun {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub id: u32,
    #[serde(skip_serializing_if = "is_zero")]
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BootLun {
    #[serde(flatten)]
    pub lun: Lun,
    pub os_image: RemoteFile,
}

impl BootLun {
    /// Neither named nor carrying an image
    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.lun.name.is_empty() && self.os_image.name.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SeedLun {
    #[serde(flatten)]
    pub lun: Lun,
    pub seed_template: RemoteFile,
}

/// NVMe data namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataNvme {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subsystem: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub size: u64,
}

/// Storage controller section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Storage {
    pub cdot_credentials: StorageCredentials,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub svm_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image_repo_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub template_repo_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub volume_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub igroup_name: String,
    pub boot_lun: BootLun,
    /// Installer LUN of a Harvester host, copied from the image repository
    /// and dropped once the installer has written the boot LUN
    #[serde(skip_serializing_if = "BootLun::is_unset")]
    pub bootstrap_lun: BootLun,
    pub data_lun: Lun,
    pub seed_lun: SeedLun,
    pub data_nvme: DataNvme,
    /// Snapshot names observed on the storage controller
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub snapshots: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Network {
    pub node: Vec<NetworkInterface>,
    pub iscsi_initiator: Vec<IscsiInitiator>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nvme_host: Vec<NvmeHost>,
}

/// Cluster node taint
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Taint {
    pub key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub value: String,
    pub effect: String,
}

/// Aggregate node state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeConfig {
    pub ipam: Ipam,
    pub compute: Compute,
    pub storage: Storage,
    pub network: Network,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub cloud_args: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,
}

impl NodeConfig {
    /// Primary node IP (first node NIC), used for SSH and cluster lookups
    #[must_use]
    pub fn primary_ip(&self) -> Option<&str> {
        self.network
            .node
            .first()
            .map(|n| n.ip.as_str())
            .filter(|ip| !ip.is_empty())
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String, crate::ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Render as pretty JSON
    pub fn to_json(&self) -> Result<String, crate::ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[allow(clippy::trivially_copy_pass_by_ref, reason = "serde skip_serializing_if signature")]
fn is_zero(v: &u64) -> bool {
    *v == 0
}
