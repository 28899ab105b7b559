//! Node configuration defaulting
//!
//! Fills in repository names, derived network attributes, iSCSI initiator
//! names and storage object names before any external call is made.

use crate::crypt::decrypt_node_config;
use crate::error::ConfigError;
use crate::model::NodeConfig;
use std::net::IpAddr;
use std::path::Path;
use tracing::debug;

pub const ZAPI_VERSION: &str = "1.160";
pub const IMAGE_REPO_VOLUME: &str = "image_repo";
pub const TEMPLATE_REPO_VOLUME: &str = "template_repo";
pub const DEFAULT_BOOT_LUN_SIZE: u64 = 10;

pub const BOOT_LUN_ID: u32 = 0;
pub const DATA_LUN_ID: u32 = 1;
pub const SEED_LUN_ID: u32 = 2;
/// Installer LUN boots first; the target boot LUN sits behind it until remap
pub const BOOTSTRAP_LUN_ID: u32 = 0;
pub const HARVESTER_INSTALL_BOOT_LUN_ID: u32 = 1;

/// Placeholder substituted with the node hostname in storage object names
pub const HOSTNAME_PLACEHOLDER: &str = "{{.Compute.HostName}}";

const VOLUME_NAME_TEMPLATE: &str = "{{.Compute.HostName}}_iboot";
const IGROUP_NAME_TEMPLATE: &str = "{{.Compute.HostName}}_iboot";
const BOOT_LUN_NAME_TEMPLATE: &str = "{{.Compute.HostName}}_iboot";
const DATA_LUN_NAME_TEMPLATE: &str = "{{.Compute.HostName}}_data";
const SEED_LUN_NAME_TEMPLATE: &str = "{{.Compute.HostName}}_seed";
const BOOTSTRAP_LUN_NAME_TEMPLATE: &str = "{{.Compute.HostName}}_bootstrap";

const INITIATOR_IQN_PREFIX: &str = "iqn.2005-02.com.open-iscsi:";
const UNSET_ADDRESS: &str = "0.0.0.0";

/// Per-call overrides applied on top of the parsed document
#[derive(Debug, Clone, Default)]
pub struct NodeOverrides {
    pub host_name: Option<String>,
    pub image: Option<String>,
    /// Seed template path; the template name becomes its basename
    pub template_path: Option<String>,
}

/// Prefix length of a CIDR such as `192.168.1.0/24`
///
/// # Errors
///
/// Returns `ConfigError::Cidr` if the address or prefix is malformed.
pub fn cidr_prefix_len(cidr: &str) -> Result<u8, ConfigError> {
    let fail = |reason: &str| ConfigError::Cidr {
        cidr: cidr.to_string(),
        reason: reason.to_string(),
    };
    let (addr, len) = cidr.split_once('/').ok_or_else(|| fail("missing prefix length"))?;
    let addr: IpAddr = addr.parse().map_err(|_| fail("invalid address"))?;
    let len: u8 = len.parse().map_err(|_| fail("invalid prefix length"))?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    if len > max {
        return Err(fail("prefix length out of range"));
    }
    Ok(len)
}

/// Render a storage object name template and normalise it for the controller
#[must_use]
pub fn render_name(template: &str, host_name: &str) -> String {
    template.replace(HOSTNAME_PLACEHOLDER, host_name).replace('-', "_")
}

/// Apply defaults and overrides, then decrypt secrets when `pass_phrase` is set
///
/// # Errors
///
/// Fails when fewer than two iSCSI initiators are defined, a subnet is not a
/// CIDR, or decryption fails.
pub fn set_defaults(
    config: &mut NodeConfig,
    overrides: &NodeOverrides,
    pass_phrase: Option<&str>,
) -> Result<(), ConfigError> {
    let storage = &mut config.storage;
    if storage.cdot_credentials.zapi_version.is_empty() {
        storage.cdot_credentials.zapi_version = ZAPI_VERSION.to_string();
    }
    if storage.image_repo_name.is_empty() {
        storage.image_repo_name = IMAGE_REPO_VOLUME.to_string();
    }
    if storage.template_repo_name.is_empty() {
        storage.template_repo_name = TEMPLATE_REPO_VOLUME.to_string();
    }
    if let Some(host) = overrides.host_name.as_deref().filter(|h| !h.is_empty()) {
        config.compute.host_name = host.to_string();
    }
    if let Some(image) = overrides.image.as_deref().filter(|i| !i.is_empty()) {
        config.storage.boot_lun.os_image.name = image.to_string();
    }
    if let Some(path) = overrides.template_path.as_deref().filter(|p| !p.is_empty()) {
        let name = Path::new(path)
            .file_name()
            .map_or_else(|| path.to_string(), |n| n.to_string_lossy().into_owned());
        config.storage.seed_lun.seed_template.name = name;
        config.storage.seed_lun.seed_template.location = path.to_string();
    }

    if !config.compute.host_name.is_empty() {
        apply_host_defaults(config)?;
    }

    if let Some(pass_phrase) = pass_phrase.filter(|p| !p.is_empty()) {
        decrypt_node_config(config, pass_phrase)?;
    }
    Ok(())
}

fn apply_host_defaults(config: &mut NodeConfig) -> Result<(), ConfigError> {
    let host = config.compute.host_name.clone();
    debug!("Applying defaults for node {}", host);

    if config.network.iscsi_initiator.len() < 2 {
        return Err(ConfigError::InvalidConfig(
            "expected two iSCSI initiators".to_string(),
        ));
    }
    for node in &mut config.network.node {
        node.net_len = cidr_prefix_len(&node.subnet)?.to_string();
    }
    for (i, initiator) in config.network.iscsi_initiator.iter_mut().enumerate() {
        let nic = &mut initiator.interface;
        nic.net_len = cidr_prefix_len(&nic.subnet)?.to_string();
        initiator.initiator_name = format!("{INITIATOR_IQN_PREFIX}{host}.{}", i + 1);
        for field in [&mut nic.gateway, &mut nic.dns_server1, &mut nic.dns_server2] {
            if field.is_empty() {
                *field = UNSET_ADDRESS.to_string();
            }
        }
    }

    let storage = &mut config.storage;
    let or_template = |current: &str, template: &str| {
        let source = if current.is_empty() { template } else { current };
        render_name(source, &host)
    };
    storage.volume_name = or_template(&storage.volume_name, VOLUME_NAME_TEMPLATE);
    storage.igroup_name = or_template(&storage.igroup_name, IGROUP_NAME_TEMPLATE);
    storage.boot_lun.lun.name = or_template(&storage.boot_lun.lun.name, BOOT_LUN_NAME_TEMPLATE);
    storage.data_lun.name = or_template(&storage.data_lun.name, DATA_LUN_NAME_TEMPLATE);
    storage.seed_lun.lun.name = or_template(&storage.seed_lun.lun.name, SEED_LUN_NAME_TEMPLATE);
    if storage.boot_lun.lun.size == 0 {
        storage.boot_lun.lun.size = DEFAULT_BOOT_LUN_SIZE;
    }
    storage.boot_lun.lun.id = BOOT_LUN_ID;
    storage.data_lun.id = DATA_LUN_ID;
    storage.seed_lun.lun.id = SEED_LUN_ID;
    if !storage.bootstrap_lun.os_image.name.is_empty() {
        storage.bootstrap_lun.lun.name = or_template(&storage.bootstrap_lun.lun.name, BOOTSTRAP_LUN_NAME_TEMPLATE);
        storage.bootstrap_lun.lun.id = BOOTSTRAP_LUN_ID;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IscsiInitiator, NetworkInterface};

    fn nic(name: &str, subnet: &str) -> NetworkInterface {
        NetworkInterface {
            name: name.to_string(),
            subnet: subnet.to_string(),
            ..Default::default()
        }
    }

    fn config() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.network.node.push(nic("eth2", "192.168.1.0/24"));
        for (name, subnet) in [("iscsi0", "192.168.2.0/24"), ("iscsi1", "192.168.3.0/25")] {
            config.network.iscsi_initiator.push(IscsiInitiator {
                interface: nic(name, subnet),
                ..Default::default()
            });
        }
        config
    }

    fn overrides(host: &str) -> NodeOverrides {
        NodeOverrides {
            host_name: Some(host.to_string()),
            image: Some("ubuntu-22.04.05".to_string()),
            template_path: Some("/seeds/cloud-init/ubuntu-22.04.05.template".to_string()),
        }
    }

    #[test]
    fn test_set_defaults_renders_names() {
        let mut config = config();
        set_defaults(&mut config, &overrides("k8s-node-01"), None).unwrap();

        assert_eq!(config.storage.volume_name, "k8s_node_01_iboot");
        assert_eq!(config.storage.igroup_name, "k8s_node_01_iboot");
        assert_eq!(config.storage.boot_lun.lun.name, "k8s_node_01_iboot");
        assert_eq!(config.storage.data_lun.name, "k8s_node_01_data");
        assert_eq!(config.storage.seed_lun.lun.name, "k8s_node_01_seed");
        assert_eq!(config.storage.boot_lun.lun.size, 10);
        assert_eq!(
            (config.storage.boot_lun.lun.id, config.storage.data_lun.id, config.storage.seed_lun.lun.id),
            (0, 1, 2)
        );
        assert_eq!(config.storage.seed_lun.seed_template.name, "ubuntu-22.04.05.template");
        assert_eq!(config.storage.cdot_credentials.zapi_version, "1.160");
        assert_eq!(config.storage.image_repo_name, "image_repo");
    }

    #[test]
    fn test_set_defaults_names_bootstrap_lun_only_for_installer() {
        let mut plain = config();
        set_defaults(&mut plain, &overrides("hv-01"), None).unwrap();
        assert!(plain.storage.bootstrap_lun.is_unset());

        let mut config = config();
        config.storage.bootstrap_lun.os_image.name = "harvester-v1.3.1".to_string();
        set_defaults(&mut config, &overrides("hv-01"), None).unwrap();
        assert_eq!(config.storage.bootstrap_lun.lun.name, "hv_01_bootstrap");
        assert_eq!(config.storage.bootstrap_lun.lun.id, BOOTSTRAP_LUN_ID);
        assert_eq!(config.storage.boot_lun.lun.name, "hv_01_iboot");
    }

    #[test]
    fn test_set_defaults_network() {
        let mut config = config();
        set_defaults(&mut config, &overrides("node1"), None).unwrap();

        assert_eq!(config.network.node[0].net_len, "24");
        let second = &config.network.iscsi_initiator[1];
        assert_eq!(second.interface.net_len, "25");
        assert_eq!(second.initiator_name, "iqn.2005-02.com.open-iscsi:node1.2");
        assert_eq!(second.interface.gateway, "0.0.0.0");
        assert_eq!(second.interface.dns_server2, "0.0.0.0");
    }

    #[test]
    fn test_set_defaults_requires_two_initiators() {
        let mut config = config();
        config.network.iscsi_initiator.pop();
        let err = set_defaults(&mut config, &overrides("node1"), None).unwrap_err();
        assert!(err.to_string().contains("expected two iSCSI initiators"));
    }

    #[test]
    fn test_set_defaults_bad_cidr() {
        let mut config = config();
        config.network.node[0].subnet = "192.168.1.0".to_string();
        let err = set_defaults(&mut config, &overrides("node1"), None).unwrap_err();
        assert!(err.to_string().contains("failed to parse CIDR 192.168.1.0"));
    }

    #[test]
    fn test_set_defaults_keeps_explicit_names() {
        let mut config = config();
        config.storage.volume_name = "shared-{{.Compute.HostName}}".to_string();
        set_defaults(&mut config, &overrides("node-7"), None).unwrap();
        assert_eq!(config.storage.volume_name, "shared_node_7");
    }

    #[test]
    fn test_set_defaults_without_hostname_skips_network() {
        let mut config = config();
        config.network.iscsi_initiator.clear();
        set_defaults(&mut config, &NodeOverrides::default(), None).unwrap();
        assert!(config.storage.volume_name.is_empty());
    }
}
