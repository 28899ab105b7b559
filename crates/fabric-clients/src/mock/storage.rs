//! Mock storage controller

use super::{CallJournal, Failures, lock};
use crate::error::FabricError;
use crate::fabric_trait::{RepoKind, StorageClient};
use node_config::defaults::{BOOT_LUN_ID, HARVESTER_INSTALL_BOOT_LUN_ID};
use node_config::{IscsiTarget, NodeConfig, NvmeTarget};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

const TARGET_NODE_NAME: &str = "iqn.1992-08.com.netapp:sn.mock";
const TARGET_INTERFACE: &str = "192.168.2.100";
/// Size reported for every repository image
const IMAGE_SIZE: u64 = 4;

/// Boot volume held by [`MockStorage`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockVolume {
    pub boot_size: u64,
    pub os_image: String,
    pub seed_template: String,
    pub seed: bool,
    /// Installer LUN of a Harvester host still present
    pub bootstrap: bool,
    /// LUN id the boot LUN is mapped at
    pub boot_lun_id: u32,
    pub data_size: u64,
    pub nvme_size: u64,
    /// Snapshot names in creation order
    pub snapshots: Vec<String>,
    pub restored_from: Option<String>,
}

/// In-memory storage controller keyed by volume name
#[derive(Debug, Clone)]
pub struct MockStorage {
    volumes: Arc<Mutex<HashMap<String, MockVolume>>>,
    repos: Arc<Mutex<HashMap<RepoKind, BTreeMap<String, String>>>>,
    journal: CallJournal,
    failures: Failures,
}

impl MockStorage {
    /// Create a mock recording into `journal`
    #[must_use]
    pub fn new(journal: CallJournal) -> Self {
        Self {
            volumes: Arc::new(Mutex::new(HashMap::new())),
            repos: Arc::new(Mutex::new(HashMap::new())),
            journal,
            failures: Failures::default(),
        }
    }

    /// Register existing boot storage matching `config`
    pub fn add_volume(&self, config: &NodeConfig) {
        lock(&self.volumes).insert(config.storage.volume_name.clone(), volume_from(config));
    }

    /// Add a snapshot to an existing volume
    pub fn add_snapshot(&self, volume: &str, name: &str) {
        if let Some(vol) = lock(&self.volumes).get_mut(volume) {
            vol.snapshots.push(name.to_string());
        }
    }

    /// Add an item to a repository
    pub fn add_repo_item(&self, kind: RepoKind, name: &str, location: &str) {
        lock(&self.repos)
            .entry(kind)
            .or_default()
            .insert(name.to_string(), location.to_string());
    }

    #[must_use]
    pub fn volume(&self, name: &str) -> Option<MockVolume> {
        lock(&self.volumes).get(name).cloned()
    }

    /// Repository contents as name -> location
    #[must_use]
    pub fn repo(&self, kind: RepoKind) -> BTreeMap<String, String> {
        lock(&self.repos).get(&kind).cloned().unwrap_or_default()
    }

    /// Fail every call to `method` with `message`
    pub fn fail_on(&self, method: &str, message: &str) {
        self.failures.set(method, message);
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    fn enter(&self, call: &str, method: &str) -> Result<(), FabricError> {
        self.journal.record(format!("storage.{call}"));
        self.failures.check(method, FabricError::Storage)
    }

    fn with_volume<T>(&self, config: &NodeConfig, f: impl FnOnce(&mut MockVolume) -> T) -> Result<T, FabricError> {
        let name = &config.storage.volume_name;
        let mut volumes = lock(&self.volumes);
        let volume = volumes
            .get_mut(name)
            .ok_or_else(|| FabricError::NotFound(format!("volume {name}")))?;
        Ok(f(volume))
    }

    fn fill_targets(config: &mut NodeConfig) {
        for initiator in &mut config.network.iscsi_initiator {
            initiator.iscsi_target = Some(IscsiTarget {
                node_name: TARGET_NODE_NAME.to_string(),
                interfaces: vec![TARGET_INTERFACE.to_string()],
            });
        }
    }
}

fn volume_from(config: &NodeConfig) -> MockVolume {
    let storage = &config.storage;
    MockVolume {
        boot_size: storage.boot_lun.lun.size,
        os_image: storage.boot_lun.os_image.name.clone(),
        seed_template: storage.seed_lun.seed_template.name.clone(),
        seed: true,
        bootstrap: false,
        boot_lun_id: BOOT_LUN_ID,
        data_size: storage.data_lun.size,
        nvme_size: storage.data_nvme.size,
        snapshots: Vec::new(),
        restored_from: None,
    }
}

#[async_trait::async_trait]
impl StorageClient for MockStorage {
    async fn create_boot_storage_preflight(&self, _config: &NodeConfig) -> Result<(), FabricError> {
        self.enter("create_boot_storage_preflight", "create_boot_storage_preflight")
    }

    async fn create_boot_storage(&self, config: &mut NodeConfig) -> Result<(), FabricError> {
        self.enter("create_boot_storage", "create_boot_storage")?;
        let mut volume = volume_from(config);
        volume.seed = false;
        volume.nvme_size = 0;
        let mut volumes = lock(&self.volumes);
        // Re-imaging keeps snapshots and the data LUN of the existing volume
        if let Some(existing) = volumes.get(&config.storage.volume_name) {
            volume.snapshots.clone_from(&existing.snapshots);
            volume.nvme_size = existing.nvme_size;
        }
        volumes.insert(config.storage.volume_name.clone(), volume);
        drop(volumes);
        Self::fill_targets(config);
        Ok(())
    }

    async fn discover_boot_storage(&self, config: &mut NodeConfig) -> Result<bool, FabricError> {
        self.enter("discover_boot_storage", "discover_boot_storage")?;
        let Some(volume) = self.volume(&config.storage.volume_name) else {
            return Ok(false);
        };
        let storage = &mut config.storage;
        storage.boot_lun.lun.size = volume.boot_size;
        storage.boot_lun.os_image.name = volume.os_image;
        storage.seed_lun.seed_template.name = volume.seed_template;
        storage.data_lun.size = volume.data_size;
        storage.data_nvme.size = volume.nvme_size;
        storage.snapshots = volume.snapshots;
        Self::fill_targets(config);
        Ok(true)
    }

    async fn delete_boot_storage(&self, config: &NodeConfig) -> Result<(), FabricError> {
        self.enter("delete_boot_storage", "delete_boot_storage")?;
        lock(&self.volumes).remove(&config.storage.volume_name);
        Ok(())
    }

    async fn delete_boot_luns(&self, config: &NodeConfig) -> Result<(), FabricError> {
        self.enter("delete_boot_luns", "delete_boot_luns")?;
        self.with_volume(config, |volume| {
            volume.boot_size = 0;
            volume.os_image.clear();
            volume.seed_template.clear();
            volume.seed = false;
        })
    }

    async fn resize_boot_storage(&self, config: &NodeConfig) -> Result<(), FabricError> {
        self.enter("resize_boot_storage", "resize_boot_storage")?;
        self.with_volume(config, |volume| {
            volume.boot_size = config.storage.boot_lun.lun.size;
            volume.data_size = config.storage.data_lun.size;
        })
    }

    async fn create_seed_storage_preflight(&self, _config: &NodeConfig) -> Result<(), FabricError> {
        self.enter("create_seed_storage_preflight", "create_seed_storage_preflight")
    }

    async fn create_seed_storage(&self, config: &NodeConfig) -> Result<(), FabricError> {
        self.enter("create_seed_storage", "create_seed_storage")?;
        self.with_volume(config, |volume| {
            volume.seed = true;
            volume.seed_template.clone_from(&config.storage.seed_lun.seed_template.name);
        })
    }

    async fn create_nvme_storage(&self, config: &mut NodeConfig) -> Result<(), FabricError> {
        self.enter("create_nvme_storage", "create_nvme_storage")?;
        let size = config.storage.data_nvme.size;
        self.with_volume(config, |volume| volume.nvme_size = size)?;
        for host in &mut config.network.nvme_host {
            host.nvme_target = Some(NvmeTarget {
                target_nqn: "nqn.1992-08.com.netapp:sn.mock:subsystem".to_string(),
                interfaces: vec![TARGET_INTERFACE.to_string()],
            });
        }
        Ok(())
    }

    async fn snapshot_exists(&self, config: &NodeConfig, name: &str) -> Result<bool, FabricError> {
        self.failures.check("snapshot_exists", FabricError::Storage)?;
        self.with_volume(config, |volume| volume.snapshots.iter().any(|s| s == name))
    }

    async fn get_snapshots(&self, config: &NodeConfig) -> Result<Vec<String>, FabricError> {
        self.failures.check("get_snapshots", FabricError::Storage)?;
        self.with_volume(config, |volume| volume.snapshots.clone())
    }

    async fn create_snapshot(&self, config: &NodeConfig, name: &str, _comment: &str) -> Result<(), FabricError> {
        self.enter(&format!("create_snapshot({name})"), "create_snapshot")?;
        self.with_volume(config, |volume| volume.snapshots.push(name.to_string()))
    }

    async fn delete_snapshot(&self, config: &NodeConfig, name: &str) -> Result<(), FabricError> {
        self.enter(&format!("delete_snapshot({name})"), "delete_snapshot")?;
        self.with_volume(config, |volume| volume.snapshots.retain(|s| s != name))
    }

    async fn restore_snapshot(&self, config: &NodeConfig, name: &str) -> Result<(), FabricError> {
        self.enter(&format!("restore_snapshot({name})"), "restore_snapshot")?;
        let found = self.with_volume(config, |volume| {
            let found = volume.snapshots.iter().any(|s| s == name);
            if found {
                volume.restored_from = Some(name.to_string());
            }
            found
        })?;
        if found {
            Ok(())
        } else {
            Err(FabricError::NotFound(format!("snapshot {name}")))
        }
    }

    async fn lun_restore_mapping(&self, _config: &NodeConfig) -> Result<(), FabricError> {
        self.enter("lun_restore_mapping", "lun_restore_mapping")
    }

    async fn create_harvester_storage_preflight(&self, config: &mut NodeConfig) -> Result<(), FabricError> {
        self.enter("create_harvester_storage_preflight", "create_harvester_storage_preflight")?;
        let image = &config.storage.bootstrap_lun.os_image.name;
        if !self.repo(RepoKind::Image).contains_key(image) {
            return Err(FabricError::NotFound(format!(
                "image \"{image}\" in image repository volume \"{}\"",
                config.storage.image_repo_name
            )));
        }
        Self::fill_targets(config);
        Ok(())
    }

    async fn create_harvester_storage(&self, config: &mut NodeConfig) -> Result<(), FabricError> {
        self.enter("create_harvester_storage", "create_harvester_storage")?;
        let image = config.storage.bootstrap_lun.os_image.name.clone();
        if !self.repo(RepoKind::Image).contains_key(&image) {
            return Err(FabricError::NotFound(format!("image {image}")));
        }
        config.storage.bootstrap_lun.lun.size = IMAGE_SIZE * 2;
        let mut volume = volume_from(config);
        volume.os_image = image;
        volume.seed = false;
        volume.bootstrap = true;
        volume.boot_lun_id = HARVESTER_INSTALL_BOOT_LUN_ID;
        lock(&self.volumes)
            .entry(config.storage.volume_name.clone())
            .or_insert(volume);
        Self::fill_targets(config);
        Ok(())
    }

    async fn discover_harvester_storage(&self, config: &mut NodeConfig) -> Result<bool, FabricError> {
        self.enter("discover_harvester_storage", "discover_harvester_storage")?;
        let Some(volume) = self.volume(&config.storage.volume_name).filter(|v| v.boot_size > 0) else {
            return Ok(false);
        };
        let storage = &mut config.storage;
        if !volume.os_image.is_empty() {
            storage.boot_lun.os_image.name = volume.os_image;
        }
        storage.boot_lun.lun.size = volume.boot_size;
        storage.snapshots = volume.snapshots;
        Self::fill_targets(config);
        Ok(true)
    }

    async fn remap_harvester_storage(&self, config: &NodeConfig) -> Result<(), FabricError> {
        self.enter("remap_harvester_storage", "remap_harvester_storage")?;
        let boot_lun = self.with_volume(config, |volume| {
            volume.bootstrap = false;
            volume.seed = false;
            volume.seed_template.clear();
            if volume.boot_size > 0 {
                volume.boot_lun_id = BOOT_LUN_ID;
            }
            volume.boot_size > 0
        })?;
        if boot_lun {
            Ok(())
        } else {
            Err(FabricError::NotFound(format!(
                "boot LUN /vol/{}/{}",
                config.storage.volume_name, config.storage.boot_lun.lun.name
            )))
        }
    }

    async fn delete_harvester_storage(&self, config: &NodeConfig) -> Result<(), FabricError> {
        self.enter("delete_harvester_storage", "delete_harvester_storage")?;
        lock(&self.volumes).remove(&config.storage.volume_name);
        Ok(())
    }

    async fn list_repo(&self, _config: &NodeConfig, kind: RepoKind) -> Result<Vec<String>, FabricError> {
        self.failures.check("list_repo", FabricError::Storage)?;
        Ok(self.repo(kind).into_keys().collect())
    }

    async fn upload_repo_item(
        &self,
        _config: &NodeConfig,
        kind: RepoKind,
        name: &str,
        location: &str,
    ) -> Result<(), FabricError> {
        self.enter(&format!("upload_repo_item({kind}:{name})"), "upload_repo_item")?;
        self.add_repo_item(kind, name, location);
        Ok(())
    }

    async fn delete_repo_item(&self, _config: &NodeConfig, kind: RepoKind, name: &str) -> Result<(), FabricError> {
        self.enter(&format!("delete_repo_item({kind}:{name})"), "delete_repo_item")?;
        if let Some(items) = lock(&self.repos).get_mut(&kind) {
            items.remove(name);
        }
        Ok(())
    }
}
