//! Cluster node annotations describing the backing compute and storage

use crate::error::ConfigError;
use crate::model::{BladeAssigned, NodeConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const NODE_ANNOTATION_COMPUTE: &str = "flexpod-compute";
pub const NODE_ANNOTATION_STORAGE: &str = "flexpod-storage";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeAnnotation {
    pub ucsm_host: String,
    pub sp_dn: String,
    pub blade: BladeAssigned,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootImageAnnotation {
    pub os_image: String,
    pub seed_template: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataNvmeAnnotation {
    pub namespace: String,
    pub subsystem: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageAnnotation {
    pub boot_image: BootImageAnnotation,
    pub svm: String,
    pub volume: String,
    pub igroup: String,
    pub boot_lun: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_lun: Option<String>,
    pub seed_lun: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_nvme: Option<DataNvmeAnnotation>,
}

impl ComputeAnnotation {
    /// Present only once a service profile is bound to a blade
    #[must_use]
    pub fn from_config(config: &NodeConfig) -> Option<Self> {
        let compute = &config.compute;
        if compute.sp_dn.is_empty() || compute.blade_assigned.spec.dn.is_empty() {
            return None;
        }
        Some(Self {
            ucsm_host: compute.ucsm_credentials.host.clone(),
            sp_dn: compute.sp_dn.clone(),
            blade: compute.blade_assigned.clone(),
        })
    }
}

impl StorageAnnotation {
    /// Present only when the storage VM is known
    #[must_use]
    pub fn from_config(config: &NodeConfig) -> Option<Self> {
        let storage = &config.storage;
        if storage.svm_name.is_empty() {
            return None;
        }
        Some(Self {
            boot_image: BootImageAnnotation {
                os_image: storage.boot_lun.os_image.name.clone(),
                seed_template: storage.seed_lun.seed_template.name.clone(),
            },
            svm: storage.svm_name.clone(),
            volume: storage.volume_name.clone(),
            igroup: storage.igroup_name.clone(),
            boot_lun: storage.boot_lun.lun.name.clone(),
            data_lun: (storage.data_lun.size > 0).then(|| storage.data_lun.name.clone()),
            seed_lun: storage.seed_lun.lun.name.clone(),
            data_nvme: (storage.data_nvme.size > 0).then(|| DataNvmeAnnotation {
                namespace: storage.data_nvme.namespace.clone(),
                subsystem: storage.data_nvme.subsystem.clone(),
            }),
        })
    }
}

/// Annotation map to publish on the cluster node
///
/// # Errors
///
/// Returns `ConfigError::Json` if serialization fails.
pub fn node_annotations(config: &NodeConfig) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut annotations = BTreeMap::new();
    if let Some(compute) = ComputeAnnotation::from_config(config) {
        annotations.insert(NODE_ANNOTATION_COMPUTE.to_string(), serde_json::to_string(&compute)?);
    }
    if let Some(storage) = StorageAnnotation::from_config(config) {
        annotations.insert(NODE_ANNOTATION_STORAGE.to_string(), serde_json::to_string(&storage)?);
    }
    Ok(annotations)
}
