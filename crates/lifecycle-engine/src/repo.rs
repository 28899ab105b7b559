//! Image and seed template repositories
//!
//! OS images and seed templates live in repository volumes on the storage
//! VM; node boot and seed LUNs are cloned from them. [`RepoManager`] uploads,
//! lists and deletes repository items and converges a repository on a
//! desired `name -> location` map.

use crate::context::EngineContext;
use crate::error::{EngineError, ResultExt};
use fabric_clients::{RepoKind, StorageClient};
use node_config::{NodeConfig, NodeOverrides, set_defaults};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Items changed by [`RepoManager::sync_repo`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoSync {
    pub uploaded: Vec<String>,
    pub deleted: Vec<String>,
}

/// Repository operations scoped to one storage VM
pub struct RepoManager {
    storage: Arc<dyn StorageClient>,
    config: NodeConfig,
}

impl RepoManager {
    /// Manager for the repositories of `svm_name`
    ///
    /// # Errors
    ///
    /// Fails when the storage credentials cannot be decrypted.
    pub fn new(ctx: &EngineContext, svm_name: &str) -> Result<Self, EngineError> {
        let mut config = NodeConfig::default();
        config.storage.cdot_credentials = ctx.provider.storage_credentials();
        config.storage.svm_name = svm_name.to_string();
        set_defaults(&mut config, &NodeOverrides::default(), ctx.provider.pass_phrase())?;
        Ok(Self {
            storage: Arc::clone(&ctx.storage),
            config,
        })
    }

    /// Repository volume holding `kind` items
    #[must_use]
    pub fn volume(&self, kind: RepoKind) -> &str {
        match kind {
            RepoKind::Image => &self.config.storage.image_repo_name,
            RepoKind::Template => &self.config.storage.template_repo_name,
        }
    }

    pub async fn upload_image(&self, name: &str, location: &str) -> Result<(), EngineError> {
        self.upload(RepoKind::Image, name, location).await
    }

    pub async fn upload_template(&self, name: &str, location: &str) -> Result<(), EngineError> {
        self.upload(RepoKind::Template, name, location).await
    }

    pub async fn list_images(&self) -> Result<Vec<String>, EngineError> {
        self.list(RepoKind::Image).await
    }

    pub async fn list_templates(&self) -> Result<Vec<String>, EngineError> {
        self.list(RepoKind::Template).await
    }

    pub async fn delete_image(&self, name: &str) -> Result<(), EngineError> {
        self.delete(RepoKind::Image, name).await
    }

    pub async fn delete_template(&self, name: &str) -> Result<(), EngineError> {
        self.delete(RepoKind::Template, name).await
    }

    /// Converge the `kind` repository on `desired`
    ///
    /// Items not in `desired` are deleted and missing items uploaded. An item
    /// whose location differs from `previous` is deleted and uploaded again.
    ///
    /// # Errors
    ///
    /// Stops at the first failed upload or delete.
    pub async fn sync_repo(
        &self,
        kind: RepoKind,
        desired: &BTreeMap<String, String>,
        previous: Option<&BTreeMap<String, String>>,
    ) -> Result<RepoSync, EngineError> {
        let existing = self.list(kind).await?;
        let mut sync = RepoSync::default();

        for name in existing.iter().filter(|name| !desired.contains_key(*name)) {
            self.delete(kind, name).await?;
            sync.deleted.push(name.clone());
        }
        for (name, location) in desired {
            let present = existing.contains(name);
            let moved = previous
                .and_then(|prev| prev.get(name))
                .is_some_and(|old| old != location);
            if present && moved {
                self.delete(kind, name).await?;
                sync.deleted.push(name.clone());
            }
            if !present || moved {
                self.upload(kind, name, location).await?;
                sync.uploaded.push(name.clone());
            }
        }
        Ok(sync)
    }

    async fn upload(&self, kind: RepoKind, name: &str, location: &str) -> Result<(), EngineError> {
        if name.is_empty() || location.is_empty() {
            return Err(EngineError::Validation(format!(
                "{kind} upload requires a name and a location"
            )));
        }
        info!("Uploading {} {} from {} to {}", kind, name, location, self.volume(kind));
        self.storage
            .upload_repo_item(&self.config, kind, name, location)
            .await
            .op(&format!("upload {kind} {name}"))
    }

    async fn list(&self, kind: RepoKind) -> Result<Vec<String>, EngineError> {
        self.storage
            .list_repo(&self.config, kind)
            .await
            .op(&format!("list {kind} repository"))
    }

    async fn delete(&self, kind: RepoKind, name: &str) -> Result<(), EngineError> {
        info!("Deleting {} {} from {}", kind, name, self.volume(kind));
        self.storage
            .delete_repo_item(&self.config, kind, name)
            .await
            .op(&format!("delete {kind} {name}"))
    }
}
