//! # Storage Service
//!
//! Wires the configuration store to the registry: the document on disk is
//! the source of truth and every accepted change is followed by a registry
//! reload.

use crate::factory::BuildContext;
use crate::registry::{ReloadSummary, StorageRootRegistry};
use config::hot_reload::ConfigReloadEvent;
use config::{ConfigError, GlobalConfigStore, GlobalStorageConfig, StorageSettings, watch_storage_config};
use observability::OperationObserver;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct StorageService {
    store: GlobalConfigStore,
    registry: StorageRootRegistry,
    /// Held across "persist then reload" so the registry always serves the
    /// document that reached disk last.
    apply_lock: tokio::sync::Mutex<()>
}

impl StorageService {
    /// Load `storage.json` from the settings' data directory and build every
    /// enabled root.
    pub async fn open(
        settings: &StorageSettings,
        context: BuildContext,
        observer: Arc<dyn OperationObserver>
    ) -> Result<Self, ConfigError> {
        let store = GlobalConfigStore::load(&settings.data_dir, settings.environment)?;
        let registry = StorageRootRegistry::build(&store.document(), context, observer).await?;
        info!(
            path = %store.path().display(),
            environment = %settings.environment,
            "Storage service ready"
        );
        Ok(Self {
            store,
            registry,
            apply_lock: tokio::sync::Mutex::new(())
        })
    }

    pub fn registry(&self) -> &StorageRootRegistry {
        &self.registry
    }

    pub fn config(&self) -> &GlobalConfigStore {
        &self.store
    }

    /// Validate, persist and apply a new document.
    ///
    /// Nothing changes (on disk or in memory) when validation or the save
    /// fails.
    pub async fn update_config(
        &self,
        document: GlobalStorageConfig
    ) -> Result<ReloadSummary, ConfigError> {
        let _apply = self.apply_lock.lock().await;
        let document = self.store.replace(document)?;
        self.registry.reload(&document).await
    }

    /// Re-read the document from disk and reload when it changed.
    ///
    /// Returns `None` when the file content matches what is already loaded.
    /// An invalid file is rejected on every call and leaves both the stored
    /// document and the live roots untouched.
    pub async fn reload_from_disk(&self) -> Result<Option<ReloadSummary>, ConfigError> {
        let _apply = self.apply_lock.lock().await;
        let before = self.store.document();
        let after = self.store.reload_from_disk()?;
        if *before == *after {
            debug!("Storage config unchanged, keeping current roots");
            return Ok(None);
        }
        self.registry.reload(&after).await.map(Some)
    }

    /// Reload whenever `storage.json` changes on disk.
    ///
    /// The returned task runs until aborted.
    pub async fn watch(
        self: Arc<Self>
    ) -> Result<JoinHandle<()>, Box<dyn std::error::Error + Send + Sync>> {
        let (_, mut events) = watch_storage_config(self.store.path()).await?;

        Ok(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ConfigReloadEvent::Ready => debug!("Storage config watcher ready"),
                    ConfigReloadEvent::Changed(_) => match self.reload_from_disk().await {
                        Ok(Some(summary)) => info!(
                            generation = summary.generation,
                            ready = summary.ready,
                            failed = summary.failed,
                            "Applied storage config change"
                        ),
                        Ok(None) => {}
                        Err(e) => warn!("Ignoring invalid storage config change: {}", e)
                    },
                    ConfigReloadEvent::Removed(path) => {
                        warn!("Storage config {:?} was removed; keeping current roots", path);
                    }
                    ConfigReloadEvent::Error { path, error } => {
                        warn!("Storage config watcher failed for {:?}: {}", path, error);
                    }
                }
            }
        }))
    }
}
