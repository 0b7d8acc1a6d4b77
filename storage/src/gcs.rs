//! Google Cloud Storage bucket backend.

use crate::runtime::{
    ChangeOutcome, Entry, EntryInfo, StorageRuntime, WriteRequest, clean, clean_file
};
use async_trait::async_trait;
use config::{GcsConfig, RootKind};
use errors::RuntimeError;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::prefix::PrefixStore;
use object_store::{ClientOptions, ObjectStore, PutPayload};
use std::sync::Arc;
use std::time::Duration;

fn gcs_err(e: object_store::Error) -> RuntimeError {
    RuntimeError::Backend {
        backend: "gcs".to_string(),
        reason: e.to_string()
    }
}

/// Objects under `gs://<bucket>/<folder>/`.
pub struct GcsStorage {
    store: Arc<dyn ObjectStore>,
    location: String
}

impl GcsStorage {
    /// Build the object store client. Credentials are read from
    /// `credentialsFile` when set, otherwise from the ambient environment.
    pub fn connect(config: &GcsConfig, request_timeout: Duration) -> Result<Self, RuntimeError> {
        let folder = clean(&config.folder)?;
        let mut builder = GoogleCloudStorageBuilder::new().with_bucket_name(&config.bucket);
        if !config.credentials_file.trim().is_empty() {
            builder = builder.with_service_account_path(config.credentials_file.trim());
        }
        builder = builder.with_client_options(
            ClientOptions::new()
                .with_timeout(request_timeout)
                .with_connect_timeout(Duration::from_secs(10))
        );
        let store = builder.build().map_err(gcs_err)?;

        let location = if folder.is_empty() {
            format!("gs://{}", config.bucket)
        } else {
            format!("gs://{}/{}", config.bucket, folder)
        };
        Ok(Self::from_store(wrap_with_prefix(store, &folder)?, location))
    }

    /// Wrap an already configured store.
    pub fn from_store(store: Arc<dyn ObjectStore>, location: impl Into<String>) -> Self {
        Self {
            store,
            location: location.into()
        }
    }
}

fn wrap_with_prefix<T: ObjectStore + 'static>(
    store: T,
    prefix: &str
) -> Result<Arc<dyn ObjectStore>, RuntimeError> {
    if prefix.is_empty() {
        Ok(Arc::new(store) as Arc<dyn ObjectStore>)
    } else {
        let prefix_path = ObjectPath::parse(prefix).map_err(|e| RuntimeError::InvalidPath {
            path: prefix.to_string(),
            reason: e.to_string()
        })?;
        Ok(Arc::new(PrefixStore::new(store, prefix_path)) as Arc<dyn ObjectStore>)
    }
}

fn object_path(cleaned: &str) -> Result<ObjectPath, RuntimeError> {
    ObjectPath::parse(cleaned).map_err(|e| RuntimeError::InvalidPath {
        path: cleaned.to_string(),
        reason: e.to_string()
    })
}

#[async_trait]
impl StorageRuntime for GcsStorage {
    fn kind(&self) -> RootKind {
        RootKind::Gcs
    }

    fn location(&self) -> String {
        self.location.clone()
    }

    async fn list(&self, path: &str) -> Result<Vec<EntryInfo>, RuntimeError> {
        let cleaned = clean(path)?;
        let prefix = if cleaned.is_empty() {
            None
        } else {
            Some(object_path(&cleaned)?)
        };
        let listing = self
            .store
            .list_with_delimiter(prefix.as_ref())
            .await
            .map_err(gcs_err)?;

        let mut entries: Vec<EntryInfo> = listing
            .common_prefixes
            .iter()
            .map(|dir| EntryInfo {
                path: dir.to_string(),
                name: dir.filename().unwrap_or_default().to_string(),
                is_dir: true,
                size: 0,
                modified: None
            })
            .chain(listing.objects.iter().map(|meta| EntryInfo {
                path: meta.location.to_string(),
                name: meta.location.filename().unwrap_or_default().to_string(),
                is_dir: false,
                size: meta.size,
                modified: Some(meta.last_modified)
            }))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &str) -> Result<Option<Entry>, RuntimeError> {
        let cleaned = clean_file(path)?;
        let result = match self.store.get(&object_path(&cleaned)?).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(gcs_err(e))
        };
        let modified = result.meta.last_modified;
        let body = result.bytes().await.map_err(gcs_err)?;
        Ok(Some(Entry {
            path: cleaned,
            body,
            modified: Some(modified)
        }))
    }

    async fn write(&self, request: WriteRequest) -> Result<ChangeOutcome, RuntimeError> {
        let cleaned = clean_file(&request.path)?;
        let result = self
            .store
            .put(&object_path(&cleaned)?, PutPayload::from(request.body))
            .await
            .map_err(gcs_err)?;
        Ok(ChangeOutcome::Committed {
            path: cleaned,
            revision: result.version.or(result.e_tag)
        })
    }

    async fn delete(&self, path: &str) -> Result<ChangeOutcome, RuntimeError> {
        let cleaned = clean_file(path)?;
        let location = object_path(&cleaned)?;
        match self.store.head(&location).await {
            Ok(_) => {}
            Err(object_store::Error::NotFound { .. }) => {
                return Ok(ChangeOutcome::Missing { path: cleaned });
            }
            Err(e) => return Err(gcs_err(e))
        }
        self.store.delete(&location).await.map_err(gcs_err)?;
        Ok(ChangeOutcome::Committed {
            path: cleaned,
            revision: None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn in_memory(folder: &str) -> GcsStorage {
        let store = wrap_with_prefix(InMemory::new(), folder).unwrap();
        GcsStorage::from_store(store, format!("gs://test/{folder}"))
    }

    #[tokio::test]
    async fn test_write_list_read_delete() {
        let gcs = in_memory("dash");
        gcs.write(WriteRequest::new("team/a.json", b"{}".to_vec()))
            .await
            .unwrap();
        gcs.write(WriteRequest::new("top.json", b"[]".to_vec()))
            .await
            .unwrap();

        let top = gcs.list("").await.unwrap();
        let names: Vec<_> = top.iter().map(|e| (e.path.as_str(), e.is_dir)).collect();
        assert_eq!(names, vec![("team", true), ("top.json", false)]);

        let team = gcs.list("team").await.unwrap();
        assert_eq!(team[0].path, "team/a.json");
        assert_eq!(team[0].size, 2);

        let entry = gcs.read("team/a.json").await.unwrap().unwrap();
        assert_eq!(entry.body.as_ref(), b"{}");

        assert!(matches!(
            gcs.delete("team/a.json").await.unwrap(),
            ChangeOutcome::Committed { .. }
        ));
        assert!(matches!(
            gcs.delete("team/a.json").await.unwrap(),
            ChangeOutcome::Missing { .. }
        ));
        assert!(gcs.read("team/a.json").await.unwrap().is_none());
    }

    #[test]
    fn test_missing_credentials_file_fails_construction() {
        let cfg = GcsConfig {
            bucket: "bucket".to_string(),
            folder: String::new(),
            credentials_file: "/nonexistent/creds.json".to_string()
        };
        assert!(GcsStorage::connect(&cfg, Duration::from_secs(5)).is_err());
    }
}
