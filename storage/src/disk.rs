//! Local directory backend.

use crate::runtime::{
    ChangeOutcome, Entry, EntryInfo, StorageRuntime, WriteRequest, clean, clean_file
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use config::{DiskConfig, RootKind};
use errors::RuntimeError;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A root backed by a directory on the local filesystem.
///
/// Nothing touches the disk at construction time; a missing directory is
/// created by the first write and lists as empty until then.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
    allowed_subroots: Option<BTreeSet<String>>
}

impl DiskStorage {
    pub fn new(config: &DiskConfig) -> Self {
        Self {
            root: PathBuf::from(&config.path),
            allowed_subroots: config.allowed_subroots.clone()
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn check_allowed(&self, cleaned: &str) -> Result<(), RuntimeError> {
        let Some(allowed) = &self.allowed_subroots else {
            return Ok(());
        };
        match utils::first_segment(cleaned) {
            Some(first) if allowed.contains(first) => Ok(()),
            _ => Err(RuntimeError::Forbidden {
                path: cleaned.to_string()
            })
        }
    }
}

#[async_trait]
impl StorageRuntime for DiskStorage {
    fn kind(&self) -> RootKind {
        RootKind::Disk
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }

    async fn list(&self, path: &str) -> Result<Vec<EntryInfo>, RuntimeError> {
        let cleaned = clean(path)?;
        if cleaned.is_empty() {
            let mut entries = list_dir(&self.root, "").await?;
            if let Some(allowed) = &self.allowed_subroots {
                entries.retain(|e| e.is_dir && allowed.contains(&e.name));
            }
            return Ok(entries);
        }
        self.check_allowed(&cleaned)?;
        list_dir(&self.root, &cleaned).await
    }

    async fn read(&self, path: &str) -> Result<Option<Entry>, RuntimeError> {
        let cleaned = clean_file(path)?;
        self.check_allowed(&cleaned)?;
        read_file(&self.root, &cleaned).await
    }

    async fn write(&self, request: WriteRequest) -> Result<ChangeOutcome, RuntimeError> {
        let cleaned = clean_file(&request.path)?;
        self.check_allowed(&cleaned)?;
        write_file(&self.root, &cleaned, &request.body).await?;
        debug!(root = %self.root.display(), path = %cleaned, "Wrote file");
        Ok(ChangeOutcome::Committed {
            path: cleaned,
            revision: None
        })
    }

    async fn delete(&self, path: &str) -> Result<ChangeOutcome, RuntimeError> {
        let cleaned = clean_file(path)?;
        self.check_allowed(&cleaned)?;
        if remove_file(&self.root, &cleaned).await? {
            Ok(ChangeOutcome::Committed {
                path: cleaned,
                revision: None
            })
        } else {
            Ok(ChangeOutcome::Missing { path: cleaned })
        }
    }
}

fn io_error(path: &Path, e: &std::io::Error) -> RuntimeError {
    RuntimeError::Io {
        path: path.display().to_string(),
        reason: e.to_string()
    }
}

/// List direct children of `base/rel`, sorted by name.
pub(crate) async fn list_dir(base: &Path, rel: &str) -> Result<Vec<EntryInfo>, RuntimeError> {
    let dir = base.join(rel);
    let mut reader = match tokio::fs::read_dir(&dir).await {
        Ok(reader) => reader,
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
            return Ok(Vec::new());
        }
        Err(e) => return Err(io_error(&dir, &e))
    };

    let mut entries = Vec::new();
    while let Some(item) = reader.next_entry().await.map_err(|e| io_error(&dir, &e))? {
        let name = item.file_name().to_string_lossy().into_owned();
        if name == ".git" {
            continue;
        }
        let metadata = item.metadata().await.map_err(|e| io_error(&item.path(), &e))?;
        entries.push(EntryInfo {
            path: utils::join_clean(rel, &name),
            is_dir: metadata.is_dir(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            name
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

pub(crate) async fn read_file(base: &Path, rel: &str) -> Result<Option<Entry>, RuntimeError> {
    let file = base.join(rel);
    let metadata = match tokio::fs::metadata(&file).await {
        Ok(m) if m.is_file() => m,
        Ok(_) => return Ok(None),
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
            return Ok(None);
        }
        Err(e) => return Err(io_error(&file, &e))
    };
    let body = tokio::fs::read(&file).await.map_err(|e| io_error(&file, &e))?;
    Ok(Some(Entry {
        path: rel.to_string(),
        body: body.into(),
        modified: metadata.modified().ok().map(DateTime::<Utc>::from)
    }))
}

pub(crate) async fn write_file(base: &Path, rel: &str, body: &[u8]) -> Result<(), RuntimeError> {
    let file = base.join(rel);
    if let Some(parent) = file.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, &e))?;
    }
    tokio::fs::write(&file, body).await.map_err(|e| io_error(&file, &e))
}

/// Returns whether a file was removed.
pub(crate) async fn remove_file(base: &Path, rel: &str) -> Result<bool, RuntimeError> {
    let file = base.join(rel);
    match tokio::fs::remove_file(&file).await {
        Ok(()) => Ok(true),
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => Ok(false),
        Err(e) => Err(io_error(&file, &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(dir: &Path, allowed: Option<&[&str]>) -> DiskStorage {
        DiskStorage::new(&DiskConfig {
            path: dir.display().to_string(),
            allowed_subroots: allowed.map(|a| a.iter().map(|s| s.to_string()).collect())
        })
    }

    #[tokio::test]
    async fn test_write_read_list_delete() {
        let dir = TempDir::new().unwrap();
        let disk = storage(dir.path(), None);

        let outcome = disk
            .write(WriteRequest::new("/team/a.json", b"{\"a\":1}".to_vec()))
            .await
            .unwrap();
        assert_eq!(outcome.path(), "team/a.json");

        let entry = disk.read("team/a.json").await.unwrap().unwrap();
        assert_eq!(entry.body.as_ref(), b"{\"a\":1}");
        assert!(entry.modified.is_some());

        let top = disk.list("").await.unwrap();
        assert_eq!(top.len(), 1);
        assert!(top[0].is_dir);
        assert_eq!(top[0].path, "team");

        let inner = disk.list("team").await.unwrap();
        assert_eq!(inner[0].name, "a.json");
        assert_eq!(inner[0].size, 7);

        assert!(matches!(
            disk.delete("team/a.json").await.unwrap(),
            ChangeOutcome::Committed { .. }
        ));
        assert!(matches!(
            disk.delete("team/a.json").await.unwrap(),
            ChangeOutcome::Missing { .. }
        ));
        assert!(disk.read("team/a.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_directory_lists_empty() {
        let dir = TempDir::new().unwrap();
        let disk = storage(&dir.path().join("not-yet"), None);
        assert!(disk.list("").await.unwrap().is_empty());
        assert!(disk.read("x.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_allowed_subroots_restrict_access() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("public")).unwrap();
        std::fs::create_dir_all(dir.path().join("private")).unwrap();
        std::fs::write(dir.path().join("private/key.pem"), "k").unwrap();
        let disk = storage(dir.path(), Some(&["public"]));

        let top = disk.list("").await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].name, "public");

        assert!(matches!(
            disk.read("private/key.pem").await,
            Err(RuntimeError::Forbidden { .. })
        ));
        assert!(matches!(
            disk.write(WriteRequest::new("top.json", b"x".to_vec())).await,
            Err(RuntimeError::Forbidden { .. })
        ));
        disk.write(WriteRequest::new("public/ok.json", b"x".to_vec()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let dir = TempDir::new().unwrap();
        let disk = storage(dir.path(), None);
        assert!(matches!(
            disk.read("../etc/passwd").await,
            Err(RuntimeError::InvalidPath { .. })
        ));
        assert!(matches!(
            disk.write(WriteRequest::new("", b"x".to_vec())).await,
            Err(RuntimeError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_location_and_kind() {
        let disk = storage(Path::new("/data/files"), None);
        assert_eq!(disk.location(), "/data/files");
        assert_eq!(disk.kind(), RootKind::Disk);
    }
}
