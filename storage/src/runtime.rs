//! # Storage Runtime Contract
//!
//! The capability set every backend implements. The registry hands out
//! `Arc<dyn StorageRuntime>` handles, so callers never depend on a concrete
//! backend type.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use config::RootKind;
use errors::RuntimeError;
use serde::{Deserialize, Serialize};

/// How a backend applies writes.
///
/// `ReviewGated` backends never change the shared copy directly; each write
/// or delete is proposed as a change for review instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WriteMode {
    Direct,
    ReviewGated
}

/// One item returned by [`StorageRuntime::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    /// Path relative to the root, without leading slash.
    pub path: String,
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>
}

/// A file read from a root.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub path: String,
    pub body: Bytes,
    pub modified: Option<DateTime<Utc>>
}

/// A write against a root.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub path: String,
    pub body: Bytes,
    /// Commit or change description, used by versioned backends.
    pub message: Option<String>,
    /// Whether the write carries an image/asset. Reported to observability.
    pub needs_image: bool
}

impl WriteRequest {
    pub fn new(path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            body: body.into(),
            message: None,
            needs_image: false
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_needs_image(mut self, needs_image: bool) -> Self {
        self.needs_image = needs_image;
        self
    }
}

/// Result of a state-changing operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChangeOutcome {
    /// Applied to the shared copy. `revision` is set by versioned backends.
    Committed {
        path: String,
        revision: Option<String>
    },
    /// Proposed for review on `branch`; the shared copy is unchanged.
    Proposed {
        path: String,
        branch: String,
        revision: String
    },
    /// Delete of an entry that did not exist.
    Missing { path: String }
}

impl ChangeOutcome {
    pub fn path(&self) -> &str {
        match self {
            Self::Committed { path, .. } | Self::Proposed { path, .. } | Self::Missing { path } => {
                path
            }
        }
    }

    pub fn is_proposed(&self) -> bool {
        matches!(self, Self::Proposed { .. })
    }
}

/// Live handle to one storage root.
#[async_trait]
pub trait StorageRuntime: Send + Sync {
    fn kind(&self) -> RootKind;

    /// Human readable location, e.g. a directory or `s3://bucket/folder`.
    fn location(&self) -> String;

    fn write_mode(&self) -> WriteMode {
        WriteMode::Direct
    }

    /// Direct children of `path`. A missing directory lists as empty.
    async fn list(&self, path: &str) -> Result<Vec<EntryInfo>, RuntimeError>;

    /// `Ok(None)` when no file exists at `path`.
    async fn read(&self, path: &str) -> Result<Option<Entry>, RuntimeError>;

    async fn write(&self, request: WriteRequest) -> Result<ChangeOutcome, RuntimeError>;

    async fn delete(&self, path: &str) -> Result<ChangeOutcome, RuntimeError>;
}

/// Normalise a caller supplied path.
pub(crate) fn clean(path: &str) -> Result<String, RuntimeError> {
    utils::clean_path(path).map_err(|e| RuntimeError::InvalidPath {
        path: e.path,
        reason: e.reason
    })
}

/// Normalise a path that must name a file rather than the root itself.
pub(crate) fn clean_file(path: &str) -> Result<String, RuntimeError> {
    let cleaned = clean(path)?;
    if cleaned.is_empty() {
        return Err(RuntimeError::InvalidPath {
            path: path.to_string(),
            reason: "a file path is required".to_string()
        });
    }
    Ok(cleaned)
}

/// Split `key` (relative to a listing prefix) into a direct child entry.
/// Returns the child name and whether it is a directory.
pub(crate) fn direct_child(rest: &str) -> Option<(&str, bool)> {
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        return None;
    }
    match rest.split_once('/') {
        Some((dir, _)) => Some((dir, true)),
        None => Some((rest, false))
    }
}
