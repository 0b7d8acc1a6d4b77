//! # Global Config Store
//!
//! Loads, defaults and persists `<data dir>/storage.json`.
//!
//! The first boot of a development install writes a template document with
//! one disabled example root so operators have something to edit. Production
//! installs keep those defaults in memory only: a file holding credential
//! fields is never created unless someone asked for it.

use crate::error::ConfigError;
use crate::settings::Environment;
use crate::storage_config::{GitConfig, GlobalStorageConfig, RootBackend, RootConfig, SecretValue};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fixed file name of the storage document inside the data directory.
pub const STORAGE_CONFIG_FILE: &str = "storage.json";

/// Path of the storage document for a data directory.
pub fn storage_config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(STORAGE_CONFIG_FILE)
}

/// Document as read from disk. `roots` stays optional here so that an
/// explicit `"roots": []` (an operator turning storage off) can be told
/// apart from a document that never had roots.
#[derive(Deserialize)]
struct StoredDocument {
    #[serde(
        rename = "allowUnsanitizedSvgUpload",
        alias = "allowUnsanitizedUpload",
        default
    )]
    allow_unsanitized_upload: bool,
    #[serde(rename = "addDevEnv", alias = "addDevEnvironment", default)]
    add_dev_environment: bool,
    #[serde(default)]
    roots: Option<Vec<RootConfig>>
}

/// The disabled example root seeded into documents without roots.
pub fn default_example_root() -> RootConfig {
    RootConfig {
        prefix: "it".to_string(),
        name: "Your git repository".to_string(),
        description: String::new(),
        disabled: true,
        backend: RootBackend::Git(GitConfig {
            remote: "github.com/ryantxu/test-repo-export-0002".to_string(),
            branch: "main".to_string(),
            root_subpath: "org_1/root".to_string(),
            require_pull_request: true,
            access_token: SecretValue::new("?????")
        })
    }
}

/// Load the storage document, seeding defaults where needed.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Reads `<data_dir>/storage.json`. A missing file starts an empty document
/// with `add_dev_environment` set. A document without roots receives the
/// disabled example git root. If anything was defaulted and `environment`
/// is not production, the result is written back immediately.
///
/// ## Usage
/// ```rust,no_run
/// use config::{Environment, load_storage_config};
/// use std::path::Path;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let doc = load_storage_config(Path::new("data"), Environment::Development)?;
///     println!("{} roots configured", doc.roots.len());
///     Ok(())
/// }
/// ```
///
/// ## Error Handling
/// - `Read`: the file exists but cannot be read
/// - `Parse`: the file is malformed; no defaults are applied
/// - `DefaultsNotPersisted`: defaults could not be written back; the
///   seeded document travels inside the error
pub fn load_storage_config(
    data_dir: &Path,
    environment: Environment
) -> Result<GlobalStorageConfig, ConfigError> {
    let path = storage_config_path(data_dir);
    let mut changed = false;

    let (mut document, roots_present) = match std::fs::read(&path) {
        Ok(body) => {
            let stored = parse_document(&path, &body)?;
            let roots_present = stored.roots.is_some();
            (
                GlobalStorageConfig {
                    allow_unsanitized_upload: stored.allow_unsanitized_upload,
                    add_dev_environment: stored.add_dev_environment,
                    roots: stored.roots.unwrap_or_default()
                },
                roots_present
            )
        }
        Err(e) if is_missing(&e) => {
            debug!("No storage config at {}, starting from defaults", path.display());
            changed = true;
            (
                GlobalStorageConfig {
                    add_dev_environment: true,
                    ..Default::default()
                },
                false
            )
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                reason: e.to_string()
            });
        }
    };

    if !roots_present {
        document.roots.push(default_example_root());
        changed = true;
    }

    if changed {
        if environment.is_production() {
            info!(
                "Storage defaults for {} held in memory only (production)",
                path.display()
            );
        } else if let Err(e) = save_storage_config(&path, &document) {
            return Err(ConfigError::DefaultsNotPersisted {
                path: path.display().to_string(),
                reason: e.to_string(),
                document: Box::new(document)
            });
        } else {
            info!("Wrote storage config template to {}", path.display());
        }
    }

    Ok(document)
}

fn is_missing(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
    )
}

fn parse_document(path: &Path, body: &[u8]) -> Result<StoredDocument, ConfigError> {
    serde_json::from_slice::<StoredDocument>(body).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
        partial: serde_json::from_slice::<serde_json::Value>(body).ok()
    })
}

/// Persist a document with 2-space indentation and owner-only permissions.
///
/// The body is written to a temporary file next to the target and renamed
/// over it, so concurrent readers see either the old or the new document.
pub fn save_storage_config(path: &Path, document: &GlobalStorageConfig) -> Result<(), ConfigError> {
    let persist_err = |reason: String| ConfigError::Persist {
        path: path.display().to_string(),
        reason
    };

    let body = serde_json::to_vec_pretty(document).map_err(|e| persist_err(e.to_string()))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new(".")
    };
    std::fs::create_dir_all(dir).map_err(|e| persist_err(e.to_string()))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".storage.json.")
        .tempfile_in(dir)
        .map_err(|e| persist_err(e.to_string()))?;
    tmp.write_all(&body).map_err(|e| persist_err(e.to_string()))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| persist_err(e.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))
            .map_err(|e| persist_err(e.to_string()))?;
    }

    tmp.persist(path).map_err(|e| persist_err(e.error.to_string()))?;
    debug!("Persisted storage config to {}", path.display());
    Ok(())
}

/// Owner of the loaded storage document.
///
/// Readers take cheap `Arc` snapshots; `save` and `replace` are serialised
/// by a writer mutex, and the snapshot pointer is only swapped after the new
/// document reached disk.
pub struct GlobalConfigStore {
    data_dir: PathBuf,
    path: PathBuf,
    environment: Environment,
    document: RwLock<Arc<GlobalStorageConfig>>,
    writer: Mutex<()>
}

impl GlobalConfigStore {
    /// Load (and default) the document in `data_dir`.
    pub fn load(data_dir: impl Into<PathBuf>, environment: Environment) -> Result<Self, ConfigError> {
        let data_dir = data_dir.into();
        let document = load_storage_config(&data_dir, environment)?;
        Ok(Self {
            path: storage_config_path(&data_dir),
            data_dir,
            environment,
            document: RwLock::new(Arc::new(document)),
            writer: Mutex::new(())
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Current immutable snapshot.
    pub fn document(&self) -> Arc<GlobalStorageConfig> {
        Arc::clone(&self.document.read())
    }

    /// Write the current snapshot back to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        let _writer = self.writer.lock();
        let snapshot = self.document();
        save_storage_config(&self.path, &snapshot)
    }

    /// Replace the whole document (the admin mutation path).
    ///
    /// The new document is validated and persisted before it becomes
    /// visible; on any failure the previous snapshot stays current.
    pub fn replace(&self, document: GlobalStorageConfig) -> Result<Arc<GlobalStorageConfig>, ConfigError> {
        document.validate_roots()?;
        let _writer = self.writer.lock();
        save_storage_config(&self.path, &document)?;
        let document = Arc::new(document);
        *self.document.write() = Arc::clone(&document);
        info!(roots = document.roots.len(), "Storage config replaced");
        Ok(document)
    }

    /// Re-read the file, e.g. after an operator edited it by hand.
    ///
    /// The file is held to the same rules as [`Self::replace`]: a document
    /// that fails validation is reported and the previous snapshot stays
    /// current.
    pub fn reload_from_disk(&self) -> Result<Arc<GlobalStorageConfig>, ConfigError> {
        let _writer = self.writer.lock();
        let document = match load_storage_config(&self.data_dir, self.environment) {
            Ok(document) => document,
            Err(ConfigError::DefaultsNotPersisted { document, reason, .. }) => {
                warn!("Reloaded storage config but could not persist defaults: {}", reason);
                *document
            }
            Err(e) => return Err(e)
        };
        document.validate_roots()?;
        let document = Arc::new(document);
        *self.document.write() = Arc::clone(&document);
        Ok(document)
    }
}
