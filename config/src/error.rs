//! # Configuration Errors

use crate::storage_config::GlobalStorageConfig;

/// Errors raised while loading, validating or persisting `storage.json`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    /// The file exists but is not a valid document. Nothing is defaulted on
    /// top of it. `partial` holds the raw JSON when the file is at least
    /// syntactically valid, for diagnostic display.
    #[error("Failed to parse {path}: {reason}")]
    Parse {
        path: String,
        reason: String,
        partial: Option<serde_json::Value>
    },

    #[error("Failed to persist {path}: {reason}")]
    Persist { path: String, reason: String },

    /// Defaults were seeded but could not be written back. The seeded
    /// document is carried so callers can still show it.
    #[error("Seeded defaults could not be written to {path}: {reason}")]
    DefaultsNotPersisted {
        path: String,
        reason: String,
        document: Box<GlobalStorageConfig>
    },

    #[error("Duplicate storage prefix '{prefix}' used by roots '{first}' and '{second}'")]
    DuplicatePrefix {
        prefix: String,
        first: String,
        second: String
    },

    #[error("Invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String }
}
