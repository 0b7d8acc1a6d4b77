//! # Stowage Errors
//!
//! Error types shared by the storage backends, the backend factory and the
//! storage root registry.
//!
//! Follows Microsoft Pragmatic Rust Guidelines:
//! - Uses `thiserror` for structured error definitions
//! - Uses named fields in every message
//! - Keeps errors cheap to clone behind `Arc` so they can be retained per root

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while turning a single root's configuration into a runtime.
///
/// These never abort construction of other roots; the registry records them
/// against the offending prefix.
#[derive(Debug, Error)]
pub enum StorageRootError {
    #[error("unsupported storage type: {kind}")]
    UnsupportedKind { kind: String },

    #[error("{kind} root '{prefix}' could not be constructed: {reason}")]
    Construction {
        prefix: String,
        kind: String,
        reason: String
    },

    #[error("construction of root '{prefix}' aborted: {reason}")]
    ConstructionAborted { prefix: String, reason: String },

    #[error("secret '{secret_id}' for root '{prefix}' could not be resolved: {reason}")]
    SecretResolution {
        prefix: String,
        secret_id: String,
        reason: String
    }
}

impl StorageRootError {
    /// Coarse classification used by administrative views.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnsupportedKind { .. } => ErrorCategory::UnsupportedKind,
            Self::Construction { .. } => ErrorCategory::Construction,
            Self::ConstructionAborted { .. } => ErrorCategory::Aborted,
            Self::SecretResolution { .. } => ErrorCategory::Secret
        }
    }
}

/// Errors raised by a live runtime while serving list/read/write/delete.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Invalid path: {path} - {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Access to {path} is outside the allowed subroots")]
    Forbidden { path: String },

    #[error("IO error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Git operation: {operation} failed: {reason}")]
    Git { operation: String, reason: String },

    #[error("Request to {backend} failed: {reason}")]
    Backend { backend: String, reason: String }
}

/// Errors surfaced by the registry facade.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No storage root registered under prefix '{prefix}'")]
    RootNotFound { prefix: String },

    #[error("Storage root '{prefix}' is unavailable: {reason}")]
    RootUnavailable { prefix: String, reason: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError)
}

/// Serializable error classification shown next to each configured root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    UnsupportedKind,
    Construction,
    Aborted,
    Secret
}
