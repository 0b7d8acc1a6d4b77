//! # Storage
//!
//! Pluggable storage roots: every enabled entry of `storage.json` becomes a
//! live runtime registered under its prefix.
//!
//! This crate provides:
//! - The runtime capability contract ([`StorageRuntime`])
//! - Disk, git, SQL, S3 and GCS backends
//! - The backend factory with per-root timeouts and cancellation
//! - The prefix registry with atomic reloads
//! - Secret resolution for root credentials

pub mod disk;
pub mod factory;
pub mod gcs;
pub mod git;
pub mod registry;
pub mod runtime;
pub mod s3;
pub mod secrets;
pub mod service;
pub mod sql;

pub use factory::{BuildContext, build_runtime};
pub use git::CheckoutLocks;
pub use registry::{ReloadSummary, RootReport, RootState, RootStatus, StorageRootRegistry};
pub use runtime::{ChangeOutcome, Entry, EntryInfo, StorageRuntime, WriteMode, WriteRequest};
pub use secrets::{
    EnvSecretProvider, LocalSecretProvider, SecretError, SecretProvider, SecretProviderConfig,
    VaultSecretProvider, resolve_secret
};
pub use service::StorageService;
