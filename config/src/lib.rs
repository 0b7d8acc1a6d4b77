//! # Storage Configuration
//!
//! Configuration lifecycle for the storage root registry.
//!
//! This crate provides:
//! - The typed `storage.json` schema (one tagged backend payload per root)
//! - Loading with first-boot defaulting and atomic, owner-only saves
//! - Pre-instantiation validation (duplicate prefixes)
//! - Environment settings (12-factor app principles)
//! - Hot reload of the document
//!
//! # Best Practices
//!
//! - Uses `validator` crate for per-root field validation
//! - Keeps the on-disk field names stable across releases
//! - Never writes seeded defaults in production

pub mod error;
pub mod hot_reload;
pub mod settings;
pub mod storage_config;
pub mod store;
pub mod validation;

pub use error::ConfigError;
pub use hot_reload::watch_storage_config;
pub use settings::{Environment, StorageSettings, load_settings_from_env};
pub use storage_config::{
    DiskConfig, GcsConfig, GitConfig, GlobalStorageConfig, RootBackend, RootConfig, RootKind,
    S3Config, SecretValue, SqlConfig
};
pub use store::{
    GlobalConfigStore, STORAGE_CONFIG_FILE, default_example_root, load_storage_config,
    save_storage_config, storage_config_path
};
pub use validator::Validate;
