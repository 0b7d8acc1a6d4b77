//! # Environment Settings
//!
//! Process-level settings for the storage subsystem, loaded from environment
//! variables following 12-factor app principles.
//!
//! # Naming Convention
//! - `STOWAGE_ENV`: `production` (or `prod`) disables auto-writing defaults
//! - `STOWAGE_DATA_DIR`: directory holding `storage.json`
//! - `STOWAGE_WORK_CACHE_DIR`: scratch space for remote-backed roots
//! - `STOWAGE_BUILD_TIMEOUT_SECONDS`: limit for constructing one root
//! - `STOWAGE_ORG_ID`: organisation used to isolate SQL roots

use crate::error::ConfigError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_ENVIRONMENT: &str = "STOWAGE_ENV";
pub const ENV_DATA_DIR: &str = "STOWAGE_DATA_DIR";
pub const ENV_WORK_CACHE_DIR: &str = "STOWAGE_WORK_CACHE_DIR";
pub const ENV_BUILD_TIMEOUT_SECONDS: &str = "STOWAGE_BUILD_TIMEOUT_SECONDS";
pub const ENV_ORG_ID: &str = "STOWAGE_ORG_ID";

/// Runtime environment. Only `Production` changes behaviour: seeded
/// defaults are never written to disk there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    /// Read `STOWAGE_ENV`; unset means development.
    pub fn from_env() -> Self {
        env::var(ENV_ENVIRONMENT)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

impl FromStr for Environment {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development
        })
    }
}

/// Settings needed to load the storage document and build its roots.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub work_cache_dir: PathBuf,
    pub environment: Environment,
    pub build_timeout: Duration,
    pub org_id: i64
}

impl StorageSettings {
    /// Settings rooted at `data_dir` with every other value defaulted.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            work_cache_dir: data_dir.join("storage-cache"),
            data_dir,
            environment: Environment::Development,
            build_timeout: Duration::from_secs(default_build_timeout_secs()),
            org_id: 1
        }
    }
}

fn default_build_timeout_secs() -> u64 {
    120
}

/// Load [`StorageSettings`] from environment variables.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Resolves where the storage document lives and how roots are built.
///
/// ## Usage
/// ```rust,no_run
/// use config::load_settings_from_env;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let settings = load_settings_from_env()?;
///     println!("storage.json lives in {}", settings.data_dir.display());
///     Ok(())
/// }
/// ```
///
/// ## Defaults
/// - data dir: `./data`
/// - work cache: `<data dir>/storage-cache`
/// - build timeout: 120 seconds
/// - org id: 1
pub fn load_settings_from_env() -> Result<StorageSettings, ConfigError> {
    let data_dir = env::var(ENV_DATA_DIR).map_or_else(|_| PathBuf::from("data"), PathBuf::from);
    let mut settings = StorageSettings::for_data_dir(data_dir);

    if let Ok(dir) = env::var(ENV_WORK_CACHE_DIR) {
        settings.work_cache_dir = PathBuf::from(dir);
    }
    settings.environment = Environment::from_env();
    if let Some(secs) = parse_env::<u64>(ENV_BUILD_TIMEOUT_SECONDS)? {
        settings.build_timeout = Duration::from_secs(secs);
    }
    if let Some(org_id) = parse_env::<i64>(ENV_ORG_ID)? {
        settings.org_id = org_id;
    }

    Ok(settings)
}

fn parse_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidSetting {
                key: key.to_string(),
                reason: e.to_string()
            }),
        Err(_) => Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear() {
        unsafe {
            env::remove_var(ENV_ENVIRONMENT);
            env::remove_var(ENV_DATA_DIR);
            env::remove_var(ENV_WORK_CACHE_DIR);
            env::remove_var(ENV_BUILD_TIMEOUT_SECONDS);
            env::remove_var(ENV_ORG_ID);
        }
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("production".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!(Environment::Production.to_string(), "production");
    }

    #[test]
    #[serial]
    fn test_load_settings_defaults() {
        clear();
        let settings = load_settings_from_env().unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("data"));
        assert_eq!(settings.work_cache_dir, PathBuf::from("data").join("storage-cache"));
        assert_eq!(settings.environment, Environment::Development);
        assert_eq!(settings.build_timeout, Duration::from_secs(120));
        assert_eq!(settings.org_id, 1);
    }

    #[test]
    #[serial]
    fn test_load_settings_from_env() {
        clear();
        unsafe {
            env::set_var(ENV_ENVIRONMENT, "production");
            env::set_var(ENV_DATA_DIR, "/var/lib/stowage");
            env::set_var(ENV_WORK_CACHE_DIR, "/tmp/cache");
            env::set_var(ENV_BUILD_TIMEOUT_SECONDS, "5");
            env::set_var(ENV_ORG_ID, "42");
        }

        let settings = load_settings_from_env().unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/var/lib/stowage"));
        assert_eq!(settings.work_cache_dir, PathBuf::from("/tmp/cache"));
        assert!(settings.environment.is_production());
        assert_eq!(settings.build_timeout, Duration::from_secs(5));
        assert_eq!(settings.org_id, 42);

        clear();
    }

    #[test]
    #[serial]
    fn test_invalid_numeric_setting_is_reported() {
        clear();
        unsafe {
            env::set_var(ENV_ORG_ID, "not-a-number");
        }

        let err = load_settings_from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { ref key, .. } if key == ENV_ORG_ID));

        clear();
    }
}
