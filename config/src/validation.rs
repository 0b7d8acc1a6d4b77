//! # Document Validation
//!
//! Checks that must pass before any root is instantiated. Per-root field
//! validation (`RootConfig::validate_all`) is deliberately not part of this:
//! a badly configured root only takes itself out of service.

use crate::error::ConfigError;
use crate::storage_config::GlobalStorageConfig;
use std::collections::HashMap;

impl GlobalStorageConfig {
    /// Reject documents in which two enabled roots share a prefix.
    ///
    /// # M-CANONICAL-DOCS
    ///
    /// ## Purpose
    /// Prefixes are the routing key of the registry. Picking one of two
    /// conflicting roots arbitrarily would silently hide the other, so the
    /// whole document is rejected instead, naming both roots.
    ///
    /// ## Usage
    /// ```rust
    /// use config::GlobalStorageConfig;
    ///
    /// let doc = GlobalStorageConfig::default();
    /// assert!(doc.validate_roots().is_ok());
    /// ```
    pub fn validate_roots(&self) -> Result<(), ConfigError> {
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for root in self.enabled_roots() {
            if let Some(first) = seen.insert(root.prefix.as_str(), root.name.as_str()) {
                return Err(ConfigError::DuplicatePrefix {
                    prefix: root.prefix.clone(),
                    first: first.to_string(),
                    second: root.name.clone()
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ConfigError;
    use crate::storage_config::{
        DiskConfig, GlobalStorageConfig, RootBackend, RootConfig, SqlConfig
    };

    fn root(prefix: &str, name: &str, disabled: bool) -> RootConfig {
        RootConfig {
            prefix: prefix.to_string(),
            name: name.to_string(),
            description: String::new(),
            disabled,
            backend: RootBackend::Disk(DiskConfig {
                path: "/tmp".to_string(),
                allowed_subroots: None
            })
        }
    }

    #[test]
    fn test_duplicate_prefix_names_both_roots() {
        let doc = GlobalStorageConfig {
            roots: vec![root("shared", "First", false), root("shared", "Second", false)],
            ..Default::default()
        };
        match doc.validate_roots() {
            Err(ConfigError::DuplicatePrefix {
                prefix,
                first,
                second
            }) => {
                assert_eq!(prefix, "shared");
                assert_eq!(first, "First");
                assert_eq!(second, "Second");
            }
            other => panic!("expected duplicate prefix error, got {other:?}")
        }
    }

    #[test]
    fn test_disabled_roots_may_share_prefix() {
        let doc = GlobalStorageConfig {
            roots: vec![root("shared", "Live", false), root("shared", "Old", true)],
            ..Default::default()
        };
        assert!(doc.validate_roots().is_ok());
    }

    #[test]
    fn test_distinct_prefixes_across_kinds() {
        let mut sql = root("db", "Database", false);
        sql.backend = RootBackend::Sql(SqlConfig {});
        let doc = GlobalStorageConfig {
            roots: vec![root("local", "Local", false), sql],
            ..Default::default()
        };
        assert!(doc.validate_roots().is_ok());
    }
}
