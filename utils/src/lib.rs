//! # Stowage Utilities
//!
//! Path normalisation shared by every storage backend, plus helpers for
//! naming work-cache directories.
//!
//! # Best Practices
//!
//! - Rejects parent-directory segments instead of resolving them
//! - Uses SHA-256 to derive stable cache directory names

use sha2::{Digest, Sha256};

/// Path rejected by [`clean_path`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid path '{path}': {reason}")]
pub struct PathError {
    pub path: String,
    pub reason: String
}

/// Normalise a storage-relative path.
///
/// Leading and trailing slashes, empty segments and `.` segments are
/// dropped. Backslashes are treated as separators. `..` is rejected so that
/// no backend can be walked out of its root.
///
/// # Examples
///
/// ```
/// use utils::clean_path;
///
/// assert_eq!(clean_path("/dashboards//team/./a.json").unwrap(), "dashboards/team/a.json");
/// assert_eq!(clean_path("/").unwrap(), "");
/// assert!(clean_path("../etc/passwd").is_err());
/// ```
pub fn clean_path(path: &str) -> Result<String, PathError> {
    let mut segments = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(PathError {
                    path: path.to_string(),
                    reason: "parent directory segments are not allowed".to_string()
                });
            }
            s if s.contains('\0') => {
                return Err(PathError {
                    path: path.to_string(),
                    reason: "NUL bytes are not allowed".to_string()
                });
            }
            s => segments.push(s)
        }
    }
    Ok(segments.join("/"))
}

/// First segment of an already cleaned path, if any.
#[must_use]
pub fn first_segment(clean: &str) -> Option<&str> {
    clean.split('/').next().filter(|s| !s.is_empty())
}

/// Join two cleaned relative paths, skipping empty parts.
#[must_use]
pub fn join_clean(base: &str, rest: &str) -> String {
    match (base.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{base}/{rest}")
    }
}

/// Directory name for a root's work cache.
///
/// Combines a filesystem-safe version of the prefix with a short hash of the
/// remote location so that pointing a root at a different remote never
/// reuses a stale checkout.
///
/// ```
/// use utils::cache_dir_name;
///
/// let a = cache_dir_name("it", "github.com/org/repo");
/// let b = cache_dir_name("it", "github.com/org/other");
/// assert!(a.starts_with("it-"));
/// assert_ne!(a, b);
/// ```
#[must_use]
pub fn cache_dir_name(prefix: &str, remote: &str) -> String {
    let safe: String = prefix
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut hasher = Sha256::new();
    hasher.update(remote.as_bytes());
    let digest: String = hasher
        .finalize()
        .iter()
        .take(6)
        .map(|b| format!("{b:02x}"))
        .collect();
    format!("{safe}-{digest}")
}
