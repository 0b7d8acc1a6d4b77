//! # Storage Root Configuration Schema
//!
//! Typed model of the persisted `storage.json` document.
//!
//! The on-disk field names are an external contract shared with existing
//! installations, so every struct pins its serde names explicitly. The
//! descriptive names (`kind`, `allowedSubroots`, `rootSubpath`, ...) are
//! accepted as read aliases only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use validator::{Validate, ValidationError, ValidationErrors};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Marker for secret values that reference an external secret store.
pub const SECRET_REFERENCE_PREFIX: &str = "secret:";

/// The persisted document describing every storage root.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Top-level storage configuration. Immutable once loaded; the only way to
/// change it is to hand a whole new document to
/// [`GlobalConfigStore::replace`](crate::store::GlobalConfigStore::replace).
///
/// ## Fields
/// - `allow_unsanitized_upload`: operator security toggle
/// - `add_dev_environment`: seed a development-only example root
/// - `roots`: ordered storage roots; order is the listing order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalStorageConfig {
    #[serde(
        rename = "allowUnsanitizedSvgUpload",
        alias = "allowUnsanitizedUpload",
        default
    )]
    pub allow_unsanitized_upload: bool,

    #[serde(rename = "addDevEnv", alias = "addDevEnvironment", default)]
    pub add_dev_environment: bool,

    #[serde(default)]
    pub roots: Vec<RootConfig>
}

impl GlobalStorageConfig {
    /// Roots that should be instantiated, in document order.
    pub fn enabled_roots(&self) -> impl Iterator<Item = &RootConfig> {
        self.roots.iter().filter(|r| !r.disabled)
    }

    /// Look a root up by prefix, including disabled ones.
    pub fn root(&self, prefix: &str) -> Option<&RootConfig> {
        self.roots.iter().find(|r| r.prefix == prefix)
    }
}

/// Storage medium a root is backed by.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RootKind {
    Disk,
    Git,
    Sql,
    S3,
    Gcs
}

/// One named storage mount exposed under a unique prefix.
///
/// The backend payload is a sum type, so the kind and the populated
/// sub-configuration can never disagree once a `RootConfig` exists.
#[derive(Debug, Clone, PartialEq, Validate, Serialize, Deserialize)]
#[serde(try_from = "RawRootConfig", into = "RawRootConfig")]
pub struct RootConfig {
    #[validate(length(min = 1, max = 128), custom(function = "validate_prefix"))]
    pub prefix: String,
    pub name: String,
    pub description: String,
    pub disabled: bool,
    pub backend: RootBackend
}

impl RootConfig {
    /// Known kind of this root, `None` for an unrecognised `type`.
    pub fn kind(&self) -> Option<RootKind> {
        self.backend.kind()
    }

    /// The `type` string as it appears on disk.
    pub fn kind_name(&self) -> &str {
        self.backend.kind_name()
    }

    /// Validate both the root's own fields and its backend payload.
    pub fn validate_all(&self) -> Result<(), ValidationErrors> {
        self.validate()?;
        match &self.backend {
            RootBackend::Disk(disk) => disk.validate(),
            RootBackend::Git(git) => git.validate(),
            RootBackend::S3(s3) => s3.validate(),
            RootBackend::Gcs(gcs) => gcs.validate(),
            RootBackend::Sql(_) | RootBackend::Unknown { .. } => Ok(())
        }
    }
}

fn validate_prefix(value: &str) -> Result<(), ValidationError> {
    if value.contains('/') || value.trim() != value {
        let mut err = ValidationError::new("prefix");
        err.message = Some("prefix must not contain '/' or surrounding whitespace".into());
        return Err(err);
    }
    Ok(())
}

/// Backend-specific configuration. Exactly one payload per root.
#[derive(Debug, Clone, PartialEq)]
pub enum RootBackend {
    Disk(DiskConfig),
    Git(GitConfig),
    Sql(SqlConfig),
    S3(S3Config),
    Gcs(GcsConfig),
    /// A `type` this build does not know. Kept so that the rest of the
    /// document still loads; the backend factory rejects it per root.
    /// `settings` holds every other field of the root verbatim so that
    /// saving the document writes them back unchanged.
    Unknown {
        kind: String,
        settings: serde_json::Map<String, serde_json::Value>
    }
}

impl RootBackend {
    /// Unrecognised backend with no extra settings.
    pub fn unknown(kind: impl Into<String>) -> Self {
        Self::Unknown {
            kind: kind.into(),
            settings: serde_json::Map::new()
        }
    }

    pub fn kind(&self) -> Option<RootKind> {
        match self {
            Self::Disk(_) => Some(RootKind::Disk),
            Self::Git(_) => Some(RootKind::Git),
            Self::Sql(_) => Some(RootKind::Sql),
            Self::S3(_) => Some(RootKind::S3),
            Self::Gcs(_) => Some(RootKind::Gcs),
            Self::Unknown { .. } => None
        }
    }

    pub fn kind_name(&self) -> &str {
        match self {
            Self::Unknown { kind, .. } => kind,
            known => known.kind().map_or("", <&'static str>::from)
        }
    }
}

/// Local filesystem root.
#[derive(Debug, Clone, Default, PartialEq, Validate, Serialize, Deserialize)]
pub struct DiskConfig {
    #[validate(length(min = 1))]
    #[serde(default)]
    pub path: String,

    /// `None` means everything under `path` is reachable.
    #[serde(
        rename = "roots",
        alias = "allowedSubroots",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub allowed_subroots: Option<BTreeSet<String>>
}

/// Git repository root, materialised into the work cache.
#[derive(Debug, Clone, Default, PartialEq, Validate, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitConfig {
    #[validate(length(min = 1))]
    #[serde(default)]
    pub remote: String,

    #[validate(length(min = 1))]
    #[serde(default)]
    pub branch: String,

    /// Subfolder within the remote that is exposed.
    #[serde(rename = "root", alias = "rootSubpath", default)]
    pub root_subpath: String,

    #[serde(default)]
    pub require_pull_request: bool,

    #[serde(default, skip_serializing_if = "SecretValue::is_empty")]
    pub access_token: SecretValue
}

/// Relational root. Organisation isolation is applied by the runtime, so
/// nothing is stored here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlConfig {}

/// S3-compatible object storage root.
#[derive(Debug, Clone, Default, PartialEq, Validate, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Config {
    #[validate(length(min = 1))]
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub access_key: SecretValue,
    #[serde(default)]
    pub secret_key: SecretValue,
    #[serde(default)]
    pub region: String
}

/// Google Cloud Storage root.
#[derive(Debug, Clone, Default, PartialEq, Validate, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcsConfig {
    #[validate(length(min = 1))]
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub credentials_file: String
}

/// A credential stored in the configuration document.
///
/// Serialised as the same plain string existing files use. A value of the
/// form `secret:<id>` is a reference that is resolved through a secret
/// provider when the root is built; anything else is the secret itself.
/// The value is zeroized on drop and never printed by `Debug`.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Reference to an external secret store entry.
    pub fn reference(id: &str) -> Self {
        Self(format!("{SECRET_REFERENCE_PREFIX}{id}"))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Secret store id when this value is a reference.
    pub fn reference_id(&self) -> Option<&str> {
        self.0.strip_prefix(SECRET_REFERENCE_PREFIX)
    }

    /// The raw stored value. For references this is `secret:<id>`.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reference_id() {
            Some(id) => write!(f, "SecretValue(ref:{id})"),
            None if self.0.is_empty() => f.write_str("SecretValue(<empty>)"),
            None => f.write_str("SecretValue(***)")
        }
    }
}

/// Wire shape of a root: a `type` tag next to optional per-kind sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawRootConfig {
    #[serde(rename = "type", alias = "kind", default)]
    kind: String,
    #[serde(default)]
    prefix: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, skip_serializing_if = "is_false")]
    disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    disk: Option<DiskConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    git: Option<GitConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sql: Option<SqlConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    s3: Option<S3Config>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gcs: Option<GcsConfig>,
    /// Fields outside the known schema.
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl RawRootConfig {
    /// Everything but the common fields, for a root of unknown type.
    /// Sections named after a known kind are kept too: they belong to the
    /// operator, not to this build.
    fn unknown_settings(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut settings = self.extra.clone();
        let known = [
            ("disk", serde_json::to_value(&self.disk)),
            ("git", serde_json::to_value(&self.git)),
            ("sql", serde_json::to_value(&self.sql)),
            ("s3", serde_json::to_value(&self.s3)),
            ("gcs", serde_json::to_value(&self.gcs))
        ];
        for (name, value) in known {
            if let Ok(value) = value
                && !value.is_null()
            {
                settings.insert(name.to_string(), value);
            }
        }
        settings
    }

    fn populated_sections(&self) -> Vec<RootKind> {
        let mut sections = Vec::new();
        if self.disk.is_some() {
            sections.push(RootKind::Disk);
        }
        if self.git.is_some() {
            sections.push(RootKind::Git);
        }
        if self.sql.is_some() {
            sections.push(RootKind::Sql);
        }
        if self.s3.is_some() {
            sections.push(RootKind::S3);
        }
        if self.gcs.is_some() {
            sections.push(RootKind::Gcs);
        }
        sections
    }
}

impl TryFrom<RawRootConfig> for RootConfig {
    type Error = String;

    fn try_from(raw: RawRootConfig) -> Result<Self, Self::Error> {
        let Ok(kind) = RootKind::from_str(&raw.kind) else {
            return Ok(Self {
                backend: RootBackend::Unknown {
                    settings: raw.unknown_settings(),
                    kind: raw.kind
                },
                prefix: raw.prefix,
                name: raw.name,
                description: raw.description,
                disabled: raw.disabled
            });
        };

        let foreign: Vec<String> = raw
            .populated_sections()
            .into_iter()
            .filter(|section| *section != kind)
            .map(|section| section.to_string())
            .collect();
        if !foreign.is_empty() {
            return Err(format!(
                "root '{}' has type '{kind}' but configures [{}]",
                raw.prefix,
                foreign.join(", ")
            ));
        }

        let missing = || format!("root '{}' of type '{kind}' is missing its '{kind}' section", raw.prefix);
        let backend = match kind {
            RootKind::Disk => RootBackend::Disk(raw.disk.clone().ok_or_else(missing)?),
            RootKind::Git => RootBackend::Git(raw.git.clone().ok_or_else(missing)?),
            RootKind::Sql => RootBackend::Sql(raw.sql.clone().unwrap_or_default()),
            RootKind::S3 => RootBackend::S3(raw.s3.clone().ok_or_else(missing)?),
            RootKind::Gcs => RootBackend::Gcs(raw.gcs.clone().ok_or_else(missing)?)
        };

        Ok(Self {
            prefix: raw.prefix,
            name: raw.name,
            description: raw.description,
            disabled: raw.disabled,
            backend
        })
    }
}

impl From<RootConfig> for RawRootConfig {
    fn from(root: RootConfig) -> Self {
        let mut raw = RawRootConfig {
            kind: root.kind_name().to_string(),
            prefix: root.prefix,
            name: root.name,
            description: root.description,
            disabled: root.disabled,
            ..Default::default()
        };
        match root.backend {
            RootBackend::Disk(disk) => raw.disk = Some(disk),
            RootBackend::Git(git) => raw.git = Some(git),
            RootBackend::Sql(sql) => raw.sql = Some(sql),
            RootBackend::S3(s3) => raw.s3 = Some(s3),
            RootBackend::Gcs(gcs) => raw.gcs = Some(gcs),
            RootBackend::Unknown { settings, .. } => raw.extra = settings
        }
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn disk_root(prefix: &str) -> RootConfig {
        RootConfig {
            prefix: prefix.to_string(),
            name: format!("{prefix} files"),
            description: String::new(),
            disabled: false,
            backend: RootBackend::Disk(DiskConfig {
                path: "/data/files".to_string(),
                allowed_subroots: None
            })
        }
    }

    #[test]
    fn test_root_kind_round_trips_lowercase() {
        assert_eq!(RootKind::S3.to_string(), "s3");
        assert_eq!(RootKind::from_str("gcs").unwrap(), RootKind::Gcs);
        assert!(RootKind::from_str("Git").is_err());
    }

    #[test]
    fn test_disk_root_wire_shape() {
        let value = serde_json::to_value(disk_root("local")).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "disk",
                "prefix": "local",
                "name": "local files",
                "description": "",
                "disk": { "path": "/data/files" }
            })
        );
    }

    #[test]
    fn test_git_root_uses_legacy_field_names() {
        let root: RootConfig = serde_json::from_value(json!({
            "type": "git",
            "prefix": "it",
            "name": "repo",
            "description": "",
            "disabled": true,
            "git": {
                "remote": "github.com/org/repo",
                "branch": "main",
                "root": "org_1/root",
                "requirePullRequest": true,
                "accessToken": "tok"
            }
        }))
        .unwrap();

        let RootBackend::Git(git) = &root.backend else {
            panic!("expected git backend");
        };
        assert_eq!(git.root_subpath, "org_1/root");
        assert!(git.require_pull_request);
        assert_eq!(git.access_token.expose(), "tok");
        assert!(root.disabled);
    }

    #[test]
    fn test_descriptive_aliases_are_accepted() {
        let root: RootConfig = serde_json::from_value(json!({
            "kind": "disk",
            "prefix": "local",
            "disk": { "path": "/srv", "allowedSubroots": ["a", "b"] }
        }))
        .unwrap();
        let RootBackend::Disk(disk) = root.backend else {
            panic!("expected disk backend");
        };
        let subroots = disk.allowed_subroots.unwrap();
        assert!(subroots.contains("a") && subroots.contains("b"));
    }

    #[test]
    fn test_unknown_kind_keeps_its_settings_on_save() {
        let wire = json!({
            "type": "ftp",
            "prefix": "legacy",
            "name": "Legacy",
            "description": "old mirror",
            "ftp": { "host": "h", "user": "u" },
            "passive": true
        });
        let root: RootConfig = serde_json::from_value(wire.clone()).unwrap();

        assert_eq!(root.kind(), None);
        assert_eq!(root.kind_name(), "ftp");
        let RootBackend::Unknown { settings, .. } = &root.backend else {
            panic!("expected unknown backend");
        };
        assert_eq!(settings["ftp"]["host"], "h");

        assert_eq!(serde_json::to_value(&root).unwrap(), wire);
    }

    #[test]
    fn test_mismatched_payload_is_rejected() {
        let result: Result<RootConfig, _> = serde_json::from_value(json!({
            "type": "git",
            "prefix": "it",
            "disk": { "path": "/srv" }
        }));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("has type 'git' but configures [disk]"), "{err}");
    }

    #[test]
    fn test_two_payloads_are_rejected() {
        let result: Result<RootConfig, _> = serde_json::from_value(json!({
            "type": "disk",
            "prefix": "x",
            "disk": { "path": "/srv" },
            "s3": { "bucket": "b" }
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_payload_is_rejected_except_for_sql() {
        let missing: Result<RootConfig, _> =
            serde_json::from_value(json!({ "type": "s3", "prefix": "x" }));
        assert!(missing.unwrap_err().to_string().contains("missing its 's3' section"));

        let sql: RootConfig = serde_json::from_value(json!({ "type": "sql", "prefix": "db" })).unwrap();
        assert_eq!(sql.backend, RootBackend::Sql(SqlConfig {}));
    }

    #[test]
    fn test_unknown_kind_is_kept() {
        let root: RootConfig =
            serde_json::from_value(json!({ "type": "unknown", "prefix": "u", "name": "U" })).unwrap();
        assert_eq!(root.kind(), None);
        assert_eq!(root.kind_name(), "unknown");

        let back = serde_json::to_value(&root).unwrap();
        assert_eq!(back["type"], "unknown");
    }

    #[test]
    fn test_global_config_legacy_names() {
        let doc: GlobalStorageConfig = serde_json::from_value(json!({
            "allowUnsanitizedSvgUpload": true,
            "addDevEnv": true,
            "roots": []
        }))
        .unwrap();
        assert!(doc.allow_unsanitized_upload);
        assert!(doc.add_dev_environment);

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["allowUnsanitizedSvgUpload"], true);
        assert_eq!(value["addDevEnv"], true);
    }

    #[test]
    fn test_enabled_roots_skips_disabled() {
        let mut disabled = disk_root("off");
        disabled.disabled = true;
        let doc = GlobalStorageConfig {
            roots: vec![disk_root("on"), disabled],
            ..Default::default()
        };
        let prefixes: Vec<_> = doc.enabled_roots().map(|r| r.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["on"]);
        assert!(doc.root("off").is_some());
    }

    #[test]
    fn test_secret_value_debug_is_redacted() {
        let secret = SecretValue::new("hunter2");
        assert_eq!(format!("{secret:?}"), "SecretValue(***)");
        assert!(!format!("{:?}", GitConfig {
            access_token: secret,
            ..Default::default()
        })
        .contains("hunter2"));
    }

    #[test]
    fn test_secret_value_reference() {
        let secret = SecretValue::reference("git/token");
        assert_eq!(secret.reference_id(), Some("git/token"));
        assert_eq!(secret.expose(), "secret:git/token");
        assert_eq!(SecretValue::new("plain").reference_id(), None);
    }

    #[test]
    fn test_validate_all_checks_payload() {
        let mut root = disk_root("local");
        assert!(root.validate_all().is_ok());

        root.backend = RootBackend::Disk(DiskConfig::default());
        assert!(root.validate_all().is_err());

        let mut bad_prefix = disk_root("a/b");
        assert!(bad_prefix.validate_all().is_err());
        bad_prefix.prefix = String::new();
        assert!(bad_prefix.validate_all().is_err());
    }
}
