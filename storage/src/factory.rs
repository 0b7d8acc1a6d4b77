//! # Backend Factory
//!
//! Turns one [`RootConfig`] into a live [`StorageRuntime`].

use crate::disk::DiskStorage;
use crate::gcs::GcsStorage;
use crate::git::{CheckoutLocks, GitStorage};
use crate::runtime::StorageRuntime;
use crate::s3::S3Storage;
use crate::secrets::{EnvSecretProvider, SecretProvider, resolve_secret};
use crate::sql::SqlStorage;
use config::{RootBackend, RootConfig, SecretValue, StorageSettings};
use errors::{RuntimeError, StorageRootError};
use sqlx::{Pool, Sqlite};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zeroize::Zeroizing;

/// Everything a backend may need besides its own configuration.
#[derive(Clone)]
pub struct BuildContext {
    /// Parent directory for per-root scratch space (git checkouts).
    pub work_cache_dir: PathBuf,
    pub secrets: Arc<dyn SecretProvider>,
    /// Host database shared by every `sql` root. `sql` roots fail to build
    /// when no pool is configured.
    pub sql_pool: Option<Pool<Sqlite>>,
    pub org_id: i64,
    /// Upper bound for constructing a single root.
    pub timeout: Duration,
    /// Cancelling aborts every construction still in progress.
    pub cancel: CancellationToken,
    /// Shared across reloads so successive generations of a git root never
    /// touch the same checkout at once.
    pub checkout_locks: CheckoutLocks
}

impl BuildContext {
    pub fn new(work_cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_cache_dir: work_cache_dir.into(),
            secrets: Arc::new(EnvSecretProvider),
            sql_pool: None,
            org_id: 1,
            timeout: Duration::from_secs(120),
            cancel: CancellationToken::new(),
            checkout_locks: CheckoutLocks::default()
        }
    }

    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self::new(&settings.work_cache_dir)
            .with_org_id(settings.org_id)
            .with_timeout(settings.build_timeout)
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretProvider>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_sql_pool(mut self, pool: Pool<Sqlite>) -> Self {
        self.sql_pool = Some(pool);
        self
    }

    pub fn with_org_id(mut self, org_id: i64) -> Self {
        self.org_id = org_id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl std::fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("work_cache_dir", &self.work_cache_dir)
            .field("sql_pool", &self.sql_pool.is_some())
            .field("org_id", &self.org_id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Build the runtime for one root.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Dispatches on the root's backend kind. Unknown kinds fail with
/// [`StorageRootError::UnsupportedKind`] naming the kind.
///
/// ## Failure isolation
/// Every failure is returned as a value scoped to this root. Construction
/// that exceeds [`BuildContext::timeout`] or observes cancellation yields
/// [`StorageRootError::ConstructionAborted`].
///
/// ## Usage
/// ```rust,no_run
/// use storage::{BuildContext, build_runtime};
///
/// # async fn example(root: config::RootConfig) -> Result<(), errors::StorageRootError> {
/// let ctx = BuildContext::new("/var/cache/stowage");
/// let runtime = build_runtime(&root, &ctx).await?;
/// println!("{} at {}", runtime.kind(), runtime.location());
/// # Ok(())
/// # }
/// ```
pub async fn build_runtime(
    root: &RootConfig,
    ctx: &BuildContext
) -> Result<Arc<dyn StorageRuntime>, StorageRootError> {
    if let RootBackend::Unknown { kind, .. } = &root.backend {
        return Err(StorageRootError::UnsupportedKind { kind: kind.clone() });
    }

    root.validate_all()
        .map_err(|e| construction(root, format!("invalid configuration: {e}")))?;
    debug!(prefix = %root.prefix, kind = %root.kind_name(), "Building storage root");

    match &root.backend {
        RootBackend::Disk(cfg) => Ok(Arc::new(DiskStorage::new(cfg))),
        RootBackend::Git(cfg) => {
            let token = secret(root, &cfg.access_token, ctx).await?;
            let work_cache_dir = ctx.work_cache_dir.clone();
            let locks = ctx.checkout_locks.clone();
            let runtime = guarded(root, ctx, |abort| async move {
                GitStorage::open(&root.prefix, cfg, token, &work_cache_dir, &locks, abort).await
            })
            .await?;
            Ok(Arc::new(runtime))
        }
        RootBackend::Sql(_) => {
            let Some(pool) = ctx.sql_pool.clone() else {
                return Err(construction(root, "no SQL database is configured".to_string()));
            };
            let org_id = ctx.org_id;
            let runtime = guarded(root, ctx, |_| SqlStorage::new(pool, org_id)).await?;
            Ok(Arc::new(runtime))
        }
        RootBackend::S3(cfg) => {
            let access_key = secret(root, &cfg.access_key, ctx).await?;
            let secret_key = secret(root, &cfg.secret_key, ctx).await?;
            let runtime =
                guarded(root, ctx, |_| S3Storage::connect(cfg, access_key, secret_key)).await?;
            Ok(Arc::new(runtime))
        }
        RootBackend::Gcs(cfg) => {
            let timeout = ctx.timeout;
            let runtime = guarded(root, ctx, |_| async move { GcsStorage::connect(cfg, timeout) })
                .await?;
            Ok(Arc::new(runtime))
        }
        RootBackend::Unknown { kind, .. } => Err(StorageRootError::UnsupportedKind { kind: kind.clone() })
    }
}

fn construction(root: &RootConfig, reason: String) -> StorageRootError {
    StorageRootError::Construction {
        prefix: root.prefix.clone(),
        kind: root.kind_name().to_string(),
        reason
    }
}

async fn secret(
    root: &RootConfig,
    value: &SecretValue,
    ctx: &BuildContext
) -> Result<Option<Zeroizing<String>>, StorageRootError> {
    resolve_secret(value, ctx.secrets.as_ref())
        .await
        .map_err(|e| StorageRootError::SecretResolution {
            prefix: root.prefix.clone(),
            secret_id: value.reference_id().unwrap_or_default().to_string(),
            reason: e.to_string()
        })
}

/// Run a backend constructor under the context's timeout and cancellation.
///
/// The constructor receives a child token that is cancelled when the
/// attempt is abandoned, so blocking work can stop early.
async fn guarded<T, F, Fut>(
    root: &RootConfig,
    ctx: &BuildContext,
    make: F
) -> Result<T, StorageRootError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, RuntimeError>>
{
    let abort = ctx.cancel.child_token();
    let attempt = tokio::time::timeout(ctx.timeout, make(abort.clone()));

    let outcome = tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => Err("cancelled".to_string()),
        result = attempt => result.map_err(|_| format!("timed out after {:?}", ctx.timeout))
    };

    match outcome {
        Ok(Ok(runtime)) => Ok(runtime),
        Ok(Err(e)) => Err(construction(root, e.to_string())),
        Err(reason) => {
            abort.cancel();
            Err(StorageRootError::ConstructionAborted {
                prefix: root.prefix.clone(),
                reason
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::LocalSecretProvider;
    use config::{DiskConfig, GitConfig, RootKind, S3Config, SqlConfig};
    use errors::ErrorCategory;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn root(prefix: &str, backend: RootBackend) -> RootConfig {
        RootConfig {
            prefix: prefix.to_string(),
            name: prefix.to_string(),
            description: String::new(),
            disabled: false,
            backend
        }
    }

    #[tokio::test]
    async fn test_disk_root_builds_without_io() {
        let ctx = BuildContext::new("/tmp/unused");
        let runtime = build_runtime(
            &root(
                "local",
                RootBackend::Disk(DiskConfig {
                    path: "/data/files".to_string(),
                    allowed_subroots: None
                })
            ),
            &ctx
        )
        .await
        .unwrap();
        assert_eq!(runtime.kind(), RootKind::Disk);
        assert_eq!(runtime.location(), "/data/files");
    }

    #[tokio::test]
    async fn test_unknown_kind_is_rejected_by_name() {
        let ctx = BuildContext::new("/tmp/unused");
        let err = build_runtime(
            &root(
                "ftp",
                RootBackend::unknown("ftp")
            ),
            &ctx
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, StorageRootError::UnsupportedKind { ref kind } if kind == "ftp"));
        assert_eq!(err.to_string(), "unsupported storage type: ftp");
    }

    #[tokio::test]
    async fn test_invalid_prefix_is_construction_error() {
        let ctx = BuildContext::new("/tmp/unused");
        let err = build_runtime(
            &root("a/b", RootBackend::Disk(DiskConfig::default())),
            &ctx
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.category(), ErrorCategory::Construction);
    }

    #[tokio::test]
    async fn test_sql_root_requires_pool() {
        let ctx = BuildContext::new("/tmp/unused");
        let sql_root = root("db", RootBackend::Sql(SqlConfig {}));
        let err = build_runtime(&sql_root, &ctx).await.err().unwrap();
        assert!(err.to_string().contains("no SQL database"));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let runtime = build_runtime(&sql_root, &ctx.clone().with_sql_pool(pool))
            .await
            .unwrap();
        assert_eq!(runtime.kind(), RootKind::Sql);
    }

    #[tokio::test]
    async fn test_missing_secret_reference_is_reported() {
        let ctx = BuildContext::new("/tmp/unused")
            .with_secrets(Arc::new(LocalSecretProvider::new(HashMap::new())));
        let s3_root = root(
            "bucket",
            RootBackend::S3(S3Config {
                bucket: "b".to_string(),
                access_key: SecretValue::reference("s3-access"),
                secret_key: SecretValue::reference("s3-secret"),
                ..Default::default()
            })
        );
        let err = build_runtime(&s3_root, &ctx).await.err().unwrap();
        assert!(matches!(
            err,
            StorageRootError::SecretResolution { ref secret_id, .. } if secret_id == "s3-access"
        ));
    }

    #[tokio::test]
    async fn test_cancelled_context_aborts_construction() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = BuildContext::new(dir.path()).with_cancellation(cancel);
        let git_root = root(
            "it",
            RootBackend::Git(GitConfig {
                remote: dir.path().join("nowhere.git").display().to_string(),
                branch: "main".to_string(),
                ..Default::default()
            })
        );

        let err = build_runtime(&git_root, &ctx).await.err().unwrap();
        assert_eq!(err.category(), ErrorCategory::Aborted);
    }

    #[tokio::test]
    async fn test_slow_construction_times_out() {
        let ctx = BuildContext::new("/tmp/unused").with_timeout(Duration::from_millis(20));
        let slow_root = root("slow", RootBackend::Sql(SqlConfig {}));
        let result: Result<(), _> = guarded(&slow_root, &ctx, |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        let err = result.err().unwrap();
        assert!(matches!(err, StorageRootError::ConstructionAborted { .. }));
        assert!(err.to_string().contains("timed out"));
    }
}
