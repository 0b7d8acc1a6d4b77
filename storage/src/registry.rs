//! # Storage Root Registry
//!
//! Maps prefixes to live runtimes. Each (re)load builds a complete new
//! generation off to the side and swaps it in atomically; readers keep
//! whatever generation they already hold, so in-flight operations finish
//! against the runtime they started with.

use crate::factory::{BuildContext, build_runtime};
use crate::runtime::{ChangeOutcome, Entry, EntryInfo, StorageRuntime, WriteMode, WriteRequest};
use config::{ConfigError, GlobalStorageConfig};
use errors::{ErrorCategory, RegistryError, StorageRootError};
use observability::{NoopObserver, OperationObserver, StateChangeTimer};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};

/// Lifecycle state of one configured root.
#[derive(Debug, Clone)]
pub enum RootState {
    Ready,
    Disabled,
    Failed(Arc<StorageRootError>)
}

/// Administrative view of one configured root.
#[derive(Debug, Clone)]
pub struct RootStatus {
    pub prefix: String,
    pub name: String,
    pub description: String,
    pub kind: String,
    pub state: RootState,
    pub write_mode: Option<WriteMode>,
    pub location: Option<String>
}

impl RootStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self.state, RootState::Ready)
    }

    pub fn error(&self) -> Option<&StorageRootError> {
        match &self.state {
            RootState::Failed(e) => Some(e.as_ref()),
            _ => None
        }
    }

    pub fn report(&self) -> RootReport {
        RootReport {
            prefix: self.prefix.clone(),
            name: self.name.clone(),
            kind: self.kind.clone(),
            state: match self.state {
                RootState::Ready => "ready",
                RootState::Disabled => "disabled",
                RootState::Failed(_) => "failed"
            },
            write_mode: self.write_mode,
            location: self.location.clone(),
            error_category: self.error().map(StorageRootError::category),
            error: self.error().map(ToString::to_string)
        }
    }
}

/// Serializable form of [`RootStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RootReport {
    pub prefix: String,
    pub name: String,
    pub kind: String,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_mode: Option<WriteMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>
}

/// Counts from one build or reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    pub generation: u64,
    pub ready: usize,
    pub disabled: usize,
    pub failed: usize
}

struct Generation {
    id: u64,
    runtimes: HashMap<String, Arc<dyn StorageRuntime>>,
    statuses: Vec<RootStatus>
}

impl Generation {
    fn empty() -> Self {
        Self {
            id: 0,
            runtimes: HashMap::new(),
            statuses: Vec::new()
        }
    }

    fn status(&self, prefix: &str) -> Option<&RootStatus> {
        self.statuses.iter().find(|s| s.prefix == prefix)
    }

    fn summary(&self) -> ReloadSummary {
        let count = |f: fn(&RootState) -> bool| self.statuses.iter().filter(|s| f(&s.state)).count();
        ReloadSummary {
            generation: self.id,
            ready: count(|s| matches!(s, RootState::Ready)),
            disabled: count(|s| matches!(s, RootState::Disabled)),
            failed: count(|s| matches!(s, RootState::Failed(_)))
        }
    }
}

/// Registry of storage roots keyed by prefix.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Owns every live runtime and hands out shared handles by prefix.
///
/// ## Guarantees
/// - Disabled roots are never constructed and never returned by [`get`](Self::get).
/// - One root failing to build never prevents the others from loading.
/// - Duplicate prefixes among enabled roots reject the whole document and
///   leave the current generation in place.
/// - Lookups never observe a partially built generation.
///
/// ## Usage
/// ```rust,no_run
/// use std::sync::Arc;
/// use storage::{BuildContext, StorageRootRegistry};
///
/// # async fn example(doc: config::GlobalStorageConfig) -> Result<(), Box<dyn std::error::Error>> {
/// let registry = StorageRootRegistry::build(
///     &doc,
///     BuildContext::new("/var/cache/stowage"),
///     Arc::new(observability::MetricsObserver)
/// )
/// .await?;
/// if let Some(runtime) = registry.get("local") {
///     println!("{}", runtime.location());
/// }
/// # Ok(())
/// # }
/// ```
pub struct StorageRootRegistry {
    current: RwLock<Arc<Generation>>,
    reload_lock: tokio::sync::Mutex<()>,
    context: BuildContext,
    observer: Arc<dyn OperationObserver>
}

impl StorageRootRegistry {
    /// An empty registry. Call [`reload`](Self::reload) to populate it.
    pub fn new(context: BuildContext, observer: Arc<dyn OperationObserver>) -> Self {
        Self {
            current: RwLock::new(Arc::new(Generation::empty())),
            reload_lock: tokio::sync::Mutex::new(()),
            context,
            observer
        }
    }

    pub async fn build(
        config: &GlobalStorageConfig,
        context: BuildContext,
        observer: Arc<dyn OperationObserver>
    ) -> Result<Self, ConfigError> {
        let registry = Self::new(context, observer);
        registry.reload(config).await?;
        Ok(registry)
    }

    /// Registry without metrics, mostly for tests and tooling.
    pub async fn build_unobserved(
        config: &GlobalStorageConfig,
        context: BuildContext
    ) -> Result<Self, ConfigError> {
        Self::build(config, context, Arc::new(NoopObserver)).await
    }

    fn snapshot(&self) -> Arc<Generation> {
        Arc::clone(&self.current.read())
    }

    /// Runtime for `prefix`, if that root is enabled and built.
    pub fn get(&self, prefix: &str) -> Option<Arc<dyn StorageRuntime>> {
        self.snapshot().runtimes.get(prefix).cloned()
    }

    /// Like [`get`](Self::get) but explains why a prefix is unavailable.
    pub fn runtime(&self, prefix: &str) -> Result<Arc<dyn StorageRuntime>, RegistryError> {
        let generation = self.snapshot();
        if let Some(runtime) = generation.runtimes.get(prefix) {
            return Ok(Arc::clone(runtime));
        }
        match generation.status(prefix).map(|s| &s.state) {
            Some(RootState::Failed(e)) => Err(RegistryError::RootUnavailable {
                prefix: prefix.to_string(),
                reason: e.to_string()
            }),
            Some(RootState::Disabled) => Err(RegistryError::RootUnavailable {
                prefix: prefix.to_string(),
                reason: "root is disabled".to_string()
            }),
            _ => Err(RegistryError::RootNotFound {
                prefix: prefix.to_string()
            })
        }
    }

    /// Prefixes of every ready root, in configuration order.
    pub fn prefixes(&self) -> Vec<String> {
        self.snapshot()
            .statuses
            .iter()
            .filter(|s| s.is_ready())
            .map(|s| s.prefix.clone())
            .collect()
    }

    /// Status of every configured root, in configuration order.
    pub fn statuses(&self) -> Vec<RootStatus> {
        self.snapshot().statuses.clone()
    }

    /// Construction error recorded for `prefix`, if any.
    pub fn error_for(&self, prefix: &str) -> Option<Arc<StorageRootError>> {
        match &self.snapshot().status(prefix)?.state {
            RootState::Failed(e) => Some(Arc::clone(e)),
            _ => None
        }
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().id
    }

    /// Rebuild from `config` and swap the result in.
    ///
    /// Reloads are serialised; lookups keep being served from the previous
    /// generation until the new one is complete.
    pub async fn reload(&self, config: &GlobalStorageConfig) -> Result<ReloadSummary, ConfigError> {
        let _guard = self.reload_lock.lock().await;

        if let Err(e) = config.validate_roots() {
            error!("Rejected storage configuration: {}", e);
            return Err(e);
        }

        let id = self.generation() + 1;
        let generation = build_generation(config, &self.context, id).await;
        let summary = generation.summary();

        let previous = std::mem::replace(&mut *self.current.write(), Arc::new(generation));
        info!(
            generation = summary.generation,
            ready = summary.ready,
            disabled = summary.disabled,
            failed = summary.failed,
            "Storage roots loaded"
        );
        drop(previous);
        Ok(summary)
    }

    pub async fn list(&self, prefix: &str, path: &str) -> Result<Vec<EntryInfo>, RegistryError> {
        Ok(self.runtime(prefix)?.list(path).await?)
    }

    pub async fn read(&self, prefix: &str, path: &str) -> Result<Option<Entry>, RegistryError> {
        Ok(self.runtime(prefix)?.read(path).await?)
    }

    /// Write through the root at `prefix`, recording a state change.
    pub async fn write(
        &self,
        prefix: &str,
        request: WriteRequest
    ) -> Result<ChangeOutcome, RegistryError> {
        let runtime = self.runtime(prefix)?;
        let timer = StateChangeTimer::start(request.needs_image);
        let result = runtime.write(request).await;
        timer.finish(self.observer.as_ref());
        Ok(result?)
    }

    /// Delete through the root at `prefix`, recording a state change.
    pub async fn delete(&self, prefix: &str, path: &str) -> Result<ChangeOutcome, RegistryError> {
        let runtime = self.runtime(prefix)?;
        let timer = StateChangeTimer::start(false);
        let result = runtime.delete(path).await;
        timer.finish(self.observer.as_ref());
        Ok(result?)
    }
}

async fn build_generation(config: &GlobalStorageConfig, ctx: &BuildContext, id: u64) -> Generation {
    let mut runtimes = HashMap::new();
    let mut statuses = Vec::with_capacity(config.roots.len());

    for root in &config.roots {
        let mut status = RootStatus {
            prefix: root.prefix.clone(),
            name: root.name.clone(),
            description: root.description.clone(),
            kind: root.kind_name().to_string(),
            state: RootState::Disabled,
            write_mode: None,
            location: None
        };

        if root.disabled {
            info!(prefix = %root.prefix, "Skipping disabled storage root");
            statuses.push(status);
            continue;
        }

        let span = info_span!("build_root", prefix = %root.prefix, kind = %root.kind_name());
        match build_runtime(root, ctx).instrument(span).await {
            Ok(runtime) => {
                status.state = RootState::Ready;
                status.write_mode = Some(runtime.write_mode());
                status.location = Some(runtime.location());
                runtimes.insert(root.prefix.clone(), runtime);
            }
            Err(e) => {
                warn!(prefix = %root.prefix, "Storage root failed to load: {}", e);
                status.state = RootState::Failed(Arc::new(e));
            }
        }
        statuses.push(status);
    }

    Generation {
        id,
        runtimes,
        statuses
    }
}
