pub mod files;
pub mod init;
pub mod roots;
pub mod validate;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::{Environment, StorageSettings, load_settings_from_env, settings::ENV_WORK_CACHE_DIR};
use observability::MetricsObserver;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::PathBuf;
use std::sync::Arc;
use storage::{BuildContext, SecretProvider, SecretProviderConfig, StorageService};

#[derive(Parser)]
#[command(
    name = "stowage",
    author,
    version,
    about = "Stowage - pluggable storage roots",
    long_about = "Inspect and operate the storage roots configured in storage.json.\n\nEach \
                  enabled root is mounted under its prefix; roots that fail to load are \
                  reported without affecting the others."
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    #[arg(long, global = true, help = "Directory holding storage.json (default: $STOWAGE_DATA_DIR or ./data)")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, global = true, help = "Run with production semantics (defaults are never written)")]
    pub production: bool,

    #[arg(
        long,
        global = true,
        env = "STOWAGE_SQL_URL",
        help = "Database used by sql roots (default: sqlite file in the data directory)"
    )]
    pub sql_url: Option<String>,

    #[arg(
        long,
        global = true,
        env = "STOWAGE_SECRETS_CONFIG",
        help = "JSON file selecting the provider for secret:<id> credentials (default: STOWAGE_SECRET_<ID> env vars)"
    )]
    pub secrets: Option<PathBuf>
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Create storage.json with the example root if it does not exist")]
    Init(init::InitArgs),

    #[command(about = "List configured roots and their load state")]
    Roots(roots::RootsArgs),

    #[command(about = "Validate storage.json without connecting to any backend")]
    Validate(validate::ValidateArgs),

    #[command(about = "List entries under a root")]
    Ls(files::LsArgs),

    #[command(about = "Print a file from a root")]
    Cat(files::CatArgs),

    #[command(about = "Write a file to a root")]
    Put(files::PutArgs),

    #[command(about = "Delete a file from a root")]
    Rm(files::RmArgs)
}

/// Environment settings with command line overrides applied.
pub fn settings(global: &GlobalArgs) -> Result<StorageSettings> {
    let mut settings = load_settings_from_env()?;
    if let Some(dir) = &global.data_dir {
        if std::env::var_os(ENV_WORK_CACHE_DIR).is_none() {
            settings.work_cache_dir = dir.join("storage-cache");
        }
        settings.data_dir = dir.clone();
    }
    if global.production {
        settings.environment = Environment::Production;
    }
    Ok(settings)
}

/// Load the document and build every enabled root.
pub async fn open_service(global: &GlobalArgs) -> Result<StorageService> {
    let settings = settings(global)?;
    let sql_url = global.sql_url.clone().unwrap_or_else(|| {
        format!(
            "sqlite://{}?mode=rwc",
            settings.data_dir.join("stowage.db").display()
        )
    });
    // Nothing connects until a sql root is actually built.
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_lazy(&sql_url)
        .with_context(|| format!("invalid SQL url {sql_url}"))?;

    let mut context = BuildContext::from_settings(&settings).with_sql_pool(pool);
    if let Some(path) = &global.secrets {
        context = context.with_secrets(secret_provider(path).await?);
    }
    let service = StorageService::open(&settings, context, Arc::new(MetricsObserver::new()))
        .await
        .with_context(|| format!("failed to load storage roots from {}", settings.data_dir.display()))?;
    Ok(service)
}

/// Build the provider described by a `{"provider": "env" | "vault" | "local", ...}` file.
async fn secret_provider(path: &std::path::Path) -> Result<Arc<dyn SecretProvider>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read secret provider config {}", path.display()))?;
    let config: SecretProviderConfig = serde_json::from_str(&raw)
        .with_context(|| format!("invalid secret provider config {}", path.display()))?;

    let provider: Arc<dyn SecretProvider> = Arc::from(config.into_provider());
    if !provider.is_available().await {
        tracing::warn!(
            "Secret provider from {} is not reachable; roots using secret references will fail",
            path.display()
        );
    }
    Ok(provider)
}
