/// Secret resolution for root credentials.
///
/// Root documents may carry credentials inline or as `secret:<id>`
/// references. References are resolved through a [`SecretProvider`] when a
/// root is built, so tokens and keys can live in a secret manager instead of
/// `storage.json`.
use async_trait::async_trait;
use config::SecretValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use zeroize::Zeroizing;

pub const ENV_SECRET_PREFIX: &str = "STOWAGE_SECRET_";

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Format error: {0}")]
    FormatError(String),

    #[error("Retrieval failed: {0}")]
    RetrievalFailed(String)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider")]
pub enum SecretProviderConfig {
    #[serde(rename = "env")]
    Env,
    #[serde(rename = "vault")]
    Vault {
        address: String,
        token: String,
        #[serde(default = "default_mount_path")]
        mount_path: String
    },
    #[serde(rename = "local")]
    Local { secrets: HashMap<String, String> }
}

fn default_mount_path() -> String {
    "secret".to_string()
}

impl SecretProviderConfig {
    pub fn into_provider(self) -> Box<dyn SecretProvider> {
        match self {
            Self::Env => Box::new(EnvSecretProvider),
            Self::Vault {
                address,
                token,
                mount_path
            } => Box::new(VaultSecretProvider::new(address, token).with_mount_path(mount_path)),
            Self::Local { secrets } => Box::new(LocalSecretProvider::new(secrets))
        }
    }
}

#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Retrieve a secret value by its identifier
    async fn get_secret(&self, secret_id: &str) -> Result<String, SecretError>;

    /// Health check for the provider
    async fn is_available(&self) -> bool;
}

/// Resolve a configured credential.
///
/// Empty values resolve to `None`. Inline values are returned as-is and
/// `secret:<id>` references are looked up through `provider`.
pub async fn resolve_secret(
    value: &SecretValue,
    provider: &dyn SecretProvider
) -> Result<Option<Zeroizing<String>>, SecretError> {
    if value.is_empty() {
        return Ok(None);
    }
    match value.reference_id() {
        Some(id) => provider.get_secret(id).await.map(|s| Some(Zeroizing::new(s))),
        None => Ok(Some(Zeroizing::new(value.expose().to_string())))
    }
}

/// Local development secret provider
pub struct LocalSecretProvider {
    secrets: HashMap<String, String>
}

impl LocalSecretProvider {
    pub fn new(secrets: HashMap<String, String>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl SecretProvider for LocalSecretProvider {
    async fn get_secret(&self, secret_id: &str) -> Result<String, SecretError> {
        self.secrets
            .get(secret_id)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(secret_id.to_string()))
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// Reads `STOWAGE_SECRET_<ID>`, with the id upper-cased and every
/// non-alphanumeric character replaced by `_`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretProvider;

impl EnvSecretProvider {
    pub fn variable_name(secret_id: &str) -> String {
        let suffix: String = secret_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{ENV_SECRET_PREFIX}{suffix}")
    }
}

#[async_trait]
impl SecretProvider for EnvSecretProvider {
    async fn get_secret(&self, secret_id: &str) -> Result<String, SecretError> {
        std::env::var(Self::variable_name(secret_id))
            .map_err(|_| SecretError::NotFound(secret_id.to_string()))
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// HashiCorp Vault secret provider (KV v2).
///
/// Secret ids take the form `path` or `path#field`; the field defaults to
/// `value`.
pub struct VaultSecretProvider {
    client: reqwest::Client,
    address: String,
    token: String,
    mount_path: String
}

impl VaultSecretProvider {
    pub fn new(address: String, token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            address: address.trim_end_matches('/').to_string(),
            token,
            mount_path: default_mount_path()
        }
    }

    pub fn with_mount_path(mut self, mount_path: String) -> Self {
        self.mount_path = mount_path.trim_matches('/').to_string();
        self
    }
}

#[async_trait]
impl SecretProvider for VaultSecretProvider {
    async fn get_secret(&self, secret_id: &str) -> Result<String, SecretError> {
        let (path, field) = secret_id.split_once('#').unwrap_or((secret_id, "value"));
        let url = format!("{}/v1/{}/data/{}", self.address, self.mount_path, path);
        let response = self
            .client
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|e| SecretError::ConnectionFailed(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SecretError::NotFound(secret_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(SecretError::RetrievalFailed(format!(
                "Vault returned error: {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| SecretError::FormatError(e.to_string()))?;
        body["data"]["data"][field]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                SecretError::FormatError(format!("Field '{field}' not found in Vault secret"))
            })
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/v1/sys/health", self.address);
        self.client
            .get(&url)
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }
}
