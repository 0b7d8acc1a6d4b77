//! Amazon S3 (and S3-compatible) bucket backend.

use crate::runtime::{
    ChangeOutcome, Entry, EntryInfo, StorageRuntime, WriteRequest, clean, clean_file
};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use config::{RootKind, S3Config};
use errors::RuntimeError;
use tracing::debug;
use zeroize::Zeroizing;

fn s3_err(e: impl std::error::Error) -> RuntimeError {
    RuntimeError::Backend {
        backend: "s3".to_string(),
        reason: DisplayErrorContext(e).to_string()
    }
}

fn to_chrono(ts: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(ts.secs(), ts.subsec_nanos())
}

/// Objects under `s3://<bucket>/<folder>/`.
pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
    folder: String
}

impl S3Storage {
    /// Build a client from the root's settings.
    ///
    /// Explicit keys take precedence; without them the default AWS
    /// credential chain applies. No request is sent here.
    pub async fn connect(
        config: &S3Config,
        access_key: Option<Zeroizing<String>>,
        secret_key: Option<Zeroizing<String>>
    ) -> Result<Self, RuntimeError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if !config.region.trim().is_empty() {
            loader = loader.region(Region::new(config.region.trim().to_string()));
        }
        match (access_key, secret_key) {
            (Some(access), Some(secret)) => {
                loader = loader.credentials_provider(Credentials::new(
                    access.as_str(),
                    secret.as_str(),
                    None,
                    None,
                    "stowage"
                ));
            }
            (None, None) => {}
            _ => {
                return Err(RuntimeError::Backend {
                    backend: "s3".to_string(),
                    reason: "accessKey and secretKey must be set together".to_string()
                });
            }
        }
        let sdk_config = loader.load().await;
        let client = aws_sdk_s3::Client::new(&sdk_config);
        Self::from_client(client, &config.bucket, &config.folder)
    }

    /// Wrap an existing client, e.g. one pointed at MinIO.
    pub fn from_client(
        client: aws_sdk_s3::Client,
        bucket: &str,
        folder: &str
    ) -> Result<Self, RuntimeError> {
        Ok(Self {
            client,
            bucket: bucket.to_string(),
            folder: clean(folder)?
        })
    }

    fn key(&self, cleaned: &str) -> String {
        utils::join_clean(&self.folder, cleaned)
    }

    fn dir_prefix(&self, cleaned: &str) -> String {
        let key = self.key(cleaned);
        if key.is_empty() { key } else { format!("{key}/") }
    }

    fn relative(&self, key: &str) -> String {
        let key = key.trim_end_matches('/');
        if self.folder.is_empty() {
            key.to_string()
        } else {
            key.strip_prefix(&self.folder)
                .unwrap_or(key)
                .trim_start_matches('/')
                .to_string()
        }
    }
}

#[async_trait]
impl StorageRuntime for S3Storage {
    fn kind(&self) -> RootKind {
        RootKind::S3
    }

    fn location(&self) -> String {
        if self.folder.is_empty() {
            format!("s3://{}", self.bucket)
        } else {
            format!("s3://{}/{}", self.bucket, self.folder)
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<EntryInfo>, RuntimeError> {
        let cleaned = clean(path)?;
        let prefix = self.dir_prefix(&cleaned);
        let mut entries = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .delimiter("/")
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(s3_err)?;

            for common in output.common_prefixes() {
                let Some(dir) = common.prefix() else { continue };
                let path = self.relative(dir);
                entries.push(EntryInfo {
                    name: path.rsplit('/').next().unwrap_or(&path).to_string(),
                    path,
                    is_dir: true,
                    size: 0,
                    modified: None
                });
            }
            for object in output.contents() {
                let Some(key) = object.key() else { continue };
                if key == prefix {
                    continue;
                }
                let path = self.relative(key);
                entries.push(EntryInfo {
                    name: path.rsplit('/').next().unwrap_or(&path).to_string(),
                    path,
                    is_dir: false,
                    size: object.size().and_then(|s| u64::try_from(s).ok()).unwrap_or(0),
                    modified: object.last_modified().and_then(to_chrono)
                });
            }

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &str) -> Result<Option<Entry>, RuntimeError> {
        let cleaned = clean_file(path)?;
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(&cleaned))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Ok(None);
            }
            Err(e) => return Err(s3_err(e))
        };

        let modified = response.last_modified().and_then(to_chrono);
        let data = response.body.collect().await.map_err(s3_err)?;
        Ok(Some(Entry {
            path: cleaned,
            body: data.into_bytes(),
            modified
        }))
    }

    async fn write(&self, request: WriteRequest) -> Result<ChangeOutcome, RuntimeError> {
        let cleaned = clean_file(&request.path)?;
        let key = self.key(&cleaned);
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(request.body.to_vec()))
            .send()
            .await
            .map_err(s3_err)?;
        debug!(bucket = %self.bucket, key = %key, "Uploaded object");

        Ok(ChangeOutcome::Committed {
            path: cleaned,
            revision: output.version_id().map(str::to_string)
        })
    }

    async fn delete(&self, path: &str) -> Result<ChangeOutcome, RuntimeError> {
        let cleaned = clean_file(path)?;
        let key = self.key(&cleaned);

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => {}
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                return Ok(ChangeOutcome::Missing { path: cleaned });
            }
            Err(e) => return Err(s3_err(e))
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(s3_err)?;

        Ok(ChangeOutcome::Committed {
            path: cleaned,
            revision: None
        })
    }
}
