//! Attachment blob storage. Reports only ever hold the opaque key returned
//! here; which backend holds the bytes is a deployment choice.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{AppConfig, S3Config, StorageBackend};

#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("not_found")]
    NotFound,
    #[error("other: {0}")]
    Other(String),
}

#[derive(Debug, Clone)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`. Keys are content addressed, so writing an
    /// existing key is a no-op success.
    async fn put(&self, key: &str, content_type: &str, bytes: &[u8]) -> Result<(), BlobStoreError>;
    async fn get(&self, key: &str) -> Result<Blob, BlobStoreError>;
}

/// Keys look like `<64 hex chars>.<ext>`; anything else never touches a backend.
pub fn is_valid_key(key: &str) -> bool {
    let Some((hash, ext)) = key.split_once('.') else { return false };
    hash.len() == 64
        && hash.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        && !ext.is_empty()
        && ext.len() <= 8
        && ext.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

fn sniff(bytes: &[u8]) -> String {
    infer::get(bytes)
        .map(|t| t.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".into())
}

// ---------------- Local disk ----------------
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // fan out on the first two hash characters
        self.root.join(&key[0..2]).join(key)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, _content_type: &str, bytes: &[u8]) -> Result<(), BlobStoreError> {
        if !is_valid_key(key) {
            return Err(BlobStoreError::Other(format!("invalid key '{key}'")));
        }
        let path = self.path_for(key);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| BlobStoreError::Other(format!("create {}: {e}", dir.display())))?;
        }
        // write-then-rename so readers never observe a partial file
        let tmp = path.with_extension("partial");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| BlobStoreError::Other(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| BlobStoreError::Other(format!("rename {}: {e}", path.display())))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Blob, BlobStoreError> {
        if !is_valid_key(key) {
            return Err(BlobStoreError::NotFound);
        }
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => {
                let content_type = sniff(&bytes);
                Ok(Blob { bytes, content_type })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobStoreError::NotFound),
            Err(e) => Err(BlobStoreError::Other(e.to_string())),
        }
    }
}

// ---------------- S3 / MinIO ----------------
pub struct S3BlobStore {
    bucket: String,
    client: aws_sdk_s3::Client,
    prefix: String,
}

impl S3BlobStore {
    pub async fn new(cfg: &S3Config) -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;

        let bucket = cfg.bucket.clone();
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(cfg.region.clone()));
        if let Some(endpoint) = &cfg.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(access), Some(secret)) = (&cfg.access_key, &cfg.secret_key) {
            let creds = Credentials::new(access, secret, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }
        let conf = loader.load().await;
        // Path-style addressing: MinIO and most local endpoints lack wildcard DNS.
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf)
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);
        info!(%bucket, "initialised S3 attachment store");

        if let Err(e) = client.head_bucket().bucket(&bucket).send().await {
            warn!("head_bucket failed for '{bucket}' (will attempt create): {e:?}");
            let max_attempts = 5u32;
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                match client.create_bucket().bucket(&bucket).send().await {
                    Ok(_) => {
                        info!("created bucket '{bucket}' (attempt {attempt})");
                        break;
                    }
                    Err(e2) if attempt >= max_attempts => {
                        error!("create_bucket failed for '{bucket}' after {attempt} attempts: {e2:?}");
                        return Err(anyhow::anyhow!("failed to ensure bucket '{bucket}': {e2}"));
                    }
                    Err(e2) => {
                        let backoff_ms = 200 * u64::from(attempt.pow(2));
                        warn!("create_bucket attempt {attempt} failed for '{bucket}': {e2:?} (retrying in {backoff_ms}ms)");
                        tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                    }
                }
            }
        }

        Ok(Self { bucket, client, prefix: "attachments".into() })
    }

    fn object_key(&self, key: &str) -> String {
        format!("{}/{}/{}", self.prefix, &key[0..2], key)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, content_type: &str, bytes: &[u8]) -> Result<(), BlobStoreError> {
        use aws_sdk_s3::primitives::ByteStream;
        if !is_valid_key(key) {
            return Err(BlobStoreError::Other(format!("invalid key '{key}'")));
        }
        let object_key = self.object_key(key);
        if self.client.head_object().bucket(&self.bucket).key(&object_key).send().await.is_ok() {
            return Ok(());
        }
        let put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(content_type);
        if let Err(e) = put.send().await {
            error!(key = %object_key, bucket = %self.bucket, "put_object failed: {e:?}");
            let hint = if e.to_string().contains("NoSuchBucket") {
                " (bucket missing or not yet propagated)"
            } else if e.to_string().contains("AccessDenied") {
                " (check S3_ACCESS_KEY/S3_SECRET_KEY permissions)"
            } else {
                ""
            };
            return Err(BlobStoreError::Other(format!("{e}{hint}")));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Blob, BlobStoreError> {
        if !is_valid_key(key) {
            return Err(BlobStoreError::NotFound);
        }
        let obj = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|_| BlobStoreError::NotFound)?;
        let stored_type = obj.content_type().map(str::to_string);
        let data = obj
            .body
            .collect()
            .await
            .map_err(|e| BlobStoreError::Other(e.to_string()))?;
        let bytes = data.into_bytes().to_vec();
        let content_type = stored_type.unwrap_or_else(|| sniff(&bytes));
        Ok(Blob { bytes, content_type })
    }
}

/// Pick the backend named by configuration.
pub async fn build_blob_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn BlobStore>> {
    match cfg.storage {
        StorageBackend::Fs => {
            info!(root = %cfg.upload_dir.display(), "using local disk attachment store");
            Ok(Arc::new(FsBlobStore::new(cfg.upload_dir.clone())))
        }
        StorageBackend::S3 => Ok(Arc::new(S3BlobStore::new(&cfg.s3).await?)),
    }
}
