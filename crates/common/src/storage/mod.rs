//! Object store abstraction
//!
//! Provides a unified interface over the uploads bucket:
//! - S3 implementation issuing presigned, write-only PUT credentials
//! - In-memory implementation for tests
//!
//! Storage keys are deterministic: `{prefix}{document_id}.{extension}`.
//! The ingestion trigger derives the document id back out of the key, so
//! both directions live here next to each other.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client as S3Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// A time-limited, write-only upload credential
#[derive(Debug, Clone)]
pub struct PresignedUpload {
    /// URL the client PUTs the file to
    pub url: String,
    /// Seconds until the credential expires
    pub expires_in_secs: u64,
}

/// Object store operations used by the services
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Issue a presigned PUT credential scoped to exactly `key`
    async fn presign_upload(
        &self,
        key: &str,
        content_type: &str,
        expires_in_secs: u64,
    ) -> Result<PresignedUpload>;

    /// Delete an object; returns whether the call was accepted
    async fn delete_object(&self, key: &str) -> Result<()>;

    /// Bucket name the credentials are scoped to
    fn bucket(&self) -> &str;
}

/// Compute the storage key for a document
pub fn storage_key(prefix: &str, id: Uuid, extension: &str) -> String {
    format!("{}{}.{}", prefix, id, extension)
}

/// Derive the document id back out of a storage key.
///
/// Returns `None` for keys outside the expected prefix or with a
/// malformed id segment; the bucket may receive objects we never issued
/// credentials for.
pub fn document_id_from_key(prefix: &str, key: &str) -> Option<Uuid> {
    let rest = key.strip_prefix(prefix)?;
    let stem = match rest.rsplit_once('.') {
        Some((stem, _ext)) => stem,
        None => rest,
    };
    Uuid::parse_str(stem).ok()
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Create a store from the ambient AWS configuration
    pub async fn new(bucket: String) -> Self {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = S3Client::new(&aws_config);
        Self { client, bucket }
    }

    /// Create with an existing client (custom endpoint, tests)
    pub fn with_client(client: S3Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn presign_upload(
        &self,
        key: &str,
        content_type: &str,
        expires_in_secs: u64,
    ) -> Result<PresignedUpload> {
        let presigning = PresigningConfig::expires_in(Duration::from_secs(expires_in_secs))
            .map_err(|e| AppError::CredentialIssuance {
                message: format!("Invalid presign expiry: {}", e),
            })?;

        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning)
            .await
            .map_err(|e| AppError::CredentialIssuance {
                message: format!("Failed to presign upload for '{}': {}", key, e),
            })?;

        debug!(key = %key, expires_in_secs, "Issued presigned upload URL");

        Ok(PresignedUpload {
            url: request.uri().to_string(),
            expires_in_secs,
        })
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::Upstream {
                service: "object-store".to_string(),
                message: format!("Failed to delete '{}': {}", key, e),
            })?;

        debug!(key = %key, "Deleted object");
        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// In-memory object store for tests
pub struct MemoryObjectStore {
    bucket: String,
    fail_presign: AtomicBool,
    deleted: tokio::sync::Mutex<Vec<String>>,
}

impl MemoryObjectStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            fail_presign: AtomicBool::new(false),
            deleted: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Make subsequent presign calls fail (credential-issuance outage)
    pub fn fail_presigning(&self, fail: bool) {
        self.fail_presign.store(fail, Ordering::SeqCst);
    }

    /// Keys deleted so far
    pub async fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().await.clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn presign_upload(
        &self,
        key: &str,
        _content_type: &str,
        expires_in_secs: u64,
    ) -> Result<PresignedUpload> {
        if self.fail_presign.load(Ordering::SeqCst) {
            return Err(AppError::CredentialIssuance {
                message: "object store unreachable".to_string(),
            });
        }

        Ok(PresignedUpload {
            url: format!("https://{}.example.test/{}?signature=mock", self.bucket, key),
            expires_in_secs,
        })
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.deleted.lock().await.push(key.to_string());
        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
