//! Storage gateway trait
//!
//! All storage backends implement [`StorageGateway`]. "Not found" is a typed
//! variant distinct from transient backend failures so callers can branch on
//! it without string matching: the transcode worker treats a missing source
//! object as "defer", not "fail".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::Duration;
use thiserror::Error;

/// A `(bucket, key)` pair addressing one object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl Display for ObjectLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {location}")]
    NotFound { location: ObjectLocation },

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("delete failed: {0}")]
    DeleteFailed(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("storage backend error: {0}")]
    BackendError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Options for presigned upload URL issuance.
#[derive(Debug, Clone, Default)]
pub struct PresignUploadOptions {
    /// Allow overwriting an existing object.
    pub upsert: bool,
    /// Cache-Control max-age hint recorded with the object.
    pub cache_ttl: Option<Duration>,
}

/// Abstraction over the object-storage service.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Presigned GET URL for an existing object. Returns
    /// [`StorageError::NotFound`] when the object is not (yet) visible.
    async fn presign_download(
        &self,
        location: &ObjectLocation,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Presigned PUT URL for a direct client upload.
    async fn presign_upload(
        &self,
        location: &ObjectLocation,
        content_type: &str,
        options: &PresignUploadOptions,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Download an object's bytes. `NotFound` when absent.
    async fn download(&self, location: &ObjectLocation) -> StorageResult<Vec<u8>>;

    /// Upload bytes to an exact location (worker-side derivative writes).
    async fn upload(
        &self,
        location: &ObjectLocation,
        data: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<()>;

    /// Check existence of every location in one round. The reconciler relies
    /// on this to audit thousands of candidates without per-row requests.
    async fn exists_batch(
        &self,
        locations: &[ObjectLocation],
    ) -> StorageResult<HashMap<ObjectLocation, bool>>;

    /// Delete an object. Returns `false` when it did not exist.
    async fn delete(&self, location: &ObjectLocation) -> StorageResult<bool>;
}
