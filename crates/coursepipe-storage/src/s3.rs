use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{ObjectStoreExt, PutPayload, Result as ObjectResult};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::traits::{
    ObjectLocation, PresignUploadOptions, StorageError, StorageGateway, StorageResult,
};

/// How many HEAD requests `exists_batch` keeps in flight at once.
const EXISTS_CONCURRENCY: usize = 16;

/// S3 gateway spanning multiple buckets.
///
/// `object_store` clients are per-bucket, so the gateway keeps a small cache
/// of clients keyed by bucket name. Credentials come from the environment
/// (AWS_* variables), region/endpoint from configuration.
pub struct S3StorageGateway {
    region: String,
    endpoint_url: Option<String>,
    stores: RwLock<HashMap<String, Arc<AmazonS3>>>,
}

impl S3StorageGateway {
    pub fn new(region: String, endpoint_url: Option<String>) -> Self {
        Self {
            region,
            endpoint_url,
            stores: RwLock::new(HashMap::new()),
        }
    }

    fn store_for(&self, bucket: &str) -> StorageResult<Arc<AmazonS3>> {
        if let Some(store) = self.stores.read().expect("store cache poisoned").get(bucket) {
            return Ok(store.clone());
        }

        let mut builder = AmazonS3Builder::from_env()
            .with_region(self.region.clone())
            .with_bucket_name(bucket.to_string());

        if let Some(ref endpoint) = self.endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = Arc::new(
            builder
                .build()
                .map_err(|e| StorageError::ConfigError(e.to_string()))?,
        );

        self.stores
            .write()
            .expect("store cache poisoned")
            .insert(bucket.to_string(), store.clone());
        Ok(store)
    }

    async fn head_exists(&self, location: &ObjectLocation) -> StorageResult<bool> {
        let store = self.store_for(&location.bucket)?;
        let path = Path::from(location.key.clone());
        match store.head(&path).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }
}

#[async_trait]
impl StorageGateway for S3StorageGateway {
    async fn presign_download(
        &self,
        location: &ObjectLocation,
        expires_in: Duration,
    ) -> StorageResult<String> {
        if !self.head_exists(location).await? {
            return Err(StorageError::NotFound {
                location: location.clone(),
            });
        }

        let store = self.store_for(&location.bucket)?;
        let path = Path::from(location.key.clone());
        let url_result: ObjectResult<_> = store.signed_url(Method::GET, &path, expires_in).await;

        let url = url_result
            .map_err(|e| StorageError::BackendError(e.to_string()))?
            .to_string();

        Ok(url)
    }

    async fn presign_upload(
        &self,
        location: &ObjectLocation,
        _content_type: &str,
        options: &PresignUploadOptions,
        expires_in: Duration,
    ) -> StorageResult<String> {
        // S3 PUT overwrites unconditionally; without upsert the gateway has to
        // refuse up front when the object already exists.
        if !options.upsert && self.head_exists(location).await? {
            return Err(StorageError::UploadFailed(format!(
                "object already exists: {}",
                location
            )));
        }

        let store = self.store_for(&location.bucket)?;
        let path = Path::from(location.key.clone());
        let url_result: ObjectResult<_> = store.signed_url(Method::PUT, &path, expires_in).await;

        let url = url_result
            .map_err(|e| StorageError::BackendError(e.to_string()))?
            .to_string();

        Ok(url)
    }

    async fn download(&self, location: &ObjectLocation) -> StorageResult<Vec<u8>> {
        let start = std::time::Instant::now();
        let store = self.store_for(&location.bucket)?;
        let path = Path::from(location.key.clone());

        let result = store.get(&path).await.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound {
                location: location.clone(),
            },
            other => {
                tracing::error!(
                    error = %other,
                    bucket = %location.bucket,
                    key = %location.key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 download failed"
                );
                StorageError::DownloadFailed(other.to_string())
            }
        })?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;

        tracing::debug!(
            bucket = %location.bucket,
            key = %location.key,
            size_bytes = bytes.len() as u64,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 download successful"
        );

        Ok(bytes.to_vec())
    }

    async fn upload(
        &self,
        location: &ObjectLocation,
        data: Vec<u8>,
        _content_type: &str,
    ) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let store = self.store_for(&location.bucket)?;
        let path = Path::from(location.key.clone());
        let size = data.len() as u64;
        let bytes = Bytes::from(data);

        let result: ObjectResult<_> = store.put(&path, PutPayload::from(bytes)).await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %location.bucket,
                key = %location.key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 upload failed"
            );
            StorageError::UploadFailed(e.to_string())
        })?;

        tracing::info!(
            bucket = %location.bucket,
            key = %location.key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(())
    }

    async fn exists_batch(
        &self,
        locations: &[ObjectLocation],
    ) -> StorageResult<HashMap<ObjectLocation, bool>> {
        let results: HashMap<ObjectLocation, bool> = futures::stream::iter(locations.iter().cloned())
            .map(|location| async move {
                let exists = self.head_exists(&location).await?;
                Ok::<_, StorageError>((location, exists))
            })
            .buffer_unordered(EXISTS_CONCURRENCY)
            .try_collect()
            .await?;

        Ok(results)
    }

    async fn delete(&self, location: &ObjectLocation) -> StorageResult<bool> {
        let store = self.store_for(&location.bucket)?;
        let path = Path::from(location.key.clone());

        match store.delete(&path).await {
            Ok(_) => {
                tracing::info!(
                    bucket = %location.bucket,
                    key = %location.key,
                    "S3 delete successful"
                );
                Ok(true)
            }
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::DeleteFailed(e.to_string())),
        }
    }
}
