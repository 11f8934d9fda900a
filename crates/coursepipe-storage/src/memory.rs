//! In-memory storage backend.
//!
//! Used in development and by the worker/reconciler test suites. Presigned
//! URLs are synthetic (`memory://...`) but honor the NotFound contract so
//! callers exercise the same branches as against S3.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::traits::{
    ObjectLocation, PresignUploadOptions, StorageError, StorageGateway, StorageResult,
};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
}

#[derive(Default)]
pub struct MemoryStorageGateway {
    objects: Mutex<HashMap<ObjectLocation, StoredObject>>,
}

impl MemoryStorageGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly, bypassing the gateway API. Tests use this to
    /// simulate uploads landing in storage after the intent was recorded.
    pub fn put_object(&self, location: ObjectLocation, data: Vec<u8>, content_type: &str) {
        self.objects.lock().expect("object map poisoned").insert(
            location,
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
    }

    /// Remove an object directly.
    pub fn remove_object(&self, location: &ObjectLocation) {
        self.objects
            .lock()
            .expect("object map poisoned")
            .remove(location);
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().expect("object map poisoned").len()
    }

    pub fn content_type_of(&self, location: &ObjectLocation) -> Option<String> {
        self.objects
            .lock()
            .expect("object map poisoned")
            .get(location)
            .map(|o| o.content_type.clone())
    }
}

#[async_trait]
impl StorageGateway for MemoryStorageGateway {
    async fn presign_download(
        &self,
        location: &ObjectLocation,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let objects = self.objects.lock().expect("object map poisoned");
        if !objects.contains_key(location) {
            return Err(StorageError::NotFound {
                location: location.clone(),
            });
        }
        Ok(format!(
            "memory://{}?expires_in={}",
            location,
            expires_in.as_secs()
        ))
    }

    async fn presign_upload(
        &self,
        location: &ObjectLocation,
        _content_type: &str,
        options: &PresignUploadOptions,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let objects = self.objects.lock().expect("object map poisoned");
        if !options.upsert && objects.contains_key(location) {
            return Err(StorageError::UploadFailed(format!(
                "object already exists: {}",
                location
            )));
        }
        Ok(format!(
            "memory://{}?put&expires_in={}",
            location,
            expires_in.as_secs()
        ))
    }

    async fn download(&self, location: &ObjectLocation) -> StorageResult<Vec<u8>> {
        let objects = self.objects.lock().expect("object map poisoned");
        objects
            .get(location)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::NotFound {
                location: location.clone(),
            })
    }

    async fn upload(
        &self,
        location: &ObjectLocation,
        data: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<()> {
        self.put_object(location.clone(), data, content_type);
        Ok(())
    }

    async fn exists_batch(
        &self,
        locations: &[ObjectLocation],
    ) -> StorageResult<HashMap<ObjectLocation, bool>> {
        let objects = self.objects.lock().expect("object map poisoned");
        Ok(locations
            .iter()
            .map(|loc| (loc.clone(), objects.contains_key(loc)))
            .collect())
    }

    async fn delete(&self, location: &ObjectLocation) -> StorageResult<bool> {
        Ok(self
            .objects
            .lock()
            .expect("object map poisoned")
            .remove(location)
            .is_some())
    }
}
