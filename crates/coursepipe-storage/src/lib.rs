//! Coursepipe Storage Library
//!
//! Abstraction over the object-storage service: presigned URL issuance,
//! batched existence checks, and deletion, addressed by `(bucket, key)` pairs
//! in a single logical namespace. Backends: S3-compatible stores via
//! `object_store`, and an in-memory store for development and tests.
//!
//! Gateways are stateless and safely shared across concurrent callers.

pub mod memory;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

pub use memory::MemoryStorageGateway;
#[cfg(feature = "storage-s3")]
pub use s3::S3StorageGateway;
pub use traits::{
    ObjectLocation, PresignUploadOptions, StorageError, StorageGateway, StorageResult,
};
