//! Coursepipe Core Library
//!
//! This crate provides the domain models, error types, retry policy, and
//! persistence traits shared across all coursepipe components. The two durable
//! queues (webhook delivery and media transcoding), the media-asset state
//! machine, and the storage reconciler all build on the types defined here.

pub mod config;
pub mod error;
pub mod job_error;
pub mod models;
pub mod retry;
pub mod store;
pub mod transcoder;

// Re-export commonly used types
pub use config::{Config, DatabaseConfig, ReconcilerConfig, StorageConfig, WorkerConfig};
pub use error::AllocationExhausted;
pub use job_error::{JobError, JobErrorKind, JobOutcome, JobResultExt};
pub use retry::{RetryDecision, RetryPolicy};
pub use store::{JobStore, MediaAssetStore};
pub use transcoder::{TranscodeError, TranscodeOutput, Transcoder};
