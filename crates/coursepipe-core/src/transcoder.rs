//! Opaque transcoder boundary.
//!
//! The concrete codec invocation is an external collaborator: source bytes in,
//! derivative bytes plus duration/codec metadata out. The worker only needs to
//! distinguish "this input will never transcode" from "try again later".

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::models::MediaType;

#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The source is definitively malformed; retrying cannot help.
    #[error("malformed source: {0}")]
    Malformed(String),

    /// The transcoder could not run (process spawn failure, resource
    /// exhaustion, network); retry with backoff.
    #[error("transcoder unavailable: {0}")]
    Unavailable(String),
}

/// Streaming derivative produced by a transcode run.
#[derive(Debug, Clone)]
pub struct TranscodeOutput {
    pub bytes: Bytes,
    pub duration_seconds: f64,
    pub codec: String,
    /// Container/extension of the derivative, e.g. "mp3" or "mp4".
    pub format: String,
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        source: Bytes,
        media_type: MediaType,
    ) -> Result<TranscodeOutput, TranscodeError>;
}
