//! Media transcoding: drive one asset through
//! `uploaded -> processing -> ready | failed`, deferring when the source
//! object is not visible in storage yet.

use async_trait::async_trait;
use bytes::Bytes;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use uuid::Uuid;

use coursepipe_core::job_error::{JobError, JobOutcome};
use coursepipe_core::models::{
    Job, JobQueue, MediaAsset, MediaAssetState, MediaType, StreamingOutput, TranscodePayload,
};
use coursepipe_core::store::MediaAssetStore;
use coursepipe_core::transcoder::{TranscodeError, TranscodeOutput, Transcoder};
use coursepipe_storage::{ObjectLocation, StorageGateway};

use crate::handler::JobHandler;

/// Handler for the `media_transcode` queue.
///
/// Two failure budgets are in play: the job's queue attempts and the asset's
/// `processing_attempts`. Only genuine transcode failures consume the asset
/// budget; a source object that has not landed in storage yet defers the job
/// and leaves both untouched.
pub struct TranscodeHandler {
    assets: Arc<dyn MediaAssetStore>,
    storage: Arc<dyn StorageGateway>,
    transcoder: Arc<dyn Transcoder>,
    streaming_bucket: String,
    max_attempts: i32,
}

impl TranscodeHandler {
    pub fn new(
        assets: Arc<dyn MediaAssetStore>,
        storage: Arc<dyn StorageGateway>,
        transcoder: Arc<dyn Transcoder>,
        streaming_bucket: String,
        max_attempts: i32,
    ) -> Self {
        Self {
            assets,
            storage,
            transcoder,
            streaming_bucket,
            max_attempts,
        }
    }

    /// Record a genuine failure against the asset. Exhausting the asset's
    /// attempt budget fails it for good; otherwise the job retries with
    /// backoff.
    async fn register_failure(&self, asset_id: Uuid, error: &str) -> JobError {
        let updated = match self.assets.record_failure(asset_id, error).await {
            Ok(asset) => asset,
            Err(e) => return JobError::transient(e.context("Failed to record asset failure")),
        };

        if updated.processing_attempts >= self.max_attempts {
            if let Err(e) = self.assets.mark_failed(asset_id, error).await {
                return JobError::transient(e.context("Failed to mark asset failed"));
            }
            JobError::terminal(anyhow::anyhow!(
                "transcoding failed after {} attempts: {}",
                updated.processing_attempts,
                error
            ))
        } else {
            JobError::transient(anyhow::anyhow!("{}", error))
        }
    }

    async fn run(&self, asset: &MediaAsset) -> Result<JobOutcome, JobError> {
        let source = ObjectLocation::new(&asset.storage_bucket, &asset.original_object_path);

        self.assets
            .mark_processing(asset.id)
            .await
            .map_err(JobError::transient)?;

        let source_bytes = match self.storage.download(&source).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) if e.is_not_found() => {
                // The client may still be uploading. Put the asset back to
                // `uploaded` and let the job run again; no budget is spent.
                tracing::debug!(
                    asset_id = %asset.id,
                    source = %source,
                    "Source object not visible yet, deferring"
                );
                self.assets
                    .mark_uploaded(asset.id)
                    .await
                    .map_err(JobError::transient)?;
                return Ok(JobOutcome::Deferred);
            }
            Err(e) => {
                return Err(self
                    .register_failure(asset.id, &format!("source download failed: {}", e))
                    .await);
            }
        };

        let output = match self.transcoder.transcode(source_bytes, asset.media_type).await {
            Ok(output) => output,
            Err(TranscodeError::Malformed(reason)) => {
                let message = format!("malformed source: {}", reason);
                if let Err(e) = self.assets.mark_failed(asset.id, &message).await {
                    return Err(JobError::transient(e.context("Failed to mark asset failed")));
                }
                return Err(JobError::terminal(anyhow::anyhow!(message)));
            }
            Err(TranscodeError::Unavailable(reason)) => {
                return Err(self
                    .register_failure(asset.id, &format!("transcoder unavailable: {}", reason))
                    .await);
            }
        };

        let streaming_key = streaming_key(asset.media_type, asset.id, &output.format);
        let destination = ObjectLocation::new(&self.streaming_bucket, &streaming_key);
        if let Err(e) = self
            .storage
            .upload(
                &destination,
                output.bytes.to_vec(),
                derivative_content_type(&output.format),
            )
            .await
        {
            return Err(self
                .register_failure(asset.id, &format!("derivative upload failed: {}", e))
                .await);
        }

        let streaming = StreamingOutput {
            object_path: streaming_key,
            format: output.format,
            storage_bucket: self.streaming_bucket.clone(),
            duration_seconds: output.duration_seconds,
            codec: output.codec,
        };
        self.assets
            .mark_ready(asset.id, &streaming)
            .await
            .map_err(JobError::transient)?;

        Ok(JobOutcome::Completed)
    }
}

#[async_trait]
impl JobHandler for TranscodeHandler {
    fn queue(&self) -> JobQueue {
        JobQueue::MediaTranscode
    }

    async fn handle(&self, job: &Job) -> Result<JobOutcome, JobError> {
        let payload: TranscodePayload = job
            .try_payload_as()
            .map_err(|e| JobError::terminal(anyhow::anyhow!("malformed transcode payload: {}", e)))?;

        let asset = self
            .assets
            .get(payload.media_asset_id)
            .await
            .map_err(JobError::transient)?
            .ok_or_else(|| {
                JobError::terminal(anyhow::anyhow!(
                    "media asset {} does not exist",
                    payload.media_asset_id
                ))
            })?;

        match asset.state {
            // A duplicate or replayed job for a settled asset has nothing to
            // do.
            MediaAssetState::Ready => {
                tracing::debug!(asset_id = %asset.id, "Asset already ready, nothing to do");
                Ok(JobOutcome::Completed)
            }
            MediaAssetState::Failed => {
                tracing::warn!(asset_id = %asset.id, "Asset already failed, dropping job");
                Ok(JobOutcome::Completed)
            }
            MediaAssetState::Uploaded | MediaAssetState::Processing => self.run(&asset).await,
        }
    }
}

fn streaming_key(media_type: MediaType, asset_id: Uuid, format: &str) -> String {
    format!("media/streaming/{}/{}.{}", media_type, asset_id, format)
}

fn derivative_content_type(format: &str) -> &'static str {
    match format {
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Transcoder that shells out to a configured command.
///
/// The command template is split on whitespace; `{input}` and `{output}`
/// tokens are replaced with temp-file paths. The command must write the
/// derivative to `{output}` and print the duration in seconds on the first
/// line of stdout. Exit status 1 means the input is malformed; any other
/// failure is treated as the transcoder being unavailable.
pub struct CommandTranscoder {
    command_template: String,
}

impl CommandTranscoder {
    pub fn new(command_template: String) -> Self {
        Self { command_template }
    }

    fn target_format(media_type: MediaType) -> Result<(&'static str, &'static str), TranscodeError> {
        match media_type {
            MediaType::Audio => Ok(("mp3", "mp3")),
            MediaType::Video => Ok(("mp4", "h264")),
            other => Err(TranscodeError::Malformed(format!(
                "media type {} has no streaming derivative",
                other
            ))),
        }
    }
}

#[async_trait]
impl Transcoder for CommandTranscoder {
    async fn transcode(
        &self,
        source: Bytes,
        media_type: MediaType,
    ) -> Result<TranscodeOutput, TranscodeError> {
        let (format, codec) = Self::target_format(media_type)?;

        let workdir = tempfile::tempdir()
            .map_err(|e| TranscodeError::Unavailable(format!("tempdir failed: {}", e)))?;
        let input_path = workdir.path().join("source");
        let output_path = workdir.path().join(format!("derivative.{}", format));

        let mut input_file = tokio::fs::File::create(&input_path)
            .await
            .map_err(|e| TranscodeError::Unavailable(format!("write input failed: {}", e)))?;
        input_file
            .write_all(&source)
            .await
            .map_err(|e| TranscodeError::Unavailable(format!("write input failed: {}", e)))?;
        input_file
            .flush()
            .await
            .map_err(|e| TranscodeError::Unavailable(format!("write input failed: {}", e)))?;

        let mut tokens = self.command_template.split_whitespace().map(|token| {
            token
                .replace("{input}", &input_path.to_string_lossy())
                .replace("{output}", &output_path.to_string_lossy())
        });
        let program = tokens
            .next()
            .ok_or_else(|| TranscodeError::Unavailable("empty transcoder command".to_string()))?;

        let result = Command::new(program)
            .args(tokens)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| TranscodeError::Unavailable(format!("spawn failed: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return match result.status.code() {
                Some(1) => Err(TranscodeError::Malformed(stderr.trim().to_string())),
                _ => Err(TranscodeError::Unavailable(stderr.trim().to_string())),
            };
        }

        let duration_seconds = String::from_utf8_lossy(&result.stdout)
            .lines()
            .next()
            .and_then(|line| line.trim().parse::<f64>().ok())
            .unwrap_or(0.0);

        let bytes = tokio::fs::read(&output_path)
            .await
            .map_err(|e| TranscodeError::Unavailable(format!("read derivative failed: {}", e)))?;

        Ok(TranscodeOutput {
            bytes: Bytes::from(bytes),
            duration_seconds,
            codec: codec.to_string(),
            format: format.to_string(),
        })
    }
}
