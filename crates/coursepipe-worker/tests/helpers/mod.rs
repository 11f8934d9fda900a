//! Test helpers: in-memory job and asset stores plus a scripted transcoder.
//!
//! Run from workspace root: `cargo test -p coursepipe-worker`. The in-memory
//! stores mirror the Postgres repositories' contracts (atomic claims, COALESCE
//! on `last_error`, state-gated transitions) so worker logic can be exercised
//! without a database.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use coursepipe_core::models::{
    Job, JobQueue, JobStatus, MediaAsset, MediaAssetState, MediaPurpose, MediaType,
    StreamingOutput,
};
use coursepipe_core::store::{JobStore, MediaAssetStore};
use coursepipe_core::transcoder::{TranscodeError, TranscodeOutput, Transcoder};

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Pull a job's `next_run_at` back so it is claimable right now.
    pub fn make_due(&self, id: Uuid) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&id) {
            job.next_run_at = Utc::now() - chrono::Duration::seconds(1);
        }
    }

    pub fn make_all_due(&self) {
        let mut jobs = self.jobs.lock().unwrap();
        for job in jobs.values_mut() {
            job.next_run_at = Utc::now() - chrono::Duration::seconds(1);
        }
    }

    /// Backdate a processing job's lock, as if its worker died a while ago.
    pub fn age_lock(&self, id: Uuid, age: Duration) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(&id) {
            job.locked_at = Some(Utc::now() - chrono::Duration::seconds(age.as_secs() as i64));
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, queue: JobQueue, payload: serde_json::Value) -> anyhow::Result<Job> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            queue,
            payload,
            status: JobStatus::Pending,
            attempt: 0,
            locked_at: None,
            next_run_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(job)
    }

    async fn claim_batch(&self, queue: JobQueue, limit: i64) -> anyhow::Result<Vec<Job>> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut due: Vec<Uuid> = jobs
            .values()
            .filter(|j| j.queue == queue && j.is_due())
            .map(|j| j.id)
            .collect();
        due.sort_by_key(|id| jobs[id].next_run_at);
        due.truncate(limit.max(0) as usize);

        let now = Utc::now();
        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            let job = jobs.get_mut(&id).unwrap();
            job.status = JobStatus::Processing;
            job.locked_at = Some(now);
            job.updated_at = now;
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn complete(&self, job_id: Uuid) -> anyhow::Result<()> {
        self.jobs.lock().unwrap().remove(&job_id);
        Ok(())
    }

    async fn reschedule(
        &self,
        job_id: Uuid,
        attempt: i32,
        next_run_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| anyhow::anyhow!("job {} not found", job_id))?;
        job.status = JobStatus::Pending;
        job.locked_at = None;
        job.attempt = attempt;
        job.next_run_at = next_run_at;
        if let Some(error) = error {
            job.last_error = Some(error.to_string());
        }
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn fail_terminally(&self, job_id: Uuid, attempt: i32, error: &str) -> anyhow::Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| anyhow::anyhow!("job {} not found", job_id))?;
        job.status = JobStatus::Failed;
        job.locked_at = None;
        job.attempt = attempt;
        job.last_error = Some(error.to_string());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn release_stale_locks(
        &self,
        queue: JobQueue,
        older_than: Option<Duration>,
    ) -> anyhow::Result<u64> {
        let mut jobs = self.jobs.lock().unwrap();
        let now = Utc::now();
        let mut released = 0u64;
        for job in jobs.values_mut() {
            if job.queue != queue || job.status != JobStatus::Processing {
                continue;
            }
            if let Some(lease) = older_than {
                if !job.lock_expired(lease) {
                    continue;
                }
            }
            job.status = JobStatus::Pending;
            job.locked_at = None;
            job.next_run_at = job.next_run_at.min(now);
            job.updated_at = now;
            released += 1;
        }
        Ok(released)
    }
}

#[derive(Default)]
pub struct MemoryMediaAssetStore {
    assets: Mutex<HashMap<Uuid, MediaAsset>>,
}

impl MemoryMediaAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, asset: MediaAsset) {
        self.assets.lock().unwrap().insert(asset.id, asset);
    }

    pub fn snapshot(&self, id: Uuid) -> Option<MediaAsset> {
        self.assets.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl MediaAssetStore for MemoryMediaAssetStore {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<MediaAsset>> {
        Ok(self.assets.lock().unwrap().get(&id).cloned())
    }

    async fn mark_processing(&self, id: Uuid) -> anyhow::Result<MediaAsset> {
        let mut assets = self.assets.lock().unwrap();
        let asset = assets
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("asset {} not found", id))?;
        if !matches!(
            asset.state,
            MediaAssetState::Uploaded | MediaAssetState::Processing
        ) {
            anyhow::bail!("asset {} not in a claimable state", id);
        }
        asset.state = MediaAssetState::Processing;
        asset.updated_at = Utc::now();
        Ok(asset.clone())
    }

    async fn mark_uploaded(&self, id: Uuid) -> anyhow::Result<MediaAsset> {
        let mut assets = self.assets.lock().unwrap();
        let asset = assets
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("asset {} not found", id))?;
        asset.state = MediaAssetState::Uploaded;
        asset.updated_at = Utc::now();
        Ok(asset.clone())
    }

    async fn mark_ready(&self, id: Uuid, output: &StreamingOutput) -> anyhow::Result<MediaAsset> {
        let mut assets = self.assets.lock().unwrap();
        let asset = assets
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("asset {} not found", id))?;
        asset.state = MediaAssetState::Ready;
        asset.streaming_object_path = Some(output.object_path.clone());
        asset.streaming_format = Some(output.format.clone());
        asset.streaming_storage_bucket = Some(output.storage_bucket.clone());
        asset.duration_seconds = Some(output.duration_seconds);
        asset.codec = Some(output.codec.clone());
        asset.error_message = None;
        asset.updated_at = Utc::now();
        Ok(asset.clone())
    }

    async fn record_failure(&self, id: Uuid, error: &str) -> anyhow::Result<MediaAsset> {
        let mut assets = self.assets.lock().unwrap();
        let asset = assets
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("asset {} not found", id))?;
        asset.state = MediaAssetState::Uploaded;
        asset.processing_attempts += 1;
        asset.error_message = Some(error.to_string());
        asset.updated_at = Utc::now();
        Ok(asset.clone())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> anyhow::Result<MediaAsset> {
        let mut assets = self.assets.lock().unwrap();
        let asset = assets
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("asset {} not found", id))?;
        asset.state = MediaAssetState::Failed;
        asset.error_message = Some(error.to_string());
        asset.updated_at = Utc::now();
        Ok(asset.clone())
    }
}

/// A fresh audio asset in `uploaded` state pointing at `source_key`.
pub fn uploaded_audio_asset(bucket: &str, source_key: &str) -> MediaAsset {
    let now = Utc::now();
    MediaAsset {
        id: Uuid::new_v4(),
        owner_id: Uuid::new_v4(),
        course_id: Uuid::new_v4(),
        lesson_id: Some(Uuid::new_v4()),
        media_type: MediaType::Audio,
        purpose: MediaPurpose::LessonAudio,
        original_object_path: source_key.to_string(),
        original_content_type: "audio/wav".to_string(),
        original_filename: "lecture.wav".to_string(),
        original_size_bytes: 4096,
        storage_bucket: bucket.to_string(),
        state: MediaAssetState::Uploaded,
        streaming_object_path: None,
        streaming_format: None,
        streaming_storage_bucket: None,
        duration_seconds: None,
        codec: None,
        processing_attempts: 0,
        error_message: None,
        created_at: now,
        updated_at: now,
    }
}

/// Transcoder driven by a script of results; succeeds once the script runs
/// out.
pub struct FakeTranscoder {
    script: Mutex<VecDeque<Result<(), TranscodeError>>>,
}

impl FakeTranscoder {
    pub fn succeeding() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn scripted(results: Vec<Result<(), TranscodeError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
        }
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(
        &self,
        _source: bytes::Bytes,
        media_type: MediaType,
    ) -> Result<TranscodeOutput, TranscodeError> {
        if let Some(result) = self.script.lock().unwrap().pop_front() {
            result?;
        }
        let format = match media_type {
            MediaType::Video => "mp4",
            _ => "mp3",
        };
        Ok(TranscodeOutput {
            bytes: bytes::Bytes::from_static(b"derivative-bytes"),
            duration_seconds: 42.5,
            codec: format.to_string(),
            format: format.to_string(),
        })
    }
}
