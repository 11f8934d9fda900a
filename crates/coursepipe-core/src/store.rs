//! Persistence traits for the job queue and the media-asset catalog.
//!
//! The Postgres implementations live in `coursepipe-db`; tests drive the
//! worker against in-memory implementations. The job table is the single
//! source of truth for work ownership: no other locking primitive may gate
//! claim decisions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::models::{Job, JobQueue, MediaAsset, StreamingOutput};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a pending job, immediately eligible for a claim.
    async fn enqueue(&self, queue: JobQueue, payload: serde_json::Value) -> anyhow::Result<Job>;

    /// Atomically claim up to `limit` due, unlocked jobs in the queue, ordered
    /// by `next_run_at`. Rows locked by a concurrent claimer are skipped, so
    /// no two workers ever receive the same job and slow scans never block
    /// other claimers.
    async fn claim_batch(&self, queue: JobQueue, limit: i64) -> anyhow::Result<Vec<Job>>;

    /// Delete a fully processed job.
    async fn complete(&self, job_id: Uuid) -> anyhow::Result<()>;

    /// Return a job to `pending`, clearing its lock and recording the attempt
    /// count and error. A deferral passes the unchanged attempt count and an
    /// immediate `next_run_at`.
    async fn reschedule(
        &self,
        job_id: Uuid,
        attempt: i32,
        next_run_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> anyhow::Result<()>;

    /// Mark a job terminally failed; excluded from claims until an operator
    /// resets it. Failed jobs are never auto-deleted.
    async fn fail_terminally(&self, job_id: Uuid, attempt: i32, error: &str) -> anyhow::Result<()>;

    /// Recover locks abandoned by crashed workers. With `older_than = None`
    /// every `processing` row is reset (startup sweep); with a lease duration
    /// only locks older than the lease are reclaimed (periodic sweep). The
    /// reset also pulls `next_run_at` forward to now so a crash never silently
    /// delays a job. Returns the number of rows released.
    async fn release_stale_locks(
        &self,
        queue: JobQueue,
        older_than: Option<Duration>,
    ) -> anyhow::Result<u64>;
}

#[async_trait]
pub trait MediaAssetStore: Send + Sync {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<MediaAsset>>;

    /// `uploaded -> processing` on claim. Re-marking an already-processing
    /// asset is allowed: a job reclaimed after a crash redoes the work from
    /// scratch.
    async fn mark_processing(&self, id: Uuid) -> anyhow::Result<MediaAsset>;

    /// Reset a deferred asset to `uploaded` without touching
    /// `processing_attempts`.
    async fn mark_uploaded(&self, id: Uuid) -> anyhow::Result<MediaAsset>;

    /// Terminal success: record the derivative and set `state = ready`.
    async fn mark_ready(&self, id: Uuid, output: &StreamingOutput) -> anyhow::Result<MediaAsset>;

    /// Genuine processing failure: increment `processing_attempts`, store the
    /// error, and return the asset to `uploaded` pending a retry.
    async fn record_failure(&self, id: Uuid, error: &str) -> anyhow::Result<MediaAsset>;

    /// Terminal failure: attempts exhausted or input definitively malformed.
    async fn mark_failed(&self, id: Uuid, error: &str) -> anyhow::Result<MediaAsset>;
}
