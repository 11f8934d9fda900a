use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use std::time::Duration;
use uuid::Uuid;

use coursepipe_core::models::{Job, JobQueue, JobStats};
use coursepipe_core::store::JobStore;

use crate::db::database::Database;

/// Channel name for PostgreSQL NOTIFY when a new job is enqueued. The
/// notification payload is the queue name so each worker only wakes for its
/// own queue.
pub const JOB_NOTIFY_CHANNEL: &str = "coursepipe_new_job";

/// Postgres-backed job store.
///
/// Claiming uses `FOR UPDATE SKIP LOCKED` inside one transaction, so
/// concurrent claimers never receive the same row and never block each other
/// on a slow scan. The job table is the single source of truth for work
/// ownership.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Aggregated queue counts, optionally restricted to one queue.
    #[tracing::instrument(skip(self))]
    pub async fn stats(&self, queue: Option<JobQueue>) -> Result<JobStats> {
        use sqlx::Row;
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as total,
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status = 'processing') as processing,
                COUNT(*) FILTER (WHERE status = 'failed') as failed
            FROM jobs
            WHERE $1::text IS NULL OR queue = $1
            "#,
        )
        .bind(queue.map(|q| q.to_string()))
        .fetch_one(&self.pool)
        .await
        .context("Failed to fetch job stats")?;

        Ok(JobStats {
            total: row.get::<Option<i64>, _>("total").unwrap_or(0),
            pending: row.get::<Option<i64>, _>("pending").unwrap_or(0),
            processing: row.get::<Option<i64>, _>("processing").unwrap_or(0),
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0),
        })
    }

    /// Operator reset: return a terminally failed job to `pending`. This is
    /// the only path out of `failed`.
    #[tracing::instrument(skip(self))]
    pub async fn reset_failed(&self, job_id: Uuid) -> Result<Job> {
        let job: Job = sqlx::query_as::<Postgres, Job>(
            r#"
            UPDATE jobs
            SET status = 'pending',
                attempt = 0,
                locked_at = NULL,
                next_run_at = NOW(),
                last_error = NULL,
                updated_at = NOW()
            WHERE id = $1
                AND status = 'failed'
            RETURNING
                id, queue, payload, status, attempt, locked_at,
                next_run_at, last_error, created_at, updated_at
            "#,
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to reset job - job not found or not in failed state")?;

        tracing::info!(job_id = %job_id, queue = %job.queue, "Failed job manually reset");

        Ok(job)
    }

    /// Fetch a job by id (operator tooling).
    pub async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let job: Option<Job> = sqlx::query_as::<Postgres, Job>(
            r#"
            SELECT
                id, queue, payload, status, attempt, locked_at,
                next_run_at, last_error, created_at, updated_at
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch job")?;

        Ok(job)
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[tracing::instrument(skip(self, payload))]
    async fn enqueue(&self, queue: JobQueue, payload: serde_json::Value) -> Result<Job> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for enqueue")?;

        let job: Job = sqlx::query_as::<Postgres, Job>(
            r#"
            INSERT INTO jobs (queue, payload, status, attempt, next_run_at)
            VALUES ($1, $2, 'pending', 0, NOW())
            RETURNING
                id, queue, payload, status, attempt, locked_at,
                next_run_at, last_error, created_at, updated_at
            "#,
        )
        .bind(queue.to_string())
        .bind(payload)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to insert job")?;

        // Wake workers immediately instead of waiting for the poll interval.
        // Non-fatal: workers discover jobs via polling when NOTIFY fails.
        if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(JOB_NOTIFY_CHANNEL)
            .bind(queue.to_string())
            .execute(&mut *tx)
            .await
        {
            tracing::warn!(
                error = %e,
                job_id = %job.id,
                "Failed to send pg_notify for new job, workers will poll"
            );
        }

        tx.commit()
            .await
            .context("Failed to commit enqueue transaction")?;

        tracing::info!(job_id = %job.id, queue = %queue, "Job enqueued");

        Ok(job)
    }

    #[tracing::instrument(skip(self))]
    async fn claim_batch(&self, queue: JobQueue, limit: i64) -> Result<Vec<Job>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin claim transaction")?;

        let ids: Vec<Uuid> = sqlx::query_scalar::<Postgres, Uuid>(
            r#"
            SELECT id
            FROM jobs
            WHERE queue = $1
                AND status = 'pending'
                AND locked_at IS NULL
                AND next_run_at <= NOW()
            ORDER BY next_run_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(queue.to_string())
        .bind(limit)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to select due jobs")?;

        if ids.is_empty() {
            tx.rollback().await.ok();
            return Ok(Vec::new());
        }

        let mut jobs: Vec<Job> = sqlx::query_as::<Postgres, Job>(
            r#"
            UPDATE jobs
            SET status = 'processing',
                locked_at = NOW(),
                updated_at = NOW()
            WHERE id = ANY($1)
            RETURNING
                id, queue, payload, status, attempt, locked_at,
                next_run_at, last_error, created_at, updated_at
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to lock claimed jobs")?;

        tx.commit().await.context("Failed to commit claim")?;

        jobs.sort_by_key(|j| j.next_run_at);

        tracing::debug!(queue = %queue, claimed = jobs.len(), "Jobs claimed");

        Ok(jobs)
    }

    #[tracing::instrument(skip(self))]
    async fn complete(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete completed job")?;

        tracing::debug!(job_id = %job_id, "Job completed and deleted");

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn reschedule(
        &self,
        job_id: Uuid,
        attempt: i32,
        next_run_at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                locked_at = NULL,
                attempt = $2,
                next_run_at = $3,
                last_error = COALESCE($4, last_error),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(attempt)
        .bind(next_run_at)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("Failed to reschedule job")?;

        tracing::info!(
            job_id = %job_id,
            attempt = attempt,
            next_run_at = %next_run_at,
            "Job rescheduled"
        );

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn fail_terminally(&self, job_id: Uuid, attempt: i32, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                locked_at = NULL,
                attempt = $2,
                last_error = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(attempt)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("Failed to mark job as failed")?;

        tracing::error!(job_id = %job_id, attempt = attempt, "Job failed terminally");

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn release_stale_locks(
        &self,
        queue: JobQueue,
        older_than: Option<Duration>,
    ) -> Result<u64> {
        // next_run_at is pulled forward so a crash never silently delays a job.
        let released = match older_than {
            Some(lease) => sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'pending',
                    locked_at = NULL,
                    next_run_at = LEAST(next_run_at, NOW()),
                    updated_at = NOW()
                WHERE queue = $1
                    AND status = 'processing'
                    AND locked_at < NOW() - make_interval(secs => $2)
                "#,
            )
            .bind(queue.to_string())
            .bind(lease.as_secs_f64())
            .execute(&self.pool)
            .await
            .context("Failed to release expired locks")?
            .rows_affected(),
            None => sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'pending',
                    locked_at = NULL,
                    next_run_at = LEAST(next_run_at, NOW()),
                    updated_at = NOW()
                WHERE queue = $1
                    AND status = 'processing'
                "#,
            )
            .bind(queue.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to release stale locks")?
            .rows_affected(),
        };

        if released > 0 {
            tracing::warn!(queue = %queue, released = released, "Stale job locks released");
        }

        Ok(released)
    }
}
