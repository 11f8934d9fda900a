//! Generic queue worker: claim a batch, dispatch each job, settle the result,
//! recover abandoned locks, and reschedule in-flight claims on shutdown.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use coursepipe_core::config::WorkerConfig;
use coursepipe_core::job_error::{JobError, JobOutcome};
use coursepipe_core::models::Job;
use coursepipe_core::retry::{RetryDecision, RetryPolicy};
use coursepipe_core::store::JobStore;
use coursepipe_db::JOB_NOTIFY_CHANNEL;

use crate::handler::JobHandler;

#[derive(Clone)]
pub struct JobWorkerConfig {
    pub poll_interval_ms: u64,
    pub batch_size: i64,
    /// A `processing` lock older than this is considered abandoned.
    pub lease_secs: u64,
    pub stale_sweep_interval_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for JobWorkerConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            poll_interval_ms: config.poll_interval_ms,
            batch_size: config.batch_size,
            lease_secs: config.lease_secs,
            stale_sweep_interval_secs: config.stale_sweep_interval_secs,
            shutdown_timeout_secs: config.shutdown_timeout_secs,
            retry: config.retry_policy(),
        }
    }
}

/// What a single [`JobRunner::process_batch`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Jobs whose result was settled (completed, rescheduled, or failed).
    pub settled: usize,
    /// Of the settled jobs, how many were deferred. A deferred job is due
    /// again immediately, so a drain pass that settles nothing but deferrals
    /// has made no progress and must stop rather than re-claim them.
    pub deferred: usize,
    /// A shutdown signal arrived mid-batch; unfinished claims were returned
    /// to the queue.
    pub interrupted: bool,
}

/// Claim-and-dispatch core, separate from the spawned loop so tests can drive
/// single batches directly.
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    config: JobWorkerConfig,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        handler: Arc<dyn JobHandler>,
        config: JobWorkerConfig,
    ) -> Self {
        Self {
            store,
            handler,
            config,
        }
    }

    /// Claim one batch and dispatch each job in turn.
    ///
    /// If the shutdown channel fires (or closes) mid-batch, the job being
    /// dispatched and every not-yet-started claim are rescheduled with their
    /// attempt counts unchanged and `next_run_at = now`, so another worker can
    /// pick them up without waiting for a lease expiry.
    pub async fn process_batch(
        &self,
        shutdown_rx: &mut mpsc::Receiver<()>,
    ) -> Result<BatchOutcome> {
        let queue = self.handler.queue();
        let batch = self
            .store
            .claim_batch(queue, self.config.batch_size)
            .await
            .context("Failed to claim job batch")?;

        if batch.is_empty() {
            return Ok(BatchOutcome {
                settled: 0,
                deferred: 0,
                interrupted: false,
            });
        }

        tracing::debug!(queue = %queue, batch = batch.len(), "Claimed job batch");

        let mut settled = 0usize;
        let mut deferred = 0usize;
        let mut jobs = batch.into_iter();

        while let Some(job) = jobs.next() {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    self.requeue_unfinished(job, jobs).await;
                    return Ok(BatchOutcome {
                        settled,
                        deferred,
                        interrupted: true,
                    });
                }
                result = self.dispatch(&job) => {
                    let was_deferred = matches!(result, Ok(JobOutcome::Deferred));
                    if let Err(e) = self.settle(&job, result).await {
                        tracing::error!(job_id = %job.id, error = %e, "Failed to settle job result");
                    }
                    settled += 1;
                    if was_deferred {
                        deferred += 1;
                    }
                }
            }
        }

        Ok(BatchOutcome {
            settled,
            deferred,
            interrupted: false,
        })
    }

    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, queue = %job.queue, attempt = job.attempt))]
    async fn dispatch(&self, job: &Job) -> Result<JobOutcome, JobError> {
        self.handler.handle(job).await
    }

    async fn settle(&self, job: &Job, result: Result<JobOutcome, JobError>) -> Result<()> {
        match result {
            Ok(JobOutcome::Completed) => {
                self.store.complete(job.id).await?;
                tracing::info!(job_id = %job.id, queue = %job.queue, "Job completed");
            }
            Ok(JobOutcome::Deferred) => {
                // Input not ready yet; back on the queue without consuming an
                // attempt.
                self.store
                    .reschedule(job.id, job.attempt, Utc::now(), None)
                    .await?;
                tracing::debug!(job_id = %job.id, queue = %job.queue, "Job deferred");
            }
            Err(e) if e.is_terminal() => {
                let attempt = job.attempt + 1;
                self.store
                    .fail_terminally(job.id, attempt, &e.to_string())
                    .await?;
                tracing::error!(
                    job_id = %job.id,
                    queue = %job.queue,
                    attempt = attempt,
                    error = %e,
                    "Job failed terminally"
                );
            }
            Err(e) => {
                let attempt = job.attempt + 1;
                match self.config.retry.decide(attempt) {
                    RetryDecision::Retry { delay } => {
                        let next_run_at = Utc::now()
                            + chrono::Duration::from_std(delay)
                                .unwrap_or_else(|_| chrono::Duration::seconds(0));
                        self.store
                            .reschedule(job.id, attempt, next_run_at, Some(&e.to_string()))
                            .await?;
                        tracing::warn!(
                            job_id = %job.id,
                            queue = %job.queue,
                            attempt = attempt,
                            backoff_secs = delay.as_secs(),
                            error = %e,
                            "Job failed, retry scheduled"
                        );
                    }
                    RetryDecision::GiveUp => {
                        self.store
                            .fail_terminally(job.id, attempt, &e.to_string())
                            .await?;
                        tracing::error!(
                            job_id = %job.id,
                            queue = %job.queue,
                            attempt = attempt,
                            error = %e,
                            "Job failed after exhausting attempts"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    async fn requeue_unfinished(&self, current: Job, rest: impl Iterator<Item = Job>) {
        let mut returned = 0usize;
        for job in std::iter::once(current).chain(rest) {
            match self
                .store
                .reschedule(job.id, job.attempt, Utc::now(), None)
                .await
            {
                Ok(()) => returned += 1,
                Err(e) => {
                    // The lease sweep will recover it.
                    tracing::warn!(job_id = %job.id, error = %e, "Failed to requeue job on shutdown");
                }
            }
        }
        tracing::info!(
            queue = %self.handler.queue(),
            returned = returned,
            "Shutdown mid-batch, unfinished claims returned to queue"
        );
    }
}

/// A spawned worker loop bound to one queue.
///
/// If `pool` is `Some`, the loop also LISTENs on the job notify channel and
/// wakes immediately when a job is enqueued for its queue; polling at
/// `poll_interval_ms` remains the fallback either way.
pub struct JobWorker {
    shutdown_tx: mpsc::Sender<()>,
    join_handle: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl JobWorker {
    pub fn start(
        store: Arc<dyn JobStore>,
        handler: Arc<dyn JobHandler>,
        config: JobWorkerConfig,
        pool: Option<sqlx::PgPool>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);

        let runner = JobRunner::new(store, handler, config);
        let join_handle = tokio::spawn(async move {
            Self::run_loop(runner, shutdown_rx, pool).await;
        });

        Self {
            shutdown_tx,
            join_handle,
            shutdown_timeout,
        }
    }

    async fn run_loop(runner: JobRunner, mut shutdown_rx: mpsc::Receiver<()>, pool: Option<sqlx::PgPool>) {
        let queue = runner.handler.queue();
        tracing::info!(
            queue = %queue,
            poll_interval_ms = runner.config.poll_interval_ms,
            batch_size = runner.config.batch_size,
            listen_notify = pool.is_some(),
            "Job worker started"
        );

        // A worker that crashed mid-batch left `processing` rows behind;
        // reclaim all of them for this queue before the first claim.
        match runner.store.release_stale_locks(queue, None).await {
            Ok(0) => {}
            Ok(released) => {
                tracing::info!(queue = %queue, released = released, "Released locks from a previous run")
            }
            Err(e) => tracing::error!(queue = %queue, error = %e, "Startup lock sweep failed"),
        }

        // The local sender keeps the channel open when there is no listener,
        // so the notify arm below never resolves spuriously.
        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
        spawn_listener(pool, queue.to_string(), notify_tx.clone());
        let poll_interval = Duration::from_millis(runner.config.poll_interval_ms);
        let lease = Duration::from_secs(runner.config.lease_secs);
        let mut sweep = tokio::time::interval(Duration::from_secs(
            runner.config.stale_sweep_interval_secs.max(1),
        ));
        sweep.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!(queue = %queue, "Job worker shutting down");
                    break;
                }
                _ = notify_rx.recv() => {
                    if Self::drain(&runner, &mut shutdown_rx).await {
                        tracing::info!(queue = %queue, "Job worker shutting down");
                        break;
                    }
                }
                _ = sleep(poll_interval) => {
                    if Self::drain(&runner, &mut shutdown_rx).await {
                        tracing::info!(queue = %queue, "Job worker shutting down");
                        break;
                    }
                }
                _ = sweep.tick() => {
                    match runner.store.release_stale_locks(queue, Some(lease)).await {
                        Ok(0) => {}
                        Ok(released) => {
                            tracing::warn!(queue = %queue, released = released, "Reclaimed expired job locks")
                        }
                        Err(e) => tracing::error!(queue = %queue, error = %e, "Stale lock sweep failed"),
                    }
                }
            }
        }

        tracing::info!(queue = %queue, "Job worker stopped");
    }

    /// Process batches until the queue runs dry or shutdown interrupts.
    ///
    /// Returns true when a shutdown signal was consumed mid-batch; the caller
    /// must stop its loop instead of claiming again. A pass that settles only
    /// deferrals has made no progress (deferred jobs are due again right
    /// away), so draining stops and they wait for the next wake-up.
    async fn drain(runner: &JobRunner, shutdown_rx: &mut mpsc::Receiver<()>) -> bool {
        loop {
            match runner.process_batch(shutdown_rx).await {
                Ok(outcome) if outcome.interrupted => return true,
                Ok(outcome) if outcome.settled == outcome.deferred => return false,
                Ok(_) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "Batch processing failed");
                    return false;
                }
            }
        }
    }

    /// Signal the loop and wait for it to finish, up to the configured
    /// shutdown timeout.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        match tokio::time::timeout(self.shutdown_timeout, self.join_handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Job worker task panicked"),
            Err(_) => tracing::warn!("Job worker did not stop within the shutdown timeout"),
        }
    }
}

/// LISTEN for enqueue notifications, forwarding only those whose payload
/// matches `queue_name`. Does nothing when `pool` is `None`.
fn spawn_listener(pool: Option<sqlx::PgPool>, queue_name: String, tx: mpsc::Sender<()>) {
    if let Some(pool) = pool {
        tokio::spawn(async move {
            loop {
                match sqlx::postgres::PgListener::connect_with(&pool).await {
                    Ok(mut listener) => {
                        if let Err(e) = listener.listen(JOB_NOTIFY_CHANNEL).await {
                            tracing::warn!(error = %e, "LISTEN failed, will retry");
                            sleep(Duration::from_secs(5)).await;
                            continue;
                        }
                        while let Ok(notification) = listener.recv().await {
                            if notification.payload() == queue_name {
                                if tx.send(()).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "PgListener connect failed, will retry");
                        sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });
    }
}
