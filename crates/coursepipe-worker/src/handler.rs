use async_trait::async_trait;

use coursepipe_core::job_error::{JobError, JobOutcome};
use coursepipe_core::models::{Job, JobQueue};

/// One queue's processing logic, run by a [`crate::queue::JobWorker`].
///
/// A handler never touches queue bookkeeping. It reports how the job ended
/// and the worker translates that into completion, deferral, a backoff
/// reschedule, or a terminal failure:
///
/// - `Ok(Completed)` deletes the job.
/// - `Ok(Deferred)` makes it immediately eligible again without consuming an
///   attempt.
/// - `Err(transient)` reschedules with exponential backoff until the attempt
///   budget runs out.
/// - `Err(terminal)` fails the job at once.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The queue this handler consumes.
    fn queue(&self) -> JobQueue;

    async fn handle(&self, job: &Job) -> Result<JobOutcome, JobError>;
}
