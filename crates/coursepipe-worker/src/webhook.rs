//! Webhook delivery: hand stored third-party events to the internal
//! dispatcher, with at-least-once semantics.

use async_trait::async_trait;
use std::sync::Weak;

use coursepipe_core::job_error::{JobError, JobOutcome};
use coursepipe_core::models::{Job, JobQueue, WebhookEventPayload};

use crate::handler::JobHandler;

/// Internal consumer of webhook events (enrollment updates, payment
/// confirmations). Implementations must tolerate duplicate deliveries.
#[async_trait]
pub trait EventDispatcher: Send + Sync {
    async fn dispatch(&self, event: &WebhookEventPayload) -> anyhow::Result<()>;
}

/// Handler for the `webhook_delivery` queue.
///
/// Holds the dispatcher weakly so a dropped application context stops
/// deliveries instead of keeping it alive; jobs hit in that window reschedule
/// and run on the next worker.
pub struct WebhookDeliveryHandler {
    dispatcher: Weak<dyn EventDispatcher>,
}

impl WebhookDeliveryHandler {
    pub fn new(dispatcher: Weak<dyn EventDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl JobHandler for WebhookDeliveryHandler {
    fn queue(&self) -> JobQueue {
        JobQueue::WebhookDelivery
    }

    async fn handle(&self, job: &Job) -> Result<JobOutcome, JobError> {
        let event: WebhookEventPayload = job
            .try_payload_as()
            .map_err(|e| JobError::terminal(anyhow::anyhow!("malformed webhook payload: {}", e)))?;

        let dispatcher = self.dispatcher.upgrade().ok_or_else(|| {
            JobError::transient(anyhow::anyhow!("event dispatcher is gone, rescheduling"))
        })?;

        tracing::debug!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            "Dispatching webhook event"
        );

        dispatcher.dispatch(&event).await.map_err(|e| {
            // Dispatchers flag permanently undeliverable events themselves;
            // everything else is worth a retry.
            match e.downcast::<JobError>() {
                Ok(job_err) => job_err,
                Err(other) => JobError::transient(other),
            }
        })?;

        Ok(JobOutcome::Completed)
    }
}
