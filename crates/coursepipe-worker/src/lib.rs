//! Background job processing: the generic queue worker plus the two handlers
//! that run on it (webhook delivery and media transcoding).

pub mod handler;
pub mod queue;
pub mod transcode;
pub mod webhook;

pub use handler::JobHandler;
pub use queue::{BatchOutcome, JobRunner, JobWorker, JobWorkerConfig};
pub use transcode::{CommandTranscoder, TranscodeHandler};
pub use webhook::{EventDispatcher, WebhookDeliveryHandler};
