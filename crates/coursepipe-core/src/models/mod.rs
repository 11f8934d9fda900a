//! Domain models shared across coursepipe components.

pub mod job;
pub mod lesson_media;
pub mod media_asset;

pub use job::{Job, JobPayload, JobQueue, JobStats, JobStatus, TranscodePayload, WebhookEventPayload};
pub use lesson_media::{LessonMediaEntry, LessonMediaSource, NewLessonMediaEntry};
pub use media_asset::{
    MediaAsset, MediaAssetState, MediaPurpose, MediaType, NewMediaAsset, StreamingOutput,
};
