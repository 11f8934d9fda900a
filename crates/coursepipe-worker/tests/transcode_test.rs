//! Transcode handler behavior: deferral for invisible sources, the two
//! failure budgets, and the happy path to a playable derivative.

mod helpers;

use std::sync::Arc;

use coursepipe_core::job_error::JobOutcome;
use coursepipe_core::models::{Job, JobQueue, JobStatus, MediaAssetState, TranscodePayload};
use coursepipe_core::transcoder::TranscodeError;
use coursepipe_storage::{MemoryStorageGateway, ObjectLocation};
use coursepipe_worker::{JobHandler, TranscodeHandler};

use helpers::{uploaded_audio_asset, FakeTranscoder, MemoryMediaAssetStore};

const SOURCE_BUCKET: &str = "course-media";
const STREAMING_BUCKET: &str = "course-streaming";

struct Fixture {
    assets: Arc<MemoryMediaAssetStore>,
    storage: Arc<MemoryStorageGateway>,
    handler: TranscodeHandler,
}

fn fixture(transcoder: FakeTranscoder, max_attempts: i32) -> Fixture {
    let assets = Arc::new(MemoryMediaAssetStore::new());
    let storage = Arc::new(MemoryStorageGateway::new());
    let handler = TranscodeHandler::new(
        assets.clone(),
        storage.clone(),
        Arc::new(transcoder),
        STREAMING_BUCKET.to_string(),
        max_attempts,
    );
    Fixture {
        assets,
        storage,
        handler,
    }
}

fn transcode_job(media_asset_id: uuid::Uuid) -> Job {
    Job {
        id: uuid::Uuid::new_v4(),
        queue: JobQueue::MediaTranscode,
        payload: Job::payload_from(&TranscodePayload { media_asset_id }).unwrap(),
        status: JobStatus::Processing,
        attempt: 0,
        locked_at: Some(chrono::Utc::now()),
        next_run_at: chrono::Utc::now(),
        last_error: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn invisible_source_defers_without_consuming_attempts() {
    let fx = fixture(FakeTranscoder::succeeding(), 3);
    let asset = uploaded_audio_asset(SOURCE_BUCKET, "media/source/audio/lecture.wav");
    let asset_id = asset.id;
    fx.assets.insert(asset);

    // The client is still uploading; defer as often as it takes.
    for _ in 0..5 {
        let outcome = fx.handler.handle(&transcode_job(asset_id)).await.unwrap();
        assert_eq!(outcome, JobOutcome::Deferred);
    }

    let current = fx.assets.snapshot(asset_id).unwrap();
    assert_eq!(current.state, MediaAssetState::Uploaded);
    assert_eq!(current.processing_attempts, 0);
    assert!(current.error_message.is_none());
}

#[tokio::test]
async fn source_appearing_after_deferral_reaches_ready() {
    let fx = fixture(FakeTranscoder::succeeding(), 3);
    let asset = uploaded_audio_asset(SOURCE_BUCKET, "media/source/audio/lecture.wav");
    let asset_id = asset.id;
    fx.assets.insert(asset);

    let outcome = fx.handler.handle(&transcode_job(asset_id)).await.unwrap();
    assert_eq!(outcome, JobOutcome::Deferred);

    // Upload lands between runs.
    fx.storage.put_object(
        ObjectLocation::new(SOURCE_BUCKET, "media/source/audio/lecture.wav"),
        b"wav-bytes".to_vec(),
        "audio/wav",
    );

    let outcome = fx.handler.handle(&transcode_job(asset_id)).await.unwrap();
    assert_eq!(outcome, JobOutcome::Completed);

    let current = fx.assets.snapshot(asset_id).unwrap();
    assert_eq!(current.state, MediaAssetState::Ready);
    assert!(current.is_playable());
    assert_eq!(
        current.streaming_object_path.as_deref(),
        Some(format!("media/streaming/audio/{}.mp3", asset_id).as_str())
    );
    assert_eq!(current.streaming_storage_bucket.as_deref(), Some(STREAMING_BUCKET));
    assert_eq!(current.processing_attempts, 0);

    // The derivative actually exists where the asset says it does.
    let derivative = ObjectLocation::new(
        STREAMING_BUCKET,
        current.streaming_object_path.as_deref().unwrap(),
    );
    assert_eq!(fx.storage.content_type_of(&derivative).as_deref(), Some("audio/mpeg"));
}

#[tokio::test]
async fn malformed_source_fails_the_asset_terminally() {
    let fx = fixture(
        FakeTranscoder::scripted(vec![Err(TranscodeError::Malformed(
            "truncated header".to_string(),
        ))]),
        3,
    );
    let asset = uploaded_audio_asset(SOURCE_BUCKET, "media/source/audio/bad.wav");
    let asset_id = asset.id;
    fx.assets.insert(asset);
    fx.storage.put_object(
        ObjectLocation::new(SOURCE_BUCKET, "media/source/audio/bad.wav"),
        b"not-a-wav".to_vec(),
        "audio/wav",
    );

    let err = fx.handler.handle(&transcode_job(asset_id)).await.unwrap_err();
    assert!(err.is_terminal());

    let current = fx.assets.snapshot(asset_id).unwrap();
    assert_eq!(current.state, MediaAssetState::Failed);
    assert!(current
        .error_message
        .as_deref()
        .unwrap()
        .contains("truncated header"));
}

#[tokio::test]
async fn transient_failures_exhaust_the_asset_budget() {
    let fx = fixture(
        FakeTranscoder::scripted(vec![
            Err(TranscodeError::Unavailable("codec pool busy".to_string())),
            Err(TranscodeError::Unavailable("codec pool busy".to_string())),
        ]),
        2,
    );
    let asset = uploaded_audio_asset(SOURCE_BUCKET, "media/source/audio/lecture.wav");
    let asset_id = asset.id;
    fx.assets.insert(asset);
    fx.storage.put_object(
        ObjectLocation::new(SOURCE_BUCKET, "media/source/audio/lecture.wav"),
        b"wav-bytes".to_vec(),
        "audio/wav",
    );

    // First failure consumes one attempt and retries.
    let err = fx.handler.handle(&transcode_job(asset_id)).await.unwrap_err();
    assert!(!err.is_terminal());
    let current = fx.assets.snapshot(asset_id).unwrap();
    assert_eq!(current.state, MediaAssetState::Uploaded);
    assert_eq!(current.processing_attempts, 1);

    // Second failure hits the budget and settles the asset for good.
    let err = fx.handler.handle(&transcode_job(asset_id)).await.unwrap_err();
    assert!(err.is_terminal());
    let current = fx.assets.snapshot(asset_id).unwrap();
    assert_eq!(current.state, MediaAssetState::Failed);
    assert_eq!(current.processing_attempts, 2);
}

#[tokio::test]
async fn asset_recovers_after_transient_failure() {
    let fx = fixture(
        FakeTranscoder::scripted(vec![Err(TranscodeError::Unavailable(
            "codec pool busy".to_string(),
        ))]),
        3,
    );
    let asset = uploaded_audio_asset(SOURCE_BUCKET, "media/source/audio/lecture.wav");
    let asset_id = asset.id;
    fx.assets.insert(asset);
    fx.storage.put_object(
        ObjectLocation::new(SOURCE_BUCKET, "media/source/audio/lecture.wav"),
        b"wav-bytes".to_vec(),
        "audio/wav",
    );

    let err = fx.handler.handle(&transcode_job(asset_id)).await.unwrap_err();
    assert!(!err.is_terminal());

    let outcome = fx.handler.handle(&transcode_job(asset_id)).await.unwrap();
    assert_eq!(outcome, JobOutcome::Completed);

    let current = fx.assets.snapshot(asset_id).unwrap();
    assert_eq!(current.state, MediaAssetState::Ready);
    // A success wipes the stale error but keeps the attempt history.
    assert!(current.error_message.is_none());
    assert_eq!(current.processing_attempts, 1);
}

#[tokio::test]
async fn unknown_asset_is_terminal() {
    let fx = fixture(FakeTranscoder::succeeding(), 3);
    let err = fx
        .handler
        .handle(&transcode_job(uuid::Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(err.is_terminal());
}

#[tokio::test]
async fn malformed_payload_is_terminal() {
    let fx = fixture(FakeTranscoder::succeeding(), 3);
    let mut job = transcode_job(uuid::Uuid::new_v4());
    job.payload = serde_json::json!({ "unexpected": "shape" });
    let err = fx.handler.handle(&job).await.unwrap_err();
    assert!(err.is_terminal());
}

#[tokio::test]
async fn already_ready_asset_completes_without_rework() {
    let fx = fixture(FakeTranscoder::succeeding(), 3);
    let mut asset = uploaded_audio_asset(SOURCE_BUCKET, "media/source/audio/lecture.wav");
    asset.state = MediaAssetState::Ready;
    asset.streaming_object_path = Some("media/streaming/audio/existing.mp3".to_string());
    asset.streaming_format = Some("mp3".to_string());
    asset.streaming_storage_bucket = Some(STREAMING_BUCKET.to_string());
    let asset_id = asset.id;
    fx.assets.insert(asset);

    // No source object exists; a ready asset must not need one.
    let outcome = fx.handler.handle(&transcode_job(asset_id)).await.unwrap();
    assert_eq!(outcome, JobOutcome::Completed);
    assert_eq!(
        fx.assets.snapshot(asset_id).unwrap().state,
        MediaAssetState::Ready
    );
}
