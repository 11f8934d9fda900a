use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use coursepipe_core::models::{MediaAsset, NewMediaAsset, StreamingOutput};
use coursepipe_core::store::MediaAssetStore;

use crate::db::database::Database;

/// Repository for the media-asset catalog.
///
/// State transitions: `uploaded -> processing -> ready | failed`, plus the
/// deferral reset `processing -> uploaded` that leaves `processing_attempts`
/// untouched. The `streaming_*` columns are written only by `set_ready`.
#[derive(Clone)]
pub struct MediaAssetRepository {
    pool: PgPool,
}

const ASSET_COLUMNS: &str = r#"
    id, owner_id, course_id, lesson_id, media_type, purpose,
    original_object_path, original_content_type, original_filename,
    original_size_bytes, storage_bucket, state,
    streaming_object_path, streaming_format, streaming_storage_bucket,
    duration_seconds, codec, processing_attempts, error_message,
    created_at, updated_at
"#;

impl MediaAssetRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Create an asset in `uploaded` state at upload intake.
    #[tracing::instrument(skip(self, new_asset))]
    pub async fn create(&self, new_asset: &NewMediaAsset) -> Result<MediaAsset> {
        let asset: MediaAsset = sqlx::query_as::<Postgres, MediaAsset>(&format!(
            r#"
            INSERT INTO media_assets (
                owner_id, course_id, lesson_id, media_type, purpose,
                original_object_path, original_content_type, original_filename,
                original_size_bytes, storage_bucket, state
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'uploaded')
            RETURNING {ASSET_COLUMNS}
            "#
        ))
        .bind(new_asset.owner_id)
        .bind(new_asset.course_id)
        .bind(new_asset.lesson_id)
        .bind(new_asset.media_type)
        .bind(new_asset.purpose.to_string())
        .bind(&new_asset.original_object_path)
        .bind(&new_asset.original_content_type)
        .bind(&new_asset.original_filename)
        .bind(new_asset.original_size_bytes)
        .bind(&new_asset.storage_bucket)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert media asset")?;

        tracing::info!(
            asset_id = %asset.id,
            media_type = %asset.media_type,
            purpose = %asset.purpose,
            "Media asset created"
        );

        Ok(asset)
    }

    /// Assets for lesson-detail rendering, ready or not. Consumers check
    /// `state`; a processing asset renders as "not yet playable".
    #[tracing::instrument(skip(self))]
    pub async fn list_for_lesson(&self, lesson_id: Uuid) -> Result<Vec<MediaAsset>> {
        let assets = sqlx::query_as::<Postgres, MediaAsset>(&format!(
            r#"
            SELECT {ASSET_COLUMNS}
            FROM media_assets
            WHERE lesson_id = $1
            ORDER BY created_at ASC
            "#
        ))
        .bind(lesson_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list media assets for lesson")?;

        Ok(assets)
    }
}

#[async_trait]
impl MediaAssetStore for MediaAssetRepository {
    async fn get(&self, id: Uuid) -> Result<Option<MediaAsset>> {
        let asset = sqlx::query_as::<Postgres, MediaAsset>(&format!(
            "SELECT {ASSET_COLUMNS} FROM media_assets WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch media asset")?;

        Ok(asset)
    }

    #[tracing::instrument(skip(self))]
    async fn mark_processing(&self, id: Uuid) -> Result<MediaAsset> {
        // Re-entering from 'processing' is allowed: a reclaimed job redoes the
        // work from scratch.
        let asset = sqlx::query_as::<Postgres, MediaAsset>(&format!(
            r#"
            UPDATE media_assets
            SET state = 'processing',
                updated_at = NOW()
            WHERE id = $1
                AND state IN ('uploaded', 'processing')
            RETURNING {ASSET_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to mark media asset processing - not in a claimable state")?;

        Ok(asset)
    }

    #[tracing::instrument(skip(self))]
    async fn mark_uploaded(&self, id: Uuid) -> Result<MediaAsset> {
        let asset = sqlx::query_as::<Postgres, MediaAsset>(&format!(
            r#"
            UPDATE media_assets
            SET state = 'uploaded',
                updated_at = NOW()
            WHERE id = $1
            RETURNING {ASSET_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to defer media asset")?;

        tracing::debug!(asset_id = %id, "Media asset deferred, source not yet visible");

        Ok(asset)
    }

    #[tracing::instrument(skip(self, output))]
    async fn mark_ready(&self, id: Uuid, output: &StreamingOutput) -> Result<MediaAsset> {
        let asset = sqlx::query_as::<Postgres, MediaAsset>(&format!(
            r#"
            UPDATE media_assets
            SET state = 'ready',
                streaming_object_path = $2,
                streaming_format = $3,
                streaming_storage_bucket = $4,
                duration_seconds = $5,
                codec = $6,
                error_message = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {ASSET_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&output.object_path)
        .bind(&output.format)
        .bind(&output.storage_bucket)
        .bind(output.duration_seconds)
        .bind(&output.codec)
        .fetch_one(&self.pool)
        .await
        .context("Failed to mark media asset ready")?;

        tracing::info!(
            asset_id = %id,
            streaming_object_path = %output.object_path,
            duration_seconds = output.duration_seconds,
            "Media asset ready"
        );

        Ok(asset)
    }

    #[tracing::instrument(skip(self))]
    async fn record_failure(&self, id: Uuid, error: &str) -> Result<MediaAsset> {
        let asset = sqlx::query_as::<Postgres, MediaAsset>(&format!(
            r#"
            UPDATE media_assets
            SET state = 'uploaded',
                processing_attempts = processing_attempts + 1,
                error_message = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {ASSET_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(error)
        .fetch_one(&self.pool)
        .await
        .context("Failed to record media asset failure")?;

        tracing::warn!(
            asset_id = %id,
            processing_attempts = asset.processing_attempts,
            "Media asset processing failure recorded"
        );

        Ok(asset)
    }

    #[tracing::instrument(skip(self))]
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<MediaAsset> {
        let asset = sqlx::query_as::<Postgres, MediaAsset>(&format!(
            r#"
            UPDATE media_assets
            SET state = 'failed',
                error_message = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {ASSET_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(error)
        .fetch_one(&self.pool)
        .await
        .context("Failed to mark media asset failed")?;

        tracing::error!(asset_id = %id, error = error, "Media asset failed terminally");

        Ok(asset)
    }
}
