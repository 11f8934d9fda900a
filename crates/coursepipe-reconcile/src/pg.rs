//! Postgres-backed catalog access for the audit.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row};

use coursepipe_core::models::{MediaAssetState, MediaType};
use coursepipe_db::Database;

use crate::catalog::{Catalog, CatalogSnapshot, LegacyMediaRow, OrphanAssetRow, PipelineMediaRow};
use crate::report::{ProposedUpdate, ReconciliationIssue, UpdateTable};

#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    async fn load_legacy(&self) -> Result<Vec<LegacyMediaRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, lesson_id, legacy_storage_bucket, legacy_object_path
            FROM lesson_media
            WHERE legacy_object_path IS NOT NULL
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load legacy lesson media rows")?;

        rows.into_iter()
            .map(|row| {
                Ok(LegacyMediaRow {
                    row_id: row.get("id"),
                    lesson_id: row.get("lesson_id"),
                    bucket: row
                        .get::<Option<String>, _>("legacy_storage_bucket")
                        .unwrap_or_default(),
                    key: row.get::<Option<String>, _>("legacy_object_path").unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn load_pipeline(&self) -> Result<Vec<PipelineMediaRow>> {
        let rows = sqlx::query(
            r#"
            SELECT
                lm.id AS row_id,
                ma.id AS asset_id,
                ma.media_type,
                ma.state,
                ma.storage_bucket,
                ma.original_object_path
            FROM lesson_media lm
            JOIN media_assets ma ON ma.id = lm.media_asset_id
            ORDER BY lm.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load pipeline lesson media rows")?;

        rows.into_iter()
            .map(|row| {
                Ok(PipelineMediaRow {
                    row_id: row.get("row_id"),
                    asset_id: row.get("asset_id"),
                    media_type: row.get::<MediaType, _>("media_type"),
                    state: row.get::<MediaAssetState, _>("state"),
                    bucket: row.get("storage_bucket"),
                    key: row.get("original_object_path"),
                })
            })
            .collect()
    }

    /// Lesson-scoped assets no lesson media entry points at.
    async fn load_orphans(&self) -> Result<Vec<OrphanAssetRow>> {
        let rows = sqlx::query(
            r#"
            SELECT ma.id, ma.storage_bucket, ma.original_object_path
            FROM media_assets ma
            LEFT JOIN lesson_media lm ON lm.media_asset_id = ma.id
            WHERE lm.id IS NULL
                AND ma.purpose LIKE 'lesson_%'
            ORDER BY ma.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load orphan media assets")?;

        rows.into_iter()
            .map(|row| {
                Ok(OrphanAssetRow {
                    asset_id: row.get("id"),
                    bucket: row.get("storage_bucket"),
                    key: row.get("original_object_path"),
                })
            })
            .collect()
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    #[tracing::instrument(skip(self))]
    async fn load(&self) -> Result<CatalogSnapshot> {
        Ok(CatalogSnapshot {
            legacy: self.load_legacy().await?,
            pipeline: self.load_pipeline().await?,
            orphans: self.load_orphans().await?,
        })
    }

    #[tracing::instrument(skip(self, updates))]
    async fn apply(&self, updates: &[ProposedUpdate], batch_size: usize) -> Result<usize> {
        let mut applied = 0usize;
        for chunk in updates.chunks(batch_size.max(1)) {
            let mut tx = self
                .pool
                .begin()
                .await
                .context("Failed to open apply transaction")?;

            for update in chunk {
                let affected = match update.table {
                    UpdateTable::LessonMedia => sqlx::query::<Postgres>(
                        r#"
                        UPDATE lesson_media
                        SET legacy_storage_bucket = $1,
                            legacy_object_path = $2
                        WHERE id = $3
                            AND legacy_object_path IS NOT NULL
                        "#,
                    )
                    .bind(&update.set_bucket)
                    .bind(&update.set_key)
                    .bind(update.row_id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to update lesson media row")?
                    .rows_affected(),
                    UpdateTable::MediaAssets => sqlx::query::<Postgres>(
                        r#"
                        UPDATE media_assets
                        SET storage_bucket = $1,
                            original_object_path = $2,
                            updated_at = NOW()
                        WHERE id = $3
                        "#,
                    )
                    .bind(&update.set_bucket)
                    .bind(&update.set_key)
                    .bind(update.row_id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to update media asset row")?
                    .rows_affected(),
                };
                applied += affected as usize;
            }

            tx.commit().await.context("Failed to commit apply batch")?;
            tracing::debug!(batch = chunk.len(), "Apply batch committed");
        }

        Ok(applied)
    }

    #[tracing::instrument(skip(self, issues))]
    async fn record_issues(&self, issues: &[ReconciliationIssue]) -> Result<usize> {
        let mut recorded = 0usize;
        for issue in issues {
            sqlx::query::<Postgres>(
                r#"
                INSERT INTO reconciliation_issues (
                    category, row_id, status, recorded_bucket, recorded_key
                )
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT ON CONSTRAINT reconciliation_issues_finding_key
                DO UPDATE SET
                    recorded_bucket = EXCLUDED.recorded_bucket,
                    recorded_key = EXCLUDED.recorded_key,
                    last_seen_at = NOW()
                "#,
            )
            .bind(issue.category.as_str())
            .bind(issue.row_id)
            .bind(issue.status.as_str())
            .bind(&issue.recorded_bucket)
            .bind(&issue.recorded_key)
            .execute(&self.pool)
            .await
            .context("Failed to record reconciliation issue")?;
            recorded += 1;
        }

        Ok(recorded)
    }
}
