use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use coursepipe_core::error::AllocationExhausted;
use coursepipe_core::models::{LessonMediaEntry, NewLessonMediaEntry};

use crate::db::database::Database;

/// Bounded number of position-allocation retries before giving up. Allocation
/// recomputes a fresh position on every conflict instead of locking the
/// lesson, so concurrent uploads to unrelated lessons never serialize.
pub const MAX_POSITION_ATTEMPTS: u32 = 5;

/// Postgres unique-violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct LessonMediaRepository {
    pool: PgPool,
}

impl LessonMediaRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    /// Create a lesson media entry at the next free ordering position.
    ///
    /// Concurrent callers may compute the same "next" position before either
    /// commits; the `(lesson_id, position)` uniqueness constraint rejects the
    /// loser, which retries with a freshly recomputed position. The loop is
    /// bounded and any error other than a uniqueness violation on that
    /// constraint propagates unchanged.
    #[tracing::instrument(skip(self, entry))]
    pub async fn create_at_next_position(
        &self,
        lesson_id: Uuid,
        entry: &NewLessonMediaEntry,
    ) -> Result<LessonMediaEntry> {
        allocate_position(
            lesson_id,
            MAX_POSITION_ATTEMPTS,
            || self.next_position(lesson_id),
            |position| self.insert_at(lesson_id, position, entry),
        )
        .await
    }

    async fn next_position(&self, lesson_id: Uuid) -> Result<i32> {
        sqlx::query_scalar::<Postgres, i32>(
            r#"
            SELECT COALESCE(MAX(position), 0) + 1
            FROM lesson_media
            WHERE lesson_id = $1
            "#,
        )
        .bind(lesson_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute next lesson media position")
    }

    async fn insert_at(
        &self,
        lesson_id: Uuid,
        position: i32,
        entry: &NewLessonMediaEntry,
    ) -> Result<LessonMediaEntry, sqlx::Error> {
        let (media_asset_id, legacy_bucket, legacy_path) = match entry {
            NewLessonMediaEntry::Pipeline { media_asset_id } => {
                (Some(*media_asset_id), None, None)
            }
            NewLessonMediaEntry::Legacy {
                bucket,
                object_path,
            } => (None, Some(bucket.as_str()), Some(object_path.as_str())),
        };

        sqlx::query_as::<Postgres, LessonMediaEntry>(
            r#"
            INSERT INTO lesson_media (
                lesson_id, position, media_asset_id,
                legacy_storage_bucket, legacy_object_path
            )
            VALUES ($1, $2, $3, $4, $5)
            RETURNING
                id, lesson_id, position, media_asset_id,
                legacy_storage_bucket, legacy_object_path, created_at
            "#,
        )
        .bind(lesson_id)
        .bind(position)
        .bind(media_asset_id)
        .bind(legacy_bucket)
        .bind(legacy_path)
        .fetch_one(&self.pool)
        .await
    }

    /// Entries for a lesson in display order.
    #[tracing::instrument(skip(self))]
    pub async fn list_for_lesson(&self, lesson_id: Uuid) -> Result<Vec<LessonMediaEntry>> {
        let entries = sqlx::query_as::<Postgres, LessonMediaEntry>(
            r#"
            SELECT
                id, lesson_id, position, media_asset_id,
                legacy_storage_bucket, legacy_object_path, created_at
            FROM lesson_media
            WHERE lesson_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(lesson_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list lesson media")?;

        Ok(entries)
    }
}

/// The recompute-insert-retry loop, bounded at `max_attempts`. Conflicts on
/// the ordering constraint recompute and retry; every other insert error
/// propagates unchanged.
async fn allocate_position<T, P, PF, I, IF>(
    lesson_id: Uuid,
    max_attempts: u32,
    mut next_position: P,
    mut insert_at: I,
) -> Result<T>
where
    P: FnMut() -> PF,
    PF: std::future::Future<Output = Result<i32>>,
    I: FnMut(i32) -> IF,
    IF: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    for attempt in 1..=max_attempts {
        let position = next_position().await?;

        match insert_at(position).await {
            Ok(created) => {
                tracing::debug!(
                    lesson_id = %lesson_id,
                    position = position,
                    attempt = attempt,
                    "Lesson media position allocated"
                );
                return Ok(created);
            }
            Err(e) if is_position_conflict(&e) => {
                tracing::debug!(
                    lesson_id = %lesson_id,
                    position = position,
                    attempt = attempt,
                    "Position conflict, recomputing"
                );
                continue;
            }
            Err(e) => return Err(e).context("Failed to insert lesson media entry"),
        }
    }

    Err(AllocationExhausted {
        lesson_id,
        attempts: max_attempts,
    }
    .into())
}

/// True only for a uniqueness violation on the `(lesson_id, position)`
/// constraint; any other error must propagate to the caller.
fn is_position_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some(UNIQUE_VIOLATION)
                && db_err
                    .constraint()
                    .map(|c| c.contains("lesson_id") && c.contains("position"))
                    .unwrap_or(false)
        }
        _ => false,
    }
}
