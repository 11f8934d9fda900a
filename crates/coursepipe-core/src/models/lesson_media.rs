use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Associates media with a lesson at an ordering position.
///
/// `(lesson_id, position)` is unique. The entry is created at upload time,
/// before transcoding completes; consumers must check the referenced asset's
/// state before rendering.
///
/// Exactly one of `media_asset_id` (pipeline-backed) or `legacy_object_path`
/// (direct storage reference from before the pipeline existed) is set.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LessonMediaEntry {
    pub id: Uuid,
    pub lesson_id: Uuid,
    pub position: i32,
    pub media_asset_id: Option<Uuid>,
    pub legacy_storage_bucket: Option<String>,
    pub legacy_object_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The storage source behind a lesson media entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LessonMediaSource {
    Pipeline { media_asset_id: Uuid },
    Legacy { bucket: String, object_path: String },
}

impl LessonMediaEntry {
    pub fn source(&self) -> Option<LessonMediaSource> {
        if let Some(asset_id) = self.media_asset_id {
            return Some(LessonMediaSource::Pipeline {
                media_asset_id: asset_id,
            });
        }
        match (&self.legacy_storage_bucket, &self.legacy_object_path) {
            (Some(bucket), Some(path)) => Some(LessonMediaSource::Legacy {
                bucket: bucket.clone(),
                object_path: path.clone(),
            }),
            _ => None,
        }
    }
}

/// Input for creating an entry; the position is allocated by the repository.
#[derive(Debug, Clone)]
pub enum NewLessonMediaEntry {
    Pipeline { media_asset_id: Uuid },
    Legacy { bucket: String, object_path: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(asset: Option<Uuid>, legacy: Option<(&str, &str)>) -> LessonMediaEntry {
        LessonMediaEntry {
            id: Uuid::new_v4(),
            lesson_id: Uuid::new_v4(),
            position: 1,
            media_asset_id: asset,
            legacy_storage_bucket: legacy.map(|(b, _)| b.to_string()),
            legacy_object_path: legacy.map(|(_, p)| p.to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn pipeline_entry_resolves_to_asset_source() {
        let asset_id = Uuid::new_v4();
        let e = entry(Some(asset_id), None);
        assert_eq!(
            e.source(),
            Some(LessonMediaSource::Pipeline {
                media_asset_id: asset_id
            })
        );
    }

    #[test]
    fn legacy_entry_resolves_to_direct_storage() {
        let e = entry(None, Some(("course-media", "media/lesson/old.mp3")));
        assert_eq!(
            e.source(),
            Some(LessonMediaSource::Legacy {
                bucket: "course-media".to_string(),
                object_path: "media/lesson/old.mp3".to_string(),
            })
        );
    }

    #[test]
    fn entry_with_no_source_resolves_to_none() {
        assert_eq!(entry(None, None).source(), None);
    }
}
