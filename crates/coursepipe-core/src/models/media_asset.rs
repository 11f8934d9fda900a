use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Media type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "media_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
    Image,
    Document,
}

impl Display for MediaType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MediaType::Audio => write!(f, "audio"),
            MediaType::Video => write!(f, "video"),
            MediaType::Image => write!(f, "image"),
            MediaType::Document => write!(f, "document"),
        }
    }
}

impl FromStr for MediaType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(MediaType::Audio),
            "video" => Ok(MediaType::Video),
            "image" => Ok(MediaType::Image),
            "document" => Ok(MediaType::Document),
            _ => Err(anyhow::anyhow!("Invalid media type: {}", s)),
        }
    }
}

/// What role the asset plays inside a course. Stored as text; parsed at the
/// repository boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaPurpose {
    LessonAudio,
    LessonVideo,
    LessonAttachment,
    CourseCover,
}

impl Display for MediaPurpose {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MediaPurpose::LessonAudio => write!(f, "lesson_audio"),
            MediaPurpose::LessonVideo => write!(f, "lesson_video"),
            MediaPurpose::LessonAttachment => write!(f, "lesson_attachment"),
            MediaPurpose::CourseCover => write!(f, "course_cover"),
        }
    }
}

impl FromStr for MediaPurpose {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lesson_audio" => Ok(MediaPurpose::LessonAudio),
            "lesson_video" => Ok(MediaPurpose::LessonVideo),
            "lesson_attachment" => Ok(MediaPurpose::LessonAttachment),
            "course_cover" => Ok(MediaPurpose::CourseCover),
            _ => Err(anyhow::anyhow!("Invalid media purpose: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "media_asset_state", rename_all = "lowercase")]
#[serde(rename_all = "snake_case")]
pub enum MediaAssetState {
    Uploaded,
    Processing,
    Ready,
    Failed,
}

impl Display for MediaAssetState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MediaAssetState::Uploaded => write!(f, "uploaded"),
            MediaAssetState::Processing => write!(f, "processing"),
            MediaAssetState::Ready => write!(f, "ready"),
            MediaAssetState::Failed => write!(f, "failed"),
        }
    }
}

/// An uploaded source object tracked through transcoding to a playable
/// derivative.
///
/// Invariant: the `streaming_*` fields are populated iff `state == Ready`.
/// `processing_attempts` counts genuine failures only; a source object that is
/// not yet visible in storage defers the asset without consuming the budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub course_id: Uuid,
    pub lesson_id: Option<Uuid>,
    pub media_type: MediaType,
    pub purpose: MediaPurpose,
    pub original_object_path: String,
    pub original_content_type: String,
    pub original_filename: String,
    pub original_size_bytes: i64,
    pub storage_bucket: String,
    pub state: MediaAssetState,
    pub streaming_object_path: Option<String>,
    pub streaming_format: Option<String>,
    pub streaming_storage_bucket: Option<String>,
    pub duration_seconds: Option<f64>,
    pub codec: Option<String>,
    pub processing_attempts: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for MediaAsset {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(MediaAsset {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            course_id: row.get("course_id"),
            lesson_id: row.get("lesson_id"),
            media_type: row.get("media_type"),
            purpose: row.get::<String, _>("purpose").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse purpose: {}", e).into())
            })?,
            original_object_path: row.get("original_object_path"),
            original_content_type: row.get("original_content_type"),
            original_filename: row.get("original_filename"),
            original_size_bytes: row.get("original_size_bytes"),
            storage_bucket: row.get("storage_bucket"),
            state: row.get("state"),
            streaming_object_path: row.get("streaming_object_path"),
            streaming_format: row.get("streaming_format"),
            streaming_storage_bucket: row.get("streaming_storage_bucket"),
            duration_seconds: row.get("duration_seconds"),
            codec: row.get("codec"),
            processing_attempts: row.get("processing_attempts"),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

impl MediaAsset {
    /// Whether delivery surfaces may hand this asset to a player.
    /// Anything not ready renders as "not yet playable", never as an error.
    pub fn is_playable(&self) -> bool {
        self.state == MediaAssetState::Ready && self.streaming_object_path.is_some()
    }
}

/// Fields supplied by the upload-intake collaborator when an asset is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMediaAsset {
    pub owner_id: Uuid,
    pub course_id: Uuid,
    pub lesson_id: Option<Uuid>,
    pub media_type: MediaType,
    pub purpose: MediaPurpose,
    pub original_object_path: String,
    pub original_content_type: String,
    pub original_filename: String,
    pub original_size_bytes: i64,
    pub storage_bucket: String,
}

/// Derivative metadata captured when transcoding succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingOutput {
    pub object_path: String,
    pub format: String,
    pub storage_bucket: String,
    pub duration_seconds: f64,
    pub codec: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(state: MediaAssetState, streaming_path: Option<&str>) -> MediaAsset {
        MediaAsset {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            lesson_id: Some(Uuid::new_v4()),
            media_type: MediaType::Audio,
            purpose: MediaPurpose::LessonAudio,
            original_object_path: "media/source/audio/x.wav".to_string(),
            original_content_type: "audio/wav".to_string(),
            original_filename: "x.wav".to_string(),
            original_size_bytes: 1024,
            storage_bucket: "course-media".to_string(),
            state,
            streaming_object_path: streaming_path.map(String::from),
            streaming_format: streaming_path.map(|_| "mp3".to_string()),
            streaming_storage_bucket: streaming_path.map(|_| "course-media".to_string()),
            duration_seconds: streaming_path.map(|_| 12.5),
            codec: streaming_path.map(|_| "mp3".to_string()),
            processing_attempts: 0,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn ready_asset_with_derivative_is_playable() {
        let a = asset(MediaAssetState::Ready, Some("media/streaming/audio/x.mp3"));
        assert!(a.is_playable());
    }

    #[test]
    fn non_ready_states_are_not_playable() {
        assert!(!asset(MediaAssetState::Uploaded, None).is_playable());
        assert!(!asset(MediaAssetState::Processing, None).is_playable());
        assert!(!asset(MediaAssetState::Failed, None).is_playable());
    }

    #[test]
    fn purpose_round_trips_through_str() {
        for purpose in [
            MediaPurpose::LessonAudio,
            MediaPurpose::LessonVideo,
            MediaPurpose::LessonAttachment,
            MediaPurpose::CourseCover,
        ] {
            assert_eq!(purpose.to_string().parse::<MediaPurpose>().unwrap(), purpose);
        }
    }

    #[test]
    fn media_type_round_trips_through_str() {
        for mt in [
            MediaType::Audio,
            MediaType::Video,
            MediaType::Image,
            MediaType::Document,
        ] {
            assert_eq!(mt.to_string().parse::<MediaType>().unwrap(), mt);
        }
        assert!("hologram".parse::<MediaType>().is_err());
    }
}
