use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Which durable queue a job belongs to. Both queues share one table and one
/// worker implementation; the queue discriminator keeps their claims separate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "text")]
#[serde(rename_all = "snake_case")]
pub enum JobQueue {
    WebhookDelivery,
    MediaTranscode,
}

impl Display for JobQueue {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobQueue::WebhookDelivery => write!(f, "webhook_delivery"),
            JobQueue::MediaTranscode => write!(f, "media_transcode"),
        }
    }
}

impl FromStr for JobQueue {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook_delivery" => Ok(JobQueue::WebhookDelivery),
            "media_transcode" => Ok(JobQueue::MediaTranscode),
            _ => Err(anyhow::anyhow!("Invalid job queue: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Failed,
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

/// A durable queue row. `status = processing` implies `locked_at` is set and a
/// single worker owns the job until it completes, reschedules, or the lease
/// expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub queue: JobQueue,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempt: i32,
    pub locked_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Job {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Job {
            id: row.get("id"),
            queue: row
                .get::<String, _>("queue")
                .parse()
                .map_err(|e| sqlx::Error::Decode(format!("Failed to parse queue: {}", e).into()))?,
            payload: row.get("payload"),
            status: row.get("status"),
            attempt: row.get("attempt"),
            locked_at: row.get("locked_at"),
            next_run_at: row.get("next_run_at"),
            last_error: row.get("last_error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

impl Job {
    /// Whether the job is eligible for a claim right now.
    pub fn is_due(&self) -> bool {
        self.status == JobStatus::Pending && self.locked_at.is_none() && self.next_run_at <= Utc::now()
    }

    /// Whether a held lock has outlived its lease and is reclaimable.
    pub fn lock_expired(&self, lease: Duration) -> bool {
        match self.locked_at {
            Some(locked_at) => {
                let elapsed = Utc::now().signed_duration_since(locked_at);
                elapsed.num_seconds() >= lease.as_secs() as i64
            }
            None => false,
        }
    }

    /// Extract the payload as a typed struct, returning an error on failure.
    pub fn try_payload_as<P: JobPayload>(&self) -> Result<P, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Create a payload value from a typed struct.
    pub fn payload_from<P: JobPayload>(payload: &P) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(payload)
    }
}

/// Trait for type-safe job payloads.
pub trait JobPayload: Serialize + for<'de> Deserialize<'de> {
    fn queue() -> JobQueue;
}

/// Inbound third-party webhook event, stored verbatim until delivered to the
/// internal handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventPayload {
    pub event_id: String,
    pub event_type: String,
    pub data: serde_json::Value,
}

impl JobPayload for WebhookEventPayload {
    fn queue() -> JobQueue {
        JobQueue::WebhookDelivery
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodePayload {
    pub media_asset_id: Uuid,
}

impl JobPayload for TranscodePayload {
    fn queue() -> JobQueue {
        JobQueue::MediaTranscode
    }
}

/// Aggregated queue counts for operator tooling.
#[derive(Debug, Serialize)]
pub struct JobStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub failed: i64,
}
