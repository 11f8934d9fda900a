//! Audit report types.
//!
//! The report's JSON form is diffed across runs, so serialization must be
//! deterministic: fixed struct field order, `BTreeMap` summaries, records
//! sorted by `(category, row_id)`, and no timestamps.

use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordCategory {
    LegacyLessonMedia,
    PipelineMediaAsset,
    Orphan,
}

impl RecordCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordCategory::LegacyLessonMedia => "legacy_lesson_media",
            RecordCategory::PipelineMediaAsset => "pipeline_media_asset",
            RecordCategory::Orphan => "orphan",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Recorded location matches storage exactly.
    Ok,
    /// A legacy row whose recorded location matches storage; fine as-is but a
    /// candidate for eventual pipeline migration.
    OkLegacy,
    /// Bytes found under a corrected location; catalog rewrite is safe.
    NeedsMigration,
    /// No candidate location holds the bytes.
    MissingBytes,
    /// Media kind the pipeline does not handle.
    Unsupported,
    /// Resolution is ambiguous; a human has to look.
    ManualReview,
    /// No referencing parent row.
    Orphaned,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Ok => "ok",
            RecordStatus::OkLegacy => "ok_legacy",
            RecordStatus::NeedsMigration => "needs_migration",
            RecordStatus::MissingBytes => "missing_bytes",
            RecordStatus::Unsupported => "unsupported",
            RecordStatus::ManualReview => "manual_review",
            RecordStatus::Orphaned => "orphaned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftReason {
    /// Same bucket, key recorded in a stale encoding.
    KeyFormatDrift,
    /// Key was written with the wrong bucket context.
    BucketMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    None,
    RewriteKey,
    RewriteBucketAndKey,
    Investigate,
    /// Advisory only; the reconciler never deletes anything.
    SafeToDelete,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::None => "none",
            RecommendedAction::RewriteKey => "rewrite_key",
            RecommendedAction::RewriteBucketAndKey => "rewrite_bucket_and_key",
            RecommendedAction::Investigate => "investigate",
            RecommendedAction::SafeToDelete => "safe_to_delete",
        }
    }
}

/// Which catalog table a proposed update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateTable {
    LessonMedia,
    MediaAssets,
}

/// A catalog rewrite the audit positively confirmed to be safe: the bytes
/// exist at `(set_bucket, set_key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProposedUpdate {
    pub table: UpdateTable,
    pub row_id: Uuid,
    pub set_bucket: String,
    pub set_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationRecord {
    pub category: RecordCategory,
    pub row_id: Uuid,
    pub recorded_bucket: String,
    pub recorded_key: String,
    pub status: RecordStatus,
    pub drift_reason: Option<DriftReason>,
    /// True only when some candidate location was confirmed to hold bytes.
    pub bytes_exist: bool,
    /// The content editor can reach the media through authoring tools: the
    /// bytes were confirmed to exist somewhere, even if the catalog pointer
    /// needs a rewrite first.
    pub editor_resolvable: bool,
    /// The end viewer can play the media right now through the delivery path
    /// as the catalog stands, without any repair.
    pub viewer_resolvable: bool,
    pub resolved_bucket: Option<String>,
    pub resolved_key: Option<String>,
    pub recommended_action: RecommendedAction,
}

/// A hard finding the apply path persists: the bytes are gone or the media
/// kind is unserveable, and no automatic rewrite can repair either. Recorded,
/// never acted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationIssue {
    pub category: RecordCategory,
    pub row_id: Uuid,
    pub status: RecordStatus,
    pub recorded_bucket: String,
    pub recorded_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub total_records: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub by_recommended_action: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub summary: ReportSummary,
    pub records: Vec<ReconciliationRecord>,
    pub proposed_updates: Vec<ProposedUpdate>,
    pub issues: Vec<ReconciliationIssue>,
}

impl ReconciliationReport {
    /// Assemble a report from classified records, enforcing the deterministic
    /// ordering the JSON contract requires.
    pub fn build(
        mut records: Vec<ReconciliationRecord>,
        mut proposed_updates: Vec<ProposedUpdate>,
    ) -> Self {
        records.sort_by(|a, b| (a.category, a.row_id).cmp(&(b.category, b.row_id)));
        proposed_updates.sort_by(|a, b| a.row_id.cmp(&b.row_id));

        // Hard findings; the apply path records these instead of touching the
        // catalog. Derived from the sorted records, so the list is ordered.
        let issues: Vec<ReconciliationIssue> = records
            .iter()
            .filter(|r| {
                matches!(
                    r.status,
                    RecordStatus::MissingBytes | RecordStatus::Unsupported
                )
            })
            .map(|r| ReconciliationIssue {
                category: r.category,
                row_id: r.row_id,
                status: r.status,
                recorded_bucket: r.recorded_bucket.clone(),
                recorded_key: r.recorded_key.clone(),
            })
            .collect();

        let mut by_category = BTreeMap::new();
        let mut by_status = BTreeMap::new();
        let mut by_recommended_action = BTreeMap::new();
        for record in &records {
            *by_category
                .entry(record.category.as_str().to_string())
                .or_insert(0) += 1;
            *by_status
                .entry(record.status.as_str().to_string())
                .or_insert(0) += 1;
            *by_recommended_action
                .entry(record.recommended_action.as_str().to_string())
                .or_insert(0) += 1;
        }

        Self {
            summary: ReportSummary {
                total_records: records.len(),
                by_category,
                by_status,
                by_recommended_action,
            },
            records,
            proposed_updates,
            issues,
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
