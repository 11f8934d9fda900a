//! The audit pass: normalize, generate candidates, batch-check existence,
//! classify, and (opt-in) apply confirmed rewrites.

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use coursepipe_core::config::ReconcilerConfig;
use coursepipe_core::models::MediaAssetState;
use coursepipe_storage::{ObjectLocation, StorageGateway};

use crate::catalog::{Catalog, CatalogSnapshot};
use crate::normalize::{candidates, normalize_key, Candidate, CandidateKind};
use crate::report::{
    DriftReason, ProposedUpdate, ReconciliationRecord, ReconciliationReport, RecommendedAction,
    RecordCategory, RecordStatus, UpdateTable,
};

/// File extensions the media pipeline knows how to serve. A legacy row
/// pointing at anything else is reported as unsupported rather than guessed
/// at.
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "m4a", "ogg", "mp4", "mov", "webm", "pdf", "png", "jpg", "jpeg",
];

pub struct StorageReconciler {
    storage: Arc<dyn StorageGateway>,
    config: ReconcilerConfig,
}

/// How one row resolved against storage, before report assembly.
struct Classification {
    status: RecordStatus,
    drift_reason: Option<DriftReason>,
    bytes_exist: bool,
    resolved: Option<ObjectLocation>,
    recommended_action: RecommendedAction,
}

impl StorageReconciler {
    pub fn new(storage: Arc<dyn StorageGateway>, config: ReconcilerConfig) -> Self {
        Self { storage, config }
    }

    /// Run the audit against a catalog snapshot. Read-only: the only side
    /// effect is the batched existence check against storage.
    #[tracing::instrument(skip(self, catalog))]
    pub async fn audit(&self, catalog: &dyn Catalog) -> Result<ReconciliationReport> {
        let snapshot = catalog.load().await.context("Failed to load catalog")?;
        tracing::info!(
            legacy = snapshot.legacy.len(),
            pipeline = snapshot.pipeline.len(),
            orphans = snapshot.orphans.len(),
            "Catalog snapshot loaded"
        );

        let existence = self.check_existence(&snapshot).await?;

        let mut records = Vec::new();
        let mut updates = Vec::new();

        for row in &snapshot.legacy {
            let supported = key_is_supported(&row.key);
            let (record, update) = self.classify_row(
                RecordCategory::LegacyLessonMedia,
                row.row_id,
                &row.bucket,
                &row.key,
                supported,
                false,
                UpdateTable::LessonMedia,
                &existence,
            );
            records.push(record);
            updates.extend(update);
        }

        for row in &snapshot.pipeline {
            // Pipeline keys were written by this system; media kind is always
            // supported.
            let (record, update) = self.classify_row(
                RecordCategory::PipelineMediaAsset,
                row.row_id,
                &row.bucket,
                &row.key,
                true,
                row.state == MediaAssetState::Ready,
                UpdateTable::MediaAssets,
                &existence,
            );
            // Rewrites for pipeline rows target the asset, not the join row.
            let update = update.map(|mut u| {
                u.row_id = row.asset_id;
                u
            });
            records.push(record);
            updates.extend(update);
        }

        for row in &snapshot.orphans {
            records.push(self.classify_orphan(row.asset_id, &row.bucket, &row.key, &existence));
        }

        let report = ReconciliationReport::build(records, updates);
        tracing::info!(
            total = report.summary.total_records,
            proposed_updates = report.proposed_updates.len(),
            "Audit complete"
        );
        Ok(report)
    }

    /// Persist a report: confirmed rewrites are applied and hard findings
    /// (missing bytes, unsupported media) are recorded as issue entries.
    /// Only called in apply mode; every update was positively confirmed
    /// against storage during the audit.
    #[tracing::instrument(skip(self, catalog, report))]
    pub async fn apply(
        &self,
        catalog: &dyn Catalog,
        report: &ReconciliationReport,
    ) -> Result<usize> {
        let applied = if report.proposed_updates.is_empty() {
            0
        } else {
            catalog
                .apply(&report.proposed_updates, self.config.apply_batch_size)
                .await
                .context("Failed to apply proposed updates")?
        };

        if !report.issues.is_empty() {
            let recorded = catalog
                .record_issues(&report.issues)
                .await
                .context("Failed to record audit issues")?;
            tracing::info!(recorded = recorded, "Hard findings recorded");
        }

        tracing::info!(applied = applied, "Catalog updates applied");
        Ok(applied)
    }

    /// One batched existence check covering every candidate of every row.
    async fn check_existence(
        &self,
        snapshot: &CatalogSnapshot,
    ) -> Result<HashMap<ObjectLocation, bool>> {
        let mut unique: HashSet<ObjectLocation> = HashSet::new();
        let mut collect = |bucket: &str, key: &str| {
            let normalized = normalize_key(key, &self.config.proxy_prefixes);
            for candidate in candidates(bucket, &normalized, &self.config.known_buckets) {
                unique.insert(candidate.location);
            }
        };

        for row in &snapshot.legacy {
            collect(&row.bucket, &row.key);
        }
        for row in &snapshot.pipeline {
            collect(&row.bucket, &row.key);
        }
        for row in &snapshot.orphans {
            collect(&row.bucket, &row.key);
        }

        if unique.is_empty() {
            return Ok(HashMap::new());
        }

        let locations: Vec<ObjectLocation> = unique.into_iter().collect();
        tracing::debug!(candidates = locations.len(), "Checking candidate existence");
        self.storage
            .exists_batch(&locations)
            .await
            .context("Batched existence check failed")
    }

    #[allow(clippy::too_many_arguments)]
    fn classify_row(
        &self,
        category: RecordCategory,
        row_id: Uuid,
        bucket: &str,
        recorded_key: &str,
        supported: bool,
        asset_ready: bool,
        table: UpdateTable,
        existence: &HashMap<ObjectLocation, bool>,
    ) -> (ReconciliationRecord, Option<ProposedUpdate>) {
        let classification = if supported {
            self.resolve(bucket, recorded_key, existence)
        } else {
            Classification {
                status: RecordStatus::Unsupported,
                drift_reason: None,
                bytes_exist: false,
                resolved: None,
                recommended_action: RecommendedAction::Investigate,
            }
        };

        // Legacy rows that are fine stay legacy; that is a migration choice,
        // not drift.
        let status = match (category, classification.status) {
            (RecordCategory::LegacyLessonMedia, RecordStatus::Ok) => RecordStatus::OkLegacy,
            (_, status) => status,
        };

        let update = match (&classification.resolved, status) {
            (Some(resolved), RecordStatus::NeedsMigration) => Some(ProposedUpdate {
                table,
                row_id,
                set_bucket: resolved.bucket.clone(),
                set_key: resolved.key.clone(),
            }),
            _ => None,
        };

        // The editor reaches media through authoring tools, which can chase a
        // confirmed location. The viewer only gets what the catalog serves
        // as-is: for legacy rows the recorded pointer must resolve unchanged,
        // for pipeline rows the streaming derivative must exist, which is
        // exactly the `ready` state.
        let editor_resolvable = classification.bytes_exist;
        let viewer_resolvable = match category {
            RecordCategory::LegacyLessonMedia => {
                matches!(status, RecordStatus::Ok | RecordStatus::OkLegacy)
            }
            RecordCategory::PipelineMediaAsset => asset_ready,
            RecordCategory::Orphan => false,
        };

        let record = ReconciliationRecord {
            category,
            row_id,
            recorded_bucket: bucket.to_string(),
            recorded_key: recorded_key.to_string(),
            status,
            drift_reason: classification.drift_reason,
            bytes_exist: classification.bytes_exist,
            editor_resolvable,
            viewer_resolvable,
            resolved_bucket: classification.resolved.as_ref().map(|l| l.bucket.clone()),
            resolved_key: classification.resolved.as_ref().map(|l| l.key.clone()),
            recommended_action: classification.recommended_action,
        };

        (record, update)
    }

    fn classify_orphan(
        &self,
        asset_id: Uuid,
        bucket: &str,
        key: &str,
        existence: &HashMap<ObjectLocation, bool>,
    ) -> ReconciliationRecord {
        // Orphans are advisory only; existence is recorded for the operator
        // but never drives an update or a delete.
        let resolution = self.resolve(bucket, key, existence);
        ReconciliationRecord {
            category: RecordCategory::Orphan,
            row_id: asset_id,
            recorded_bucket: bucket.to_string(),
            recorded_key: key.to_string(),
            status: RecordStatus::Orphaned,
            drift_reason: None,
            bytes_exist: resolution.bytes_exist,
            editor_resolvable: resolution.bytes_exist,
            // Nothing references an orphan, so no viewer can reach it.
            viewer_resolvable: false,
            resolved_bucket: None,
            resolved_key: None,
            recommended_action: RecommendedAction::SafeToDelete,
        }
    }

    /// Resolve one recorded `(bucket, key)` against the existence map.
    fn resolve(
        &self,
        bucket: &str,
        recorded_key: &str,
        existence: &HashMap<ObjectLocation, bool>,
    ) -> Classification {
        let normalized = normalize_key(recorded_key, &self.config.proxy_prefixes);
        let cands = candidates(bucket, &normalized, &self.config.known_buckets);

        let exists =
            |location: &ObjectLocation| existence.get(location).copied().unwrap_or(false);

        let hit = |kind: CandidateKind| -> Option<&Candidate> {
            cands.iter().find(|c| c.kind == kind && exists(&c.location))
        };

        let has_self_prefix = cands
            .iter()
            .any(|c| c.kind == CandidateKind::StrippedSelfPrefix);

        if let Some(stripped) = hit(CandidateKind::StrippedSelfPrefix) {
            // The stripped form exists; rewriting the key is safe even if the
            // prefixed form also resolves.
            return Classification {
                status: RecordStatus::NeedsMigration,
                drift_reason: Some(DriftReason::KeyFormatDrift),
                bytes_exist: true,
                resolved: Some(stripped.location.clone()),
                recommended_action: RecommendedAction::RewriteKey,
            };
        }

        if let Some(raw) = hit(CandidateKind::Normalized) {
            if has_self_prefix {
                // The bucket-prefixed key matches as-is but its stripped form
                // does not. Two objects could be in play; refuse to guess.
                return Classification {
                    status: RecordStatus::ManualReview,
                    drift_reason: Some(DriftReason::KeyFormatDrift),
                    bytes_exist: true,
                    resolved: None,
                    recommended_action: RecommendedAction::Investigate,
                };
            }
            if normalized == recorded_key {
                return Classification {
                    status: RecordStatus::Ok,
                    drift_reason: None,
                    bytes_exist: true,
                    resolved: Some(raw.location.clone()),
                    recommended_action: RecommendedAction::None,
                };
            }
            // A URL or proxy prefix was recorded; the canonical key resolves.
            return Classification {
                status: RecordStatus::NeedsMigration,
                drift_reason: Some(DriftReason::KeyFormatDrift),
                bytes_exist: true,
                resolved: Some(raw.location.clone()),
                recommended_action: RecommendedAction::RewriteKey,
            };
        }

        if let Some(alternate) = hit(CandidateKind::AlternateBucket) {
            return Classification {
                status: RecordStatus::NeedsMigration,
                drift_reason: Some(DriftReason::BucketMismatch),
                bytes_exist: true,
                resolved: Some(alternate.location.clone()),
                recommended_action: RecommendedAction::RewriteBucketAndKey,
            };
        }

        Classification {
            status: RecordStatus::MissingBytes,
            drift_reason: None,
            bytes_exist: false,
            resolved: None,
            recommended_action: RecommendedAction::Investigate,
        }
    }
}

fn key_is_supported(key: &str) -> bool {
    key.rsplit('.')
        .next()
        .map(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_extensions_are_case_insensitive() {
        assert!(key_is_supported("audio/x.wav"));
        assert!(key_is_supported("video/y.MP4"));
        assert!(!key_is_supported("archive/z.tar.gz"));
        assert!(!key_is_supported("no-extension"));
    }
}
