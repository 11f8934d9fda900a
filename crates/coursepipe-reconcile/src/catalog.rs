//! Catalog access for the audit: the three row sets it reasons about and the
//! trait through which it loads them and applies confirmed rewrites.

use async_trait::async_trait;
use uuid::Uuid;

use coursepipe_core::models::{MediaAssetState, MediaType};

use crate::report::{ProposedUpdate, ReconciliationIssue};

/// A lesson media entry still pointing directly at a storage object.
#[derive(Debug, Clone)]
pub struct LegacyMediaRow {
    pub row_id: Uuid,
    pub lesson_id: Uuid,
    pub bucket: String,
    pub key: String,
}

/// A lesson media entry backed by a pipeline media asset; the audited
/// location is the asset's source object.
#[derive(Debug, Clone)]
pub struct PipelineMediaRow {
    /// The `lesson_media` row id.
    pub row_id: Uuid,
    pub asset_id: Uuid,
    pub media_type: MediaType,
    pub state: MediaAssetState,
    pub bucket: String,
    pub key: String,
}

/// A media asset no lesson media entry references.
#[derive(Debug, Clone)]
pub struct OrphanAssetRow {
    pub asset_id: Uuid,
    pub bucket: String,
    pub key: String,
}

/// Everything the audit looks at, loaded in one pass so the report reflects a
/// single point in time.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    pub legacy: Vec<LegacyMediaRow>,
    pub pipeline: Vec<PipelineMediaRow>,
    pub orphans: Vec<OrphanAssetRow>,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn load(&self) -> anyhow::Result<CatalogSnapshot>;

    /// Persist confirmed rewrites in bounded transactional batches. Returns
    /// the number of rows updated. Never deletes anything.
    async fn apply(&self, updates: &[ProposedUpdate], batch_size: usize) -> anyhow::Result<usize>;

    /// Persist hard findings (missing bytes, unsupported media) so they
    /// survive past the report. Idempotent: re-recording the same finding
    /// refreshes it instead of duplicating it. Returns the number recorded.
    async fn record_issues(&self, issues: &[ReconciliationIssue]) -> anyhow::Result<usize>;
}
