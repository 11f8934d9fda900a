//! Offline storage reconciliation.
//!
//! An idempotent audit pass that compares what the catalog says about
//! lesson media with what object storage actually contains, classifies the
//! drift, and proposes non-destructive repairs. Dry-run by default; nothing
//! here ever deletes a row or an object.

pub mod catalog;
pub mod normalize;
pub mod pg;
pub mod reconciler;
pub mod report;

pub use catalog::{Catalog, CatalogSnapshot, LegacyMediaRow, OrphanAssetRow, PipelineMediaRow};
pub use pg::PgCatalog;
pub use reconciler::StorageReconciler;
pub use report::{
    DriftReason, ProposedUpdate, ReconciliationIssue, ReconciliationRecord, ReconciliationReport,
    RecommendedAction, RecordCategory, RecordStatus, ReportSummary, UpdateTable,
};
