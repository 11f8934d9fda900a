//! Test helpers: an in-memory catalog over a fixed snapshot.
//!
//! Run from workspace root: `cargo test -p coursepipe-reconcile`.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Mutex;

use coursepipe_reconcile::{
    Catalog, CatalogSnapshot, LegacyMediaRow, OrphanAssetRow, PipelineMediaRow, ProposedUpdate,
    ReconciliationIssue, UpdateTable,
};

pub struct MemoryCatalog {
    snapshot: Mutex<CatalogSnapshot>,
    pub applied: Mutex<Vec<ProposedUpdate>>,
    pub batch_sizes: Mutex<Vec<usize>>,
    pub issues: Mutex<Vec<ReconciliationIssue>>,
}

impl MemoryCatalog {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            applied: Mutex::new(Vec::new()),
            batch_sizes: Mutex::new(Vec::new()),
            issues: Mutex::new(Vec::new()),
        }
    }

    pub fn applied_count(&self) -> usize {
        self.applied.lock().unwrap().len()
    }

    pub fn recorded_issues(&self) -> Vec<ReconciliationIssue> {
        self.issues.lock().unwrap().clone()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn load(&self) -> anyhow::Result<CatalogSnapshot> {
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn apply(&self, updates: &[ProposedUpdate], batch_size: usize) -> anyhow::Result<usize> {
        let mut snapshot = self.snapshot.lock().unwrap();
        for chunk in updates.chunks(batch_size.max(1)) {
            self.batch_sizes.lock().unwrap().push(chunk.len());
            for update in chunk {
                match update.table {
                    UpdateTable::LessonMedia => {
                        if let Some(row) = snapshot
                            .legacy
                            .iter_mut()
                            .find(|r| r.row_id == update.row_id)
                        {
                            row.bucket = update.set_bucket.clone();
                            row.key = update.set_key.clone();
                        }
                    }
                    UpdateTable::MediaAssets => {
                        if let Some(row) = snapshot
                            .pipeline
                            .iter_mut()
                            .find(|r| r.asset_id == update.row_id)
                        {
                            row.bucket = update.set_bucket.clone();
                            row.key = update.set_key.clone();
                        }
                    }
                }
                self.applied.lock().unwrap().push(update.clone());
            }
        }
        Ok(updates.len())
    }

    async fn record_issues(&self, issues: &[ReconciliationIssue]) -> anyhow::Result<usize> {
        let mut recorded = self.issues.lock().unwrap();
        // Mirrors the upsert: one entry per (category, row, status).
        for issue in issues {
            if let Some(existing) = recorded.iter_mut().find(|i| {
                i.category == issue.category && i.row_id == issue.row_id && i.status == issue.status
            }) {
                *existing = issue.clone();
            } else {
                recorded.push(issue.clone());
            }
        }
        Ok(issues.len())
    }
}

pub fn legacy_row(id: u128, bucket: &str, key: &str) -> LegacyMediaRow {
    LegacyMediaRow {
        row_id: uuid::Uuid::from_u128(id),
        lesson_id: uuid::Uuid::from_u128(id + 1000),
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

pub fn pipeline_row(id: u128, bucket: &str, key: &str) -> PipelineMediaRow {
    pipeline_row_in_state(
        id,
        bucket,
        key,
        coursepipe_core::models::MediaAssetState::Uploaded,
    )
}

pub fn pipeline_row_in_state(
    id: u128,
    bucket: &str,
    key: &str,
    state: coursepipe_core::models::MediaAssetState,
) -> PipelineMediaRow {
    PipelineMediaRow {
        row_id: uuid::Uuid::from_u128(id),
        asset_id: uuid::Uuid::from_u128(id + 5000),
        media_type: coursepipe_core::models::MediaType::Audio,
        state,
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

pub fn orphan_row(id: u128, bucket: &str, key: &str) -> OrphanAssetRow {
    OrphanAssetRow {
        asset_id: uuid::Uuid::from_u128(id),
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}
