//! Record store contract and in-memory implementation
//!
//! Articles persist as one JSON document per `article_id`. All mutation goes
//! through [`RecordStore::update`], which merges a partial patch into the
//! stored document. Two timestamp rules hold for every backend:
//!
//! - `updated_at` is refreshed on every write
//! - `phase_updated_at` is refreshed only when the write actually changes
//!   the `phase` value
//!
//! Backends share [`apply_patch`] so the rules cannot drift between them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::domain::ArticleState;
use crate::errors::{Result, WorkflowError};
use crate::time;

/// Storage contract for article records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create or replace the record for a new article. Stamps `created_at`,
    /// `updated_at` and `phase_updated_at`.
    async fn create(&self, state: &ArticleState) -> Result<()>;

    /// Fetch a record by id, decoded defensively.
    async fn get(&self, article_id: &str) -> Result<Option<ArticleState>>;

    /// Merge a partial patch into an existing record. A `phase` key in the
    /// patch participates in the `phase_updated_at` rule; `Value::Null`
    /// entries overwrite fields with null (used to clear feedback text and
    /// thread linkage).
    async fn update(&self, article_id: &str, patch: Map<String, Value>) -> Result<()>;

    /// Remove fields from a record entirely (error/retry bookkeeping is
    /// deleted on recovery, not nulled).
    async fn delete_fields(&self, article_id: &str, fields: &[&str]) -> Result<()>;

    /// Find the article currently waiting on the given feedback thread.
    async fn find_by_revision_thread(&self, thread_ts: &str) -> Result<Option<ArticleState>>;

    /// Count articles planned for the given date (daily start cap).
    async fn count_for_date(&self, planned_date: &str) -> Result<u64>;
}

/// Merge `patch` into `doc`, enforcing the shared timestamp rules.
pub fn apply_patch(doc: &mut Map<String, Value>, patch: Map<String, Value>) {
    let phase_before = doc.get("phase").and_then(Value::as_str).map(str::to_string);

    for (key, value) in patch {
        doc.insert(key, value);
    }

    let now = time::now_jst_iso();
    let phase_after = doc.get("phase").and_then(Value::as_str).map(str::to_string);
    if phase_after != phase_before {
        doc.insert("phase_updated_at".into(), Value::String(now.clone()));
    }
    doc.insert("updated_at".into(), Value::String(now));
}

/// In-memory record store. The only backend shipped in this repository;
/// suitable for single-process deployments and tests.
#[derive(Default, Clone)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<String, Map<String, Value>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn doc_of(state: &ArticleState) -> Result<Map<String, Value>> {
    match state.to_doc() {
        Value::Object(map) => Ok(map),
        other => Err(WorkflowError::Store {
            message: format!("article record must encode as an object, got {}", other),
        }),
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create(&self, state: &ArticleState) -> Result<()> {
        let mut doc = doc_of(state)?;
        let now = time::now_jst_iso();
        doc.insert("created_at".into(), Value::String(now.clone()));
        doc.insert("updated_at".into(), Value::String(now.clone()));
        doc.insert("phase_updated_at".into(), Value::String(now));

        let mut records = self.records.write().await;
        records.insert(state.article_id.clone(), doc);
        Ok(())
    }

    async fn get(&self, article_id: &str) -> Result<Option<ArticleState>> {
        let records = self.records.read().await;
        Ok(records
            .get(article_id)
            .map(|doc| ArticleState::from_doc(Value::Object(doc.clone()))))
    }

    async fn update(&self, article_id: &str, patch: Map<String, Value>) -> Result<()> {
        let mut records = self.records.write().await;
        let doc = records
            .get_mut(article_id)
            .ok_or_else(|| WorkflowError::ArticleNotFound {
                article_id: article_id.to_string(),
            })?;
        apply_patch(doc, patch);
        Ok(())
    }

    async fn delete_fields(&self, article_id: &str, fields: &[&str]) -> Result<()> {
        let mut records = self.records.write().await;
        let doc = records
            .get_mut(article_id)
            .ok_or_else(|| WorkflowError::ArticleNotFound {
                article_id: article_id.to_string(),
            })?;
        for field in fields {
            doc.remove(*field);
        }
        doc.insert("updated_at".into(), Value::String(time::now_jst_iso()));
        Ok(())
    }

    async fn find_by_revision_thread(&self, thread_ts: &str) -> Result<Option<ArticleState>> {
        let records = self.records.read().await;
        let hit = records.values().find(|doc| {
            doc.get("slack_revision_thread_ts")
                .and_then(Value::as_str)
                .map(|ts| ts == thread_ts)
                .unwrap_or(false)
        });
        Ok(hit.map(|doc| ArticleState::from_doc(Value::Object(doc.clone()))))
    }

    async fn count_for_date(&self, planned_date: &str) -> Result<u64> {
        let records = self.records.read().await;
        let count = records
            .values()
            .filter(|doc| {
                doc.get("planned_date")
                    .and_then(Value::as_str)
                    .map(|d| d == planned_date)
                    .unwrap_or(false)
            })
            .count();
        Ok(count as u64)
    }
}
