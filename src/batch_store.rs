//! In-memory store of editable batches.
//!
//! A batch is the grid produced by one `/parse` call. Batches live for the
//! lifetime of the process.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::grid::{Column, DocumentRow, GridRow, LineItemRow};
use crate::schema::ExtractedDocument;

/// Editable rows of one parse request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub invoices: Vec<DocumentRow>,
    pub line_items: Vec<LineItemRow>,
}

impl Batch {
    pub fn from_documents(documents: &[ExtractedDocument]) -> Self {
        Self {
            id: format!("batch_{}", Uuid::new_v4().simple()),
            created_at: Utc::now(),
            invoices: documents.iter().map(DocumentRow::from).collect(),
            line_items: LineItemRow::from_documents(documents),
        }
    }
}

/// Column layout of both tables, sent alongside a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchColumns {
    pub invoices: &'static [Column],
    pub line_items: &'static [Column],
}

impl Default for BatchColumns {
    fn default() -> Self {
        Self {
            invoices: DocumentRow::COLUMNS,
            line_items: LineItemRow::COLUMNS,
        }
    }
}

/// Number of batches kept before the oldest is evicted.
pub const DEFAULT_MAX_BATCHES: usize = 1_000;

#[derive(Debug, Default)]
struct Batches {
    by_id: HashMap<String, Batch>,
    /// Ids in insertion order, oldest first.
    order: VecDeque<String>,
}

#[derive(Debug, Clone)]
pub struct BatchStore {
    inner: Arc<RwLock<Batches>>,
    max_batches: usize,
}

impl Default for BatchStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BATCHES)
    }
}

impl BatchStore {
    pub fn new(max_batches: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Batches::default())),
            max_batches: max_batches.max(1),
        }
    }

    /// Store a batch, returning its id. Evicts the oldest batches past the cap.
    pub fn insert(&self, batch: Batch) -> String {
        let id = batch.id.clone();
        let mut store = self.inner.write().unwrap_or_else(|e| e.into_inner());
        tracing::debug!(
            "BatchStore: stored '{}' ({} invoices, {} line items)",
            id,
            batch.invoices.len(),
            batch.line_items.len()
        );
        store.by_id.insert(id.clone(), batch);
        store.order.push_back(id.clone());

        while store.by_id.len() > self.max_batches {
            let Some(oldest) = store.order.pop_front() else {
                break;
            };
            if store.by_id.remove(&oldest).is_some() {
                tracing::debug!("BatchStore: evicted '{}'", oldest);
            }
        }
        id
    }

    /// Snapshot of a batch.
    pub fn get(&self, id: &str) -> Option<Batch> {
        let store = self.inner.read().unwrap_or_else(|e| e.into_inner());
        store.by_id.get(id).cloned()
    }

    /// Run `f` against a batch under the write lock.
    pub fn update<T>(&self, id: &str, f: impl FnOnce(&mut Batch) -> T) -> Option<T> {
        let mut store = self.inner.write().unwrap_or_else(|e| e.into_inner());
        store.by_id.get_mut(id).map(f)
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut store = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if store.by_id.remove(id).is_none() {
            return false;
        }
        store.order.retain(|held| held != id);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).by_id.len()
    }
}
