//! In-memory mirror of the records currently in scope.
//!
//! The cache never filters on its own. Whoever detects a scope transition
//! (reconciliation, post-save classification) removes the record.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use reviewsync_core::{Record, RecordId};

/// Shared handle used by every component that mutates or reads the cache.
pub type SharedCache = Arc<RwLock<LocalCache>>;

#[derive(Debug, Default, Clone)]
pub struct LocalCache {
    records: HashMap<RecordId, Record>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedCache {
        Arc::new(RwLock::new(self))
    }

    /// Insert or replace by identity.
    pub fn upsert(&mut self, record: Record) {
        self.records.insert(record.id.clone(), record);
    }

    /// Removing an absent identity is a no-op. Returns whether anything was removed.
    pub fn remove(&mut self, id: &RecordId) -> bool {
        self.records.remove(id).is_some()
    }

    pub fn has(&self, id: &RecordId) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Point-in-time copy, unordered. Consumers sort at read time.
    pub fn snapshot(&self) -> Vec<Record> {
        self.records.values().cloned().collect()
    }

    /// Drop everything and load `records`.
    pub fn replace_all(&mut self, records: impl IntoIterator<Item = Record>) {
        self.records.clear();
        for record in records {
            self.upsert(record);
        }
    }
}
