//! Pending candidates: in-scope newcomers held back while autoload is off.
//!
//! The table belongs to the engine. Every tick refreshes it from the fetched
//! delta, so an entry always reflects the latest version the remote returned,
//! and a record that leaves scope is withdrawn before anyone can load it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use reviewsync_core::{Record, RecordId};

#[derive(Debug, Default)]
pub struct CandidateTable {
    pending: BTreeMap<RecordId, Record>,
}

pub type SharedCandidates = Arc<Mutex<CandidateTable>>;

impl CandidateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedCandidates {
        Arc::new(Mutex::new(self))
    }

    /// Insert or replace with the latest fetched version.
    pub fn offer(&mut self, record: Record) {
        self.pending.insert(record.id.clone(), record);
    }

    /// Drop `id`; true when it was pending.
    pub fn withdraw(&mut self, id: &RecordId) -> bool {
        self.pending.remove(id).is_some()
    }

    pub fn take(&mut self, id: &RecordId) -> Option<Record> {
        self.pending.remove(id)
    }

    pub fn has(&self, id: &RecordId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn ids(&self) -> Vec<RecordId> {
        self.pending.keys().cloned().collect()
    }

    /// Pending records, sorted by identity.
    pub fn records(&self) -> Vec<Record> {
        self.pending.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

pub(crate) fn lock(candidates: &Mutex<CandidateTable>) -> MutexGuard<'_, CandidateTable> {
    candidates.lock().unwrap_or_else(|p| p.into_inner())
}

/// What [`crate::SyncController::request_manual_load`] did with each identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    /// Now cached.
    pub added: Vec<RecordId>,
    /// Pending, but already cached or no longer in scope.
    pub skipped: Vec<RecordId>,
    /// Not pending: never announced, withdrawn, or already loaded.
    pub unknown: Vec<RecordId>,
}
