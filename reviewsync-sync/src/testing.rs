//! In-memory [`RemoteStore`] with scripting hooks, for tests and offline hosts.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use reviewsync_core::{FieldDelta, Record, RecordId};

use crate::error::RemoteError;
use crate::remote::RemoteStore;

#[derive(Default)]
pub struct MemoryRemote {
    records: Mutex<BTreeMap<RecordId, Record>>,
    since_responses: Mutex<VecDeque<Result<Vec<Record>, RemoteError>>>,
    since_calls: Mutex<Vec<DateTime<Utc>>>,
    since_gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    list_all_filters: Mutex<Vec<Option<String>>>,
    tables: Mutex<HashMap<String, Result<Vec<Record>, RemoteError>>>,
    table_calls: Mutex<Vec<String>>,
    patch_gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    patch_failures: Mutex<VecDeque<RemoteError>>,
    patch_calls: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let remote = Self::default();
        for record in records {
            remote.put(record);
        }
        remote
    }

    /// Insert or replace a record on the remote side only.
    pub fn put(&self, record: Record) {
        lock(&self.records).insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &RecordId) -> Option<Record> {
        lock(&self.records).get(id).cloned()
    }

    /// Queue the response of the next `list_since` call. With nothing queued
    /// `list_since` returns an empty delta.
    pub fn push_since(&self, response: Result<Vec<Record>, RemoteError>) {
        lock(&self.since_responses).push_back(response);
    }

    pub fn since_calls(&self) -> Vec<DateTime<Utc>> {
        lock(&self.since_calls).clone()
    }

    /// Hold the next `list_since` call until the returned sender fires or drops.
    pub fn gate_next_since(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        lock(&self.since_gates).push_back(rx);
        tx
    }

    pub fn list_all_filters(&self) -> Vec<Option<String>> {
        lock(&self.list_all_filters).clone()
    }

    /// Contents of another table, returned by `list_table`. Unknown tables
    /// list as empty.
    pub fn put_table(&self, table_id: &str, records: impl IntoIterator<Item = Record>) {
        lock(&self.tables).insert(table_id.to_string(), Ok(records.into_iter().collect()));
    }

    /// Make every `list_table` call for `table_id` fail with `err`.
    pub fn fail_table(&self, table_id: &str, err: RemoteError) {
        lock(&self.tables).insert(table_id.to_string(), Err(err));
    }

    pub fn table_calls(&self) -> Vec<String> {
        lock(&self.table_calls).clone()
    }

    /// Hold the next `patch` call until the returned sender fires or drops.
    pub fn gate_next_patch(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        lock(&self.patch_gates).push_back(rx);
        tx
    }

    /// Make the next `patch` call fail with `err` (after any gate opens).
    pub fn fail_next_patch(&self, err: RemoteError) {
        lock(&self.patch_failures).push_back(err);
    }

    pub fn patch_calls(&self) -> usize {
        self.patch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn list_since(&self, since: DateTime<Utc>) -> Result<Vec<Record>, RemoteError> {
        lock(&self.since_calls).push(since);
        let gate = lock(&self.since_gates).pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        lock(&self.since_responses)
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn list_all(&self, filter: Option<&str>) -> Result<Vec<Record>, RemoteError> {
        lock(&self.list_all_filters).push(filter.map(str::to_owned));
        Ok(lock(&self.records).values().cloned().collect())
    }

    async fn list_table(&self, table_id: &str) -> Result<Vec<Record>, RemoteError> {
        lock(&self.table_calls).push(table_id.to_string());
        lock(&self.tables)
            .get(table_id)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn patch(&self, id: &RecordId, delta: &FieldDelta) -> Result<Record, RemoteError> {
        self.patch_calls.fetch_add(1, Ordering::SeqCst);
        let gate = lock(&self.patch_gates).pop_front();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if let Some(err) = lock(&self.patch_failures).pop_front() {
            return Err(err);
        }

        let mut records = lock(&self.records);
        let record = records
            .entry(id.clone())
            .or_insert_with(|| Record::new(id.clone(), Default::default()));
        let mut fields = record.fields.clone();
        for (name, value) in delta {
            match value {
                Some(value) => {
                    fields.insert(name.clone(), value.clone());
                }
                None => {
                    fields.remove(name);
                }
            }
        }
        // Replace, never mutate in place.
        let updated = Record {
            id: id.clone(),
            fields,
            created_time: record.created_time,
        };
        *record = updated.clone();
        Ok(updated)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}
