//! Single-flight, per-record write path.
//!
//! ## `submit` protocol
//!
//! 1. Short-circuit: no write in flight and the cached record already holds
//!    the delta → `Applied` without touching the remote.
//! 2. Cancel any in-flight write for the same record.
//! 3. Register a new pending entry (fresh generation + cancel handle).
//! 4. Spawn the remote write; the caller gets a [`SaveHandle`] immediately.
//! 5. On completion, under the cache lock and the table lock:
//!    - generation no longer current → `Superseded`, nothing touched;
//!    - success → classify, replace or remove in cache, record last-good;
//!    - failure → `Rejected` with the last-good record for rollback.
//!
//! Cancelling the transport is best effort. The generation check in step 5
//! is what guarantees a superseded result is discarded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use reviewsync_core::{FieldDelta, Record, RecordId, ScopePredicate};

use crate::cache::SharedCache;
use crate::error::RemoteError;
use crate::events::EventSink;
use crate::remote::RemoteStore;

/// Result of one submitted edit.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// The write is durable; carries the server-confirmed record.
    Applied(Record),
    /// A newer edit to the same record replaced this one. Not an error.
    Superseded,
    /// The write failed. `last_good` is the last confirmed record, if any,
    /// for reverting optimistic display.
    Rejected {
        reason: RemoteError,
        last_good: Option<Record>,
    },
}

impl SaveOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, SaveOutcome::Applied(_))
    }
}

/// Pending result of [`SaveCoordinator::submit`].
#[derive(Debug)]
pub struct SaveHandle {
    inner: HandleInner,
}

#[derive(Debug)]
enum HandleInner {
    Ready(SaveOutcome),
    Spawned(JoinHandle<SaveOutcome>),
}

impl SaveHandle {
    fn ready(outcome: SaveOutcome) -> Self {
        Self {
            inner: HandleInner::Ready(outcome),
        }
    }

    /// True when the outcome was decided without a remote call.
    pub fn is_ready(&self) -> bool {
        matches!(self.inner, HandleInner::Ready(_))
    }

    pub async fn outcome(self) -> SaveOutcome {
        match self.inner {
            HandleInner::Ready(outcome) => outcome,
            HandleInner::Spawned(handle) => match handle.await {
                Ok(outcome) => outcome,
                Err(err) => SaveOutcome::Rejected {
                    reason: RemoteError::Transport(format!("save task failed: {err}")),
                    last_good: None,
                },
            },
        }
    }
}

struct PendingSave {
    generation: u64,
    target: FieldDelta,
    // Dropping or firing this resolves the writer's cancel receiver.
    _cancel: oneshot::Sender<()>,
}

#[derive(Default)]
struct SaveTables {
    pending: HashMap<RecordId, PendingSave>,
    last_good: HashMap<RecordId, Record>,
    next_generation: u64,
}

struct SaveInner {
    remote: Arc<dyn RemoteStore>,
    scope: Arc<dyn ScopePredicate>,
    cache: SharedCache,
    events: EventSink,
    tables: Mutex<SaveTables>,
}

/// Owner of the pending-write and last-good tables.
#[derive(Clone)]
pub struct SaveCoordinator {
    inner: Arc<SaveInner>,
}

impl SaveCoordinator {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        scope: Arc<dyn ScopePredicate>,
        cache: SharedCache,
        events: EventSink,
    ) -> Self {
        Self {
            inner: Arc::new(SaveInner {
                remote,
                scope,
                cache,
                events,
                tables: Mutex::new(SaveTables::default()),
            }),
        }
    }

    /// Submit an edit. Returns once the write is registered and issued; the
    /// outcome is delivered through the handle.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn submit(&self, id: RecordId, delta: FieldDelta) -> SaveHandle {
        let cache = self.inner.cache.read().await;
        let mut tables = self.inner.lock_tables();

        if !tables.pending.contains_key(&id) {
            if let Some(current) = cache.get(&id).filter(|r| r.satisfies(&delta)) {
                tracing::debug!(record = %id, "edit matches cached value; skipping write");
                return SaveHandle::ready(SaveOutcome::Applied(current.clone()));
            }
        }
        drop(cache);

        tables.next_generation += 1;
        let generation = tables.next_generation;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let previous = tables.pending.insert(
            id.clone(),
            PendingSave {
                generation,
                target: delta.clone(),
                _cancel: cancel_tx,
            },
        );
        drop(tables);

        if let Some(previous) = previous {
            tracing::debug!(
                record = %id,
                superseded = previous.generation,
                by = generation,
                "cancelling in-flight save",
            );
            // Dropping the entry drops its sender, which cancels the writer.
            drop(previous);
        }

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancel_rx => Err(RemoteError::Cancelled),
                result = inner.remote.patch(&id, &delta) => result,
            };
            inner.finish(id, generation, result).await
        });

        SaveHandle {
            inner: HandleInner::Spawned(handle),
        }
    }

    /// Last confirmed record for `id`, if any save for it has been applied.
    pub fn last_good(&self, id: &RecordId) -> Option<Record> {
        self.inner.lock_tables().last_good.get(id).cloned()
    }

    /// Delta of the write currently in flight for `id`.
    pub fn pending_target(&self, id: &RecordId) -> Option<FieldDelta> {
        self.inner
            .lock_tables()
            .pending
            .get(id)
            .map(|p| p.target.clone())
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock_tables().pending.len()
    }
}

impl SaveInner {
    fn lock_tables(&self) -> MutexGuard<'_, SaveTables> {
        self.tables.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn finish(
        &self,
        id: RecordId,
        generation: u64,
        result: Result<Record, RemoteError>,
    ) -> SaveOutcome {
        // Lock order: cache, then tables.
        let mut cache = self.cache.write().await;
        let mut tables = self.lock_tables();

        let current = tables
            .pending
            .get(&id)
            .map(|p| p.generation == generation)
            .unwrap_or(false);
        if !current {
            tracing::debug!(record = %id, generation, "save superseded; discarding result");
            return SaveOutcome::Superseded;
        }
        tables.pending.remove(&id);

        match result {
            Ok(record) => {
                tables.last_good.insert(id.clone(), record.clone());
                drop(tables);

                if self.scope.in_scope(&record) {
                    cache.upsert(record.clone());
                } else {
                    tracing::info!(record = %id, "saved record left scope; removing");
                    cache.remove(&id);
                }
                self.events.snapshot_changed(&cache);
                tracing::info!(record = %id, "save applied");
                SaveOutcome::Applied(record)
            }
            Err(reason) => {
                // Nothing applied this session: the cached copy is the last
                // server-confirmed state.
                let last_good = tables
                    .last_good
                    .get(&id)
                    .cloned()
                    .or_else(|| cache.get(&id).cloned());
                tracing::warn!(record = %id, error = %reason, "save rejected");
                SaveOutcome::Rejected { reason, last_good }
            }
        }
    }
}
