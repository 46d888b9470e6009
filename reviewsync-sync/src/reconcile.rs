//! Checkpoint-based reconciliation against the remote store.
//!
//! One tick:
//! 1. Read the checkpoint.
//! 2. Fetch every record created or modified at or after it.
//! 3. Partition into `to_add` (in scope, not cached), `to_remove` (out of
//!    scope, cached) and `out_of_scope` (out of scope, not cached).
//! 4. Prune `to_remove`, and withdraw any pending candidate in
//!    `out_of_scope`.
//! 5. Merge `to_add` when autoload is on, otherwise record them in the
//!    candidate table with their fetched version and announce them.
//! 6. Advance the checkpoint to poll start minus the overlap window.
//!
//! A fetch error aborts before step 3, so a failed tick leaves both the cache
//! and the checkpoint exactly as they were.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use reviewsync_core::{Record, RecordId, ScopePredicate};

use crate::cache::{LocalCache, SharedCache};
use crate::candidates::{self, SharedCandidates};
use crate::clock::Clock;
use crate::events::EventSink;
use crate::remote::RemoteStore;
use crate::state::PersistentState;

/// Add/remove split of one remote delta.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    pub to_add: Vec<Record>,
    pub to_remove: Vec<RecordId>,
    /// Fetched, uncached and out of scope. Only matters to pending candidates.
    pub out_of_scope: Vec<RecordId>,
}

/// Split `updates` against the current cache contents.
///
/// Duplicate identities (pages overlapping while the table changes) collapse
/// to their last occurrence. Output is sorted by identity.
pub fn partition(updates: Vec<Record>, scope: &dyn ScopePredicate, cache: &LocalCache) -> Partition {
    let mut latest: HashMap<RecordId, Record> = HashMap::with_capacity(updates.len());
    for record in updates {
        latest.insert(record.id.clone(), record);
    }

    let mut out = Partition::default();
    for (id, record) in latest {
        match (scope.in_scope(&record), cache.has(&id)) {
            (true, false) => out.to_add.push(record),
            (false, true) => out.to_remove.push(id),
            (false, false) => out.out_of_scope.push(id),
            (true, true) => {}
        }
    }
    out.to_add.sort_by(|a, b| a.id.cmp(&b.id));
    out.to_remove.sort();
    out.out_of_scope.sort();
    out
}

/// What one completed tick did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollSummary {
    pub since: DateTime<Utc>,
    pub fetched: usize,
    pub added: Vec<RecordId>,
    pub removed: Vec<RecordId>,
    /// In-scope newcomers held back because autoload is off.
    pub deferred: Vec<RecordId>,
    /// Pending candidates dropped because their latest version left scope.
    pub withdrawn: Vec<RecordId>,
    pub checkpoint: DateTime<Utc>,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickReport {
    /// Another tick was already running; nothing was done.
    Skipped,
    Completed(PollSummary),
    /// The fetch failed; cache and checkpoint are untouched.
    Failed(String),
}

pub struct ReconciliationLoop {
    remote: Arc<dyn RemoteStore>,
    scope: Arc<dyn ScopePredicate>,
    cache: SharedCache,
    candidates: SharedCandidates,
    state: Arc<PersistentState>,
    clock: Arc<dyn Clock>,
    events: EventSink,
    overlap: chrono::Duration,
    polling: AtomicBool,
}

/// Resets the `Polling` flag however the tick exits.
struct PollingGuard<'a>(&'a AtomicBool);

impl Drop for PollingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ReconciliationLoop {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        scope: Arc<dyn ScopePredicate>,
        cache: SharedCache,
        candidates: SharedCandidates,
        state: Arc<PersistentState>,
        clock: Arc<dyn Clock>,
        events: EventSink,
        overlap: Duration,
    ) -> Self {
        Self {
            remote,
            scope,
            cache,
            candidates,
            state,
            clock,
            events,
            overlap: chrono::Duration::from_std(overlap).unwrap_or_else(|_| chrono::Duration::zero()),
            polling: AtomicBool::new(false),
        }
    }

    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }

    /// `instant - overlap`, the value a checkpoint taken at `instant` is stored as.
    pub fn regressed(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        instant - self.overlap
    }

    /// Run one reconciliation cycle. Never returns an error: fetch failures
    /// are logged and reported as [`TickReport::Failed`].
    pub async fn tick(&self) -> TickReport {
        if self
            .polling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("poll already in progress; skipping tick");
            return TickReport::Skipped;
        }
        let _guard = PollingGuard(&self.polling);

        let started = Instant::now();
        let poll_start = self.clock.now();
        let since = self
            .state
            .checkpoint()
            .unwrap_or_else(|| self.regressed(poll_start));
        tracing::info!(since = %since, "reconciliation poll starting");

        let updates = match self.remote.list_since(since).await {
            Ok(updates) => updates,
            Err(err) => {
                tracing::warn!(error = %err, since = %since, "reconciliation fetch failed; retrying next tick");
                return TickReport::Failed(err.to_string());
            }
        };
        let fetched = updates.len();
        let autoload = self.state.autoload();

        let (added, removed, deferred, withdrawn) = {
            // Lock order: cache, then candidates.
            let mut cache = self.cache.write().await;
            let Partition {
                to_add,
                to_remove,
                out_of_scope,
            } = partition(updates, self.scope.as_ref(), &cache);
            let mut pending = candidates::lock(&self.candidates);

            let withdrawn: Vec<RecordId> = out_of_scope
                .into_iter()
                .filter(|id| pending.withdraw(id))
                .collect();
            for id in &to_remove {
                cache.remove(id);
            }

            let mut added = Vec::new();
            let mut deferred = Vec::new();
            if autoload {
                for record in to_add {
                    pending.withdraw(&record.id);
                    added.push(record.id.clone());
                    cache.upsert(record);
                }
            } else if !to_add.is_empty() {
                deferred = to_add.iter().map(|r| r.id.clone()).collect();
                for record in &to_add {
                    pending.offer(record.clone());
                }
                self.events.candidates(to_add);
            }
            drop(pending);

            if !withdrawn.is_empty() {
                tracing::info!(withdrawn = withdrawn.len(), "pending candidates left scope");
            }
            if !added.is_empty() || !to_remove.is_empty() {
                self.events.snapshot_changed(&cache);
            }
            (added, to_remove, deferred, withdrawn)
        };

        let checkpoint = self.state.advance_checkpoint(self.regressed(poll_start));

        let summary = PollSummary {
            since,
            fetched,
            added,
            removed,
            deferred,
            withdrawn,
            checkpoint,
            duration_ms: started.elapsed().as_millis(),
        };
        tracing::info!(
            fetched = summary.fetched,
            added = summary.added.len(),
            removed = summary.removed.len(),
            deferred = summary.deferred.len(),
            checkpoint = %summary.checkpoint,
            duration_ms = summary.duration_ms,
            "reconciliation poll completed",
        );
        TickReport::Completed(summary)
    }
}
