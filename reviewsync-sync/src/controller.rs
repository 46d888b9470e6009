//! [`SyncController`]: the one object a host talks to.
//!
//! Owns the cache, the save coordinator, the reconciliation loop and the
//! polling schedule. Everything is injected through [`SyncDeps`]; there is no
//! global state.

use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use futures::future::join_all;

use reviewsync_core::{BoardConfig, FieldDelta, Record, RecordId, ScopePredicate, SyncSettings};

use crate::cache::{LocalCache, SharedCache};
use crate::candidates::{self, CandidateTable, LoadReport, SharedCandidates};
use crate::clock::Clock;
use crate::error::SyncError;
use crate::events::{EventSink, SyncEvent};
use crate::names::{BoardQuery, NameDirectory, ResolvedRecord};
use crate::reconcile::{ReconciliationLoop, TickReport};
use crate::remote::RemoteStore;
use crate::save::{SaveCoordinator, SaveHandle};
use crate::schedule::{RunState, ScheduledTask};
use crate::state::{PersistentState, StateStore, SyncState};
use crate::upload::{collect_attachments, UploadFile, Uploader};

/// Collaborators injected into a [`SyncController`].
pub struct SyncDeps {
    pub remote: Arc<dyn RemoteStore>,
    pub scope: Arc<dyn ScopePredicate>,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn StateStore>,
}

/// What [`SyncController::bootstrap`] loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BootstrapReport {
    /// Records returned by the remote, before local filtering.
    pub fetched: usize,
    /// Records that passed the scope predicate and are now cached.
    pub loaded: usize,
    pub checkpoint: DateTime<Utc>,
}

/// What [`SyncController::refresh_names`] loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NameRefresh {
    /// Linked tables listed successfully.
    pub tables: usize,
    /// Resolvable ids after the refresh.
    pub names: usize,
    /// Tables whose listing failed; their previous names are kept.
    pub failed: Vec<String>,
}

pub struct SyncController {
    remote: Arc<dyn RemoteStore>,
    scope: Arc<dyn ScopePredicate>,
    clock: Arc<dyn Clock>,
    cache: SharedCache,
    candidates: SharedCandidates,
    state: Arc<PersistentState>,
    events: EventSink,
    saves: SaveCoordinator,
    reconcile: Arc<ReconciliationLoop>,
    settings: SyncSettings,
    board: BoardConfig,
    names: RwLock<Arc<NameDirectory>>,
    schedule: Mutex<Option<ScheduledTask>>,
}

impl SyncController {
    pub fn new(deps: SyncDeps, settings: SyncSettings) -> Self {
        let SyncDeps {
            remote,
            scope,
            clock,
            store,
        } = deps;

        let cache = LocalCache::new().shared();
        let candidates = CandidateTable::new().shared();
        let events = EventSink::default();
        let state = Arc::new(PersistentState::unloaded(store));
        let saves = SaveCoordinator::new(remote.clone(), scope.clone(), cache.clone(), events.clone());
        let reconcile = Arc::new(ReconciliationLoop::new(
            remote.clone(),
            scope.clone(),
            cache.clone(),
            candidates.clone(),
            state.clone(),
            clock.clone(),
            events.clone(),
            settings.overlap(),
        ));

        Self {
            remote,
            scope,
            clock,
            cache,
            candidates,
            state,
            events,
            saves,
            reconcile,
            settings,
            board: BoardConfig::default(),
            names: RwLock::new(Arc::new(NameDirectory::new(&BoardConfig::default()))),
            schedule: Mutex::new(None),
        }
    }

    /// Resolve link fields through `board.links` and filter on its fields.
    pub fn with_board(mut self, board: BoardConfig) -> Self {
        self.names = RwLock::new(Arc::new(NameDirectory::new(&board)));
        self.board = board;
        self
    }

    /// Load persisted state and the full in-scope working set.
    ///
    /// The remote filter narrows the fetch; the local predicate is the
    /// authority on what gets cached. The checkpoint is set to the fetch
    /// start minus the overlap window.
    pub async fn bootstrap(&self) -> Result<BootstrapReport, SyncError> {
        self.state.reload()?;

        let fetch_start = self.clock.now();
        let filter = self.scope.remote_filter();
        let fetched = self.remote.list_all(filter.as_deref()).await?;
        let fetched_count = fetched.len();

        let in_scope: Vec<Record> = fetched
            .into_iter()
            .filter(|record| self.scope.in_scope(record))
            .collect();
        let loaded = in_scope.len();

        let checkpoint = {
            let mut cache = self.cache.write().await;
            cache.replace_all(in_scope);
            candidates::lock(&self.candidates).clear();
            self.events.snapshot_changed(&cache);
            self.state
                .advance_checkpoint(self.reconcile.regressed(fetch_start))
        };

        if !self.board.links.is_empty() {
            self.refresh_names().await;
        }

        tracing::info!(
            fetched = fetched_count,
            loaded,
            checkpoint = %checkpoint,
            "bootstrap complete"
        );
        Ok(BootstrapReport {
            fetched: fetched_count,
            loaded,
            checkpoint,
        })
    }

    /// List every linked table and rebuild the name directory.
    ///
    /// A table that fails to list keeps the names it had; its ids show raw
    /// until a later refresh succeeds. Never fails as a whole.
    pub async fn refresh_names(&self) -> NameRefresh {
        let listings = join_all(
            self.board
                .links
                .iter()
                .map(|link| self.remote.list_table(&link.table_id)),
        )
        .await;

        let previous = self.name_directory();
        let mut next = NameDirectory::new(&self.board);
        let mut report = NameRefresh::default();
        for (link, listing) in self.board.links.iter().zip(listings) {
            match listing {
                Ok(records) => {
                    next.insert_table(&link.table_id, &records, &link.name_fields);
                    report.tables += 1;
                }
                Err(err) => {
                    tracing::warn!(table = %link.table_id, error = %err, "linked table listing failed");
                    next.carry_table(&link.table_id, &previous);
                    report.failed.push(link.table_id.clone());
                }
            }
        }
        report.names = next.len();
        *self.names.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(next);

        tracing::info!(
            tables = report.tables,
            names = report.names,
            failed = report.failed.len(),
            "linked names refreshed"
        );
        report
    }

    pub fn name_directory(&self) -> Arc<NameDirectory> {
        self.names.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Working set filtered by `query`, with linked names, sorted by identity.
    pub async fn board(&self, query: &BoardQuery) -> Vec<ResolvedRecord> {
        let names = self.name_directory();
        self.snapshot()
            .await
            .into_iter()
            .filter(|record| names.matches(record, query))
            .map(|record| names.view(record))
            .collect()
    }

    /// Attach linked names to `records`.
    pub fn resolve(&self, records: Vec<Record>) -> Vec<ResolvedRecord> {
        let names = self.name_directory();
        records.into_iter().map(|record| names.view(record)).collect()
    }

    /// Start periodic reconciliation. A second call while running is a no-op.
    pub fn start(&self) {
        let mut schedule = self.lock_schedule();
        if schedule.is_some() {
            tracing::debug!("poll schedule already running");
            return;
        }

        let reconcile = self.reconcile.clone();
        *schedule = Some(ScheduledTask::spawn(
            self.settings.poll_interval(),
            self.settings.first_run_delay(),
            move || {
                let reconcile = reconcile.clone();
                async move {
                    reconcile.tick().await;
                }
            },
        ));
        tracing::info!(
            interval_secs = self.settings.poll_interval_secs,
            "poll schedule started"
        );
    }

    pub fn pause(&self) {
        if let Some(task) = self.lock_schedule().as_ref() {
            task.pause();
            tracing::info!("poll schedule paused");
        }
    }

    /// Resume polling; a catch-up poll follows after the first-run delay.
    pub fn resume(&self) {
        if let Some(task) = self.lock_schedule().as_ref() {
            task.resume();
            tracing::info!("poll schedule resumed");
        }
    }

    /// `None` when the schedule was never started or has been stopped.
    pub fn schedule_state(&self) -> Option<RunState> {
        self.lock_schedule().as_ref().map(ScheduledTask::state)
    }

    /// Stop periodic reconciliation, waiting for an in-progress tick.
    pub async fn stop(&self) {
        let task = self.lock_schedule().take();
        if let Some(task) = task {
            task.stop().await;
            tracing::info!("poll schedule stopped");
        }
    }

    /// Run one reconciliation tick now, outside the schedule.
    pub async fn poll_now(&self) -> TickReport {
        self.reconcile.tick().await
    }

    pub async fn request_save(&self, id: RecordId, delta: FieldDelta) -> SaveHandle {
        self.saves.submit(id, delta).await
    }

    /// Upload `files` first, then save `delta` with the successful uploads
    /// set on `field`. When every upload fails the field is left out.
    pub async fn request_save_with_uploads(
        &self,
        id: RecordId,
        mut delta: FieldDelta,
        field: &str,
        uploader: &dyn Uploader,
        files: &[UploadFile],
    ) -> SaveHandle {
        if let Some(value) = collect_attachments(uploader, files).await {
            delta.insert(field.to_string(), Some(value));
        }
        self.saves.submit(id, delta).await
    }

    /// Accept pending candidates into the working set.
    ///
    /// `None` or an empty list takes every pending candidate. Identities are
    /// looked up in the engine's candidate table, which only ever holds the
    /// latest fetched version; anything not pending is reported as unknown.
    /// Each taken record is re-checked against scope and skipped if already
    /// cached.
    pub async fn request_manual_load(&self, ids: Option<Vec<RecordId>>) -> LoadReport {
        // Lock order: cache, then candidates.
        let mut cache = self.cache.write().await;
        let mut pending = candidates::lock(&self.candidates);

        let mut report = LoadReport::default();
        let requested = match ids.filter(|ids| !ids.is_empty()) {
            Some(ids) => ids,
            None => pending.ids(),
        };
        for id in requested {
            let Some(record) = pending.take(&id) else {
                report.unknown.push(id);
                continue;
            };
            if !self.scope.in_scope(&record) || cache.has(&id) {
                tracing::debug!(record = %id, "candidate cached or out of scope; skipping");
                report.skipped.push(id);
                continue;
            }
            report.added.push(id);
            cache.upsert(record);
        }
        drop(pending);

        if !report.added.is_empty() {
            self.events.snapshot_changed(&cache);
            tracing::info!(added = report.added.len(), "manual load merged candidates");
        }
        report
    }

    /// Pending candidates that are not cached, sorted by identity.
    pub async fn candidates(&self) -> Vec<Record> {
        let cache = self.cache.read().await;
        let pending = candidates::lock(&self.candidates);
        pending
            .records()
            .into_iter()
            .filter(|record| !cache.has(&record.id))
            .collect()
    }

    pub fn set_autoload(&self, enabled: bool) -> Result<(), SyncError> {
        self.state.set_autoload(enabled)?;
        tracing::info!(enabled, "autoload updated");
        Ok(())
    }

    pub fn autoload(&self) -> bool {
        self.state.autoload()
    }

    pub fn checkpoint(&self) -> Option<DateTime<Utc>> {
        self.state.checkpoint()
    }

    pub fn sync_state(&self) -> SyncState {
        self.state.snapshot()
    }

    /// Current working set, sorted by identity.
    pub async fn snapshot(&self) -> Vec<Record> {
        let mut records = self.cache.read().await.snapshot();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn last_good(&self, id: &RecordId) -> Option<Record> {
        self.saves.last_good(id)
    }

    pub fn saves_in_flight(&self) -> usize {
        self.saves.in_flight()
    }

    pub fn is_polling(&self) -> bool {
        self.reconcile.is_polling()
    }

    fn lock_schedule(&self) -> std::sync::MutexGuard<'_, Option<ScheduledTask>> {
        self.schedule.lock().unwrap_or_else(|p| p.into_inner())
    }
}
