use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rstest::rstest;

use reviewsync_core::{FieldValue, Fields, Record, RecordId, ScopeRules};
use reviewsync_sync::testing::MemoryRemote;
use reviewsync_sync::{
    CandidateTable, EventSink, LocalCache, ManualClock, MemoryStateStore, PersistentState, ReconciliationLoop,
    RemoteError, SharedCache, SharedCandidates, SyncEvent, SyncState, TickReport,
};

const OVERLAP_SECS: i64 = 30;

struct Harness {
    remote: Arc<MemoryRemote>,
    cache: SharedCache,
    candidates: SharedCandidates,
    store: Arc<MemoryStateStore>,
    state: Arc<PersistentState>,
    clock: Arc<ManualClock>,
    events: EventSink,
    looper: Arc<ReconciliationLoop>,
}

impl Harness {
    fn new(autoload: bool, cached: &[Record], checkpoint: Option<DateTime<Utc>>) -> Self {
        let remote = Arc::new(MemoryRemote::new());
        let mut cache = LocalCache::new();
        for record in cached {
            cache.upsert(record.clone());
        }
        let cache = cache.shared();
        let store = Arc::new(MemoryStateStore::new(SyncState {
            checkpoint,
            autoload,
        }));
        let state = Arc::new(PersistentState::load(store.clone()).expect("load state"));
        let clock = Arc::new(ManualClock::new(t0()));
        let events = EventSink::default();
        let candidates = CandidateTable::new().shared();
        let looper = Arc::new(ReconciliationLoop::new(
            remote.clone(),
            Arc::new(ScopeRules::default()),
            cache.clone(),
            candidates.clone(),
            state.clone(),
            clock.clone(),
            events.clone(),
            Duration::from_secs(OVERLAP_SECS as u64),
        ));
        Self {
            remote,
            cache,
            candidates,
            store,
            state,
            clock,
            events,
            looper,
        }
    }

    async fn cached_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .cache
            .read()
            .await
            .snapshot()
            .into_iter()
            .map(|r| r.id.0)
            .collect();
        ids.sort();
        ids
    }

    fn pending_ids(&self) -> Vec<String> {
        let table = self.candidates.lock().expect("candidates");
        table.ids().into_iter().map(|id| id.0).collect()
    }

    fn checkpoint(&self) -> Option<DateTime<Utc>> {
        self.store.stored().checkpoint
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn backcharge(id: &str) -> Record {
    let mut fields = Fields::new();
    fields.insert("Type of Backcharge".into(), "Builder Issued Backcharge".into());
    fields.insert("Amount".into(), FieldValue::Number(100.0));
    Record::new(id, fields)
}

fn decided(id: &str) -> Record {
    let mut record = backcharge(id);
    record
        .fields
        .insert("Approved or Dispute".into(), "Dispute".into());
    record
}

fn completed(report: TickReport) -> reviewsync_sync::PollSummary {
    match report {
        TickReport::Completed(summary) => summary,
        other => panic!("expected completed tick, got {other:?}"),
    }
}

#[tokio::test]
async fn one_tick_prunes_and_adds() {
    let h = Harness::new(true, &[backcharge("A"), backcharge("B")], Some(t0()));
    h.remote.push_since(Ok(vec![decided("A"), backcharge("C")]));

    let summary = completed(h.looper.tick().await);

    assert_eq!(h.cached_ids().await, vec!["B", "C"]);
    assert_eq!(summary.added, vec![RecordId::from("C")]);
    assert_eq!(summary.removed, vec![RecordId::from("A")]);
    assert_eq!(summary.fetched, 2);
}

#[tokio::test]
async fn fetch_uses_checkpoint_and_advances_it_with_overlap() {
    let start = t0() - chrono::Duration::minutes(15);
    let h = Harness::new(true, &[], Some(start));

    completed(h.looper.tick().await);

    assert_eq!(h.remote.since_calls(), vec![start]);
    assert_eq!(
        h.checkpoint(),
        Some(t0() - chrono::Duration::seconds(OVERLAP_SECS))
    );
}

#[tokio::test]
async fn repeated_ticks_without_remote_change_are_idempotent() {
    let h = Harness::new(true, &[backcharge("A")], Some(t0()));
    h.remote.push_since(Ok(vec![backcharge("A")]));
    completed(h.looper.tick().await);
    let ids = h.cached_ids().await;
    let checkpoint = h.checkpoint();

    h.remote.push_since(Ok(vec![backcharge("A")]));
    let summary = completed(h.looper.tick().await);

    assert_eq!(h.cached_ids().await, ids);
    assert_eq!(h.checkpoint(), checkpoint);
    assert!(summary.added.is_empty() && summary.removed.is_empty());
}

#[tokio::test]
async fn failed_poll_changes_nothing() {
    let h = Harness::new(true, &[backcharge("A")], Some(t0()));
    h.remote
        .push_since(Err(RemoteError::Transport("connection refused".into())));
    h.clock.advance(chrono::Duration::minutes(15));

    let report = h.looper.tick().await;

    assert!(matches!(report, TickReport::Failed(ref msg) if msg.contains("connection refused")));
    assert_eq!(h.cached_ids().await, vec!["A"]);
    assert_eq!(h.checkpoint(), Some(t0()));
    assert_eq!(h.store.save_count(), 0);
    assert!(!h.looper.is_polling(), "flag resets after a failed tick");
}

#[rstest]
#[case::autoload_on(true)]
#[case::autoload_off(false)]
#[tokio::test]
async fn record_leaving_scope_disappears_on_next_poll(#[case] autoload: bool) {
    let h = Harness::new(autoload, &[backcharge("A")], Some(t0()));

    // Poll N: A was edited but is still pending review.
    let mut edited = backcharge("A");
    edited.fields.insert("Amount".into(), FieldValue::Number(120.0));
    h.remote.push_since(Ok(vec![edited]));
    completed(h.looper.tick().await);
    assert_eq!(h.cached_ids().await, vec!["A"]);

    // Poll N+1: someone decided it.
    h.clock.advance(chrono::Duration::minutes(15));
    h.remote.push_since(Ok(vec![decided("A")]));
    let summary = completed(h.looper.tick().await);
    assert!(h.cached_ids().await.is_empty());
    assert_eq!(summary.removed, vec![RecordId::from("A")]);
}

#[tokio::test]
async fn autoload_off_announces_candidates_without_caching() {
    let h = Harness::new(false, &[backcharge("A")], Some(t0()));
    let mut rx = h.events.subscribe();
    h.remote.push_since(Ok(vec![backcharge("N1"), backcharge("N2")]));

    let summary = completed(h.looper.tick().await);

    assert_eq!(h.cached_ids().await, vec!["A"]);
    assert_eq!(
        summary.deferred,
        vec![RecordId::from("N1"), RecordId::from("N2")]
    );
    match rx.try_recv().expect("candidates event") {
        SyncEvent::CandidatesAvailable(records) => {
            let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
            assert_eq!(ids, vec!["N1", "N2"]);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(rx.try_recv().is_err(), "no snapshot when the cache is untouched");
    assert_eq!(h.pending_ids(), vec!["N1", "N2"]);
}

#[tokio::test]
async fn pending_candidate_leaving_scope_is_withdrawn() {
    let h = Harness::new(false, &[], Some(t0()));
    h.remote.push_since(Ok(vec![backcharge("N1"), backcharge("N2")]));
    completed(h.looper.tick().await);
    assert_eq!(h.pending_ids(), vec!["N1", "N2"]);

    h.clock.advance(chrono::Duration::seconds(60));
    h.remote.push_since(Ok(vec![decided("N1")]));
    let summary = completed(h.looper.tick().await);

    assert_eq!(summary.withdrawn, vec![RecordId::from("N1")]);
    assert!(summary.deferred.is_empty());
    assert_eq!(h.pending_ids(), vec!["N2"]);
    assert!(h.cached_ids().await.is_empty());
}

#[tokio::test]
async fn pending_candidate_is_refreshed_with_latest_version() {
    let h = Harness::new(false, &[], Some(t0()));
    h.remote.push_since(Ok(vec![backcharge("N1")]));
    completed(h.looper.tick().await);

    let mut edited = backcharge("N1");
    edited.fields.insert("Notes".into(), "photos attached".into());
    h.remote.push_since(Ok(vec![edited.clone()]));
    completed(h.looper.tick().await);

    let table = h.candidates.lock().expect("candidates");
    assert_eq!(table.records(), vec![edited]);
}

#[tokio::test]
async fn autoload_merge_clears_pending_entry() {
    let h = Harness::new(false, &[], Some(t0()));
    h.remote.push_since(Ok(vec![backcharge("N1")]));
    completed(h.looper.tick().await);
    h.state.set_autoload(true).expect("autoload on");

    h.remote.push_since(Ok(vec![backcharge("N1")]));
    let summary = completed(h.looper.tick().await);

    assert_eq!(summary.added, vec![RecordId::from("N1")]);
    assert_eq!(h.cached_ids().await, vec!["N1"]);
    assert!(h.pending_ids().is_empty());
}

#[tokio::test]
async fn record_reentering_scope_is_a_fresh_add() {
    let h = Harness::new(true, &[backcharge("A")], Some(t0()));
    h.remote.push_since(Ok(vec![decided("A")]));
    completed(h.looper.tick().await);
    assert!(h.cached_ids().await.is_empty());

    h.remote.push_since(Ok(vec![backcharge("A")]));
    let summary = completed(h.looper.tick().await);
    assert_eq!(summary.added, vec![RecordId::from("A")]);
    assert_eq!(h.cached_ids().await, vec!["A"]);
}

#[tokio::test]
async fn checkpoint_never_moves_backwards() {
    let ahead = t0() + chrono::Duration::hours(1);
    let h = Harness::new(true, &[], Some(ahead));

    let summary = completed(h.looper.tick().await);

    assert_eq!(summary.checkpoint, ahead);
    assert_eq!(h.checkpoint(), Some(ahead));
}

#[tokio::test]
async fn missing_checkpoint_starts_at_overlap_before_now() {
    let h = Harness::new(true, &[], None);
    completed(h.looper.tick().await);
    assert_eq!(
        h.remote.since_calls(),
        vec![t0() - chrono::Duration::seconds(OVERLAP_SECS)]
    );
}

#[tokio::test]
async fn overlapping_tick_is_skipped() {
    let h = Harness::new(true, &[], Some(t0()));
    let gate = h.remote.gate_next_since();

    let looper = h.looper.clone();
    let first = tokio::spawn(async move { looper.tick().await });
    tokio::task::yield_now().await;
    assert!(h.looper.is_polling());

    assert_eq!(h.looper.tick().await, TickReport::Skipped);

    gate.send(()).expect("gate open");
    let report = first.await.expect("join");
    assert!(matches!(report, TickReport::Completed(_)));
    assert!(!h.looper.is_polling());
}
