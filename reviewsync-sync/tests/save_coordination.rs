use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use reviewsync_core::{FieldDelta, FieldValue, Fields, Record, RecordId, ScopeRules};
use reviewsync_sync::testing::MemoryRemote;
use reviewsync_sync::{
    EventSink, LocalCache, RemoteError, RemoteStore, SaveCoordinator, SaveOutcome, SharedCache,
    SyncEvent,
};

fn backcharge(id: &str, amount: f64) -> Record {
    let mut fields = Fields::new();
    fields.insert("Type of Backcharge".into(), "Builder Issued Backcharge".into());
    fields.insert("Amount".into(), FieldValue::Number(amount));
    Record::new(id, fields)
}

fn set(field: &str, value: impl Into<FieldValue>) -> FieldDelta {
    let mut delta = FieldDelta::new();
    delta.insert(field.to_string(), Some(value.into()));
    delta
}

fn setup(records: &[Record]) -> (Arc<MemoryRemote>, SharedCache, EventSink, SaveCoordinator) {
    let remote = Arc::new(MemoryRemote::with_records(records.iter().cloned()));
    let mut cache = LocalCache::new();
    for record in records {
        cache.upsert(record.clone());
    }
    let cache = cache.shared();
    let events = EventSink::default();
    let saves = SaveCoordinator::new(
        remote.clone(),
        Arc::new(ScopeRules::default()),
        cache.clone(),
        events.clone(),
    );
    (remote, cache, events, saves)
}

fn id(raw: &str) -> RecordId {
    RecordId::from(raw)
}

#[tokio::test]
async fn newer_edit_supersedes_in_flight_edit() {
    let (remote, cache, _events, saves) = setup(&[backcharge("X", 40.0)]);

    let gate = remote.gate_next_patch();
    let v1 = saves.submit(id("X"), set("Amount", 45.0)).await;
    let v2 = saves.submit(id("X"), set("Amount", 50.0)).await;
    drop(gate);

    assert_eq!(v1.outcome().await, SaveOutcome::Superseded);
    assert_eq!(v2.outcome().await, SaveOutcome::Applied(backcharge("X", 50.0)));

    let cached = cache.read().await.get(&id("X")).cloned();
    assert_eq!(cached, Some(backcharge("X", 50.0)));
    assert_eq!(remote.get(&id("X")), Some(backcharge("X", 50.0)));
    assert_eq!(saves.in_flight(), 0);
}

#[tokio::test]
async fn rejected_save_reports_last_confirmed_value() {
    let (remote, cache, _events, saves) = setup(&[backcharge("X", 40.0)]);
    remote.fail_next_patch(RemoteError::Rejected {
        status: 422,
        kind: Some("INVALID_VALUE_FOR_COLUMN".into()),
        message: "Amount must be below 45".into(),
    });

    let outcome = saves.submit(id("X"), set("Amount", 50.0)).await.outcome().await;
    match outcome {
        SaveOutcome::Rejected { reason, last_good } => {
            assert!(matches!(reason, RemoteError::Rejected { status: 422, .. }));
            let revert = last_good.expect("last good record");
            assert_eq!(revert.field("Amount"), Some(&FieldValue::Number(40.0)));
        }
        other => panic!("expected rejection, got {other:?}"),
    }

    let cached = cache.read().await.get(&id("X")).cloned();
    assert_eq!(cached, Some(backcharge("X", 40.0)), "cache keeps the confirmed value");
    assert_eq!(saves.last_good(&id("X")), None, "only applied saves set last good");
}

#[tokio::test]
async fn rejection_after_an_applied_save_reverts_to_that_save() {
    let (remote, _cache, _events, saves) = setup(&[backcharge("X", 40.0)]);

    let first = saves.submit(id("X"), set("Amount", 42.0)).await.outcome().await;
    assert!(first.is_applied());

    remote.fail_next_patch(RemoteError::Rejected {
        status: 422,
        kind: None,
        message: "nope".into(),
    });
    let second = saves.submit(id("X"), set("Amount", 99.0)).await.outcome().await;
    let SaveOutcome::Rejected { last_good, .. } = second else {
        panic!("expected rejection");
    };
    assert_eq!(last_good, Some(backcharge("X", 42.0)));
}

#[tokio::test]
async fn transport_cancel_of_current_save_is_a_rejection() {
    let (remote, _cache, _events, saves) = setup(&[backcharge("X", 40.0)]);
    remote.fail_next_patch(RemoteError::Cancelled);

    let outcome = saves.submit(id("X"), set("Amount", 41.0)).await.outcome().await;
    assert!(
        matches!(
            outcome,
            SaveOutcome::Rejected {
                reason: RemoteError::Cancelled,
                ..
            }
        ),
        "got {outcome:?}"
    );
}

#[tokio::test]
async fn saving_a_record_out_of_scope_removes_it() {
    let (_remote, cache, _events, saves) = setup(&[backcharge("X", 40.0), backcharge("Y", 10.0)]);

    let outcome = saves
        .submit(id("X"), set("Approved or Dispute", "Approved"))
        .await
        .outcome()
        .await;
    let SaveOutcome::Applied(record) = outcome else {
        panic!("expected applied");
    };
    assert_eq!(record.text("Approved or Dispute"), Some("Approved"));

    let cache = cache.read().await;
    assert!(!cache.has(&id("X")), "decided record leaves the working set");
    assert!(cache.has(&id("Y")));
}

#[tokio::test]
async fn saves_to_different_records_run_in_parallel() {
    let (remote, cache, _events, saves) = setup(&[backcharge("X", 1.0), backcharge("Y", 2.0)]);

    let gate = remote.gate_next_patch();
    let x = saves.submit(id("X"), set("Amount", 10.0)).await;
    // Let X reach the remote and park on the gate.
    tokio::task::yield_now().await;
    let y = saves.submit(id("Y"), set("Amount", 20.0)).await;

    assert_eq!(y.outcome().await, SaveOutcome::Applied(backcharge("Y", 20.0)));
    assert_eq!(saves.in_flight(), 1, "X is still waiting on the remote");

    gate.send(()).expect("gate open");
    assert_eq!(x.outcome().await, SaveOutcome::Applied(backcharge("X", 10.0)));
    assert_eq!(cache.read().await.len(), 2);
}

#[tokio::test]
async fn applied_save_publishes_a_snapshot() {
    let (_remote, _cache, events, saves) = setup(&[backcharge("X", 40.0)]);
    let mut rx = events.subscribe();

    saves.submit(id("X"), set("Amount", 41.0)).await.outcome().await;

    match rx.recv().await.expect("event") {
        SyncEvent::SnapshotChanged(records) => {
            assert_eq!(records, vec![backcharge("X", 41.0)]);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn blank_text_equals_absent_field_for_short_circuit() {
    let (remote, _cache, _events, saves) = setup(&[backcharge("X", 40.0)]);

    let handle = saves.submit(id("X"), set("Approved or Dispute", "")).await;
    assert!(handle.is_ready());
    assert!(handle.outcome().await.is_applied());
    assert_eq!(remote.patch_calls(), 0);
}

/// Remote whose writes run on their own task, like a blocking HTTP request:
/// dropping the caller's future does not stop the write. The first write
/// waits for `release` and reports its result on `finished`.
struct DetachedRemote {
    inner: Arc<MemoryRemote>,
    hold: Mutex<Option<oneshot::Receiver<()>>>,
    finished: Mutex<Option<oneshot::Sender<Result<Record, RemoteError>>>>,
    calls: AtomicUsize,
}

impl DetachedRemote {
    fn new(
        inner: Arc<MemoryRemote>,
    ) -> (
        Arc<Self>,
        oneshot::Sender<()>,
        oneshot::Receiver<Result<Record, RemoteError>>,
    ) {
        let (release, hold) = oneshot::channel();
        let (finished_tx, finished_rx) = oneshot::channel();
        let remote = Arc::new(Self {
            inner,
            hold: Mutex::new(Some(hold)),
            finished: Mutex::new(Some(finished_tx)),
            calls: AtomicUsize::new(0),
        });
        (remote, release, finished_rx)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for DetachedRemote {
    async fn list_since(&self, since: DateTime<Utc>) -> Result<Vec<Record>, RemoteError> {
        self.inner.list_since(since).await
    }

    async fn list_all(&self, filter: Option<&str>) -> Result<Vec<Record>, RemoteError> {
        self.inner.list_all(filter).await
    }

    async fn list_table(&self, table_id: &str) -> Result<Vec<Record>, RemoteError> {
        self.inner.list_table(table_id).await
    }

    async fn patch(&self, id: &RecordId, delta: &FieldDelta) -> Result<Record, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let hold = self.hold.lock().unwrap().take();
        let finished = if hold.is_some() {
            self.finished.lock().unwrap().take()
        } else {
            None
        };
        let inner = self.inner.clone();
        let (id, delta) = (id.clone(), delta.clone());
        let write = tokio::spawn(async move {
            if let Some(hold) = hold {
                let _ = hold.await;
            }
            let result = inner.patch(&id, &delta).await;
            if let Some(finished) = finished {
                let _ = finished.send(result.clone());
            }
            result
        });
        write
            .await
            .unwrap_or_else(|err| Err(RemoteError::Transport(err.to_string())))
    }
}

#[tokio::test]
async fn superseded_write_that_completes_late_changes_nothing_locally() {
    let memory = Arc::new(MemoryRemote::with_records([backcharge("X", 40.0)]));
    let (remote, release, finished) = DetachedRemote::new(memory.clone());
    let mut cache = LocalCache::new();
    cache.upsert(backcharge("X", 40.0));
    let cache = cache.shared();
    let saves = SaveCoordinator::new(
        remote.clone(),
        Arc::new(ScopeRules::default()),
        cache.clone(),
        EventSink::default(),
    );

    let v1 = saves.submit(id("X"), set("Amount", 45.0)).await;
    while remote.calls() == 0 {
        tokio::task::yield_now().await;
    }
    let v2 = saves.submit(id("X"), set("Amount", 50.0)).await;

    assert_eq!(v2.outcome().await, SaveOutcome::Applied(backcharge("X", 50.0)));
    assert_eq!(v1.outcome().await, SaveOutcome::Superseded);

    // The first write was never stopped and now succeeds after the second.
    release.send(()).expect("release first write");
    let late = finished.await.expect("first write finished");
    assert_eq!(late, Ok(backcharge("X", 45.0)));
    tokio::task::yield_now().await;

    // The remote holds the late value; the engine's view does not move.
    assert_eq!(memory.get(&id("X")), Some(backcharge("X", 45.0)));
    assert_eq!(
        cache.read().await.get(&id("X")).cloned(),
        Some(backcharge("X", 50.0))
    );
    assert_eq!(saves.last_good(&id("X")), Some(backcharge("X", 50.0)));
    assert_eq!(saves.in_flight(), 0);
}
