//! Notifications pushed to whatever renders the working set.

use tokio::sync::broadcast;

use reviewsync_core::Record;

use crate::cache::LocalCache;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The cache changed; carries the full new snapshot.
    SnapshotChanged(Vec<Record>),
    /// New in-scope records were found while autoload is off. The cache was
    /// not touched; they wait in the candidate table for `request_manual_load`.
    CandidatesAvailable(Vec<Record>),
}

/// Sending side of the event channel. Sends with no subscribers are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn snapshot_changed(&self, cache: &LocalCache) {
        let _ = self.tx.send(SyncEvent::SnapshotChanged(cache.snapshot()));
    }

    pub fn candidates(&self, records: Vec<Record>) {
        let _ = self.tx.send(SyncEvent::CandidatesAvailable(records));
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(64)
    }
}
