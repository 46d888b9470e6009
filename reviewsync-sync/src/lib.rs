//! # reviewsync-sync
//!
//! Keeps a local working set of review records consistent with a remote
//! store that is being edited by other people at the same time.
//!
//! - [`SaveCoordinator`]: single-flight writes per record, newest edit wins
//! - [`ReconciliationLoop`]: checkpointed delta polling with scope pruning
//! - [`CandidateTable`]: newcomers held back while autoload is off
//! - [`ScheduledTask`]: the periodic driver, with pause / resume
//! - [`NameDirectory`]: display names behind link fields, board filters
//! - [`SyncController`]: wires the above together for a host
//!
//! [`testing::MemoryRemote`] is an in-memory [`RemoteStore`] for tests and
//! offline use.

pub mod cache;
pub mod candidates;
pub mod clock;
pub mod controller;
pub mod error;
pub mod events;
pub mod names;
pub mod reconcile;
pub mod remote;
pub mod save;
pub mod schedule;
pub mod state;
pub mod testing;
pub mod upload;

pub use cache::{LocalCache, SharedCache};
pub use candidates::{CandidateTable, LoadReport, SharedCandidates};
pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{BootstrapReport, NameRefresh, SyncController, SyncDeps};
pub use error::{RemoteError, SyncError};
pub use events::{EventSink, SyncEvent};
pub use names::{display_name, BoardQuery, NameDirectory, ResolvedRecord};
pub use reconcile::{partition, Partition, PollSummary, ReconciliationLoop, TickReport};
pub use remote::RemoteStore;
pub use save::{SaveCoordinator, SaveHandle, SaveOutcome};
pub use schedule::{RunState, ScheduledTask};
pub use state::{FileStateStore, MemoryStateStore, PersistentState, StateStore, SyncState};
pub use upload::{collect_attachments, UploadError, UploadFile, Uploader};
