//! Persisted sync state: the reconciliation checkpoint and the autoload flag.
//!
//! Persists a [`SyncState`] JSON document at `<home>/.reviewsync/state.json`.
//! Writes use the atomic `.tmp` + rename pattern.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{io_err, SyncError};

/// On-disk state payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Everything modified before this instant is known. `None` until the
    /// first bootstrap.
    #[serde(default)]
    pub checkpoint: Option<DateTime<Utc>>,
    /// Merge new in-scope records automatically instead of asking first.
    #[serde(default = "default_autoload", deserialize_with = "autoload_compat")]
    pub autoload: bool,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            checkpoint: None,
            autoload: default_autoload(),
        }
    }
}

fn default_autoload() -> bool {
    true
}

/// Accepts `true`/`false` as well as the older `"1"`/`"0"` string flag.
fn autoload_compat<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Compat {
        Flag(bool),
        Legacy(String),
    }

    match Compat::deserialize(deserializer)? {
        Compat::Flag(flag) => Ok(flag),
        Compat::Legacy(raw) => Ok(raw.trim() == "1"),
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// Durable storage for [`SyncState`].
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<SyncState, SyncError>;
    fn save(&self, state: &SyncState) -> Result<(), SyncError>;
}

/// `<home>/.reviewsync/state.json`
pub fn state_path_at(home: &Path) -> PathBuf {
    home.join(".reviewsync").join("state.json")
}

/// JSON file store. A missing file loads as defaults.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn at_home(home: &Path) -> Self {
        Self::new(state_path_at(home))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<SyncState, SyncError> {
        if !self.path.exists() {
            return Ok(SyncState::default());
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| io_err(&self.path, e))?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, state: &SyncState) -> Result<(), SyncError> {
        let Some(dir) = self.path.parent() else {
            return Err(io_err(
                &self.path,
                std::io::Error::other("invalid state file path"),
            ));
        };
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }
}

/// Non-durable store for tests and embedding hosts that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<SyncState>,
    saves: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new(state: SyncState) -> Self {
        Self {
            state: Mutex::new(state),
            saves: AtomicUsize::new(0),
        }
    }

    /// Last saved (or initial) state.
    pub fn stored(&self) -> SyncState {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<SyncState, SyncError> {
        Ok(self.stored())
    }

    fn save(&self, state: &SyncState) -> Result<(), SyncError> {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PersistentState
// ---------------------------------------------------------------------------

/// In-memory view of [`SyncState`] that writes through to a [`StateStore`].
pub struct PersistentState {
    store: Arc<dyn StateStore>,
    current: Mutex<SyncState>,
}

impl PersistentState {
    pub fn load(store: Arc<dyn StateStore>) -> Result<Self, SyncError> {
        let current = store.load()?;
        Ok(Self {
            store,
            current: Mutex::new(current),
        })
    }

    /// Defaults until [`PersistentState::reload`] reads the store.
    pub fn unloaded(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            current: Mutex::new(SyncState::default()),
        }
    }

    /// Replace the in-memory state with what the store holds.
    pub fn reload(&self) -> Result<(), SyncError> {
        let loaded = self.store.load()?;
        *self.lock() = loaded;
        Ok(())
    }

    pub fn snapshot(&self) -> SyncState {
        self.lock().clone()
    }

    pub fn checkpoint(&self) -> Option<DateTime<Utc>> {
        self.lock().checkpoint
    }

    pub fn autoload(&self) -> bool {
        self.lock().autoload
    }

    /// Move the checkpoint forward to `candidate` (never backwards) and
    /// persist. A failed write is logged; the in-memory checkpoint still
    /// advances and the next successful poll persists it.
    pub fn advance_checkpoint(&self, candidate: DateTime<Utc>) -> DateTime<Utc> {
        let mut state = self.lock();
        let next = match state.checkpoint {
            Some(current) if current > candidate => current,
            _ => candidate,
        };
        if state.checkpoint == Some(next) {
            return next;
        }
        state.checkpoint = Some(next);
        if let Err(err) = self.store.save(&state) {
            tracing::warn!(error = %err, checkpoint = %next, "failed to persist checkpoint");
        }
        next
    }

    pub fn set_autoload(&self, enabled: bool) -> Result<(), SyncError> {
        let mut state = self.lock();
        let mut next = state.clone();
        next.autoload = enabled;
        self.store.save(&next)?;
        *state = next;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SyncState> {
        self.current.lock().unwrap_or_else(|p| p.into_inner())
    }
}
