//! The authoritative record store, as seen by the engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use reviewsync_core::{FieldDelta, Record, RecordId};

use crate::error::RemoteError;

/// Remote collection of records. Implementations paginate internally.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Every record created or modified at or after `since`. The boundary is
    /// inclusive: a record stamped exactly `since` must be returned.
    async fn list_since(&self, since: DateTime<Utc>) -> Result<Vec<Record>, RemoteError>;

    /// Full listing, optionally narrowed by a server-side filter formula.
    async fn list_all(&self, filter: Option<&str>) -> Result<Vec<Record>, RemoteError>;

    /// Every record of another table in the same base. Used to resolve the
    /// names behind link fields.
    async fn list_table(&self, table_id: &str) -> Result<Vec<Record>, RemoteError>;

    /// Apply `delta` and return the authoritative post-write record.
    async fn patch(&self, id: &RecordId, delta: &FieldDelta) -> Result<Record, RemoteError>;
}
