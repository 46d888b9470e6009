//! reviewsync core library: record types, scope predicate, configuration.
//!
//! - [`types`]: record identity, typed field values, the decode step
//! - [`scope`]: [`ScopePredicate`] and the configurable [`ScopeRules`]
//! - [`config`]: `~/.reviewsync/config.yaml` load / save
//! - [`error`]: [`ConfigError`], [`DecodeError`]

pub mod config;
pub mod error;
pub mod scope;
pub mod types;

pub use config::{BoardConfig, Config, LinkedTable, RemoteConfig, SyncSettings};
pub use error::{ConfigError, DecodeError};
pub use scope::{FieldCondition, FnScope, ScopePredicate, ScopeRules};
pub use types::{Attachment, FieldDelta, FieldValue, Fields, Record, RecordId};
