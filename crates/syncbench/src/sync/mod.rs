//! In-process remote-to-local sync engine.
//!
//! A [`RemoteCollection`] plays the authoritative server, reached only
//! through a [`RemoteClient`] that honours the [`NetworkMonitor`]. The
//! [`DataSynchronizer`] mirrors configured documents into a SQLite
//! [`LocalReplica`] one sync pass at a time.

mod client;
mod context;
mod network;
mod remote;
mod replica;
mod synchronizer;

pub use client::{ChangeBatch, RemoteClient, TrafficCounters};
pub use context::{LocalContextFactory, SyncContext};
pub use network::NetworkMonitor;
pub use remote::{RemoteCollection, RemoteDocument};
pub use replica::{LocalDocument, LocalReplica};
pub use synchronizer::{ConflictPolicy, DataSynchronizer};

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised by the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Network is disconnected")]
    Disconnected,

    #[error("Synchronizer has not been configured")]
    NotConfigured,

    #[error("Document is missing a string _id")]
    MissingId,

    #[error("Document {0} already exists")]
    DuplicateId(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Id field every synced document carries.
pub const ID_FIELD: &str = "_id";

/// The `_id` of a document body.
pub fn document_id(body: &Value) -> Result<&str, SyncError> {
    body.get(ID_FIELD)
        .and_then(Value::as_str)
        .ok_or(SyncError::MissingId)
}

/// Overwrite top-level fields of `body` with those in `set`.
///
/// The `_id` field is never changed.
pub fn apply_set(body: &mut Value, set: &Map<String, Value>) {
    if let Value::Object(fields) = body {
        for (key, value) in set {
            if key != ID_FIELD {
                fields.insert(key.clone(), value.clone());
            }
        }
    }
}
