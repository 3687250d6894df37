//! Authoritative remote collection.

use super::{SyncError, apply_set, document_id};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A remote document at a given version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: String,
    pub body: Value,
    pub version: u64,
}

#[derive(Debug)]
struct ChangeEvent {
    seq: u64,
    id: String,
}

#[derive(Debug, Default)]
struct State {
    docs: HashMap<String, (Value, u64)>,
    log: Vec<ChangeEvent>,
    last_seq: u64,
}

impl State {
    fn record(&mut self, id: String) {
        self.last_seq += 1;
        self.log.push(ChangeEvent {
            seq: self.last_seq,
            id,
        });
    }
}

/// In-process stand-in for the server-side collection.
///
/// Every write bumps the document's version and appends to an ordered
/// change log. Cloning yields another handle to the same collection.
#[derive(Debug, Clone, Default)]
pub struct RemoteCollection {
    state: Arc<RwLock<State>>,
}

impl RemoteCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert new documents. Either all are inserted or none.
    pub fn insert_many(&self, docs: &[Value]) -> Result<Vec<String>, SyncError> {
        let mut state = self.state.write();

        let mut ids = Vec::with_capacity(docs.len());
        let mut batch = HashSet::with_capacity(docs.len());
        for doc in docs {
            let id = document_id(doc)?;
            if state.docs.contains_key(id) || !batch.insert(id) {
                return Err(SyncError::DuplicateId(id.to_string()));
            }
            ids.push(id.to_string());
        }

        for (id, doc) in ids.iter().zip(docs) {
            state.docs.insert(id.clone(), (doc.clone(), 1));
            state.record(id.clone());
        }
        Ok(ids)
    }

    /// Apply `set` to every listed document that exists. Returns how many
    /// were modified.
    pub fn update_many(&self, ids: &[String], set: &Map<String, Value>) -> usize {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let mut modified = 0;
        for id in ids {
            if let Some((body, version)) = state.docs.get_mut(id) {
                apply_set(body, set);
                *version += 1;
                modified += 1;
                state.record(id.clone());
            }
        }
        modified
    }

    /// Overwrite a document with a body written elsewhere, creating it if
    /// needed. Returns the new version.
    pub fn replace(&self, id: &str, body: Value) -> u64 {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let entry = state.docs.entry(id.to_string()).or_insert((Value::Null, 0));
        entry.0 = body;
        entry.1 += 1;
        let version = entry.1;
        state.record(id.to_string());
        version
    }

    pub fn find_many(&self, ids: &[String]) -> Vec<RemoteDocument> {
        let state = self.state.read();
        ids.iter()
            .filter_map(|id| {
                state.docs.get(id).map(|(body, version)| RemoteDocument {
                    id: id.clone(),
                    body: body.clone(),
                    version: *version,
                })
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.state.read().docs.len()
    }

    /// Number of documents whose top-level `field` equals `value`.
    pub fn count_where(&self, field: &str, value: &Value) -> usize {
        self.state
            .read()
            .docs
            .values()
            .filter(|(body, _)| body.get(field) == Some(value))
            .count()
    }

    /// Distinct ids changed after sequence `since`, plus the latest sequence.
    pub fn changes_since(&self, since: u64) -> (Vec<String>, u64) {
        let state = self.state.read();
        let start = state.log.partition_point(|event| event.seq <= since);

        let mut seen = HashSet::new();
        let ids = state.log[start..]
            .iter()
            .filter(|event| seen.insert(event.id.as_str()))
            .map(|event| event.id.clone())
            .collect();
        (ids, state.last_seq)
    }
}
