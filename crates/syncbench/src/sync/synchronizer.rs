//! Remote-to-local data synchronizer.

use super::{LocalReplica, NetworkMonitor, RemoteClient, SyncError};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// How a document changed on both sides since the last pass is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Take the remote version and drop the local write.
    #[default]
    RemoteWins,
    /// Keep the local write and push it over the remote version.
    LocalWins,
}

#[derive(Debug, Default)]
struct State {
    policy: Option<ConflictPolicy>,
    checkpoint: u64,
    seen_generation: u64,
}

/// Keeps a [`LocalReplica`] in step with the remote for a set of ids.
///
/// Work only happens inside [`do_sync_pass`](Self::do_sync_pass); passes
/// are serialized.
#[derive(Debug)]
pub struct DataSynchronizer {
    client: RemoteClient,
    replica: LocalReplica,
    state: Mutex<State>,
}

impl DataSynchronizer {
    pub fn new(client: RemoteClient, replica: LocalReplica) -> Self {
        Self {
            client,
            replica,
            state: Mutex::new(State::default()),
        }
    }

    fn network(&self) -> &NetworkMonitor {
        self.client.network()
    }

    /// Enable syncing with the given conflict policy.
    pub fn configure(&self, policy: ConflictPolicy) {
        let mut state = self.state.lock();
        state.policy = Some(policy);
        state.seen_generation = self.network().generation();
    }

    pub fn is_configured(&self) -> bool {
        self.state.lock().policy.is_some()
    }

    /// Start syncing `ids`. Their bodies arrive with the next pass.
    pub fn sync_many(&self, ids: &[String]) -> Result<(), SyncError> {
        self.replica.add_synced(ids)
    }

    pub fn synced_ids(&self) -> Result<Vec<String>, SyncError> {
        self.replica.synced_ids()
    }

    /// Number of synced documents present locally.
    pub fn count(&self) -> Result<usize, SyncError> {
        self.replica.count()
    }

    pub fn count_where(&self, field: &str, value: &Value) -> Result<usize, SyncError> {
        self.replica.count_where(field, value)
    }

    /// Write locally; the change is pushed by a later pass.
    pub fn update_local(&self, ids: &[String], set: &Map<String, Value>) -> Result<usize, SyncError> {
        self.replica.update_local(ids, set)
    }

    /// Whether the change streams are up: configured and connected.
    pub fn are_all_streams_open(&self) -> bool {
        self.network().is_connected() && self.is_configured()
    }

    /// Run one pull-then-push pass.
    ///
    /// Returns `Ok(false)` without doing anything when disconnected.
    pub fn do_sync_pass(&self) -> Result<bool, SyncError> {
        let mut state = self.state.lock();
        let policy = state.policy.ok_or(SyncError::NotConfigured)?;
        if !self.network().is_connected() {
            return Ok(false);
        }

        let generation = self.network().generation();
        if generation != state.seen_generation {
            let marked = self.replica.mark_all_stale()?;
            debug!(marked, generation, "Streams reopened, documents marked stale");
            state.seen_generation = generation;
        }

        // Pull
        let batch = self.client.changes_since(state.checkpoint)?;
        let synced: BTreeSet<String> = self.replica.synced_ids()?.into_iter().collect();
        let mut to_fetch: BTreeSet<String> = batch
            .ids
            .into_iter()
            .filter(|id| synced.contains(id))
            .collect();
        to_fetch.extend(self.replica.stale_ids()?);

        let ids: Vec<String> = to_fetch.into_iter().collect();
        let fetched = if ids.is_empty() {
            Vec::new()
        } else {
            self.client.fetch(&ids)?
        };

        let mut apply = Vec::with_capacity(fetched.len());
        let mut keep_local = Vec::new();
        for remote in fetched {
            let local = self.replica.get(&remote.id)?;
            // Versions we already hold, such as our own earlier pushes, are
            // only marked current
            let held = local
                .as_ref()
                .filter(|l| l.body.is_some() && l.version >= remote.version);
            if let Some(l) = held {
                keep_local.push((remote.id, l.version));
                continue;
            }
            let conflicted = local.as_ref().is_some_and(|l| l.pending);
            if conflicted && policy == ConflictPolicy::LocalWins {
                keep_local.push((remote.id, remote.version));
            } else {
                apply.push((remote.id, remote.body, remote.version));
            }
        }
        trace!(applied = apply.len(), kept = keep_local.len(), "Pulled remote changes");
        self.replica.apply_remote(&apply)?;
        self.replica.mark_current(&keep_local)?;
        state.checkpoint = batch.checkpoint;

        // Push
        let pending = self.replica.pending()?;
        if !pending.is_empty() {
            let versions = self.client.push(&pending)?;
            let pushed: Vec<(String, u64)> = pending
                .into_iter()
                .map(|(id, _)| id)
                .zip(versions)
                .collect();
            trace!(pushed = pushed.len(), "Pushed local writes");
            self.replica.mark_pushed(&pushed)?;
        }

        Ok(true)
    }

    /// Flush the replica to disk.
    pub fn close(&self) -> Result<(), SyncError> {
        self.replica.checkpoint()
    }
}
