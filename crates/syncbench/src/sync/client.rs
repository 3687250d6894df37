//! The only path from a device to the remote collection.

use super::{NetworkMonitor, RemoteCollection, RemoteDocument, SyncError};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Bytes moved through a client, in JSON-encoded request/response size.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    sent: AtomicU64,
    received: AtomicU64,
}

impl TrafficCounters {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

/// Remote changes after a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeBatch {
    /// Distinct changed ids, in change order.
    pub ids: Vec<String>,
    /// Sequence to resume from next time.
    pub checkpoint: u64,
}

/// Client handle to a [`RemoteCollection`].
///
/// Calls fail with [`SyncError::Disconnected`] while the network monitor
/// reports no connectivity. Clones share the traffic counters.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    remote: RemoteCollection,
    network: NetworkMonitor,
    latency: Option<Duration>,
    traffic: Arc<TrafficCounters>,
}

fn encoded_len<T: Serialize + ?Sized>(value: &T) -> Result<u64, SyncError> {
    Ok(serde_json::to_vec(value)?.len() as u64)
}

impl RemoteClient {
    pub fn new(remote: RemoteCollection, network: NetworkMonitor, latency: Option<Duration>) -> Self {
        Self {
            remote,
            network,
            latency,
            traffic: Arc::new(TrafficCounters::default()),
        }
    }

    pub fn traffic(&self) -> &TrafficCounters {
        &self.traffic
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    /// One round trip: account the request, wait out the latency, run the
    /// operation against the remote and account the response.
    fn call<Req, Resp, F>(&self, request: &Req, op: F) -> Result<Resp, SyncError>
    where
        Req: Serialize + ?Sized,
        Resp: Serialize,
        F: FnOnce(&RemoteCollection) -> Result<Resp, SyncError>,
    {
        if !self.network.is_connected() {
            return Err(SyncError::Disconnected);
        }
        self.traffic
            .sent
            .fetch_add(encoded_len(request)?, Ordering::Relaxed);

        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }

        let response = op(&self.remote)?;
        self.traffic
            .received
            .fetch_add(encoded_len(&response)?, Ordering::Relaxed);
        Ok(response)
    }

    pub fn insert_many(&self, docs: &[Value]) -> Result<Vec<String>, SyncError> {
        self.call(docs, |remote| remote.insert_many(docs))
    }

    pub fn update_many(&self, ids: &[String], set: &Map<String, Value>) -> Result<usize, SyncError> {
        let request = json!({ "ids": ids, "$set": set });
        self.call(&request, |remote| Ok(remote.update_many(ids, set)))
    }

    pub fn count(&self) -> Result<usize, SyncError> {
        self.call(&json!({}), |remote| Ok(remote.count()))
    }

    pub fn count_where(&self, field: &str, value: &Value) -> Result<usize, SyncError> {
        let request = json!({ field: value });
        self.call(&request, |remote| Ok(remote.count_where(field, value)))
    }

    pub fn fetch(&self, ids: &[String]) -> Result<Vec<RemoteDocument>, SyncError> {
        self.call(ids, |remote| Ok(remote.find_many(ids)))
    }

    pub fn changes_since(&self, checkpoint: u64) -> Result<ChangeBatch, SyncError> {
        self.call(&checkpoint, |remote| {
            let (ids, checkpoint) = remote.changes_since(checkpoint);
            Ok(ChangeBatch { ids, checkpoint })
        })
    }

    /// Upload local writes. Returns the new remote version of each.
    pub fn push(&self, docs: &[(String, Value)]) -> Result<Vec<u64>, SyncError> {
        self.call(docs, |remote| {
            Ok(docs
                .iter()
                .map(|(id, body)| remote.replace(id, body.clone()))
                .collect())
        })
    }
}
