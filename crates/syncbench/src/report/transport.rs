//! Destinations for run documents.
//!
//! A run document is inserted once when a run starts, receives one
//! aggregated report per finished combination, and has its status set
//! when the run ends. Transports work on plain JSON documents keyed by
//! their `_id`.

use super::RunStatus;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Errors raised while delivering run documents.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] ureq::Error),

    #[error("Run document {0} not found")]
    UnknownRun(String),

    #[error("Run document has no string _id")]
    MissingId,

    #[error("Invalid webhook URL: {0}")]
    InvalidUrl(String),

    #[error("Collection path {} is not a directory", .0.display())]
    NotADirectory(PathBuf),
}

/// A destination for run documents.
pub trait ReportTransport: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    /// Store a new run document. It must carry a string `_id`.
    fn insert_run(&self, doc: &Value) -> Result<(), TransportError>;

    /// Append `result` to the run's `results` array.
    fn append_result(&self, result_id: &str, result: &Value) -> Result<(), TransportError>;

    /// Set the run's `status`.
    fn set_status(&self, result_id: &str, status: RunStatus) -> Result<(), TransportError>;
}

fn run_id(doc: &Value) -> Result<&str, TransportError> {
    doc.get("_id")
        .and_then(Value::as_str)
        .ok_or(TransportError::MissingId)
}

fn push_result(doc: &mut Value, result: &Value) {
    if let Value::Object(fields) = doc {
        let results = fields
            .entry("results")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = results {
            items.push(result.clone());
        } else {
            *results = Value::Array(vec![result.clone()]);
        }
    }
}

fn put_status(doc: &mut Value, status: RunStatus) {
    if let Value::Object(fields) = doc {
        fields.insert("status".into(), Value::String(status.to_string()));
    }
}

/// A directory holding one pretty-printed `<_id>.json` file per run.
#[derive(Debug)]
pub struct FileCollection {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileCollection {
    /// Open the collection, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, TransportError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        if !fs::metadata(&dir)?.is_dir() {
            return Err(TransportError::NotADirectory(dir));
        }
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding run `result_id`.
    pub fn document_path(&self, result_id: &str) -> PathBuf {
        self.dir.join(format!("{result_id}.json"))
    }

    fn write(&self, path: &Path, doc: &Value) -> Result<(), TransportError> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(doc)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn update(&self, result_id: &str, f: impl FnOnce(&mut Value)) -> Result<(), TransportError> {
        let _guard = self.lock.lock();
        let path = self.document_path(result_id);
        if !path.exists() {
            return Err(TransportError::UnknownRun(result_id.to_string()));
        }
        let mut doc: Value = serde_json::from_slice(&fs::read(&path)?)?;
        f(&mut doc);
        self.write(&path, &doc)
    }

    /// Read a stored run document.
    pub fn read(&self, result_id: &str) -> Result<Value, TransportError> {
        let path = self.document_path(result_id);
        if !path.exists() {
            return Err(TransportError::UnknownRun(result_id.to_string()));
        }
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }
}

impl ReportTransport for FileCollection {
    fn name(&self) -> &'static str {
        "file"
    }

    fn insert_run(&self, doc: &Value) -> Result<(), TransportError> {
        let _guard = self.lock.lock();
        let path = self.document_path(run_id(doc)?);
        self.write(&path, doc)?;
        debug!(path = %path.display(), "Inserted run document");
        Ok(())
    }

    fn append_result(&self, result_id: &str, result: &Value) -> Result<(), TransportError> {
        self.update(result_id, |doc| push_result(doc, result))
    }

    fn set_status(&self, result_id: &str, status: RunStatus) -> Result<(), TransportError> {
        self.update(result_id, |doc| put_status(doc, status))
    }
}

/// Posts each run document to a webhook once its status is final.
///
/// Results are buffered in memory until then, so a run that never
/// completes is never delivered.
pub struct WebhookTransport {
    url: Url,
    agent: ureq::Agent,
    pending: Mutex<HashMap<String, Value>>,
}

impl std::fmt::Debug for WebhookTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookTransport")
            .field("url", &self.url.as_str())
            .field("pending", &self.pending.lock().len())
            .finish_non_exhaustive()
    }
}

impl WebhookTransport {
    /// Validate `url` as an absolute http(s) URL with a host.
    pub fn new(url: &str) -> Result<Self, TransportError> {
        let invalid = |reason: &str| TransportError::InvalidUrl(format!("{url}: {reason}"));
        let url = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("unsupported scheme"));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(invalid("missing host"));
        }

        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(30)))
            .build()
            .into();

        Ok(Self {
            url,
            agent,
            pending: Mutex::new(HashMap::new()),
        })
    }

    fn buffered(&self, result_id: &str, f: impl FnOnce(&mut Value)) -> Result<(), TransportError> {
        let mut pending = self.pending.lock();
        let doc = pending
            .get_mut(result_id)
            .ok_or_else(|| TransportError::UnknownRun(result_id.to_string()))?;
        f(doc);
        Ok(())
    }
}

impl ReportTransport for WebhookTransport {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn insert_run(&self, doc: &Value) -> Result<(), TransportError> {
        let id = run_id(doc)?.to_string();
        self.pending.lock().insert(id, doc.clone());
        Ok(())
    }

    fn append_result(&self, result_id: &str, result: &Value) -> Result<(), TransportError> {
        self.buffered(result_id, |doc| push_result(doc, result))
    }

    fn set_status(&self, result_id: &str, status: RunStatus) -> Result<(), TransportError> {
        let mut doc = self
            .pending
            .lock()
            .remove(result_id)
            .ok_or_else(|| TransportError::UnknownRun(result_id.to_string()))?;
        put_status(&mut doc, status);

        let body = serde_json::to_string(&doc)?;
        self.agent
            .post(self.url.as_str())
            .header("Content-Type", "application/json; charset=utf-8")
            .send(body.as_bytes())?;
        debug!(url = %self.url, result_id, "Delivered run document");
        Ok(())
    }
}

/// An in-process collection. Clones share the same documents.
#[derive(Debug, Clone, Default)]
pub struct MemoryCollection {
    docs: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a stored run document.
    pub fn get(&self, result_id: &str) -> Option<Value> {
        self.docs.lock().get(result_id).cloned()
    }

    /// Snapshot of every stored run document.
    pub fn documents(&self) -> Vec<Value> {
        self.docs.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.docs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.lock().is_empty()
    }

    fn update(&self, result_id: &str, f: impl FnOnce(&mut Value)) -> Result<(), TransportError> {
        let mut docs = self.docs.lock();
        let doc = docs
            .get_mut(result_id)
            .ok_or_else(|| TransportError::UnknownRun(result_id.to_string()))?;
        f(doc);
        Ok(())
    }
}

impl ReportTransport for MemoryCollection {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn insert_run(&self, doc: &Value) -> Result<(), TransportError> {
        let id = run_id(doc)?.to_string();
        self.docs.lock().insert(id, doc.clone());
        Ok(())
    }

    fn append_result(&self, result_id: &str, result: &Value) -> Result<(), TransportError> {
        self.update(result_id, |doc| push_result(doc, result))
    }

    fn set_status(&self, result_id: &str, status: RunStatus) -> Result<(), TransportError> {
        self.update(result_id, |doc| put_status(doc, status))
    }
}
