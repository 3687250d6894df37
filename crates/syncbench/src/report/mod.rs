//! Run documents and their delivery.
//!
//! Every run (one scenario over the whole parameter matrix) is tracked as
//! one document: inserted with status `In Progress`, extended with one
//! aggregated report per combination, and closed as `Success` or
//! `Failure`. Delivery problems never abort a run; they are logged and
//! the run carries on.

pub mod transport;

pub use transport::{
    FileCollection, MemoryCollection, ReportTransport, TransportError, WebhookTransport,
};

use crate::config::{BenchmarkConfig, OutputConfig};
use crate::results::{AggregatedReport, BenchmarkPrinter};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::{info, warn};
use uuid::Uuid;

/// Lifecycle state of a run document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    #[serde(rename = "In Progress")]
    InProgress,
    Success,
    Failure,
}

impl RunStatus {
    /// Terminal status for a run whose combinations all did (or did not)
    /// succeed.
    pub fn from_success(success: bool) -> Self {
        if success { Self::Success } else { Self::Failure }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "In Progress"),
            Self::Success => write!(f, "Success"),
            Self::Failure => write!(f, "Failure"),
        }
    }
}

/// Terminal status of a named run, for the end-of-process summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub name: String,
    pub status: RunStatus,
}

impl RunOutcome {
    pub fn new(name: impl Into<String>, status: RunStatus) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }
}

/// Parameters a run was executed with. Fixed once the run starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestParams {
    pub run_id: Uuid,
    pub name: String,
    pub data_probe_granularity_ms: u64,
    pub num_outliers_each_side: usize,
    pub num_iters: usize,
    pub date: DateTime<Utc>,
    pub sdk: String,
    pub host: String,
    pub sync_host: String,
}

impl TestParams {
    pub fn new(run_id: Uuid, name: impl Into<String>, config: &BenchmarkConfig) -> Self {
        Self {
            run_id,
            name: name.into(),
            data_probe_granularity_ms: u64::try_from(config.granularity.as_millis())
                .unwrap_or(u64::MAX),
            num_outliers_each_side: config.outliers,
            num_iters: config.iterations,
            date: Utc::now(),
            sdk: "rust".to_string(),
            host: config.host.clone(),
            sync_host: config.sync_host.clone(),
        }
    }

    /// The initial run document: parameters, extra fields, `_id`, an
    /// `In Progress` status and no results.
    pub fn run_document(&self, result_id: &str, extra: &Map<String, Value>) -> Result<Value> {
        let Value::Object(mut doc) = serde_json::to_value(self)? else {
            anyhow::bail!("test parameters did not serialize to an object");
        };
        for (key, value) in extra {
            doc.entry(key.clone()).or_insert_with(|| value.clone());
        }
        doc.insert("_id".into(), Value::String(result_id.to_string()));
        doc.insert(
            "status".into(),
            serde_json::to_value(RunStatus::InProgress)?,
        );
        doc.insert("results".into(), Value::Array(Vec::new()));
        Ok(Value::Object(doc))
    }
}

/// A run that has been announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub result_id: String,
    pub name: String,
    pub iterations: usize,
}

/// Where finished combinations and run statuses go.
pub struct ReportSink {
    transports: Vec<Box<dyn ReportTransport>>,
    stdout: bool,
    printer: BenchmarkPrinter,
}

impl fmt::Debug for ReportSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.transports.iter().map(|t| t.name()).collect();
        f.debug_struct("ReportSink")
            .field("transports", &names)
            .field("stdout", &self.stdout)
            .finish_non_exhaustive()
    }
}

impl ReportSink {
    /// A sink with no transports.
    pub fn new(stdout: bool, color: bool) -> Self {
        Self {
            transports: Vec::new(),
            stdout,
            printer: BenchmarkPrinter::new(color),
        }
    }

    /// Open every transport named in `output`.
    ///
    /// Failing to open one is fatal: the run has nowhere to report to.
    pub fn connect(output: &OutputConfig) -> Result<Self> {
        let mut sink = Self::new(output.stdout, output.color);

        if let Some(dir) = &output.collection_dir {
            let collection = FileCollection::open(dir)
                .with_context(|| format!("failed to open result collection {}", dir.display()))?;
            sink = sink.with_transport(collection);
        }
        if let Some(url) = &output.webhook_url {
            let hook = WebhookTransport::new(url.as_str()).context("failed to set up webhook")?;
            sink = sink.with_transport(hook);
        }

        Ok(sink)
    }

    #[must_use]
    pub fn with_transport(mut self, transport: impl ReportTransport + 'static) -> Self {
        self.transports.push(Box::new(transport));
        self
    }

    pub fn has_transports(&self) -> bool {
        !self.transports.is_empty()
    }

    pub fn stdout_enabled(&self) -> bool {
        self.stdout
    }

    pub fn printer(&self) -> &BenchmarkPrinter {
        &self.printer
    }

    fn each_transport(&self, what: &str, f: impl Fn(&dyn ReportTransport) -> Result<(), TransportError>) {
        for transport in &self.transports {
            if let Err(e) = f(transport.as_ref()) {
                warn!(transport = transport.name(), "Failed to {what}: {e}");
            }
        }
    }

    /// Insert the run document for a new run.
    pub fn announce_start(&self, params: &TestParams, extra: &Map<String, Value>) -> RunHandle {
        let handle = RunHandle {
            result_id: Uuid::new_v4().simple().to_string(),
            name: params.name.clone(),
            iterations: params.num_iters,
        };

        if self.has_transports() {
            match params.run_document(&handle.result_id, extra) {
                Ok(doc) => {
                    self.each_transport("insert run document", |t| t.insert_run(&doc));
                    if self.stdout {
                        info!("Starting Test: {doc}");
                    }
                }
                Err(e) => warn!("Failed to build run document: {e}"),
            }
        }

        handle
    }

    /// Record one finished combination.
    pub fn submit(&self, handle: &RunHandle, report: &AggregatedReport) {
        let json = match serde_json::to_value(report) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize report for {}: {e}", handle.name);
                return;
            }
        };

        if self.stdout {
            self.printer.print_report(report, handle.iterations);
            info!("({}) {json}", report.status_tag());
        }

        self.each_transport("append result", |t| t.append_result(&handle.result_id, &json));
    }

    /// Close the run with its terminal status.
    pub fn announce_completion(&self, handle: &RunHandle, success: bool) -> RunStatus {
        let status = RunStatus::from_success(success);
        self.each_transport("set run status", |t| t.set_status(&handle.result_id, status));
        status
    }
}
