//! Per-combination sample accumulation and aggregated reports.

use crate::bench::MatrixPoint;
use crate::results::stats::StatBlock;
use serde::{Deserialize, Serialize};
use std::backtrace::BacktraceStatus;
use std::collections::BTreeMap;

/// A measured quantity recorded once per measured iteration.
///
/// The serialized names are the keys used in persisted reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    /// Wall-clock time of the timed workload, in milliseconds.
    TimeMs,
    /// Bytes sent to the remote during the timed workload.
    NetworkSentBytes,
    /// Bytes received from the remote during the timed workload.
    NetworkReceivedBytes,
    /// Mean resident memory observed while the workload ran.
    MemoryBytes,
    /// Size of the context's data directory after the workload.
    DiskBytes,
    /// Mean number of live threads observed while the workload ran.
    ActiveThreadCounts,
}

impl Metric {
    /// Every metric, in report order.
    pub const ALL: [Metric; 6] = [
        Metric::TimeMs,
        Metric::NetworkSentBytes,
        Metric::NetworkReceivedBytes,
        Metric::MemoryBytes,
        Metric::DiskBytes,
        Metric::ActiveThreadCounts,
    ];

    /// Report key for this metric.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TimeMs => "timeMs",
            Self::NetworkSentBytes => "networkSentBytes",
            Self::NetworkReceivedBytes => "networkReceivedBytes",
            Self::MemoryBytes => "memoryBytes",
            Self::DiskBytes => "diskBytes",
            Self::ActiveThreadCounts => "activeThreadCounts",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A failed iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    /// 1-based iteration index within the combination.
    pub iteration: usize,
    /// Human-readable failure reason.
    pub reason: String,
    /// Cause chain, then backtrace frames when one was captured.
    pub stack_trace: Vec<String>,
}

impl FailureRecord {
    pub fn new(iteration: usize, reason: impl Into<String>, stack_trace: Vec<String>) -> Self {
        Self {
            iteration,
            reason: reason.into(),
            stack_trace,
        }
    }

    /// Capture an error raised during `iteration`.
    pub fn from_error(iteration: usize, error: &anyhow::Error) -> Self {
        let mut stack_trace: Vec<String> = error.chain().map(ToString::to_string).collect();

        let backtrace = error.backtrace();
        if backtrace.status() == BacktraceStatus::Captured {
            stack_trace.extend(
                backtrace
                    .to_string()
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string),
            );
        }

        Self::new(iteration, error.to_string(), stack_trace)
    }
}

/// Finalized result of one combination.
///
/// Statistics are only present when the combination succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedReport {
    pub num_docs: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_size: Option<usize>,
    pub success: bool,
    #[serde(flatten)]
    pub stats: BTreeMap<Metric, StatBlock>,
    pub num_failures: usize,
    pub failures: Vec<FailureRecord>,
}

impl AggregatedReport {
    /// Statistics for one metric, if the combination succeeded and tracked it.
    pub fn stat(&self, metric: Metric) -> Option<&StatBlock> {
        self.stats.get(&metric)
    }

    /// Short status tag used in logs.
    pub fn status_tag(&self) -> &'static str {
        if self.success { "SUCCESS" } else { "FAILED" }
    }
}

/// Collects samples for one combination across all of its iterations.
///
/// Created fresh for each combination and consumed by [`finalize`].
///
/// [`finalize`]: SampleAccumulator::finalize
#[derive(Debug)]
pub struct SampleAccumulator {
    point: MatrixPoint,
    iterations: usize,
    outliers: usize,
    samples: BTreeMap<Metric, Vec<f64>>,
    failures: Vec<FailureRecord>,
}

impl SampleAccumulator {
    /// Create an accumulator tracking `metrics`.
    pub fn new(point: MatrixPoint, metrics: &[Metric], iterations: usize, outliers: usize) -> Self {
        Self {
            point,
            iterations,
            outliers,
            samples: metrics.iter().map(|&m| (m, Vec::with_capacity(iterations))).collect(),
            failures: Vec::new(),
        }
    }

    /// The combination this accumulator belongs to.
    pub fn point(&self) -> MatrixPoint {
        self.point
    }

    /// Record the values measured by one iteration.
    ///
    /// Called as soon as the timed workload completes, before its
    /// verification runs. Values for metrics this accumulator does not
    /// track are ignored.
    pub fn record_success(&mut self, values: impl IntoIterator<Item = (Metric, f64)>) {
        for (metric, value) in values {
            if let Some(series) = self.samples.get_mut(&metric) {
                series.push(value);
            }
        }
    }

    /// Record a failed iteration. Metric series are left untouched.
    pub fn record_failure(&mut self, failure: FailureRecord) {
        self.failures.push(failure);
    }

    /// Raw samples for a metric, in insertion order.
    pub fn samples(&self, metric: Metric) -> &[f64] {
        self.samples.get(&metric).map(Vec::as_slice).unwrap_or_default()
    }

    /// Failures recorded so far.
    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    /// Failure count at which the combination is considered failed.
    fn failure_threshold(&self) -> usize {
        self.iterations.div_ceil(2)
    }

    /// Whether a majority of iterations succeeded.
    pub fn is_success(&self) -> bool {
        self.failures.len() < self.failure_threshold()
    }

    /// Aggregate everything recorded into a report.
    pub fn finalize(self) -> AggregatedReport {
        let success = self.is_success();

        let stats = if success {
            self.samples
                .iter()
                .map(|(&metric, series)| (metric, StatBlock::compute(series, self.outliers)))
                .collect()
        } else {
            BTreeMap::new()
        };

        AggregatedReport {
            num_docs: self.point.num_docs,
            doc_size: self.point.doc_size,
            success,
            stats,
            num_failures: self.failures.len(),
            failures: self.failures,
        }
    }
}
