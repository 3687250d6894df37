//! Benchmark definitions and execution.

mod context;
mod executor;
pub mod probe;
mod runner;
mod suite;
pub mod workloads;

pub use context::{ContextFactory, ExecutionContext, IterationMeasurement, measure_iteration};
pub use executor::{Execution, WorkloadExecutor};
pub use runner::BenchmarkRunner;
pub use suite::{SuitePlan, build_plan, workload_names};

use anyhow::Result;
use serde_json::{Map, Value};
use std::fmt;
use std::ops::Range;

/// One point of the parameter sweep.
///
/// CRUD scenarios sweep document counts only, so `doc_size` is `None` there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatrixPoint {
    pub num_docs: usize,
    pub doc_size: Option<usize>,
}

impl MatrixPoint {
    pub fn new(num_docs: usize, doc_size: Option<usize>) -> Self {
        Self { num_docs, doc_size }
    }
}

impl fmt::Display for MatrixPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.doc_size {
            Some(size) => write!(f, "numDocs={}, docSize={size}", self.num_docs),
            None => write!(f, "numDocs={}", self.num_docs),
        }
    }
}

/// Operation exercised by a CRUD scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrudOp {
    Insert,
    Delete,
    Find,
}

impl CrudOp {
    pub const ALL: [CrudOp; 3] = [CrudOp::Insert, CrudOp::Delete, CrudOp::Find];

    /// Value of the `crudOp` field in run documents.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Delete => "delete",
            Self::Find => "find",
        }
    }
}

impl fmt::Display for CrudOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A storage-engine scenario driven by the CRUD harness.
///
/// The harness times `execute` once with a single worker over every
/// document and once with two workers over disjoint halves. `setup` and
/// `teardown` run around each of those two phases.
pub trait CrudBenchmark: Send + Sync {
    /// Test name recorded in the run documents.
    fn name(&self) -> &str;

    /// Storage engine label (`storage` field).
    fn storage(&self) -> &str;

    /// Operation under test (`crudOp` field).
    fn crud_op(&self) -> CrudOp;

    /// Reset the store and prepare `num_docs` documents.
    fn setup(&self, num_docs: usize) -> Result<()>;

    /// Process the documents whose index falls in `range`.
    ///
    /// Called concurrently from two workers with disjoint ranges.
    fn execute(&self, range: Range<usize>) -> Result<()>;

    /// Verify the outcome. `covered` is the number of documents the
    /// workers actually processed, which is less than `num_docs` for odd
    /// counts in the two-worker phase.
    fn teardown(&self, num_docs: usize, covered: usize) -> Result<()>;
}

/// A remote-to-local sync scenario driven by the sync harness.
///
/// Every iteration gets a fresh context of type `C`.
pub trait SyncBenchmark<C>: Send + Sync {
    /// Test name recorded in the run document.
    fn name(&self) -> &str;

    /// Extra fields merged into the run document.
    fn extra_fields(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Untimed preparation.
    fn setup(&self, ctx: &C, point: MatrixPoint) -> Result<()>;

    /// The timed workload.
    fn execute(&self, ctx: &C, point: MatrixPoint) -> Result<()>;

    /// Untimed verification after the workload.
    fn teardown(&self, ctx: &C, point: MatrixPoint) -> Result<()>;
}
