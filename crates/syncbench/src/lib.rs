//! Benchmark harness comparing a remote-to-local sync engine against
//! local-only storage engines.
//!
//! Each scenario is swept over a parameter matrix (document counts, and
//! document sizes for sync scenarios). Every combination runs a fixed
//! number of isolated iterations; failed iterations are recorded and the
//! matrix carries on. Finished combinations are aggregated into
//! outlier-trimmed statistics and delivered to the configured report
//! transports.
//!
//! # Usage
//!
//! ```text
//! syncbench [OPTIONS]
//!
//! Options:
//!   -s, --suite <SUITE>          Benchmark suite: crud, sync, all
//!   -w, --workload <NAME>        Run specific workload(s)
//!   -i, --iterations <N>         Iterations per combination (default: 5)
//!       --num-docs <N,...>       Document counts (default: 100,500,1000)
//!       --doc-sizes <N,...>      Document sizes in bytes (default: 50,500,1000)
//!       --collection-dir <DIR>   Store run documents as JSON files
//!       --webhook-url <URL>      POST run documents to a webhook
//!   -v, --verbose                Verbose output
//!   -h, --help                   Print help
//! ```

pub mod bench;
pub mod cli;
pub mod config;
pub mod report;
pub mod results;
pub mod store;
pub mod sync;

pub use bench::{BenchmarkRunner, CrudBenchmark, MatrixPoint, SyncBenchmark};
pub use cli::Cli;
pub use config::{BenchmarkConfig, BenchmarkSuite, OutputConfig};
pub use report::{ReportSink, RunOutcome, RunStatus};
pub use results::{AggregatedReport, SampleAccumulator, StatBlock};
