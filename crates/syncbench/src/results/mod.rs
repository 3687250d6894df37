//! Results processing and visualization.
//!
//! - `StatBlock` and `SampleAccumulator` turn raw iteration samples into
//!   outlier-trimmed aggregated reports
//! - `LiveProgressReporter` shows progress while iterations execute
//! - `BenchmarkPrinter` renders finished reports

pub mod accumulator;
pub mod format;
pub mod live;
pub mod printer;
pub mod stats;

pub use accumulator::{AggregatedReport, FailureRecord, Metric, SampleAccumulator};
pub use format::{format_bytes, format_mean_sigma, format_metric, format_millis, format_range};
pub use live::LiveProgressReporter;
pub use printer::BenchmarkPrinter;
pub use stats::StatBlock;
