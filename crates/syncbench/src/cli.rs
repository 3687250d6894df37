//! Command-line interface for the benchmark harness.

// Allow CLI-specific patterns
#![allow(clippy::struct_excessive_bools)]

use crate::bench::workload_names;
use crate::config::{BenchmarkConfig, BenchmarkSuite, OutputConfig};
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Benchmark harness comparing a remote-to-local sync engine against
/// local-only storage engines.
///
/// Every scenario is swept over document counts (and, for sync scenarios,
/// document sizes); each combination runs a fixed number of iterations and
/// is reported with outlier-trimmed statistics.
#[derive(Parser, Debug)]
#[command(name = "syncbench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Benchmark suite to run.
    ///
    /// Valid values:
    /// - crud: local-only storage engines (SQLite, in-memory)
    /// - sync: remote-to-local sync scenarios
    /// - all: both (default)
    #[arg(short = 's', long, default_value = "all", env = "SYNCBENCH_SUITE")]
    pub suite: String,

    /// Run specific workload(s) by name.
    ///
    /// Can be specified multiple times and overrides --suite.
    ///
    /// CRUD workloads:
    /// sqlite-insert, sqlite-delete, sqlite-find, memory-insert, memory-delete, memory-find
    ///
    /// Sync workloads:
    /// r2l-initial-sync, r2l-disconnect-reconnect, r2l-sync-pass
    #[arg(short = 'w', long = "workload", value_name = "NAME")]
    pub workloads: Vec<String>,

    /// List available workloads and exit.
    #[arg(long)]
    pub list: bool,

    /// Number of iterations per parameter combination.
    #[arg(short = 'i', long, default_value = "5", env = "SYNCBENCH_ITERATIONS")]
    pub iterations: usize,

    /// Samples dropped from each end before computing statistics.
    #[arg(long, default_value = "1", env = "SYNCBENCH_OUTLIERS")]
    pub outliers: usize,

    /// Document counts to sweep.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "100,500,1000",
        env = "SYNCBENCH_NUM_DOCS"
    )]
    pub num_docs: Vec<usize>,

    /// Document sizes in bytes to sweep (sync scenarios).
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "50,500,1000",
        env = "SYNCBENCH_DOC_SIZES"
    )]
    pub doc_sizes: Vec<usize>,

    /// Interval between memory and thread-count readings, in milliseconds.
    #[arg(long, default_value = "100", env = "SYNCBENCH_GRANULARITY_MS")]
    pub granularity_ms: u64,

    /// Fractions of documents changed remotely in r2l-sync-pass.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "0.01,0.1,0.25,0.5,1.0",
        env = "SYNCBENCH_CHANGE_EVENT_PCTS"
    )]
    pub change_event_pcts: Vec<f64>,

    /// Fractions of remotely changed documents also changed locally.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "0.1,0.5,1.0",
        env = "SYNCBENCH_CONFLICT_PCTS"
    )]
    pub conflict_pcts: Vec<f64>,

    /// Artificial delay added to every remote call, in milliseconds.
    #[arg(long, value_name = "MS", env = "SYNCBENCH_SIMULATED_LATENCY_MS")]
    pub simulated_latency_ms: Option<u64>,

    /// Directory for per-iteration scratch data.
    #[arg(long, value_name = "DIR", env = "SYNCBENCH_BASE_DIR")]
    pub base_dir: Option<PathBuf>,

    /// Seed for generated payloads and shuffles.
    #[arg(long, env = "SYNCBENCH_SEED")]
    pub seed: Option<u64>,

    /// Run id shared by every run document (random by default).
    #[arg(long, value_name = "UUID", env = "SYNCBENCH_RUN_ID")]
    pub run_id: Option<Uuid>,

    /// Host name recorded in run documents.
    #[arg(long, env = "SYNCBENCH_HOST")]
    pub host: Option<String>,

    /// Sync endpoint recorded in run documents.
    #[arg(long, env = "SYNCBENCH_SYNC_HOST")]
    pub sync_host: Option<String>,

    /// Store run documents as JSON files in this directory.
    #[arg(long, value_name = "DIR", env = "SYNCBENCH_COLLECTION_DIR")]
    pub collection_dir: Option<PathBuf>,

    /// Store run documents in the default results directory.
    #[arg(long, conflicts_with = "collection_dir")]
    pub save: bool,

    /// POST each finished run document to this URL.
    #[arg(long, value_name = "URL", env = "SYNCBENCH_WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Do not print reports or progress.
    #[arg(long)]
    pub no_stdout: bool,

    /// Disable colored output.
    #[arg(long, conflicts_with = "color")]
    pub no_color: bool,

    /// Force colored output (even when not a TTY).
    #[arg(long, conflicts_with = "no_color")]
    pub color: bool,

    /// Verbose output.
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Cli {
    /// Handle --list. Returns `true` if nothing else should run.
    pub fn execute_list_command(&self) -> bool {
        if !self.list {
            return false;
        }
        println!("Available workloads:");
        for name in workload_names() {
            println!("  {name}");
        }
        true
    }

    /// The run id for this process: the given one or a fresh v4 UUID.
    pub fn run_id(&self) -> Uuid {
        self.run_id.unwrap_or_else(Uuid::new_v4)
    }

    /// Parse CLI arguments and build configuration.
    pub fn into_config(self) -> Result<BenchmarkConfig> {
        let suite: BenchmarkSuite = self
            .suite
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;

        // --color forces it on, --no-color forces it off
        let color = self.color || (!self.no_color && supports_color());

        let collection_dir = if self.save {
            Some(
                OutputConfig::default_collection_dir()
                    .context("Could not determine the default results directory")?,
            )
        } else {
            self.collection_dir
        };

        let defaults = BenchmarkConfig::default();
        let config = BenchmarkConfig {
            suite,
            selected_workloads: self.workloads,
            iterations: self.iterations,
            outliers: self.outliers,
            num_docs: self.num_docs,
            doc_sizes: self.doc_sizes,
            granularity: Duration::from_millis(self.granularity_ms),
            change_event_pcts: self.change_event_pcts,
            conflict_pcts: self.conflict_pcts,
            host: self.host.unwrap_or(defaults.host),
            sync_host: self.sync_host.unwrap_or(defaults.sync_host),
            simulated_latency: self.simulated_latency_ms.map(Duration::from_millis),
            base_dir: self.base_dir,
            seed: self.seed.unwrap_or(defaults.seed),
            output: OutputConfig {
                stdout: !self.no_stdout,
                color,
                collection_dir,
                webhook_url: self.webhook_url,
            },
        };

        validate_config(&config)?;
        Ok(config)
    }
}

/// Validate the configuration.
fn validate_config(config: &BenchmarkConfig) -> Result<()> {
    if config.iterations == 0 {
        bail!("Iterations must be at least 1");
    }
    if config.num_docs.is_empty() {
        bail!("At least one document count is required");
    }
    if config.suite.includes_sync() && config.doc_sizes.is_empty() {
        bail!("At least one document size is required");
    }
    for pct in config.change_event_pcts.iter().chain(&config.conflict_pcts) {
        if !(0.0..=1.0).contains(pct) {
            bail!("Percentages must be between 0 and 1, got {pct}");
        }
    }
    if config.iterations <= 2 * config.outliers {
        tracing::warn!(
            "{} iterations with {} outliers per side leaves no samples; statistics will be zero",
            config.iterations,
            config.outliers
        );
    }
    Ok(())
}

/// Check if the terminal supports colors.
fn supports_color() -> bool {
    // Check NO_COLOR environment variable (https://no-color.org/)
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    if std::env::var("FORCE_COLOR").is_ok() {
        return true;
    }

    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: isatty only inspects the descriptor
        unsafe { libc::isatty(std::io::stdout().as_raw_fd()) != 0 }
    }

    #[cfg(not(unix))]
    {
        true
    }
}
