//! Benchmark configuration types.

use std::path::PathBuf;
use std::time::Duration;

/// Which scenarios to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BenchmarkSuite {
    /// Local-only storage engines (insert, delete, find)
    Crud,
    /// Remote-to-local sync scenarios
    Sync,
    /// Both
    #[default]
    All,
}

impl BenchmarkSuite {
    pub fn includes_crud(&self) -> bool {
        matches!(self, Self::Crud | Self::All)
    }

    pub fn includes_sync(&self) -> bool {
        matches!(self, Self::Sync | Self::All)
    }
}

impl std::str::FromStr for BenchmarkSuite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "crud" | "local" => Ok(Self::Crud),
            "sync" | "r2l" => Ok(Self::Sync),
            "all" | "complete" => Ok(Self::All),
            _ => Err(format!("Unknown suite: {s}. Valid options: crud, sync, all")),
        }
    }
}

impl std::fmt::Display for BenchmarkSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crud => write!(f, "crud"),
            Self::Sync => write!(f, "sync"),
            Self::All => write!(f, "all"),
        }
    }
}

/// Where results go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    /// Print each finished combination and log its JSON.
    pub stdout: bool,
    /// Colored terminal output.
    pub color: bool,
    /// Directory acting as the results collection.
    pub collection_dir: Option<PathBuf>,
    /// Endpoint receiving each finished run document.
    pub webhook_url: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            color: false,
            collection_dir: None,
            webhook_url: None,
        }
    }
}

impl OutputConfig {
    /// Collection used by `--save` when no directory is given:
    /// `~/.local/share/syncbench/results` on Linux.
    pub fn default_collection_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map(|dir| dir.join("syncbench").join("results"))
    }
}

/// Immutable configuration for one process run.
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// Benchmark suite to run.
    pub suite: BenchmarkSuite,
    /// Workload names; when non-empty these override the suite.
    pub selected_workloads: Vec<String>,
    /// Iterations per parameter combination.
    pub iterations: usize,
    /// Samples dropped from each end before aggregating.
    pub outliers: usize,
    /// Document-count sweep.
    pub num_docs: Vec<usize>,
    /// Document-size sweep in bytes (sync scenarios only).
    pub doc_sizes: Vec<usize>,
    /// Interval between resource probe readings.
    pub granularity: Duration,
    /// Fractions of documents changed remotely in the sync-pass scenario.
    pub change_event_pcts: Vec<f64>,
    /// Fractions of changed documents also written locally.
    pub conflict_pcts: Vec<f64>,
    /// Host recorded in run documents.
    pub host: String,
    /// Sync endpoint recorded in run documents.
    pub sync_host: String,
    /// Artificial delay added to every remote call.
    pub simulated_latency: Option<Duration>,
    /// Parent directory for per-iteration scratch directories.
    pub base_dir: Option<PathBuf>,
    /// Seed for payload generation and shuffles.
    pub seed: u64,
    pub output: OutputConfig,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            suite: BenchmarkSuite::default(),
            selected_workloads: Vec::new(),
            iterations: 5,
            outliers: 1,
            num_docs: vec![100, 500, 1000],
            doc_sizes: vec![50, 500, 1000],
            granularity: Duration::from_millis(100),
            change_event_pcts: vec![0.01, 0.1, 0.25, 0.5, 1.0],
            conflict_pcts: vec![0.1, 0.5, 1.0],
            host: local_hostname(),
            sync_host: "in-process".to_string(),
            simulated_latency: None,
            base_dir: None,
            seed: 0x5EED,
            output: OutputConfig::default(),
        }
    }
}

impl BenchmarkConfig {
    /// Number of parameter combinations a sync scenario sweeps.
    pub fn sync_combinations(&self) -> usize {
        self.num_docs.len() * self.doc_sizes.len()
    }
}

/// Name of this machine, or `localhost` when it cannot be determined.
pub fn local_hostname() -> String {
    sysinfo::System::host_name()
        .filter(|name| !name.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "localhost".to_string())
}
