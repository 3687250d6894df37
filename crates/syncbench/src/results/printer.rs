//! Hyperfine-style benchmark result printer.

use crate::report::{RunOutcome, RunStatus};
use crate::results::accumulator::{AggregatedReport, Metric};
use crate::results::format::{format_mean_sigma, format_metric, format_range};
use owo_colors::OwoColorize;

/// Formats and prints aggregated reports in hyperfine style.
#[derive(Debug, Clone, Copy)]
pub struct BenchmarkPrinter {
    /// Whether color output is enabled.
    color: bool,
}

impl BenchmarkPrinter {
    /// Create a new printer.
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    /// Print one finalized combination.
    ///
    /// Example output:
    /// ```text
    ///   Time (mean ± σ):     2.45 ms ± 0.34 ms    [median 2.40 ms]
    ///   Range (min … max):   1.89 ms … 3.21 ms    5 runs, 0 failed
    ///   memoryBytes:         12.4 MiB ± 0.2 MiB
    /// ```
    pub fn print_report(&self, report: &AggregatedReport, iterations: usize) {
        if !report.success {
            self.print_failed(report, iterations);
            return;
        }

        if let Some(time) = report.stat(Metric::TimeMs) {
            let mean_sigma = format_mean_sigma(Metric::TimeMs, time.mean, time.std_dev);
            let median = format!("[median {}]", format_metric(Metric::TimeMs, time.median));
            let range = format_range(Metric::TimeMs, time.min, time.max);
            let runs = format!("{iterations} runs, {} failed", report.num_failures);

            if self.color {
                println!(
                    "  {} ({} ± {}):  {}    {}",
                    "Time".bold(),
                    "mean".cyan(),
                    "σ".cyan(),
                    mean_sigma.cyan(),
                    median.dimmed()
                );
                println!(
                    "  {} ({} … {}):  {}    {}",
                    "Range".bold(),
                    "min".green(),
                    "max".yellow(),
                    range,
                    runs.dimmed()
                );
            } else {
                println!("  Time (mean ± σ):  {mean_sigma}    {median}");
                println!("  Range (min … max):  {range}    {runs}");
            }
        }

        for (&metric, block) in report.stats.iter().filter(|(m, _)| **m != Metric::TimeMs) {
            let value = format_mean_sigma(metric, block.mean, block.std_dev);
            if self.color {
                println!("  {:<22} {}", format!("{metric}:").dimmed(), value);
            } else {
                println!("  {:<22} {value}", format!("{metric}:"));
            }
        }
        println!();
    }

    fn print_failed(&self, report: &AggregatedReport, iterations: usize) {
        let headline = format!("{}/{iterations} iterations failed", report.num_failures);
        if self.color {
            println!("  {} {}", "FAILED:".red().bold(), headline);
        } else {
            println!("  FAILED: {headline}");
        }
        for failure in &report.failures {
            println!("    #{}: {}", failure.iteration, failure.reason);
        }
        println!();
    }

    /// Print the terminal status of every run.
    ///
    /// Example output:
    /// ```text
    /// Summary
    ///   Success  CrudTest: Sqlite-Insert (1 thread)
    ///   Failure  R2L_SyncPass (percentageChangeEvent=0.5, percentageConflict=1.0)
    /// ```
    pub fn print_summary(&self, outcomes: &[RunOutcome]) {
        if outcomes.is_empty() {
            return;
        }

        println!();
        if self.color {
            println!("{}", "Summary".bold());
        } else {
            println!("Summary");
        }

        for outcome in outcomes {
            let status = format!("{:<8}", outcome.status.to_string());
            if self.color {
                match outcome.status {
                    RunStatus::Success => println!("  {} {}", status.green(), outcome.name),
                    RunStatus::Failure => println!("  {} {}", status.red().bold(), outcome.name),
                    RunStatus::InProgress => println!("  {} {}", status.yellow(), outcome.name),
                }
            } else {
                println!("  {status} {}", outcome.name);
            }
        }

        let failed = outcomes.iter().filter(|o| !o.status.is_success()).count();
        if failed > 0 {
            println!();
            println!("  {failed} of {} runs failed", outcomes.len());
        }
        println!();
    }
}
