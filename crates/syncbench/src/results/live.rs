//! Live progress reporting while a combination's iterations execute.

use crate::bench::MatrixPoint;
use crate::results::format::format_millis;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::VecDeque;
use std::time::Duration;

const WINDOW_SIZE: usize = 20;
const TICK_STRINGS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Manages live terminal output for one combination.
///
/// Example output:
/// ```text
/// Benchmark: r2l-initial-sync (numDocs=100, docSize=50)
///   ⠋ Current estimate: 2.45 ms   ████████░░░░░░░░░░░░ 2/5 failed 0
/// ```
pub struct LiveProgressReporter {
    progress: ProgressBar,
    /// Rolling window of recent successful iteration times (ms).
    recent_samples: VecDeque<f64>,
    window_size: usize,
    completed: usize,
    failed: usize,
}

impl LiveProgressReporter {
    /// Print the combination header and start a progress bar.
    pub fn new(benchmark_name: &str, point: MatrixPoint, iterations: usize, color: bool) -> Self {
        use owo_colors::OwoColorize;

        if color {
            println!("{}: {} ({point})", "Benchmark".bold(), benchmark_name.cyan());
        } else {
            println!("Benchmark: {benchmark_name} ({point})");
        }

        let progress = ProgressBar::new(iterations as u64);
        let template = if color {
            "  {spinner:.cyan} Current estimate: {msg:<24}  {bar:20.cyan/dim} {pos}/{len}"
        } else {
            "  {spinner} Current estimate: {msg:<24}  {bar:20} {pos}/{len}"
        };
        let style = ProgressStyle::default_bar()
            .template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░")
            .tick_strings(TICK_STRINGS);

        progress.set_style(style);
        progress.set_message("measuring...");
        progress.enable_steady_tick(Duration::from_millis(100));

        Self::with_bar(progress)
    }

    /// A reporter that draws nothing.
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::hidden())
    }

    fn with_bar(progress: ProgressBar) -> Self {
        Self {
            progress,
            recent_samples: VecDeque::with_capacity(WINDOW_SIZE),
            window_size: WINDOW_SIZE,
            completed: 0,
            failed: 0,
        }
    }

    /// Called after a successful iteration with its wall-clock time.
    pub fn tick(&mut self, time_ms: f64) {
        self.completed += 1;

        if self.recent_samples.len() >= self.window_size {
            self.recent_samples.pop_front();
        }
        self.recent_samples.push_back(time_ms);

        self.refresh();
    }

    /// Called after a failed iteration.
    pub fn tick_failure(&mut self) {
        self.completed += 1;
        self.failed += 1;
        self.refresh();
    }

    fn refresh(&self) {
        let mut message = format_millis(self.rolling_average());
        if self.failed > 0 {
            message.push_str(&format!(" ({} failed)", self.failed));
        }
        self.progress.set_message(message);
        self.progress.set_position(self.completed as u64);
    }

    /// Rolling average of recent successful iterations, in milliseconds.
    fn rolling_average(&self) -> f64 {
        if self.recent_samples.is_empty() {
            return 0.0;
        }
        self.recent_samples.iter().sum::<f64>() / self.recent_samples.len() as f64
    }

    /// Clear the bar. Returns the final rolling average.
    pub fn finish(self) -> f64 {
        let avg = self.rolling_average();
        self.progress.finish_and_clear();
        avg
    }
}
