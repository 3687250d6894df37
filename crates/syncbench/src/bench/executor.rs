//! Timed single- and two-worker workload execution.

use anyhow::{Context, Result, anyhow};
use std::ops::Range;
use std::thread;
use std::time::{Duration, Instant};

/// Outcome of one timed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Execution {
    /// Wall-clock time from before the first worker started until every
    /// worker finished.
    pub elapsed: Duration,
    /// Number of documents the workers were handed.
    pub processed: usize,
}

impl Execution {
    /// Elapsed time in fractional milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1_000.0
    }
}

/// Runs a range workload on one or two workers and times it.
///
/// The executor shares nothing between workers. Keeping the two ranges'
/// effects disjoint is up to the workload.
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkloadExecutor;

impl WorkloadExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Partitions used by [`run_two_workers`](Self::run_two_workers).
    ///
    /// For odd `num_docs` the last document belongs to neither half.
    pub fn split(num_docs: usize) -> [Range<usize>; 2] {
        let half = num_docs / 2;
        [0..half, half..half * 2]
    }

    /// Run `workload` on the calling thread over `[0, num_docs)`.
    pub fn run_single<F>(&self, num_docs: usize, workload: F) -> Result<Execution>
    where
        F: FnOnce(Range<usize>) -> Result<()>,
    {
        let start = Instant::now();
        workload(0..num_docs)?;
        Ok(Execution {
            elapsed: start.elapsed(),
            processed: num_docs,
        })
    }

    /// Run `workload` on two named scoped threads over the halves returned
    /// by [`split`](Self::split), joining both before the clock stops.
    ///
    /// If either worker fails the first error (in worker order) is
    /// returned. A panicking worker is reported as an error.
    pub fn run_two_workers<F>(&self, num_docs: usize, workload: F) -> Result<Execution>
    where
        F: Fn(Range<usize>) -> Result<()> + Sync,
    {
        let [first, second] = Self::split(num_docs);
        let processed = second.end;
        let workload = &workload;

        let start = Instant::now();
        let outcomes = thread::scope(|scope| -> Result<[Result<()>; 2]> {
            let spawn = |index: usize, range: Range<usize>| {
                thread::Builder::new()
                    .name(format!("bench-worker-{index}"))
                    .spawn_scoped(scope, move || workload(range))
                    .with_context(|| format!("failed to spawn worker {index}"))
            };
            let a = spawn(0, first)?;
            let b = spawn(1, second)?;

            let join = |handle: thread::ScopedJoinHandle<'_, Result<()>>, index: usize| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("worker {index} panicked")))
            };
            Ok([join(a, 0), join(b, 1)])
        })?;
        let elapsed = start.elapsed();

        for outcome in outcomes {
            outcome?;
        }

        Ok(Execution { elapsed, processed })
    }
}
