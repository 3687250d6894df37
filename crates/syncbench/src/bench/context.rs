//! Per-iteration execution contexts and resource measurement.

use crate::bench::executor::WorkloadExecutor;
use crate::bench::probe;
use crate::results::Metric;
use anyhow::{Context as _, Result, anyhow};
use std::ops::Range;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Isolated environment a sync iteration runs in.
///
/// A fresh context is created for every iteration and closed after it,
/// whatever the outcome. The resource accessors are sampled while the
/// timed workload runs; the network counters are cumulative.
pub trait ExecutionContext: Send + Sync {
    /// Bring the context into a usable state before the setup hook runs.
    fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Release everything the context holds.
    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn memory_bytes(&self) -> u64 {
        probe::resident_memory_bytes().unwrap_or(0)
    }

    fn active_threads(&self) -> u64 {
        probe::thread_count().unwrap_or(0)
    }

    fn disk_bytes(&self) -> u64 {
        0
    }

    fn network_sent_bytes(&self) -> u64 {
        0
    }

    fn network_received_bytes(&self) -> u64 {
        0
    }
}

/// Builds one execution context per iteration.
pub trait ContextFactory: Send + Sync {
    type Context: ExecutionContext;

    fn create(&self, test_name: &str) -> Result<Self::Context>;
}

/// Everything measured during one iteration's timed workload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationMeasurement {
    pub time_ms: f64,
    pub network_sent_bytes: f64,
    pub network_received_bytes: f64,
    pub memory_bytes: f64,
    pub disk_bytes: f64,
    pub active_threads: f64,
}

impl IterationMeasurement {
    /// One sample per metric, ready for an accumulator.
    pub fn samples(&self) -> [(Metric, f64); 6] {
        [
            (Metric::TimeMs, self.time_ms),
            (Metric::NetworkSentBytes, self.network_sent_bytes),
            (Metric::NetworkReceivedBytes, self.network_received_bytes),
            (Metric::MemoryBytes, self.memory_bytes),
            (Metric::DiskBytes, self.disk_bytes),
            (Metric::ActiveThreadCounts, self.active_threads),
        ]
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Run `workload` over `[0, num_docs)` on the calling thread and measure it.
///
/// A probe thread reads the context's memory and thread count every
/// `granularity` (at least once) until the workload returns.
pub fn measure_iteration<C, F>(
    ctx: &C,
    granularity: Duration,
    num_docs: usize,
    workload: F,
) -> Result<IterationMeasurement>
where
    C: ExecutionContext,
    F: FnOnce(Range<usize>) -> Result<()>,
{
    let granularity = granularity.max(Duration::from_millis(1));
    let sent_before = ctx.network_sent_bytes();
    let received_before = ctx.network_received_bytes();

    let (execution, memory, threads) = thread::scope(|scope| {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let prober = thread::Builder::new()
            .name("bench-probe".into())
            .spawn_scoped(scope, move || {
                let mut memory = Vec::new();
                let mut threads = Vec::new();
                loop {
                    memory.push(ctx.memory_bytes() as f64);
                    threads.push(ctx.active_threads() as f64);
                    match stop_rx.recv_timeout(granularity) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                (memory, threads)
            })
            .context("failed to spawn probe thread")?;

        let execution = WorkloadExecutor::new().run_single(num_docs, workload);
        let _ = stop_tx.send(());
        let (memory, threads) = prober
            .join()
            .map_err(|_| anyhow!("probe thread panicked"))?;

        Ok::<_, anyhow::Error>((execution?, memory, threads))
    })?;

    Ok(IterationMeasurement {
        time_ms: execution.elapsed_ms(),
        network_sent_bytes: ctx.network_sent_bytes().saturating_sub(sent_before) as f64,
        network_received_bytes: ctx.network_received_bytes().saturating_sub(received_before)
            as f64,
        memory_bytes: mean(&memory),
        disk_bytes: ctx.disk_bytes() as f64,
        active_threads: mean(&threads),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct FakeContext {
        sent: AtomicU64,
        received: AtomicU64,
        probes: AtomicU64,
    }

    impl ExecutionContext for FakeContext {
        fn memory_bytes(&self) -> u64 {
            self.probes.fetch_add(1, Ordering::SeqCst);
            4096
        }

        fn active_threads(&self) -> u64 {
            3
        }

        fn disk_bytes(&self) -> u64 {
            512
        }

        fn network_sent_bytes(&self) -> u64 {
            self.sent.load(Ordering::SeqCst)
        }

        fn network_received_bytes(&self) -> u64 {
            self.received.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_measures_network_deltas() {
        let ctx = FakeContext::default();
        ctx.sent.store(1_000, Ordering::SeqCst);

        let measurement = measure_iteration(&ctx, Duration::from_millis(5), 10, |range| {
            assert_eq!(range, 0..10);
            ctx.sent.fetch_add(250, Ordering::SeqCst);
            ctx.received.fetch_add(40, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        assert!((measurement.network_sent_bytes - 250.0).abs() < f64::EPSILON);
        assert!((measurement.network_received_bytes - 40.0).abs() < f64::EPSILON);
        assert!((measurement.memory_bytes - 4096.0).abs() < f64::EPSILON);
        assert!((measurement.active_threads - 3.0).abs() < f64::EPSILON);
        assert!((measurement.disk_bytes - 512.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_probes_at_least_once() {
        let ctx = FakeContext::default();
        measure_iteration(&ctx, Duration::from_secs(60), 1, |_| Ok(())).unwrap();
        assert!(ctx.probes.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_probes_repeatedly_during_slow_workload() {
        let ctx = FakeContext::default();
        measure_iteration(&ctx, Duration::from_millis(2), 1, |_| {
            thread::sleep(Duration::from_millis(30));
            Ok(())
        })
        .unwrap();
        assert!(ctx.probes.load(Ordering::SeqCst) > 1);
    }

    #[test]
    fn test_workload_error_propagates() {
        let ctx = FakeContext::default();
        let err = measure_iteration(&ctx, Duration::from_millis(5), 1, |_| Err(anyhow!("boom")))
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_samples_cover_every_metric() {
        let measurement = IterationMeasurement {
            time_ms: 1.0,
            network_sent_bytes: 2.0,
            network_received_bytes: 3.0,
            memory_bytes: 4.0,
            disk_bytes: 5.0,
            active_threads: 6.0,
        };
        let metrics: Vec<_> = measurement.samples().iter().map(|(m, _)| *m).collect();
        assert_eq!(metrics, Metric::ALL);
    }
}
