//! End-to-end runs through the public API.

use anyhow::{Result, bail};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use syncbench::bench::workloads::{InitialSync, StoreKind, StoreWorkload, SyncPass};
use syncbench::bench::{ContextFactory, CrudOp, ExecutionContext, build_plan};
use syncbench::config::{BenchmarkConfig, BenchmarkSuite};
use syncbench::report::{FileCollection, MemoryCollection};
use syncbench::results::{FailureRecord, Metric, SampleAccumulator, StatBlock};
use syncbench::sync::LocalContextFactory;
use syncbench::{BenchmarkRunner, MatrixPoint, ReportSink, RunStatus, SyncBenchmark};
use uuid::Uuid;

fn small_config() -> BenchmarkConfig {
    BenchmarkConfig {
        iterations: 3,
        outliers: 0,
        num_docs: vec![5],
        doc_sizes: vec![16],
        granularity: Duration::from_millis(1),
        change_event_pcts: vec![0.5],
        conflict_pcts: vec![0.5],
        ..BenchmarkConfig::default()
    }
}

fn runner_with(config: BenchmarkConfig) -> (BenchmarkRunner, MemoryCollection) {
    let collection = MemoryCollection::new();
    let sink = ReportSink::new(false, false).with_transport(collection.clone());
    (BenchmarkRunner::new(config, Uuid::new_v4(), sink), collection)
}

#[test]
fn trimmed_statistics() {
    let block = StatBlock::compute(&[100.0, 3.0, 1.0, 5.0, 2.0, 4.0], 1);
    assert!((block.min - 2.0).abs() < f64::EPSILON);
    assert!((block.max - 5.0).abs() < f64::EPSILON);
    assert!((block.mean - 3.5).abs() < f64::EPSILON);
    assert!((block.median - 3.5).abs() < f64::EPSILON);
}

#[test]
fn two_failures_out_of_five_still_succeed() {
    let mut acc = SampleAccumulator::new(MatrixPoint::new(10, None), &[Metric::TimeMs], 5, 0);
    for iteration in 1..=5 {
        if iteration <= 2 {
            acc.record_failure(FailureRecord::new(iteration, "boom", Vec::new()));
        } else {
            acc.record_success([(Metric::TimeMs, iteration as f64)]);
        }
    }
    let report = acc.finalize();
    assert!(report.success);
    assert_eq!(report.num_failures, 2);
    assert!(report.stat(Metric::TimeMs).is_some());
}

/// Context that counts how often it is closed.
struct ClosingContext<'a> {
    closes: &'a AtomicUsize,
}

impl ExecutionContext for ClosingContext<'_> {
    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ClosingFactory<'a>(&'a AtomicUsize);

impl<'a> ContextFactory for ClosingFactory<'a> {
    type Context = ClosingContext<'a>;

    fn create(&self, _test_name: &str) -> Result<ClosingContext<'a>> {
        Ok(ClosingContext { closes: self.0 })
    }
}

/// Sleeps a distinct time per iteration and fails with "boom" on the
/// second, after its slowest sleep. Checks the previous context was closed.
struct BoomOnSecond<'a> {
    closes: &'a AtomicUsize,
    iteration: AtomicUsize,
}

impl<'a> SyncBenchmark<ClosingContext<'a>> for BoomOnSecond<'a> {
    fn name(&self) -> &str {
        "boom-on-second"
    }

    fn setup(&self, _ctx: &ClosingContext<'a>, _point: MatrixPoint) -> Result<()> {
        let iteration = self.iteration.fetch_add(1, Ordering::SeqCst) + 1;
        // Previous iteration's context was closed exactly once
        assert_eq!(self.closes.load(Ordering::SeqCst), iteration - 1);
        Ok(())
    }

    fn execute(&self, _ctx: &ClosingContext<'a>, _point: MatrixPoint) -> Result<()> {
        let iteration = self.iteration.load(Ordering::SeqCst);
        let sleep_ms = [20, 300, 60][iteration - 1];
        std::thread::sleep(Duration::from_millis(sleep_ms));
        if iteration == 2 {
            bail!("boom");
        }
        Ok(())
    }

    fn teardown(&self, _ctx: &ClosingContext<'a>, _point: MatrixPoint) -> Result<()> {
        Ok(())
    }
}

#[test]
fn failing_iteration_is_recorded_and_context_closed() {
    let closes = AtomicUsize::new(0);
    let (runner, collection) = runner_with(small_config());
    let benchmark = BoomOnSecond {
        closes: &closes,
        iteration: AtomicUsize::new(0),
    };

    let status = runner.run_sync(&benchmark, &ClosingFactory(&closes)).unwrap();
    assert_eq!(status, RunStatus::Success);
    assert_eq!(closes.load(Ordering::SeqCst), 3);

    let doc = &collection.documents()[0];
    let result = &doc["results"][0];
    assert_eq!(result["success"], true);
    assert_eq!(result["numFailures"], 1);
    assert_eq!(result["failures"][0]["iteration"], 2);
    assert_eq!(result["failures"][0]["reason"], "boom");
    assert_eq!(doc["status"], "Success");

    // Exactly the 20 ms and 60 ms iterations were sampled: with two values
    // the mean and median sit halfway and the population deviation is half
    // the spread.
    let time = &result["timeMs"];
    let (min, max) = (time["min"].as_f64().unwrap(), time["max"].as_f64().unwrap());
    assert!(min >= 20.0, "min {min}");
    assert!(max >= 60.0 && max < 300.0, "max {max}");
    let mid = (min + max) / 2.0;
    assert!((time["mean"].as_f64().unwrap() - mid).abs() < 1e-6);
    assert!((time["median"].as_f64().unwrap() - mid).abs() < 1e-6);
    assert!((time["stdDev"].as_f64().unwrap() - (max - min) / 2.0).abs() < 1e-6);
}

/// Always fails.
struct AlwaysFails;

impl<C> SyncBenchmark<C> for AlwaysFails {
    fn name(&self) -> &str {
        "always-fails"
    }

    fn setup(&self, _ctx: &C, _point: MatrixPoint) -> Result<()> {
        Ok(())
    }

    fn execute(&self, _ctx: &C, _point: MatrixPoint) -> Result<()> {
        bail!("nope")
    }

    fn teardown(&self, _ctx: &C, _point: MatrixPoint) -> Result<()> {
        Ok(())
    }
}

#[test]
fn majority_failure_marks_run_failed() {
    let closes = AtomicUsize::new(0);
    let (runner, collection) = runner_with(small_config());
    let status = runner.run_sync(&AlwaysFails, &ClosingFactory(&closes)).unwrap();
    assert_eq!(status, RunStatus::Failure);

    let doc = &collection.documents()[0];
    assert_eq!(doc["status"], "Failure");
    assert_eq!(doc["results"][0]["numFailures"], 3);
    assert!(doc["results"][0].get("timeMs").is_none());
}

#[test]
fn crud_memory_run_with_odd_count() {
    let config = BenchmarkConfig {
        num_docs: vec![7],
        ..small_config()
    };
    let (runner, collection) = runner_with(config);

    for op in CrudOp::ALL {
        let workload = StoreWorkload::new(StoreKind::Memory, op, None, 1).unwrap();
        let statuses = runner.run_crud(&workload).unwrap();
        assert_eq!(statuses, [RunStatus::Success, RunStatus::Success], "{op}");
    }

    let docs = collection.documents();
    assert_eq!(docs.len(), 6);
    for doc in &docs {
        assert_eq!(doc["status"], "Success");
        assert_eq!(doc["storage"], "memory");
        assert_eq!(doc["results"][0]["numDocs"], 7);
        assert!(doc["results"][0].get("docSize").is_none());
    }
}

#[test]
fn r2l_runs_end_to_end_into_file_collection() {
    let dir = tempfile::tempdir().unwrap();
    let collection = FileCollection::open(dir.path().join("runs")).unwrap();
    let sink = ReportSink::new(false, false).with_transport(collection);
    let runner = BenchmarkRunner::new(small_config(), Uuid::new_v4(), sink);
    let factory = LocalContextFactory::new(Some(dir.path().join("scratch")), None);

    assert_eq!(runner.run_sync(&InitialSync::new(1), &factory).unwrap(), RunStatus::Success);
    assert_eq!(
        runner.run_sync(&SyncPass::new(0.5, 0.5, 2), &factory).unwrap(),
        RunStatus::Success
    );

    let files: Vec<_> = std::fs::read_dir(dir.path().join("runs"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    assert_eq!(files.len(), 2);

    for path in files {
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(doc["status"], "Success");
        assert_eq!(doc["sdk"], "rust");
        let result = &doc["results"][0];
        assert_eq!(result["numDocs"], 5);
        assert_eq!(result["docSize"], 16);
        assert!(result["networkSentBytes"]["mean"].as_f64().unwrap() > 0.0);
        assert!(result["diskBytes"]["mean"].as_f64().unwrap() > 0.0);
    }
}

#[test]
fn whole_plan_runs() {
    let config = BenchmarkConfig {
        suite: BenchmarkSuite::All,
        iterations: 1,
        num_docs: vec![4],
        ..small_config()
    };
    let plan = build_plan(&config).unwrap();
    let (runner, collection) = runner_with(config);
    let outcomes = runner.run_plan(&plan, &LocalContextFactory::default()).unwrap();

    assert_eq!(outcomes.len(), plan.run_count());
    assert!(outcomes.iter().all(|o| o.status == RunStatus::Success), "{outcomes:?}");
    assert_eq!(collection.len(), plan.run_count());
}
