//! Benchmark execution runner.

use crate::bench::{
    ContextFactory, CrudBenchmark, ExecutionContext, IterationMeasurement, MatrixPoint, SuitePlan,
    SyncBenchmark, WorkloadExecutor, measure_iteration,
};
use crate::config::BenchmarkConfig;
use crate::report::{ReportSink, RunOutcome, RunStatus, TestParams};
use crate::results::{AggregatedReport, FailureRecord, LiveProgressReporter, Metric, SampleAccumulator};
use anyhow::{Context, Result};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Executes scenarios over the configured parameter matrix.
///
/// One runner exists per process run. It owns the harness context every
/// scenario shares: the configuration, the run id and the report sink.
/// Iterations, combinations and runs execute strictly one after another.
#[derive(Debug)]
pub struct BenchmarkRunner {
    config: BenchmarkConfig,
    run_id: Uuid,
    sink: ReportSink,
}

impl BenchmarkRunner {
    pub fn new(config: BenchmarkConfig, run_id: Uuid, sink: ReportSink) -> Self {
        Self {
            config,
            run_id,
            sink,
        }
    }

    pub fn sink(&self) -> &ReportSink {
        &self.sink
    }

    /// Run every scenario in `plan`, CRUD first.
    ///
    /// A failing combination only marks its run as failed; errors returned
    /// here are fatal setup failures.
    pub fn run_plan<F>(&self, plan: &SuitePlan, factory: &F) -> Result<Vec<RunOutcome>>
    where
        F: ContextFactory<Context = crate::sync::SyncContext>,
    {
        info!(
            "Running {} scenarios ({} run documents), run id {}",
            plan.crud.len() + plan.sync.len(),
            plan.run_count(),
            self.run_id
        );

        let mut outcomes = Vec::with_capacity(plan.run_count());
        for benchmark in &plan.crud {
            let [single, double] = self.run_crud(benchmark)?;
            outcomes.push(RunOutcome::new(threads_label(benchmark.name(), 1), single));
            outcomes.push(RunOutcome::new(threads_label(benchmark.name(), 2), double));
        }
        for benchmark in &plan.sync {
            let status = self.run_sync(benchmark.as_ref(), factory)?;
            outcomes.push(RunOutcome::new(run_label(benchmark.name(), &benchmark.extra_fields()), status));
        }
        Ok(outcomes)
    }

    fn progress(&self, name: &str, point: MatrixPoint, ticks: usize) -> LiveProgressReporter {
        if self.sink.stdout_enabled() {
            LiveProgressReporter::new(name, point, ticks, self.config.output.color)
        } else {
            LiveProgressReporter::hidden()
        }
    }

    fn log_iteration(&self, name: &str, point: MatrixPoint, iteration: usize) {
        if self.sink.stdout_enabled() {
            info!(test = name, "Testing ({point}, iter: {iteration})");
        }
    }

    fn record_failure(
        &self,
        accumulator: &mut SampleAccumulator,
        progress: &mut LiveProgressReporter,
        name: &str,
        iteration: usize,
        error: &anyhow::Error,
    ) {
        progress.tick_failure();
        if self.sink.stdout_enabled() {
            warn!(
                test = name,
                point = %accumulator.point(),
                iteration,
                "Iteration failed: {error:#}"
            );
        }
        accumulator.record_failure(FailureRecord::from_error(iteration, error));
    }

    /// Run a sync scenario over document sizes (outer) and document counts
    /// (inner), one fresh context per iteration.
    pub fn run_sync<B, F>(&self, benchmark: &B, factory: &F) -> Result<RunStatus>
    where
        B: SyncBenchmark<F::Context> + ?Sized,
        F: ContextFactory + ?Sized,
    {
        let params = TestParams::new(self.run_id, benchmark.name(), &self.config);
        let handle = self.sink.announce_start(&params, &benchmark.extra_fields());

        let mut success = true;
        for &doc_size in &self.config.doc_sizes {
            for &num_docs in &self.config.num_docs {
                let point = MatrixPoint::new(num_docs, Some(doc_size));
                let report = self.run_sync_point(benchmark, factory, point)?;
                success &= report.success;
                self.sink.submit(&handle, &report);
            }
        }

        Ok(self.sink.announce_completion(&handle, success))
    }

    fn run_sync_point<B, F>(
        &self,
        benchmark: &B,
        factory: &F,
        point: MatrixPoint,
    ) -> Result<AggregatedReport>
    where
        B: SyncBenchmark<F::Context> + ?Sized,
        F: ContextFactory + ?Sized,
    {
        let name = benchmark.name();
        let iterations = self.config.iterations;
        let mut accumulator =
            SampleAccumulator::new(point, &Metric::ALL, iterations, self.config.outliers);
        let mut progress = self.progress(name, point, iterations);

        for iteration in 1..=iterations {
            self.log_iteration(name, point, iteration);
            let ctx = factory
                .create(name)
                .with_context(|| format!("failed to create execution context for {name}"))?;

            let mut measured = None;
            let outcome = self.sync_iteration(benchmark, &ctx, point, &mut measured);
            if let Err(e) = ctx.close() {
                warn!(test = name, iteration, "Failed to close execution context: {e:#}");
            }
            drop(ctx);

            // Samples survive a failing teardown
            if let Some(measurement) = measured {
                accumulator.record_success(measurement.samples());
            }
            match outcome {
                Ok(()) => progress.tick(measured.map_or(0.0, |m| m.time_ms)),
                Err(e) => self.record_failure(&mut accumulator, &mut progress, name, iteration, &e),
            }
        }

        let estimate = progress.finish();
        debug!(test = name, %point, estimate_ms = estimate, "Combination finished");
        Ok(accumulator.finalize())
    }

    fn sync_iteration<B, C>(
        &self,
        benchmark: &B,
        ctx: &C,
        point: MatrixPoint,
        measured: &mut Option<IterationMeasurement>,
    ) -> Result<()>
    where
        B: SyncBenchmark<C> + ?Sized,
        C: ExecutionContext,
    {
        ctx.prepare().context("failed to prepare execution context")?;
        benchmark.setup(ctx, point)?;
        *measured = Some(measure_iteration(ctx, self.config.granularity, point.num_docs, |_| {
            benchmark.execute(ctx, point)
        })?);
        benchmark.teardown(ctx, point)
    }

    /// Run a CRUD scenario over document counts, timing a one-worker and a
    /// two-worker phase per iteration. Returns the status of the
    /// one-worker run and of the two-worker run.
    pub fn run_crud(&self, benchmark: &dyn CrudBenchmark) -> Result<[RunStatus; 2]> {
        let params = TestParams::new(self.run_id, benchmark.name(), &self.config);
        let handles = [1, 2].map(|threads| {
            let extra = crud_fields(benchmark, threads);
            self.sink.announce_start(&params, &extra)
        });

        let iterations = self.config.iterations;
        let mut success = [true; 2];
        for &num_docs in &self.config.num_docs {
            let point = MatrixPoint::new(num_docs, None);
            let mut accumulators = [1, 2].map(|_| {
                SampleAccumulator::new(point, &[Metric::TimeMs], iterations, self.config.outliers)
            });
            let mut progress = self.progress(benchmark.name(), point, iterations * 2);
            let mut warned = false;

            for iteration in 1..=iterations {
                for (phase, accumulator) in accumulators.iter_mut().enumerate() {
                    let threads = phase + 1;
                    let name = threads_label(benchmark.name(), threads);
                    self.log_iteration(&name, point, iteration);

                    let mut timed = None;
                    let outcome =
                        self.crud_phase(benchmark, num_docs, threads, &mut warned, &mut timed);
                    if let Some(time_ms) = timed {
                        accumulator.record_success([(Metric::TimeMs, time_ms)]);
                    }
                    match outcome {
                        Ok(()) => progress.tick(timed.unwrap_or_default()),
                        Err(e) => {
                            self.record_failure(accumulator, &mut progress, &name, iteration, &e);
                        }
                    }
                }
            }
            progress.finish();

            for (phase, accumulator) in accumulators.into_iter().enumerate() {
                let report = accumulator.finalize();
                success[phase] &= report.success;
                self.sink.submit(&handles[phase], &report);
            }
        }

        Ok([0usize, 1].map(|phase| self.sink.announce_completion(&handles[phase], success[phase])))
    }

    fn crud_phase(
        &self,
        benchmark: &dyn CrudBenchmark,
        num_docs: usize,
        threads: usize,
        warned: &mut bool,
        timed: &mut Option<f64>,
    ) -> Result<()> {
        benchmark.setup(num_docs)?;

        let executor = WorkloadExecutor::new();
        let execution = if threads == 1 {
            executor.run_single(num_docs, |range| benchmark.execute(range))?
        } else {
            executor.run_two_workers(num_docs, |range| benchmark.execute(range))?
        };
        *timed = Some(execution.elapsed_ms());

        if execution.processed < num_docs && !*warned {
            warn!(
                test = benchmark.name(),
                num_docs,
                covered = execution.processed,
                "Two-worker phase leaves the last document unprocessed"
            );
            *warned = true;
        }

        benchmark.teardown(num_docs, execution.processed)
    }
}

/// Run document fields identifying a CRUD run.
fn crud_fields(benchmark: &dyn CrudBenchmark, threads: usize) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("storage".into(), json!(benchmark.storage()));
    fields.insert("crudOp".into(), json!(benchmark.crud_op().name()));
    fields.insert("numThreads".into(), json!(threads));
    fields
}

/// Test name tagged with its worker count, e.g. `... (2 threads)`.
fn threads_label(name: &str, threads: usize) -> String {
    if threads == 1 {
        format!("{name} (1 thread)")
    } else {
        format!("{name} ({threads} threads)")
    }
}

/// Summary label: the test name plus any extra fields.
fn run_label(name: &str, extra: &Map<String, Value>) -> String {
    if extra.is_empty() {
        return name.to_string();
    }
    let fields: Vec<String> = extra.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{name} ({})", fields.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::CrudOp;
    use crate::report::MemoryCollection;
    use anyhow::bail;
    use parking_lot::Mutex;
    use std::ops::Range;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config(iterations: usize, outliers: usize) -> BenchmarkConfig {
        BenchmarkConfig {
            iterations,
            outliers,
            num_docs: vec![4],
            doc_sizes: vec![8],
            granularity: Duration::from_millis(1),
            ..BenchmarkConfig::default()
        }
    }

    fn runner(config: BenchmarkConfig) -> (BenchmarkRunner, MemoryCollection) {
        let collection = MemoryCollection::new();
        let sink = ReportSink::new(false, false).with_transport(collection.clone());
        (BenchmarkRunner::new(config, Uuid::new_v4(), sink), collection)
    }

    #[derive(Default)]
    struct CountingContext {
        closed: AtomicUsize,
    }

    impl ExecutionContext for CountingContext {
        fn close(&self) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn memory_bytes(&self) -> u64 {
            1024
        }
    }

    #[derive(Default)]
    struct Factory {
        created: AtomicUsize,
        closes: Mutex<Vec<usize>>,
    }

    struct Tracked<'a> {
        inner: CountingContext,
        log: &'a Mutex<Vec<usize>>,
    }

    impl ExecutionContext for Tracked<'_> {
        fn close(&self) -> Result<()> {
            self.inner.close()?;
            self.log.lock().push(self.inner.closed.load(Ordering::SeqCst));
            Ok(())
        }
    }

    struct FactoryRef<'a>(&'a Factory);

    impl<'a> ContextFactory for FactoryRef<'a> {
        type Context = Tracked<'a>;

        fn create(&self, _test_name: &str) -> Result<Tracked<'a>> {
            self.0.created.fetch_add(1, Ordering::SeqCst);
            Ok(Tracked {
                inner: CountingContext::default(),
                log: &self.0.closes,
            })
        }
    }

    /// Fails on the listed iterations.
    struct Flaky {
        fail_on: Vec<usize>,
        iteration: AtomicUsize,
    }

    impl Flaky {
        fn new(fail_on: &[usize]) -> Self {
            Self {
                fail_on: fail_on.to_vec(),
                iteration: AtomicUsize::new(0),
            }
        }
    }

    impl<C> SyncBenchmark<C> for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn setup(&self, _ctx: &C, _point: MatrixPoint) -> Result<()> {
            self.iteration.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn execute(&self, _ctx: &C, _point: MatrixPoint) -> Result<()> {
            if self.fail_on.contains(&self.iteration.load(Ordering::SeqCst)) {
                bail!("boom");
            }
            Ok(())
        }

        fn teardown(&self, _ctx: &C, _point: MatrixPoint) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_iteration_is_recorded_and_run_continues() {
        let (runner, collection) = runner(config(3, 0));
        let factory = Factory::default();

        let status = runner.run_sync(&Flaky::new(&[2]), &FactoryRef(&factory)).unwrap();
        assert_eq!(status, RunStatus::Success);

        let docs = collection.documents();
        assert_eq!(docs.len(), 1);
        let result = &docs[0]["results"][0];
        assert_eq!(result["success"], true);
        assert_eq!(result["numFailures"], 1);
        assert_eq!(result["failures"][0]["iteration"], 2);
        assert_eq!(result["failures"][0]["reason"], "boom");
        assert!(result["timeMs"].is_object());
        assert_eq!(docs[0]["status"], "Success");
    }

    #[test]
    fn test_context_closed_once_per_iteration() {
        let (runner, _collection) = runner(config(4, 0));
        let factory = Factory::default();

        runner.run_sync(&Flaky::new(&[1, 3]), &FactoryRef(&factory)).unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 4);
        assert_eq!(*factory.closes.lock(), [1, 1, 1, 1]);
    }

    #[test]
    fn test_majority_failure_marks_run_failed() {
        let (runner, collection) = runner(config(5, 1));
        let factory = Factory::default();

        let status = runner
            .run_sync(&Flaky::new(&[1, 2, 3]), &FactoryRef(&factory))
            .unwrap();
        assert_eq!(status, RunStatus::Failure);

        let doc = &collection.documents()[0];
        assert_eq!(doc["status"], "Failure");
        assert_eq!(doc["results"][0]["success"], false);
        assert!(doc["results"][0].get("timeMs").is_none());
    }

    #[test]
    fn test_sync_sweep_order() {
        let mut config = config(1, 0);
        config.num_docs = vec![1, 2];
        config.doc_sizes = vec![10, 20];
        let (runner, collection) = runner(config);
        runner
            .run_sync(&Flaky::new(&[]), &FactoryRef(&Factory::default()))
            .unwrap();

        let results = collection.documents()[0]["results"].as_array().unwrap().clone();
        let points: Vec<(u64, u64)> = results
            .iter()
            .map(|r| (r["docSize"].as_u64().unwrap(), r["numDocs"].as_u64().unwrap()))
            .collect();
        assert_eq!(points, [(10, 1), (10, 2), (20, 1), (20, 2)]);
    }

    /// Sleeps a per-iteration time in execute; teardown fails on one iteration.
    struct SlowTeardownFailure {
        sleep_ms: [u64; 3],
        fail_teardown_on: usize,
        iteration: AtomicUsize,
    }

    impl<C> SyncBenchmark<C> for SlowTeardownFailure {
        fn name(&self) -> &str {
            "slow-teardown-failure"
        }

        fn setup(&self, _ctx: &C, _point: MatrixPoint) -> Result<()> {
            self.iteration.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn execute(&self, _ctx: &C, _point: MatrixPoint) -> Result<()> {
            let iteration = self.iteration.load(Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(self.sleep_ms[iteration - 1]));
            Ok(())
        }

        fn teardown(&self, _ctx: &C, _point: MatrixPoint) -> Result<()> {
            if self.iteration.load(Ordering::SeqCst) == self.fail_teardown_on {
                bail!("afterEach failed");
            }
            Ok(())
        }
    }

    #[test]
    fn test_teardown_failure_keeps_measured_samples() {
        let (runner, collection) = runner(config(3, 0));
        let benchmark = SlowTeardownFailure {
            sleep_ms: [5, 200, 5],
            fail_teardown_on: 2,
            iteration: AtomicUsize::new(0),
        };

        let status = runner.run_sync(&benchmark, &FactoryRef(&Factory::default())).unwrap();
        assert_eq!(status, RunStatus::Success);

        let result = &collection.documents()[0]["results"][0];
        assert_eq!(result["numFailures"], 1);
        assert_eq!(result["failures"][0]["iteration"], 2);
        assert_eq!(result["failures"][0]["reason"], "afterEach failed");
        assert!(result["timeMs"]["max"].as_f64().unwrap() >= 200.0);
        assert!(result["timeMs"]["min"].as_f64().unwrap() < 200.0);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_each_iteration_is_logged() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .finish();

        let sink = ReportSink::new(true, false);
        let runner = BenchmarkRunner::new(config(2, 0), Uuid::new_v4(), sink);
        tracing::subscriber::with_default(subscriber, || {
            runner
                .run_sync(&Flaky::new(&[]), &FactoryRef(&Factory::default()))
                .unwrap();
        });

        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        assert!(output.contains("Testing (numDocs=4, docSize=8, iter: 1)"), "{output}");
        assert!(output.contains("Testing (numDocs=4, docSize=8, iter: 2)"), "{output}");
    }

    struct FailingFactory;

    impl ContextFactory for FailingFactory {
        type Context = CountingContext;

        fn create(&self, _test_name: &str) -> Result<CountingContext> {
            bail!("no space left")
        }
    }

    #[test]
    fn test_context_creation_failure_is_fatal() {
        let (runner, _collection) = runner(config(2, 0));
        let err = runner.run_sync(&Flaky::new(&[]), &FailingFactory).unwrap_err();
        assert!(format!("{err:#}").contains("no space left"));
    }

    /// Records the ranges each phase is handed.
    #[derive(Default)]
    struct RecordingCrud {
        ranges: Mutex<Vec<Range<usize>>>,
        covered: Mutex<Vec<usize>>,
        fail_two_workers: bool,
    }

    impl CrudBenchmark for RecordingCrud {
        fn name(&self) -> &str {
            "CrudTest: Fake-Insert"
        }

        fn storage(&self) -> &str {
            "fake"
        }

        fn crud_op(&self) -> CrudOp {
            CrudOp::Insert
        }

        fn setup(&self, _num_docs: usize) -> Result<()> {
            Ok(())
        }

        fn execute(&self, range: Range<usize>) -> Result<()> {
            if self.fail_two_workers && range.start > 0 {
                bail!("second worker failed");
            }
            self.ranges.lock().push(range);
            Ok(())
        }

        fn teardown(&self, _num_docs: usize, covered: usize) -> Result<()> {
            self.covered.lock().push(covered);
            Ok(())
        }
    }

    /// Single-worker insert whose first run is slow and fails verification.
    #[derive(Default)]
    struct SlowFirstCrud {
        executes: AtomicUsize,
        teardowns: AtomicUsize,
    }

    impl CrudBenchmark for SlowFirstCrud {
        fn name(&self) -> &str {
            "CrudTest: Fake-Insert"
        }

        fn storage(&self) -> &str {
            "fake"
        }

        fn crud_op(&self) -> CrudOp {
            CrudOp::Insert
        }

        fn setup(&self, _num_docs: usize) -> Result<()> {
            Ok(())
        }

        fn execute(&self, _range: Range<usize>) -> Result<()> {
            if self.executes.fetch_add(1, Ordering::SeqCst) == 0 {
                std::thread::sleep(Duration::from_millis(200));
            }
            Ok(())
        }

        fn teardown(&self, _num_docs: usize, _covered: usize) -> Result<()> {
            if self.teardowns.fetch_add(1, Ordering::SeqCst) == 0 {
                bail!("Not Filled");
            }
            Ok(())
        }
    }

    #[test]
    fn test_crud_teardown_failure_keeps_sample() {
        let (runner, collection) = runner(config(3, 0));
        let statuses = runner.run_crud(&SlowFirstCrud::default()).unwrap();
        assert_eq!(statuses, [RunStatus::Success, RunStatus::Success]);

        let single = collection
            .documents()
            .into_iter()
            .find(|doc| doc["numThreads"] == 1)
            .unwrap();
        let result = &single["results"][0];
        assert_eq!(result["numFailures"], 1);
        assert!(result["timeMs"]["max"].as_f64().unwrap() >= 200.0);
    }

    #[test]
    fn test_crud_phases_and_odd_counts() {
        let mut config = config(1, 0);
        config.num_docs = vec![7];
        let (runner, collection) = runner(config);
        let benchmark = RecordingCrud::default();

        let statuses = runner.run_crud(&benchmark).unwrap();
        assert_eq!(statuses, [RunStatus::Success, RunStatus::Success]);
        assert_eq!(*benchmark.covered.lock(), [7, 6]);

        let mut ranges = benchmark.ranges.lock().clone();
        ranges.sort_by_key(|r| (r.start, r.end));
        assert_eq!(ranges, [0..3, 0..7, 3..6]);

        let mut threads: Vec<u64> = collection
            .documents()
            .iter()
            .map(|doc| {
                assert_eq!(doc["storage"], "fake");
                assert_eq!(doc["crudOp"], "insert");
                doc["numThreads"].as_u64().unwrap()
            })
            .collect();
        threads.sort_unstable();
        assert_eq!(threads, [1, 2]);
    }

    #[test]
    fn test_crud_phase_failures_are_independent() {
        let (runner, _collection) = runner(config(3, 0));
        let benchmark = RecordingCrud {
            fail_two_workers: true,
            ..RecordingCrud::default()
        };

        let statuses = runner.run_crud(&benchmark).unwrap();
        assert_eq!(statuses, [RunStatus::Success, RunStatus::Failure]);
    }

    #[test]
    fn test_run_label() {
        let mut extra = Map::new();
        extra.insert("percentageConflict".into(), json!(0.5));
        assert_eq!(run_label("R2L_SyncPass", &extra), "R2L_SyncPass (percentageConflict=0.5)");
        assert_eq!(run_label("R2L_InitialSync", &Map::new()), "R2L_InitialSync");
    }
}
