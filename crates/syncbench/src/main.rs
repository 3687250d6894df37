//! syncbench - remote-sync vs local storage benchmark harness.

// Use mimalloc for reduced allocation latency (enabled by default).
// Disable with `--no-default-features` if debugging allocator issues.
#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use syncbench::{
    bench::{BenchmarkRunner, SuitePlan, build_plan},
    cli::Cli,
    config::BenchmarkConfig,
    report::ReportSink,
    sync::LocalContextFactory,
};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use uuid::Uuid;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Log messages appear above progress bars without clobbering them.
    // RUST_LOG wins over the verbose flag.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("info")
        } else {
            EnvFilter::new("warn")
        }
    });

    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(indicatif_layer.get_stderr_writer()),
        )
        .with(indicatif_layer)
        .with(filter)
        .init();

    if cli.execute_list_command() {
        return Ok(());
    }

    let run_id = cli.run_id();
    let config = cli.into_config().context("Failed to create benchmark config")?;

    let sink = ReportSink::connect(&config.output).context("Failed to set up result reporting")?;
    let plan = build_plan(&config).context("Failed to build benchmark suite")?;
    if plan.is_empty() {
        anyhow::bail!("No workloads selected");
    }

    if config.output.stdout {
        print_banner(&config, &plan, run_id);
    }

    let factory = LocalContextFactory::new(config.base_dir.clone(), config.simulated_latency);
    let stdout = config.output.stdout;
    let runner = BenchmarkRunner::new(config, run_id, sink);
    let outcomes = runner
        .run_plan(&plan, &factory)
        .context("Benchmark execution failed")?;

    if stdout {
        runner.sink().printer().print_summary(&outcomes);
    }

    // Brief delay to allow background threads (indicatif tick threads, tracing layer)
    // to terminate cleanly.
    std::thread::sleep(std::time::Duration::from_millis(100));

    if outcomes.iter().any(|o| !o.status.is_success()) {
        std::process::exit(1);
    }
    Ok(())
}

/// Print a compact one-line banner with configuration summary.
fn print_banner(config: &BenchmarkConfig, plan: &SuitePlan, run_id: Uuid) {
    use owo_colors::OwoColorize;

    let scenarios = plan.crud.len() + plan.sync.len();
    println!();
    if config.output.color {
        println!(
            "{}: {} scenarios ({} suite) - {} iterations, run {}",
            "syncbench".cyan().bold(),
            scenarios,
            config.suite,
            config.iterations,
            run_id.dimmed()
        );
    } else {
        println!(
            "syncbench: {} scenarios ({} suite) - {} iterations, run {}",
            scenarios, config.suite, config.iterations, run_id
        );
    }
    println!();
}
