//! Benchmark suite configuration.
//!
//! Suites are compositions of workloads. Each suite selects a subset of
//! available workloads to run together; `--workload` names take priority.

use crate::bench::workloads::{
    CRUD_WORKLOADS, DisconnectReconnect, InitialSync, SYNC_WORKLOADS, StoreKind, StoreWorkload,
    SyncPass,
};
use crate::bench::{CrudOp, SyncBenchmark};
use crate::config::BenchmarkConfig;
use crate::sync::SyncContext;
use anyhow::{Result, bail};

/// Scenarios selected for one process run, in execution order.
#[derive(Default)]
pub struct SuitePlan {
    pub crud: Vec<StoreWorkload>,
    pub sync: Vec<Box<dyn SyncBenchmark<SyncContext>>>,
}

impl std::fmt::Debug for SuitePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sync: Vec<_> = self.sync.iter().map(|b| b.name().to_string()).collect();
        f.debug_struct("SuitePlan")
            .field("crud", &self.crud)
            .field("sync", &sync)
            .finish()
    }
}

impl SuitePlan {
    /// Number of run documents the plan produces.
    pub fn run_count(&self) -> usize {
        self.crud.len() * 2 + self.sync.len()
    }

    pub fn is_empty(&self) -> bool {
        self.crud.is_empty() && self.sync.is_empty()
    }
}

/// Every workload name accepted by `--workload`.
pub fn workload_names() -> Vec<&'static str> {
    CRUD_WORKLOADS.iter().chain(SYNC_WORKLOADS).copied().collect()
}

fn parse_crud(name: &str) -> Option<(StoreKind, CrudOp)> {
    let (storage, op) = name.split_once('-')?;
    let kind = StoreKind::ALL.into_iter().find(|k| k.name() == storage)?;
    let op = CrudOp::ALL.into_iter().find(|o| o.name() == op)?;
    Some((kind, op))
}

/// Build the scenarios for the configured suite or workload selection.
pub fn build_plan(config: &BenchmarkConfig) -> Result<SuitePlan> {
    let selected: Vec<String> = config
        .selected_workloads
        .iter()
        .map(|name| name.to_lowercase())
        .collect();

    let valid = workload_names();
    let unknown: Vec<&str> = selected
        .iter()
        .map(String::as_str)
        .filter(|name| !valid.iter().any(|v| v == name))
        .collect();
    if !unknown.is_empty() {
        bail!(
            "Unknown workload(s): {}. Valid options: {}",
            unknown.join(", "),
            valid.join(", ")
        );
    }

    let wanted = |name: &str, in_suite: bool| {
        if selected.is_empty() {
            in_suite
        } else {
            selected.iter().any(|s| s == name)
        }
    };

    let mut plan = SuitePlan::default();

    for &name in CRUD_WORKLOADS {
        if !wanted(name, config.suite.includes_crud()) {
            continue;
        }
        let Some((kind, op)) = parse_crud(name) else {
            bail!("Malformed CRUD workload name: {name}");
        };
        plan.crud.push(StoreWorkload::new(kind, op, config.base_dir.as_deref(), config.seed)?);
    }

    let include_sync = config.suite.includes_sync();
    if wanted("r2l-initial-sync", include_sync) {
        plan.sync.push(Box::new(InitialSync::new(config.seed)));
    }
    if wanted("r2l-disconnect-reconnect", include_sync) {
        plan.sync.push(Box::new(DisconnectReconnect::new(config.seed)));
    }
    if wanted("r2l-sync-pass", include_sync) {
        for &change in &config.change_event_pcts {
            for &conflict in &config.conflict_pcts {
                plan.sync.push(Box::new(SyncPass::new(change, conflict, config.seed)));
            }
        }
    }

    Ok(plan)
}
