//! Benchmark scenarios.
//!
//! CRUD scenarios exercise the local-only storage engines; sync scenarios
//! exercise the remote-to-local engine. Each can be selected individually
//! via `--workload NAME` or composed into suites.

mod crud;
mod sync;

pub use crud::{StoreKind, StoreWorkload, all_crud_workloads};
pub use sync::{DisconnectReconnect, InitialSync, SyncPass};

/// CRUD workload names, `<storage>-<operation>`.
pub const CRUD_WORKLOADS: &[&str] = &[
    "sqlite-insert",
    "sqlite-delete",
    "sqlite-find",
    "memory-insert",
    "memory-delete",
    "memory-find",
];

/// Sync workload names.
pub const SYNC_WORKLOADS: &[&str] = &[
    "r2l-initial-sync",
    "r2l-disconnect-reconnect",
    "r2l-sync-pass",
];
