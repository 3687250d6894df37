//! CRUD scenarios over the local-only storage engines.
//!
//! Every setup clears the store and generates a fresh batch of
//! [`TestDocument`]s; `execute` then inserts, deletes or reads the
//! documents whose index falls in the worker's range.

use crate::bench::{CrudBenchmark, CrudOp};
use crate::store::{DocumentStore, MemoryStore, SqliteStore, TestDocument, generate_documents};
use anyhow::{Context, Result, ensure};
use parking_lot::RwLock;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::debug;

/// Storage engine a CRUD scenario runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    Sqlite,
    Memory,
}

impl StoreKind {
    pub const ALL: [StoreKind; 2] = [StoreKind::Sqlite, StoreKind::Memory];

    /// Value of the `storage` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Self::Sqlite => "Sqlite",
            Self::Memory => "Memory",
        }
    }
}

/// One storage engine, one operation.
pub struct StoreWorkload {
    name: String,
    kind: StoreKind,
    op: CrudOp,
    store: Arc<dyn DocumentStore>,
    seed: u64,
    docs: RwLock<Vec<TestDocument>>,
    // Keeps the SQLite file alive for as long as the workload exists
    _dir: Option<TempDir>,
}

impl std::fmt::Debug for StoreWorkload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreWorkload")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("op", &self.op)
            .finish_non_exhaustive()
    }
}

impl StoreWorkload {
    /// Create the workload and its store. SQLite databases live in a
    /// fresh temporary directory under `base_dir` (or the system default).
    pub fn new(kind: StoreKind, op: CrudOp, base_dir: Option<&Path>, seed: u64) -> Result<Self> {
        let (store, dir): (Arc<dyn DocumentStore>, _) = match kind {
            StoreKind::Sqlite => {
                let mut builder = tempfile::Builder::new();
                builder.prefix("syncbench-crud-");
                let dir = match base_dir {
                    Some(base) => {
                        std::fs::create_dir_all(base)
                            .with_context(|| format!("failed to create {}", base.display()))?;
                        builder.tempdir_in(base)
                    }
                    None => builder.tempdir(),
                }
                .context("failed to create store directory")?;
                let store = SqliteStore::open(dir.path().join(format!("{}.db", op.name())))
                    .context("failed to open SQLite store")?;
                (Arc::new(store), Some(dir))
            }
            StoreKind::Memory => (Arc::new(MemoryStore::new()), None),
        };

        Ok(Self::with_store(kind, op, store, seed, dir))
    }

    fn with_store(
        kind: StoreKind,
        op: CrudOp,
        store: Arc<dyn DocumentStore>,
        seed: u64,
        dir: Option<TempDir>,
    ) -> Self {
        let op_title = match op {
            CrudOp::Insert => "Insert",
            CrudOp::Delete => "Delete",
            CrudOp::Find => "Find",
        };
        Self {
            name: format!("CrudTest: {}-{op_title}", kind.title()),
            kind,
            op,
            store,
            seed,
            docs: RwLock::new(Vec::new()),
            _dir: dir,
        }
    }

    /// Workload name as accepted by `--workload`, e.g. `sqlite-insert`.
    pub fn workload_name(&self) -> String {
        format!("{}-{}", self.kind.name(), self.op.name())
    }
}

impl CrudBenchmark for StoreWorkload {
    fn name(&self) -> &str {
        &self.name
    }

    fn storage(&self) -> &str {
        self.kind.name()
    }

    fn crud_op(&self) -> CrudOp {
        self.op
    }

    fn setup(&self, num_docs: usize) -> Result<()> {
        self.store.clear()?;
        ensure!(self.store.count()? == 0, "Collection not emptied");

        let docs = generate_documents(num_docs, self.seed);
        if matches!(self.op, CrudOp::Delete | CrudOp::Find) {
            self.store.insert_many(&docs)?;
            ensure!(self.store.count()? == num_docs, "Not Filled");
        }
        debug!(test = %self.name, num_docs, "Prepared documents");
        *self.docs.write() = docs;
        Ok(())
    }

    fn execute(&self, range: Range<usize>) -> Result<()> {
        match self.op {
            CrudOp::Insert => {
                let docs = self.docs.read();
                let batch = docs.get(range.clone()).with_context(|| {
                    format!("range {range:?} outside the {} prepared documents", docs.len())
                })?;
                self.store.insert_many(batch)?;
            }
            CrudOp::Delete => {
                self.store.delete_range(range)?;
            }
            CrudOp::Find => {
                let expected = range.len();
                let found = self.store.find_range(range)?;
                ensure!(
                    found.len() == expected,
                    "Found {} documents, expected {expected}",
                    found.len()
                );
            }
        }
        Ok(())
    }

    fn teardown(&self, num_docs: usize, covered: usize) -> Result<()> {
        let count = self.store.count()?;
        match self.op {
            CrudOp::Insert => ensure!(
                count == covered,
                "Inserted {count} documents, expected {covered}"
            ),
            CrudOp::Delete => ensure!(count == num_docs.saturating_sub(covered), "Not Empty (2)"),
            CrudOp::Find => ensure!(count == num_docs, "Find modified the collection"),
        }
        Ok(())
    }
}

/// Every CRUD scenario, one per engine and operation.
pub fn all_crud_workloads(base_dir: Option<&Path>, seed: u64) -> Result<Vec<StoreWorkload>> {
    let mut workloads = Vec::new();
    for kind in StoreKind::ALL {
        for op in CrudOp::ALL {
            workloads.push(StoreWorkload::new(kind, op, base_dir, seed)?);
        }
    }
    Ok(workloads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::WorkloadExecutor;

    fn memory(op: CrudOp) -> StoreWorkload {
        StoreWorkload::new(StoreKind::Memory, op, None, 7).unwrap()
    }

    #[test]
    fn test_names() {
        let workload = memory(CrudOp::Delete);
        assert_eq!(workload.name(), "CrudTest: Memory-Delete");
        assert_eq!(workload.workload_name(), "memory-delete");
        assert_eq!(workload.storage(), "memory");
        assert_eq!(workload.crud_op(), CrudOp::Delete);
    }

    #[test]
    fn test_insert_two_workers_odd_count() {
        let workload = memory(CrudOp::Insert);
        workload.setup(7).unwrap();
        let execution = WorkloadExecutor::new()
            .run_two_workers(7, |range| workload.execute(range))
            .unwrap();
        assert_eq!(execution.processed, 6);
        workload.teardown(7, execution.processed).unwrap();
        assert!(workload.teardown(7, 7).is_err());
    }

    #[test]
    fn test_delete_single_worker() {
        let workload = memory(CrudOp::Delete);
        workload.setup(10).unwrap();
        assert_eq!(workload.store.count().unwrap(), 10);
        workload.execute(0..10).unwrap();
        workload.teardown(10, 10).unwrap();
    }

    #[test]
    fn test_delete_leftover_fails_verification() {
        let workload = memory(CrudOp::Delete);
        workload.setup(10).unwrap();
        workload.execute(0..5).unwrap();
        let err = workload.teardown(10, 10).unwrap_err();
        assert_eq!(err.to_string(), "Not Empty (2)");
    }

    #[test]
    fn test_find_checks_result_size() {
        let workload = memory(CrudOp::Find);
        workload.setup(4).unwrap();
        workload.execute(0..4).unwrap();
        assert!(workload.execute(2..9).is_err());
        workload.teardown(4, 4).unwrap();
    }

    #[test]
    fn test_setup_resets_between_phases() {
        let workload = memory(CrudOp::Insert);
        workload.setup(3).unwrap();
        workload.execute(0..3).unwrap();
        workload.setup(3).unwrap();
        assert_eq!(workload.store.count().unwrap(), 0);
    }

    #[test]
    fn test_sqlite_insert() {
        let base = tempfile::tempdir().unwrap();
        let workload = StoreWorkload::new(StoreKind::Sqlite, CrudOp::Insert, Some(base.path()), 1)
            .unwrap();
        assert_eq!(workload.name(), "CrudTest: Sqlite-Insert");
        workload.setup(6).unwrap();
        WorkloadExecutor::new()
            .run_two_workers(6, |range| workload.execute(range))
            .unwrap();
        workload.teardown(6, 6).unwrap();
    }

    #[test]
    fn test_all_crud_workloads() {
        let workloads = all_crud_workloads(None, 0).unwrap();
        assert_eq!(workloads.len(), 6);
    }
}
