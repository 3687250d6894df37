//! Process resource probes sampled while workloads run.
//!
//! Every probe is best effort: a reading that cannot be taken on the
//! current platform comes back as `None` and is treated as zero by the
//! default [`ExecutionContext`](crate::bench::ExecutionContext) accessors.

use std::path::Path;
use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessesToUpdate, System};
use walkdir::WalkDir;

/// Refresh only this process, with only the fields in `kind`, and read it.
fn read_self<T>(kind: ProcessRefreshKind, read: impl FnOnce(&Process) -> Option<T>) -> Option<T> {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new();
    system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, kind);
    system.process(pid).and_then(read)
}

/// Current resident set size of this process, in bytes.
pub fn resident_memory_bytes() -> Option<u64> {
    read_self(ProcessRefreshKind::nothing().with_memory(), |process| {
        Some(process.memory())
    })
}

/// Number of live threads in this process.
///
/// Only Linux exposes per-process tasks; elsewhere this is `None`.
pub fn thread_count() -> Option<u64> {
    read_self(ProcessRefreshKind::nothing().with_tasks(), |process| {
        process.tasks().map(|tasks| tasks.len() as u64)
    })
}

/// Total size of the regular files under `root`, in bytes.
///
/// Entries that vanish or cannot be read while walking are skipped.
pub fn directory_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}
