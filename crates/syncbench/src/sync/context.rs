//! Per-iteration sync environments.

use super::{
    ConflictPolicy, DataSynchronizer, LocalReplica, NetworkMonitor, RemoteClient, RemoteCollection,
};
use crate::bench::{ContextFactory, ExecutionContext, probe};
use anyhow::{Context as _, Result, ensure};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::debug;

/// A fresh remote, network and local replica for one iteration.
///
/// The replica lives in a temporary directory that is deleted when the
/// context is dropped.
#[derive(Debug)]
pub struct SyncContext {
    test_name: String,
    dir: TempDir,
    remote: RemoteClient,
    network: NetworkMonitor,
    synchronizer: DataSynchronizer,
}

impl SyncContext {
    pub fn new(test_name: &str, dir: TempDir, latency: Option<Duration>) -> Result<Self> {
        let network = NetworkMonitor::new(true);
        let remote = RemoteClient::new(RemoteCollection::new(), network.clone(), latency);
        let replica = LocalReplica::open(dir.path().join("replica.db"))
            .with_context(|| format!("failed to open replica in {}", dir.path().display()))?;
        let synchronizer = DataSynchronizer::new(remote.clone(), replica);

        Ok(Self {
            test_name: test_name.to_string(),
            dir,
            remote,
            network,
            synchronizer,
        })
    }

    /// Client for direct remote operations, sharing the synchronizer's
    /// connection and traffic counters.
    pub fn remote(&self) -> &RemoteClient {
        &self.remote
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn synchronizer(&self) -> &DataSynchronizer {
        &self.synchronizer
    }

    pub fn data_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Configure the synchronizer with the default policy.
    pub fn default_configure(&self) {
        self.synchronizer.configure(ConflictPolicy::default());
    }

    /// Run a sync pass, treating a skipped pass as an error.
    pub fn do_sync_pass(&self) -> Result<()> {
        let succeeded = self.synchronizer.do_sync_pass()?;
        ensure!(succeeded, "sync pass failed");
        Ok(())
    }
}

impl ExecutionContext for SyncContext {
    fn prepare(&self) -> Result<()> {
        self.network.set_connected(true);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.synchronizer
            .close()
            .context("failed to flush local replica")?;
        debug!(test = %self.test_name, dir = %self.dir.path().display(), "Closed sync context");
        Ok(())
    }

    fn disk_bytes(&self) -> u64 {
        probe::directory_size(self.dir.path())
    }

    fn network_sent_bytes(&self) -> u64 {
        self.remote.traffic().sent()
    }

    fn network_received_bytes(&self) -> u64 {
        self.remote.traffic().received()
    }
}

/// Builds [`SyncContext`]s in fresh temporary directories.
#[derive(Debug, Clone, Default)]
pub struct LocalContextFactory {
    base_dir: Option<PathBuf>,
    latency: Option<Duration>,
}

impl LocalContextFactory {
    pub fn new(base_dir: Option<PathBuf>, latency: Option<Duration>) -> Self {
        Self { base_dir, latency }
    }
}

impl ContextFactory for LocalContextFactory {
    type Context = SyncContext;

    fn create(&self, test_name: &str) -> Result<SyncContext> {
        let slug: String = test_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        let prefix = format!("syncbench-{slug}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match &self.base_dir {
            Some(base) => {
                std::fs::create_dir_all(base)
                    .with_context(|| format!("failed to create {}", base.display()))?;
                builder.tempdir_in(base)
            }
            None => builder.tempdir(),
        }
        .context("failed to create context directory")?;

        SyncContext::new(test_name, dir, self.latency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_factory_creates_isolated_contexts() {
        let base = tempfile::tempdir().unwrap();
        let factory = LocalContextFactory::new(Some(base.path().to_path_buf()), None);
        let a = factory.create("R2L_InitialSync").unwrap();
        let b = factory.create("R2L_InitialSync").unwrap();

        assert_ne!(a.data_dir(), b.data_dir());
        assert!(a.data_dir().starts_with(base.path()));
        let name = a.data_dir().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("syncbench-r2l-initialsync-"), "{name}");
        assert!(a.disk_bytes() > 0);
    }

    #[test]
    fn test_context_counts_traffic_and_cleans_up() {
        let factory = LocalContextFactory::default();
        let ctx = factory.create("traffic").unwrap();
        ctx.prepare().unwrap();
        let dir = ctx.data_dir().to_path_buf();

        ctx.remote().insert_many(&[json!({"_id": "a"})]).unwrap();
        assert!(ctx.network_sent_bytes() > 0);
        assert!(ctx.network_received_bytes() > 0);

        ctx.default_configure();
        ctx.synchronizer().sync_many(&["a".into()]).unwrap();
        ctx.do_sync_pass().unwrap();
        assert_eq!(ctx.synchronizer().count().unwrap(), 1);

        ctx.network().set_connected(false);
        assert_eq!(ctx.do_sync_pass().unwrap_err().to_string(), "sync pass failed");

        ctx.close().unwrap();
        drop(ctx);
        assert!(!dir.exists());
    }
}
