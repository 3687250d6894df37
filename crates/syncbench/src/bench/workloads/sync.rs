//! Remote-to-local sync scenarios.
//!
//! Documents are inserted on the remote side only; the scenarios time how
//! long the local replica takes to catch up in three situations: the first
//! sync, a reconnect after a network drop, and a pass over a mix of remote
//! changes and local conflicts.

use crate::bench::{MatrixPoint, SyncBenchmark};
use crate::sync::SyncContext;
use anyhow::{Result, bail, ensure};
use parking_lot::Mutex;
use rand::distr::Alphanumeric;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{Map, Value, json};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Interval between connectivity checks.
const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls before giving up on the streams (30 seconds).
const STREAM_POLL_LIMIT: u32 = 3000;

/// Seeded source of payloads and shuffles, shared by a scenario's
/// iterations.
#[derive(Debug)]
struct Payloads {
    rng: Mutex<ChaCha8Rng>,
}

impl Payloads {
    fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    /// `num_docs` documents with a random id and `doc_size` bytes of data.
    fn documents(&self, num_docs: usize, doc_size: usize) -> Vec<Value> {
        let mut rng = self.rng.lock();
        (0..num_docs)
            .map(|_| {
                let id = uuid::Uuid::from_bytes(rng.random()).simple().to_string();
                let data: String = (&mut *rng)
                    .sample_iter(Alphanumeric)
                    .take(doc_size)
                    .map(char::from)
                    .collect();
                json!({ "_id": id, "data": data })
            })
            .collect()
    }

    fn shuffle(&self, ids: &mut [String]) {
        ids.shuffle(&mut *self.rng.lock());
    }
}

fn doc_size(point: MatrixPoint) -> usize {
    point.doc_size.unwrap_or(0)
}

fn new_field(value: &str) -> Map<String, Value> {
    let mut set = Map::new();
    set.insert("newField".into(), json!(value));
    set
}

fn assert_count(actual: usize, expected: usize, what: &str) -> Result<()> {
    ensure!(actual == expected, "{what}: expected {expected} but got {actual}");
    Ok(())
}

/// Insert a fresh batch remotely and return its ids.
fn insert_to_remote(ctx: &SyncContext, payloads: &Payloads, point: MatrixPoint) -> Result<Vec<String>> {
    let docs = payloads.documents(point.num_docs, doc_size(point));
    let ids = ctx.remote().insert_many(&docs)?;
    assert_count(ids.len(), point.num_docs, "Number of Remote Inserts")?;
    Ok(ids)
}

/// Both sides hold exactly `num_docs` documents.
fn assert_local_and_remote_count(ctx: &SyncContext, num_docs: usize) -> Result<()> {
    assert_count(ctx.synchronizer().count()?, num_docs, "Number of Local Documents")?;
    assert_count(ctx.remote().count()?, num_docs, "Number of Remote Documents")
}

/// Configure, sync `ids` and run the first pass.
fn sync_ids(ctx: &SyncContext, ids: &[String]) -> Result<()> {
    ctx.default_configure();
    ctx.synchronizer().sync_many(ids)?;
    ctx.do_sync_pass()
}

/// Poll until the synchronizer's streams reach `open`.
fn wait_for_streams(ctx: &SyncContext, open: bool) -> Result<()> {
    let mut polls = 0;
    while ctx.synchronizer().are_all_streams_open() != open {
        thread::sleep(STREAM_POLL_INTERVAL);
        polls += 1;
        if polls > STREAM_POLL_LIMIT {
            if open {
                bail!("stream never opened after reconnect");
            }
            bail!("streams never closed after disconnect");
        }
    }
    Ok(())
}

/// `R2L_InitialSync`: time configuring sync on remotely inserted documents
/// and pulling them with one pass.
#[derive(Debug)]
pub struct InitialSync {
    payloads: Payloads,
    ids: Mutex<Vec<String>>,
}

impl InitialSync {
    pub fn new(seed: u64) -> Self {
        Self {
            payloads: Payloads::new(seed),
            ids: Mutex::new(Vec::new()),
        }
    }
}

impl SyncBenchmark<SyncContext> for InitialSync {
    fn name(&self) -> &str {
        "R2L_InitialSync"
    }

    fn setup(&self, ctx: &SyncContext, point: MatrixPoint) -> Result<()> {
        *self.ids.lock() = insert_to_remote(ctx, &self.payloads, point)?;
        Ok(())
    }

    fn execute(&self, ctx: &SyncContext, _point: MatrixPoint) -> Result<()> {
        let ids = self.ids.lock();
        sync_ids(ctx, &ids)
    }

    fn teardown(&self, ctx: &SyncContext, point: MatrixPoint) -> Result<()> {
        assert_local_and_remote_count(ctx, point.num_docs)
    }
}

/// `R2L_DisconnectReconnect`: time reconnecting and the pass that refetches
/// every document marked stale by the reconnect.
#[derive(Debug)]
pub struct DisconnectReconnect {
    payloads: Payloads,
}

impl DisconnectReconnect {
    pub fn new(seed: u64) -> Self {
        Self {
            payloads: Payloads::new(seed),
        }
    }
}

impl SyncBenchmark<SyncContext> for DisconnectReconnect {
    fn name(&self) -> &str {
        "R2L_DisconnectReconnect"
    }

    fn setup(&self, ctx: &SyncContext, point: MatrixPoint) -> Result<()> {
        let ids = insert_to_remote(ctx, &self.payloads, point)?;
        sync_ids(ctx, &ids)?;

        let synced = ctx.synchronizer().synced_ids()?.len();
        assert_count(synced, point.num_docs, "Number of Synced Ids")?;
        assert_count(ctx.synchronizer().count()?, point.num_docs, "Number of Local Documents")?;

        ctx.network().set_connected(false);
        wait_for_streams(ctx, false)
    }

    fn execute(&self, ctx: &SyncContext, _point: MatrixPoint) -> Result<()> {
        ctx.network().set_connected(true);
        wait_for_streams(ctx, true)?;
        ctx.do_sync_pass()
    }

    fn teardown(&self, ctx: &SyncContext, point: MatrixPoint) -> Result<()> {
        assert_local_and_remote_count(ctx, point.num_docs)
    }
}

/// `R2L_SyncPass`: time one pass after a share of the documents changed
/// remotely and a share of those also changed locally.
#[derive(Debug)]
pub struct SyncPass {
    change_pct: f64,
    conflict_pct: f64,
    payloads: Payloads,
    changed: Mutex<Option<usize>>,
}

impl SyncPass {
    pub fn new(change_pct: f64, conflict_pct: f64, seed: u64) -> Self {
        Self {
            change_pct,
            conflict_pct,
            payloads: Payloads::new(seed),
            changed: Mutex::new(None),
        }
    }

    /// Documents updated remotely for `num_docs` documents.
    pub fn num_changes(&self, num_docs: usize) -> usize {
        fraction_of(self.change_pct, num_docs)
    }

    /// Documents updated locally for `num_docs` documents.
    pub fn num_conflicts(&self, num_docs: usize) -> usize {
        fraction_of(self.change_pct * self.conflict_pct, num_docs)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn fraction_of(pct: f64, num_docs: usize) -> usize {
    ((pct * num_docs as f64).floor() as usize).min(num_docs)
}

impl SyncBenchmark<SyncContext> for SyncPass {
    fn name(&self) -> &str {
        "R2L_SyncPass"
    }

    fn extra_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("percentageChangeEvent".into(), json!(self.change_pct));
        fields.insert("percentageConflict".into(), json!(self.conflict_pct));
        fields
    }

    fn setup(&self, ctx: &SyncContext, point: MatrixPoint) -> Result<()> {
        let mut ids = insert_to_remote(ctx, &self.payloads, point)?;
        sync_ids(ctx, &ids)?;
        assert_local_and_remote_count(ctx, point.num_docs)?;

        self.payloads.shuffle(&mut ids);

        let num_changes = self.num_changes(point.num_docs);
        let updated = ctx.remote().update_many(&ids[..num_changes], &new_field("remote"))?;
        assert_count(updated, num_changes, "Number of Remote Updates")?;
        *self.changed.lock() = Some(num_changes);

        let num_conflicts = self.num_conflicts(point.num_docs);
        let updated = ctx
            .synchronizer()
            .update_local(&ids[..num_conflicts], &new_field("local"))?;
        assert_count(updated, num_conflicts, "Number of Local Updates")?;

        debug!(num_changes, num_conflicts, "Prepared sync pass");
        Ok(())
    }

    fn execute(&self, ctx: &SyncContext, _point: MatrixPoint) -> Result<()> {
        ctx.do_sync_pass()
    }

    fn teardown(&self, ctx: &SyncContext, point: MatrixPoint) -> Result<()> {
        assert_local_and_remote_count(ctx, point.num_docs)?;

        let Some(expected) = self.changed.lock().take() else {
            bail!("setup did not record the number of changed documents");
        };
        let remote = json!("remote");
        assert_count(
            ctx.remote().count_where("newField", &remote)?,
            expected,
            "Num Remote Updates After Test",
        )?;
        assert_count(
            ctx.synchronizer().count_where("newField", &remote)?,
            expected,
            "Num Local Updates After Test",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::{ContextFactory, ExecutionContext};
    use crate::sync::LocalContextFactory;

    fn context() -> SyncContext {
        let ctx = LocalContextFactory::default().create("test").unwrap();
        ctx.prepare().unwrap();
        ctx
    }

    fn run(benchmark: &dyn SyncBenchmark<SyncContext>, point: MatrixPoint) -> Result<()> {
        let ctx = context();
        benchmark.setup(&ctx, point)?;
        benchmark.execute(&ctx, point)?;
        benchmark.teardown(&ctx, point)?;
        ctx.close()
    }

    #[test]
    fn test_payload_shape() {
        let payloads = Payloads::new(3);
        let docs = payloads.documents(4, 50);
        assert_eq!(docs.len(), 4);
        assert_eq!(docs[0]["data"].as_str().unwrap().len(), 50);
        assert_eq!(docs[0]["_id"].as_str().unwrap().len(), 32);
        assert_ne!(docs[0]["_id"], docs[1]["_id"]);
    }

    #[test]
    fn test_initial_sync() {
        run(&InitialSync::new(1), MatrixPoint::new(20, Some(50))).unwrap();
    }

    #[test]
    fn test_initial_sync_with_no_documents() {
        run(&InitialSync::new(1), MatrixPoint::new(0, Some(50))).unwrap();
    }

    #[test]
    fn test_disconnect_reconnect() {
        run(&DisconnectReconnect::new(2), MatrixPoint::new(15, Some(10))).unwrap();
    }

    #[test]
    fn test_sync_pass_with_conflicts() {
        let benchmark = SyncPass::new(0.5, 0.5, 3);
        assert_eq!(benchmark.num_changes(20), 10);
        assert_eq!(benchmark.num_conflicts(20), 5);
        run(&benchmark, MatrixPoint::new(20, Some(10))).unwrap();
    }

    #[test]
    fn test_sync_pass_rounds_down() {
        let benchmark = SyncPass::new(0.01, 0.1, 4);
        assert_eq!(benchmark.num_changes(100), 1);
        assert_eq!(benchmark.num_conflicts(100), 0);
        run(&benchmark, MatrixPoint::new(100, Some(10))).unwrap();
    }

    #[test]
    fn test_sync_pass_extra_fields() {
        let fields = SyncPass::new(0.25, 1.0, 0).extra_fields();
        assert_eq!(fields["percentageChangeEvent"], 0.25);
        assert_eq!(fields["percentageConflict"], 1.0);
    }

    #[test]
    fn test_teardown_catches_missing_sync() {
        let benchmark = InitialSync::new(5);
        let ctx = context();
        let point = MatrixPoint::new(5, Some(10));
        benchmark.setup(&ctx, point).unwrap();
        let err = benchmark.teardown(&ctx, point).unwrap_err();
        assert!(err.to_string().starts_with("Number of Local Documents"), "{err}");
    }
}
