//! SQLite-backed local replica of synced documents.

use super::{SyncError, apply_set};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS synced_docs (
        id      TEXT PRIMARY KEY,
        body    TEXT,
        version INTEGER NOT NULL DEFAULT 0,
        stale   INTEGER NOT NULL DEFAULT 1,
        pending INTEGER NOT NULL DEFAULT 0
    );
";

/// A local document and its sync bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDocument {
    pub id: String,
    /// `None` until the first fetch completes.
    pub body: Option<Value>,
    /// Remote version the body was last reconciled with.
    pub version: u64,
    pub stale: bool,
    /// Whether the body carries a local write not yet pushed.
    pub pending: bool,
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Local replica database.
///
/// Every synced id has a row; a row without a body has been configured but
/// not fetched yet. Access is serialized through one connection.
pub struct LocalReplica {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for LocalReplica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalReplica").field("path", &self.path).finish_non_exhaustive()
    }
}

impl LocalReplica {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let path = path.into();
        let conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::from_secs(30))?;
        let _: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "Opened local replica");

        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start tracking `ids`. Already-tracked ids are left untouched.
    pub fn add_synced(&self, ids: &[String]) -> Result<(), SyncError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached("INSERT OR IGNORE INTO synced_docs (id) VALUES (?1)")?;
            for id in ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn synced_ids(&self) -> Result<Vec<String>, SyncError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id FROM synced_docs ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn stale_ids(&self) -> Result<Vec<String>, SyncError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id FROM synced_docs WHERE stale = 1 ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Flag every tracked document for refetch.
    pub fn mark_all_stale(&self) -> Result<usize, SyncError> {
        Ok(self.conn.lock().execute("UPDATE synced_docs SET stale = 1", [])?)
    }

    pub fn get(&self, id: &str) -> Result<Option<LocalDocument>, SyncError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT body, version, stale, pending FROM synced_docs WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, bool>(2)?,
                        row.get::<_, bool>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(body, version, stale, pending)| {
            Ok(LocalDocument {
                id: id.to_string(),
                body: body.as_deref().map(serde_json::from_str).transpose()?,
                version: to_u64(version),
                stale,
                pending,
            })
        })
        .transpose()
    }

    /// Number of documents with a body.
    pub fn count(&self) -> Result<usize, SyncError> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM synced_docs WHERE body IS NOT NULL",
            [],
            |r| r.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Number of documents whose top-level `field` equals `value`.
    pub fn count_where(&self, field: &str, value: &Value) -> Result<usize, SyncError> {
        let path = format!("$.{field}");
        let value = serde_json::to_string(value)?;
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM synced_docs
             WHERE body IS NOT NULL AND json_extract(body, ?1) = json_extract(?2, '$')",
            params![path, value],
            |r| r.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Store fetched remote state, clearing the stale and pending flags.
    pub fn apply_remote(&self, docs: &[(String, Value, u64)]) -> Result<(), SyncError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE synced_docs SET body = ?2, version = ?3, stale = 0, pending = 0
                 WHERE id = ?1",
            )?;
            for (id, body, version) in docs {
                stmt.execute(params![id, serde_json::to_string(body)?, to_i64(*version)])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Mark documents as reconciled with `version` without touching the body.
    pub fn mark_current(&self, docs: &[(String, u64)]) -> Result<(), SyncError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE synced_docs SET version = ?2, stale = 0 WHERE id = ?1",
            )?;
            for (id, version) in docs {
                stmt.execute(params![id, to_i64(*version)])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Apply a local write to every listed document that has a body.
    /// Returns how many were modified.
    pub fn update_local(&self, ids: &[String], set: &Map<String, Value>) -> Result<usize, SyncError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut modified = 0;
        {
            let mut select =
                tx.prepare_cached("SELECT body FROM synced_docs WHERE id = ?1 AND body IS NOT NULL")?;
            let mut update =
                tx.prepare_cached("UPDATE synced_docs SET body = ?2, pending = 1 WHERE id = ?1")?;
            for id in ids {
                let Some(body) = select
                    .query_row(params![id], |row| row.get::<_, String>(0))
                    .optional()?
                else {
                    continue;
                };
                let mut body: Value = serde_json::from_str(&body)?;
                apply_set(&mut body, set);
                update.execute(params![id, serde_json::to_string(&body)?])?;
                modified += 1;
            }
        }
        tx.commit()?;
        Ok(modified)
    }

    /// Documents carrying unpushed local writes.
    pub fn pending(&self) -> Result<Vec<(String, Value)>, SyncError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, body FROM synced_docs WHERE pending = 1 AND body IS NOT NULL")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, body)| Ok((id, serde_json::from_str(&body)?)))
            .collect()
    }

    /// Record that pushed writes landed remotely at the given versions.
    pub fn mark_pushed(&self, docs: &[(String, u64)]) -> Result<(), SyncError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare_cached("UPDATE synced_docs SET version = ?2, pending = 0 WHERE id = ?1")?;
            for (id, version) in docs {
                stmt.execute(params![id, to_i64(*version)])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Fold the write-ahead log back into the main database file.
    pub fn checkpoint(&self) -> Result<(), SyncError> {
        self.conn.lock().execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}
