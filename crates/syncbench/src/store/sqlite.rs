//! SQLite-backed document store.

use super::{DocumentStore, StoreError, TestDocument, foo_bounds};
use rusqlite::{Connection, ErrorCode, TransactionBehavior, params};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS docs (
        id  TEXT PRIMARY KEY,
        foo INTEGER NOT NULL,
        bar BLOB NOT NULL,
        baz TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS docs_foo ON docs (foo);
";

/// Document store in a single SQLite database file.
///
/// Every call opens its own connection, so concurrent workers never
/// share one. Writers are serialized by SQLite; the busy timeout makes a
/// blocked writer wait instead of failing.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { path: path.into() };
        if let Some(parent) = store.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = store.connection()?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %store.path.display(), journal_mode = %mode, "Opened SQLite store");

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connection(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, i64, Vec<u8>, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

impl DocumentStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.connection()?.execute("DELETE FROM docs", [])?;
        Ok(())
    }

    fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .connection()?
            .query_row("SELECT COUNT(*) FROM docs", [], |r| r.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn insert_many(&self, docs: &[TestDocument]) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut stmt =
                tx.prepare_cached("INSERT INTO docs (id, foo, bar, baz) VALUES (?1, ?2, ?3, ?4)")?;
            for doc in docs {
                let baz = serde_json::to_string(&doc.baz)?;
                stmt.execute(params![doc.id, doc.foo, doc.bar, baz])
                    .map_err(|e| match e.sqlite_error_code() {
                        Some(ErrorCode::ConstraintViolation) => {
                            StoreError::DuplicateId(doc.id.clone())
                        }
                        _ => StoreError::Sqlite(e),
                    })?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_range(&self, range: Range<usize>) -> Result<usize, StoreError> {
        let (start, end) = foo_bounds(&range);
        let deleted = self.connection()?.execute(
            "DELETE FROM docs WHERE foo >= ?1 AND foo < ?2",
            params![start, end],
        )?;
        Ok(deleted)
    }

    fn find_range(&self, range: Range<usize>) -> Result<Vec<TestDocument>, StoreError> {
        let (start, end) = foo_bounds(&range);
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, foo, bar, baz FROM docs WHERE foo >= ?1 AND foo < ?2 ORDER BY foo",
        )?;
        let rows = stmt.query_map(params![start, end], row_to_document)?;

        let mut docs = Vec::new();
        for row in rows {
            let (id, foo, bar, baz) = row?;
            docs.push(TestDocument {
                id,
                foo,
                bar,
                baz: serde_json::from_str(&baz)?,
            });
        }
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{exercise_concurrent_halves, exercise_store};

    #[test]
    fn test_sqlite_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("docs.db")).unwrap();
        exercise_store(&store);
    }

    #[test]
    fn test_sqlite_store_concurrent_workers() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("docs.db")).unwrap();
        exercise_concurrent_halves(&store);
    }

    #[test]
    fn test_duplicate_insert_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("nested").join("docs.db")).unwrap();
        let docs = crate::store::generate_documents(3, 9);
        store.insert_many(&docs[..1]).unwrap();

        let err = store.insert_many(&docs).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId(ref id) if *id == docs[0].id));
        assert_eq!(store.count().unwrap(), 1);
    }
}
