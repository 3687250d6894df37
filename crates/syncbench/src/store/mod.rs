//! Local-only storage engines exercised by the CRUD scenarios.
//!
//! Both engines store the same [`TestDocument`] shape and address
//! documents for range operations by their `foo` index, so two workers
//! handed disjoint index ranges touch disjoint documents.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

/// Errors raised by a storage engine.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document {0} already exists")]
    DuplicateId(String),
}

/// The document stored by every CRUD scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDocument {
    pub id: String,
    /// Position of the document within its generated batch.
    pub foo: i64,
    pub bar: Vec<u8>,
    pub baz: Vec<i64>,
}

impl TestDocument {
    /// Build the document at position `index` with a random id.
    pub fn generate(rng: &mut impl Rng, index: usize) -> Self {
        let id = uuid::Uuid::from_bytes(rng.random()).simple().to_string();
        Self {
            id,
            foo: index_to_foo(index),
            bar: vec![1, 2, 3],
            baz: vec![4, 5, 6],
        }
    }
}

/// Generate `num_docs` documents with indexes `0..num_docs`.
pub fn generate_documents(num_docs: usize, seed: u64) -> Vec<TestDocument> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..num_docs)
        .map(|index| TestDocument::generate(&mut rng, index))
        .collect()
}

/// Convert a document index into the stored `foo` value.
pub(crate) fn index_to_foo(index: usize) -> i64 {
    i64::try_from(index).unwrap_or(i64::MAX)
}

/// `foo` bounds `[start, end)` for an index range.
pub(crate) fn foo_bounds(range: &Range<usize>) -> (i64, i64) {
    (index_to_foo(range.start), index_to_foo(range.end))
}

/// A local-only document store.
///
/// Implementations must tolerate concurrent calls from two workers.
pub trait DocumentStore: Send + Sync {
    /// Storage label recorded in run documents.
    fn name(&self) -> &'static str;

    /// Remove every document.
    fn clear(&self) -> Result<(), StoreError>;

    /// Number of stored documents.
    fn count(&self) -> Result<usize, StoreError>;

    /// Insert documents atomically.
    fn insert_many(&self, docs: &[TestDocument]) -> Result<(), StoreError>;

    /// Delete documents whose `foo` falls in `range`. Returns how many.
    fn delete_range(&self, range: Range<usize>) -> Result<usize, StoreError>;

    /// Fetch documents whose `foo` falls in `range`, ordered by `foo`.
    fn find_range(&self, range: Range<usize>) -> Result<Vec<TestDocument>, StoreError>;
}
