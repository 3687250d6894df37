//! In-memory document store.

use super::{DocumentStore, StoreError, TestDocument, foo_bounds};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::ops::Range;

#[derive(Debug, Default)]
struct Inner {
    /// Documents keyed by `(foo, id)` so range scans follow index order.
    docs: BTreeMap<(i64, String), TestDocument>,
    ids: HashSet<String>,
}

/// Document store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.docs.clear();
        inner.ids.clear();
        Ok(())
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.read().docs.len())
    }

    fn insert_many(&self, docs: &[TestDocument]) -> Result<(), StoreError> {
        let mut inner = self.inner.write();

        let mut batch = HashSet::with_capacity(docs.len());
        if let Some(dup) = docs
            .iter()
            .find(|d| inner.ids.contains(&d.id) || !batch.insert(d.id.as_str()))
        {
            return Err(StoreError::DuplicateId(dup.id.clone()));
        }

        for doc in docs {
            inner.ids.insert(doc.id.clone());
            inner.docs.insert((doc.foo, doc.id.clone()), doc.clone());
        }
        Ok(())
    }

    fn delete_range(&self, range: Range<usize>) -> Result<usize, StoreError> {
        let (start, end) = foo_bounds(&range);
        let mut inner = self.inner.write();

        let keys: Vec<_> = inner
            .docs
            .range((start, String::new())..(end, String::new()))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            inner.docs.remove(key);
            inner.ids.remove(&key.1);
        }
        Ok(keys.len())
    }

    fn find_range(&self, range: Range<usize>) -> Result<Vec<TestDocument>, StoreError> {
        let (start, end) = foo_bounds(&range);
        let inner = self.inner.read();
        Ok(inner
            .docs
            .range((start, String::new())..(end, String::new()))
            .map(|(_, doc)| doc.clone())
            .collect())
    }
}
