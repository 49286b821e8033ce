//! In-memory storage backend implementation.
//!
//! [`MemoryBackend`] keeps one partition's data in a [`BTreeMap`] behind a
//! [`parking_lot::RwLock`]. It is the reference backend for tests and for
//! single-process deployments where persistence is not required.
//!
//! # Example
//!
//! ```
//! use identity_directory_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!
//!     let mut txn = backend.transaction().await.unwrap();
//!     txn.set(b"greeting".to_vec(), b"hello".to_vec());
//!     txn.commit().await.unwrap();
//!
//!     let value = backend.get(b"greeting").await.unwrap();
//!     assert_eq!(value.unwrap().as_ref(), b"hello");
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - Commits are serialized by a single write lock

use std::{
    collections::BTreeMap,
    ops::{Bound, RangeBounds},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    transaction::Transaction,
    types::KeyValue,
};

/// In-memory storage backend using [`BTreeMap`].
///
/// # Cloning
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying data store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Bytes>>>,
    commits: Arc<AtomicU64>,
}

impl MemoryBackend {
    /// Creates a new, empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transactions that committed successfully.
    #[must_use]
    pub fn committed_transactions(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Number of keys currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[tracing::instrument(level = "trace", skip_all, fields(key_len = key.len()))]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        Ok(self.data.read().get(key).cloned())
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        let start = match range.start_bound() {
            Bound::Included(b) => Bound::Included(b.as_slice()),
            Bound::Excluded(b) => Bound::Excluded(b.as_slice()),
            Bound::Unbounded => Bound::Unbounded,
        };
        let end = match range.end_bound() {
            Bound::Included(b) => Bound::Included(b.as_slice()),
            Bound::Excluded(b) => Bound::Excluded(b.as_slice()),
            Bound::Unbounded => Bound::Unbounded,
        };

        // BTreeMap::range panics on inverted bounds; an inverted range is empty.
        if is_empty_range(start, end) {
            return Ok(Vec::new());
        }

        let data = self.data.read();
        Ok(data
            .range::<[u8], _>((start, end))
            .map(|(k, v)| KeyValue::new(Bytes::copy_from_slice(k), v.clone()))
            .collect())
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction::new(self.clone())))
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn health_check(&self) -> StorageResult<()> {
        // Acquiring the read lock proves no writer is wedged.
        let _unused = self.data.read();
        Ok(())
    }
}

fn is_empty_range(start: Bound<&[u8]>, end: Bound<&[u8]>) -> bool {
    match (start, end) {
        (Bound::Included(s), Bound::Included(e)) => s > e,
        (
            Bound::Included(s) | Bound::Excluded(s),
            Bound::Included(e) | Bound::Excluded(e),
        ) => s >= e,
        _ => false,
    }
}

/// A precondition to be verified at commit time.
#[derive(Debug, Clone)]
struct Precondition {
    key: Vec<u8>,
    expected: Option<Vec<u8>>,
}

/// In-memory transaction implementation.
///
/// Buffers writes and deletes until commit. Conditional operations record a
/// precondition and also buffer their effect, so later reads in the same
/// transaction observe it.
struct MemoryTransaction {
    backend: MemoryBackend,
    pending_writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    preconditions: Vec<Precondition>,
}

impl MemoryTransaction {
    fn new(backend: MemoryBackend) -> Self {
        Self { backend, pending_writes: BTreeMap::new(), preconditions: Vec::new() }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        if let Some(value) = self.pending_writes.get(key) {
            return Ok(value.as_ref().map(|v| Bytes::copy_from_slice(v)));
        }
        self.backend.get(key).await
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending_writes.insert(key, Some(value));
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.pending_writes.insert(key, None);
    }

    fn compare_and_set(&mut self, key: Vec<u8>, expected: Option<Vec<u8>>, new_value: Vec<u8>) {
        self.preconditions.push(Precondition { key: key.clone(), expected });
        self.pending_writes.insert(key, Some(new_value));
    }

    fn compare_and_delete(&mut self, key: Vec<u8>, expected: Vec<u8>) {
        self.preconditions.push(Precondition { key: key.clone(), expected: Some(expected) });
        self.pending_writes.insert(key, None);
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let mut data = self.backend.data.write();

        for condition in &self.preconditions {
            let current = data.get(&condition.key);
            let holds = match (&condition.expected, current) {
                (None, None) => true,
                (Some(expected), Some(current)) => expected.as_slice() == current.as_ref(),
                _ => false,
            };
            if !holds {
                return Err(StorageError::conflict(String::from_utf8_lossy(&condition.key)));
            }
        }

        for (key, value) in self.pending_writes {
            match value {
                Some(v) => {
                    data.insert(key, Bytes::from(v));
                },
                None => {
                    data.remove(&key);
                },
            }
        }

        self.backend.commits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(preconditions = self.preconditions.len(), "transaction committed");
        Ok(())
    }
}
