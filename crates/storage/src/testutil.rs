//! Shared test utilities for storage backend testing.
//!
//! Feature-gated behind `testutil` so it never leaks into production builds.
//!
//! ```toml
//! [dev-dependencies]
//! identity-directory-storage = { path = "../storage", features = ["testutil"] }
//! ```

use std::{
    ops::RangeBounds,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    StorageBackend,
    error::{StorageError, StorageResult},
    memory::MemoryBackend,
    transaction::Transaction,
    types::KeyValue,
};

/// Create a deterministic test key from a prefix and index.
///
/// Produces keys like `"prefix:000042"`; the zero-padding keeps
/// lexicographic order equal to numeric order.
#[must_use]
pub fn make_key(prefix: &str, idx: usize) -> Vec<u8> {
    format!("{prefix}:{idx:06}").into_bytes()
}

/// Create a test value of the given size filled with `0xAB` bytes.
#[must_use]
pub fn make_value(size: usize) -> Vec<u8> {
    vec![0xAB; size]
}

/// Commit `pairs` to `backend` in a single transaction.
///
/// # Panics
///
/// Panics if the commit fails.
pub async fn seed<B, I>(backend: &B, pairs: I)
where
    B: StorageBackend + ?Sized,
    I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
{
    let mut txn = backend.transaction().await.expect("seed transaction");
    for (key, value) in pairs {
        txn.set(key, value);
    }
    txn.commit().await.expect("seed commit");
}

/// Create a [`MemoryBackend`] pre-populated with `count` keys.
///
/// # Panics
///
/// Panics if seeding fails (should not happen with `MemoryBackend`).
pub async fn populated_backend(prefix: &str, count: usize, value_size: usize) -> MemoryBackend {
    let backend = MemoryBackend::new();
    let value = make_value(value_size);
    seed(&backend, (0..count).map(|i| (make_key(prefix, i), value.clone()))).await;
    backend
}

/// Assert that a [`StorageResult`] is a [`StorageError::Conflict`].
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Conflict { .. })),
            "expected StorageError::Conflict, got: {:?}",
            $result,
        );
    };
    ($result:expr, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Conflict { .. })),
            "{}: expected StorageError::Conflict, got: {:?}",
            $msg,
            $result,
        );
    };
}

/// Assert that a [`StorageResult`] is `Ok`, returning the inner value.
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Returns `true` if `result` is a `Conflict` error.
pub fn is_conflict<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::Conflict { .. }))
}

#[derive(Debug, Default)]
struct FaultSwitches {
    reads: AtomicBool,
    commits: AtomicBool,
    timeouts: AtomicBool,
    injected: AtomicUsize,
}

impl FaultSwitches {
    fn trip(&self, switch: &AtomicBool, what: &str) -> StorageResult<()> {
        if switch.load(Ordering::SeqCst) {
            self.injected.fetch_add(1, Ordering::SeqCst);
            if self.timeouts.load(Ordering::SeqCst) {
                return Err(StorageError::timeout());
            }
            return Err(StorageError::connection(format!("injected {what} failure")));
        }
        Ok(())
    }
}

/// Wraps a backend and injects [`StorageError::Connection`] faults on demand,
/// or [`StorageError::Timeout`] once [`inject_timeouts`](Self::inject_timeouts)
/// is on.
///
/// Reads (`get`, range scans, transactional reads, health checks) and
/// commits can be failed independently. Clones share the same switches, so
/// a test can keep one handle while the code under test owns another.
#[derive(Clone)]
pub struct FailingBackend<B> {
    inner: B,
    switches: Arc<FaultSwitches>,
}

impl<B: StorageBackend> FailingBackend<B> {
    /// Wraps `inner` with every fault switched off.
    pub fn new(inner: B) -> Self {
        Self { inner, switches: Arc::default() }
    }

    /// Returns the wrapped backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Turns read fault injection on or off.
    pub fn fail_reads(&self, enabled: bool) {
        self.switches.reads.store(enabled, Ordering::SeqCst);
    }

    /// Turns commit fault injection on or off.
    pub fn fail_commits(&self, enabled: bool) {
        self.switches.commits.store(enabled, Ordering::SeqCst);
    }

    /// Makes injected faults surface as timeouts instead of connection drops.
    pub fn inject_timeouts(&self, enabled: bool) {
        self.switches.timeouts.store(enabled, Ordering::SeqCst);
    }

    /// Number of operations that were failed so far.
    #[must_use]
    pub fn injected_failures(&self) -> usize {
        self.switches.injected.load(Ordering::SeqCst)
    }
}

struct FailingTransaction {
    inner: Box<dyn Transaction>,
    switches: Arc<FaultSwitches>,
}

#[async_trait]
impl Transaction for FailingTransaction {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.switches.trip(&self.switches.reads, "read")?;
        self.inner.get(key).await
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.inner.set(key, value);
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.inner.delete(key);
    }

    fn compare_and_set(&mut self, key: Vec<u8>, expected: Option<Vec<u8>>, new_value: Vec<u8>) {
        self.inner.compare_and_set(key, expected, new_value);
    }

    fn compare_and_delete(&mut self, key: Vec<u8>, expected: Vec<u8>) {
        self.inner.compare_and_delete(key, expected);
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.switches.trip(&self.switches.commits, "commit")?;
        self.inner.commit().await
    }
}

#[async_trait]
impl<B: StorageBackend> StorageBackend for FailingBackend<B> {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.switches.trip(&self.switches.reads, "read")?;
        self.inner.get(key).await
    }

    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        self.switches.trip(&self.switches.reads, "read")?;
        self.inner.get_range(range).await
    }

    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        let inner = self.inner.transaction().await?;
        Ok(Box::new(FailingTransaction { inner, switches: Arc::clone(&self.switches) }))
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.switches.trip(&self.switches.reads, "health check")?;
        self.inner.health_check().await
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn make_key_is_zero_padded() {
        assert_eq!(make_key("p", 42), b"p:000042".to_vec());
        assert!(make_key("p", 9) < make_key("p", 10));
    }

    #[tokio::test]
    async fn populated_backend_has_requested_keys() {
        let backend = populated_backend("k", 5, 3).await;
        assert_eq!(backend.len(), 5);
        let value = backend.get(&make_key("k", 4)).await.expect("get");
        assert_eq!(value.as_deref(), Some(&[0xAB, 0xAB, 0xAB][..]));
    }

    #[tokio::test]
    async fn failing_backend_switches_are_independent() {
        let backend = FailingBackend::new(populated_backend("k", 1, 1).await);

        backend.fail_commits(true);
        assert!(backend.get(&make_key("k", 0)).await.expect("reads still work").is_some());
        let mut txn = backend.transaction().await.expect("begin");
        txn.set(b"new".to_vec(), b"v".to_vec());
        assert!(matches!(txn.commit().await, Err(StorageError::Connection { .. })));
        assert_eq!(backend.inner().get(b"new").await.expect("get"), None);

        backend.fail_commits(false);
        backend.fail_reads(true);
        assert!(matches!(backend.health_check().await, Err(StorageError::Connection { .. })));
        assert_eq!(backend.injected_failures(), 2);
    }
}
