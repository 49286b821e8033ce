//! Storage backend trait definition.
//!
//! [`StorageBackend`] is the contract one storage partition fulfils. It is a
//! minimal ordered key-value interface:
//! - **Keys and values are bytes**: no assumptions about serialization format
//! - **Ordered**: range and prefix scans return keys in byte order
//! - **Transactional writes**: every mutation goes through a [`Transaction`]
//!
//! Domain logic (profiles, tokens, uniqueness indexes) lives in the
//! directory crate built on top of this trait, not in the backends.
//!
//! # Implementing a Backend
//!
//! 1. Implement [`StorageBackend`]
//! 2. Implement a corresponding [`Transaction`] type
//! 3. Map backend-specific errors to [`StorageError`](crate::StorageError)
//! 4. Run the [`conformance`](crate::conformance) suite against it
//!
//! See [`MemoryBackend`](crate::MemoryBackend) for a reference implementation.

use std::ops::{Bound, RangeBounds};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    error::StorageResult,
    transaction::Transaction,
    types::{KeyValue, prefix_end},
};

/// Abstract storage backend for a single partition.
///
/// Implementations must be safe for concurrent use by many in-flight
/// operations.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves the committed value for `key`, or `None` if absent.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Returns every committed key-value pair within `range`, ordered by key.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send;

    /// Returns every committed key-value pair whose key starts with `prefix`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<KeyValue>> {
        let start = Bound::Included(prefix.to_vec());
        let end = match prefix_end(prefix) {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        self.get_range((start, end)).await
    }

    /// Begins a new transaction.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>>;

    /// Verifies the backend can serve requests.
    #[must_use = "health check results indicate backend availability and must be inspected"]
    async fn health_check(&self) -> StorageResult<()>;
}
