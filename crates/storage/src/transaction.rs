//! Transaction trait for atomic multi-key operations.
//!
//! A transaction buffers writes until [`commit`](Transaction::commit).
//! Reads inside the transaction observe its own buffered writes
//! (read-your-writes). Compare-and-set preconditions are evaluated against
//! committed state at commit time, under the backend's write lock, so a
//! commit either applies every buffered operation or none of them.
//!
//! Dropping a transaction without committing discards every buffered
//! operation. There is no explicit rollback call: an early `?` return is the
//! rollback.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// A buffered, all-or-nothing unit of work against a single backend.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Reads a key, observing writes buffered in this transaction first.
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Buffers an unconditional write.
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>);

    /// Buffers a delete. Deleting an absent key is a no-op.
    fn delete(&mut self, key: Vec<u8>);

    /// Buffers a conditional write.
    ///
    /// `expected == None` means "the key must be absent" (insert-if-absent).
    /// The condition is checked at commit time; a mismatch fails the whole
    /// commit with [`StorageError::Conflict`](crate::StorageError::Conflict)
    /// naming this key.
    fn compare_and_set(&mut self, key: Vec<u8>, expected: Option<Vec<u8>>, new_value: Vec<u8>);

    /// Buffers a conditional delete: the key must currently hold `expected`.
    fn compare_and_delete(&mut self, key: Vec<u8>, expected: Vec<u8>);

    /// Atomically applies every buffered operation.
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}
