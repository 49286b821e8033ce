//! Conformance test suite for [`StorageBackend`] implementations.
//!
//! Async check functions that validate a backend against the trait
//! contract the directory layer relies on. Every partition backend should
//! pass the whole suite.
//!
//! # Usage
//!
//! ```no_run
//! use identity_directory_storage::{MemoryBackend, conformance};
//!
//! #[tokio::test]
//! async fn tx_read_your_writes() {
//!     conformance::tx_read_your_writes(&MemoryBackend::new()).await;
//! }
//! ```
//!
//! | Category | Contract aspect |
//! |----------|-----------------|
//! | Reads | `get` on absent keys, byte-distinct keys |
//! | Range | ordering, bounds, prefix scans |
//! | Transaction | read-your-writes, all-or-nothing commit, rollback on drop |
//! | CAS | insert-if-absent, matching and mismatched preconditions |
//! | Concurrent | exactly one winner for contended insert-if-absent |

use std::sync::Arc;

use bytes::Bytes;

use crate::{backend::StorageBackend, error::StorageError};

async fn put<B: StorageBackend>(backend: &B, key: &[u8], value: &[u8]) {
    let mut tx = backend.transaction().await.expect("transaction");
    tx.set(key.to_vec(), value.to_vec());
    tx.commit().await.expect("commit");
}

// ============================================================================
// Reads
// ============================================================================

/// `get` on a nonexistent key returns `Ok(None)`.
pub async fn get_returns_none_for_missing_key<B: StorageBackend>(backend: &B) {
    let result = backend.get(b"nonexistent").await;
    assert!(result.is_ok(), "get should not error on missing key: {result:?}");
    assert_eq!(result.expect("checked above"), None, "missing key should return None");
}

/// Keys are byte-level distinct: `"key"` and `"key\x00"` are different.
pub async fn keys_are_byte_distinct<B: StorageBackend>(backend: &B) {
    put(backend, b"key", b"a").await;
    put(backend, b"key\x00", b"b").await;
    assert_eq!(backend.get(b"key").await.expect("get key"), Some(Bytes::from("a")));
    assert_eq!(backend.get(b"key\x00").await.expect("get key+null"), Some(Bytes::from("b")));
}

// ============================================================================
// Range
// ============================================================================

/// `get_range` returns results in key order.
pub async fn range_results_are_ordered<B: StorageBackend>(backend: &B) {
    for key in [b"r:c", b"r:a", b"r:b"] {
        put(backend, key, b"v").await;
    }
    let results = backend.get_range(b"r:".to_vec()..b"r:~".to_vec()).await.expect("get_range");
    let keys: Vec<&[u8]> = results.iter().map(|kv| kv.key.as_ref()).collect();
    assert_eq!(keys, vec![b"r:a".as_slice(), b"r:b", b"r:c"], "range results must be sorted");
}

/// `get_range` excludes the end bound of a half-open range.
pub async fn range_exclusive_end<B: StorageBackend>(backend: &B) {
    for key in [b"x:1", b"x:2", b"x:3"] {
        put(backend, key, b"v").await;
    }
    let results = backend.get_range(b"x:1".to_vec()..b"x:3".to_vec()).await.expect("get_range");
    assert_eq!(results.len(), 2, "exclusive end must not include x:3");
}

/// `get_prefix` returns exactly the keys sharing the prefix.
pub async fn prefix_scan_is_exact<B: StorageBackend>(backend: &B) {
    for key in [&b"p/a"[..], b"p/b", b"p0", b"q/a", b"p"] {
        put(backend, key, b"v").await;
    }
    let results = backend.get_prefix(b"p/").await.expect("get_prefix");
    let keys: Vec<&[u8]> = results.iter().map(|kv| kv.key.as_ref()).collect();
    assert_eq!(keys, vec![b"p/a".as_slice(), b"p/b"]);
}

// ============================================================================
// Transaction
// ============================================================================

/// Buffered writes are visible inside the transaction before commit.
pub async fn tx_read_your_writes<B: StorageBackend>(backend: &B) {
    let mut tx = backend.transaction().await.expect("transaction");
    tx.set(b"tx:ryw".to_vec(), b"mine".to_vec());
    let val = tx.get(b"tx:ryw").await.expect("get in tx");
    assert_eq!(val, Some(Bytes::from("mine")));
}

/// Commit applies every buffered write and delete.
pub async fn tx_commit_applies_all<B: StorageBackend>(backend: &B) {
    put(backend, b"tx:gone", b"v").await;
    let mut tx = backend.transaction().await.expect("transaction");
    tx.set(b"tx:a".to_vec(), b"1".to_vec());
    tx.set(b"tx:b".to_vec(), b"2".to_vec());
    tx.delete(b"tx:gone".to_vec());
    tx.commit().await.expect("commit");

    assert_eq!(backend.get(b"tx:a").await.expect("get"), Some(Bytes::from("1")));
    assert_eq!(backend.get(b"tx:b").await.expect("get"), Some(Bytes::from("2")));
    assert_eq!(backend.get(b"tx:gone").await.expect("get"), None);
}

/// Dropping a transaction without committing discards its writes.
pub async fn tx_drop_without_commit_is_noop<B: StorageBackend>(backend: &B) {
    {
        let mut tx = backend.transaction().await.expect("transaction");
        tx.set(b"tx:dropped".to_vec(), b"never".to_vec());
    }
    let val = backend.get(b"tx:dropped").await.expect("get");
    assert_eq!(val, None, "uncommitted transaction writes must not be visible");
}

/// A failed precondition rejects the whole commit, including unconditional writes.
pub async fn tx_cas_conflict_rejects_commit<B: StorageBackend>(backend: &B) {
    put(backend, b"tx:cas", b"v1").await;

    let mut tx = backend.transaction().await.expect("transaction");
    tx.set(b"tx:side".to_vec(), b"effect".to_vec());
    tx.compare_and_set(b"tx:cas".to_vec(), Some(b"v1".to_vec()), b"v2".to_vec());

    // A concurrent writer changes the value before commit.
    put(backend, b"tx:cas", b"v_concurrent").await;

    let result = tx.commit().await;
    match result {
        Err(StorageError::Conflict { key }) => assert_eq!(key, "tx:cas"),
        other => panic!("expected Conflict on tx:cas, got {other:?}"),
    }
    assert_eq!(backend.get(b"tx:cas").await.expect("get"), Some(Bytes::from("v_concurrent")));
    assert_eq!(backend.get(b"tx:side").await.expect("get"), None);
}

// ============================================================================
// CAS
// ============================================================================

/// `expected: None` succeeds on an absent key and fails on a present one.
pub async fn cas_insert_if_absent<B: StorageBackend>(backend: &B) {
    let mut tx = backend.transaction().await.expect("transaction");
    tx.compare_and_set(b"cas:new".to_vec(), None, b"created".to_vec());
    tx.commit().await.expect("insert-if-absent on absent key");
    assert_eq!(backend.get(b"cas:new").await.expect("get"), Some(Bytes::from("created")));

    let mut tx = backend.transaction().await.expect("transaction");
    tx.compare_and_set(b"cas:new".to_vec(), None, b"again".to_vec());
    let result = tx.commit().await;
    assert!(
        matches!(result, Err(StorageError::Conflict { .. })),
        "insert-if-absent on existing key should conflict, got {result:?}"
    );
}

/// A matching expected value lets the write through.
pub async fn cas_update_with_matching_value<B: StorageBackend>(backend: &B) {
    put(backend, b"cas:upd", b"v1").await;
    let mut tx = backend.transaction().await.expect("transaction");
    tx.compare_and_set(b"cas:upd".to_vec(), Some(b"v1".to_vec()), b"v2".to_vec());
    tx.commit().await.expect("CAS with matching value should succeed");
    assert_eq!(backend.get(b"cas:upd").await.expect("get"), Some(Bytes::from("v2")));
}

/// A conditional delete removes the key only when the value still matches.
pub async fn cas_conditional_delete<B: StorageBackend>(backend: &B) {
    put(backend, b"cas:del", b"owner-1").await;

    let mut tx = backend.transaction().await.expect("transaction");
    tx.compare_and_delete(b"cas:del".to_vec(), b"owner-2".to_vec());
    assert!(matches!(tx.commit().await, Err(StorageError::Conflict { .. })));

    let mut tx = backend.transaction().await.expect("transaction");
    tx.compare_and_delete(b"cas:del".to_vec(), b"owner-1".to_vec());
    tx.commit().await.expect("matching conditional delete");
    assert_eq!(backend.get(b"cas:del").await.expect("get"), None);
}

// ============================================================================
// Concurrent access
// ============================================================================

/// Concurrent insert-if-absent on one key: exactly one writer wins.
pub async fn concurrent_insert_if_absent_exactly_one_winner<B: StorageBackend + 'static>(
    backend: Arc<B>,
) {
    let mut handles = Vec::new();
    for i in 0u32..10 {
        let backend = Arc::clone(&backend);
        handles.push(tokio::spawn(async move {
            let mut tx = backend.transaction().await?;
            tx.compare_and_set(b"ccas:k".to_vec(), None, format!("writer-{i}").into_bytes());
            tx.commit().await
        }));
    }

    let mut successes = 0u32;
    let mut conflicts = 0u32;
    for handle in handles {
        match handle.await.expect("task join") {
            Ok(()) => successes += 1,
            Err(StorageError::Conflict { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }

    assert_eq!(successes, 1, "exactly one insert should win");
    assert_eq!(conflicts, 9, "remaining writers should get Conflict");
}

/// `health_check` succeeds on a fresh backend.
pub async fn health_check_succeeds<B: StorageBackend>(backend: &B) {
    backend.health_check().await.expect("fresh backend should be healthy");
}

/// Run the full conformance suite against the given backend.
///
/// Every check uses its own key namespace, so one backend instance can run
/// the whole suite.
pub async fn run_all<B: StorageBackend + 'static>(backend: Arc<B>) {
    get_returns_none_for_missing_key(backend.as_ref()).await;
    keys_are_byte_distinct(backend.as_ref()).await;

    range_results_are_ordered(backend.as_ref()).await;
    range_exclusive_end(backend.as_ref()).await;
    prefix_scan_is_exact(backend.as_ref()).await;

    tx_read_your_writes(backend.as_ref()).await;
    tx_commit_applies_all(backend.as_ref()).await;
    tx_drop_without_commit_is_noop(backend.as_ref()).await;
    tx_cas_conflict_rejects_commit(backend.as_ref()).await;

    cas_insert_if_absent(backend.as_ref()).await;
    cas_update_with_matching_value(backend.as_ref()).await;
    cas_conditional_delete(backend.as_ref()).await;

    concurrent_insert_if_absent_exactly_one_winner(Arc::clone(&backend)).await;

    health_check_succeeds(backend.as_ref()).await;
}
