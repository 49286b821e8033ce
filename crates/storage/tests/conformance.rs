//! Conformance suite for `MemoryBackend`.
//!
//! One test per check for fine-grained failure reporting, plus `run_all`
//! to catch checks that were added to the suite but not wired up here.

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use identity_directory_storage::{MemoryBackend, conformance, testutil::FailingBackend};

#[tokio::test]
async fn get_returns_none_for_missing_key() {
    conformance::get_returns_none_for_missing_key(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn keys_are_byte_distinct() {
    conformance::keys_are_byte_distinct(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn range_results_are_ordered() {
    conformance::range_results_are_ordered(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn range_exclusive_end() {
    conformance::range_exclusive_end(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn prefix_scan_is_exact() {
    conformance::prefix_scan_is_exact(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn tx_read_your_writes() {
    conformance::tx_read_your_writes(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn tx_commit_applies_all() {
    conformance::tx_commit_applies_all(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn tx_drop_without_commit_is_noop() {
    conformance::tx_drop_without_commit_is_noop(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn tx_cas_conflict_rejects_commit() {
    conformance::tx_cas_conflict_rejects_commit(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn cas_insert_if_absent() {
    conformance::cas_insert_if_absent(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn cas_update_with_matching_value() {
    conformance::cas_update_with_matching_value(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn cas_conditional_delete() {
    conformance::cas_conditional_delete(&MemoryBackend::new()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_insert_if_absent_exactly_one_winner() {
    conformance::concurrent_insert_if_absent_exactly_one_winner(Arc::new(MemoryBackend::new()))
        .await;
}

#[tokio::test]
async fn health_check_succeeds() {
    conformance::health_check_succeeds(&MemoryBackend::new()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_all_memory() {
    conformance::run_all(Arc::new(MemoryBackend::new())).await;
}

/// The fault-injection wrapper is transparent while its switches are off.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_all_failing_backend_disarmed() {
    conformance::run_all(Arc::new(FailingBackend::new(MemoryBackend::new()))).await;
}
