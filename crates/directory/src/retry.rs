//! Retry loop for write-write conflicts inside one partition.

use std::{future::Future, time::Duration};

use rand::Rng;

use crate::{config::ConflictRetryConfig, error::DirectoryError};

/// Re-runs a full read-modify-write cycle while it fails with a retryable
/// conflict.
///
/// `is_retryable` decides which errors qualify; anything else is returned
/// immediately. After `config.max_retries` retries the last error is
/// returned as is.
pub(crate) async fn with_conflict_retry<T, F, Fut>(
    config: &ConflictRetryConfig,
    operation_name: &'static str,
    is_retryable: impl Fn(&DirectoryError) -> bool,
    mut operation: F,
) -> Result<T, DirectoryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DirectoryError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Err(err) if attempt < config.max_retries && is_retryable(&err) => {
                let delay = jittered(config.base_delay);
                attempt += 1;
                tracing::debug!(
                    operation = operation_name,
                    attempt,
                    max_attempts = config.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "write conflict, retrying after jitter",
                );
                tokio::time::sleep(delay).await;
            },
            result => return result,
        }
    }
}

fn jittered(base: Duration) -> Duration {
    let range = base.as_millis() as u64;
    if range == 0 {
        return base;
    }
    base + Duration::from_millis(rand::rng().random_range(0..=range))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use identity_directory_storage::StorageError;

    use super::*;

    fn conflict() -> DirectoryError {
        DirectoryError::storage("test", "row", StorageError::conflict("row"))
    }

    fn is_conflict(err: &DirectoryError) -> bool {
        matches!(err, DirectoryError::Storage { source: StorageError::Conflict { .. }, .. })
    }

    fn config(max_retries: u32) -> ConflictRetryConfig {
        ConflictRetryConfig::builder()
            .max_retries(max_retries)
            .base_delay(Duration::from_millis(1))
            .build()
    }

    #[tokio::test]
    async fn succeeds_after_conflicts() {
        let calls = AtomicU32::new(0);
        let result = with_conflict_retry(&config(3), "test", is_conflict, || {
            let attempt = calls.fetch_add(1, Ordering::Relaxed);
            async move { if attempt < 2 { Err(conflict()) } else { Ok(attempt) } }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn exhausted_returns_last_conflict() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_conflict_retry(&config(2), "test", is_conflict, || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err(conflict()) }
        })
        .await;
        assert!(is_conflict(&result.unwrap_err()));
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn other_errors_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_conflict_retry(&config(5), "test", is_conflict, || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err(DirectoryError::duplicate("email", "a@x.com")) }
        })
        .await;
        assert!(result.unwrap_err().is_duplicate());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn jitter_stays_within_one_base_delay() {
        let base = Duration::from_millis(4);
        for _ in 0..100 {
            let delay = jittered(base);
            assert!(delay >= base && delay <= base * 2);
        }
        assert_eq!(jittered(Duration::ZERO), Duration::ZERO);
    }
}
