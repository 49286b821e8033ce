//! Storage error types and result alias.
//!
//! Every partition backend maps its internal failures onto [`StorageError`].
//! The directory layer above classifies these further: a
//! [`StorageError::Conflict`] on a uniqueness index key becomes a duplicate-key
//! condition, a conflict on any other key is retried.
//!
//! # Example
//!
//! ```
//! use identity_directory_storage::{StorageError, StorageResult};
//!
//! fn claim(key: &str) -> StorageResult<()> {
//!     Err(StorageError::conflict(key))
//! }
//!
//! let err = claim("idx/email/a@x.com").unwrap_err();
//! assert_eq!(err.conflict_key(), Some("idx/email/a@x.com"));
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Errors preserve their source chain via `#[source]`.
///
/// # Non-exhaustive
///
/// New variants may be added without a semver-breaking change. Downstream
/// match expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// A compare-and-set precondition did not hold at commit time.
    ///
    /// Carries the contended key so callers can tell a uniqueness violation
    /// apart from an ordinary write-write race.
    #[error("Transaction conflict on key: {key}")]
    Conflict {
        /// The key whose precondition failed.
        key: String,
    },

    /// Connection or network error.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Serialization or deserialization error.
    ///
    /// Typically indicates data corruption or schema incompatibility.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// Internal storage backend error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },

    /// The backend did not answer within its own deadline. The operation may
    /// or may not have been applied.
    #[error("Operation timeout")]
    Timeout,
}

impl StorageError {
    /// Creates a new `Conflict` error for the given key.
    #[must_use]
    pub fn conflict(key: impl Into<String>) -> Self {
        Self::Conflict { key: key.into() }
    }

    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Returns the contended key if this is a `Conflict`.
    #[must_use]
    pub fn conflict_key(&self) -> Option<&str> {
        match self {
            Self::Conflict { key } => Some(key),
            _ => None,
        }
    }

    /// Returns `true` for failures that may succeed when the same operation
    /// is issued again (connection drops and timeouts). Conflicts are
    /// classified by the caller.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn conflict_carries_key() {
        let err = StorageError::conflict("idx/email/a@x.com");
        assert_eq!(err.conflict_key(), Some("idx/email/a@x.com"));
        assert_eq!(err.to_string(), "Transaction conflict on key: idx/email/a@x.com");
        assert_eq!(StorageError::internal("boom").conflict_key(), None);
        assert_eq!(StorageError::timeout().conflict_key(), None);
    }

    #[test]
    fn transient_classification() {
        assert!(StorageError::connection("reset").is_transient());
        assert!(StorageError::timeout().is_transient());
        assert!(!StorageError::conflict("k").is_transient());
        assert!(!StorageError::serialization("bad row").is_transient());
        assert!(!StorageError::internal("boom").is_transient());
    }

    #[test]
    fn source_chain_is_preserved() {
        let io = std::io::Error::other("disk gone");
        let err = StorageError::internal_with_source("write failed", io);
        let source = err.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("disk gone"));
    }
}
