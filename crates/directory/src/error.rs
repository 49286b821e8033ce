//! Directory error types.
//!
//! [`DirectoryError`] is what every profile, token, and workflow operation
//! returns. Storage faults keep their [`StorageError`] as the `#[source]`
//! together with the operation and key that hit them.

use identity_directory_storage::StorageError;
use thiserror::Error;

use crate::model::ProfileState;

/// Result type alias for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Errors returned by directory operations.
///
/// # Non-exhaustive
///
/// New variants may be added without a semver-breaking change. Downstream
/// match expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DirectoryError {
    /// No matching non-deleted row.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Kind of record that was looked up (`"profile"`, `"token"`).
        entity: &'static str,
        /// The lookup key.
        key: String,
    },

    /// A uniqueness constraint was violated.
    #[error("duplicate {field}: {value}")]
    DuplicateKey {
        /// The unique field (`"email"`, `"external_id"`, `"token"`).
        field: &'static str,
        /// The colliding value.
        value: String,
    },

    /// The token exists but its expiry is in the past.
    #[error("token expired")]
    Expired {
        /// The expired token.
        token: String,
    },

    /// The token was already used to complete its workflow.
    #[error("token already consumed")]
    TokenConsumed {
        /// The consumed token.
        token: String,
    },

    /// An explicitly requested partition index is out of range.
    #[error("partition index {index} out of range (partition count {count})")]
    InvalidShard {
        /// The requested index.
        index: usize,
        /// The configured partition count.
        count: usize,
    },

    /// The profile's state does not allow the requested operation.
    #[error("profile {external_id} is {state}")]
    InvalidState {
        /// The profile's external identity key.
        external_id: String,
        /// The state that blocked the operation.
        state: ProfileState,
    },

    /// Any other persistence fault.
    #[error("storage failure during {operation} on {key}")]
    Storage {
        /// The directory operation that failed.
        operation: &'static str,
        /// The key the operation was working on.
        key: String,
        /// The underlying storage error.
        #[source]
        source: StorageError,
    },

    /// The password hashing collaborator failed.
    #[error("password hashing failed: {0}")]
    Hashing(String),

    /// The notification collaborator failed to deliver a link.
    #[error("notification failed: {0}")]
    Notification(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DirectoryError {
    /// Creates a `NotFound` error for a profile.
    #[must_use]
    pub fn profile_not_found(key: impl Into<String>) -> Self {
        Self::NotFound { entity: "profile", key: key.into() }
    }

    /// Creates a `NotFound` error for a token.
    #[must_use]
    pub fn token_not_found(key: impl Into<String>) -> Self {
        Self::NotFound { entity: "token", key: key.into() }
    }

    /// Creates a `DuplicateKey` error.
    #[must_use]
    pub fn duplicate(field: &'static str, value: impl Into<String>) -> Self {
        Self::DuplicateKey { field, value: value.into() }
    }

    /// Wraps a storage fault with the operation and key it occurred on.
    #[must_use]
    pub fn storage(operation: &'static str, key: impl Into<String>, source: StorageError) -> Self {
        Self::Storage { operation, key: key.into(), source }
    }

    /// Returns `true` for `NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` for `DuplicateKey`.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }

    /// Returns `true` if a storage fault underneath may clear on its own
    /// (connection drop or timeout).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage { source, .. } if source.is_transient())
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn storage_errors_keep_context_and_source() {
        let err = DirectoryError::storage(
            "create_profile",
            "user-1",
            StorageError::connection("partition unreachable"),
        );
        assert_eq!(err.to_string(), "storage failure during create_profile on user-1");
        let source = err.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("Connection error: partition unreachable"));
    }

    #[test]
    fn expired_and_consumed_do_not_echo_the_token() {
        let token = "c2VjcmV0".to_owned();
        assert!(!DirectoryError::Expired { token: token.clone() }.to_string().contains(&token));
        let consumed = DirectoryError::TokenConsumed { token: token.clone() };
        assert!(!consumed.to_string().contains(&token));
    }

    #[test]
    fn classification_helpers() {
        assert!(DirectoryError::profile_not_found("x").is_not_found());
        assert!(DirectoryError::token_not_found("x").is_not_found());
        assert!(DirectoryError::duplicate("email", "a@x.com").is_duplicate());
        assert!(!DirectoryError::Hashing("x".into()).is_not_found());
    }

    #[test]
    fn transient_follows_the_storage_source() {
        assert!(DirectoryError::storage("get", "k", StorageError::timeout()).is_transient());
        let dropped = StorageError::connection("reset");
        assert!(DirectoryError::storage("get", "k", dropped).is_transient());
        assert!(!DirectoryError::storage("get", "k", StorageError::conflict("k")).is_transient());
        assert!(!DirectoryError::profile_not_found("x").is_transient());
    }
}
