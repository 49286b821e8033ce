//! Email and password checks.
//!
//! The directory holds password hashes but owns no hashing algorithm: a
//! [`PasswordHasher`] supplied by the embedder computes and compares them.

use identity_directory_storage::StorageBackend;
use thiserror::Error;

use crate::{
    error::DirectoryResult,
    model::{ProfileState, Role},
    service::ProfileService,
};

/// Failure reported by a [`PasswordHasher`].
#[derive(Debug, Error)]
#[error("password hashing failed: {0}")]
pub struct HashError(pub String);

/// One-way password hashing, provided by the embedder.
pub trait PasswordHasher: Send + Sync {
    /// Hashes `plaintext` for storage.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if the hasher cannot produce a hash.
    fn hash(&self, plaintext: &str) -> Result<String, HashError>;

    /// Returns `true` if `plaintext` matches the stored `hash`.
    fn verify(&self, plaintext: &str, hash: &str) -> bool;
}

/// Outcome of a credential check.
///
/// An unknown email and a wrong password produce the same [`Invalid`]
/// value, so callers cannot tell which one happened.
///
/// [`Invalid`]: CredentialCheck::Invalid
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialCheck {
    /// The credentials identify a confirmed account.
    Valid {
        /// External id of the account.
        external_id: String,
        /// Role of the account.
        role: Role,
    },
    /// Unknown email, wrong password, or an account that is not confirmed.
    Invalid,
}

impl CredentialCheck {
    /// Returns `true` for [`CredentialCheck::Valid`].
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

/// Checks email and password pairs against the directory.
pub struct CredentialVerifier<'a, B> {
    service: &'a ProfileService<B>,
    hasher: &'a dyn PasswordHasher,
}

impl<'a, B: StorageBackend + 'static> CredentialVerifier<'a, B> {
    /// Creates a verifier over `service` using `hasher` for comparisons.
    pub fn new(service: &'a ProfileService<B>, hasher: &'a dyn PasswordHasher) -> Self {
        Self { service, hasher }
    }

    /// Checks `password` against the account holding `email`.
    ///
    /// # Errors
    ///
    /// Only storage faults from the scatter lookup. An unknown email is
    /// [`CredentialCheck::Invalid`], never an error.
    #[tracing::instrument(skip(self, password))]
    pub async fn check(&self, email: &str, password: &str) -> DirectoryResult<CredentialCheck> {
        let profile = match self.service.get_profile_by_email(email).await {
            Ok(profile) => profile,
            Err(err) if err.is_not_found() => return Ok(CredentialCheck::Invalid),
            Err(err) => return Err(err),
        };
        // Compare regardless of state.
        let matches = self.hasher.verify(password, &profile.password_hash);
        if !matches || profile.state != ProfileState::Confirmed {
            tracing::debug!(state = %profile.state, "credentials rejected");
            return Ok(CredentialCheck::Invalid);
        }
        Ok(CredentialCheck::Valid { external_id: profile.external_id, role: profile.role })
    }
}

impl<B> std::fmt::Debug for CredentialVerifier<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVerifier").finish_non_exhaustive()
    }
}
