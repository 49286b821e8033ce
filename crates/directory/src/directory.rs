//! Account workflows: sign-up, confirmation, password restore, login checks.
//!
//! [`Directory`] is the context request handlers receive. It is built once
//! at process start from a [`ProfileService`] and the two collaborators it
//! calls out to, a [`PasswordHasher`] and a [`Notifier`], and passed
//! explicitly; there is no global instance.

use std::sync::Arc;

use async_trait::async_trait;
use identity_directory_storage::StorageBackend;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::{
    credentials::{CredentialCheck, CredentialVerifier, PasswordHasher},
    error::{DirectoryError, DirectoryResult},
    model::{NewProfile, Profile, ProfileChanges, ProfileId, ProfileState, Role, TokenPurpose},
    service::ProfileService,
};

/// Failure reported by a [`Notifier`].
#[derive(Debug, Error)]
#[error("{0}")]
pub struct NotifyError(pub String);

/// Delivers workflow links to account holders, provided by the embedder.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends the registration confirmation link carrying `token`.
    async fn registration_link(&self, email: &str, token: &str) -> Result<(), NotifyError>;

    /// Sends the password restore link carrying `token`.
    async fn restore_password_link(&self, email: &str, token: &str) -> Result<(), NotifyError>;
}

/// Input for [`Directory::sign_up`].
#[derive(bon::Builder)]
pub struct SignUp {
    /// Globally unique identity key chosen by the caller.
    #[builder(into)]
    pub external_id: String,
    /// Login name.
    #[builder(into)]
    pub login: String,
    /// Email address.
    #[builder(into)]
    pub email: String,
    /// Plaintext password; hashed before anything is stored.
    #[builder(with = |password: impl Into<String>| Zeroizing::new(password.into()))]
    pub password: Zeroizing<String>,
    /// Role of the new account.
    #[builder(default)]
    pub role: Role,
}

impl std::fmt::Debug for SignUp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignUp")
            .field("external_id", &self.external_id)
            .field("login", &self.login)
            .field("email", &self.email)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Result of a successful sign-up.
#[derive(Debug, Clone)]
pub struct SignUpReceipt {
    /// Partition-local id of the new profile.
    pub profile_id: ProfileId,
    /// Partition holding the profile.
    pub partition: usize,
    /// Registration token sent to the account holder.
    pub token: String,
}

/// Workflow context shared by request handlers.
pub struct Directory<B> {
    profiles: Arc<ProfileService<B>>,
    hasher: Arc<dyn PasswordHasher>,
    notifier: Arc<dyn Notifier>,
}

impl<B> Clone for Directory<B> {
    fn clone(&self) -> Self {
        Self {
            profiles: Arc::clone(&self.profiles),
            hasher: Arc::clone(&self.hasher),
            notifier: Arc::clone(&self.notifier),
        }
    }
}

impl<B> std::fmt::Debug for Directory<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory").field("profiles", &self.profiles).finish_non_exhaustive()
    }
}

impl<B: StorageBackend + 'static> Directory<B> {
    /// Assembles the context.
    pub fn new(
        profiles: Arc<ProfileService<B>>,
        hasher: Arc<dyn PasswordHasher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { profiles, hasher, notifier }
    }

    /// The underlying profile service.
    #[must_use]
    pub fn profiles(&self) -> &ProfileService<B> {
        &self.profiles
    }

    /// Registers a new account in state NEW and sends its confirmation link.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::DuplicateKey`] if the email is held by any
    ///   partition, or the external id is taken
    /// - [`DirectoryError::Hashing`] if the password cannot be hashed
    /// - [`DirectoryError::Notification`] if the link cannot be delivered;
    ///   the account and token are already stored
    #[tracing::instrument(skip(self, request), fields(external_id = %request.external_id))]
    pub async fn sign_up(&self, request: SignUp) -> DirectoryResult<SignUpReceipt> {
        let existing = self.profiles.get_profile_by_email(&request.email).await;
        match existing {
            Ok(_) => return Err(DirectoryError::duplicate("email", request.email)),
            Err(err) if err.is_not_found() => {},
            Err(err) => return Err(err),
        }

        let hash = self
            .hasher
            .hash(&request.password)
            .map_err(|e| DirectoryError::Hashing(e.0))?;
        let new = NewProfile::builder()
            .external_id(request.external_id)
            .login(request.login)
            .email(request.email)
            .password_hash(hash)
            .role(request.role)
            .build();
        let profile_id = self.profiles.create_profile(&new).await?;
        let partition = self.profiles.partition_for(&new.external_id);

        let record =
            self.profiles.tokens().issue(&new.external_id, TokenPurpose::Registration).await?;
        tracing::info!(partition, profile_id = %profile_id, "profile signed up");

        self.notifier
            .registration_link(&new.email, &record.token)
            .await
            .map_err(|e| DirectoryError::Notification(e.to_string()))?;
        Ok(SignUpReceipt { profile_id, partition, token: record.token })
    }

    /// Confirms the account owning a registration token.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::NotFound`] for an unknown token
    /// - [`DirectoryError::Expired`] or [`DirectoryError::TokenConsumed`] if
    ///   the token can no longer be used
    /// - [`DirectoryError::InvalidState`] if the account is no longer `NEW`
    #[tracing::instrument(skip_all)]
    pub async fn confirm_registration(&self, token: &str) -> DirectoryResult<Profile> {
        let changes = ProfileChanges::builder().state(ProfileState::Confirmed).build();
        let profile =
            self.profiles.tokens().consume(TokenPurpose::Registration, token, &changes).await?;
        tracing::info!(external_id = %profile.external_id, "profile confirmed");
        Ok(profile)
    }

    /// Issues a fresh registration token for an unconfirmed account and
    /// resends the link. Earlier links stop working.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::NotFound`] if no account holds `email`
    /// - [`DirectoryError::InvalidState`] if it is already confirmed or blocked
    #[tracing::instrument(skip(self))]
    pub async fn resend_confirmation(&self, email: &str) -> DirectoryResult<()> {
        let profile = self.profiles.get_profile_by_email(email).await?;
        if matches!(profile.state, ProfileState::Confirmed | ProfileState::Blocked) {
            return Err(DirectoryError::InvalidState {
                external_id: profile.external_id,
                state: profile.state,
            });
        }
        let record =
            self.profiles.tokens().upsert(&profile.external_id, TokenPurpose::Registration).await?;
        self.notifier
            .registration_link(&profile.email, &record.token)
            .await
            .map_err(|e| DirectoryError::Notification(e.to_string()))
    }

    /// Issues a restore-password token and sends the link.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::NotFound`] if no account holds `email`
    /// - [`DirectoryError::InvalidState`] if the account is blocked
    #[tracing::instrument(skip(self))]
    pub async fn start_password_restore(&self, email: &str) -> DirectoryResult<()> {
        let profile = self.profiles.get_profile_by_email(email).await?;
        if profile.state == ProfileState::Blocked {
            return Err(DirectoryError::InvalidState {
                external_id: profile.external_id,
                state: profile.state,
            });
        }
        let record = self
            .profiles
            .tokens()
            .upsert(&profile.external_id, TokenPurpose::RestorePassword)
            .await?;
        self.notifier
            .restore_password_link(&profile.email, &record.token)
            .await
            .map_err(|e| DirectoryError::Notification(e.to_string()))
    }

    /// Replaces the password of the account owning a restore token.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::NotFound`] for an unknown token
    /// - [`DirectoryError::Expired`] or [`DirectoryError::TokenConsumed`] if
    ///   the token can no longer be used
    /// - [`DirectoryError::InvalidState`] if the account is blocked
    /// - [`DirectoryError::Hashing`] if the password cannot be hashed
    #[tracing::instrument(skip_all)]
    pub async fn finish_password_restore(
        &self,
        token: &str,
        new_password: &str,
    ) -> DirectoryResult<Profile> {
        let hash = self.hasher.hash(new_password).map_err(|e| DirectoryError::Hashing(e.0))?;
        let changes = ProfileChanges::builder().password_hash(hash).build();
        let profile =
            self.profiles.tokens().consume(TokenPurpose::RestorePassword, token, &changes).await?;
        tracing::info!(external_id = %profile.external_id, "password restored");
        Ok(profile)
    }

    /// Checks an email and password pair. See [`CredentialVerifier::check`].
    ///
    /// # Errors
    ///
    /// Only storage faults.
    pub async fn check_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> DirectoryResult<CredentialCheck> {
        CredentialVerifier::new(&self.profiles, self.hasher.as_ref()).check(email, password).await
    }
}
