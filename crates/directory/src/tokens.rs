//! Token lifecycle: issue, refresh, verify, consume.
//!
//! A token value is the URL-safe base64 encoding of
//! `{external_id}:{random suffix}`. The transport layer only ever sees the
//! bare token, and decoding the prefix is enough to route the lookup to the
//! owning partition, so token lookup stays single-partition like every
//! other keyed operation.

use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use identity_directory_storage::StorageBackend;
use uuid::Uuid;

use crate::{
    error::{DirectoryError, DirectoryResult},
    model::{Profile, ProfileChanges, TokenPurpose, TokenRecord, VerifiedToken},
    service::ProfileService,
};

/// Generates a fresh token owned by `external_id`.
#[must_use]
pub fn generate_token(external_id: &str) -> String {
    let raw = format!("{external_id}:{}", Uuid::new_v4().simple());
    URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

/// Recovers the owning external id from a token, or `None` if the value was
/// not produced by [`generate_token`].
#[must_use]
pub fn owner_of(token: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(token).ok()?;
    let raw = String::from_utf8(bytes).ok()?;
    let (owner, suffix) = raw.rsplit_once(':')?;
    if owner.is_empty() || suffix.is_empty() {
        return None;
    }
    Some(owner.to_owned())
}

/// Token operations over a [`ProfileService`]. Obtained from
/// [`ProfileService::tokens`].
#[derive(Debug)]
pub struct TokenLifecycle<'a, B> {
    service: &'a ProfileService<B>,
    ttl: Duration,
}

impl<'a, B: StorageBackend + 'static> TokenLifecycle<'a, B> {
    pub(crate) fn new(service: &'a ProfileService<B>, ttl: Duration) -> Self {
        Self { service, ttl }
    }

    /// Lifetime given to newly issued or refreshed tokens.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issues the first token of `purpose` for the profile.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::NotFound`] if the profile is absent or deleted
    /// - [`DirectoryError::DuplicateKey`] if it already holds a token of this
    ///   purpose; use [`upsert`](Self::upsert) to refresh
    #[tracing::instrument(skip(self))]
    pub async fn issue(
        &self,
        external_id: &str,
        purpose: TokenPurpose,
    ) -> DirectoryResult<TokenRecord> {
        let store = self.service.owning_partition(external_id);
        let profile = store.get_profile(external_id).await?;
        let token = generate_token(external_id);
        store.insert_token(profile.id, purpose, &token, self.expiry(Utc::now())?).await
    }

    /// Issues or refreshes the token of `purpose` for the profile. Afterwards
    /// the profile has exactly one token of this purpose, with a new value
    /// and expiry; any previous value stops resolving.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::NotFound`] if the profile is absent or deleted.
    #[tracing::instrument(skip(self))]
    pub async fn upsert(
        &self,
        external_id: &str,
        purpose: TokenPurpose,
    ) -> DirectoryResult<TokenRecord> {
        let store = self.service.owning_partition(external_id);
        let profile = store.get_profile(external_id).await?;
        let token = generate_token(external_id);
        store.upsert_token(profile.id, purpose, &token, self.expiry(Utc::now())?).await
    }

    /// Looks `token` up and reports its status together with the owning
    /// profile. Expired and consumed tokens are returned, not rejected;
    /// check [`VerifiedToken::is_usable`].
    ///
    /// # Errors
    ///
    /// [`DirectoryError::NotFound`] if no row holds this value or its owner
    /// is deleted.
    #[tracing::instrument(skip(self, token))]
    pub async fn verify(
        &self,
        purpose: TokenPurpose,
        token: &str,
    ) -> DirectoryResult<VerifiedToken> {
        let external_id =
            owner_of(token).ok_or_else(|| DirectoryError::token_not_found(purpose.as_str()))?;
        let store = self.service.owning_partition(&external_id);
        let record = store.get_token(purpose, token).await?;
        let profile = store.get_profile_by_id(record.profile_id).await?;
        let status = record.status(Utc::now());
        Ok(VerifiedToken { record, profile, status })
    }

    /// Completes the token's workflow by applying `changes` to the owning
    /// profile. The token is rejected from then on until refreshed.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::NotFound`] if no row holds this value
    /// - [`DirectoryError::TokenConsumed`] if it was already used
    /// - [`DirectoryError::Expired`] if it is past its expiry
    /// - [`DirectoryError::InvalidState`] if the owner's state does not admit
    ///   `purpose`
    #[tracing::instrument(skip(self, token, changes))]
    pub async fn consume(
        &self,
        purpose: TokenPurpose,
        token: &str,
        changes: &ProfileChanges,
    ) -> DirectoryResult<Profile> {
        let external_id =
            owner_of(token).ok_or_else(|| DirectoryError::token_not_found(purpose.as_str()))?;
        self.service.owning_partition(&external_id).consume_token(purpose, token, changes).await
    }

    fn expiry(&self, now: DateTime<Utc>) -> DirectoryResult<DateTime<Utc>> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                DirectoryError::Config(format!("token_ttl {:?} is out of range", self.ttl))
            })
    }
}
