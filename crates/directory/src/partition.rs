//! Single-partition profile and token store.
//!
//! A [`PartitionStore`] owns one storage partition. Every mutation runs as
//! one transaction against that partition only: begin, stage reads and
//! conditional writes, commit. Returning early drops the transaction, which
//! discards everything staged.
//!
//! # Uniqueness
//!
//! Email and external id uniqueness are index entries claimed with
//! insert-if-absent preconditions. A commit rejected
//! on an index key is a [`DirectoryError::DuplicateKey`]. A commit rejected
//! on a row key means another writer got there first; the whole cycle is
//! re-run per [`ConflictRetryConfig`].
//!
//! Row preconditions are always staged before index preconditions, so a
//! commit that loses a race on both reports the retryable row conflict.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use identity_directory_storage::{StorageBackend, StorageError, Transaction};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    config::ConflictRetryConfig,
    error::{DirectoryError, DirectoryResult},
    keys,
    model::{
        NewProfile, Profile, ProfileChanges, ProfileId, ProfileState, TokenPurpose, TokenRecord,
    },
    retry::with_conflict_retry,
};

type Txn = Box<dyn Transaction>;

/// Profile and token operations scoped to one storage partition.
pub struct PartitionStore<B> {
    index: usize,
    backend: B,
    retry: ConflictRetryConfig,
}

impl<B: StorageBackend> PartitionStore<B> {
    /// Wraps `backend` as partition number `index`.
    pub fn new(index: usize, backend: B, retry: ConflictRetryConfig) -> Self {
        Self { index, backend, retry }
    }

    /// This partition's index.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    // ------------------------------------------------------------------
    // Profiles
    // ------------------------------------------------------------------

    /// Creates a profile and returns its partition-local id.
    ///
    /// `created_at` and `updated_at` are both set to the same instant.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::DuplicateKey`] if the email is held by a non-deleted
    ///   profile, or the external id already exists in this partition
    /// - [`DirectoryError::InvalidState`] if `new.state` is `DELETED`
    /// - [`DirectoryError::Storage`] on any other persistence fault
    #[tracing::instrument(
        skip(self, new),
        fields(partition = self.index, external_id = %new.external_id)
    )]
    pub async fn create_profile(&self, new: &NewProfile) -> DirectoryResult<ProfileId> {
        if new.state == ProfileState::Deleted {
            return Err(DirectoryError::InvalidState {
                external_id: new.external_id.clone(),
                state: ProfileState::Deleted,
            });
        }
        let id = with_conflict_retry(&self.retry, "create_profile", is_write_conflict, move || {
            self.create_profile_once(new)
        })
        .await?;
        tracing::debug!(profile_id = %id, "profile created");
        Ok(id)
    }

    async fn create_profile_once(&self, new: &NewProfile) -> DirectoryResult<ProfileId> {
        const OP: &str = "create_profile";
        let key = new.external_id.as_str();
        let mut txn = self.begin(OP, key).await?;

        let email_key = keys::email_index(&new.email);
        let external_key = keys::external_index(&new.external_id);
        if txn.get(&email_key).await.map_err(fault(OP, key))?.is_some() {
            return Err(DirectoryError::duplicate("email", &new.email));
        }
        if txn.get(&external_key).await.map_err(fault(OP, key))?.is_some() {
            return Err(DirectoryError::duplicate("external_id", &new.external_id));
        }

        let seq_key = keys::PROFILE_SEQ_KEY.as_bytes().to_vec();
        let current = txn.get(&seq_key).await.map_err(fault(OP, key))?;
        let last = match &current {
            Some(raw) => keys::decode_id(raw).ok_or_else(|| {
                let source = StorageError::serialization("corrupt profile sequence");
                DirectoryError::storage(OP, key, source)
            })?,
            None => ProfileId(0),
        };
        let id = last.0.checked_add(1).map(ProfileId).ok_or_else(|| {
            DirectoryError::storage(OP, key, StorageError::internal("profile sequence exhausted"))
        })?;

        let now = Utc::now();
        let profile = Profile {
            id,
            external_id: new.external_id.clone(),
            login: new.login.clone(),
            email: new.email.clone(),
            password_hash: new.password_hash.clone(),
            role: new.role,
            state: new.state,
            created_at: now,
            updated_at: now,
        };

        txn.compare_and_set(seq_key, current.map(|raw| raw.to_vec()), keys::encode_id(id));
        txn.compare_and_set(keys::profile(id), None, encode(&profile, OP, key)?);
        txn.compare_and_set(email_key, None, keys::encode_id(id));
        txn.compare_and_set(external_key, None, keys::encode_id(id));
        commit(txn, OP, key).await?;
        Ok(id)
    }

    /// Returns the non-deleted profile with `external_id`.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::NotFound`] if absent or deleted.
    #[tracing::instrument(skip(self), fields(partition = self.index))]
    pub async fn get_profile(&self, external_id: &str) -> DirectoryResult<Profile> {
        const OP: &str = "get_profile";
        let raw = self
            .backend
            .get(&keys::external_index(external_id))
            .await
            .map_err(fault(OP, external_id))?;
        let id = raw
            .as_deref()
            .and_then(keys::decode_id)
            .ok_or_else(|| DirectoryError::profile_not_found(external_id))?;
        self.live_profile(id, OP, external_id).await
    }

    /// Returns the non-deleted profile with partition-local `id`.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::NotFound`] if absent or deleted.
    #[tracing::instrument(skip(self), fields(partition = self.index))]
    pub async fn get_profile_by_id(&self, id: ProfileId) -> DirectoryResult<Profile> {
        self.live_profile(id, "get_profile_by_id", &id.to_string()).await
    }

    /// Returns the profile holding `email` in this partition only.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::NotFound`] if no non-deleted profile here holds it.
    #[tracing::instrument(skip(self), fields(partition = self.index))]
    pub async fn get_profile_by_email(&self, email: &str) -> DirectoryResult<Profile> {
        const OP: &str = "get_profile_by_email";
        let raw = self.backend.get(&keys::email_index(email)).await.map_err(fault(OP, email))?;
        let id = raw
            .as_deref()
            .and_then(keys::decode_id)
            .ok_or_else(|| DirectoryError::profile_not_found(email))?;
        self.live_profile(id, OP, email).await
    }

    /// Returns a page of non-deleted profiles in ascending id order.
    #[tracing::instrument(skip(self), fields(partition = self.index))]
    pub async fn list_profiles(
        &self,
        limit: usize,
        offset: usize,
    ) -> DirectoryResult<Vec<Profile>> {
        const OP: &str = "list_profiles";
        let rows = self
            .backend
            .get_prefix(keys::PROFILES_PREFIX.as_bytes())
            .await
            .map_err(fault(OP, keys::PROFILES_PREFIX))?;

        let mut page = Vec::with_capacity(limit.min(rows.len()));
        let mut skipped = 0;
        for row in rows {
            if page.len() == limit {
                break;
            }
            let profile: Profile = decode(&row.value, OP, &row.key_str())?;
            if profile.is_deleted() {
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            page.push(profile);
        }
        Ok(page)
    }

    /// Returns a page of the non-deleted profiles among `ids`, in ascending
    /// id order. Unknown ids are skipped.
    #[tracing::instrument(skip(self, ids), fields(partition = self.index, requested = ids.len()))]
    pub async fn get_profiles_by_ids(
        &self,
        ids: &[ProfileId],
        limit: usize,
        offset: usize,
    ) -> DirectoryResult<Vec<Profile>> {
        const OP: &str = "get_profiles_by_ids";
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut found = Vec::new();
        for id in sorted {
            let key = keys::profile(id);
            let Some(raw) = self.backend.get(&key).await.map_err(fault(OP, &id.to_string()))? else {
                continue;
            };
            let profile: Profile = decode(&raw, OP, &id.to_string())?;
            if !profile.is_deleted() {
                found.push(profile);
            }
        }
        Ok(found.into_iter().skip(offset).take(limit).collect())
    }

    /// Applies `changes` to the profile with `external_id` and returns the
    /// updated profile.
    ///
    /// Only the fields set in `changes` are written; `updated_at` is always
    /// refreshed. An email change moves the email index entry in the same
    /// commit. Setting the state to `DELETED` performs a soft delete.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::NotFound`] if absent or already deleted
    /// - [`DirectoryError::DuplicateKey`] if the new email is taken
    #[tracing::instrument(skip(self, changes), fields(partition = self.index))]
    pub async fn update_profile(
        &self,
        external_id: &str,
        changes: &ProfileChanges,
    ) -> DirectoryResult<Profile> {
        with_conflict_retry(&self.retry, "update_profile", is_write_conflict, move || async move {
            const OP: &str = "update_profile";
            let mut txn = self.begin(OP, external_id).await?;
            let id = resolve_external(txn.as_ref(), external_id, OP).await?;
            let (raw, profile) = load_live(txn.as_ref(), id, OP, external_id).await?;
            let updated =
                stage_profile_update(&mut txn, raw, profile, changes, Utc::now(), OP).await?;
            commit(txn, OP, external_id).await?;
            Ok(updated)
        })
        .await
    }

    /// Soft-deletes the profile with `external_id`.
    ///
    /// The row is kept with state `DELETED` and its email rewritten to
    /// `{email}.deleted.{unix_millis}`, which frees the address for a new
    /// profile.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::NotFound`] if absent or already deleted.
    #[tracing::instrument(skip(self), fields(partition = self.index))]
    pub async fn delete_profile(&self, external_id: &str) -> DirectoryResult<()> {
        let changes = ProfileChanges::builder().state(ProfileState::Deleted).build();
        self.update_profile(external_id, &changes).await?;
        tracing::debug!("profile soft-deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------

    /// Inserts the first token of `purpose` for `profile_id`.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::DuplicateKey`] if the profile already has a token
    ///   of this purpose, or the token value is already in use
    /// - [`DirectoryError::NotFound`] if the profile is absent or deleted
    #[tracing::instrument(skip(self, token), fields(partition = self.index))]
    pub async fn insert_token(
        &self,
        profile_id: ProfileId,
        purpose: TokenPurpose,
        token: &str,
        expire_at: DateTime<Utc>,
    ) -> DirectoryResult<TokenRecord> {
        with_conflict_retry(&self.retry, "insert_token", is_write_conflict, move || {
            self.insert_token_once(profile_id, purpose, token, expire_at)
        })
        .await
    }

    async fn insert_token_once(
        &self,
        profile_id: ProfileId,
        purpose: TokenPurpose,
        token: &str,
        expire_at: DateTime<Utc>,
    ) -> DirectoryResult<TokenRecord> {
        const OP: &str = "insert_token";
        let key = profile_id.to_string();
        let mut txn = self.begin(OP, &key).await?;
        load_live(txn.as_ref(), profile_id, OP, &key).await?;

        let owner_key = keys::token_owner(purpose, profile_id);
        let token_key = keys::token(purpose, token);
        if txn.get(&owner_key).await.map_err(fault(OP, &key))?.is_some() {
            let value = format!("{purpose} token of profile {profile_id}");
            return Err(DirectoryError::duplicate("token", value));
        }
        if txn.get(&token_key).await.map_err(fault(OP, &key))?.is_some() {
            return Err(DirectoryError::duplicate("token", token));
        }

        let now = Utc::now();
        let record = TokenRecord {
            profile_id,
            purpose,
            token: token.to_owned(),
            expire_at,
            created_at: now,
            updated_at: now,
            consumed_at: None,
        };
        txn.compare_and_set(owner_key, None, token.as_bytes().to_vec());
        txn.compare_and_set(token_key, None, encode(&record, OP, &key)?);
        commit(txn, OP, &key).await?;
        Ok(record)
    }

    /// Replaces the value and expiry of the existing token of `purpose` for
    /// `profile_id` and re-arms it if it was consumed. The previous value
    /// stops resolving.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::NotFound`] if the profile has no such token yet.
    #[tracing::instrument(skip(self, token), fields(partition = self.index))]
    pub async fn update_token(
        &self,
        profile_id: ProfileId,
        purpose: TokenPurpose,
        token: &str,
        expire_at: DateTime<Utc>,
    ) -> DirectoryResult<TokenRecord> {
        with_conflict_retry(&self.retry, "update_token", is_write_conflict, move || {
            self.update_token_once(profile_id, purpose, token, expire_at)
        })
        .await
    }

    async fn update_token_once(
        &self,
        profile_id: ProfileId,
        purpose: TokenPurpose,
        token: &str,
        expire_at: DateTime<Utc>,
    ) -> DirectoryResult<TokenRecord> {
        const OP: &str = "update_token";
        let key = profile_id.to_string();
        let mut txn = self.begin(OP, &key).await?;

        let owner_key = keys::token_owner(purpose, profile_id);
        let Some(owner_raw) = txn.get(&owner_key).await.map_err(fault(OP, &key))? else {
            let key = format!("{purpose} token of profile {profile_id}");
            return Err(DirectoryError::token_not_found(key));
        };
        let previous = String::from_utf8_lossy(&owner_raw).into_owned();
        let previous_key = keys::token(purpose, &previous);
        let Some(previous_raw) = txn.get(&previous_key).await.map_err(fault(OP, &key))? else {
            return Err(DirectoryError::storage(
                OP,
                key,
                StorageError::internal("token owner entry points at a missing token row"),
            ));
        };
        let mut record: TokenRecord = decode(&previous_raw, OP, &key)?;

        let now = Utc::now();
        record.token = token.to_owned();
        record.expire_at = expire_at;
        record.updated_at = now;
        record.consumed_at = None;
        let encoded = encode(&record, OP, &key)?;

        txn.compare_and_set(owner_key, Some(owner_raw.to_vec()), token.as_bytes().to_vec());
        if previous == token {
            txn.compare_and_set(previous_key, Some(previous_raw.to_vec()), encoded);
        } else {
            let token_key = keys::token(purpose, token);
            if txn.get(&token_key).await.map_err(fault(OP, &key))?.is_some() {
                return Err(DirectoryError::duplicate("token", token));
            }
            txn.compare_and_delete(previous_key, previous_raw.to_vec());
            txn.compare_and_set(token_key, None, encoded);
        }
        commit(txn, OP, &key).await?;
        Ok(record)
    }

    /// Update-or-insert: refreshes the existing token of `purpose` for
    /// `profile_id`, or inserts one if there is none.
    ///
    /// Two concurrent upserts for the same pair leave exactly one token
    /// row: the insert that loses the race retries and takes the update
    /// path.
    #[tracing::instrument(skip(self, token), fields(partition = self.index))]
    pub async fn upsert_token(
        &self,
        profile_id: ProfileId,
        purpose: TokenPurpose,
        token: &str,
        expire_at: DateTime<Utc>,
    ) -> DirectoryResult<TokenRecord> {
        with_conflict_retry(&self.retry, "upsert_token", is_write_conflict, move || async move {
            match self.update_token_once(profile_id, purpose, token, expire_at).await {
                Err(DirectoryError::NotFound { entity: "token", .. }) => {
                    self.insert_token_once(profile_id, purpose, token, expire_at).await
                },
                other => other,
            }
        })
        .await
    }

    /// Looks a token up by value.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::NotFound`] if no row holds this value.
    #[tracing::instrument(skip(self, token), fields(partition = self.index))]
    pub async fn get_token(
        &self,
        purpose: TokenPurpose,
        token: &str,
    ) -> DirectoryResult<TokenRecord> {
        const OP: &str = "get_token";
        let raw = self
            .backend
            .get(&keys::token(purpose, token))
            .await
            .map_err(fault(OP, purpose.as_str()))?
            .ok_or_else(|| DirectoryError::token_not_found(purpose.as_str()))?;
        decode(&raw, OP, purpose.as_str())
    }

    /// Completes a token's workflow: applies `changes` to the owning profile
    /// and marks the token consumed, in one commit.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::NotFound`] if no row holds this value, or the owner is deleted
    /// - [`DirectoryError::TokenConsumed`] if it was already used
    /// - [`DirectoryError::Expired`] if it is past its expiry
    /// - [`DirectoryError::InvalidState`] if the owner's state does not
    ///   admit the purpose (see [`TokenPurpose::accepts`]); the token stays
    ///   unconsumed
    #[tracing::instrument(skip(self, token, changes), fields(partition = self.index))]
    pub async fn consume_token(
        &self,
        purpose: TokenPurpose,
        token: &str,
        changes: &ProfileChanges,
    ) -> DirectoryResult<Profile> {
        with_conflict_retry(&self.retry, "consume_token", is_write_conflict, move || async move {
            const OP: &str = "consume_token";
            let label = purpose.as_str();
            let mut txn = self.begin(OP, label).await?;

            let token_key = keys::token(purpose, token);
            let Some(token_raw) = txn.get(&token_key).await.map_err(fault(OP, label))? else {
                return Err(DirectoryError::token_not_found(label));
            };
            let mut record: TokenRecord = decode(&token_raw, OP, label)?;

            let now = Utc::now();
            if record.consumed_at.is_some() {
                return Err(DirectoryError::TokenConsumed { token: token.to_owned() });
            }
            if record.is_expired(now) {
                return Err(DirectoryError::Expired { token: token.to_owned() });
            }

            let (profile_raw, profile) =
                load_live(txn.as_ref(), record.profile_id, OP, label).await?;
            if !purpose.accepts(profile.state) {
                return Err(DirectoryError::InvalidState {
                    external_id: profile.external_id,
                    state: profile.state,
                });
            }
            let updated =
                stage_profile_update(&mut txn, profile_raw, profile, changes, now, OP).await?;

            record.consumed_at = Some(now);
            record.updated_at = now;
            txn.compare_and_set(token_key, Some(token_raw.to_vec()), encode(&record, OP, label)?);
            commit(txn, OP, label).await?;
            Ok(updated)
        })
        .await
    }

    /// Checks the partition's backend.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::Storage`] if the backend is unavailable.
    #[tracing::instrument(skip(self), fields(partition = self.index))]
    pub async fn health_check(&self) -> DirectoryResult<()> {
        let label = format!("partition {}", self.index);
        self.backend.health_check().await.map_err(fault("health_check", &label))
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn begin(&self, operation: &'static str, key: &str) -> DirectoryResult<Txn> {
        self.backend.transaction().await.map_err(fault(operation, key))
    }

    async fn live_profile(
        &self,
        id: ProfileId,
        operation: &'static str,
        key: &str,
    ) -> DirectoryResult<Profile> {
        let raw = self
            .backend
            .get(&keys::profile(id))
            .await
            .map_err(fault(operation, key))?
            .ok_or_else(|| DirectoryError::profile_not_found(key))?;
        let profile: Profile = decode(&raw, operation, key)?;
        if profile.is_deleted() {
            return Err(DirectoryError::profile_not_found(key));
        }
        Ok(profile)
    }
}

/// Resolves an external id to the partition-local id inside `txn`.
async fn resolve_external(
    txn: &dyn Transaction,
    external_id: &str,
    operation: &'static str,
) -> DirectoryResult<ProfileId> {
    txn.get(&keys::external_index(external_id))
        .await
        .map_err(fault(operation, external_id))?
        .as_deref()
        .and_then(keys::decode_id)
        .ok_or_else(|| DirectoryError::profile_not_found(external_id))
}

/// Loads a non-deleted profile row inside `txn`, keeping its raw bytes as
/// the precondition for rewriting it.
async fn load_live(
    txn: &dyn Transaction,
    id: ProfileId,
    operation: &'static str,
    key: &str,
) -> DirectoryResult<(Bytes, Profile)> {
    let raw = txn
        .get(&keys::profile(id))
        .await
        .map_err(fault(operation, key))?
        .ok_or_else(|| DirectoryError::profile_not_found(key))?;
    let profile: Profile = decode(&raw, operation, key)?;
    if profile.is_deleted() {
        return Err(DirectoryError::profile_not_found(key));
    }
    Ok((raw, profile))
}

/// Stages a merge-patch of `profile` in `txn`: the row rewrite first, then
/// any email index move.
async fn stage_profile_update(
    txn: &mut Txn,
    raw: Bytes,
    mut profile: Profile,
    changes: &ProfileChanges,
    now: DateTime<Utc>,
    operation: &'static str,
) -> DirectoryResult<Profile> {
    let previous_email = profile.email.clone();
    changes.apply_to(&mut profile, now);
    if profile.is_deleted() {
        profile.email = format!("{}.deleted.{}", profile.email, now.timestamp_millis());
    }

    let email_moved = profile.email != previous_email;
    let claims_new_email = email_moved && !profile.is_deleted();
    let new_email_key = keys::email_index(&profile.email);
    if claims_new_email
        && txn.get(&new_email_key).await.map_err(fault(operation, &profile.external_id))?.is_some()
    {
        return Err(DirectoryError::duplicate("email", &profile.email));
    }

    let id = profile.id;
    let encoded = encode(&profile, operation, &profile.external_id)?;
    txn.compare_and_set(keys::profile(id), Some(raw.to_vec()), encoded);
    if email_moved {
        txn.compare_and_delete(keys::email_index(&previous_email), keys::encode_id(id));
    }
    if claims_new_email {
        txn.compare_and_set(new_email_key, None, keys::encode_id(id));
    }
    Ok(profile)
}

async fn commit(txn: Txn, operation: &'static str, key: &str) -> DirectoryResult<()> {
    txn.commit().await.map_err(|err| classify_commit_error(err, operation, key))
}

/// A rejected precondition on a uniqueness index key is a duplicate; every
/// other failure stays a storage fault.
fn classify_commit_error(err: StorageError, operation: &'static str, key: &str) -> DirectoryError {
    if let Some((field, value)) = err.conflict_key().and_then(keys::unique_field) {
        return DirectoryError::duplicate(field, value);
    }
    DirectoryError::storage(operation, key, err)
}

fn is_write_conflict(err: &DirectoryError) -> bool {
    matches!(err, DirectoryError::Storage { source: StorageError::Conflict { .. }, .. })
}

fn fault(operation: &'static str, key: &str) -> impl FnOnce(StorageError) -> DirectoryError {
    move |source| DirectoryError::storage(operation, key, source)
}

fn encode<T: Serialize>(value: &T, operation: &'static str, key: &str) -> DirectoryResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        let source = StorageError::serialization_with_source("encode row", e);
        DirectoryError::storage(operation, key, source)
    })
}

fn decode<T: DeserializeOwned>(
    raw: &[u8],
    operation: &'static str,
    key: &str,
) -> DirectoryResult<T> {
    serde_json::from_slice(raw).map_err(|e| {
        let source = StorageError::serialization_with_source("decode row", e);
        DirectoryError::storage(operation, key, source)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use identity_directory_storage::MemoryBackend;

    use super::*;
    use crate::model::Role;

    fn store() -> PartitionStore<MemoryBackend> {
        PartitionStore::new(0, MemoryBackend::new(), ConflictRetryConfig::default())
    }

    fn new_profile(external_id: &str, email: &str) -> NewProfile {
        NewProfile::builder()
            .external_id(external_id)
            .login(external_id)
            .email(email)
            .password_hash("hash")
            .build()
    }

    #[tokio::test]
    async fn ids_are_allocated_sequentially() {
        let store = store();
        let a = store.create_profile(&new_profile("a", "a@x.com")).await.unwrap();
        let b = store.create_profile(&new_profile("b", "b@x.com")).await.unwrap();
        assert_eq!((a, b), (ProfileId(1), ProfileId(2)));
    }

    #[tokio::test]
    async fn creating_deleted_profile_is_rejected() {
        let mut new = new_profile("a", "a@x.com");
        new.state = ProfileState::Deleted;
        let err = store().create_profile(&new).await.unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn email_change_moves_index_entry() {
        let store = store();
        store.create_profile(&new_profile("a", "old@x.com")).await.unwrap();
        let changes = ProfileChanges::builder().email("new@x.com").build();
        store.update_profile("a", &changes).await.unwrap();

        assert!(store.get_profile_by_email("old@x.com").await.unwrap_err().is_not_found());
        assert_eq!(store.get_profile_by_email("new@x.com").await.unwrap().external_id, "a");
        // The old address is free again.
        store.create_profile(&new_profile("b", "old@x.com")).await.unwrap();
    }

    #[tokio::test]
    async fn email_change_to_taken_address_is_duplicate() {
        let store = store();
        store.create_profile(&new_profile("a", "a@x.com")).await.unwrap();
        store.create_profile(&new_profile("b", "b@x.com")).await.unwrap();

        let changes = ProfileChanges::builder().email("b@x.com").role(Role::Owner).build();
        let err = store.update_profile("a", &changes).await.unwrap_err();
        assert!(matches!(err, DirectoryError::DuplicateKey { field: "email", .. }));
        assert_eq!(store.get_profile("a").await.unwrap().role, Role::Guest);
    }

    #[tokio::test]
    async fn commit_conflict_on_index_key_is_duplicate() {
        let err = classify_commit_error(StorageError::conflict("idx/email/a@x.com"), "op", "k");
        assert!(matches!(
            err,
            DirectoryError::DuplicateKey { field: "email", ref value } if value == "a@x.com"
        ));

        let row_conflict = StorageError::conflict("profiles/00000000000000000001");
        let err = classify_commit_error(row_conflict, "op", "k");
        assert!(is_write_conflict(&err));
    }

    #[tokio::test]
    async fn token_refresh_invalidates_previous_value() {
        let store = store();
        let id = store.create_profile(&new_profile("a", "a@x.com")).await.unwrap();
        let later = Utc::now() + chrono::Duration::hours(1);

        store.upsert_token(id, TokenPurpose::Registration, "first", later).await.unwrap();
        store.upsert_token(id, TokenPurpose::Registration, "second", later).await.unwrap();

        let first = store.get_token(TokenPurpose::Registration, "first").await;
        assert!(first.unwrap_err().is_not_found());
        let second = store.get_token(TokenPurpose::Registration, "second").await.unwrap();
        assert_eq!(second.profile_id, id);
    }

    #[tokio::test]
    async fn purposes_are_independent() {
        let store = store();
        let id = store.create_profile(&new_profile("a", "a@x.com")).await.unwrap();
        let later = Utc::now() + chrono::Duration::hours(1);

        store.insert_token(id, TokenPurpose::Registration, "reg", later).await.unwrap();
        store.insert_token(id, TokenPurpose::RestorePassword, "restore", later).await.unwrap();
        let crossed = store.get_token(TokenPurpose::Registration, "restore").await;
        assert!(crossed.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn token_for_missing_profile_is_not_found() {
        let later = Utc::now() + chrono::Duration::hours(1);
        let err = store()
            .insert_token(ProfileId(9), TokenPurpose::Registration, "t", later)
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound { entity: "profile", .. }));
    }

    #[tokio::test]
    async fn exhausted_sequence_is_an_error_not_a_wrap() {
        let store = store();
        let seq = keys::PROFILE_SEQ_KEY.as_bytes().to_vec();
        identity_directory_storage::testutil::seed(
            store.backend(),
            [(seq, keys::encode_id(ProfileId(i64::MAX)))],
        )
        .await;

        let err = store.create_profile(&new_profile("a", "a@x.com")).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Storage { .. }), "{err:?}");
        assert!(store.get_profile("a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn registration_consume_requires_new_profile() {
        let store = store();
        let id = store.create_profile(&new_profile("a", "a@x.com")).await.unwrap();
        let later = Utc::now() + chrono::Duration::hours(1);
        store.insert_token(id, TokenPurpose::Registration, "reg", later).await.unwrap();
        let blocked = ProfileChanges::builder().state(ProfileState::Blocked).build();
        store.update_profile("a", &blocked).await.unwrap();

        let confirm = ProfileChanges::builder().state(ProfileState::Confirmed).build();
        let err =
            store.consume_token(TokenPurpose::Registration, "reg", &confirm).await.unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidState { state: ProfileState::Blocked, .. }));

        let record = store.get_token(TokenPurpose::Registration, "reg").await.unwrap();
        assert_eq!(record.consumed_at, None);
        assert_eq!(store.get_profile("a").await.unwrap().state, ProfileState::Blocked);
    }
}
