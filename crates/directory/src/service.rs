//! Routing and scatter across partitions.
//!
//! [`ProfileService`] owns one [`PartitionStore`] per partition. Operations
//! keyed by external id go to the single partition the [`ShardRouter`]
//! picks. Lookups by email, which is not the sharding key, visit every
//! partition according to the configured [`ScatterMode`].

use std::sync::Arc;

use identity_directory_storage::StorageBackend;
use tokio::task::JoinSet;

use crate::{
    config::{DirectoryConfig, ScatterMode},
    error::{DirectoryError, DirectoryResult},
    model::{NewProfile, Profile, ProfileChanges, ProfileId},
    partition::PartitionStore,
    router::ShardRouter,
    tokens::TokenLifecycle,
};

/// A profile found by a scatter lookup, with the partition that holds it.
#[derive(Debug, Clone)]
pub struct Located {
    /// Index of the owning partition.
    pub partition: usize,
    /// The profile.
    pub profile: Profile,
}

/// Profile operations across all partitions.
pub struct ProfileService<B> {
    router: ShardRouter,
    partitions: Vec<Arc<PartitionStore<B>>>,
    scatter_mode: ScatterMode,
    token_ttl: std::time::Duration,
}

impl<B: StorageBackend + 'static> ProfileService<B> {
    /// Builds the service over `backends`, one per partition, in index order.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::Config`] if the number of backends differs from
    /// `config.partition_count()`.
    pub fn new(config: &DirectoryConfig, backends: Vec<B>) -> DirectoryResult<Self> {
        config.validate()?;
        if backends.len() != config.partition_count() {
            return Err(DirectoryError::Config(format!(
                "partition_count is {} but {} backends were supplied",
                config.partition_count(),
                backends.len()
            )));
        }
        let router = ShardRouter::new(config.partition_count())?;
        let partitions = backends
            .into_iter()
            .enumerate()
            .map(|(index, backend)| {
                Arc::new(PartitionStore::new(index, backend, config.conflict_retry().clone()))
            })
            .collect();
        Ok(Self {
            router,
            partitions,
            scatter_mode: config.scatter_mode(),
            token_ttl: config.token_ttl(),
        })
    }

    /// Builds a service with default settings, one partition per backend.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::Config`] if `backends` is empty.
    pub fn with_defaults(backends: Vec<B>) -> DirectoryResult<Self> {
        let config = DirectoryConfig::builder().partition_count(backends.len()).build()?;
        Self::new(&config, backends)
    }

    /// Number of partitions.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.router.partition_count()
    }

    /// The partition that owns `external_id`.
    #[must_use]
    pub fn partition_for(&self, external_id: &str) -> usize {
        self.router.route(external_id)
    }

    /// The store for an explicitly chosen partition.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::InvalidShard`] if `index` is out of range.
    pub fn partition(&self, index: usize) -> DirectoryResult<&PartitionStore<B>> {
        let index = self.router.check_index(index)?;
        Ok(self.partitions[index].as_ref())
    }

    /// Token issuance and verification on top of this service.
    #[must_use]
    pub fn tokens(&self) -> TokenLifecycle<'_, B> {
        TokenLifecycle::new(self, self.token_ttl)
    }

    pub(crate) fn owning_partition(&self, external_id: &str) -> &PartitionStore<B> {
        let index = self.router.route(external_id);
        tracing::debug!(external_id, partition = index, "routed");
        self.partitions[index].as_ref()
    }

    /// Creates a profile in the partition owning `new.external_id` and
    /// returns its partition-local id.
    ///
    /// Email uniqueness is enforced per partition; callers that need it
    /// across the directory check with
    /// [`get_profile_by_email`](Self::get_profile_by_email) first, as the
    /// sign-up workflow does.
    ///
    /// # Errors
    ///
    /// See [`PartitionStore::create_profile`].
    pub async fn create_profile(&self, new: &NewProfile) -> DirectoryResult<ProfileId> {
        self.owning_partition(&new.external_id).create_profile(new).await
    }

    /// Returns the non-deleted profile with `external_id`.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::NotFound`] if absent or deleted.
    pub async fn get_profile(&self, external_id: &str) -> DirectoryResult<Profile> {
        self.owning_partition(external_id).get_profile(external_id).await
    }

    /// Merge-patches the profile with `external_id`.
    ///
    /// # Errors
    ///
    /// See [`PartitionStore::update_profile`].
    pub async fn update_profile(
        &self,
        external_id: &str,
        changes: &ProfileChanges,
    ) -> DirectoryResult<Profile> {
        self.owning_partition(external_id).update_profile(external_id, changes).await
    }

    /// Soft-deletes the profile with `external_id`.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::NotFound`] if absent or already deleted.
    pub async fn delete_profile(&self, external_id: &str) -> DirectoryResult<()> {
        self.owning_partition(external_id).delete_profile(external_id).await
    }

    /// Returns a page of non-deleted profiles from one partition.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::InvalidShard`] if `partition` is out of range.
    pub async fn list_profiles(
        &self,
        offset: usize,
        limit: usize,
        partition: usize,
    ) -> DirectoryResult<Vec<Profile>> {
        self.partition(partition)?.list_profiles(limit, offset).await
    }

    /// Returns a page of non-deleted profiles among `ids` in one partition.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::InvalidShard`] if `partition` is out of range.
    pub async fn get_profiles_by_ids(
        &self,
        partition: usize,
        ids: &[ProfileId],
        limit: usize,
        offset: usize,
    ) -> DirectoryResult<Vec<Profile>> {
        self.partition(partition)?.get_profiles_by_ids(ids, limit, offset).await
    }

    /// Finds the profile holding `email` in any partition.
    ///
    /// # Errors
    ///
    /// - [`DirectoryError::NotFound`] if no partition holds it
    /// - the first non-`NotFound` fault seen before a match
    pub async fn get_profile_by_email(&self, email: &str) -> DirectoryResult<Profile> {
        self.locate_by_email(email).await.map(|located| located.profile)
    }

    /// Like [`get_profile_by_email`](Self::get_profile_by_email), also
    /// reporting which partition answered.
    ///
    /// # Errors
    ///
    /// See [`get_profile_by_email`](Self::get_profile_by_email).
    #[tracing::instrument(skip(self), fields(mode = ?self.scatter_mode))]
    pub async fn locate_by_email(&self, email: &str) -> DirectoryResult<Located> {
        match self.scatter_mode {
            ScatterMode::Sequential => self.scatter_sequential(email).await,
            ScatterMode::Concurrent => self.scatter_concurrent(email).await,
        }
    }

    async fn scatter_sequential(&self, email: &str) -> DirectoryResult<Located> {
        for store in &self.partitions {
            match store.get_profile_by_email(email).await {
                Ok(profile) => return Ok(Located { partition: store.index(), profile }),
                Err(err) if err.is_not_found() => {},
                Err(err) => {
                    tracing::warn!(
                        partition = store.index(),
                        transient = err.is_transient(),
                        error = %err,
                        "scatter lookup failed"
                    );
                    return Err(err);
                },
            }
        }
        Err(DirectoryError::profile_not_found(email))
    }

    async fn scatter_concurrent(&self, email: &str) -> DirectoryResult<Located> {
        let mut tasks = JoinSet::new();
        for store in &self.partitions {
            let store = Arc::clone(store);
            let email = email.to_owned();
            tasks.spawn(async move {
                let result = store.get_profile_by_email(&email).await;
                (store.index(), result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (partition, result) = joined.map_err(|e| {
                DirectoryError::storage(
                    "get_profile_by_email",
                    email,
                    identity_directory_storage::StorageError::internal_with_source(
                        "scatter task failed",
                        e,
                    ),
                )
            })?;
            match result {
                Ok(profile) => {
                    tasks.abort_all();
                    while let Some(rest) = tasks.join_next().await {
                        if let Ok((other, Ok(_))) = rest {
                            tracing::warn!(
                                partition,
                                other,
                                "email held by more than one partition"
                            );
                        }
                    }
                    return Ok(Located { partition, profile });
                },
                Err(err) if err.is_not_found() => {},
                Err(err) => {
                    tracing::warn!(
                        partition,
                        transient = err.is_transient(),
                        error = %err,
                        "scatter lookup failed"
                    );
                    tasks.abort_all();
                    return Err(err);
                },
            }
        }
        Err(DirectoryError::profile_not_found(email))
    }

    /// Checks every partition; the first failure wins.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::Storage`] from the first unhealthy partition.
    pub async fn health_check(&self) -> DirectoryResult<()> {
        for store in &self.partitions {
            store.health_check().await?;
        }
        Ok(())
    }
}

impl<B> std::fmt::Debug for ProfileService<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileService")
            .field("partition_count", &self.router.partition_count())
            .field("scatter_mode", &self.scatter_mode)
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}
