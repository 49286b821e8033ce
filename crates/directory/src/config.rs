//! Directory configuration.
//!
//! [`DirectoryConfig`] is built once at process start, either through its
//! validating builder or by deserializing (durations in humantime format,
//! e.g. `"24h"`), and is immutable afterwards. Loading it from files or the
//! environment is the embedding process's concern.
//!
//! ```
//! use std::time::Duration;
//!
//! use identity_directory::{DirectoryConfig, ScatterMode};
//!
//! let config = DirectoryConfig::builder()
//!     .partition_count(4)
//!     .token_ttl(Duration::from_secs(3600))
//!     .scatter_mode(ScatterMode::Concurrent)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.partition_count(), 4);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DirectoryError, DirectoryResult};

/// Default lifetime of registration and restore-password tokens.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// How a lookup by a non-sharding key visits the partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScatterMode {
    /// One partition at a time in index order, stopping at the first match.
    #[default]
    Sequential,
    /// All partitions at once; the first match wins and the rest are aborted.
    Concurrent,
}

/// Retry policy for write-write conflicts inside one partition.
///
/// Only conflicts on row keys are retried. Conflicts on uniqueness index
/// keys are reported as duplicates immediately.
#[derive(Debug, Clone, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConflictRetryConfig {
    /// Retries after the first attempt. Zero disables retrying.
    #[serde(default = "default_max_retries")]
    #[builder(default = default_max_retries())]
    pub max_retries: u32,

    /// Base delay between attempts; up to the same amount again is added as jitter.
    #[serde(with = "humantime_serde", default = "default_base_delay")]
    #[builder(default = default_base_delay())]
    pub base_delay: Duration,
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay() -> Duration {
    Duration::from_millis(2)
}

impl Default for ConflictRetryConfig {
    fn default() -> Self {
        Self { max_retries: default_max_retries(), base_delay: default_base_delay() }
    }
}

/// Top-level directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectoryConfig {
    partition_count: usize,
    #[serde(with = "humantime_serde", default = "default_token_ttl")]
    token_ttl: Duration,
    #[serde(default)]
    scatter_mode: ScatterMode,
    #[serde(default)]
    conflict_retry: ConflictRetryConfig,
}

fn default_token_ttl() -> Duration {
    DEFAULT_TOKEN_TTL
}

#[bon::bon]
impl DirectoryConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// # Optional Fields
    ///
    /// * `token_ttl` - Token lifetime (default: 24 hours).
    /// * `scatter_mode` - Scatter strategy (default: sequential).
    /// * `conflict_retry` - Write-conflict retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Config`] if `partition_count` is zero or
    /// `token_ttl` is zero.
    #[builder]
    pub fn new(
        partition_count: usize,
        #[builder(default = DEFAULT_TOKEN_TTL)] token_ttl: Duration,
        #[builder(default)] scatter_mode: ScatterMode,
        #[builder(default)] conflict_retry: ConflictRetryConfig,
    ) -> DirectoryResult<Self> {
        let config = Self { partition_count, token_ttl, scatter_mode, conflict_retry };
        config.validate()?;
        Ok(config)
    }

    /// Re-checks the invariants the builder enforces. Call after deserializing.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Config`] describing the first violation.
    pub fn validate(&self) -> DirectoryResult<()> {
        if self.partition_count == 0 {
            return Err(DirectoryError::Config("partition_count must be at least 1".into()));
        }
        if self.token_ttl.is_zero() {
            return Err(DirectoryError::Config("token_ttl must be positive".into()));
        }
        Ok(())
    }

    /// Number of storage partitions. Fixed for the life of the data.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    /// Lifetime of newly issued tokens.
    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    /// Scatter strategy for lookups by email.
    #[must_use]
    pub fn scatter_mode(&self) -> ScatterMode {
        self.scatter_mode
    }

    /// Write-conflict retry policy.
    #[must_use]
    pub fn conflict_retry(&self) -> &ConflictRetryConfig {
        &self.conflict_retry
    }
}
