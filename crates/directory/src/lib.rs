//! Sharded profile store and identity lifecycle core.
//!
//! Profiles live in a fixed number of independent storage partitions. The
//! [`ShardRouter`] maps a profile's external id to its partition, and every
//! write is a transaction against exactly one partition. On top of that sit
//! soft delete, merge-patch updates, scatter lookup by email, and the
//! registration and restore-password token workflows.
//!
//! ```text
//! Directory ─┬─ ProfileService ─┬─ ShardRouter
//!            │                  ├─ PartitionStore 0 ── StorageBackend
//!            │                  ├─ PartitionStore 1 ── StorageBackend
//!            │                  └─ ...
//!            ├─ PasswordHasher
//!            └─ Notifier
//! ```
//!
//! # Quick Start
//!
//! ```
//! use identity_directory::{NewProfile, ProfileService};
//! use identity_directory_storage::MemoryBackend;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let partitions = vec![MemoryBackend::new(), MemoryBackend::new()];
//!     let service = ProfileService::with_defaults(partitions)?;
//!
//!     let new = NewProfile::builder()
//!         .external_id("7c1e")
//!         .login("alice")
//!         .email("alice@example.com")
//!         .password_hash("$argon2id$...")
//!         .build();
//!     service.create_profile(&new).await?;
//!
//!     let found = service.get_profile_by_email("alice@example.com").await?;
//!     assert_eq!(found.external_id, "7c1e");
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod credentials;
pub mod directory;
pub mod error;
mod keys;
pub mod model;
pub mod partition;
mod retry;
pub mod router;
pub mod service;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
pub mod tokens;

pub use config::{ConflictRetryConfig, DirectoryConfig, ScatterMode};
pub use credentials::{CredentialCheck, CredentialVerifier, HashError, PasswordHasher};
pub use directory::{Directory, Notifier, NotifyError, SignUp, SignUpReceipt};
pub use error::{DirectoryError, DirectoryResult};
pub use model::{
    NewProfile, Profile, ProfileChanges, ProfileId, ProfileState, Role, TokenPurpose, TokenRecord,
    TokenStatus, VerifiedToken,
};
pub use partition::PartitionStore;
pub use router::ShardRouter;
pub use service::{Located, ProfileService};
pub use tokens::{TokenLifecycle, generate_token, owner_of};
