//! Partition storage engine for the identity directory.
//!
//! Each storage partition ("shard") of the directory is one
//! [`StorageBackend`]: an ordered byte key-value store whose writes go
//! through buffered, all-or-nothing [`Transaction`]s with commit-time
//! compare-and-set preconditions. Nothing in this crate knows about
//! profiles or tokens; the directory crate lays its rows and uniqueness
//! indexes out on top of these primitives.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              identity-directory              │
//! │  ProfileService ── PartitionStore (one/shard)│
//! ├──────────────────────────────────────────────┤
//! │          identity-directory-storage          │
//! │   StorageBackend  ·  Transaction  ·  errors  │
//! ├──────────────────────────────────────────────┤
//! │                MemoryBackend                 │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use identity_directory_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::new();
//!
//!     let mut txn = backend.transaction().await?;
//!     txn.compare_and_set(b"idx/email/a@x.com".to_vec(), None, b"1".to_vec());
//!     txn.commit().await?;
//!
//!     assert!(backend.get(b"idx/email/a@x.com").await?.is_some());
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]

pub mod backend;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod conformance;
pub mod error;
pub mod memory;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
pub mod transaction;
pub mod types;

pub use backend::StorageBackend;
pub use error::{BoxError, StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use transaction::Transaction;
pub use types::KeyValue;
