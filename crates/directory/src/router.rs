//! Shard routing.
//!
//! A profile lives in exactly one partition, chosen from its external id
//! when the profile is created. The choice must never change, so the hash
//! is CRC-32 (IEEE): a fixed, published function whose output does not
//! depend on process seeds or toolchain versions.

use crate::error::{DirectoryError, DirectoryResult};

/// Maps identity keys to partition indexes in `[0, partition_count)`.
///
/// Changing the partition count of an existing deployment misroutes every
/// stored record; growing the cluster needs an out-of-band migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRouter {
    partition_count: usize,
}

impl ShardRouter {
    /// Creates a router over `partition_count` partitions.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Config`] if `partition_count` is zero.
    pub fn new(partition_count: usize) -> DirectoryResult<Self> {
        if partition_count == 0 {
            return Err(DirectoryError::Config("partition_count must be at least 1".into()));
        }
        Ok(Self { partition_count })
    }

    /// Number of partitions.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    /// Returns the partition that owns `key`.
    #[must_use]
    pub fn route(&self, key: &str) -> usize {
        let hash = crc32fast::hash(key.as_bytes());
        // u32 always fits in usize on supported targets.
        hash as usize % self.partition_count
    }

    /// Checks an explicitly requested partition index.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::InvalidShard`] if `index` is out of range.
    pub fn check_index(&self, index: usize) -> DirectoryResult<usize> {
        if index >= self.partition_count {
            return Err(DirectoryError::InvalidShard { index, count: self.partition_count });
        }
        Ok(index)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn zero_partitions_rejected() {
        assert!(matches!(ShardRouter::new(0), Err(DirectoryError::Config(_))));
    }

    #[test]
    fn placement_is_pinned() {
        // CRC-32/IEEE("123456789") is the published check value 0xCBF43926.
        let router = ShardRouter::new(1_000).unwrap();
        assert_eq!(router.route("123456789"), 0xCBF4_3926_usize % 1_000);
        assert_eq!(ShardRouter::new(1).unwrap().route("anything"), 0);
    }

    #[test]
    fn check_index_bounds() {
        let router = ShardRouter::new(4).unwrap();
        assert_eq!(router.check_index(3).unwrap(), 3);
        assert!(matches!(
            router.check_index(4),
            Err(DirectoryError::InvalidShard { index: 4, count: 4 })
        ));
    }

    #[test]
    fn uuid_keys_spread_across_partitions() {
        let router = ShardRouter::new(8).unwrap();
        let mut counts = [0usize; 8];
        for _ in 0..8_000 {
            counts[router.route(&uuid::Uuid::new_v4().to_string())] += 1;
        }
        // Expected 1000 each; a hot or starved partition would fall far outside this band.
        for (index, count) in counts.iter().enumerate() {
            assert!((700..=1300).contains(count), "partition {index} got {count} of 8000 keys");
        }
    }

    proptest! {
        #[test]
        fn route_is_stable_and_in_range(key in ".{0,64}", count in 1usize..64) {
            let router = ShardRouter::new(count).unwrap();
            let first = router.route(&key);
            prop_assert!(first < count);
            prop_assert_eq!(first, router.route(&key));
            prop_assert_eq!(first, ShardRouter::new(count).unwrap().route(&key));
        }
    }
}
