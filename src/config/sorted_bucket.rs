//! Capacity and density configuration shared by the sorted containers.

use super::{parse_env_bool, parse_env_var, Config};
use crate::containers::sorted::bucket_density;
use crate::error::{Result, SortedBucketError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Minimum bucket density used unless a configuration overrides it
pub const DEFAULT_MIN_DENSITY: usize = 500;

/// Capacity hint used by range construction and the default configuration
pub const DEFAULT_EXPECTED_CAPACITY: usize = 25_000;

/// Slots reserved beyond `2 * density` when a contiguous bucket is created
pub const BUCKET_RESERVE_SLACK: usize = 4;

/// Largest accepted bucket density; keeps `2 * density + BUCKET_RESERVE_SLACK` in range
pub const MAX_DENSITY: usize = 1 << 30;

/// Upper bound on the slots reserved up front for one contiguous bucket
pub const MAX_BUCKET_RESERVE: usize = 1 << 16;

/// Upper bound on the tree nodes reserved up front for a capacity hint
pub const MAX_NODE_RESERVE: usize = 1 << 20;

/// Configuration for the sorted multiset engines.
///
/// The bucket engines derive their density as
/// `max(min_density, floor(sqrt(expected_capacity)))`, capped at
/// [`MAX_DENSITY`]; the tree engine uses `expected_capacity` to reserve node
/// storage. The capacity is a hint: any value is accepted and reservations are
/// bounded by [`MAX_NODE_RESERVE`] and [`MAX_BUCKET_RESERVE`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SortedBucketConfig {
    /// Expected number of stored elements
    pub expected_capacity: usize,
    /// Lower bound for the derived bucket density
    pub min_density: usize,
    /// Reserve `2 * density + 4` slots (at most [`MAX_BUCKET_RESERVE`]) for every new contiguous bucket
    pub preallocate_buckets: bool,
}

impl Default for SortedBucketConfig {
    fn default() -> Self {
        Self {
            expected_capacity: DEFAULT_EXPECTED_CAPACITY,
            min_density: DEFAULT_MIN_DENSITY,
            preallocate_buckets: true,
        }
    }
}

impl SortedBucketConfig {
    /// Configuration for an expected number of elements with default density floor
    pub fn with_capacity(expected_capacity: usize) -> Self {
        Self {
            expected_capacity,
            ..Self::default()
        }
    }

    /// Set the minimum density
    pub fn min_density(mut self, min_density: usize) -> Self {
        self.min_density = min_density;
        self
    }

    /// Enable or disable bucket pre-reservation
    pub fn preallocate_buckets(mut self, enabled: bool) -> Self {
        self.preallocate_buckets = enabled;
        self
    }

    /// Bucket density this configuration resolves to
    pub fn density(&self) -> usize {
        bucket_density(self.expected_capacity, self.min_density)
    }
}

impl Config for SortedBucketConfig {
    fn validate(&self) -> Result<()> {
        if self.min_density == 0 {
            return Err(SortedBucketError::configuration(
                "min_density must be at least 1",
            ));
        }
        if self.min_density > MAX_DENSITY {
            return Err(SortedBucketError::invalid_density(self.min_density));
        }
        Ok(())
    }

    fn from_env_with_prefix(prefix: &str) -> Result<Self> {
        let mut config = Self::default();
        config.expected_capacity =
            parse_env_var(&format!("{}CAPACITY", prefix), config.expected_capacity);
        config.min_density = parse_env_var(&format!("{}MIN_DENSITY", prefix), config.min_density);
        config.preallocate_buckets = parse_env_bool(
            &format!("{}PREALLOCATE", prefix),
            config.preallocate_buckets,
        );
        config.validate()?;
        Ok(config)
    }

    fn performance_preset() -> Self {
        Self {
            expected_capacity: 1_000_000,
            min_density: 1_000,
            preallocate_buckets: true,
        }
    }

    fn memory_preset() -> Self {
        Self {
            expected_capacity: DEFAULT_EXPECTED_CAPACITY,
            min_density: 64,
            preallocate_buckets: false,
        }
    }

    fn realtime_preset() -> Self {
        Self {
            expected_capacity: DEFAULT_EXPECTED_CAPACITY,
            min_density: 128,
            preallocate_buckets: true,
        }
    }
}
