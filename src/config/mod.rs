//! Configuration APIs for sorted-bucket containers
//!
//! Containers are tuned by a capacity hint and a minimum bucket density. The
//! [`Config`] trait provides validation, environment initialization and
//! presets for every configuration type in the crate.
//!
//! # Preset Configurations
//!
//! ```rust
//! use sorted_bucket::config::{Config, SortedBucketConfig};
//!
//! // Large buckets, fewer splits on bulk loads
//! let config = SortedBucketConfig::performance_preset();
//!
//! // Tight buckets without up-front reservation
//! let config = SortedBucketConfig::memory_preset();
//! ```
//!
//! # Environment Initialization
//!
//! ```rust
//! use sorted_bucket::config::{Config, SortedBucketConfig};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Reads SORTED_BUCKET_CAPACITY, SORTED_BUCKET_MIN_DENSITY, SORTED_BUCKET_PREALLOCATE
//! let config = SortedBucketConfig::from_env()?;
//!
//! // Same variables under a custom prefix
//! let config = SortedBucketConfig::from_env_with_prefix("MYAPP_")?;
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use std::env;
use std::fmt;

pub mod sorted_bucket;


pub use sorted_bucket::SortedBucketConfig;

/// Default environment variable prefix
pub const DEFAULT_ENV_PREFIX: &str = "SORTED_BUCKET_";

/// Common configuration trait providing validation, environment initialization,
/// and preset management functionality.
pub trait Config: Clone + fmt::Debug {
    /// Validate the configuration for correctness and consistency.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, `Err` with details if invalid.
    fn validate(&self) -> Result<()>;

    /// Initialize configuration from environment variables.
    ///
    /// Environment variables use the format `SORTED_BUCKET_{FIELD}`.
    fn from_env() -> Result<Self>
    where
        Self: Default,
    {
        Self::from_env_with_prefix(DEFAULT_ENV_PREFIX)
    }

    /// Initialize configuration from environment variables with a custom prefix.
    ///
    /// Unset or unparsable variables keep their default value. The resulting
    /// configuration is validated before it is returned.
    fn from_env_with_prefix(prefix: &str) -> Result<Self>
    where
        Self: Default;

    /// Get a performance-optimized preset configuration.
    fn performance_preset() -> Self;

    /// Get a memory-optimized preset configuration.
    fn memory_preset() -> Self;

    /// Get a real-time preset configuration.
    ///
    /// Favors small buckets so the O(density) rebalancing step stays short.
    fn realtime_preset() -> Self;

    /// Get a balanced preset configuration.
    fn balanced_preset() -> Self
    where
        Self: Default,
    {
        Self::default()
    }
}

/// Utility function to parse environment variable with fallback to default.
///
/// # Arguments
///
/// * `var_name` - The environment variable name
/// * `default` - The default value if the environment variable is not set
pub fn parse_env_var<T>(var_name: &str, default: T) -> T
where
    T: std::str::FromStr + Clone,
{
    env::var(var_name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Utility function to parse boolean environment variable.
///
/// Accepts: "true", "1", "yes", "on" (case-insensitive) as true,
/// everything else as false.
pub fn parse_env_bool(var_name: &str, default: bool) -> bool {
    env::var(var_name)
        .ok()
        .map(|s| {
            let s = s.trim().to_lowercase();
            matches!(s.as_str(), "true" | "1" | "yes" | "on")
        })
        .unwrap_or(default)
}
