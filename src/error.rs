//! Error handling for the sorted-bucket library
//!
//! Ordinary container operations never fail: a missing key is reported through
//! `None`, an end position or a zero count. The errors here cover configuration
//! validation, density overrides and the structural invariant checks the
//! containers expose for testing.

use thiserror::Error;

/// Main error type for the sorted-bucket library
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SortedBucketError {
    /// Configuration or parameter errors
    #[error("Invalid configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// A bucket density that cannot drive the split/merge thresholds
    #[error("Invalid bucket density: {density}")]
    InvalidDensity {
        /// The rejected density
        density: usize,
    },

    /// A structural invariant of a container does not hold
    #[error("Invariant violation in {structure}: {message}")]
    InvariantViolation {
        /// Which container reported the violation
        structure: &'static str,
        /// Description of the broken invariant
        message: String,
    },
}

impl SortedBucketError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid density error
    pub fn invalid_density(density: usize) -> Self {
        Self::InvalidDensity { density }
    }

    /// Create an invariant violation error
    pub fn invariant<S: Into<String>>(structure: &'static str, message: S) -> Self {
        Self::InvariantViolation {
            structure,
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Configuration { .. } => true,
            Self::InvalidDensity { .. } => true,
            Self::InvariantViolation { .. } => false,
        }
    }

    /// Get the error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "config",
            Self::InvalidDensity { .. } => "density",
            Self::InvariantViolation { .. } => "invariant",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, SortedBucketError>;

/// Return an invariant violation from `structure` unless `condition` holds
#[inline]
pub(crate) fn ensure(condition: bool, structure: &'static str, message: impl FnOnce() -> String) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(SortedBucketError::invariant(structure, message()))
    }
}
