//! # Sorted Bucket: Sorted Associative Multisets
//!
//! This crate provides three interchangeable sorted multiset engines. Each keeps
//! duplicates, iterates in order in both directions and answers rank queries
//! (`distance`, the 0-indexed position of a key's first occurrence) in
//! sub-linear time.
//!
//! ## Key Features
//!
//! - **Weighted Red-Black Tree**: subtree mass and per-key copy counts, O(log n) everything
//! - **Linked Buckets**: sqrt-decomposed chain with handles that survive rebalancing
//! - **Contiguous Buckets**: cache-friendly sorted vectors with binary search at both levels
//! - **Shared Contract**: one [`SortedMultiset`] trait over all engines
//! - **Custom Orders**: any [`KeyOrder`] or `Fn(&K, &K) -> Ordering` closure
//! - **Tunable Density**: capacity hints and presets via [`SortedBucketConfig`]
//!
//! ## Quick Start
//!
//! ```rust
//! use sorted_bucket::{
//!     Config, SortedBucketConfig, SortedBucketList, SortedBucketTree, SortedBucketVec,
//!     SortedMultiset,
//! };
//!
//! // Tree engine with coalesced duplicates
//! let mut tree = SortedBucketTree::new();
//! tree.insert_copies(3, 2);
//! tree.insert(1);
//! assert_eq!(tree.find_with_distance(&3).map(|(_, rank)| rank), Some(1));
//!
//! // Linked buckets tuned for a million elements
//! let config = SortedBucketConfig::performance_preset();
//! let mut list = SortedBucketList::with_config(config).unwrap();
//! list.insert(5u32);
//! assert!(list.contains(&5));
//!
//! // Contiguous buckets through the shared trait
//! fn fill<S: SortedMultiset<i64>>(set: &mut S) {
//!     for key in [4, 2, 4] {
//!         set.insert(key);
//!     }
//! }
//! let mut vec = SortedBucketVec::new();
//! fill(&mut vec);
//! assert_eq!(vec.erase_all(&4), 2);
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod containers;
pub mod error;

// Re-export core types
pub use config::{Config, SortedBucketConfig};
pub use containers::{
    KeyOrder, ListPos, NaturalOrder, SortedBucketList, SortedBucketTree, SortedBucketVec,
    SortedMultiset, TreePos, VecPos,
};
pub use error::{Result, SortedBucketError};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the library (currently no-op, for future use)
pub fn init() {
    log::debug!("Initializing sorted-bucket v{}", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_functionality() {
        init();
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_version_info() {
        assert!(VERSION.contains('.'));
        // Version should be semver format like "0.1.0"
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2);
    }

    #[test]
    fn test_re_exports() {
        let _tree = SortedBucketTree::<i32>::new();
        let _list = SortedBucketList::<i32>::new();
        let _vec = SortedBucketVec::<i32>::new();
        let _config = SortedBucketConfig::balanced_preset();

        let _err = SortedBucketError::invalid_density(0);
        assert!(std::any::type_name::<Result<()>>().contains("SortedBucketError"));
    }

    #[test]
    fn test_engines_agree_through_trait() {
        fn run<S: SortedMultiset<i32>>(mut set: S) -> (Vec<i32>, Option<usize>) {
            for key in [9, 2, 7, 2, 5] {
                set.insert(key);
            }
            set.erase(&9);
            let keys = set.iter().copied().collect();
            (keys, set.distance(&7))
        }
        let expected = (vec![2, 2, 5, 7], Some(3));
        assert_eq!(run(SortedBucketTree::new()), expected);
        assert_eq!(run(SortedBucketList::new()), expected);
        assert_eq!(run(SortedBucketVec::new()), expected);
    }

    #[test]
    fn test_multiple_init_calls() {
        init();
        init();
    }
}
