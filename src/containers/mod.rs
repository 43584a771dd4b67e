//! Container types
//!
//! ## Sorted Multisets
//!
//! - **`SortedBucketTree<K>`** - Red-black tree with subtree mass and coalesced duplicates, O(log n) rank queries
//! - **`SortedBucketList<K>`** - Buckets over an arena-backed linked chain with stable element handles
//! - **`SortedBucketVec<K>`** - Vector of sorted vectors with binary search inside and across buckets

pub mod sorted;

pub use sorted::{
    KeyOrder, ListIter, ListPos, NaturalOrder, SortedBucketList, SortedBucketTree,
    SortedBucketVec, SortedMultiset, TreeEntries, TreeIter, TreePos, VecIter, VecPos,
};
