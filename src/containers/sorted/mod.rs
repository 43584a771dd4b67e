//! Sorted associative multisets
//!
//! Three engines implement the same [`SortedMultiset`] contract: ordered
//! iteration, `find`, `lower_bound`/`upper_bound`, `distance` (rank of the first
//! occurrence), `insert`, `erase`, `erase_all` and density retuning.
//!
//! | Engine | Storage | find / distance | insert / erase |
//! |---|---|---|---|
//! | [`SortedBucketTree`] | weighted red-black tree in a node arena | O(log n) | O(log n) |
//! | [`SortedBucketList`] | buckets over one arena-backed linked chain | O(sqrt n) | O(sqrt n) |
//! | [`SortedBucketVec`] | vector of contiguous sorted buckets | O(log sqrt n) / O(sqrt n) | O(sqrt n) |
//!
//! Equal keys keep insertion order in the bucket engines (new keys are placed
//! after existing equal keys). The tree coalesces equal keys into one node with
//! a `copies` count; iteration yields each copy.
//!
//! # Position stability
//!
//! - Tree and list positions to untouched elements stay valid across other
//!   insertions and erasures.
//! - Vec positions are `(bucket, offset)` pairs; any insert or erase anywhere
//!   may shift them, so treat every mutation as invalidating held positions.
//!
//! # Example
//!
//! ```rust
//! use sorted_bucket::{SortedBucketTree, SortedBucketVec};
//!
//! let tree: SortedBucketTree<i32> = [5, 1, 3, 3].into_iter().collect();
//! assert_eq!(tree.distance(&3), Some(1));
//! assert_eq!(tree.distance(&4), None);
//!
//! let mut vec = SortedBucketVec::new();
//! vec.insert(2);
//! vec.insert(1);
//! assert_eq!(vec.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
//! ```

use crate::config::sorted_bucket::MAX_DENSITY;
use std::cmp::Ordering;
use std::fmt::Debug;

pub mod array_bucket;
pub mod linked_bucket;
pub mod rb_tree;

pub use array_bucket::{SortedBucketVec, VecIter, VecPos};
pub use linked_bucket::{ListIter, ListPos, SortedBucketList};
pub use rb_tree::{SortedBucketTree, TreeEntries, TreeIter, TreePos};

/// Total order over keys, with equality derived from it.
///
/// Implemented by [`NaturalOrder`] for `K: Ord` and by every
/// `Fn(&K, &K) -> Ordering` closure.
pub trait KeyOrder<K: ?Sized> {
    /// Compare two keys
    fn compare(&self, a: &K, b: &K) -> Ordering;

    /// `a` sorts strictly before `b`
    #[inline]
    fn less(&self, a: &K, b: &K) -> bool {
        self.compare(a, b) == Ordering::Less
    }

    /// `a` and `b` are the same key
    #[inline]
    fn equal(&self, a: &K, b: &K) -> bool {
        self.compare(a, b) == Ordering::Equal
    }
}

/// Orders keys by their `Ord` implementation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NaturalOrder;

impl<K: Ord + ?Sized> KeyOrder<K> for NaturalOrder {
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

impl<K: ?Sized, F> KeyOrder<K> for F
where
    F: Fn(&K, &K) -> Ordering,
{
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        self(a, b)
    }
}

/// Outcome of balancing one bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rebalance {
    /// Bucket size was already within bounds
    Unchanged,
    /// Oversized bucket: elements from `density` onward moved to a new right bucket
    Split,
    /// Undersized bucket pulled elements from the front of its right neighbour
    Borrowed,
    /// Undersized bucket was prepended to its right neighbour and removed
    Merged,
}

/// Integer square root, `floor(sqrt(n))`
pub fn isqrt(n: usize) -> usize {
    if n < 2 {
        return n;
    }
    let mut root = (n as f64).sqrt() as usize;
    while root.checked_mul(root).map_or(true, |sq| sq > n) {
        root -= 1;
    }
    while (root + 1).checked_mul(root + 1).map_or(false, |sq| sq <= n) {
        root += 1;
    }
    root
}

/// Bucket density for a capacity hint: `max(min_density, floor(sqrt(capacity)))`,
/// never above [`MAX_DENSITY`]
#[inline]
pub fn bucket_density(capacity: usize, min_density: usize) -> usize {
    min_density.max(isqrt(capacity)).min(MAX_DENSITY)
}

/// Operations shared by every sorted multiset engine.
///
/// Positions are engine-specific handles. [`end`](SortedMultiset::end) is the
/// past-the-end position; reading it yields `None`.
pub trait SortedMultiset<K> {
    /// Position handle
    type Pos: Copy + Eq + Debug;

    /// Sorted iterator over every stored element
    type Iter<'a>: DoubleEndedIterator<Item = &'a K> + ExactSizeIterator
    where
        Self: 'a,
        K: 'a;

    /// Number of stored elements, counting duplicates
    fn len(&self) -> usize;

    /// True when no element is stored
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every element
    fn clear(&mut self);

    /// Position of the smallest element (`end()` when empty)
    fn begin(&self) -> Self::Pos;

    /// Past-the-end position
    fn end(&self) -> Self::Pos;

    /// Element at `pos`, `None` for `end()`
    fn get(&self, pos: Self::Pos) -> Option<&K>;

    /// Position after `pos`, `None` when `pos` is `end()`
    fn next_pos(&self, pos: Self::Pos) -> Option<Self::Pos>;

    /// Position before `pos`, `None` when `pos` is `begin()`
    fn prev_pos(&self, pos: Self::Pos) -> Option<Self::Pos>;

    /// Insert one element and return its position
    fn insert(&mut self, key: K) -> Self::Pos;

    /// Remove one instance of `key`; returns 1 if removed, 0 if absent
    fn erase(&mut self, key: &K) -> usize;

    /// Remove every instance of `key`; returns how many were removed
    fn erase_all(&mut self, key: &K) -> usize;

    /// Position of the first instance of `key`, `end()` when absent
    fn find(&self, key: &K) -> Self::Pos;

    /// Position and rank of the first instance of `key`
    fn find_with_distance(&self, key: &K) -> Option<(Self::Pos, usize)>;

    /// Rank (0-indexed) of the first instance of `key`, `None` when absent
    fn distance(&self, key: &K) -> Option<usize> {
        self.find_with_distance(key).map(|(_, rank)| rank)
    }

    /// True when `key` is stored
    fn contains(&self, key: &K) -> bool {
        self.find(key) != self.end()
    }

    /// First position whose element is not less than `key`
    fn lower_bound(&self, key: &K) -> Self::Pos;

    /// First position whose element is greater than `key`
    fn upper_bound(&self, key: &K) -> Self::Pos;

    /// Retune storage for an expected number of elements
    fn change_capacity(&mut self, capacity: usize);

    /// Iterate every element in sorted order
    fn iter(&self) -> Self::Iter<'_>;

    /// Smallest element
    fn front(&self) -> Option<&K> {
        self.get(self.begin())
    }

    /// Largest element
    fn back(&self) -> Option<&K> {
        self.iter().next_back()
    }
}

/// Route trace records to the test harness so layout dumps run
#[cfg(test)]
pub(crate) fn init_trace_logging() {
    let _r = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Trace)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isqrt() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(3), 1);
        assert_eq!(isqrt(4), 2);
        assert_eq!(isqrt(24_999), 158);
        assert_eq!(isqrt(1_000_000), 1_000);
        assert_eq!(isqrt(usize::MAX), (1usize << (usize::BITS / 2)) - 1);
    }

    #[test]
    fn test_bucket_density() {
        assert_eq!(bucket_density(0, 500), 500);
        assert_eq!(bucket_density(25_000, 500), 500);
        assert_eq!(bucket_density(4_000_000, 500), 2_000);
        assert_eq!(bucket_density(16, 1), 4);
        assert_eq!(bucket_density(usize::MAX, 500), MAX_DENSITY.min(isqrt(usize::MAX)));
        assert_eq!(bucket_density(0, usize::MAX), MAX_DENSITY);
    }

    #[test]
    fn test_natural_order() {
        assert!(NaturalOrder.less(&1, &2));
        assert!(!NaturalOrder.less(&2, &2));
        assert!(NaturalOrder.equal(&"a", &"a"));
        assert_eq!(KeyOrder::<str>::compare(&NaturalOrder, "b", "a"), Ordering::Greater);
    }

    #[test]
    fn test_closure_order() {
        let reverse = |a: &i32, b: &i32| b.cmp(a);
        assert!(KeyOrder::<i32>::less(&reverse, &2, &1));
        assert!(KeyOrder::<i32>::equal(&reverse, &5, &5));

        let by_abs = |a: &i64, b: &i64| a.abs().cmp(&b.abs());
        assert!(KeyOrder::<i64>::equal(&by_abs, &-3, &3));
    }
}
