//! Bucketed contiguous multiset
//!
//! A vector of sorted vectors. Both the bucket and the slot inside it are found
//! by binary search; insertions and erasures shift at most one bucket and then
//! rebalance it against its right neighbour.
//!
//! Positions are `(bucket, offset)` pairs. Any insert or erase may shift or
//! reallocate buckets, so a held [`VecPos`] is only meaningful until the next
//! mutation.

use super::{bucket_density, KeyOrder, NaturalOrder, Rebalance, SortedMultiset};
use crate::config::sorted_bucket::{
    BUCKET_RESERVE_SLACK, DEFAULT_MIN_DENSITY, MAX_BUCKET_RESERVE, MAX_DENSITY,
};
use crate::config::{Config, SortedBucketConfig};
use crate::error::{ensure, Result, SortedBucketError};
use std::fmt;
use std::iter::Flatten;
use std::slice;

const STRUCTURE: &str = "SortedBucketVec";

/// Bucket index and offset of an element in a [`SortedBucketVec`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VecPos {
    bucket: usize,
    offset: usize,
}

impl VecPos {
    /// Index of the bucket
    #[inline]
    pub fn bucket(&self) -> usize {
        self.bucket
    }

    /// Offset inside the bucket
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Sorted multiset stored as a vector of sorted vectors.
///
/// # Examples
///
/// ```rust
/// use sorted_bucket::SortedBucketVec;
///
/// let mut vec: SortedBucketVec<u64> = (0..100).rev().collect();
/// vec.force_density(4).unwrap();
/// assert!(vec.bucket_count() > 1);
/// assert_eq!(vec.distance(&42), Some(42));
/// assert_eq!(vec.get(vec.lower_bound(&42)), Some(&42));
/// ```
#[derive(Clone)]
pub struct SortedBucketVec<K, C = NaturalOrder> {
    buckets: Vec<Vec<K>>,
    len: usize,
    density: usize,
    min_density: usize,
    preallocate: bool,
    order: C,
}

impl<K: Ord> SortedBucketVec<K, NaturalOrder> {
    /// Create an empty container with the default minimum density
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty container tuned for `capacity` elements
    pub fn with_capacity(capacity: usize) -> Self {
        Self::build(
            NaturalOrder,
            bucket_density(capacity, DEFAULT_MIN_DENSITY),
            DEFAULT_MIN_DENSITY,
            true,
        )
    }

    /// Create an empty container from a validated configuration
    pub fn with_config(config: SortedBucketConfig) -> Result<Self> {
        Self::with_config_and_order(config, NaturalOrder)
    }
}

impl<K: Ord> Default for SortedBucketVec<K, NaturalOrder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, C: KeyOrder<K>> SortedBucketVec<K, C> {
    /// Create an empty container using a custom key order
    pub fn with_order(order: C) -> Self {
        Self::build(order, DEFAULT_MIN_DENSITY, DEFAULT_MIN_DENSITY, true)
    }

    /// Create an empty container from a configuration and a custom key order
    pub fn with_config_and_order(config: SortedBucketConfig, order: C) -> Result<Self> {
        config.validate()?;
        log::debug!(
            "Creating SortedBucketVec with density {} for capacity {}",
            config.density(),
            config.expected_capacity
        );
        Ok(Self::build(
            order,
            config.density(),
            config.min_density,
            config.preallocate_buckets,
        ))
    }

    fn build(order: C, density: usize, min_density: usize, preallocate: bool) -> Self {
        let mut vec = Self {
            buckets: Vec::new(),
            len: 0,
            density,
            min_density,
            preallocate,
            order,
        };
        let first = vec.new_bucket();
        vec.buckets.push(first);
        vec
    }

    /// Number of elements
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no element is stored
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current bucket density
    #[inline]
    pub fn density(&self) -> usize {
        self.density
    }

    /// Number of buckets (at least one)
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Size of every bucket in order
    pub fn bucket_sizes(&self) -> Vec<usize> {
        self.buckets.iter().map(Vec::len).collect()
    }

    /// Remove every element, keeping the density
    pub fn clear(&mut self) {
        self.buckets.truncate(1);
        self.buckets[0].clear();
        self.len = 0;
    }

    /// Position of the smallest element
    #[inline]
    pub fn begin(&self) -> VecPos {
        VecPos {
            bucket: 0,
            offset: 0,
        }
    }

    /// Past-the-end position: one past the last slot of the last bucket
    #[inline]
    pub fn end(&self) -> VecPos {
        let bucket = self.buckets.len() - 1;
        VecPos {
            bucket,
            offset: self.buckets[bucket].len(),
        }
    }

    /// Element at `pos`, `None` for `end()` or a stale position
    pub fn get(&self, pos: VecPos) -> Option<&K> {
        self.buckets.get(pos.bucket)?.get(pos.offset)
    }

    /// Position after `pos`, `None` when `pos` is `end()`
    pub fn next_pos(&self, pos: VecPos) -> Option<VecPos> {
        self.get(pos)?;
        Some(self.normalize(pos.bucket, pos.offset + 1))
    }

    /// Position before `pos`, `None` when `pos` is `begin()` or out of range
    pub fn prev_pos(&self, pos: VecPos) -> Option<VecPos> {
        if pos.offset > self.buckets.get(pos.bucket)?.len() {
            return None;
        }
        if pos.offset > 0 {
            return Some(VecPos {
                bucket: pos.bucket,
                offset: pos.offset - 1,
            });
        }
        let bucket = pos.bucket.checked_sub(1)?;
        let len = self.buckets.get(bucket)?.len();
        Some(VecPos {
            bucket,
            offset: len.checked_sub(1)?,
        })
    }

    /// Smallest element
    pub fn front(&self) -> Option<&K> {
        self.buckets[0].first()
    }

    /// Largest element
    pub fn back(&self) -> Option<&K> {
        self.buckets.last().and_then(|b| b.last())
    }

    /// Insert `key` after any equal elements; returns its position
    pub fn insert(&mut self, key: K) -> VecPos {
        let mut bucket = self.bucket_upper(&key);
        let offset = if bucket == self.buckets.len() {
            bucket -= 1;
            self.buckets[bucket].len()
        } else {
            let order = &self.order;
            self.buckets[bucket].partition_point(|x| !order.less(&key, x))
        };
        self.buckets[bucket].insert(offset, key);
        self.len += 1;

        match self.balance(bucket) {
            // The back part starting at slot `density` moved to bucket + 1
            Rebalance::Split if offset >= self.density => {
                self.normalize(bucket + 1, offset - self.density)
            }
            _ => self.normalize(bucket, offset),
        }
    }

    /// Remove the first instance of `key`; returns 1 if removed, 0 if absent
    pub fn erase(&mut self, key: &K) -> usize {
        let pos = self.lower_bound(key);
        match self.get(pos) {
            Some(found) if self.order.equal(found, key) => {}
            _ => return 0,
        }
        self.buckets[pos.bucket].remove(pos.offset);
        self.len -= 1;
        self.balance(pos.bucket);
        1
    }

    /// Remove every instance of `key`; returns how many were removed
    pub fn erase_all(&mut self, key: &K) -> usize {
        let first = self.lower_bound(key);
        match self.get(first) {
            Some(found) if self.order.equal(found, key) => {}
            _ => return 0,
        }

        let mut bucket = first.bucket;
        let mut offset = first.offset;
        let mut removed = 0;
        loop {
            let order = &self.order;
            let slots = &mut self.buckets[bucket];
            let bucket_len = slots.len();
            let run_end = offset + slots[offset..].partition_point(|x| order.equal(x, key));
            slots.drain(offset..run_end);
            removed += run_end - offset;
            // The run may continue in the next bucket only if it reached this one's end
            if run_end < bucket_len || bucket + 1 == self.buckets.len() {
                break;
            }
            match self.buckets[bucket + 1].first() {
                Some(next) if self.order.equal(next, key) => {
                    bucket += 1;
                    offset = 0;
                }
                _ => break,
            }
        }
        self.len -= removed;

        self.balance(bucket);
        if bucket != first.bucket {
            self.balance(first.bucket);
        }
        removed
    }

    /// Position of the first instance of `key`, `end()` when absent
    pub fn find(&self, key: &K) -> VecPos {
        let pos = self.lower_bound(key);
        match self.get(pos) {
            Some(found) if self.order.equal(found, key) => pos,
            _ => self.end(),
        }
    }

    /// Position and rank of the first instance of `key`
    pub fn find_with_distance(&self, key: &K) -> Option<(VecPos, usize)> {
        let pos = self.lower_bound(key);
        let found = self.get(pos)?;
        if !self.order.equal(found, key) {
            return None;
        }
        let before: usize = self.buckets[..pos.bucket].iter().map(Vec::len).sum();
        Some((pos, before + pos.offset))
    }

    /// Rank (0-indexed) of the first instance of `key`, `None` when absent
    pub fn distance(&self, key: &K) -> Option<usize> {
        self.find_with_distance(key).map(|(_, rank)| rank)
    }

    /// True when `key` is stored
    pub fn contains(&self, key: &K) -> bool {
        self.get(self.find(key)).is_some()
    }

    /// First position whose element is not less than `key`
    pub fn lower_bound(&self, key: &K) -> VecPos {
        let order = &self.order;
        let bucket = self
            .buckets
            .partition_point(|b| b.last().map_or(true, |tail| order.less(tail, key)));
        if bucket == self.buckets.len() {
            return self.end();
        }
        let offset = self.buckets[bucket].partition_point(|x| order.less(x, key));
        self.normalize(bucket, offset)
    }

    /// First position whose element is greater than `key`
    pub fn upper_bound(&self, key: &K) -> VecPos {
        let bucket = self.bucket_upper(key);
        if bucket == self.buckets.len() {
            return self.end();
        }
        let order = &self.order;
        let offset = self.buckets[bucket].partition_point(|x| !order.less(key, x));
        self.normalize(bucket, offset)
    }

    /// Retune the density for `capacity` elements and rebalance every bucket
    pub fn change_capacity(&mut self, capacity: usize) {
        self.density = bucket_density(capacity, self.min_density);
        self.rebalance_all();
    }

    /// Set the density directly, bypassing the minimum, and rebalance every bucket.
    ///
    /// Densities of 0 or above [`MAX_DENSITY`] are rejected.
    pub fn force_density(&mut self, density: usize) -> Result<()> {
        if density == 0 || density > MAX_DENSITY {
            return Err(SortedBucketError::invalid_density(density));
        }
        self.density = density;
        self.rebalance_all();
        Ok(())
    }

    /// Iterate every element in sorted order
    pub fn iter(&self) -> VecIter<'_, K> {
        VecIter {
            inner: self.buckets.iter().flatten(),
            remaining: self.len,
        }
    }

    /// Borrow the buckets as sorted slices
    pub fn buckets(&self) -> impl ExactSizeIterator<Item = &[K]> + '_ {
        self.buckets.iter().map(Vec::as_slice)
    }

    /// Verify bucket bounds, ordering and size accounting
    pub fn check_invariants(&self) -> Result<()> {
        ensure(!self.buckets.is_empty(), STRUCTURE, || {
            "no bucket present".to_string()
        })?;
        let last = self.buckets.len() - 1;
        let mut total = 0;
        let mut prev: Option<&K> = None;
        for (index, bucket) in self.buckets.iter().enumerate() {
            ensure(!bucket.is_empty() || last == 0, STRUCTURE, || {
                format!("bucket {} of {} is empty", index, self.buckets.len())
            })?;
            ensure(bucket.len() <= 2 * self.density, STRUCTURE, || {
                format!(
                    "bucket {} holds {} > 2 * density {}",
                    index,
                    bucket.len(),
                    self.density
                )
            })?;
            if index < last {
                ensure(bucket.len() >= self.density / 2, STRUCTURE, || {
                    format!(
                        "bucket {} holds {} < density / 2 with density {}",
                        index,
                        bucket.len(),
                        self.density
                    )
                })?;
            }
            for key in bucket {
                if let Some(prev) = prev {
                    ensure(!self.order.less(key, prev), STRUCTURE, || {
                        format!("bucket {} is out of order", index)
                    })?;
                }
                prev = Some(key);
            }
            total += bucket.len();
        }
        ensure(total == self.len, STRUCTURE, || {
            format!("bucket sizes sum to {} but len is {}", total, self.len)
        })
    }

    /// Dump every bucket at trace level
    pub fn log_layout(&self, name: &str)
    where
        K: fmt::Debug,
    {
        if !log::log_enabled!(log::Level::Trace) {
            return;
        }
        log::trace!(
            "{} with len = {} and density = {}, {} buckets",
            name,
            self.len,
            self.density,
            self.buckets.len()
        );
        for (index, bucket) in self.buckets.iter().enumerate() {
            log::trace!("  bucket {}: {:?}", index, bucket);
        }
    }

    // ---- internals ----

    /// First bucket whose tail is greater than `key`; `buckets.len()` if none
    fn bucket_upper(&self, key: &K) -> usize {
        let order = &self.order;
        self.buckets
            .partition_point(|b| b.last().map_or(true, |tail| !order.less(key, tail)))
    }

    /// Map one-past-the-end of a non-last bucket to the start of the next one
    #[inline]
    fn normalize(&self, bucket: usize, offset: usize) -> VecPos {
        if offset >= self.buckets[bucket].len() && bucket + 1 < self.buckets.len() {
            VecPos {
                bucket: bucket + 1,
                offset: 0,
            }
        } else {
            VecPos { bucket, offset }
        }
    }

    fn new_bucket(&self) -> Vec<K> {
        if self.preallocate {
            let reserve = (2 * self.density + BUCKET_RESERVE_SLACK).min(MAX_BUCKET_RESERVE);
            Vec::with_capacity(reserve)
        } else {
            Vec::new()
        }
    }

    /// Bring bucket `index` back within `[density / 2, 2 * density]`.
    ///
    /// Same policy as the linked engine: drop empty right neighbours, split an
    /// oversized bucket at `density`, and let an undersized non-last bucket
    /// borrow from or merge into its right neighbour.
    fn balance(&mut self, index: usize) -> Rebalance {
        if index >= self.buckets.len() {
            return Rebalance::Unchanged;
        }
        while index + 1 < self.buckets.len() && self.buckets[index + 1].is_empty() {
            self.buckets.remove(index + 1);
        }

        let density = self.density;
        let len = self.buckets[index].len();
        if len > 2 * density {
            let mut right = self.new_bucket();
            right.extend(self.buckets[index].drain(density..));
            self.buckets.insert(index + 1, right);
            log::trace!("Split vec bucket {} at {} of {}", index, density, len);
            return Rebalance::Split;
        }
        if len >= density / 2 && len > 0 {
            return Rebalance::Unchanged;
        }
        if index + 1 == self.buckets.len() {
            if len == 0 && index > 0 {
                self.buckets.remove(index);
                return Rebalance::Merged;
            }
            return Rebalance::Unchanged;
        }

        let next_len = self.buckets[index + 1].len();
        if len + next_len > 2 * density {
            let desired = (next_len - len) / 2;
            let (left, right) = self.buckets.split_at_mut(index + 1);
            left[index].extend(right[0].drain(..desired));
            log::trace!("Vec bucket {} borrowed {} from its neighbour", index, desired);
            Rebalance::Borrowed
        } else {
            let mut merged = self.buckets.remove(index);
            merged.append(&mut self.buckets[index]);
            self.buckets[index] = merged;
            log::trace!("Merged vec bucket {} into its neighbour", index);
            Rebalance::Merged
        }
    }

    fn rebalance_all(&mut self) {
        log::debug!(
            "Rebalancing {} vec buckets for density {}",
            self.buckets.len(),
            self.density
        );
        let mut index = 0;
        while index < self.buckets.len() {
            match self.balance(index) {
                // Ids shifted down, or the borrower may now need a split
                Rebalance::Merged | Rebalance::Borrowed => {}
                Rebalance::Split | Rebalance::Unchanged => index += 1,
            }
        }
    }
}

impl<K: fmt::Debug, C> fmt::Debug for SortedBucketVec<K, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.buckets.iter().flatten()).finish()
    }
}

impl<K: Ord> FromIterator<K> for SortedBucketVec<K, NaturalOrder> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        let mut vec = Self::new();
        vec.extend(iter);
        vec
    }
}

impl<K, C: KeyOrder<K>> Extend<K> for SortedBucketVec<K, C> {
    fn extend<I: IntoIterator<Item = K>>(&mut self, iter: I) {
        for key in iter {
            self.insert(key);
        }
    }
}

impl<'a, K, C: KeyOrder<K>> IntoIterator for &'a SortedBucketVec<K, C> {
    type Item = &'a K;
    type IntoIter = VecIter<'a, K>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Sorted iterator over a [`SortedBucketVec`]
pub struct VecIter<'a, K> {
    inner: Flatten<slice::Iter<'a, Vec<K>>>,
    remaining: usize,
}

impl<'a, K> Iterator for VecIter<'a, K> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.inner.next()?;
        self.remaining -= 1;
        Some(key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K> DoubleEndedIterator for VecIter<'a, K> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let key = self.inner.next_back()?;
        self.remaining -= 1;
        Some(key)
    }
}

impl<'a, K> ExactSizeIterator for VecIter<'a, K> {}

impl<K, C: KeyOrder<K>> SortedMultiset<K> for SortedBucketVec<K, C> {
    type Pos = VecPos;
    type Iter<'a> = VecIter<'a, K> where Self: 'a, K: 'a;

    fn len(&self) -> usize {
        SortedBucketVec::len(self)
    }

    fn clear(&mut self) {
        SortedBucketVec::clear(self)
    }

    fn begin(&self) -> VecPos {
        SortedBucketVec::begin(self)
    }

    fn end(&self) -> VecPos {
        SortedBucketVec::end(self)
    }

    fn get(&self, pos: VecPos) -> Option<&K> {
        SortedBucketVec::get(self, pos)
    }

    fn next_pos(&self, pos: VecPos) -> Option<VecPos> {
        SortedBucketVec::next_pos(self, pos)
    }

    fn prev_pos(&self, pos: VecPos) -> Option<VecPos> {
        SortedBucketVec::prev_pos(self, pos)
    }

    fn insert(&mut self, key: K) -> VecPos {
        SortedBucketVec::insert(self, key)
    }

    fn erase(&mut self, key: &K) -> usize {
        SortedBucketVec::erase(self, key)
    }

    fn erase_all(&mut self, key: &K) -> usize {
        SortedBucketVec::erase_all(self, key)
    }

    fn find(&self, key: &K) -> VecPos {
        SortedBucketVec::find(self, key)
    }

    fn find_with_distance(&self, key: &K) -> Option<(VecPos, usize)> {
        SortedBucketVec::find_with_distance(self, key)
    }

    fn lower_bound(&self, key: &K) -> VecPos {
        SortedBucketVec::lower_bound(self, key)
    }

    fn upper_bound(&self, key: &K) -> VecPos {
        SortedBucketVec::upper_bound(self, key)
    }

    fn change_capacity(&mut self, capacity: usize) {
        SortedBucketVec::change_capacity(self, capacity)
    }

    fn iter(&self) -> VecIter<'_, K> {
        SortedBucketVec::iter(self)
    }

    fn front(&self) -> Option<&K> {
        SortedBucketVec::front(self)
    }

    fn back(&self) -> Option<&K> {
        SortedBucketVec::back(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::sorted::{init_trace_logging, isqrt};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn collect<C: KeyOrder<i64>>(vec: &SortedBucketVec<i64, C>) -> Vec<i64> {
        vec.iter().copied().collect()
    }

    fn evens(n: i64) -> SortedBucketVec<i64> {
        (0..n).map(|i| i * 2).collect()
    }

    #[test]
    fn test_empty_vec() -> Result<()> {
        let vec: SortedBucketVec<i64> = SortedBucketVec::new();
        assert!(vec.is_empty());
        assert_eq!(vec.begin(), vec.end());
        assert_eq!(vec.get(vec.end()), None);
        assert_eq!(vec.find(&1), vec.end());
        assert_eq!(vec.distance(&1), None);
        assert_eq!(vec.lower_bound(&1), vec.end());
        assert_eq!(vec.prev_pos(vec.end()), None);
        assert_eq!(vec.next_pos(vec.end()), None);
        assert_eq!(vec.front(), None);
        assert_eq!(vec.back(), None);
        vec.check_invariants()
    }

    #[test]
    fn test_density_boundary_after_erase() -> Result<()> {
        let mut vec = evens(20);
        vec.force_density(4)?;
        assert_eq!(vec.bucket_sizes(), vec![4, 4, 4, 8]);
        vec.check_invariants()?;

        assert_eq!(vec.erase(&10), 1);
        let sizes = vec.bucket_sizes();
        for &size in &sizes[..sizes.len() - 1] {
            assert!((2..=8).contains(&size), "bucket sizes {:?}", sizes);
        }
        vec.check_invariants()
    }

    #[test]
    fn test_force_density_rejects_zero() {
        let mut vec = evens(3);
        assert!(matches!(
            vec.force_density(0),
            Err(SortedBucketError::InvalidDensity { density: 0 })
        ));
    }

    #[test]
    fn test_insert_position_after_split() -> Result<()> {
        let mut vec = SortedBucketVec::new();
        vec.force_density(4)?;
        for key in 0..8i64 {
            vec.insert(key * 10);
        }
        assert_eq!(vec.bucket_count(), 1);

        // Ninth element overflows 2 * density; slots from 4 onward move right
        let pos = vec.insert(65);
        assert_eq!(vec.bucket_sizes(), vec![4, 5]);
        assert_eq!(pos, VecPos { bucket: 1, offset: 3 });
        assert_eq!(vec.get(pos), Some(&65));

        let pos = vec.insert(5);
        assert_eq!(pos, VecPos { bucket: 0, offset: 1 });
        assert_eq!(vec.get(pos), Some(&5));
        vec.check_invariants()
    }

    #[test]
    fn test_insert_position_at_split_point() -> Result<()> {
        let mut vec = SortedBucketVec::new();
        vec.force_density(2)?;
        for key in [10i64, 20, 40, 50] {
            vec.insert(key);
        }
        // Lands exactly on slot `density` and must follow the split
        let pos = vec.insert(30);
        assert_eq!(vec.bucket_sizes(), vec![2, 3]);
        assert_eq!(pos, VecPos { bucket: 1, offset: 0 });
        assert_eq!(vec.get(pos), Some(&30));
        vec.check_invariants()
    }

    #[test]
    fn test_positions_normalize_across_buckets() -> Result<()> {
        let mut vec = evens(12);
        vec.force_density(2)?;
        let mut pos = vec.begin();
        let mut walked = Vec::new();
        while let Some(key) = vec.get(pos) {
            walked.push(*key);
            pos = vec.next_pos(pos).unwrap();
        }
        assert_eq!(pos, vec.end());
        assert_eq!(walked, collect(&vec));

        let mut back = Vec::new();
        let mut pos = vec.end();
        while let Some(prev) = vec.prev_pos(pos) {
            back.push(*vec.get(prev).unwrap());
            pos = prev;
        }
        back.reverse();
        assert_eq!(back, walked);

        // Upper bound of a bucket tail lands on the next bucket's start
        let tail = *vec.buckets().next().unwrap().last().unwrap();
        assert_eq!(vec.upper_bound(&tail), VecPos { bucket: 1, offset: 0 });
        Ok(())
    }

    #[test]
    fn test_erase_all_spanning_buckets() -> Result<()> {
        let mut vec = SortedBucketVec::new();
        vec.force_density(2)?;
        for key in [1i64, 2, 3, 3, 3, 3, 3, 3, 3, 3, 3, 4, 5, 6] {
            vec.insert(key);
        }
        assert!(vec.bucket_count() >= 3);
        vec.check_invariants()?;
        assert_eq!(vec.erase_all(&3), 9);
        vec.check_invariants()?;
        assert_eq!(collect(&vec), vec![1, 2, 4, 5, 6]);
        assert_eq!(vec.erase_all(&7), 0);
        assert_eq!(vec.distance(&5), Some(3));
        Ok(())
    }

    #[test]
    fn test_merge_back_to_single_bucket() -> Result<()> {
        let mut vec = evens(30);
        vec.force_density(2)?;
        assert!(vec.bucket_count() > 5);
        vec.change_capacity(0);
        assert_eq!(vec.density(), DEFAULT_MIN_DENSITY);
        assert_eq!(vec.bucket_count(), 1);
        assert_eq!(collect(&vec), (0..30).map(|i| i * 2).collect::<Vec<_>>());
        vec.check_invariants()
    }

    #[test]
    fn test_random_operations_against_reference() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(0xB0C7);
        let mut vec = SortedBucketVec::new();
        vec.force_density(3)?;
        let mut reference: Vec<i64> = Vec::new();

        for step in 0..3_000 {
            let key = rng.gen_range(0..120i64);
            match rng.gen_range(0..10) {
                0..=5 => {
                    let pos = vec.insert(key);
                    assert_eq!(vec.get(pos), Some(&key));
                    let at = reference.partition_point(|&k| k <= key);
                    reference.insert(at, key);
                }
                6..=8 => {
                    let expected = reference.binary_search(&key);
                    assert_eq!(vec.erase(&key), usize::from(expected.is_ok()));
                    if let Ok(idx) = expected {
                        reference.remove(idx);
                    }
                }
                _ => {
                    let before = reference.len();
                    reference.retain(|&k| k != key);
                    assert_eq!(vec.erase_all(&key), before - reference.len());
                }
            }
            if step % 50 == 0 {
                vec.check_invariants()?;
            }
        }
        vec.check_invariants()?;
        assert_eq!(collect(&vec), reference);
        for key in 0..120i64 {
            let expected = reference
                .binary_search(&key)
                .ok()
                .map(|_| reference.partition_point(|&k| k < key));
            assert_eq!(vec.distance(&key), expected);
        }
        Ok(())
    }

    #[test]
    fn test_preallocation() -> Result<()> {
        let config = SortedBucketConfig::with_capacity(0).min_density(4);
        let mut vec: SortedBucketVec<i64> = SortedBucketVec::with_config(config)?;
        assert!(vec.buckets[0].capacity() >= 2 * 4 + BUCKET_RESERVE_SLACK);
        for key in 0..20 {
            vec.insert(key);
        }
        assert!(vec.buckets[1].capacity() >= 2 * 4 + BUCKET_RESERVE_SLACK);

        let lean = SortedBucketConfig::memory_preset().preallocate_buckets(false);
        let vec: SortedBucketVec<i64> = SortedBucketVec::with_config(lean)?;
        assert_eq!(vec.buckets[0].capacity(), 0);
        Ok(())
    }

    #[test]
    fn test_huge_capacity_hint() -> Result<()> {
        let mut vec: SortedBucketVec<i64> = SortedBucketVec::with_capacity(usize::MAX);
        assert_eq!(vec.density(), MAX_DENSITY.min(isqrt(usize::MAX)));
        assert!(vec.buckets[0].capacity() >= MAX_BUCKET_RESERVE.min(2 * vec.density()));
        for key in [5, 1, 3] {
            vec.insert(key);
        }
        vec.change_capacity(usize::MAX);
        assert_eq!(collect(&vec), vec![1, 3, 5]);

        let config = SortedBucketConfig::with_capacity(usize::MAX);
        let vec: SortedBucketVec<i64> = SortedBucketVec::with_config(config)?;
        assert_eq!(vec.bucket_count(), 1);
        vec.check_invariants()
    }

    #[test]
    fn test_force_density_upper_bound() -> Result<()> {
        let mut vec = evens(10);
        vec.force_density(2)?;
        assert_eq!(
            vec.force_density(usize::MAX),
            Err(SortedBucketError::InvalidDensity {
                density: usize::MAX
            })
        );
        assert_eq!(vec.density(), 2);
        assert!(vec.force_density(MAX_DENSITY + 1).is_err());

        vec.force_density(MAX_DENSITY)?;
        assert_eq!(vec.bucket_count(), 1);
        vec.insert(7);
        assert_eq!(vec.len(), 11);
        vec.check_invariants()
    }

    #[test]
    fn test_prev_pos_rejects_stale_positions() -> Result<()> {
        let mut vec = evens(3);
        vec.force_density(1)?;
        assert_eq!(vec.prev_pos(VecPos { bucket: 99, offset: 5 }), None);
        assert_eq!(vec.prev_pos(VecPos { bucket: 0, offset: 50 }), None);

        let last = vec.bucket_count() - 1;
        let end = vec.end();
        assert_eq!(vec.prev_pos(VecPos { bucket: last + 1, offset: 0 }), None);
        let back = vec.prev_pos(end).map(|pos| vec.get(pos));
        assert_eq!(back, Some(Some(&4)));
        assert_eq!(vec.prev_pos(vec.begin()), None);
        Ok(())
    }

    #[test]
    fn test_log_layout() -> Result<()> {
        init_trace_logging();
        assert!(log::log_enabled!(log::Level::Trace));
        let mut vec = evens(20);
        vec.force_density(2)?;
        assert!(vec.bucket_count() > 1);
        vec.log_layout("evens");
        SortedBucketVec::<i64>::new().log_layout("empty");
        vec.check_invariants()
    }

    #[test]
    fn test_equal_keys_keep_insertion_order() -> Result<()> {
        let mut vec = SortedBucketVec::with_order(|a: &(i64, u32), b: &(i64, u32)| a.0.cmp(&b.0));
        vec.force_density(2)?;
        for tag in 0..12u32 {
            vec.insert((i64::from(tag % 3), tag));
        }
        vec.check_invariants()?;
        let tags: Vec<u32> = vec.iter().map(|&(_, tag)| tag).collect();
        assert_eq!(tags, vec![0, 3, 6, 9, 1, 4, 7, 10, 2, 5, 8, 11]);
        assert_eq!(vec.get(vec.find(&(1, 99))), Some(&(1, 1)));
        assert_eq!(vec.distance(&(2, 0)), Some(8));
        Ok(())
    }

    #[test]
    fn test_custom_order_and_debug() {
        let mut vec = SortedBucketVec::with_order(|a: &i64, b: &i64| b.cmp(a));
        for key in [3, 9, 1, 9] {
            vec.insert(key);
        }
        assert_eq!(collect(&vec), vec![9, 9, 3, 1]);
        assert_eq!(vec.distance(&1), Some(3));
        assert_eq!(format!("{:?}", vec), "[9, 9, 3, 1]");
        assert_eq!(vec.iter().rev().next(), Some(&1));
        assert_eq!(vec.iter().len(), 4);
    }
}
