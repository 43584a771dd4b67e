//! Bucketed linked multiset
//!
//! All elements sit on one doubly-linked chain stored in an arena. Buckets are
//! `(head, tail, len)` ranges over consecutive runs of that chain, so moving
//! elements between neighbouring buckets only moves a boundary. Slot 0 of the
//! arena is a permanent sentinel closing the chain; it is the `end()` position
//! and never holds a key.
//!
//! Element positions are arena handles and survive every insertion or erasure
//! of other elements, including bucket splits and merges.

use super::{bucket_density, KeyOrder, NaturalOrder, Rebalance, SortedMultiset};
use crate::config::sorted_bucket::{DEFAULT_MIN_DENSITY, MAX_DENSITY};
use crate::config::{Config, SortedBucketConfig};
use crate::error::{ensure, Result, SortedBucketError};
use std::fmt;

const NIL: u32 = u32::MAX;

/// Arena slot that closes the chain
const SENTINEL: u32 = 0;

const STRUCTURE: &str = "SortedBucketList";

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: u32,
    next: u32,
}

/// Range of the chain owned by one bucket; `head == NIL` when empty
#[derive(Debug, Clone, Copy)]
struct ListBucket {
    head: u32,
    tail: u32,
    len: usize,
}

impl ListBucket {
    const EMPTY: Self = Self {
        head: NIL,
        tail: NIL,
        len: 0,
    };
}

/// Stable handle to an element of a [`SortedBucketList`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListPos(u32);

impl ListPos {
    /// True for the past-the-end position
    pub fn is_end(self) -> bool {
        self.0 == SENTINEL
    }
}

/// Sorted multiset stored as buckets of linked elements.
///
/// Buckets hold between `density / 2` and `2 * density` elements, except the
/// last one which may be smaller. Equal keys keep their insertion order.
///
/// # Examples
///
/// ```rust
/// use sorted_bucket::SortedBucketList;
///
/// let mut list = SortedBucketList::new();
/// let pos = list.insert(10);
/// list.insert(4);
/// list.insert(10);
/// assert_eq!(list.get(pos), Some(&10));
/// assert_eq!(list.find_with_distance(&10).map(|(_, rank)| rank), Some(1));
/// assert_eq!(list.erase_all(&10), 2);
/// ```
#[derive(Clone)]
pub struct SortedBucketList<K, C = NaturalOrder> {
    links: Vec<Link>,
    keys: Vec<Option<K>>,
    free: Vec<u32>,
    buckets: Vec<ListBucket>,
    len: usize,
    density: usize,
    min_density: usize,
    order: C,
}

impl<K: Ord> SortedBucketList<K, NaturalOrder> {
    /// Create an empty list with the default minimum density
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty list tuned for `capacity` elements
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_order_and_density(
            NaturalOrder,
            bucket_density(capacity, DEFAULT_MIN_DENSITY),
            DEFAULT_MIN_DENSITY,
        )
    }

    /// Create an empty list from a validated configuration
    pub fn with_config(config: SortedBucketConfig) -> Result<Self> {
        Self::with_config_and_order(config, NaturalOrder)
    }
}

impl<K: Ord> Default for SortedBucketList<K, NaturalOrder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, C: KeyOrder<K>> SortedBucketList<K, C> {
    /// Create an empty list using a custom key order
    pub fn with_order(order: C) -> Self {
        Self::with_order_and_density(order, DEFAULT_MIN_DENSITY, DEFAULT_MIN_DENSITY)
    }

    /// Create an empty list from a configuration and a custom key order
    pub fn with_config_and_order(config: SortedBucketConfig, order: C) -> Result<Self> {
        config.validate()?;
        log::debug!(
            "Creating SortedBucketList with density {} for capacity {}",
            config.density(),
            config.expected_capacity
        );
        Ok(Self::with_order_and_density(
            order,
            config.density(),
            config.min_density,
        ))
    }

    fn with_order_and_density(order: C, density: usize, min_density: usize) -> Self {
        Self {
            links: vec![Link {
                prev: SENTINEL,
                next: SENTINEL,
            }],
            keys: vec![None],
            free: Vec::new(),
            buckets: vec![ListBucket::EMPTY],
            len: 0,
            density,
            min_density,
            order,
        }
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
        self.buckets.iter().map(|b| b.len).collect()
    }

    /// Remove every element, keeping the density
    pub fn clear(&mut self) {
        self.links.truncate(1);
        self.links[0] = Link {
            prev: SENTINEL,
            next: SENTINEL,
        };
        self.keys.truncate(1);
        self.free.clear();
        self.buckets.clear();
        self.buckets.push(ListBucket::EMPTY);
        self.len = 0;
    }

    /// Position of the smallest element
    #[inline]
    pub fn begin(&self) -> ListPos {
        ListPos(self.links[SENTINEL as usize].next)
    }

    /// Past-the-end position
    #[inline]
    pub fn end(&self) -> ListPos {
        ListPos(SENTINEL)
    }

    /// Element at `pos`, `None` for `end()`
    pub fn get(&self, pos: ListPos) -> Option<&K> {
        self.keys.get(pos.0 as usize).and_then(Option::as_ref)
    }

    /// Position after `pos`, `None` when `pos` is `end()`
    pub fn next_pos(&self, pos: ListPos) -> Option<ListPos> {
        self.get(pos)?;
        Some(ListPos(self.links[pos.0 as usize].next))
    }

    /// Position before `pos`, `None` when `pos` is `begin()`
    pub fn prev_pos(&self, pos: ListPos) -> Option<ListPos> {
        if pos.0 != SENTINEL {
            self.get(pos)?;
        }
        let prev = self.links.get(pos.0 as usize)?.prev;
        (prev != SENTINEL).then_some(ListPos(prev))
    }

    /// Smallest element
    pub fn front(&self) -> Option<&K> {
        self.get(self.begin())
    }

    /// Largest element
    pub fn back(&self) -> Option<&K> {
        self.get(ListPos(self.links[SENTINEL as usize].prev))
    }

    /// Insert `key` after any equal elements; returns its position
    ///
    /// # Panics
    ///
    /// Panics if the arena would need more than `u32::MAX - 1` slots.
    pub fn insert(&mut self, key: K) -> ListPos {
        let (mut bucket, mut at) = self.locate_upper(&key);
        if bucket == self.buckets.len() {
            // Append to the last bucket, right before the sentinel
            bucket -= 1;
            at = SENTINEL;
        }
        let node = self.alloc(key);
        self.link_before(node, at);

        let b = &mut self.buckets[bucket];
        if b.len == 0 {
            b.head = node;
            b.tail = node;
        } else if at == b.head {
            b.head = node;
        } else if at == SENTINEL {
            b.tail = node;
        }
        b.len += 1;
        self.len += 1;

        self.balance(bucket);
        ListPos(node)
    }

    /// Remove the first instance of `key`; returns 1 if removed, 0 if absent
    pub fn erase(&mut self, key: &K) -> usize {
        let (bucket, node) = self.locate_lower(key);
        if node == SENTINEL || !self.order.equal(self.key(node), key) {
            return 0;
        }
        self.remove_node(bucket, node);
        self.balance(bucket);
        1
    }

    /// Remove every instance of `key`; returns how many were removed
    pub fn erase_all(&mut self, key: &K) -> usize {
        let (first, mut node) = self.locate_lower(key);
        let mut bucket = first;
        let mut last = first;
        let mut removed = 0;
        while node != SENTINEL && self.order.equal(self.key(node), key) {
            let next = self.links[node as usize].next;
            let was_tail = self.buckets[bucket].tail == node;
            self.remove_node(bucket, node);
            last = bucket;
            removed += 1;
            node = next;
            if was_tail {
                bucket += 1;
            }
        }
        if removed > 0 {
            self.balance(last);
            if last != first {
                self.balance(first);
            }
        }
        removed
    }

    /// Position of the first instance of `key`, `end()` when absent
    pub fn find(&self, key: &K) -> ListPos {
        match self.find_with_distance(key) {
            Some((pos, _)) => pos,
            None => self.end(),
        }
    }

    /// Position and rank of the first instance of `key`
    pub fn find_with_distance(&self, key: &K) -> Option<(ListPos, usize)> {
        let bucket = self.bucket_lower(key);
        let b = self.buckets.get(bucket)?;
        let mut rank: usize = self.buckets[..bucket].iter().map(|b| b.len).sum();
        let mut node = b.head;
        while self.order.less(self.key(node), key) {
            node = self.links[node as usize].next;
            rank += 1;
        }
        self.order
            .equal(self.key(node), key)
            .then_some((ListPos(node), rank))
    }

    /// Rank (0-indexed) of the first instance of `key`, `None` when absent
    pub fn distance(&self, key: &K) -> Option<usize> {
        self.find_with_distance(key).map(|(_, rank)| rank)
    }

    /// True when `key` is stored
    pub fn contains(&self, key: &K) -> bool {
        !self.find(key).is_end()
    }

    /// First position whose element is not less than `key`
    pub fn lower_bound(&self, key: &K) -> ListPos {
        ListPos(self.locate_lower(key).1)
    }

    /// First position whose element is greater than `key`
    pub fn upper_bound(&self, key: &K) -> ListPos {
        ListPos(self.locate_upper(key).1)
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
    pub fn iter(&self) -> ListIter<'_, K, C> {
        let sentinel = self.links[SENTINEL as usize];
        ListIter {
            list: self,
            front: sentinel.next,
            back: sentinel.prev,
            remaining: self.len,
        }
    }

    /// Verify chain links, bucket bounds, ordering and size accounting
    pub fn check_invariants(&self) -> Result<()> {
        ensure(!self.buckets.is_empty(), STRUCTURE, || {
            "no bucket present".to_string()
        })?;
        ensure(self.keys[SENTINEL as usize].is_none(), STRUCTURE, || {
            "sentinel holds a key".to_string()
        })?;
        let last = self.buckets.len() - 1;
        let mut node = self.links[SENTINEL as usize].next;
        let mut prev = SENTINEL;
        let mut total = 0;
        let mut prev_key: Option<&K> = None;

        for (index, bucket) in self.buckets.iter().enumerate() {
            ensure(bucket.len > 0 || self.buckets.len() == 1, STRUCTURE, || {
                format!("bucket {} of {} is empty", index, self.buckets.len())
            })?;
            ensure(bucket.len <= 2 * self.density, STRUCTURE, || {
                format!(
                    "bucket {} holds {} > 2 * density {}",
                    index, bucket.len, self.density
                )
            })?;
            if index < last {
                ensure(bucket.len >= self.density / 2, STRUCTURE, || {
                    format!(
                        "bucket {} holds {} < density / 2 with density {}",
                        index, bucket.len, self.density
                    )
                })?;
            }
            if bucket.len == 0 {
                continue;
            }
            ensure(bucket.head == node, STRUCTURE, || {
                format!("bucket {} does not start where its predecessor ends", index)
            })?;
            for step in 0..bucket.len {
                ensure(node != SENTINEL, STRUCTURE, || {
                    format!("chain ends inside bucket {}", index)
                })?;
                ensure(self.links[node as usize].prev == prev, STRUCTURE, || {
                    format!("node {} has a broken back link", node)
                })?;
                let key = self.key(node);
                if let Some(prev_key) = prev_key {
                    ensure(!self.order.less(key, prev_key), STRUCTURE, || {
                        format!("bucket {} is out of order at step {}", index, step)
                    })?;
                }
                prev_key = Some(key);
                if step + 1 == bucket.len {
                    ensure(bucket.tail == node, STRUCTURE, || {
                        format!("bucket {} tail does not match its length", index)
                    })?;
                }
                prev = node;
                node = self.links[node as usize].next;
            }
            total += bucket.len;
        }
        ensure(node == SENTINEL, STRUCTURE, || {
            "chain continues past the last bucket".to_string()
        })?;
        ensure(self.links[SENTINEL as usize].prev == prev, STRUCTURE, || {
            "sentinel back link does not reach the last element".to_string()
        })?;
        ensure(total == self.len, STRUCTURE, || {
            format!("bucket sizes sum to {} but len is {}", total, self.len)
        })?;
        ensure(
            self.keys.len() - 1 - self.free.len() == self.len,
            STRUCTURE,
            || "arena slot accounting disagrees with len".to_string(),
        )
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
            let keys: Vec<&K> = self.bucket_nodes(bucket).map(|n| self.key(n)).collect();
            log::trace!("  bucket {}: {:?}", index, keys);
        }
    }

    // ---- internals ----

    #[inline]
    fn key(&self, node: u32) -> &K {
        match &self.keys[node as usize] {
            Some(key) => key,
            None => unreachable!("list node {} is vacant", node),
        }
    }

    fn bucket_nodes<'a>(&'a self, bucket: &ListBucket) -> impl Iterator<Item = u32> + 'a {
        let mut node = bucket.head;
        (0..bucket.len).map(move |_| {
            let current = node;
            node = self.links[current as usize].next;
            current
        })
    }

    /// First bucket whose tail is not less than `key`; `buckets.len()` if none
    fn bucket_lower(&self, key: &K) -> usize {
        if self.len == 0 {
            return self.buckets.len();
        }
        self.buckets
            .partition_point(|b| self.order.less(self.key(b.tail), key))
    }

    /// First bucket whose tail is greater than `key`; `buckets.len()` if none
    fn bucket_upper(&self, key: &K) -> usize {
        if self.len == 0 {
            return self.buckets.len();
        }
        self.buckets
            .partition_point(|b| !self.order.less(key, self.key(b.tail)))
    }

    fn locate_lower(&self, key: &K) -> (usize, u32) {
        let bucket = self.bucket_lower(key);
        let Some(b) = self.buckets.get(bucket) else {
            return (bucket, SENTINEL);
        };
        let mut node = b.head;
        while self.order.less(self.key(node), key) {
            node = self.links[node as usize].next;
        }
        (bucket, node)
    }

    fn locate_upper(&self, key: &K) -> (usize, u32) {
        let bucket = self.bucket_upper(key);
        let Some(b) = self.buckets.get(bucket) else {
            return (bucket, SENTINEL);
        };
        let mut node = b.head;
        while !self.order.less(key, self.key(node)) {
            node = self.links[node as usize].next;
        }
        (bucket, node)
    }

    fn alloc(&mut self, key: K) -> u32 {
        let unlinked = Link {
            prev: NIL,
            next: NIL,
        };
        match self.free.pop() {
            Some(slot) => {
                self.links[slot as usize] = unlinked;
                self.keys[slot as usize] = Some(key);
                slot
            }
            None => {
                assert!(
                    self.links.len() < NIL as usize,
                    "SortedBucketList arena exhausted"
                );
                self.links.push(unlinked);
                self.keys.push(Some(key));
                (self.links.len() - 1) as u32
            }
        }
    }

    fn link_before(&mut self, node: u32, at: u32) {
        let prev = self.links[at as usize].prev;
        self.links[node as usize] = Link { prev, next: at };
        self.links[prev as usize].next = node;
        self.links[at as usize].prev = node;
    }

    /// Unlink `node` from the chain and from `bucket`, freeing its slot
    fn remove_node(&mut self, bucket: usize, node: u32) {
        let Link { prev, next } = self.links[node as usize];
        let b = &mut self.buckets[bucket];
        if b.len == 1 {
            *b = ListBucket::EMPTY;
        } else {
            if b.head == node {
                b.head = next;
            }
            if b.tail == node {
                b.tail = prev;
            }
            b.len -= 1;
        }
        self.links[prev as usize].next = next;
        self.links[next as usize].prev = prev;
        self.keys[node as usize] = None;
        self.free.push(node);
        self.len -= 1;
    }

    /// Walk `steps` links forward from `node`
    fn advance(&self, mut node: u32, steps: usize) -> u32 {
        for _ in 0..steps {
            node = self.links[node as usize].next;
        }
        node
    }

    /// Bring bucket `index` back within `[density / 2, 2 * density]`.
    ///
    /// Empty buckets directly after it are dropped first. The last bucket is
    /// exempt from the lower bound but is removed once empty unless it is the
    /// only bucket.
    fn balance(&mut self, index: usize) -> Rebalance {
        if index >= self.buckets.len() {
            return Rebalance::Unchanged;
        }
        while index + 1 < self.buckets.len() && self.buckets[index + 1].len == 0 {
            self.buckets.remove(index + 1);
        }

        let density = self.density;
        let len = self.buckets[index].len;
        if len > 2 * density {
            let bucket = self.buckets[index];
            let mid = self.advance(bucket.head, density);
            let right = ListBucket {
                head: mid,
                tail: bucket.tail,
                len: len - density,
            };
            self.buckets[index].tail = self.links[mid as usize].prev;
            self.buckets[index].len = density;
            self.buckets.insert(index + 1, right);
            log::trace!("Split list bucket {} at {} of {}", index, density, len);
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

        let next = self.buckets[index + 1];
        if len + next.len > 2 * density {
            let desired = (next.len - len) / 2;
            let new_tail = self.advance(next.head, desired - 1);
            let b = &mut self.buckets[index];
            if b.len == 0 {
                b.head = next.head;
            }
            b.tail = new_tail;
            b.len += desired;
            let n = &mut self.buckets[index + 1];
            n.head = self.links[new_tail as usize].next;
            n.len -= desired;
            log::trace!("List bucket {} borrowed {} from its neighbour", index, desired);
            Rebalance::Borrowed
        } else {
            let bucket = self.buckets.remove(index);
            if bucket.len > 0 {
                let n = &mut self.buckets[index];
                n.head = bucket.head;
                n.len += bucket.len;
            }
            log::trace!("Merged list bucket {} into its neighbour", index);
            Rebalance::Merged
        }
    }

    fn rebalance_all(&mut self) {
        log::debug!(
            "Rebalancing {} list buckets for density {}",
            self.buckets.len(),
            self.density
        );
        let mut index = 0;
        while index < self.buckets.len() {
            match self.balance(index) {
                // Buckets shifted down, or the borrower may now need a split
                Rebalance::Merged | Rebalance::Borrowed => {}
                Rebalance::Split | Rebalance::Unchanged => index += 1,
            }
        }
    }
}

impl<K: fmt::Debug, C: KeyOrder<K>> fmt::Debug for SortedBucketList<K, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<K: Ord> FromIterator<K> for SortedBucketList<K, NaturalOrder> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        let mut list = Self::new();
        list.extend(iter);
        list
    }
}

impl<K, C: KeyOrder<K>> Extend<K> for SortedBucketList<K, C> {
    fn extend<I: IntoIterator<Item = K>>(&mut self, iter: I) {
        for key in iter {
            self.insert(key);
        }
    }
}

impl<'a, K, C: KeyOrder<K>> IntoIterator for &'a SortedBucketList<K, C> {
    type Item = &'a K;
    type IntoIter = ListIter<'a, K, C>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Sorted iterator over a [`SortedBucketList`]
pub struct ListIter<'a, K, C = NaturalOrder> {
    list: &'a SortedBucketList<K, C>,
    front: u32,
    back: u32,
    remaining: usize,
}

impl<'a, K, C: KeyOrder<K>> Iterator for ListIter<'a, K, C> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.front;
        self.front = self.list.links[node as usize].next;
        self.remaining -= 1;
        Some(self.list.key(node))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K, C: KeyOrder<K>> DoubleEndedIterator for ListIter<'a, K, C> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.back;
        self.back = self.list.links[node as usize].prev;
        self.remaining -= 1;
        Some(self.list.key(node))
    }
}

impl<'a, K, C: KeyOrder<K>> ExactSizeIterator for ListIter<'a, K, C> {}

impl<K, C: KeyOrder<K>> SortedMultiset<K> for SortedBucketList<K, C> {
    type Pos = ListPos;
    type Iter<'a> = ListIter<'a, K, C> where Self: 'a, K: 'a;

    fn len(&self) -> usize {
        SortedBucketList::len(self)
    }

    fn clear(&mut self) {
        SortedBucketList::clear(self)
    }

    fn begin(&self) -> ListPos {
        SortedBucketList::begin(self)
    }

    fn end(&self) -> ListPos {
        SortedBucketList::end(self)
    }

    fn get(&self, pos: ListPos) -> Option<&K> {
        SortedBucketList::get(self, pos)
    }

    fn next_pos(&self, pos: ListPos) -> Option<ListPos> {
        SortedBucketList::next_pos(self, pos)
    }

    fn prev_pos(&self, pos: ListPos) -> Option<ListPos> {
        SortedBucketList::prev_pos(self, pos)
    }

    fn insert(&mut self, key: K) -> ListPos {
        SortedBucketList::insert(self, key)
    }

    fn erase(&mut self, key: &K) -> usize {
        SortedBucketList::erase(self, key)
    }

    fn erase_all(&mut self, key: &K) -> usize {
        SortedBucketList::erase_all(self, key)
    }

    fn find(&self, key: &K) -> ListPos {
        SortedBucketList::find(self, key)
    }

    fn find_with_distance(&self, key: &K) -> Option<(ListPos, usize)> {
        SortedBucketList::find_with_distance(self, key)
    }

    fn lower_bound(&self, key: &K) -> ListPos {
        SortedBucketList::lower_bound(self, key)
    }

    fn upper_bound(&self, key: &K) -> ListPos {
        SortedBucketList::upper_bound(self, key)
    }

    fn change_capacity(&mut self, capacity: usize) {
        SortedBucketList::change_capacity(self, capacity)
    }

    fn iter(&self) -> ListIter<'_, K, C> {
        SortedBucketList::iter(self)
    }

    fn back(&self) -> Option<&K> {
        SortedBucketList::back(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::sorted::{init_trace_logging, isqrt};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn collect<C: KeyOrder<i64>>(list: &SortedBucketList<i64, C>) -> Vec<i64> {
        list.iter().copied().collect()
    }

    fn evens(n: i64) -> SortedBucketList<i64> {
        (0..n).map(|i| i * 2).collect()
    }

    #[test]
    fn test_empty_list() -> Result<()> {
        let list: SortedBucketList<i64> = SortedBucketList::new();
        assert!(list.is_empty());
        assert_eq!(list.begin(), list.end());
        assert_eq!(list.get(list.end()), None);
        assert_eq!(list.distance(&1), None);
        assert_eq!(list.lower_bound(&1), list.end());
        assert_eq!(list.upper_bound(&1), list.end());
        assert_eq!(list.prev_pos(list.end()), None);
        assert_eq!(list.next_pos(list.end()), None);
        assert_eq!(list.bucket_count(), 1);
        assert_eq!(list.density(), DEFAULT_MIN_DENSITY);
        list.check_invariants()
    }

    #[test]
    fn test_equal_keys_keep_insertion_order() {
        let mut list = SortedBucketList::with_order(|a: &(i64, u8), b: &(i64, u8)| a.0.cmp(&b.0));
        list.insert((2, 0));
        list.insert((1, 0));
        list.insert((2, 1));
        list.insert((2, 2));
        list.insert((1, 1));
        let tags: Vec<(i64, u8)> = list.iter().copied().collect();
        assert_eq!(tags, vec![(1, 0), (1, 1), (2, 0), (2, 1), (2, 2)]);
        assert_eq!(list.find(&(2, 9)), list.lower_bound(&(2, 0)));
        assert_eq!(list.get(list.find(&(2, 9))), Some(&(2, 0)));
    }

    #[test]
    fn test_force_density_splits() -> Result<()> {
        let mut list = evens(20);
        assert_eq!(list.bucket_count(), 1);
        list.force_density(4)?;
        assert_eq!(list.bucket_sizes(), vec![4, 4, 4, 8]);
        list.check_invariants()?;

        assert_eq!(list.erase(&10), 1);
        list.check_invariants()?;
        let sizes = list.bucket_sizes();
        for &size in &sizes[..sizes.len() - 1] {
            assert!((2..=8).contains(&size), "bucket sizes {:?}", sizes);
        }
        assert_eq!(list.len(), 19);
        Ok(())
    }

    #[test]
    fn test_force_density_rejects_zero() {
        let mut list = evens(3);
        assert_eq!(
            list.force_density(0),
            Err(SortedBucketError::InvalidDensity { density: 0 })
        );
        assert_eq!(list.density(), DEFAULT_MIN_DENSITY);
    }

    #[test]
    fn test_density_growth_merges_everything() -> Result<()> {
        let mut list = evens(40);
        list.force_density(2)?;
        assert!(list.bucket_count() > 5);
        list.check_invariants()?;
        list.change_capacity(0);
        assert_eq!(list.bucket_count(), 1);
        assert_eq!(collect(&list), (0..40).map(|i| i * 2).collect::<Vec<_>>());
        list.check_invariants()
    }

    #[test]
    fn test_undersized_bucket_borrows() -> Result<()> {
        let mut list = evens(40);
        list.force_density(8)?;
        assert_eq!(list.bucket_sizes(), vec![8, 8, 8, 16]);
        for key in (18..=78).step_by(2) {
            list.insert(key + 1);
        }
        list.check_invariants()?;
        // Shrink the first bucket below density / 2 while its neighbour is large
        for key in [0, 2, 4, 6, 8] {
            list.erase(&key);
            list.check_invariants()?;
        }
        assert!(list.bucket_sizes()[0] >= 4);
        Ok(())
    }

    #[test]
    fn test_erase_all_spanning_buckets() -> Result<()> {
        let mut list = SortedBucketList::new();
        list.force_density(2)?;
        for key in [1i64, 2, 3, 3, 3, 3, 3, 3, 3, 3, 3, 4, 5, 6] {
            list.insert(key);
            list.check_invariants()?;
        }
        assert!(list.bucket_count() >= 3);
        assert_eq!(list.erase_all(&3), 9);
        list.check_invariants()?;
        assert_eq!(collect(&list), vec![1, 2, 4, 5, 6]);
        assert_eq!(list.erase_all(&3), 0);
        assert_eq!(list.distance(&4), Some(2));

        assert_eq!(list.erase_all(&6), 1);
        assert_eq!(list.erase_all(&1), 1);
        list.check_invariants()?;
        assert_eq!(collect(&list), vec![2, 4, 5]);
        Ok(())
    }

    #[test]
    fn test_positions_are_stable() -> Result<()> {
        let mut list = SortedBucketList::new();
        list.force_density(2)?;
        let held = list.insert(50i64);
        for key in 0..40 {
            list.insert(key * 3);
        }
        for key in 20..40 {
            list.erase(&(key * 3));
        }
        list.check_invariants()?;
        assert_eq!(list.get(held), Some(&50));
        assert_eq!(list.get(list.next_pos(held).unwrap()), Some(&51));
        assert_eq!(list.get(list.prev_pos(held).unwrap()), Some(&48));
        Ok(())
    }

    #[test]
    fn test_bounds_and_cursor() {
        let list: SortedBucketList<i64> = [10, 20, 20, 30].into_iter().collect();
        assert_eq!(list.get(list.lower_bound(&20)), Some(&20));
        assert_eq!(list.get(list.upper_bound(&20)), Some(&30));
        assert_eq!(list.upper_bound(&30), list.end());
        assert_eq!(list.get(list.prev_pos(list.end()).unwrap()), Some(&30));
        assert_eq!(list.prev_pos(list.begin()), None);
        assert_eq!(list.front(), Some(&10));
        assert_eq!(list.back(), Some(&30));
        assert_eq!(list.iter().rev().copied().collect::<Vec<_>>(), vec![30, 20, 20, 10]);
        assert_eq!(format!("{:?}", list), "[10, 20, 20, 30]");
    }

    #[test]
    fn test_random_operations_against_reference() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(0x1157);
        let mut list = SortedBucketList::new();
        list.force_density(3)?;
        let mut reference: Vec<i64> = Vec::new();

        for step in 0..3_000 {
            let key = rng.gen_range(0..120i64);
            match rng.gen_range(0..10) {
                0..=5 => {
                    let pos = list.insert(key);
                    assert_eq!(list.get(pos), Some(&key));
                    let at = reference.partition_point(|&k| k <= key);
                    reference.insert(at, key);
                }
                6..=8 => {
                    let expected = reference.binary_search(&key).is_ok();
                    assert_eq!(list.erase(&key), usize::from(expected));
                    if let Ok(idx) = reference.binary_search(&key) {
                        reference.remove(idx);
                    }
                }
                _ => {
                    let before = reference.len();
                    reference.retain(|&k| k != key);
                    assert_eq!(list.erase_all(&key), before - reference.len());
                }
            }
            if step % 50 == 0 {
                list.check_invariants()?;
            }
        }
        list.check_invariants()?;
        assert_eq!(collect(&list), reference);
        for key in 0..120i64 {
            let expected = reference
                .binary_search(&key)
                .ok()
                .map(|_| reference.partition_point(|&k| k < key));
            assert_eq!(list.distance(&key), expected);
        }
        Ok(())
    }

    #[test]
    fn test_clear_and_reuse() -> Result<()> {
        let mut list = evens(30);
        list.force_density(4)?;
        list.clear();
        assert!(list.is_empty());
        assert_eq!(list.bucket_count(), 1);
        list.check_invariants()?;
        list.insert(7);
        assert_eq!(collect(&list), vec![7]);
        list.check_invariants()
    }

    #[test]
    fn test_huge_capacity_hint() -> Result<()> {
        let mut list: SortedBucketList<i64> = SortedBucketList::with_capacity(usize::MAX);
        assert_eq!(list.density(), MAX_DENSITY.min(isqrt(usize::MAX)));
        for key in [5, 1, 3] {
            list.insert(key);
        }
        list.change_capacity(usize::MAX);
        assert_eq!(collect(&list), vec![1, 3, 5]);

        let config = SortedBucketConfig::with_capacity(usize::MAX);
        let list: SortedBucketList<i64> = SortedBucketList::with_config(config)?;
        assert_eq!(list.bucket_count(), 1);
        list.check_invariants()
    }

    #[test]
    fn test_force_density_upper_bound() -> Result<()> {
        let mut list = evens(10);
        list.force_density(2)?;
        assert_eq!(
            list.force_density(usize::MAX),
            Err(SortedBucketError::InvalidDensity {
                density: usize::MAX
            })
        );
        assert_eq!(list.density(), 2);
        assert!(list.force_density(MAX_DENSITY + 1).is_err());

        list.force_density(MAX_DENSITY)?;
        assert_eq!(list.bucket_count(), 1);
        list.insert(7);
        assert_eq!(list.len(), 11);
        list.check_invariants()
    }

    #[test]
    fn test_log_layout() -> Result<()> {
        init_trace_logging();
        assert!(log::log_enabled!(log::Level::Trace));
        let mut list = evens(20);
        list.force_density(2)?;
        assert!(list.bucket_count() > 1);
        list.log_layout("evens");
        SortedBucketList::<i64>::new().log_layout("empty");
        list.check_invariants()
    }

    #[test]
    fn test_with_config() -> Result<()> {
        let config = SortedBucketConfig::with_capacity(1_000_000).min_density(8);
        let mut list: SortedBucketList<i64> = SortedBucketList::with_config(config)?;
        assert_eq!(list.density(), 1_000);
        list.change_capacity(16);
        assert_eq!(list.density(), 8);
        Ok(())
    }
}
