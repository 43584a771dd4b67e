//! Weighted red-black tree multiset
//!
//! Every node carries the number of equal keys it stands for (`copies`) and the
//! total number of keys in its subtree (`mass`). Mass turns the tree into an
//! order-statistics tree: the rank of a key is the sum of left-subtree masses
//! and copies passed while descending to it.
//!
//! Nodes live in an arena addressed by `u32` indices. Parent links are plain
//! indices, `NIL` stands for an absent child and doubles as the past-the-end
//! position. Erasing a node with two children swaps the *positions* of the node
//! and its in-order successor rather than their keys, so a [`TreePos`] keeps
//! pointing at the same key until that key itself is erased.
//!
//! Time complexities:
//!
//! | operation | cost |
//! |---|---|
//! | find / distance / bounds | O(log n) |
//! | insert / erase | O(log n) |
//! | erase_all | O(log n) |
//! | begin / end | O(1) |

use super::{KeyOrder, NaturalOrder, SortedMultiset};
use crate::config::sorted_bucket::MAX_NODE_RESERVE;
use crate::config::{Config, SortedBucketConfig};
use crate::error::{ensure, Result};
use std::cmp::Ordering;
use std::fmt;

/// Absent child / parent and past-the-end marker
const NIL: u32 = u32::MAX;

const STRUCTURE: &str = "SortedBucketTree";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

/// Link and weight data of one arena slot
#[derive(Debug, Clone, Copy)]
struct Node {
    parent: u32,
    left: u32,
    right: u32,
    /// Keys in this subtree, own copies included
    mass: usize,
    /// Equal keys coalesced into this node
    copies: usize,
    color: Color,
}

impl Node {
    fn new(parent: u32, color: Color, copies: usize) -> Self {
        Self {
            parent,
            left: NIL,
            right: NIL,
            mass: copies,
            copies,
            color,
        }
    }
}

/// Position of a node in a [`SortedBucketTree`].
///
/// Stays valid until the key it refers to is erased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreePos(u32);

impl TreePos {
    /// True for the past-the-end position
    pub fn is_end(self) -> bool {
        self.0 == NIL
    }
}

/// Sorted multiset backed by a red-black tree with subtree mass.
///
/// # Examples
///
/// ```rust
/// use sorted_bucket::SortedBucketTree;
///
/// let mut tree = SortedBucketTree::new();
/// tree.insert_copies(7, 3);
/// tree.insert(2);
/// assert_eq!(tree.len(), 4);
/// assert_eq!(tree.distance(&7), Some(1));
/// assert_eq!(tree.erase(&7), 1);
/// assert_eq!(tree.iter().copied().collect::<Vec<_>>(), vec![2, 7, 7]);
/// ```
#[derive(Clone)]
pub struct SortedBucketTree<K, C = NaturalOrder> {
    nodes: Vec<Node>,
    keys: Vec<Option<K>>,
    free: Vec<u32>,
    root: u32,
    /// Cached minimum for O(1) `begin`
    leftmost: u32,
    /// Cached maximum for O(1) `prev_pos(end)`
    rightmost: u32,
    len: usize,
    node_count: usize,
    order: C,
}

impl<K: Ord> SortedBucketTree<K, NaturalOrder> {
    /// Create an empty tree ordered by `Ord`
    pub fn new() -> Self {
        Self::with_order(NaturalOrder)
    }

    /// Create an empty tree with node storage reserved for `capacity` keys
    pub fn with_capacity(capacity: usize) -> Self {
        let mut tree = Self::new();
        tree.change_capacity(capacity);
        tree
    }

    /// Create an empty tree from a validated configuration
    pub fn with_config(config: SortedBucketConfig) -> Result<Self> {
        Self::with_config_and_order(config, NaturalOrder)
    }
}

impl<K: Ord> Default for SortedBucketTree<K, NaturalOrder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, C: KeyOrder<K>> SortedBucketTree<K, C> {
    /// Create an empty tree using a custom key order
    pub fn with_order(order: C) -> Self {
        Self {
            nodes: Vec::new(),
            keys: Vec::new(),
            free: Vec::new(),
            root: NIL,
            leftmost: NIL,
            rightmost: NIL,
            len: 0,
            node_count: 0,
            order,
        }
    }

    /// Create an empty tree from a configuration and a custom key order
    pub fn with_config_and_order(config: SortedBucketConfig, order: C) -> Result<Self> {
        config.validate()?;
        log::debug!(
            "Creating SortedBucketTree with expected capacity {}",
            config.expected_capacity
        );
        let mut tree = Self::with_order(order);
        tree.change_capacity(config.expected_capacity);
        Ok(tree)
    }

    /// Number of keys, counting copies
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no key is stored
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of distinct keys (tree nodes)
    #[inline]
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// The key order in use
    pub fn order(&self) -> &C {
        &self.order
    }

    /// Remove every key
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.keys.clear();
        self.free.clear();
        self.root = NIL;
        self.leftmost = NIL;
        self.rightmost = NIL;
        self.len = 0;
        self.node_count = 0;
    }

    /// Reserve node storage for `capacity` distinct keys.
    ///
    /// The hint is advisory: at most [`MAX_NODE_RESERVE`] nodes are reserved up
    /// front and a failed reservation leaves the tree to grow on demand.
    pub fn change_capacity(&mut self, capacity: usize) {
        let additional = capacity
            .min(MAX_NODE_RESERVE)
            .saturating_sub(self.node_count);
        if self.nodes.try_reserve(additional).is_err()
            || self.keys.try_reserve(additional).is_err()
        {
            log::debug!("Skipped reserving {} tree nodes", additional);
        }
    }

    /// Position of the smallest key
    #[inline]
    pub fn begin(&self) -> TreePos {
        TreePos(self.leftmost)
    }

    /// Past-the-end position
    #[inline]
    pub fn end(&self) -> TreePos {
        TreePos(NIL)
    }

    /// Key at `pos`, `None` for `end()`
    pub fn get(&self, pos: TreePos) -> Option<&K> {
        self.keys.get(pos.0 as usize).and_then(Option::as_ref)
    }

    /// Number of copies stored at `pos`, 0 for `end()`
    pub fn copies_at(&self, pos: TreePos) -> usize {
        match self.get(pos) {
            Some(_) => self.nodes[pos.0 as usize].copies,
            None => 0,
        }
    }

    /// Position of the next distinct key, `None` when `pos` is `end()`
    pub fn next_pos(&self, pos: TreePos) -> Option<TreePos> {
        if self.get(pos).is_none() {
            return None;
        }
        Some(TreePos(self.successor(pos.0)))
    }

    /// Position of the previous distinct key, `None` when `pos` is `begin()`
    pub fn prev_pos(&self, pos: TreePos) -> Option<TreePos> {
        if pos.0 == NIL {
            return (self.rightmost != NIL).then_some(TreePos(self.rightmost));
        }
        self.get(pos)?;
        let prev = self.predecessor(pos.0);
        (prev != NIL).then_some(TreePos(prev))
    }

    /// Smallest key
    pub fn front(&self) -> Option<&K> {
        self.get(TreePos(self.leftmost))
    }

    /// Largest key
    pub fn back(&self) -> Option<&K> {
        self.get(TreePos(self.rightmost))
    }

    /// Insert one copy of `key`; returns its position
    pub fn insert(&mut self, key: K) -> TreePos {
        self.insert_copies(key, 1).0
    }

    /// Insert `copies` copies of `key`.
    ///
    /// Returns the key's position and the rank of its first occurrence. Equal
    /// keys are merged into the existing node without structural change.
    /// `copies == 0` inserts nothing.
    ///
    /// # Panics
    ///
    /// Panics if the arena would need more than `u32::MAX - 1` nodes.
    pub fn insert_copies(&mut self, key: K, copies: usize) -> (TreePos, usize) {
        if copies == 0 {
            return match self.find_node(&key) {
                Some((node, rank)) => (TreePos(node), rank),
                None => (self.end(), self.len),
            };
        }
        self.len += copies;
        if self.root == NIL {
            let node = self.alloc(key, NIL, Color::Black, copies);
            self.root = node;
            self.leftmost = node;
            self.rightmost = node;
            return (TreePos(node), 0);
        }

        let mut rank = 0;
        let mut cur = self.root;
        loop {
            // Rolled forward on the way down: every path ends in a terminal case
            self.nodes[cur as usize].mass += copies;
            let Node { left, right, .. } = self.nodes[cur as usize];
            match self.order.compare(&key, self.key(cur)) {
                Ordering::Equal => {
                    self.nodes[cur as usize].copies += copies;
                    return (TreePos(cur), rank + self.mass(left));
                }
                Ordering::Less => {
                    if left == NIL {
                        let node = self.alloc(key, cur, Color::Red, copies);
                        self.nodes[cur as usize].left = node;
                        if cur == self.leftmost {
                            self.leftmost = node;
                        }
                        self.fix_double_red(node);
                        return (TreePos(node), rank);
                    }
                    cur = left;
                }
                Ordering::Greater => {
                    rank += self.mass(left) + self.nodes[cur as usize].copies;
                    if right == NIL {
                        let node = self.alloc(key, cur, Color::Red, copies);
                        self.nodes[cur as usize].right = node;
                        if cur == self.rightmost {
                            self.rightmost = node;
                        }
                        self.fix_double_red(node);
                        return (TreePos(node), rank);
                    }
                    cur = right;
                }
            }
        }
    }

    /// Insert `copies` copies of every key yielded by `keys`
    pub fn insert_copies_iter<I: IntoIterator<Item = K>>(&mut self, keys: I, copies: usize) {
        for key in keys {
            self.insert_copies(key, copies);
        }
    }

    /// Remove one copy of `key`; returns 1 if removed, 0 if absent
    pub fn erase(&mut self, key: &K) -> usize {
        let Some((node, _)) = self.find_node(key) else {
            return 0;
        };
        if self.nodes[node as usize].copies > 1 {
            self.nodes[node as usize].copies -= 1;
            self.add_mass_to_root(node, -1);
            self.len -= 1;
            return 1;
        }
        self.erase_all_at(TreePos(node))
    }

    /// Remove every copy of `key`; returns how many were removed
    pub fn erase_all(&mut self, key: &K) -> usize {
        match self.find_node(key) {
            Some((node, _)) => self.erase_all_at(TreePos(node)),
            None => 0,
        }
    }

    /// Remove the node at `pos` with all its copies; returns how many were removed.
    ///
    /// Other positions stay valid. `end()` removes nothing.
    pub fn erase_all_at(&mut self, pos: TreePos) -> usize {
        if self.get(pos).is_none() {
            return 0;
        }
        let z = pos.0;
        let removed = self.nodes[z as usize].copies;

        if z == self.leftmost {
            self.leftmost = self.successor(z);
        }
        if z == self.rightmost {
            self.rightmost = self.predecessor(z);
        }

        if self.left(z) != NIL && self.right(z) != NIL {
            let succ = self.subtree_min(self.right(z));
            self.swap_positions(z, succ);
        }

        // z now has at most one child
        let Node {
            parent,
            left,
            right,
            color,
            ..
        } = self.nodes[z as usize];
        let child = if left != NIL { left } else { right };

        let mut ancestor = parent;
        while ancestor != NIL {
            self.nodes[ancestor as usize].mass -= removed;
            ancestor = self.nodes[ancestor as usize].parent;
        }

        if child != NIL {
            self.nodes[child as usize].parent = parent;
        }
        self.replace_child(parent, z, child);

        if color == Color::Black {
            if self.is_red(child) {
                self.nodes[child as usize].color = Color::Black;
            } else {
                self.fix_double_black(child, parent);
            }
        }

        self.len -= removed;
        self.dealloc(z);
        removed
    }

    /// Position of `key`, `end()` when absent
    pub fn find(&self, key: &K) -> TreePos {
        match self.find_node(key) {
            Some((node, _)) => TreePos(node),
            None => self.end(),
        }
    }

    /// Position of `key` and the rank of its first occurrence
    pub fn find_with_distance(&self, key: &K) -> Option<(TreePos, usize)> {
        self.find_node(key).map(|(node, rank)| (TreePos(node), rank))
    }

    /// Rank (0-indexed) of the first occurrence of `key`, `None` when absent
    pub fn distance(&self, key: &K) -> Option<usize> {
        self.find_node(key).map(|(_, rank)| rank)
    }

    /// True when `key` is stored
    pub fn contains(&self, key: &K) -> bool {
        self.find_node(key).is_some()
    }

    /// Number of copies of `key`
    pub fn count(&self, key: &K) -> usize {
        self.find_node(key)
            .map_or(0, |(node, _)| self.nodes[node as usize].copies)
    }

    /// First position whose key is not less than `key`
    pub fn lower_bound(&self, key: &K) -> TreePos {
        let mut result = NIL;
        let mut cur = self.root;
        while cur != NIL {
            if self.order.less(self.key(cur), key) {
                cur = self.right(cur);
            } else {
                result = cur;
                cur = self.left(cur);
            }
        }
        TreePos(result)
    }

    /// First position whose key is greater than `key`
    pub fn upper_bound(&self, key: &K) -> TreePos {
        let mut result = NIL;
        let mut cur = self.root;
        while cur != NIL {
            if self.order.less(key, self.key(cur)) {
                result = cur;
                cur = self.left(cur);
            } else {
                cur = self.right(cur);
            }
        }
        TreePos(result)
    }

    /// Iterate every key in sorted order, each copy yielded separately
    pub fn iter(&self) -> TreeIter<'_, K, C> {
        TreeIter {
            tree: self,
            front: self.leftmost,
            front_used: 0,
            back: self.rightmost,
            back_used: 0,
            remaining: self.len,
        }
    }

    /// Iterate `(key, copies)` pairs, one per distinct key
    pub fn entries(&self) -> TreeEntries<'_, K, C> {
        TreeEntries {
            tree: self,
            front: self.leftmost,
            back: self.rightmost,
            remaining: self.node_count,
        }
    }

    /// Number of black nodes on every root-to-leaf path
    pub fn black_height(&self) -> usize {
        let mut height = 0;
        let mut cur = self.root;
        while cur != NIL {
            if self.nodes[cur as usize].color == Color::Black {
                height += 1;
            }
            cur = self.left(cur);
        }
        height
    }

    /// Number of nodes on the longest root-to-leaf path
    pub fn height(&self) -> usize {
        let mut max = 0;
        let mut stack = Vec::new();
        if self.root != NIL {
            stack.push((self.root, 1));
        }
        while let Some((node, depth)) = stack.pop() {
            max = max.max(depth);
            for child in [self.left(node), self.right(node)] {
                if child != NIL {
                    stack.push((child, depth + 1));
                }
            }
        }
        max
    }

    /// True when the root is black (or the tree is empty)
    pub fn root_is_black(&self) -> bool {
        !self.is_red(self.root)
    }

    /// Verify ordering, coloring, mass and cache invariants
    pub fn check_invariants(&self) -> Result<()> {
        ensure((self.root == NIL) == (self.len == 0), STRUCTURE, || {
            format!("root {} inconsistent with len {}", self.root, self.len)
        })?;
        ensure(
            self.node_count + self.free.len() == self.nodes.len(),
            STRUCTURE,
            || {
                format!(
                    "{} live + {} free nodes != {} slots",
                    self.node_count,
                    self.free.len(),
                    self.nodes.len()
                )
            },
        )?;
        if self.root == NIL {
            ensure(
                self.leftmost == NIL && self.rightmost == NIL,
                STRUCTURE,
                || "empty tree caches a leftmost or rightmost node".to_string(),
            )?;
            return Ok(());
        }
        ensure(!self.is_red(self.root), STRUCTURE, || "root is red".to_string())?;
        ensure(self.parent(self.root) == NIL, STRUCTURE, || {
            "root has a parent".to_string()
        })?;
        ensure(self.mass(self.root) == self.len, STRUCTURE, || {
            format!("root mass {} != len {}", self.mass(self.root), self.len)
        })?;
        ensure(
            self.leftmost == self.subtree_min(self.root),
            STRUCTURE,
            || "cached leftmost is not the minimum".to_string(),
        )?;
        ensure(
            self.rightmost == self.subtree_max(self.root),
            STRUCTURE,
            || "cached rightmost is not the maximum".to_string(),
        )?;

        let mut visited = 0;
        self.check_subtree(self.root, &mut visited)?;
        ensure(visited == self.node_count, STRUCTURE, || {
            format!("reached {} nodes, expected {}", visited, self.node_count)
        })?;

        let mut prev: Option<&K> = None;
        for (key, _) in self.entries() {
            if let Some(prev) = prev {
                ensure(self.order.less(prev, key), STRUCTURE, || {
                    "in-order keys are not strictly increasing".to_string()
                })?;
            }
            prev = Some(key);
        }
        Ok(())
    }

    /// Returns the black height of the subtree rooted at `node`
    fn check_subtree(&self, node: u32, visited: &mut usize) -> Result<usize> {
        if node == NIL {
            return Ok(0);
        }
        *visited += 1;
        let Node {
            left,
            right,
            mass,
            copies,
            color,
            ..
        } = self.nodes[node as usize];
        ensure(self.keys[node as usize].is_some(), STRUCTURE, || {
            format!("node {} is linked but vacant", node)
        })?;
        ensure(copies > 0, STRUCTURE, || format!("node {} has no copies", node))?;
        ensure(
            mass == copies + self.mass(left) + self.mass(right),
            STRUCTURE,
            || format!("node {} mass {} does not match its children", node, mass),
        )?;
        for child in [left, right] {
            if child != NIL {
                ensure(self.parent(child) == node, STRUCTURE, || {
                    format!("child {} does not point back to {}", child, node)
                })?;
                ensure(
                    !(color == Color::Red && self.is_red(child)),
                    STRUCTURE,
                    || format!("red node {} has red child {}", node, child),
                )?;
            }
        }
        let left_height = self.check_subtree(left, visited)?;
        let right_height = self.check_subtree(right, visited)?;
        ensure(left_height == right_height, STRUCTURE, || {
            format!(
                "black height mismatch under {}: {} vs {}",
                node, left_height, right_height
            )
        })?;
        Ok(left_height + usize::from(color == Color::Black))
    }

    /// Dump the tree level by level at trace level
    pub fn log_layout(&self, name: &str)
    where
        K: fmt::Debug,
    {
        if !log::log_enabled!(log::Level::Trace) {
            return;
        }
        log::trace!("{} with len = {}, nodes = {}", name, self.len, self.node_count);
        let mut level = vec![self.root];
        let mut depth = 0;
        while level.iter().any(|&n| n != NIL) {
            let mut next = Vec::with_capacity(level.len() * 2);
            for &node in level.iter().filter(|&&n| n != NIL) {
                let n = &self.nodes[node as usize];
                log::trace!(
                    "  depth {}: {:?} mass = {} copies = {} {:?}",
                    depth,
                    self.key(node),
                    n.mass,
                    n.copies,
                    n.color
                );
                next.push(n.left);
                next.push(n.right);
            }
            level = next;
            depth += 1;
        }
    }

    // ---- node access ----

    #[inline]
    fn key(&self, node: u32) -> &K {
        match &self.keys[node as usize] {
            Some(key) => key,
            None => unreachable!("tree node {} is vacant", node),
        }
    }

    #[inline]
    fn left(&self, node: u32) -> u32 {
        self.nodes[node as usize].left
    }

    #[inline]
    fn right(&self, node: u32) -> u32 {
        self.nodes[node as usize].right
    }

    #[inline]
    fn parent(&self, node: u32) -> u32 {
        self.nodes[node as usize].parent
    }

    #[inline]
    fn mass(&self, node: u32) -> usize {
        if node == NIL {
            0
        } else {
            self.nodes[node as usize].mass
        }
    }

    /// NIL counts as black
    #[inline]
    fn is_red(&self, node: u32) -> bool {
        node != NIL && self.nodes[node as usize].color == Color::Red
    }

    #[inline]
    fn set_color(&mut self, node: u32, color: Color) {
        self.nodes[node as usize].color = color;
    }

    fn alloc(&mut self, key: K, parent: u32, color: Color, copies: usize) -> u32 {
        self.node_count += 1;
        let node = Node::new(parent, color, copies);
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot as usize] = node;
                self.keys[slot as usize] = Some(key);
                slot
            }
            None => {
                assert!(
                    self.nodes.len() < NIL as usize,
                    "SortedBucketTree node arena exhausted"
                );
                self.nodes.push(node);
                self.keys.push(Some(key));
                (self.nodes.len() - 1) as u32
            }
        }
    }

    fn dealloc(&mut self, node: u32) -> Option<K> {
        self.node_count -= 1;
        self.nodes[node as usize] = Node::new(NIL, Color::Black, 0);
        self.free.push(node);
        self.keys[node as usize].take()
    }

    fn find_node(&self, key: &K) -> Option<(u32, usize)> {
        let mut rank = 0;
        let mut cur = self.root;
        while cur != NIL {
            let Node {
                left,
                right,
                copies,
                ..
            } = self.nodes[cur as usize];
            match self.order.compare(key, self.key(cur)) {
                Ordering::Equal => return Some((cur, rank + self.mass(left))),
                Ordering::Less => cur = left,
                Ordering::Greater => {
                    rank += self.mass(left) + copies;
                    cur = right;
                }
            }
        }
        None
    }

    fn subtree_min(&self, mut node: u32) -> u32 {
        if node == NIL {
            return NIL;
        }
        while self.left(node) != NIL {
            node = self.left(node);
        }
        node
    }

    fn subtree_max(&self, mut node: u32) -> u32 {
        if node == NIL {
            return NIL;
        }
        while self.right(node) != NIL {
            node = self.right(node);
        }
        node
    }

    fn successor(&self, node: u32) -> u32 {
        if self.right(node) != NIL {
            return self.subtree_min(self.right(node));
        }
        let mut child = node;
        let mut parent = self.parent(node);
        while parent != NIL && self.right(parent) == child {
            child = parent;
            parent = self.parent(parent);
        }
        parent
    }

    fn predecessor(&self, node: u32) -> u32 {
        if self.left(node) != NIL {
            return self.subtree_max(self.left(node));
        }
        let mut child = node;
        let mut parent = self.parent(node);
        while parent != NIL && self.left(parent) == child {
            child = parent;
            parent = self.parent(parent);
        }
        parent
    }

    // ---- structural primitives ----

    fn recompute_mass(&mut self, node: u32) {
        let Node {
            left,
            right,
            copies,
            ..
        } = self.nodes[node as usize];
        self.nodes[node as usize].mass = copies + self.mass(left) + self.mass(right);
    }

    /// Propagate a mass change of `delta` from `node` up to the root
    fn add_mass_to_root(&mut self, mut node: u32, delta: isize) {
        while node != NIL {
            let n = &mut self.nodes[node as usize];
            n.mass = n.mass.wrapping_add_signed(delta);
            node = n.parent;
        }
    }

    /// Point `parent`'s link to `old` at `new`; `parent == NIL` replaces the root
    fn replace_child(&mut self, parent: u32, old: u32, new: u32) {
        if parent == NIL {
            self.root = new;
        } else if self.left(parent) == old {
            self.nodes[parent as usize].left = new;
        } else {
            self.nodes[parent as usize].right = new;
        }
    }

    /// O(1) left rotation around `pivot`; colors are left to the caller
    fn rotate_left(&mut self, pivot: u32) {
        let child = self.right(pivot);
        debug_assert!(child != NIL, "left rotation without right child");
        let inner = self.left(child);
        let parent = self.parent(pivot);

        self.nodes[pivot as usize].right = inner;
        if inner != NIL {
            self.nodes[inner as usize].parent = pivot;
        }
        self.nodes[child as usize].parent = parent;
        self.replace_child(parent, pivot, child);
        self.nodes[child as usize].left = pivot;
        self.nodes[pivot as usize].parent = child;

        self.recompute_mass(pivot);
        self.recompute_mass(child);
    }

    /// O(1) right rotation around `pivot`; colors are left to the caller
    fn rotate_right(&mut self, pivot: u32) {
        let child = self.left(pivot);
        debug_assert!(child != NIL, "right rotation without left child");
        let inner = self.right(child);
        let parent = self.parent(pivot);

        self.nodes[pivot as usize].left = inner;
        if inner != NIL {
            self.nodes[inner as usize].parent = pivot;
        }
        self.nodes[child as usize].parent = parent;
        self.replace_child(parent, pivot, child);
        self.nodes[child as usize].right = pivot;
        self.nodes[pivot as usize].parent = child;

        self.recompute_mass(pivot);
        self.recompute_mass(child);
    }

    /// Exchange the tree positions of `node` and its in-order successor `succ`.
    ///
    /// Keys stay in their slots so positions held by callers keep their key.
    /// Afterwards `node` sits at the successor's old place with no left child.
    fn swap_positions(&mut self, node: u32, succ: u32) {
        let Node {
            parent: node_parent,
            left: node_left,
            right: node_right,
            color: node_color,
            ..
        } = self.nodes[node as usize];
        let Node {
            parent: succ_parent,
            right: succ_right,
            color: succ_color,
            ..
        } = self.nodes[succ as usize];
        debug_assert_eq!(self.left(succ), NIL);

        self.replace_child(node_parent, node, succ);
        self.nodes[succ as usize].parent = node_parent;
        self.nodes[succ as usize].left = node_left;
        self.nodes[node_left as usize].parent = succ;

        if succ == node_right {
            self.nodes[succ as usize].right = node;
            self.nodes[node as usize].parent = succ;
        } else {
            self.nodes[succ as usize].right = node_right;
            self.nodes[node_right as usize].parent = succ;
            self.nodes[succ_parent as usize].left = node;
            self.nodes[node as usize].parent = succ_parent;
        }

        self.nodes[node as usize].left = NIL;
        self.nodes[node as usize].right = succ_right;
        if succ_right != NIL {
            self.nodes[succ_right as usize].parent = node;
        }

        self.set_color(node, succ_color);
        self.set_color(succ, node_color);

        // Every subtree between the two positions changed membership
        let mut cur = node;
        loop {
            self.recompute_mass(cur);
            if cur == succ {
                break;
            }
            cur = self.parent(cur);
        }
    }

    /// Restore "no red node has a red child" after linking the red node `node`
    fn fix_double_red(&mut self, mut node: u32) {
        while node != self.root {
            let mut parent = self.parent(node);
            if !self.is_red(parent) {
                break;
            }
            // A red parent is never the root, so the grandparent exists
            let grandparent = self.parent(parent);
            if parent == self.left(grandparent) {
                let uncle = self.right(grandparent);
                if self.is_red(uncle) {
                    self.set_color(parent, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    node = grandparent;
                    continue;
                }
                if node == self.right(parent) {
                    self.rotate_left(parent);
                    node = parent;
                    parent = self.parent(node);
                }
                self.set_color(parent, Color::Black);
                self.set_color(grandparent, Color::Red);
                self.rotate_right(grandparent);
            } else {
                let uncle = self.left(grandparent);
                if self.is_red(uncle) {
                    self.set_color(parent, Color::Black);
                    self.set_color(uncle, Color::Black);
                    self.set_color(grandparent, Color::Red);
                    node = grandparent;
                    continue;
                }
                if node == self.left(parent) {
                    self.rotate_right(parent);
                    node = parent;
                    parent = self.parent(node);
                }
                self.set_color(parent, Color::Black);
                self.set_color(grandparent, Color::Red);
                self.rotate_left(grandparent);
            }
            break;
        }
        let root = self.root;
        self.set_color(root, Color::Black);
    }

    /// Resolve one missing black on the path through `node` (possibly NIL) under `parent`
    fn fix_double_black(&mut self, mut node: u32, mut parent: u32) {
        while node != self.root && !self.is_red(node) {
            if node == self.left(parent) {
                let mut sibling = self.right(parent);
                debug_assert!(sibling != NIL, "double black without sibling");
                if self.is_red(sibling) {
                    self.set_color(sibling, Color::Black);
                    self.set_color(parent, Color::Red);
                    self.rotate_left(parent);
                    sibling = self.right(parent);
                }
                if !self.is_red(self.left(sibling)) && !self.is_red(self.right(sibling)) {
                    self.set_color(sibling, Color::Red);
                    node = parent;
                    parent = self.parent(node);
                    continue;
                }
                if !self.is_red(self.right(sibling)) {
                    let inner = self.left(sibling);
                    self.set_color(inner, Color::Black);
                    self.set_color(sibling, Color::Red);
                    self.rotate_right(sibling);
                    sibling = self.right(parent);
                }
                let parent_color = self.nodes[parent as usize].color;
                self.set_color(sibling, parent_color);
                self.set_color(parent, Color::Black);
                let outer = self.right(sibling);
                self.set_color(outer, Color::Black);
                self.rotate_left(parent);
            } else {
                let mut sibling = self.left(parent);
                debug_assert!(sibling != NIL, "double black without sibling");
                if self.is_red(sibling) {
                    self.set_color(sibling, Color::Black);
                    self.set_color(parent, Color::Red);
                    self.rotate_right(parent);
                    sibling = self.left(parent);
                }
                if !self.is_red(self.left(sibling)) && !self.is_red(self.right(sibling)) {
                    self.set_color(sibling, Color::Red);
                    node = parent;
                    parent = self.parent(node);
                    continue;
                }
                if !self.is_red(self.left(sibling)) {
                    let inner = self.right(sibling);
                    self.set_color(inner, Color::Black);
                    self.set_color(sibling, Color::Red);
                    self.rotate_left(sibling);
                    sibling = self.left(parent);
                }
                let parent_color = self.nodes[parent as usize].color;
                self.set_color(sibling, parent_color);
                self.set_color(parent, Color::Black);
                let outer = self.left(sibling);
                self.set_color(outer, Color::Black);
                self.rotate_right(parent);
            }
            node = self.root;
            break;
        }
        if node != NIL {
            self.set_color(node, Color::Black);
        }
    }
}

impl<K: fmt::Debug, C> fmt::Debug for SortedBucketTree<K, C>
where
    C: KeyOrder<K>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries()).finish()
    }
}

impl<K: Ord> FromIterator<K> for SortedBucketTree<K, NaturalOrder> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        let mut tree = Self::new();
        tree.extend(iter);
        tree
    }
}

impl<K, C: KeyOrder<K>> Extend<K> for SortedBucketTree<K, C> {
    fn extend<I: IntoIterator<Item = K>>(&mut self, iter: I) {
        for key in iter {
            self.insert(key);
        }
    }
}

impl<'a, K, C: KeyOrder<K>> IntoIterator for &'a SortedBucketTree<K, C> {
    type Item = &'a K;
    type IntoIter = TreeIter<'a, K, C>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Sorted iterator over a [`SortedBucketTree`], yielding each copy
pub struct TreeIter<'a, K, C = NaturalOrder> {
    tree: &'a SortedBucketTree<K, C>,
    front: u32,
    front_used: usize,
    back: u32,
    back_used: usize,
    remaining: usize,
}

impl<'a, K, C: KeyOrder<K>> Iterator for TreeIter<'a, K, C> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let tree = self.tree;
        let key = tree.key(self.front);
        self.front_used += 1;
        if self.front_used == tree.nodes[self.front as usize].copies {
            self.front = tree.successor(self.front);
            self.front_used = 0;
        }
        self.remaining -= 1;
        Some(key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K, C: KeyOrder<K>> DoubleEndedIterator for TreeIter<'a, K, C> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let tree = self.tree;
        let key = tree.key(self.back);
        self.back_used += 1;
        if self.back_used == tree.nodes[self.back as usize].copies {
            self.back = tree.predecessor(self.back);
            self.back_used = 0;
        }
        self.remaining -= 1;
        Some(key)
    }
}

impl<'a, K, C: KeyOrder<K>> ExactSizeIterator for TreeIter<'a, K, C> {}

/// Iterator over `(key, copies)` pairs of a [`SortedBucketTree`]
pub struct TreeEntries<'a, K, C = NaturalOrder> {
    tree: &'a SortedBucketTree<K, C>,
    front: u32,
    back: u32,
    remaining: usize,
}

impl<'a, K, C: KeyOrder<K>> Iterator for TreeEntries<'a, K, C> {
    type Item = (&'a K, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let tree = self.tree;
        let node = self.front;
        self.front = tree.successor(node);
        self.remaining -= 1;
        Some((tree.key(node), tree.nodes[node as usize].copies))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K, C: KeyOrder<K>> DoubleEndedIterator for TreeEntries<'a, K, C> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let tree = self.tree;
        let node = self.back;
        self.back = tree.predecessor(node);
        self.remaining -= 1;
        Some((tree.key(node), tree.nodes[node as usize].copies))
    }
}

impl<'a, K, C: KeyOrder<K>> ExactSizeIterator for TreeEntries<'a, K, C> {}

impl<K, C: KeyOrder<K>> SortedMultiset<K> for SortedBucketTree<K, C> {
    type Pos = TreePos;
    type Iter<'a> = TreeIter<'a, K, C> where Self: 'a, K: 'a;

    fn len(&self) -> usize {
        SortedBucketTree::len(self)
    }

    fn clear(&mut self) {
        SortedBucketTree::clear(self)
    }

    fn begin(&self) -> TreePos {
        SortedBucketTree::begin(self)
    }

    fn end(&self) -> TreePos {
        SortedBucketTree::end(self)
    }

    fn get(&self, pos: TreePos) -> Option<&K> {
        SortedBucketTree::get(self, pos)
    }

    fn next_pos(&self, pos: TreePos) -> Option<TreePos> {
        SortedBucketTree::next_pos(self, pos)
    }

    fn prev_pos(&self, pos: TreePos) -> Option<TreePos> {
        SortedBucketTree::prev_pos(self, pos)
    }

    fn insert(&mut self, key: K) -> TreePos {
        SortedBucketTree::insert(self, key)
    }

    fn erase(&mut self, key: &K) -> usize {
        SortedBucketTree::erase(self, key)
    }

    fn erase_all(&mut self, key: &K) -> usize {
        SortedBucketTree::erase_all(self, key)
    }

    fn find(&self, key: &K) -> TreePos {
        SortedBucketTree::find(self, key)
    }

    fn find_with_distance(&self, key: &K) -> Option<(TreePos, usize)> {
        SortedBucketTree::find_with_distance(self, key)
    }

    fn lower_bound(&self, key: &K) -> TreePos {
        SortedBucketTree::lower_bound(self, key)
    }

    fn upper_bound(&self, key: &K) -> TreePos {
        SortedBucketTree::upper_bound(self, key)
    }

    fn change_capacity(&mut self, capacity: usize) {
        SortedBucketTree::change_capacity(self, capacity)
    }

    fn iter(&self) -> TreeIter<'_, K, C> {
        SortedBucketTree::iter(self)
    }

    fn front(&self) -> Option<&K> {
        SortedBucketTree::front(self)
    }

    fn back(&self) -> Option<&K> {
        SortedBucketTree::back(self)
    }
}
