//! Ordered key/value map backed by a height-balanced binary search tree.
//!
//! Nodes live in a [`slab::Slab`] arena and reference each other through
//! integer indices, with [`NIL`] as the null link. Parent links are
//! back-references used for traversal only; ownership is top-down from the
//! root.

use slab::Slab;

/// Null node index.
const NIL: usize = usize::MAX;

/// Strict weak ordering over keys.
///
/// Key equality is comparator-derived: two keys are equal when neither is
/// less than the other.
pub trait Compare<K> {
    fn less(&self, a: &K, b: &K) -> bool;
}

/// Default ordering through [`Ord`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NaturalOrder;

impl<K: Ord> Compare<K> for NaturalOrder {
    #[inline]
    fn less(&self, a: &K, b: &K) -> bool {
        a < b
    }
}

impl<K, F> Compare<K> for F
where
    F: Fn(&K, &K) -> bool,
{
    #[inline]
    fn less(&self, a: &K, b: &K) -> bool {
        self(a, b)
    }
}

struct Node<K, V> {
    key: K,
    value: V,
    left: usize,
    right: usize,
    parent: usize,
    /// Height of the subtree rooted here; a leaf has height 1.
    height: usize,
}

/// Ordered associative container with unique keys.
///
/// The tree keeps the AVL invariant: after every public mutation the heights
/// of the two subtrees of any node differ by at most one.
pub struct OrderedMap<K, V, C = NaturalOrder> {
    nodes: Slab<Node<K, V>>,
    root: usize,
    cmp: C,
}

impl<K, V, C: Compare<K> + Default> Default for OrderedMap<K, V, C> {
    fn default() -> Self {
        Self::with_comparator(C::default())
    }
}

impl<K, V> OrderedMap<K, V, NaturalOrder>
where
    K: Ord,
{
    /// Creates an empty map ordered by [`Ord`].
    pub fn new() -> Self {
        Self::with_comparator(NaturalOrder)
    }
}

impl<K, V, C: Compare<K>> OrderedMap<K, V, C> {
    /// Creates an empty map with the given less operator.
    pub fn with_comparator(cmp: C) -> Self {
        Self {
            nodes: Slab::new(),
            root: NIL,
            cmp,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Height of the tree; an empty tree has height 0, a single node 1.
    pub fn height(&self) -> usize {
        self.subtree_height(self.root)
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.root = NIL;
    }

    fn keys_equal(&self, a: &K, b: &K) -> bool {
        !self.cmp.less(a, b) && !self.cmp.less(b, a)
    }

    fn search(&self, key: &K) -> usize {
        let mut current = self.root;
        while current != NIL {
            let node = &self.nodes[current];
            if self.keys_equal(key, &node.key) {
                return current;
            }
            current = if self.cmp.less(key, &node.key) {
                node.left
            } else {
                node.right
            };
        }
        NIL
    }

    /// Returns the stored value for `key`, if present.
    pub fn get(&self, key: &K) -> Option<&V> {
        let idx = self.search(key);
        if idx == NIL {
            None
        } else {
            Some(&self.nodes[idx].value)
        }
    }

    /// Returns a mutable handle on the stored value for `key`, if present.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let idx = self.search(key);
        if idx == NIL {
            None
        } else {
            Some(&mut self.nodes[idx].value)
        }
    }

    /// Inserts a new entry.
    ///
    /// Returns false without mutating the map when an equal key is already
    /// present.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        if self.root == NIL {
            self.root = self.alloc(key, value, NIL);
            return true;
        }

        let mut current = self.root;
        loop {
            if self.keys_equal(&key, &self.nodes[current].key) {
                return false;
            }
            if self.cmp.less(&key, &self.nodes[current].key) {
                let left = self.nodes[current].left;
                if left == NIL {
                    let new = self.alloc(key, value, current);
                    self.nodes[current].left = new;
                    break;
                }
                current = left;
            } else {
                let right = self.nodes[current].right;
                if right == NIL {
                    let new = self.alloc(key, value, current);
                    self.nodes[current].right = new;
                    break;
                }
                current = right;
            }
        }

        self.rebalance_upward(current);
        true
    }

    /// Removes the entry with the given key if present.
    ///
    /// Returns the new size of the map; removing an absent key is a no-op.
    pub fn remove(&mut self, key: &K) -> usize {
        let idx = self.search(key);
        if idx == NIL {
            return self.len();
        }

        let (left, right) = (self.nodes[idx].left, self.nodes[idx].right);
        if left != NIL && right != NIL {
            // Two children: splice out the in-order successor and move its
            // entry into this node's position.
            let succ = self.min_node(right);
            let retrace_from = self.nodes[succ].parent;
            let succ_right = self.nodes[succ].right;
            self.transplant(succ, succ_right);
            let moved = self.nodes.remove(succ);
            let node = &mut self.nodes[idx];
            node.key = moved.key;
            node.value = moved.value;
            // The successor had no left child, so the retrace starts at its
            // old parent (which may be `idx` itself).
            self.rebalance_upward(retrace_from);
        } else {
            let child = if left != NIL { left } else { right };
            let parent = self.nodes[idx].parent;
            self.transplant(idx, child);
            self.nodes.remove(idx);
            self.rebalance_upward(parent);
        }

        self.len()
    }

    /// Lazy in-order iteration over (key, value) pairs in ascending key order.
    pub fn iter(&self) -> Iter<'_, K, V, C> {
        Iter {
            map: self,
            next: self.min_node(self.root),
        }
    }

    /// Lazy reverse-order iteration in descending key order.
    pub fn iter_rev(&self) -> IterRev<'_, K, V, C> {
        IterRev {
            map: self,
            next: self.max_node(self.root),
        }
    }

    fn alloc(&mut self, key: K, value: V, parent: usize) -> usize {
        self.nodes.insert(Node {
            key,
            value,
            left: NIL,
            right: NIL,
            parent,
            height: 1,
        })
    }

    fn subtree_height(&self, idx: usize) -> usize {
        if idx == NIL {
            0
        } else {
            self.nodes[idx].height
        }
    }

    fn update_height(&mut self, idx: usize) {
        let h = 1 + self
            .subtree_height(self.nodes[idx].left)
            .max(self.subtree_height(self.nodes[idx].right));
        self.nodes[idx].height = h;
    }

    fn balance_factor(&self, idx: usize) -> isize {
        self.subtree_height(self.nodes[idx].left) as isize
            - self.subtree_height(self.nodes[idx].right) as isize
    }

    /// Replaces the subtree rooted at `u` with the one rooted at `v` in the
    /// eyes of `u`'s parent. Does not touch `u`'s own links.
    fn transplant(&mut self, u: usize, v: usize) {
        let parent = self.nodes[u].parent;
        if parent == NIL {
            self.root = v;
        } else if self.nodes[parent].left == u {
            self.nodes[parent].left = v;
        } else {
            self.nodes[parent].right = v;
        }
        if v != NIL {
            self.nodes[v].parent = parent;
        }
    }

    fn rotate_left(&mut self, idx: usize) -> usize {
        let pivot = self.nodes[idx].right;
        let inner = self.nodes[pivot].left;

        self.nodes[idx].right = inner;
        if inner != NIL {
            self.nodes[inner].parent = idx;
        }

        self.transplant(idx, pivot);
        self.nodes[pivot].left = idx;
        self.nodes[idx].parent = pivot;

        self.update_height(idx);
        self.update_height(pivot);
        pivot
    }

    fn rotate_right(&mut self, idx: usize) -> usize {
        let pivot = self.nodes[idx].left;
        let inner = self.nodes[pivot].right;

        self.nodes[idx].left = inner;
        if inner != NIL {
            self.nodes[inner].parent = idx;
        }

        self.transplant(idx, pivot);
        self.nodes[pivot].right = idx;
        self.nodes[idx].parent = pivot;

        self.update_height(idx);
        self.update_height(pivot);
        pivot
    }

    /// Walks from `idx` to the root, refreshing heights and rotating every
    /// unbalanced ancestor. The inner rotation handles the case where the
    /// heavy child leans the opposite way.
    fn rebalance_upward(&mut self, mut idx: usize) {
        while idx != NIL {
            self.update_height(idx);
            let bf = self.balance_factor(idx);
            if bf > 1 {
                let left = self.nodes[idx].left;
                if self.balance_factor(left) < 0 {
                    self.rotate_left(left);
                }
                idx = self.rotate_right(idx);
            } else if bf < -1 {
                let right = self.nodes[idx].right;
                if self.balance_factor(right) > 0 {
                    self.rotate_right(right);
                }
                idx = self.rotate_left(idx);
            }
            idx = self.nodes[idx].parent;
        }
    }

    fn min_node(&self, mut idx: usize) -> usize {
        if idx == NIL {
            return NIL;
        }
        while self.nodes[idx].left != NIL {
            idx = self.nodes[idx].left;
        }
        idx
    }

    fn max_node(&self, mut idx: usize) -> usize {
        if idx == NIL {
            return NIL;
        }
        while self.nodes[idx].right != NIL {
            idx = self.nodes[idx].right;
        }
        idx
    }

    fn successor(&self, idx: usize) -> usize {
        let right = self.nodes[idx].right;
        if right != NIL {
            return self.min_node(right);
        }
        let mut current = idx;
        let mut parent = self.nodes[current].parent;
        while parent != NIL && self.nodes[parent].right == current {
            current = parent;
            parent = self.nodes[current].parent;
        }
        parent
    }

    fn predecessor(&self, idx: usize) -> usize {
        let left = self.nodes[idx].left;
        if left != NIL {
            return self.max_node(left);
        }
        let mut current = idx;
        let mut parent = self.nodes[current].parent;
        while parent != NIL && self.nodes[parent].left == current {
            current = parent;
            parent = self.nodes[current].parent;
        }
        parent
    }
}

impl<K, V, C> std::fmt::Debug for OrderedMap<K, V, C>
where
    K: std::fmt::Debug,
    V: std::fmt::Debug,
    C: Compare<K>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Ascending in-order iterator.
pub struct Iter<'a, K, V, C> {
    map: &'a OrderedMap<K, V, C>,
    next: usize,
}

impl<'a, K, V, C: Compare<K>> Iterator for Iter<'a, K, V, C> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == NIL {
            return None;
        }
        let map = self.map;
        let node = &map.nodes[self.next];
        self.next = map.successor(self.next);
        Some((&node.key, &node.value))
    }
}

/// Descending reverse-order iterator.
pub struct IterRev<'a, K, V, C> {
    map: &'a OrderedMap<K, V, C>,
    next: usize,
}

impl<'a, K, V, C: Compare<K>> Iterator for IterRev<'a, K, V, C> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == NIL {
            return None;
        }
        let map = self.map;
        let node = &map.nodes[self.next];
        self.next = map.predecessor(self.next);
        Some((&node.key, &node.value))
    }
}

impl<'a, K, V, C: Compare<K>> IntoIterator for &'a OrderedMap<K, V, C> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, C>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
