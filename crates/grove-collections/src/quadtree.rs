//! Point quadtree: a square spatial index holding at most one point per leaf.

use bitflags::bitflags;
use grove_common::{max_of, Bounds, Point2, Scalar};
use std::fmt;

bitflags! {
    /// Behavior flags for the spatial containers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TreeFlags: u8 {
        /// Keep the stored value when a point is inserted twice.
        const NO_REPLACE = 1;
    }
}

#[derive(Clone)]
pub(crate) struct Quadrant<K, V> {
    pub(crate) bounds: Bounds<K>,
    pub(crate) kind: QuadKind<K, V>,
}

#[derive(Clone)]
pub(crate) enum QuadKind<K, V> {
    /// Empty, or one stored point with its value.
    Leaf(Option<(Point2<K>, V)>),
    /// Four children in NE, NW, SW, SE order.
    Branch(Box<[Quadrant<K, V>; 4]>),
}

enum Outcome {
    Inserted,
    Replaced,
    Rejected,
}

/// Spatial container with one point maximum per quadrant.
///
/// Lookups for coordinates without a stored point yield the tree's default
/// value.
///
/// ```
/// use grove_collections::Quadtree;
///
/// // 20 by 20 tree centered on zero, storing chars.
/// let mut tree: Quadtree<i32, char> = Quadtree::new(20, 20);
/// tree.insert(5, 5, 'a');
/// tree.insert(3, 3, 'b');
///
/// assert_eq!(*tree.get(5, 5), 'a');
/// assert_eq!(tree.find(&'b'), Some((3, 3)));
/// ```
pub struct Quadtree<K: Scalar, V> {
    root: Option<Quadrant<K, V>>,
    len: usize,
    depth: usize,
    default_value: V,
    center: Point2<K>,
    width: K,
    height: K,
    flags: TreeFlags,
}

impl<K: Scalar, V: Clone> Clone for Quadtree<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            len: self.len,
            depth: self.depth,
            default_value: self.default_value.clone(),
            center: self.center,
            width: self.width,
            height: self.height,
            flags: self.flags,
        }
    }
}

impl<K: Scalar, V: Default> Quadtree<K, V> {
    /// Creates a tree of the given extent centered on the origin.
    pub fn new(width: K, height: K) -> Self {
        Self::with_center(Point2::new(K::zero(), K::zero()), width, height)
    }

    /// Creates a tree of the given extent around `center`.
    pub fn with_center(center: Point2<K>, width: K, height: K) -> Self {
        Self::with_default(center, width, height, V::default())
    }
}

impl<K: Scalar, V> Quadtree<K, V> {
    /// Creates a tree with an explicit default value for unoccupied points.
    pub fn with_default(center: Point2<K>, width: K, height: K, default_value: V) -> Self {
        Self {
            root: None,
            len: 0,
            depth: 0,
            default_value,
            center,
            width,
            height,
            flags: TreeFlags::empty(),
        }
    }

    /// Number of points stored.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of subdivision levels; 0 when the root is the only quadrant.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The value reported for coordinates without a stored point.
    pub fn default_value(&self) -> &V {
        &self.default_value
    }

    pub fn set_flags(&mut self, flags: TreeFlags) {
        self.flags = flags;
    }

    pub fn flags(&self) -> TreeFlags {
        self.flags
    }

    fn root_bounds(&self) -> Bounds<K> {
        Bounds::around(self.center, self.width, self.height)
    }

    /// Inserts or updates the point at `(x, y)` and returns the new size.
    ///
    /// Coordinates outside the root bounds are a no-op. Re-inserting an
    /// existing point replaces its value unless [`TreeFlags::NO_REPLACE`] is
    /// set.
    pub fn insert(&mut self, x: K, y: K, value: V) -> usize {
        let bounds = self.root_bounds();
        if !bounds.contains(x, y) {
            return self.len;
        }
        let no_replace = self.flags.contains(TreeFlags::NO_REPLACE);
        let root = self.root.get_or_insert_with(|| Quadrant {
            bounds,
            kind: QuadKind::Leaf(None),
        });
        if let Outcome::Inserted = Self::insert_node(root, x, y, value, no_replace) {
            self.len += 1;
        }
        self.depth = compute_depth(root);
        self.len
    }

    fn insert_node(
        node: &mut Quadrant<K, V>,
        x: K,
        y: K,
        value: V,
        no_replace: bool,
    ) -> Outcome {
        match &mut node.kind {
            QuadKind::Branch(children) => {
                let idx = node.bounds.quadrant_of(x, y) as usize;
                Self::insert_node(&mut children[idx], x, y, value, no_replace)
            }
            QuadKind::Leaf(None) => {
                node.kind = QuadKind::Leaf(Some((Point2::new(x, y), value)));
                Outcome::Inserted
            }
            QuadKind::Leaf(Some((pos, stored))) => {
                if pos.x == x && pos.y == y {
                    if no_replace {
                        Outcome::Rejected
                    } else {
                        *stored = value;
                        Outcome::Replaced
                    }
                } else if !node.bounds.splittable() {
                    // The resident point cannot be separated from the new one.
                    Outcome::Rejected
                } else {
                    Self::subdivide_and_insert(node, x, y, value, no_replace)
                }
            }
        }
    }

    /// Splits an occupied leaf, pushes the resident point into the matching
    /// child, then descends for the new point.
    fn subdivide_and_insert(
        node: &mut Quadrant<K, V>,
        x: K,
        y: K,
        value: V,
        no_replace: bool,
    ) -> Outcome {
        let resident = match std::mem::replace(&mut node.kind, QuadKind::Leaf(None)) {
            QuadKind::Leaf(Some(pair)) => pair,
            _ => unreachable!("subdivision starts from an occupied leaf"),
        };

        let mut children = Box::new(node.bounds.split().map(|bounds| Quadrant {
            bounds,
            kind: QuadKind::Leaf(None),
        }));
        let resident_idx = node.bounds.quadrant_of(resident.0.x, resident.0.y) as usize;
        children[resident_idx].kind = QuadKind::Leaf(Some(resident));

        let idx = node.bounds.quadrant_of(x, y) as usize;
        let outcome = Self::insert_node(&mut children[idx], x, y, value, no_replace);
        node.kind = QuadKind::Branch(children);
        outcome
    }

    /// Returns the value at `(x, y)`, or the default value when no point is
    /// stored there.
    pub fn get(&self, x: K, y: K) -> &V {
        match &self.root {
            Some(root) if root.bounds.contains(x, y) => {
                Self::get_node(root, x, y).unwrap_or(&self.default_value)
            }
            _ => &self.default_value,
        }
    }

    fn get_node(node: &Quadrant<K, V>, x: K, y: K) -> Option<&V> {
        match &node.kind {
            QuadKind::Branch(children) => {
                let idx = node.bounds.quadrant_of(x, y) as usize;
                Self::get_node(&children[idx], x, y)
            }
            QuadKind::Leaf(Some((pos, value))) if pos.x == x && pos.y == y => Some(value),
            QuadKind::Leaf(_) => None,
        }
    }

    /// Mutable handle on the value stored at `(x, y)`, if any.
    pub fn get_mut(&mut self, x: K, y: K) -> Option<&mut V> {
        let root = self.root.as_mut()?;
        if !root.bounds.contains(x, y) {
            return None;
        }
        Self::get_mut_node(root, x, y)
    }

    fn get_mut_node(node: &mut Quadrant<K, V>, x: K, y: K) -> Option<&mut V> {
        match &mut node.kind {
            QuadKind::Branch(children) => {
                let idx = node.bounds.quadrant_of(x, y) as usize;
                Self::get_mut_node(&mut children[idx], x, y)
            }
            QuadKind::Leaf(Some((pos, value))) if pos.x == x && pos.y == y => Some(value),
            QuadKind::Leaf(_) => None,
        }
    }

    /// Coordinates of the first stored point whose value matches under the
    /// given criterion. Quadrants are searched NE, NW, SW, SE.
    pub fn find_by<F>(&self, target: &V, criterion: F) -> Option<(K, K)>
    where
        F: Fn(&V, &V) -> bool,
    {
        Self::find_node(self.root.as_ref()?, target, &criterion)
    }

    fn find_node<F>(node: &Quadrant<K, V>, target: &V, criterion: &F) -> Option<(K, K)>
    where
        F: Fn(&V, &V) -> bool,
    {
        match &node.kind {
            QuadKind::Branch(children) => children
                .iter()
                .find_map(|child| Self::find_node(child, target, criterion)),
            QuadKind::Leaf(Some((pos, value))) if criterion(value, target) => {
                Some((pos.x, pos.y))
            }
            QuadKind::Leaf(_) => None,
        }
    }

    /// Coordinates of the first stored point equal to `target`.
    pub fn find(&self, target: &V) -> Option<(K, K)>
    where
        V: PartialEq,
    {
        self.find_by(target, |a, b| a == b)
    }

    /// True if some stored point equals `target`.
    pub fn contains_value(&self, target: &V) -> bool
    where
        V: PartialEq,
    {
        self.find(target).is_some()
    }

    /// Removes the point at `(x, y)` if present, compacting emptied
    /// subdivisions on the way back up.
    pub fn remove(&mut self, x: K, y: K) {
        let mut removed = 0;
        if let Some(root) = self.root.as_mut() {
            Self::remove_node(root, &mut removed, &mut |pos, _| pos.x == x && pos.y == y);
            self.len -= removed;
            self.depth = compute_depth(root);
        }
    }

    /// Removes every stored point whose value matches under the criterion.
    pub fn remove_matching<F>(&mut self, target: &V, criterion: F)
    where
        F: Fn(&V, &V) -> bool,
    {
        let mut removed = 0;
        if let Some(root) = self.root.as_mut() {
            Self::remove_node(root, &mut removed, &mut |_, value| criterion(value, target));
            self.len -= removed;
            self.depth = compute_depth(root);
        }
    }

    /// Removes every stored point equal to `target`.
    pub fn remove_all(&mut self, target: &V)
    where
        V: PartialEq,
    {
        self.remove_matching(target, |a, b| a == b);
    }

    /// Clears matching leaves; returns true when the quadrant ends up empty.
    fn remove_node<F>(node: &mut Quadrant<K, V>, removed: &mut usize, matches: &mut F) -> bool
    where
        F: FnMut(&Point2<K>, &V) -> bool,
    {
        match &mut node.kind {
            QuadKind::Leaf(slot) => match slot {
                Some((pos, value)) if matches(pos, value) => {
                    *slot = None;
                    *removed += 1;
                    true
                }
                Some(_) => false,
                None => true,
            },
            QuadKind::Branch(children) => {
                let mut empty = [false; 4];
                for (i, child) in children.iter_mut().enumerate() {
                    empty[i] = Self::remove_node(child, removed, matches);
                }
                Self::compact(node, empty)
            }
        }
    }

    /// Four empty children collapse into an empty leaf; a single surviving
    /// leaf gets promoted into the parent. A surviving branch stays in place.
    fn compact(node: &mut Quadrant<K, V>, empty: [bool; 4]) -> bool {
        let empty_count = empty.iter().filter(|e| **e).count();
        if empty_count == 4 {
            node.kind = QuadKind::Leaf(None);
            return true;
        }
        if empty_count == 3 {
            if let Some(survivor) = empty.iter().position(|e| !*e) {
                let promoted = match &mut node.kind {
                    QuadKind::Branch(children) => match &mut children[survivor].kind {
                        QuadKind::Leaf(slot) => slot.take(),
                        QuadKind::Branch(_) => None,
                    },
                    QuadKind::Leaf(_) => None,
                };
                if let Some(pair) = promoted {
                    node.kind = QuadKind::Leaf(Some(pair));
                }
            }
        }
        false
    }
}

/// Maximum leaf depth below `node`.
pub(crate) fn compute_depth<K, V>(node: &Quadrant<K, V>) -> usize {
    match &node.kind {
        QuadKind::Leaf(_) => 0,
        QuadKind::Branch(children) => {
            1 + max_of(children.iter().map(compute_depth)).unwrap_or(0)
        }
    }
}

impl<K, V> fmt::Display for Quadtree<K, V>
where
    K: Scalar + fmt::Display,
    V: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            None => writeln!(f, "empty quadtree"),
            Some(root) => {
                writeln!(f, "root:")?;
                print_quadrant(f, root, 0)
            }
        }
    }
}

fn indent(f: &mut fmt::Formatter<'_>, shifts: usize) -> fmt::Result {
    for _ in 0..shifts {
        write!(f, "| ")?;
    }
    Ok(())
}

pub(crate) fn print_quadrant<K, V>(
    f: &mut fmt::Formatter<'_>,
    node: &Quadrant<K, V>,
    shifts: usize,
) -> fmt::Result
where
    K: Scalar + fmt::Display,
    V: fmt::Display,
{
    indent(f, shifts)?;
    writeln!(
        f,
        "[ {}, {} ) x [ {}, {} )",
        node.bounds.left, node.bounds.right, node.bounds.bottom, node.bounds.top
    )?;
    match &node.kind {
        QuadKind::Branch(children) => {
            for (label, child) in ["NE", "NW", "SW", "SE"].iter().zip(children.iter()) {
                indent(f, shifts)?;
                writeln!(f, "{label}:")?;
                print_quadrant(f, child, shifts + 1)?;
            }
        }
        QuadKind::Leaf(Some((pos, value))) => {
            indent(f, shifts)?;
            writeln!(f, "value: {} at ({}, {})", value, pos.x, pos.y)?;
        }
        QuadKind::Leaf(None) => {
            indent(f, shifts)?;
            writeln!(f, "empty")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut tree: Quadtree<i32, char> = Quadtree::with_default(
            Point2::new(0, 0),
            20,
            20,
            '.',
        );

        assert_eq!(tree.insert(5, 5, 'a'), 1);
        assert_eq!(tree.insert(3, 3, 'b'), 2);

        assert_eq!(*tree.get(5, 5), 'a');
        assert_eq!(*tree.get(3, 3), 'b');
        assert_eq!(*tree.get(1, 1), '.');
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_find() {
        let mut tree: Quadtree<i32, char> = Quadtree::new(20, 20);
        tree.insert(5, 5, 'a');
        tree.insert(3, 3, 'b');

        assert_eq!(tree.find(&'b'), Some((3, 3)));
        assert_eq!(tree.find(&'a'), Some((5, 5)));
        assert_eq!(tree.find(&'c'), None);
        assert!(tree.contains_value(&'a'));
        assert!(!tree.contains_value(&'z'));
    }

    #[test]
    fn test_find_search_order() {
        let mut tree: Quadtree<i32, char> = Quadtree::new(20, 20);
        tree.insert(-5, -5, 'x');
        tree.insert(5, 5, 'x');

        // NE is searched before SW.
        assert_eq!(tree.find(&'x'), Some((5, 5)));
    }

    #[test]
    fn test_find_by_criterion() {
        let mut tree: Quadtree<i32, i32> = Quadtree::new(20, 20);
        tree.insert(5, 5, 10);
        tree.insert(-5, -5, 25);

        let found = tree.find_by(&0, |stored, _| *stored > 20);
        assert_eq!(found, Some((-5, -5)));
    }

    #[test]
    fn test_replace_behaviour() {
        let mut tree: Quadtree<i32, i32> = Quadtree::new(20, 20);
        tree.insert(5, 5, 100);
        assert_eq!(tree.insert(5, 5, 200), 1);
        assert_eq!(*tree.get(5, 5), 200);

        let mut tree: Quadtree<i32, i32> = Quadtree::new(20, 20);
        tree.set_flags(TreeFlags::NO_REPLACE);
        tree.insert(5, 5, 100);
        assert_eq!(tree.insert(5, 5, 200), 1);
        assert_eq!(*tree.get(5, 5), 100);
    }

    #[test]
    fn test_insert_outside_bounds_is_noop() {
        let mut tree: Quadtree<i32, i32> = Quadtree::new(20, 20);
        assert_eq!(tree.insert(100, 100, 1), 0);
        assert_eq!(tree.insert(10, 0, 1), 0); // right edge is exclusive
        assert_eq!(tree.insert(5, 5, 1), 1);
        assert_eq!(tree.insert(-11, 0, 2), 1);
    }

    #[test]
    fn test_depth_tracks_subdivision() {
        let mut tree: Quadtree<i32, char> = Quadtree::new(20, 20);
        assert_eq!(tree.depth(), 0);

        tree.insert(5, 5, 'a');
        assert_eq!(tree.depth(), 0);

        // (5,5) and (3,3) share the NE quadrant, forcing two levels.
        tree.insert(3, 3, 'b');
        assert_eq!(tree.depth(), 2);
    }

    #[test]
    fn test_remove_compacts() {
        let mut tree: Quadtree<i32, char> = Quadtree::new(20, 20);
        tree.insert(5, 5, 'a');
        tree.insert(3, 3, 'b');
        assert_eq!(tree.depth(), 2);

        tree.remove(3, 3);
        assert_eq!(tree.len(), 1);
        assert_eq!(*tree.get(3, 3), char::default());
        assert_eq!(*tree.get(5, 5), 'a');
        // The surviving point is promoted all the way to the root.
        assert_eq!(tree.depth(), 0);

        tree.remove(5, 5);
        assert!(tree.is_empty());
        assert_eq!(tree.depth(), 0);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut tree: Quadtree<i32, char> = Quadtree::new(20, 20);
        tree.insert(5, 5, 'a');
        tree.remove(4, 4);
        assert_eq!(tree.len(), 1);
        assert_eq!(*tree.get(5, 5), 'a');
    }

    #[test]
    fn test_remove_all() {
        let mut tree: Quadtree<i32, i32> = Quadtree::new(40, 40);
        tree.insert(5, 5, 7);
        tree.insert(-5, 5, 7);
        tree.insert(5, -5, 9);

        tree.remove_all(&7);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.find(&7), None);
        assert_eq!(tree.find(&9), Some((5, -5)));
    }

    #[test]
    fn test_get_mut() {
        let mut tree: Quadtree<i32, i32> = Quadtree::new(20, 20);
        tree.insert(5, 5, 1);
        *tree.get_mut(5, 5).unwrap() = 42;
        assert_eq!(*tree.get(5, 5), 42);
        assert!(tree.get_mut(4, 4).is_none());
    }

    #[test]
    fn test_clone_is_deep() {
        let mut tree: Quadtree<i32, char> = Quadtree::new(20, 20);
        tree.insert(5, 5, 'a');
        tree.insert(3, 3, 'b');

        let copy = tree.clone();
        tree.remove(5, 5);

        assert_eq!(*copy.get(5, 5), 'a');
        assert_eq!(copy.len(), 2);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_float_coordinates() {
        let mut tree: Quadtree<f64, i32> = Quadtree::new(10.0, 10.0);
        tree.insert(1.5, 1.5, 1);
        tree.insert(1.25, 1.25, 2);

        assert_eq!(*tree.get(1.5, 1.5), 1);
        assert_eq!(*tree.get(1.25, 1.25), 2);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_many_points_roundtrip() {
        let mut tree: Quadtree<i32, i32> = Quadtree::new(64, 64);
        let points: Vec<(i32, i32)> = (-8..8).flat_map(|x| (-8..8).map(move |y| (x, y))).collect();

        for (i, &(x, y)) in points.iter().enumerate() {
            assert_eq!(tree.insert(x, y, i as i32), i + 1);
        }
        for (i, &(x, y)) in points.iter().enumerate() {
            assert_eq!(*tree.get(x, y), i as i32);
        }

        for (i, &(x, y)) in points.iter().enumerate() {
            tree.remove(x, y);
            assert_eq!(tree.len(), points.len() - i - 1);
        }
        assert_eq!(tree.depth(), 0);
    }

    #[test]
    fn test_display_renders_tree() {
        let mut tree: Quadtree<i32, char> = Quadtree::new(20, 20);
        assert_eq!(tree.to_string(), "empty quadtree\n");

        tree.insert(5, 5, 'a');
        tree.insert(-5, -5, 'b');
        let rendered = tree.to_string();
        assert!(rendered.contains("NE:"));
        assert!(rendered.contains("value: a at (5, 5)"));
        assert!(rendered.contains("value: b at (-5, -5)"));
    }
}
