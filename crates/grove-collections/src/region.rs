//! Region quadtree over Boolean cells with uniform-quadrant merging.

use grove_common::{max_of, Bounds, Point2, Scalar};
use std::fmt;

#[derive(Clone)]
struct RegionNode<K> {
    bounds: Bounds<K>,
    kind: RegionKind<K>,
}

#[derive(Clone)]
enum RegionKind<K> {
    /// Uniform value covering the whole quadrant.
    Leaf(bool),
    /// Four children in NE, NW, SW, SE order.
    Branch(Box<[RegionNode<K>; 4]>),
}

/// Boolean area container.
///
/// A leaf covers its whole quadrant with one value; setting a single cell
/// subdivides down to unit cells, and uniform quadrants merge back into a
/// single leaf on the way up. `len` reports the number of unit cells set to
/// true.
///
/// ```
/// use grove_collections::RegionQuadtree;
///
/// let mut region: RegionQuadtree<i32> = RegionQuadtree::new(4, 4);
/// region.set(0, 0);
/// assert!(region.get(0, 0));
/// assert!(!region.get(1, 1));
/// assert_eq!(region.len(), 1);
/// ```
pub struct RegionQuadtree<K: Scalar> {
    root: Option<RegionNode<K>>,
    filled: usize,
    depth: usize,
    default_value: bool,
    center: Point2<K>,
    width: K,
    height: K,
}

impl<K: Scalar> Clone for RegionQuadtree<K> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            filled: self.filled,
            depth: self.depth,
            default_value: self.default_value,
            center: self.center,
            width: self.width,
            height: self.height,
        }
    }
}

impl<K: Scalar> RegionQuadtree<K> {
    /// Creates a region of the given extent centered on the origin, all cells
    /// unset.
    pub fn new(width: K, height: K) -> Self {
        Self::with_center(Point2::new(K::zero(), K::zero()), width, height)
    }

    /// Creates a region of the given extent around `center`.
    pub fn with_center(center: Point2<K>, width: K, height: K) -> Self {
        Self::with_default(center, width, height, false)
    }

    /// Creates a region with an explicit default cell state.
    pub fn with_default(center: Point2<K>, width: K, height: K, default_value: bool) -> Self {
        Self {
            root: None,
            filled: 0,
            depth: 0,
            default_value,
            center,
            width,
            height,
        }
    }

    /// Number of unit cells set true through the API.
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Number of subdivision levels; 0 when the root is a single leaf.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn default_value(&self) -> bool {
        self.default_value
    }

    fn root_bounds(&self) -> Bounds<K> {
        Bounds::around(self.center, self.width, self.height)
    }

    /// Sets the unit cell at `(x, y)` to `value` and returns the count of
    /// true cells. Coordinates outside the root bounds are a no-op.
    pub fn insert(&mut self, x: K, y: K, value: bool) -> usize {
        let bounds = self.root_bounds();
        if !bounds.contains(x, y) {
            return self.filled;
        }
        let default_value = self.default_value;
        let root = self.root.get_or_insert_with(|| RegionNode {
            bounds,
            kind: RegionKind::Leaf(default_value),
        });
        Self::insert_node(root, x, y, value, &mut self.filled);
        self.depth = compute_depth(root);
        self.filled
    }

    /// Marks the cell at `(x, y)` covered.
    pub fn set(&mut self, x: K, y: K) {
        self.insert(x, y, true);
    }

    /// Clears the cell at `(x, y)`.
    pub fn unset(&mut self, x: K, y: K) {
        self.insert(x, y, false);
    }

    /// Fills every unit cell inside the polygon with `value` and returns the
    /// count of true cells.
    ///
    /// Containment uses the even-odd rule; the polygon is a closed loop of
    /// vertices. Cells are visited over the intersection of the root bounds
    /// and the polygon's bounding box.
    pub fn insert_region(&mut self, polygon: &[Point2<K>], value: bool) -> usize {
        if polygon.len() < 3 {
            return self.filled;
        }
        let bounds = self.root_bounds();
        let min_x = fold_min(polygon.iter().map(|p| p.x));
        let max_x = fold_max(polygon.iter().map(|p| p.x));
        let min_y = fold_min(polygon.iter().map(|p| p.y));
        let max_y = fold_max(polygon.iter().map(|p| p.y));

        let mut y = bounds.bottom;
        while y < bounds.top {
            if y >= min_y && y <= max_y {
                let mut x = bounds.left;
                while x < bounds.right {
                    if x >= min_x && x <= max_x && point_in_polygon(polygon, x, y) {
                        self.insert(x, y, value);
                    }
                    x = x + K::one();
                }
            }
            y = y + K::one();
        }
        self.filled
    }

    /// Fills the polygon's cells.
    pub fn set_region(&mut self, polygon: &[Point2<K>]) {
        self.insert_region(polygon, true);
    }

    /// Clears the polygon's cells.
    pub fn unset_region(&mut self, polygon: &[Point2<K>]) {
        self.insert_region(polygon, false);
    }

    /// State of the cell at `(x, y)`; the default value outside the bounds.
    pub fn get(&self, x: K, y: K) -> bool {
        match &self.root {
            Some(root) if root.bounds.contains(x, y) => Self::get_node(root, x, y),
            _ => self.default_value,
        }
    }

    fn get_node(node: &RegionNode<K>, x: K, y: K) -> bool {
        match &node.kind {
            RegionKind::Leaf(value) => *value,
            RegionKind::Branch(children) => {
                let idx = node.bounds.quadrant_of(x, y) as usize;
                Self::get_node(&children[idx], x, y)
            }
        }
    }

    /// Returns true when the subtree changed.
    fn insert_node(node: &mut RegionNode<K>, x: K, y: K, value: bool, filled: &mut usize) -> bool {
        match &mut node.kind {
            RegionKind::Branch(children) => {
                let idx = node.bounds.quadrant_of(x, y) as usize;
                let changed = Self::insert_node(&mut children[idx], x, y, value, filled);
                if changed {
                    Self::try_merge(node);
                }
                changed
            }
            RegionKind::Leaf(current) if *current == value => false,
            RegionKind::Leaf(current) => {
                if node.bounds.splittable() {
                    let inherited = *current;
                    let children = Box::new(node.bounds.split().map(|bounds| RegionNode {
                        bounds,
                        kind: RegionKind::Leaf(inherited),
                    }));
                    node.kind = RegionKind::Branch(children);
                    if let RegionKind::Branch(children) = &mut node.kind {
                        let idx = node.bounds.quadrant_of(x, y) as usize;
                        Self::insert_node(&mut children[idx], x, y, value, filled)
                    } else {
                        false
                    }
                } else {
                    // Unit cell: flip and adjust the filled count. Trees
                    // built with a true default start from zero, so the
                    // count never goes below that.
                    *current = value;
                    if value {
                        *filled += 1;
                    } else {
                        *filled = filled.saturating_sub(1);
                    }
                    true
                }
            }
        }
    }

    /// Collapses the node when every non-degenerate child is a leaf with the
    /// same value. Degenerate children never hold cells and act as wildcards.
    fn try_merge(node: &mut RegionNode<K>) {
        let merged = match &node.kind {
            RegionKind::Branch(children) => {
                let mut value = None;
                let mut uniform = true;
                for child in children.iter() {
                    if child.bounds.is_degenerate() {
                        continue;
                    }
                    match &child.kind {
                        RegionKind::Leaf(v) => match value {
                            None => value = Some(*v),
                            Some(prev) if prev == *v => {}
                            Some(_) => {
                                uniform = false;
                                break;
                            }
                        },
                        RegionKind::Branch(_) => {
                            uniform = false;
                            break;
                        }
                    }
                }
                if uniform { value } else { None }
            }
            RegionKind::Leaf(_) => None,
        };
        if let Some(value) = merged {
            node.kind = RegionKind::Leaf(value);
        }
    }

    /// Row-major 0/1 grid of the covered area, top row first.
    pub fn render_grid(&self) -> String {
        if self.root.is_none() {
            return "empty quadtree\n".to_string();
        }
        let bounds = self.root_bounds();
        let mut out = String::new();
        let mut row = bounds.top - K::one();
        while row >= bounds.bottom {
            let mut col = bounds.left;
            while col < bounds.right {
                out.push(if self.get(col, row) { '1' } else { '0' });
                out.push(' ');
                col = col + K::one();
            }
            out.push('\n');
            row = row - K::one();
        }
        out
    }
}

fn compute_depth<K>(node: &RegionNode<K>) -> usize {
    match &node.kind {
        RegionKind::Leaf(_) => 0,
        RegionKind::Branch(children) => {
            1 + max_of(children.iter().map(compute_depth)).unwrap_or(0)
        }
    }
}

fn fold_min<K: Scalar>(values: impl Iterator<Item = K>) -> K {
    values
        .reduce(|a, b| if b < a { b } else { a })
        .unwrap_or_else(K::zero)
}

fn fold_max<K: Scalar>(values: impl Iterator<Item = K>) -> K {
    max_of(values).unwrap_or_else(K::zero)
}

/// Even-odd ray casting test.
fn point_in_polygon<K: Scalar>(polygon: &[Point2<K>], x: K, y: K) -> bool {
    let px = x.to_f64();
    let py = y.to_f64();
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (xi, yi) = (polygon[i].x.to_f64(), polygon[i].y.to_f64());
        let (xj, yj) = (polygon[j].x.to_f64(), polygon[j].y.to_f64());
        if (yi > py) != (yj > py) {
            let x_cross = xi + (py - yi) * (xj - xi) / (yj - yi);
            if px < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

impl<K: Scalar> fmt::Display for RegionQuadtree<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_grid())
    }
}
