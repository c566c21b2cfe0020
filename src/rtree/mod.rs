//! Bulk-loaded R-tree over morphology entries.
//!
//! Arena-of-nodes layout: nodes live in one `Vec`, entries in another, and
//! children reference both by index. Fan-out is 16 with Guttman's linear
//! split and no reinsertion; bulk construction goes through the serial
//! sort-tile-recursion loader in [`build`]. The tree is append-only between
//! rebuilds: entries are never removed or mutated once inserted.

mod build;
mod query;

pub(crate) use build::even_boundaries;
pub use build::{serial_sort_tile_recursion, SerialStrParams};
pub use query::{
    ChildRef, GeometryMode, OrdCoord, QueryShape, SpatialQueries, TreeNavigator,
};

use serde::{Deserialize, Serialize};

use crate::entry::TreeEntry;
use crate::point::{Box3D, CoordType, Point3D};
use crate::Sphere;

/// Maximum children per node; matches the hard-coded fan-out of the
/// on-disk layout.
pub const MAX_NODE_ENTRIES: usize = 16;
/// Minimum fill after a split.
pub const MIN_NODE_ENTRIES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Child {
    Node(u32),
    Entry(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Node {
    pub(crate) bbox: Box3D,
    pub(crate) leaf: bool,
    pub(crate) children: Vec<Child>,
}

/// In-memory R-tree index.
///
/// Query operations come from the [`SpatialQueries`] mixin, shared with the
/// memory-mapped variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexTree<T> {
    pub(crate) nodes: Vec<Node>,
    pub(crate) entries: Vec<T>,
    pub(crate) root: Option<u32>,
}

impl<T: TreeEntry> IndexTree<T> {
    /// An empty tree.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            entries: Vec::new(),
            root: None,
        }
    }

    /// Bulk-load a tree with sort-tile-recursion.
    pub fn from_entries(entries: Vec<T>) -> Self
    where
        T: Send,
    {
        build::bulk_load(entries)
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bounding box of the whole tree, `None` when empty.
    pub fn bounds(&self) -> Option<Box3D> {
        self.root.map(|r| self.nodes[r as usize].bbox)
    }

    /// Iterate over every stored entry, in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Append one entry, splitting nodes on overflow.
    pub fn insert(&mut self, entry: T) {
        let bbox = entry.bounding_box();
        let entry_idx = self.entries.len() as u32;
        self.entries.push(entry);

        let Some(root) = self.root else {
            self.nodes.push(Node {
                bbox,
                leaf: true,
                children: vec![Child::Entry(entry_idx)],
            });
            self.root = Some(0);
            return;
        };

        if let Some(sibling) = self.insert_at(root, entry_idx, bbox) {
            // Root overflowed: grow the tree by one level.
            let new_bbox = self.nodes[root as usize]
                .bbox
                .union(self.nodes[sibling as usize].bbox);
            let new_root = self.nodes.len() as u32;
            self.nodes.push(Node {
                bbox: new_bbox,
                leaf: false,
                children: vec![Child::Node(root), Child::Node(sibling)],
            });
            self.root = Some(new_root);
        }
    }

    /// Recursive insertion; returns the index of a freshly split-off sibling
    /// when `node` overflowed.
    fn insert_at(&mut self, node: u32, entry_idx: u32, bbox: Box3D) -> Option<u32> {
        let n = node as usize;
        self.nodes[n].bbox = self.nodes[n].bbox.union(bbox);

        if self.nodes[n].leaf {
            self.nodes[n].children.push(Child::Entry(entry_idx));
            if self.nodes[n].children.len() > MAX_NODE_ENTRIES {
                return Some(self.split_node(node));
            }
            return None;
        }

        let chosen = self.choose_subtree(node, &bbox);
        let split = self.insert_at(chosen, entry_idx, bbox);

        if let Some(sibling) = split {
            self.nodes[n].children.push(Child::Node(sibling));
            if self.nodes[n].children.len() > MAX_NODE_ENTRIES {
                return Some(self.split_node(node));
            }
        }
        None
    }

    /// Least-enlargement child, ties broken by smaller volume.
    fn choose_subtree(&self, node: u32, bbox: &Box3D) -> u32 {
        let mut best = 0u32;
        let mut best_enlargement = CoordType::INFINITY;
        let mut best_volume = CoordType::INFINITY;
        for child in &self.nodes[node as usize].children {
            let Child::Node(c) = child else {
                unreachable!("inner node holds node children");
            };
            let cb = self.nodes[*c as usize].bbox;
            let volume = cb.volume();
            let enlargement = cb.union(*bbox).volume() - volume;
            if enlargement < best_enlargement
                || (enlargement == best_enlargement && volume < best_volume)
            {
                best = *c;
                best_enlargement = enlargement;
                best_volume = volume;
            }
        }
        best
    }

    fn child_bbox(&self, child: &Child) -> Box3D {
        match child {
            Child::Node(c) => self.nodes[*c as usize].bbox,
            Child::Entry(e) => self.entries[*e as usize].bounding_box(),
        }
    }

    /// Guttman linear split of an overflowing node. The node keeps one group;
    /// the other becomes a new sibling whose index is returned.
    fn split_node(&mut self, node: u32) -> u32 {
        let n = node as usize;
        let leaf = self.nodes[n].leaf;
        let children = std::mem::take(&mut self.nodes[n].children);
        let boxes: Vec<Box3D> = children.iter().map(|c| self.child_bbox(c)).collect();

        let (seed_a, seed_b) = linear_pick_seeds(&boxes);

        let mut group_a: Vec<Child> = vec![children[seed_a]];
        let mut bbox_a = boxes[seed_a];
        let mut group_b: Vec<Child> = vec![children[seed_b]];
        let mut bbox_b = boxes[seed_b];

        let mut remaining: Vec<usize> = (0..children.len())
            .filter(|&i| i != seed_a && i != seed_b)
            .collect();

        while let Some(i) = remaining.pop() {
            // A group that needs every remaining child to reach minimum fill
            // takes them without further comparison.
            let left = remaining.len() + 1;
            if group_a.len() + left == MIN_NODE_ENTRIES {
                bbox_a = bbox_a.union(boxes[i]);
                group_a.push(children[i]);
                continue;
            }
            if group_b.len() + left == MIN_NODE_ENTRIES {
                bbox_b = bbox_b.union(boxes[i]);
                group_b.push(children[i]);
                continue;
            }

            let enl_a = bbox_a.union(boxes[i]).volume() - bbox_a.volume();
            let enl_b = bbox_b.union(boxes[i]).volume() - bbox_b.volume();
            let take_a = match enl_a.partial_cmp(&enl_b) {
                Some(std::cmp::Ordering::Less) => true,
                Some(std::cmp::Ordering::Greater) => false,
                _ => bbox_a.volume() <= bbox_b.volume(),
            };
            if take_a {
                bbox_a = bbox_a.union(boxes[i]);
                group_a.push(children[i]);
            } else {
                bbox_b = bbox_b.union(boxes[i]);
                group_b.push(children[i]);
            }
        }

        self.nodes[n].children = group_a;
        self.nodes[n].bbox = bbox_a;

        let sibling = self.nodes.len() as u32;
        self.nodes.push(Node {
            bbox: bbox_b,
            leaf,
            children: group_b,
        });
        sibling
    }

    /// Non-overlapping placement of a sphere inside `region`.
    ///
    /// Probes centroids along the region's longest axis (ties resolve
    /// x -> y -> z), starting at `min + radius` steps of one radius, with the
    /// other two coordinates pinned to the region midpoint. Candidates are
    /// tested with exact geometry; the first free position is written into
    /// `sphere`, the sphere is inserted, and `true` is returned. Returns
    /// `false` once the scan axis is exhausted. Because successful placements
    /// are inserted, a subsequent identical call lands strictly further along
    /// the scan axis.
    pub fn place(&mut self, region: &Box3D, sphere: &mut Sphere) -> bool
    where
        T: From<Sphere>,
    {
        let axis = region.longest_axis();
        let step = sphere.radius;
        if step <= 0.0 {
            return false;
        }

        let mid = region.center();
        let lo = region.min.coord(axis) + step;
        let hi = region.max.coord(axis) - step;

        let mut coord = lo;
        while coord <= hi {
            let mut centroid = mid;
            match axis {
                0 => centroid.x = coord,
                1 => centroid.y = coord,
                _ => centroid.z = coord,
            }
            let candidate = Sphere::new(centroid, sphere.radius);
            if !self.is_intersecting(&candidate, GeometryMode::BestEffort) {
                sphere.centroid = centroid;
                self.insert(T::from(candidate));
                return true;
            }
            coord += step;
        }
        false
    }
}

/// Linear seed pick: for each axis take the pair with the greatest normalized
/// separation between the highest low side and the lowest high side.
fn linear_pick_seeds(boxes: &[Box3D]) -> (usize, usize) {
    debug_assert!(boxes.len() >= 2);
    let mut best_pair = (0usize, 1usize);
    let mut best_separation = CoordType::NEG_INFINITY;

    for axis in 0..3 {
        let mut lowest_low = 0usize;
        let mut highest_high = 0usize;
        let mut highest_low = 0usize;
        let mut lowest_high = 0usize;
        for (i, b) in boxes.iter().enumerate() {
            if b.min.coord(axis) < boxes[lowest_low].min.coord(axis) {
                lowest_low = i;
            }
            if b.max.coord(axis) > boxes[highest_high].max.coord(axis) {
                highest_high = i;
            }
            if b.min.coord(axis) > boxes[highest_low].min.coord(axis) {
                highest_low = i;
            }
            if b.max.coord(axis) < boxes[lowest_high].max.coord(axis) {
                lowest_high = i;
            }
        }
        let width =
            boxes[highest_high].max.coord(axis) - boxes[lowest_low].min.coord(axis);
        if width <= 0.0 {
            continue;
        }
        let separation = (boxes[highest_low].min.coord(axis)
            - boxes[lowest_high].max.coord(axis))
            / width;
        if separation > best_separation && highest_low != lowest_high {
            best_separation = separation;
            best_pair = (highest_low, lowest_high);
        }
    }

    if best_pair.0 == best_pair.1 {
        (0, 1)
    } else {
        best_pair
    }
}

/// Centre coordinate along one axis, the STR sort key.
#[inline]
pub(crate) fn center_coord<T: TreeEntry>(entry: &T, axis: usize) -> CoordType {
    entry.center().coord(axis)
}

pub(crate) fn bbox_of_entries<T: TreeEntry>(entries: &[T]) -> Box3D {
    let mut it = entries.iter();
    let first = it
        .next()
        .map(|e| e.bounding_box())
        .unwrap_or_else(|| Box3D::from_point(Point3D::default()));
    it.fold(first, |acc, e| acc.union(e.bounding_box()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Point3D;

    fn sphere(x: CoordType, r: CoordType) -> Sphere {
        Sphere::new(Point3D::new(x, 0.0, 0.0), r)
    }

    #[test]
    fn insert_grows_and_splits() {
        let mut tree: IndexTree<Sphere> = IndexTree::new();
        for i in 0..100 {
            tree.insert(sphere(i as CoordType, 0.4));
        }
        assert_eq!(tree.len(), 100);
        // Every node except the root respects the fan-out bounds.
        for (i, node) in tree.nodes.iter().enumerate() {
            assert!(node.children.len() <= MAX_NODE_ENTRIES);
            if Some(i as u32) != tree.root {
                assert!(!node.children.is_empty());
            }
        }
        let bounds = tree.bounds().unwrap();
        assert!(bounds.min.x <= -0.4 && bounds.max.x >= 99.4);
    }

    #[test]
    fn node_bboxes_cover_children() {
        let mut tree: IndexTree<Sphere> = IndexTree::new();
        for i in 0..200 {
            let x = ((i * 37) % 100) as CoordType;
            tree.insert(Sphere::new(Point3D::new(x, (i % 10) as CoordType, 0.0), 0.5));
        }
        for node in &tree.nodes {
            for child in &node.children {
                let cb = match child {
                    Child::Node(c) => tree.nodes[*c as usize].bbox,
                    Child::Entry(e) => tree.entries[*e as usize].bounding_box(),
                };
                assert_eq!(node.bbox.union(cb), node.bbox);
            }
        }
    }

    #[test]
    fn linear_seeds_pick_extremes() {
        let boxes = vec![
            Box3D::new(Point3D::new(0.0, 0.0, 0.0), Point3D::new(1.0, 1.0, 1.0)),
            Box3D::new(Point3D::new(10.0, 0.0, 0.0), Point3D::new(11.0, 1.0, 1.0)),
            Box3D::new(Point3D::new(5.0, 0.0, 0.0), Point3D::new(6.0, 1.0, 1.0)),
        ];
        let (a, b) = linear_pick_seeds(&boxes);
        let mut pair = [a, b];
        pair.sort_unstable();
        assert_eq!(pair, [0, 1]);
    }
}
