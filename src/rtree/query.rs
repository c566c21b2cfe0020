//! The uniform query surface over every index variant.
//!
//! [`TreeNavigator`] abstracts node traversal (implemented by the in-memory
//! [`IndexTree`] and the memory-mapped packed view); [`SpatialQueries`] is a
//! blanket mixin providing the read-only operations on top of it. All
//! geometric semantics come from the kernel predicates; this module is glue.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rustc_hash::FxHashMap;

use super::{Child, IndexTree};
use crate::entry::{
    AggGid, EntryRecord, ExportRecord, GeometryRef, MorphIds, RawId, TreeEntry,
};
use crate::geometry::{Cylinder, Sphere};
use crate::ids::{GidSegm, Identifier};
use crate::point::{Box3D, CoordType, Point3D};

/// How indexed elements are matched against the query shape.
///
/// The query shape itself is always exact; the mode selects what it is tested
/// against on the element side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GeometryMode {
    /// Test against the element's stored bounding box. Fast; may admit false
    /// positives for cylinders.
    #[default]
    BoundingBox,
    /// Test against the exact element geometry (capsule treatment for
    /// cylinders).
    BestEffort,
}

/// Total-order float wrapper for heap keys.
///
/// Uses `total_cmp`; NaN ordering is consistent rather than checked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrdCoord(pub CoordType);

impl Eq for OrdCoord {}

impl PartialOrd for OrdCoord {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdCoord {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// A shape an index can be probed with.
pub trait QueryShape {
    /// Bounding box used for node pruning.
    fn query_box(&self) -> Box3D;

    /// Exact test against an element geometry (the element side of
    /// [`GeometryMode::BestEffort`]; boxes are the element side of
    /// [`GeometryMode::BoundingBox`]).
    fn intersects_geometry(&self, g: GeometryRef<'_>) -> bool;

    /// Lower distance bound to a box, for nearest-first traversal.
    fn min_dist_sq(&self, b: &Box3D) -> CoordType;
}

impl QueryShape for Point3D {
    #[inline]
    fn query_box(&self) -> Box3D {
        Box3D::from_point(*self)
    }

    fn intersects_geometry(&self, g: GeometryRef<'_>) -> bool {
        match g {
            GeometryRef::Sphere(s) => s.contains(*self),
            GeometryRef::Cylinder(c) => c.contains(*self),
            GeometryRef::Box(b) => b.contains_point(*self),
        }
    }

    #[inline]
    fn min_dist_sq(&self, b: &Box3D) -> CoordType {
        b.min_dist_sq(*self)
    }
}

impl QueryShape for Sphere {
    #[inline]
    fn query_box(&self) -> Box3D {
        self.bounding_box()
    }

    fn intersects_geometry(&self, g: GeometryRef<'_>) -> bool {
        match g {
            GeometryRef::Sphere(s) => self.intersects_sphere(s),
            GeometryRef::Cylinder(c) => self.intersects_cylinder(c),
            GeometryRef::Box(b) => b.min_dist_sq(self.centroid) <= self.radius * self.radius,
        }
    }

    #[inline]
    fn min_dist_sq(&self, b: &Box3D) -> CoordType {
        b.min_dist_sq(self.centroid)
    }
}

impl QueryShape for Cylinder {
    #[inline]
    fn query_box(&self) -> Box3D {
        self.bounding_box()
    }

    fn intersects_geometry(&self, g: GeometryRef<'_>) -> bool {
        match g {
            GeometryRef::Sphere(s) => s.intersects_cylinder(self),
            GeometryRef::Cylinder(c) => self.intersects_cylinder(c),
            // Box elements are compared in bounding-box space.
            GeometryRef::Box(b) => b.intersects(&self.bounding_box()),
        }
    }

    #[inline]
    fn min_dist_sq(&self, b: &Box3D) -> CoordType {
        b.min_dist_sq((self.p1 + self.p2) * 0.5)
    }
}

impl QueryShape for Box3D {
    #[inline]
    fn query_box(&self) -> Box3D {
        *self
    }

    fn intersects_geometry(&self, g: GeometryRef<'_>) -> bool {
        match g {
            GeometryRef::Sphere(s) => self.min_dist_sq(s.centroid) <= s.radius * s.radius,
            // Cylinder elements are compared through their bounding box.
            GeometryRef::Cylinder(c) => self.intersects(&c.bounding_box()),
            GeometryRef::Box(b) => self.intersects(b),
        }
    }

    fn min_dist_sq(&self, b: &Box3D) -> CoordType {
        let gap = |lo1: CoordType, hi1: CoordType, lo2: CoordType, hi2: CoordType| {
            (lo2 - hi1).max(lo1 - hi2).max(0.0)
        };
        let dx = gap(self.min.x, self.max.x, b.min.x, b.max.x);
        let dy = gap(self.min.y, self.max.y, b.min.y, b.max.y);
        let dz = gap(self.min.z, self.max.z, b.min.z, b.max.z);
        dx * dx + dy * dy + dz * dz
    }
}

/// One child slot of a node during traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildRef {
    Node(u32),
    Entry(u32),
}

/// Structural access to an R-tree, the seam between storage layouts and the
/// query mixin.
pub trait TreeNavigator<T: TreeEntry> {
    fn root_node(&self) -> Option<u32>;
    fn node_bbox(&self, node: u32) -> Box3D;
    fn visit_children(&self, node: u32, visit: &mut dyn FnMut(ChildRef));
    /// Copy of the entry at `idx`.
    fn entry(&self, idx: u32) -> T;
    fn n_entries(&self) -> usize;
}

impl<T: TreeEntry> TreeNavigator<T> for IndexTree<T> {
    #[inline]
    fn root_node(&self) -> Option<u32> {
        self.root
    }

    #[inline]
    fn node_bbox(&self, node: u32) -> Box3D {
        self.nodes[node as usize].bbox
    }

    fn visit_children(&self, node: u32, visit: &mut dyn FnMut(ChildRef)) {
        for child in &self.nodes[node as usize].children {
            visit(match child {
                Child::Node(c) => ChildRef::Node(*c),
                Child::Entry(e) => ChildRef::Entry(*e),
            });
        }
    }

    #[inline]
    fn entry(&self, idx: u32) -> T {
        self.entries[idx as usize]
    }

    #[inline]
    fn n_entries(&self) -> usize {
        self.entries.len()
    }
}

#[inline]
fn entry_matches<T: TreeEntry, S: QueryShape>(shape: &S, entry: &T, mode: GeometryMode) -> bool {
    match mode {
        GeometryMode::BoundingBox => {
            shape.intersects_geometry(GeometryRef::Box(&entry.bounding_box()))
        }
        GeometryMode::BestEffort => shape.intersects_geometry(entry.geometry()),
    }
}

/// Read-only query operations, provided for every [`TreeNavigator`].
pub trait SpatialQueries<T: TreeEntry>: TreeNavigator<T> {
    /// Stream every matching entry into `sink` with its slot index.
    fn find_intersecting_with<S: QueryShape>(
        &self,
        shape: &S,
        mode: GeometryMode,
        sink: &mut dyn FnMut(u32, T),
    ) {
        let Some(root) = self.root_node() else {
            return;
        };
        let qbox = shape.query_box();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if !self.node_bbox(node).intersects(&qbox) {
                continue;
            }
            self.visit_children(node, &mut |child| match child {
                ChildRef::Node(c) => stack.push(c),
                ChildRef::Entry(e) => {
                    let entry = self.entry(e);
                    if entry_matches(shape, &entry, mode) {
                        sink(e, entry);
                    }
                }
            });
        }
    }

    /// Matching entries (copies), in unspecified order.
    fn find_intersecting<S: QueryShape>(&self, shape: &S, mode: GeometryMode) -> Vec<T> {
        let mut out = Vec::new();
        self.find_intersecting_with(shape, mode, &mut |_, e| out.push(e));
        out
    }

    /// Raw 64-bit ids of matching entries.
    fn find_intersecting_ids<S: QueryShape>(&self, shape: &S, mode: GeometryMode) -> Vec<Identifier>
    where
        T: RawId,
    {
        let mut out = Vec::new();
        self.find_intersecting_with(shape, mode, &mut |_, e| out.push(e.raw_id()));
        out
    }

    /// Unpacked (gid, section, segment) triples of matching entries.
    fn find_intersecting_gid_segm<S: QueryShape>(
        &self,
        shape: &S,
        mode: GeometryMode,
    ) -> Vec<GidSegm>
    where
        T: MorphIds,
    {
        let mut out = Vec::new();
        self.find_intersecting_with(shape, mode, &mut |_, e| out.push(e.gid_segm()));
        out
    }

    /// Centroids of matching entries.
    fn find_intersecting_pos<S: QueryShape>(&self, shape: &S, mode: GeometryMode) -> Vec<Point3D> {
        let mut out = Vec::new();
        self.find_intersecting_with(shape, mode, &mut |_, e| out.push(e.center()));
        out
    }

    /// Flat POD records of matching entries, for bulk numeric consumers.
    fn find_intersecting_records<S: QueryShape>(
        &self,
        shape: &S,
        mode: GeometryMode,
    ) -> Vec<EntryRecord>
    where
        T: ExportRecord,
    {
        let mut out = Vec::new();
        self.find_intersecting_with(shape, mode, &mut |_, e| out.push(e.export_record()));
        out
    }

    /// Whether any element matches; stops at the first hit.
    fn is_intersecting<S: QueryShape>(&self, shape: &S, mode: GeometryMode) -> bool {
        let Some(root) = self.root_node() else {
            return false;
        };
        let qbox = shape.query_box();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if !self.node_bbox(node).intersects(&qbox) {
                continue;
            }
            let mut hit = false;
            self.visit_children(node, &mut |child| {
                if hit {
                    return;
                }
                match child {
                    ChildRef::Node(c) => stack.push(c),
                    ChildRef::Entry(e) => {
                        if entry_matches(shape, &self.entry(e), mode) {
                            hit = true;
                        }
                    }
                }
            });
            if hit {
                return true;
            }
        }
        false
    }

    /// Number of matching elements; equals `find_intersecting(..).len()`.
    fn count_intersecting<S: QueryShape>(&self, shape: &S, mode: GeometryMode) -> usize {
        let mut count = 0usize;
        self.find_intersecting_with(shape, mode, &mut |_, _| count += 1);
        count
    }

    /// Matching elements aggregated per gid. The values sum to
    /// `count_intersecting`; key order is unspecified.
    fn count_intersecting_agg_gid<S: QueryShape>(
        &self,
        shape: &S,
        mode: GeometryMode,
    ) -> FxHashMap<Identifier, usize>
    where
        T: AggGid,
    {
        let mut counts = FxHashMap::default();
        self.find_intersecting_with(shape, mode, &mut |_, e| {
            *counts.entry(e.agg_gid()).or_insert(0) += 1;
        });
        counts
    }

    /// The `k` entries nearest to `shape` by bounding-box distance, ascending,
    /// ties broken by raw id. `k` is capped at the tree size.
    fn find_nearest<S: QueryShape>(&self, shape: &S, k: usize) -> Vec<T>
    where
        T: RawId,
    {
        let mut out = Vec::with_capacity(k.min(self.n_entries()));
        let Some(root) = self.root_node() else {
            return out;
        };
        if k == 0 {
            return out;
        }

        // Best-first expansion: nodes enter with a lower bound, entries with
        // their final bbox distance (tie key: raw id). An entry popped from
        // the heap is settled.
        #[derive(PartialEq, Eq, PartialOrd, Ord)]
        enum Item {
            Node(u32),
            Entry(u32),
        }
        let mut heap: BinaryHeap<Reverse<(OrdCoord, Identifier, Item)>> = BinaryHeap::new();
        heap.push(Reverse((
            OrdCoord(shape.min_dist_sq(&self.node_bbox(root))),
            0,
            Item::Node(root),
        )));

        while let Some(Reverse((_, _, item))) = heap.pop() {
            match item {
                Item::Node(n) => {
                    self.visit_children(n, &mut |child| match child {
                        ChildRef::Node(c) => heap.push(Reverse((
                            OrdCoord(shape.min_dist_sq(&self.node_bbox(c))),
                            0,
                            Item::Node(c),
                        ))),
                        ChildRef::Entry(e) => {
                            let entry = self.entry(e);
                            heap.push(Reverse((
                                OrdCoord(shape.min_dist_sq(&entry.bounding_box())),
                                entry.raw_id(),
                                Item::Entry(e),
                            )));
                        }
                    });
                }
                Item::Entry(e) => {
                    out.push(self.entry(e));
                    if out.len() == k {
                        break;
                    }
                }
            }
        }
        out
    }

    /// Every stored raw id, in unspecified order.
    fn all_ids(&self) -> Vec<Identifier>
    where
        T: RawId,
    {
        (0..self.n_entries() as u32)
            .map(|i| self.entry(i).raw_id())
            .collect()
    }
}

impl<T: TreeEntry, N: TreeNavigator<T>> SpatialQueries<T> for N {}
