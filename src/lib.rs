//! Spatial indexing for neural-morphology primitives.
//!
//! This crate indexes very large populations of brain-circuit geometries
//! (spheres for somas and synapses, capsule-like cylinders for neurite
//! segments) and answers intersection, counting, nearest-neighbour and
//! non-overlapping placement queries over them.
//!
//! # Example
//!
//! ```
//! use neurospace::{GeometryMode, IndexTree, IndexedSphere, Point3D, Sphere, SpatialQueries};
//!
//! let spheres = vec![
//!     IndexedSphere::new(0, Point3D::new(0.0, 0.0, 0.0), 2.0).unwrap(),
//!     IndexedSphere::new(1, Point3D::new(10.0, 0.0, 0.0), 2.5).unwrap(),
//!     IndexedSphere::new(2, Point3D::new(20.0, 0.0, 0.0), 4.0).unwrap(),
//! ];
//! let tree = IndexTree::from_entries(spheres);
//!
//! let probe = Sphere::new(Point3D::new(15.0, 0.0, 0.0), 2.0);
//! assert!(tree.is_intersecting(&probe, GeometryMode::BestEffort));
//! assert_eq!(tree.find_intersecting_ids(&probe, GeometryMode::BestEffort), vec![2]);
//! ```
//!
//! # Index variants
//!
//! * [`IndexTree`]: in-memory R-tree (fan-out 16, linear split), bulk-loaded
//!   with sort-tile-recursion and append-only afterwards.
//! * [`MemDiskIndex`]: the same tree in a packed layout inside a
//!   memory-mapped directory, for indices larger than RAM.
//! * [`SpatialGrid`]: a coarse uniform voxel grid used for staging and as
//!   the on-disk shard layout.
//!
//! All variants answer queries through the [`SpatialQueries`] mixin. Every
//! intersection query takes a [`GeometryMode`]: `BoundingBox` (default,
//! fast, may admit false positives for cylinders) or `BestEffort` (exact
//! predicates, capsule treatment for cylinders).
//!
//! # Distributed builds
//!
//! The [`distributed`] module partitions data sets of 10^7..10^10 elements
//! across a cluster with a two-level sort-tile-recursion, persists one
//! subtree per final tile and assembles a top-level tree of subtree
//! bounding boxes on the root rank.

pub mod cancel;
pub mod distributed;
mod entry;
mod error;
mod geometry;
mod grid;
mod ids;
mod io;
mod memdisk;
mod point;
mod rtree;

pub use entry::{
    branches_from_offsets, neuron_from_polyline, somas_from_arrays, AggGid, EntryRecord,
    ExportRecord, GeometryEntry, GeometryRef, IndexedSphere, IndexedSubtreeBox, MorphIds,
    MorphoEntry, RawId, Segment, Soma, Synapse, TreeEntry,
};
pub use error::{IndexError, Result};
pub use geometry::{distance_segment_segment, Cylinder, Sphere};
pub use grid::{point_to_voxel, MorphGrid, SpatialGrid};
pub use ids::{GidSegm, Identifier, MorphPartId, ShapeId, SubtreeId, SynapseId};
pub use io::STRUCT_VERSION;
pub use memdisk::{MemDiskIndex, MemDiskOptions, PackedEntry, PackedTreeView};
pub use point::{Box3D, CoordType, Point3D};
pub use rtree::{
    serial_sort_tile_recursion, GeometryMode, IndexTree, QueryShape, SerialStrParams,
    SpatialQueries, TreeNavigator, MAX_NODE_ENTRIES, MIN_NODE_ENTRIES,
};
