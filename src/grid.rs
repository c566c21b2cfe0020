//! Coarse uniform voxel grid.
//!
//! `SpatialGrid` maps integer voxel coordinates (floor division by the
//! compile-time voxel length) to buckets of entries. It serves as a staging
//! index while streaming a circuit in, and as the on-disk shard layout.
//!
//! Insertion is deliberately approximate: an entry goes into the voxel of its
//! bounding box `min` corner and, when different, also the voxel of its `max`
//! corner. That is two cells at most, although a box may cross up to eight.
//! Neurite
//! cylinders are long and thin, which keeps the miss rate acceptable; readers
//! enumerating across voxels must de-duplicate if single-shot delivery is
//! required.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::entry::{MorphoEntry, TreeEntry};
use crate::error::Result;
use crate::ids::Identifier;
use crate::point::{CoordType, Point3D};

/// Voxel coordinate of a point for a given voxel edge length.
#[inline]
pub fn point_to_voxel(p: Point3D, voxel_len: i32) -> [i32; 3] {
    let l = voxel_len as CoordType;
    [
        (p.x / l).floor() as i32,
        (p.y / l).floor() as i32,
        (p.z / l).floor() as i32,
    ]
}

/// Uniform-cell spatial index with compile-time voxel length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialGrid<T, const VOXEL_LEN: i32> {
    grid: FxHashMap<[i32; 3], Vec<T>>,
}

impl<T, const VOXEL_LEN: i32> Default for SpatialGrid<T, VOXEL_LEN> {
    fn default() -> Self {
        Self {
            grid: FxHashMap::default(),
        }
    }
}

impl<T: TreeEntry, const VOXEL_LEN: i32> SpatialGrid<T, VOXEL_LEN> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one entry under its bounding-box corner voxels (at most two).
    pub fn insert(&mut self, value: T) {
        let bbox = value.bounding_box();
        let vx1 = point_to_voxel(bbox.min, VOXEL_LEN);
        let vx2 = point_to_voxel(bbox.max, VOXEL_LEN);
        self.grid.entry(vx1).or_default().push(value);
        if vx1 != vx2 {
            self.grid.entry(vx2).or_default().push(value);
        }
    }

    pub fn extend<I: IntoIterator<Item = T>>(&mut self, values: I) {
        for v in values {
            self.insert(v);
        }
    }

    /// Total number of stored items, counting two-cell entries twice.
    pub fn len(&self) -> usize {
        self.grid.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    /// Number of occupied voxels.
    pub fn voxel_count(&self) -> usize {
        self.grid.len()
    }

    /// Occupied voxel coordinates, in unspecified order.
    pub fn voxels(&self) -> Vec<[i32; 3]> {
        self.grid.keys().copied().collect()
    }

    /// Bucket of one voxel; empty when unoccupied.
    pub fn bucket(&self, voxel: [i32; 3]) -> &[T] {
        self.grid.get(&voxel).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterate `(voxel, bucket)` pairs, in unspecified order.
    pub fn items(&self) -> impl Iterator<Item = ([i32; 3], &[T])> {
        self.grid.iter().map(|(k, v)| (*k, v.as_slice()))
    }
}

/// Merge: per-cell buckets are concatenated, existing elements keep their
/// order and the right-hand side is appended.
impl<T: TreeEntry, const VOXEL_LEN: i32> std::ops::AddAssign for SpatialGrid<T, VOXEL_LEN> {
    fn add_assign(&mut self, rhs: Self) {
        for (key, mut bucket) in rhs.grid {
            self.grid.entry(key).or_default().append(&mut bucket);
        }
    }
}

/// Voxel grid over morphology pieces with bulk loading helpers.
pub type MorphGrid<const VOXEL_LEN: i32> = SpatialGrid<MorphoEntry, VOXEL_LEN>;

impl<const VOXEL_LEN: i32> SpatialGrid<MorphoEntry, VOXEL_LEN> {
    /// Add one soma per element of the parallel arrays.
    pub fn add_somas(
        &mut self,
        gids: &[Identifier],
        centroids: &[Point3D],
        radii: &[CoordType],
    ) -> Result<()> {
        self.extend(crate::entry::somas_from_arrays(gids, centroids, radii)?);
        Ok(())
    }

    /// Add the segments of a single-section neurite.
    pub fn add_neuron(
        &mut self,
        gid: Identifier,
        points: &[Point3D],
        radii: &[CoordType],
    ) -> Result<()> {
        self.extend(crate::entry::neuron_from_polyline(gid, points, radii)?);
        Ok(())
    }

    /// Add a multi-branch morphology; `offsets` delimits branches.
    pub fn add_branches(
        &mut self,
        gid: Identifier,
        points: &[Point3D],
        radii: &[CoordType],
        offsets: &[usize],
    ) -> Result<()> {
        self.extend(crate::entry::branches_from_offsets(gid, points, radii, offsets)?);
        Ok(())
    }
}
