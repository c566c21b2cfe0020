//! Coordinate scalar, points and axis-aligned boxes.
//!
//! The whole index is built for one scalar precision, chosen at compile time:
//! `f32` by default, `f64` with the `double-precision` feature. Points are
//! small `#[repr(C)]` records with a stable layout so they can live inside
//! memory-mapped arenas; arithmetic goes through `glam`.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Scalar type of every coordinate and radius in the index.
#[cfg(feature = "double-precision")]
pub type CoordType = f64;
/// Scalar type of every coordinate and radius in the index.
#[cfg(not(feature = "double-precision"))]
pub type CoordType = f32;

#[cfg(feature = "double-precision")]
pub(crate) type GlamVec = glam::DVec3;
#[cfg(not(feature = "double-precision"))]
pub(crate) type GlamVec = glam::Vec3;

/// A point in 3D circuit space.
///
/// Equality is *relative*: two points compare equal when their squared
/// distance is below `1e-8` times the squared norm of the left operand
/// (exact zero always compares equal). Use [`Point3D::to_glam`] for vector
/// arithmetic.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable, Serialize, Deserialize)]
pub struct Point3D {
    pub x: CoordType,
    pub y: CoordType,
    pub z: CoordType,
}

impl Point3D {
    #[inline]
    pub const fn new(x: CoordType, y: CoordType, z: CoordType) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub(crate) fn to_glam(self) -> GlamVec {
        GlamVec::new(self.x, self.y, self.z)
    }

    #[inline]
    pub(crate) fn from_glam(v: GlamVec) -> Self {
        Self::new(v.x, v.y, v.z)
    }

    /// Coordinate along `axis` (0 = x, 1 = y, 2 = z).
    #[inline]
    pub fn coord(&self, axis: usize) -> CoordType {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    #[inline]
    pub fn dot(self, other: Self) -> CoordType {
        self.to_glam().dot(other.to_glam())
    }

    #[inline]
    pub fn norm_sq(self) -> CoordType {
        self.to_glam().length_squared()
    }

    #[inline]
    pub fn norm(self) -> CoordType {
        self.to_glam().length()
    }

    #[inline]
    pub fn dist_sq(self, other: Self) -> CoordType {
        self.to_glam().distance_squared(other.to_glam())
    }

    /// Component-wise minimum.
    #[inline]
    pub fn min(self, other: Self) -> Self {
        Self::from_glam(self.to_glam().min(other.to_glam()))
    }

    /// Component-wise maximum.
    #[inline]
    pub fn max(self, other: Self) -> Self {
        Self::from_glam(self.to_glam().max(other.to_glam()))
    }
}

impl PartialEq for Point3D {
    fn eq(&self, other: &Self) -> bool {
        let dist2 = self.dist_sq(*other);
        if dist2 == 0.0 {
            return true;
        }
        dist2 < self.norm_sq() * 1e-8
    }
}

impl From<[CoordType; 3]> for Point3D {
    #[inline]
    fn from([x, y, z]: [CoordType; 3]) -> Self {
        Self::new(x, y, z)
    }
}

impl From<Point3D> for [CoordType; 3] {
    #[inline]
    fn from(p: Point3D) -> Self {
        [p.x, p.y, p.z]
    }
}

impl std::ops::Add for Point3D {
    type Output = Point3D;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::from_glam(self.to_glam() + rhs.to_glam())
    }
}

impl std::ops::Sub for Point3D {
    type Output = Point3D;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::from_glam(self.to_glam() - rhs.to_glam())
    }
}

impl std::ops::Mul<CoordType> for Point3D {
    type Output = Point3D;
    #[inline]
    fn mul(self, s: CoordType) -> Self {
        Self::from_glam(self.to_glam() * s)
    }
}

/// An axis-aligned box, the unit of storage inside R-tree nodes.
///
/// Intervals are closed: boxes that merely touch count as intersecting,
/// matching the bounding-box query mode.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Box3D {
    pub min: Point3D,
    pub max: Point3D,
}

impl Box3D {
    #[inline]
    pub const fn new(min: Point3D, max: Point3D) -> Self {
        Self { min, max }
    }

    /// The degenerate box of a single point.
    #[inline]
    pub fn from_point(p: Point3D) -> Self {
        Self::new(p, p)
    }

    /// Smallest box enclosing both operands.
    #[inline]
    pub fn union(self, other: Self) -> Self {
        Self::new(self.min.min(other.min), self.max.max(other.max))
    }

    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
            && self.min.z <= other.max.z
            && other.min.z <= self.max.z
    }

    #[inline]
    pub fn contains_point(&self, p: Point3D) -> bool {
        self.min.x <= p.x
            && p.x <= self.max.x
            && self.min.y <= p.y
            && p.y <= self.max.y
            && self.min.z <= p.z
            && p.z <= self.max.z
    }

    #[inline]
    pub fn center(&self) -> Point3D {
        Point3D::new(
            (self.min.x + self.max.x) * 0.5,
            (self.min.y + self.max.y) * 0.5,
            (self.min.z + self.max.z) * 0.5,
        )
    }

    /// Extent along `axis`.
    #[inline]
    pub fn extent(&self, axis: usize) -> CoordType {
        self.max.coord(axis) - self.min.coord(axis)
    }

    /// Axis with the largest extent; ties resolve to the lowest axis index.
    pub fn longest_axis(&self) -> usize {
        let mut best = 0;
        for axis in 1..3 {
            if self.extent(axis) > self.extent(best) {
                best = axis;
            }
        }
        best
    }

    /// Volume of the box (used by the insertion enlargement metric).
    #[inline]
    pub fn volume(&self) -> CoordType {
        self.extent(0).max(0.0) * self.extent(1).max(0.0) * self.extent(2).max(0.0)
    }

    /// Squared distance from `p` to the closest point of the box (0 inside).
    pub fn min_dist_sq(&self, p: Point3D) -> CoordType {
        let clamped = p.max(self.min).min(self.max);
        clamped.dist_sq(p)
    }
}

/// Project `x` onto the segment `[base, base + dir]`.
pub(crate) fn project_point_onto_segment(base: GlamVec, dir: GlamVec, x: GlamVec) -> GlamVec {
    let dir_dot_dir = dir.length_squared();
    let x_dot_dir = (x - base).dot(dir);
    let x_rel = (x_dot_dir / dir_dot_dir).clamp(0.0, 1.0);
    base + dir * x_rel
}
