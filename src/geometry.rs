//! Geometric primitives and their exact intersection predicates.
//!
//! The stored "cylinder" is two shapes at once, and this is the most
//! error-prone corner of the kernel:
//!
//! * for **intersection** it is a *capsule*: the endpoints carry
//!   caps of the same radius;
//! * for **containment** ([`Cylinder::contains`]) it is a finite-axis
//!   cylinder, and points beyond either cap plane are outside.
//!
//! Predicates never fail: near-degenerate inputs are resolved by the epsilon
//! branches below and always yield a definite boolean.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::point::{project_point_onto_segment, Box3D, CoordType, GlamVec, Point3D};

/// A sphere; somas and synapses are stored as spheres.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Sphere {
    pub centroid: Point3D,
    pub radius: CoordType,
}

/// A capsule-like cylinder; neurite segments are stored as cylinders.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Cylinder {
    pub p1: Point3D,
    pub p2: Point3D,
    pub radius: CoordType,
}

impl Sphere {
    #[inline]
    pub const fn new(centroid: Point3D, radius: CoordType) -> Self {
        Self { centroid, radius }
    }

    #[inline]
    pub fn bounding_box(&self) -> Box3D {
        let r = Point3D::new(self.radius, self.radius, self.radius);
        Box3D::new(self.centroid - r, self.centroid + r)
    }

    #[inline]
    pub fn contains(&self, p: Point3D) -> bool {
        self.centroid.dist_sq(p) <= self.radius * self.radius
    }

    #[inline]
    pub fn intersects_sphere(&self, other: &Sphere) -> bool {
        let max_dist = self.radius + other.radius;
        self.centroid.dist_sq(other.centroid) <= max_dist * max_dist
    }

    /// Sphere vs capsule.
    ///
    /// Projects the sphere centre onto the axis; off-segment projections are
    /// resolved against the closer cap disc, projecting onto the diameter
    /// segment that points at the sphere centre.
    pub fn intersects_cylinder(&self, c: &Cylinder) -> bool {
        let centroid = self.centroid.to_glam();
        let p1 = c.p1.to_glam();
        let u = centroid - p1;
        let v = c.p2.to_glam() - p1;

        let v_dot_u = v.dot(u);
        let v_dot_v = v.length_squared();

        let max_distance = self.radius + c.radius;
        let max_distance_sq = max_distance * max_distance;

        if 0.0 <= v_dot_u && v_dot_u <= v_dot_v {
            // The centre projects onto the axis segment: infinite-cylinder
            // distance via Pythagoras.
            let dist_sq = u.length_squared() - v_dot_u * v_dot_u / v_dot_v;
            return dist_sq <= max_distance_sq;
        }

        let closer_cap = if v_dot_u < 0.0 { p1 } else { c.p2.to_glam() };

        if (centroid - closer_cap).length_squared() > max_distance_sq {
            return false;
        }

        // Project the centre onto the cap disc: take the diameter segment of
        // the disc that points towards the sphere centre and project onto it.
        let p = p1 + v * (v_dot_u / v_dot_v);
        let d = centroid - p;
        let d_norm = d.length();

        let centroid_to_cap = if d_norm < 100.0 * CoordType::EPSILON {
            // Centre lies on the axis: the cap centre is the closest point.
            closer_cap
        } else {
            project_point_onto_segment(
                closer_cap - d * (c.radius / d_norm),
                d * (2.0 * c.radius / d_norm),
                centroid,
            )
        };

        (centroid - centroid_to_cap).length_squared() <= self.radius * self.radius
    }
}

impl Cylinder {
    #[inline]
    pub const fn new(p1: Point3D, p2: Point3D, radius: CoordType) -> Self {
        Self { p1, p2, radius }
    }

    /// Bounding box of the *capsule*: both caps are fully enclosed.
    #[inline]
    pub fn bounding_box(&self) -> Box3D {
        let r = Point3D::new(self.radius, self.radius, self.radius);
        Box3D::new(self.p1.min(self.p2) - r, self.p1.max(self.p2) + r)
    }

    /// Finite-axis cylinder containment (caps are *not* rounded here).
    pub fn contains(&self, p: Point3D) -> bool {
        let axis = self.p2.to_glam() - self.p1.to_glam();
        let rel = p.to_glam() - self.p1.to_glam();
        let dot = rel.dot(axis);
        let axis_len_sq = axis.length_squared();

        // Beyond either cap plane?
        if dot < 0.0 || dot > axis_len_sq {
            return false;
        }
        // Perpendicular distance via the projection triangle.
        let dist_sq = rel.length_squared() - dot * dot / axis_len_sq;
        dist_sq <= self.radius * self.radius
    }

    #[inline]
    pub fn intersects_sphere(&self, s: &Sphere) -> bool {
        s.intersects_cylinder(self)
    }

    /// Capsule vs capsule: closest distance between the axis segments.
    #[inline]
    pub fn intersects_cylinder(&self, c: &Cylinder) -> bool {
        let min_dist = distance_segment_segment(self.p1, self.p2, c.p1, c.p2);
        min_dist <= self.radius + c.radius
    }
}

/// Minimum distance between segments `[s1_0, s1_1]` and `[s2_0, s2_1]`.
///
/// Closest-points-on-two-segments with the near-parallel branch and the four
/// edge clamps.
pub fn distance_segment_segment(
    s1_0: Point3D,
    s1_1: Point3D,
    s2_0: Point3D,
    s2_1: Point3D,
) -> CoordType {
    const EPSILON: CoordType = 1e-6;

    let u = s1_1.to_glam() - s1_0.to_glam();
    let v = s2_1.to_glam() - s2_0.to_glam();
    let w = s1_0.to_glam() - s2_0.to_glam();
    let a = u.length_squared();
    let b = u.dot(v);
    let c = v.length_squared();
    let d = u.dot(w);
    let e = v.dot(w);
    let big_d = a * c - b * b;

    let mut s_n;
    let mut s_d = big_d;
    let mut t_n;
    let mut t_d = big_d;

    if big_d < EPSILON {
        // Near-parallel: pin to the start of the first segment.
        s_n = 0.0;
        s_d = 1.0;
        t_n = e;
        t_d = c;
    } else {
        s_n = b * e - c * d;
        t_n = a * e - b * d;
        if s_n < 0.0 {
            s_n = 0.0;
            t_n = e;
            t_d = c;
        } else if s_n > s_d {
            s_n = s_d;
            t_n = e + b;
            t_d = c;
        }
    }

    if t_n < 0.0 {
        t_n = 0.0;
        if -d < 0.0 {
            s_n = 0.0;
        } else if -d > a {
            s_n = s_d;
        } else {
            s_n = -d;
            s_d = a;
        }
    } else if t_n > t_d {
        t_n = t_d;
        if (-d + b) < 0.0 {
            s_n = 0.0;
        } else if (-d + b) > a {
            s_n = s_d;
        } else {
            s_n = -d + b;
            s_d = a;
        }
    }

    let sc = if s_n.abs() < EPSILON { 0.0 } else { s_n / s_d };
    let tc = if t_n.abs() < EPSILON { 0.0 } else { t_n / t_d };

    let dp: GlamVec = w + u * sc - v * tc;
    dp.length()
}
