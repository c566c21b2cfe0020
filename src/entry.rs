//! Indexable entries: geometries composed with identifier payloads.
//!
//! The index stores plain `Copy` records. Sum types ([`GeometryEntry`],
//! [`MorphoEntry`]) are tagged enums matched exhaustively; tree predicates
//! dispatch on the tag once per candidate, never through dynamic dispatch.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::geometry::{Cylinder, Sphere};
use crate::ids::{GidSegm, Identifier, MorphPartId, ShapeId, SubtreeId, SynapseId};
use crate::point::{Box3D, CoordType, Point3D};

/// Borrowed view of an entry's geometry, the dispatch point of every
/// exact-geometry predicate.
#[derive(Debug, Clone, Copy)]
pub enum GeometryRef<'a> {
    Sphere(&'a Sphere),
    Cylinder(&'a Cylinder),
    Box(&'a Box3D),
}

/// Anything the R-tree and the voxel grid can store.
pub trait TreeEntry: Copy {
    /// Axis-aligned box fully enclosing the exact shape (including caps).
    fn bounding_box(&self) -> Box3D;

    /// The exact geometry for best-effort predicates.
    fn geometry(&self) -> GeometryRef<'_>;

    /// Representative centre, used by the STR partitioners.
    #[inline]
    fn center(&self) -> Point3D {
        self.bounding_box().center()
    }
}

/// Entries carrying a raw 64-bit identifier.
pub trait RawId {
    fn raw_id(&self) -> Identifier;
}

/// Entries whose identifier unpacks into (gid, section_id, segment_id).
pub trait MorphIds {
    fn gid_segm(&self) -> GidSegm;
}

/// Entries countable per gid (`count_intersecting_agg_gid`).
///
/// Morphology pieces aggregate by their cell gid; synapses aggregate by the
/// post-synaptic gid.
pub trait AggGid {
    fn agg_gid(&self) -> Identifier;
}

/// Geometry kind tag of an [`EntryRecord`].
pub mod record_kind {
    pub const SPHERE: u32 = 0;
    pub const CYLINDER: u32 = 1;
}

/// Flat export record for bulk numeric consumers.
///
/// `#[repr(C)]` and `Pod` so result vectors can be handed over as raw numeric
/// buffers without copying.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct EntryRecord {
    pub gid: Identifier,
    pub section_id: u32,
    pub segment_id: u32,
    /// Sphere centroid, or segment midpoint for cylinders.
    pub centroid: Point3D,
    pub radius: CoordType,
    /// One of [`record_kind`].
    pub kind: u32,
    pub reserved: u32,
}

/// Entries that can be projected into an [`EntryRecord`].
pub trait ExportRecord {
    fn export_record(&self) -> EntryRecord;
}

fn check_radius(radius: CoordType) -> Result<()> {
    if radius < 0.0 {
        return Err(IndexError::NegativeRadius(radius as f64));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Bare geometries as entries
// ---------------------------------------------------------------------------

impl TreeEntry for Sphere {
    #[inline]
    fn bounding_box(&self) -> Box3D {
        Sphere::bounding_box(self)
    }

    #[inline]
    fn geometry(&self) -> GeometryRef<'_> {
        GeometryRef::Sphere(self)
    }

    #[inline]
    fn center(&self) -> Point3D {
        self.centroid
    }
}

impl TreeEntry for Cylinder {
    #[inline]
    fn bounding_box(&self) -> Box3D {
        Cylinder::bounding_box(self)
    }

    #[inline]
    fn geometry(&self) -> GeometryRef<'_> {
        GeometryRef::Cylinder(self)
    }
}

/// An id-less geometry, either shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GeometryEntry {
    Sphere(Sphere),
    Cylinder(Cylinder),
}

impl From<Sphere> for GeometryEntry {
    #[inline]
    fn from(s: Sphere) -> Self {
        GeometryEntry::Sphere(s)
    }
}

impl From<Cylinder> for GeometryEntry {
    #[inline]
    fn from(c: Cylinder) -> Self {
        GeometryEntry::Cylinder(c)
    }
}

impl TreeEntry for GeometryEntry {
    #[inline]
    fn bounding_box(&self) -> Box3D {
        match self {
            GeometryEntry::Sphere(s) => s.bounding_box(),
            GeometryEntry::Cylinder(c) => c.bounding_box(),
        }
    }

    #[inline]
    fn geometry(&self) -> GeometryRef<'_> {
        match self {
            GeometryEntry::Sphere(s) => GeometryRef::Sphere(s),
            GeometryEntry::Cylinder(c) => GeometryRef::Cylinder(c),
        }
    }
}

// ---------------------------------------------------------------------------
// Identified entries
// ---------------------------------------------------------------------------

/// A sphere with a raw id.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexedSphere {
    pub id: ShapeId,
    pub geometry: Sphere,
}

impl IndexedSphere {
    pub fn new(id: Identifier, centroid: Point3D, radius: CoordType) -> Result<Self> {
        check_radius(radius)?;
        Ok(Self {
            id: ShapeId(id),
            geometry: Sphere::new(centroid, radius),
        })
    }
}

/// A cell body: a sphere identified by (gid, 0, 0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Soma {
    pub id: MorphPartId,
    pub geometry: Sphere,
}

impl Soma {
    pub fn new(gid: Identifier, centroid: Point3D, radius: CoordType) -> Result<Self> {
        check_radius(radius)?;
        Ok(Self {
            id: MorphPartId::new(gid, 0, 0)?,
            geometry: Sphere::new(centroid, radius),
        })
    }
}

/// A neurite segment: a capsule identified by (gid, section, segment).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: MorphPartId,
    pub geometry: Cylinder,
}

impl Segment {
    pub fn new(
        gid: Identifier,
        section_id: u32,
        segment_id: u32,
        p1: Point3D,
        p2: Point3D,
        radius: CoordType,
    ) -> Result<Self> {
        check_radius(radius)?;
        if p1 == p2 {
            return Err(IndexError::DegenerateCylinder);
        }
        Ok(Self {
            id: MorphPartId::new(gid, section_id, segment_id)?,
            geometry: Cylinder::new(p1, p2, radius),
        })
    }
}

/// A synapse: a zero-radius sphere identified by (id, post_gid, pre_gid).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Synapse {
    pub id: SynapseId,
    pub geometry: Sphere,
}

impl Synapse {
    pub fn new(
        id: Identifier,
        post_gid: Identifier,
        pre_gid: Identifier,
        position: Point3D,
    ) -> Self {
        Self {
            id: SynapseId::new(id, post_gid, pre_gid),
            geometry: Sphere::new(position, 0.0),
        }
    }
}

/// Bounding box of one persisted subtree, the entry type of top-level trees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexedSubtreeBox {
    pub id: SubtreeId,
    pub bounds: Box3D,
}

impl IndexedSubtreeBox {
    pub fn new(id: u64, n_elements: u64, bounds: Box3D) -> Self {
        Self {
            id: SubtreeId::new(id, n_elements),
            bounds,
        }
    }
}

/// One piece of a morphology, soma or segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MorphoEntry {
    Soma(Soma),
    Segment(Segment),
}

macro_rules! impl_tree_entry_sphere {
    ($ty:ty) => {
        impl TreeEntry for $ty {
            #[inline]
            fn bounding_box(&self) -> Box3D {
                self.geometry.bounding_box()
            }

            #[inline]
            fn geometry(&self) -> GeometryRef<'_> {
                GeometryRef::Sphere(&self.geometry)
            }

            #[inline]
            fn center(&self) -> Point3D {
                self.geometry.centroid
            }
        }
    };
}

impl_tree_entry_sphere!(IndexedSphere);
impl_tree_entry_sphere!(Soma);
impl_tree_entry_sphere!(Synapse);

impl TreeEntry for Segment {
    #[inline]
    fn bounding_box(&self) -> Box3D {
        self.geometry.bounding_box()
    }

    #[inline]
    fn geometry(&self) -> GeometryRef<'_> {
        GeometryRef::Cylinder(&self.geometry)
    }
}

impl TreeEntry for MorphoEntry {
    #[inline]
    fn bounding_box(&self) -> Box3D {
        match self {
            MorphoEntry::Soma(s) => s.bounding_box(),
            MorphoEntry::Segment(s) => s.bounding_box(),
        }
    }

    #[inline]
    fn geometry(&self) -> GeometryRef<'_> {
        match self {
            MorphoEntry::Soma(s) => s.geometry(),
            MorphoEntry::Segment(s) => s.geometry(),
        }
    }

    #[inline]
    fn center(&self) -> Point3D {
        match self {
            MorphoEntry::Soma(s) => s.center(),
            MorphoEntry::Segment(s) => s.center(),
        }
    }
}

impl TreeEntry for IndexedSubtreeBox {
    #[inline]
    fn bounding_box(&self) -> Box3D {
        self.bounds
    }

    #[inline]
    fn geometry(&self) -> GeometryRef<'_> {
        GeometryRef::Box(&self.bounds)
    }
}

// ---------------------------------------------------------------------------
// Id projections
// ---------------------------------------------------------------------------

impl RawId for IndexedSphere {
    #[inline]
    fn raw_id(&self) -> Identifier {
        self.id.0
    }
}

impl RawId for Soma {
    #[inline]
    fn raw_id(&self) -> Identifier {
        self.id.packed()
    }
}

impl RawId for Segment {
    #[inline]
    fn raw_id(&self) -> Identifier {
        self.id.packed()
    }
}

impl RawId for Synapse {
    #[inline]
    fn raw_id(&self) -> Identifier {
        self.id.id
    }
}

impl RawId for MorphoEntry {
    #[inline]
    fn raw_id(&self) -> Identifier {
        match self {
            MorphoEntry::Soma(s) => s.raw_id(),
            MorphoEntry::Segment(s) => s.raw_id(),
        }
    }
}

impl RawId for IndexedSubtreeBox {
    #[inline]
    fn raw_id(&self) -> Identifier {
        self.id.id
    }
}

impl MorphIds for Soma {
    #[inline]
    fn gid_segm(&self) -> GidSegm {
        self.id.unpack()
    }
}

impl MorphIds for Segment {
    #[inline]
    fn gid_segm(&self) -> GidSegm {
        self.id.unpack()
    }
}

impl MorphIds for MorphoEntry {
    #[inline]
    fn gid_segm(&self) -> GidSegm {
        match self {
            MorphoEntry::Soma(s) => s.gid_segm(),
            MorphoEntry::Segment(s) => s.gid_segm(),
        }
    }
}

impl AggGid for Soma {
    #[inline]
    fn agg_gid(&self) -> Identifier {
        self.id.gid()
    }
}

impl AggGid for Segment {
    #[inline]
    fn agg_gid(&self) -> Identifier {
        self.id.gid()
    }
}

impl AggGid for MorphoEntry {
    #[inline]
    fn agg_gid(&self) -> Identifier {
        match self {
            MorphoEntry::Soma(s) => s.agg_gid(),
            MorphoEntry::Segment(s) => s.agg_gid(),
        }
    }
}

impl AggGid for Synapse {
    #[inline]
    fn agg_gid(&self) -> Identifier {
        self.id.post_gid
    }
}

impl ExportRecord for IndexedSphere {
    fn export_record(&self) -> EntryRecord {
        EntryRecord {
            gid: self.id.0,
            centroid: self.geometry.centroid,
            radius: self.geometry.radius,
            kind: record_kind::SPHERE,
            ..Default::default()
        }
    }
}

impl ExportRecord for Synapse {
    fn export_record(&self) -> EntryRecord {
        EntryRecord {
            gid: self.id.post_gid,
            centroid: self.geometry.centroid,
            radius: self.geometry.radius,
            kind: record_kind::SPHERE,
            ..Default::default()
        }
    }
}

impl ExportRecord for MorphoEntry {
    fn export_record(&self) -> EntryRecord {
        let ids = self.gid_segm();
        match self {
            MorphoEntry::Soma(s) => EntryRecord {
                gid: ids.gid,
                section_id: ids.section_id,
                segment_id: ids.segment_id,
                centroid: s.geometry.centroid,
                radius: s.geometry.radius,
                kind: record_kind::SPHERE,
                ..Default::default()
            },
            MorphoEntry::Segment(s) => EntryRecord {
                gid: ids.gid,
                section_id: ids.section_id,
                segment_id: ids.segment_id,
                centroid: (s.geometry.p1 + s.geometry.p2) * 0.5,
                radius: s.geometry.radius,
                kind: record_kind::CYLINDER,
                ..Default::default()
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Bulk builders over raw source arrays
// ---------------------------------------------------------------------------

/// Build somas from parallel arrays of gids, centroids and radii.
pub fn somas_from_arrays(
    gids: &[Identifier],
    centroids: &[Point3D],
    radii: &[CoordType],
) -> Result<Vec<MorphoEntry>> {
    debug_assert_eq!(gids.len(), centroids.len());
    debug_assert_eq!(gids.len(), radii.len());
    gids.iter()
        .zip(centroids)
        .zip(radii)
        .map(|((&gid, &c), &r)| Ok(MorphoEntry::Soma(Soma::new(gid, c, r)?)))
        .collect()
}

/// Build the segments of a single-section neurite from a polyline.
///
/// Consecutive points become one segment each; the segment radius is the
/// radius at the segment's first point. Section id is 1 (0 is the soma).
pub fn neuron_from_polyline(
    gid: Identifier,
    points: &[Point3D],
    radii: &[CoordType],
) -> Result<Vec<MorphoEntry>> {
    debug_assert_eq!(points.len(), radii.len());
    points
        .windows(2)
        .enumerate()
        .map(|(i, w)| {
            Ok(MorphoEntry::Segment(Segment::new(
                gid, 1, i as u32, w[0], w[1], radii[i],
            )?))
        })
        .collect()
}

/// Build segments for a multi-branch morphology.
///
/// `offsets` delimits branches inside `points` (one extra trailing offset);
/// branch `b` becomes section `b + 1`, its segments numbered from 0.
pub fn branches_from_offsets(
    gid: Identifier,
    points: &[Point3D],
    radii: &[CoordType],
    offsets: &[usize],
) -> Result<Vec<MorphoEntry>> {
    debug_assert_eq!(points.len(), radii.len());
    let mut out = Vec::with_capacity(points.len().saturating_sub(offsets.len().max(1) - 1));
    for (branch, bounds) in offsets.windows(2).enumerate() {
        let (start, end) = (bounds[0], bounds[1]);
        for (seg, i) in (start..end.saturating_sub(1)).enumerate() {
            out.push(MorphoEntry::Segment(Segment::new(
                gid,
                branch as u32 + 1,
                seg as u32,
                points[i],
                points[i + 1],
                radii[i],
            )?));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: CoordType, y: CoordType, z: CoordType) -> Point3D {
        Point3D::new(x, y, z)
    }

    #[test]
    fn constructors_validate() {
        assert!(matches!(
            IndexedSphere::new(1, p(0.0, 0.0, 0.0), -1.0),
            Err(IndexError::NegativeRadius(_))
        ));
        assert!(matches!(
            Segment::new(1, 0, 0, p(1.0, 1.0, 1.0), p(1.0, 1.0, 1.0), 1.0),
            Err(IndexError::DegenerateCylinder)
        ));
        assert!(matches!(
            Soma::new(1u64 << 40, p(0.0, 0.0, 0.0), 1.0),
            Err(IndexError::InvalidGid(_))
        ));
    }

    #[test]
    fn soma_ids_pack_gid_only() {
        let soma = Soma::new(7, p(1.0, 2.0, 3.0), 0.5).unwrap();
        let ids = soma.gid_segm();
        assert_eq!((ids.gid, ids.section_id, ids.segment_id), (7, 0, 0));
        assert_eq!(soma.agg_gid(), 7);
    }

    #[test]
    fn segment_bounding_box_encloses_caps() {
        let seg = Segment::new(3, 1, 2, p(0.0, 0.0, 0.0), p(10.0, 0.0, 0.0), 1.5).unwrap();
        let bb = seg.bounding_box();
        assert_eq!(bb.min, p(-1.5, -1.5, -1.5));
        assert_eq!(bb.max, p(11.5, 1.5, 1.5));
    }

    #[test]
    fn synapse_has_zero_radius() {
        let syn = Synapse::new(0, 1, 0, p(5.0, 0.0, 0.0));
        assert_eq!(syn.geometry.radius, 0.0);
        assert_eq!(syn.agg_gid(), 1);
        assert_eq!(syn.raw_id(), 0);
    }

    #[test]
    fn polyline_builder_segments() {
        let points: Vec<_> = (0..10).map(|i| p(i as CoordType, 0.0, 0.0)).collect();
        let radii = vec![1.0; 10];
        let entries = neuron_from_polyline(1, &points, &radii).unwrap();
        assert_eq!(entries.len(), 9);
        let ids = entries[3].gid_segm();
        assert_eq!((ids.gid, ids.section_id, ids.segment_id), (1, 1, 3));
    }

    #[test]
    fn branch_builder_sections() {
        // 5 points, 2 branches (3 + 2 points) => 3 segments.
        let points = [
            p(1.0, 1.0, 1.0),
            p(2.0, 2.0, 2.0),
            p(3.0, 3.0, 3.0),
            p(3.0, 2.0, 2.0),
            p(7.0, 7.0, 7.0),
        ];
        let radii = [1.0; 5];
        let offsets = [0usize, 3, 5];
        let entries = branches_from_offsets(9, &points, &radii, &offsets).unwrap();
        assert_eq!(entries.len(), 3);
        let first = entries[0].gid_segm();
        assert_eq!((first.gid, first.section_id, first.segment_id), (9, 1, 0));
        let last = entries[2].gid_segm();
        assert_eq!((last.gid, last.section_id, last.segment_id), (9, 2, 0));
    }
}
