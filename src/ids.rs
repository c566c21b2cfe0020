//! Identifier types stored alongside geometries.
//!
//! A morphology piece carries three logical ids (gid, section, segment) but is
//! stored as a single 64-bit integer with explicit bit-field arithmetic: this
//! halves index memory against three machine words and fixes the on-disk
//! layout. Constructors reject any sub-field that does not fit its width.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

/// Raw identifier type of every entry.
pub type Identifier = u64;

pub const SEGMENT_BITS: u32 = 14;
pub const SECTION_BITS: u32 = 14;
pub const TOTAL_SUB_BITS: u32 = SEGMENT_BITS + SECTION_BITS;
pub const GID_BITS: u32 = 64 - TOTAL_SUB_BITS;

const fn mask_bits(n_bits: u32) -> u64 {
    (1u64 << n_bits) - 1
}

const MASK_SEGMENT: u64 = mask_bits(SEGMENT_BITS);
const MASK_SECTION: u64 = mask_bits(SECTION_BITS) << SEGMENT_BITS;

#[inline]
pub fn is_gid_safe(gid: Identifier) -> bool {
    (gid & !mask_bits(GID_BITS)) == 0
}

#[inline]
pub fn is_section_id_safe(section_id: u32) -> bool {
    (u64::from(section_id) & !mask_bits(SECTION_BITS)) == 0
}

#[inline]
pub fn is_segment_id_safe(segment_id: u32) -> bool {
    (u64::from(segment_id) & !mask_bits(SEGMENT_BITS)) == 0
}

/// A plain 64-bit id, used by bare indexed shapes.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize,
)]
pub struct ShapeId(pub Identifier);

/// Synapse identifier: the synapse id plus both connected cell gids.
///
/// `post_gid` is the aggregation key for per-gid counts.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct SynapseId {
    pub id: Identifier,
    pub post_gid: Identifier,
    pub pre_gid: Identifier,
}

impl SynapseId {
    #[inline]
    pub const fn new(id: Identifier, post_gid: Identifier, pre_gid: Identifier) -> Self {
        Self {
            id,
            post_gid,
            pre_gid,
        }
    }
}

/// Composite ids of one morphology piece, unpacked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GidSegm {
    pub gid: Identifier,
    pub section_id: u32,
    pub segment_id: u32,
}

/// Packed (gid, section_id, segment_id) of a morphology piece.
///
/// Layout, most significant first: gid (36 bits) | section (14) | segment (14).
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize,
)]
pub struct MorphPartId(Identifier);

impl MorphPartId {
    /// Pack the three sub-ids, rejecting any field that exceeds its width.
    pub fn new(gid: Identifier, section_id: u32, segment_id: u32) -> Result<Self> {
        if !is_gid_safe(gid) {
            return Err(IndexError::InvalidGid(gid));
        }
        if !is_section_id_safe(section_id) {
            return Err(IndexError::InvalidSectionId(section_id));
        }
        if !is_segment_id_safe(segment_id) {
            return Err(IndexError::InvalidSegmentId(segment_id));
        }
        Ok(Self(
            (gid << TOTAL_SUB_BITS)
                | (u64::from(section_id) << SEGMENT_BITS)
                | u64::from(segment_id),
        ))
    }

    /// The packed 64-bit value (the entry's raw id).
    #[inline]
    pub const fn packed(self) -> Identifier {
        self.0
    }

    /// Rebuild from an already-packed value (round-tripping stored ids).
    #[inline]
    pub(crate) const fn from_packed(value: Identifier) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn gid(self) -> Identifier {
        self.0 >> TOTAL_SUB_BITS
    }

    #[inline]
    pub const fn section_id(self) -> u32 {
        ((self.0 & MASK_SECTION) >> SEGMENT_BITS) as u32
    }

    #[inline]
    pub const fn segment_id(self) -> u32 {
        (self.0 & MASK_SEGMENT) as u32
    }

    #[inline]
    pub fn unpack(self) -> GidSegm {
        GidSegm {
            gid: self.gid(),
            section_id: self.section_id(),
            segment_id: self.segment_id(),
        }
    }
}

/// Identifier of one persisted subtree of a distributed build.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct SubtreeId {
    /// Global subtree id: `rank * local_parts + k`.
    pub id: u64,
    /// Number of elements persisted in the subtree.
    pub n_elements: u64,
}

impl SubtreeId {
    #[inline]
    pub const fn new(id: u64, n_elements: u64) -> Self {
        Self { id, n_elements }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_roundtrip() {
        let id = MorphPartId::new(0x8_1234_5678, 0x1abc, 0x2def).unwrap();
        assert_eq!(id.gid(), 0x8_1234_5678);
        assert_eq!(id.section_id(), 0x1abc);
        assert_eq!(id.segment_id(), 0x2def);

        let zero = MorphPartId::new(42, 0, 0).unwrap();
        assert_eq!(zero.unpack(), GidSegm { gid: 42, section_id: 0, segment_id: 0 });
    }

    #[test]
    fn pack_extremes() {
        let max_gid = (1u64 << GID_BITS) - 1;
        let max_sub = (1u32 << SECTION_BITS) - 1;
        let id = MorphPartId::new(max_gid, max_sub, max_sub).unwrap();
        assert_eq!(id.gid(), max_gid);
        assert_eq!(id.section_id(), max_sub);
        assert_eq!(id.segment_id(), max_sub);
    }

    #[test]
    fn pack_rejects_wide_fields() {
        assert!(matches!(
            MorphPartId::new(1u64 << GID_BITS, 0, 0),
            Err(IndexError::InvalidGid(_))
        ));
        assert!(matches!(
            MorphPartId::new(1, 1u32 << SECTION_BITS, 0),
            Err(IndexError::InvalidSectionId(_))
        ));
        assert!(matches!(
            MorphPartId::new(1, 0, 1u32 << SEGMENT_BITS),
            Err(IndexError::InvalidSegmentId(_))
        ));
    }

    #[test]
    fn packed_value_is_ordered_by_gid_first() {
        let a = MorphPartId::new(1, 0x3fff, 0x3fff).unwrap();
        let b = MorphPartId::new(2, 0, 0).unwrap();
        assert!(a.packed() < b.packed());
    }
}
