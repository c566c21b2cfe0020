//! Memory-mapped index directories for indices larger than RAM.
//!
//! A mapped index is a directory holding a fixed-capacity data file
//! (`index.dat`) and a small `meta.json` naming what lives inside. The data
//! file contains the packed entry array followed by the packed node levels of
//! a fan-out-16 STR tree, all `Pod` records accessed zero-copy through
//! `bytemuck` casts.
//!
//! Ownership: the arena owns the bytes; [`MemDiskIndex::tree`] hands out a
//! borrowing view, so a tree reference cannot outlive a closed index. One
//! writer creates the directory; any number of readers open it read-only.

use std::fs::{File, OpenOptions};
use std::marker::PhantomData;
use std::mem::size_of;
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use memmap2::{Mmap, MmapMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::entry::{
    GeometryEntry, IndexedSphere, IndexedSubtreeBox, MorphoEntry, Segment, Soma, Synapse,
    TreeEntry,
};
use crate::error::{IndexError, Result};
use crate::geometry::{Cylinder, Sphere};
use crate::io::STRUCT_VERSION;
use crate::point::{Box3D, CoordType, Point3D};
use crate::rtree::{
    center_coord, serial_sort_tile_recursion, ChildRef, SerialStrParams, TreeNavigator,
    MAX_NODE_ENTRIES,
};

const DATA_FILE: &str = "index.dat";
const META_FILE: &str = "meta.json";

#[inline]
fn split_u64(v: u64) -> [u32; 2] {
    [v as u32, (v >> 32) as u32]
}

#[inline]
fn join_u64(v: [u32; 2]) -> u64 {
    u64::from(v[0]) | (u64::from(v[1]) << 32)
}

/// Entries storable inside a mapped arena.
///
/// `Packed` is a flat `Pod` record with a stable layout; enums pack through a
/// tagged record. The kind tag guards a directory against being opened as the
/// wrong entry type.
pub trait PackedEntry: TreeEntry {
    type Packed: Pod;
    const KIND_TAG: &'static str;

    fn pack(&self) -> Self::Packed;
    fn unpack(packed: &Self::Packed) -> Self;
}

// --- packed records ---------------------------------------------------------
// u64 ids are stored as [u32; 2] halves so every record stays free of
// implicit padding in both scalar precisions.

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PackedSphere {
    centroid: [CoordType; 3],
    radius: CoordType,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PackedCylinder {
    p1: [CoordType; 3],
    p2: [CoordType; 3],
    radius: CoordType,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PackedIdSphere {
    centroid: [CoordType; 3],
    radius: CoordType,
    id: [u32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PackedSynapse {
    centroid: [CoordType; 3],
    radius: CoordType,
    id: [u32; 2],
    post_gid: [u32; 2],
    pre_gid: [u32; 2],
}

const MORPH_KIND_SOMA: u32 = 0;
const MORPH_KIND_SEGMENT: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PackedMorph {
    p1: [CoordType; 3],
    p2: [CoordType; 3],
    radius: CoordType,
    id: [u32; 2],
    kind: u32,
    _pad: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PackedSubtreeBox {
    min: [CoordType; 3],
    max: [CoordType; 3],
    id: [u32; 2],
    n_elements: [u32; 2],
}

impl PackedEntry for Sphere {
    type Packed = PackedSphere;
    const KIND_TAG: &'static str = "sphere";

    fn pack(&self) -> PackedSphere {
        PackedSphere {
            centroid: self.centroid.into(),
            radius: self.radius,
        }
    }

    fn unpack(p: &PackedSphere) -> Self {
        Sphere::new(p.centroid.into(), p.radius)
    }
}

impl PackedEntry for Cylinder {
    type Packed = PackedCylinder;
    const KIND_TAG: &'static str = "cylinder";

    fn pack(&self) -> PackedCylinder {
        PackedCylinder {
            p1: self.p1.into(),
            p2: self.p2.into(),
            radius: self.radius,
        }
    }

    fn unpack(p: &PackedCylinder) -> Self {
        Cylinder::new(p.p1.into(), p.p2.into(), p.radius)
    }
}

impl PackedEntry for IndexedSphere {
    type Packed = PackedIdSphere;
    const KIND_TAG: &'static str = "indexed_sphere";

    fn pack(&self) -> PackedIdSphere {
        PackedIdSphere {
            centroid: self.geometry.centroid.into(),
            radius: self.geometry.radius,
            id: split_u64(self.id.0),
        }
    }

    fn unpack(p: &PackedIdSphere) -> Self {
        IndexedSphere {
            id: crate::ids::ShapeId(join_u64(p.id)),
            geometry: Sphere::new(p.centroid.into(), p.radius),
        }
    }
}

impl PackedEntry for Synapse {
    type Packed = PackedSynapse;
    const KIND_TAG: &'static str = "synapse";

    fn pack(&self) -> PackedSynapse {
        PackedSynapse {
            centroid: self.geometry.centroid.into(),
            radius: self.geometry.radius,
            id: split_u64(self.id.id),
            post_gid: split_u64(self.id.post_gid),
            pre_gid: split_u64(self.id.pre_gid),
        }
    }

    fn unpack(p: &PackedSynapse) -> Self {
        Synapse {
            id: crate::ids::SynapseId::new(
                join_u64(p.id),
                join_u64(p.post_gid),
                join_u64(p.pre_gid),
            ),
            geometry: Sphere::new(p.centroid.into(), p.radius),
        }
    }
}

impl PackedEntry for MorphoEntry {
    type Packed = PackedMorph;
    const KIND_TAG: &'static str = "morpho";

    fn pack(&self) -> PackedMorph {
        match self {
            MorphoEntry::Soma(s) => PackedMorph {
                p1: s.geometry.centroid.into(),
                p2: s.geometry.centroid.into(),
                radius: s.geometry.radius,
                id: split_u64(s.id.packed()),
                kind: MORPH_KIND_SOMA,
                _pad: 0,
            },
            MorphoEntry::Segment(s) => PackedMorph {
                p1: s.geometry.p1.into(),
                p2: s.geometry.p2.into(),
                radius: s.geometry.radius,
                id: split_u64(s.id.packed()),
                kind: MORPH_KIND_SEGMENT,
                _pad: 0,
            },
        }
    }

    fn unpack(p: &PackedMorph) -> Self {
        match p.kind {
            MORPH_KIND_SOMA => MorphoEntry::Soma(Soma {
                id: crate::ids::MorphPartId::from_packed(join_u64(p.id)),
                geometry: Sphere::new(p.p1.into(), p.radius),
            }),
            _ => MorphoEntry::Segment(Segment {
                id: crate::ids::MorphPartId::from_packed(join_u64(p.id)),
                geometry: Cylinder::new(p.p1.into(), p.p2.into(), p.radius),
            }),
        }
    }
}

impl PackedEntry for GeometryEntry {
    type Packed = PackedMorph;
    const KIND_TAG: &'static str = "geometry";

    fn pack(&self) -> PackedMorph {
        match self {
            GeometryEntry::Sphere(s) => PackedMorph {
                p1: s.centroid.into(),
                p2: s.centroid.into(),
                radius: s.radius,
                id: [0, 0],
                kind: MORPH_KIND_SOMA,
                _pad: 0,
            },
            GeometryEntry::Cylinder(c) => PackedMorph {
                p1: c.p1.into(),
                p2: c.p2.into(),
                radius: c.radius,
                id: [0, 0],
                kind: MORPH_KIND_SEGMENT,
                _pad: 0,
            },
        }
    }

    fn unpack(p: &PackedMorph) -> Self {
        match p.kind {
            MORPH_KIND_SOMA => GeometryEntry::Sphere(Sphere::new(p.p1.into(), p.radius)),
            _ => GeometryEntry::Cylinder(Cylinder::new(p.p1.into(), p.p2.into(), p.radius)),
        }
    }
}

impl PackedEntry for IndexedSubtreeBox {
    type Packed = PackedSubtreeBox;
    const KIND_TAG: &'static str = "subtree_box";

    fn pack(&self) -> PackedSubtreeBox {
        PackedSubtreeBox {
            min: self.bounds.min.into(),
            max: self.bounds.max.into(),
            id: split_u64(self.id.id),
            n_elements: split_u64(self.id.n_elements),
        }
    }

    fn unpack(p: &PackedSubtreeBox) -> Self {
        IndexedSubtreeBox::new(
            join_u64(p.id),
            join_u64(p.n_elements),
            Box3D::new(p.min.into(), p.max.into()),
        )
    }
}

// --- packed nodes -----------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct PackedNode {
    min: [CoordType; 3],
    max: [CoordType; 3],
    /// First child: a node index, or an entry index for leaves.
    first_child: u32,
    count: u16,
    leaf: u16,
}

impl PackedNode {
    #[inline]
    fn bbox(&self) -> Box3D {
        Box3D::new(self.min.into(), self.max.into())
    }
}

/// Meta-data file contents describing the arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MemDiskMeta {
    struct_version: u16,
    kind: String,
    coord_width: u8,
    n_entries: u64,
    n_nodes: u64,
    entries_offset: u64,
    nodes_offset: u64,
    used_bytes: u64,
    root: Option<u32>,
}

/// Creation knobs for a mapped index.
#[derive(Debug, Clone, Copy)]
pub struct MemDiskOptions {
    /// Initial capacity of the data file, in megabytes.
    pub capacity_mb: usize,
    /// Truncate the data file to its live size when closing.
    pub close_shrink: bool,
}

impl Default for MemDiskOptions {
    fn default() -> Self {
        Self {
            capacity_mb: 1024,
            close_shrink: false,
        }
    }
}

enum Arena {
    ReadWrite(MmapMut),
    ReadOnly(Mmap),
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Arena::ReadWrite(_) => f.write_str("Arena::ReadWrite(..)"),
            Arena::ReadOnly(_) => f.write_str("Arena::ReadOnly(..)"),
        }
    }
}

impl Arena {
    fn bytes(&self) -> &[u8] {
        match self {
            Arena::ReadWrite(m) => m,
            Arena::ReadOnly(m) => m,
        }
    }

    fn flush(&self) -> std::io::Result<()> {
        match self {
            Arena::ReadWrite(m) => m.flush(),
            Arena::ReadOnly(_) => Ok(()),
        }
    }
}

/// A spatial index living inside a memory-mapped directory.
#[derive(Debug)]
pub struct MemDiskIndex<T: PackedEntry> {
    dir: PathBuf,
    arena: Arena,
    meta: MemDiskMeta,
    close_shrink: bool,
    _marker: PhantomData<T>,
}

impl<T: PackedEntry> MemDiskIndex<T> {
    /// Create a directory, bulk-load `entries` into the mapped arena and
    /// return the open (read-write) index.
    pub fn create<P: AsRef<Path>>(
        dir: P,
        mut entries: Vec<T>,
        options: MemDiskOptions,
    ) -> Result<Self>
    where
        T: Send,
    {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        // At least one page so the mapping itself is always valid.
        let capacity = (options.capacity_mb * 1024 * 1024).max(4096);

        // STR order so children can be laid out contiguously.
        let params = SerialStrParams::from_heuristic(entries.len(), MAX_NODE_ENTRIES);
        if !entries.is_empty() {
            serial_sort_tile_recursion(&mut entries, &center_coord::<T>, &params);
        }
        let boundaries = params.partition_boundaries();

        let entry_size = size_of::<T::Packed>();
        let entries_bytes = entries.len() * entry_size;
        let nodes_offset = entries_bytes.div_ceil(8) * 8;
        let n_nodes = count_packed_nodes(&boundaries);
        let used_bytes = nodes_offset + n_nodes * size_of::<PackedNode>();
        if used_bytes > capacity {
            return Err(IndexError::ArenaFull {
                needed: used_bytes,
                capacity,
            });
        }

        let data_path = dir.join(DATA_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&data_path)?;
        file.set_len(capacity as u64)?;
        // Safety: the file was just created and is exclusively owned by this
        // writer for the duration of the build.
        let mut map = unsafe { MmapMut::map_mut(&file)? };

        // Pack entries straight into the arena.
        {
            let entry_region: &mut [T::Packed] =
                bytemuck::cast_slice_mut(&mut map[..entries_bytes]);
            for (slot, entry) in entry_region.iter_mut().zip(entries.iter()) {
                *slot = entry.pack();
            }
        }

        // Build node levels bottom-up and copy them in.
        let (nodes, root) = build_packed_nodes(&entries, &boundaries);
        debug_assert_eq!(nodes.len(), n_nodes);
        {
            let node_region: &mut [PackedNode] = bytemuck::cast_slice_mut(
                &mut map[nodes_offset..nodes_offset + n_nodes * size_of::<PackedNode>()],
            );
            node_region.copy_from_slice(&nodes);
        }
        map.flush()?;

        let meta = MemDiskMeta {
            struct_version: STRUCT_VERSION,
            kind: T::KIND_TAG.to_string(),
            coord_width: size_of::<CoordType>() as u8,
            n_entries: entries.len() as u64,
            n_nodes: n_nodes as u64,
            entries_offset: 0,
            nodes_offset: nodes_offset as u64,
            used_bytes: used_bytes as u64,
            root,
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| IndexError::Serialization(e.to_string()))?;
        std::fs::write(dir.join(META_FILE), meta_json)?;

        info!(
            dir = %dir.display(),
            n_entries = meta.n_entries,
            used_mb = used_bytes / (1024 * 1024),
            "created memory-mapped index"
        );

        Ok(Self {
            dir,
            arena: Arena::ReadWrite(map),
            meta,
            close_shrink: options.close_shrink,
            _marker: PhantomData,
        })
    }

    /// Open an existing directory read-only.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let meta_json = std::fs::read_to_string(dir.join(META_FILE))?;
        let meta: MemDiskMeta = serde_json::from_str(&meta_json)
            .map_err(|e| IndexError::Deserialization(e.to_string()))?;

        if meta.struct_version > STRUCT_VERSION {
            return Err(IndexError::FutureFormat {
                file_version: meta.struct_version,
                supported: STRUCT_VERSION,
            });
        }
        if meta.kind != T::KIND_TAG {
            return Err(IndexError::Deserialization(format!(
                "index holds '{}' entries, expected '{}'",
                meta.kind,
                T::KIND_TAG
            )));
        }
        if meta.coord_width != size_of::<CoordType>() as u8 {
            return Err(IndexError::Deserialization(format!(
                "index was built with {}-byte coordinates, this build uses {}",
                meta.coord_width,
                size_of::<CoordType>()
            )));
        }

        let file = File::open(dir.join(DATA_FILE))?;
        // Safety: readers map the file read-only; the single-writer policy is
        // the caller's responsibility per the shared-resource contract.
        let map = unsafe { Mmap::map(&file)? };
        if (map.len() as u64) < meta.used_bytes {
            return Err(IndexError::Deserialization(
                "data file shorter than meta-data claims".to_string(),
            ));
        }

        debug!(dir = %dir.display(), n_entries = meta.n_entries, "opened memory-mapped index");

        Ok(Self {
            dir,
            arena: Arena::ReadOnly(map),
            meta,
            close_shrink: false,
            _marker: PhantomData,
        })
    }

    /// Borrowing query view over the mapped tree.
    pub fn tree(&self) -> PackedTreeView<'_, T> {
        let bytes = self.arena.bytes();
        let entries_end =
            self.meta.entries_offset as usize + self.meta.n_entries as usize * size_of::<T::Packed>();
        let nodes_start = self.meta.nodes_offset as usize;
        let nodes_end = nodes_start + self.meta.n_nodes as usize * size_of::<PackedNode>();
        PackedTreeView {
            entries: bytemuck::cast_slice(&bytes[self.meta.entries_offset as usize..entries_end]),
            nodes: bytemuck::cast_slice(&bytes[nodes_start..nodes_end]),
            root: self.meta.root,
            _marker: PhantomData,
        }
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.meta.n_entries as usize
    }

    pub fn is_empty(&self) -> bool {
        self.meta.n_entries == 0
    }

    /// Flush, unmap and (for a shrinking writer) truncate the data file to
    /// its live size. Consumes the index: no tree reference can survive.
    pub fn close(self) -> Result<()> {
        self.arena.flush()?;
        let shrink = matches!(self.arena, Arena::ReadWrite(_)) && self.close_shrink;
        let used = self.meta.used_bytes;
        let data_path = self.dir.join(DATA_FILE);
        drop(self.arena);
        if shrink {
            let file = OpenOptions::new().write(true).open(&data_path)?;
            file.set_len(used)?;
            info!(dir = %self.dir.display(), used_bytes = used, "shrank mapped index on close");
        }
        Ok(())
    }
}

/// Read-only view over a packed tree; implements the query mixin.
pub struct PackedTreeView<'a, T: PackedEntry> {
    nodes: &'a [PackedNode],
    entries: &'a [T::Packed],
    root: Option<u32>,
    _marker: PhantomData<T>,
}

impl<'a, T: PackedEntry> TreeNavigator<T> for PackedTreeView<'a, T> {
    #[inline]
    fn root_node(&self) -> Option<u32> {
        self.root
    }

    #[inline]
    fn node_bbox(&self, node: u32) -> Box3D {
        self.nodes[node as usize].bbox()
    }

    fn visit_children(&self, node: u32, visit: &mut dyn FnMut(ChildRef)) {
        let n = &self.nodes[node as usize];
        let first = n.first_child;
        for i in first..first + u32::from(n.count) {
            visit(if n.leaf != 0 {
                ChildRef::Entry(i)
            } else {
                ChildRef::Node(i)
            });
        }
    }

    #[inline]
    fn entry(&self, idx: u32) -> T {
        T::unpack(&self.entries[idx as usize])
    }

    #[inline]
    fn n_entries(&self) -> usize {
        self.entries.len()
    }
}

/// Exact node count the packed builder will produce for these boundaries.
fn count_packed_nodes(boundaries: &[usize]) -> usize {
    let mut level: usize = boundaries
        .windows(2)
        .map(|w| (w[1] - w[0]).div_ceil(MAX_NODE_ENTRIES))
        .sum();
    let mut total = level;
    while level > 1 {
        level = level.div_ceil(MAX_NODE_ENTRIES);
        total += level;
    }
    total
}

/// Lay out leaves (entry runs per STR tile) then upper levels; children of a
/// node are contiguous by construction. Returns the nodes and the root index.
fn build_packed_nodes<T: PackedEntry>(
    entries: &[T],
    boundaries: &[usize],
) -> (Vec<PackedNode>, Option<u32>) {
    if entries.is_empty() {
        return (Vec::new(), None);
    }

    let mut nodes: Vec<PackedNode> = Vec::new();
    let mut level_start = 0usize;

    for tile in boundaries.windows(2) {
        let (start, end) = (tile[0], tile[1]);
        let mut run = start;
        while run < end {
            let run_end = (run + MAX_NODE_ENTRIES).min(end);
            let mut bbox = entries[run].bounding_box();
            for e in &entries[run + 1..run_end] {
                bbox = bbox.union(e.bounding_box());
            }
            nodes.push(PackedNode {
                min: bbox.min.into(),
                max: bbox.max.into(),
                first_child: run as u32,
                count: (run_end - run) as u16,
                leaf: 1,
            });
            run = run_end;
        }
    }

    let mut level_len = nodes.len();
    while level_len > 1 {
        let level_end = level_start + level_len;
        let mut chunk = level_start;
        while chunk < level_end {
            let chunk_end = (chunk + MAX_NODE_ENTRIES).min(level_end);
            let mut bbox = nodes[chunk].bbox();
            for n in &nodes[chunk + 1..chunk_end] {
                bbox = bbox.union(n.bbox());
            }
            nodes.push(PackedNode {
                min: bbox.min.into(),
                max: bbox.max.into(),
                first_child: chunk as u32,
                count: (chunk_end - chunk) as u16,
                leaf: 0,
            });
            chunk = chunk_end;
        }
        let new_len = nodes.len() - level_end;
        level_start = level_end;
        level_len = new_len;
    }

    let root = (nodes.len() - 1) as u32;
    (nodes, Some(root))
}
