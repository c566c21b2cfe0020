//! Serial sort-tile-recursion bulk loading.
//!
//! Classical STR: sort by x, slice into strips, sort each strip by y, slice
//! into tiles, sort each tile by z. Every final slice becomes one leaf run;
//! upper levels pack sequential runs of 16 until a single root remains. Local
//! sorts go through rayon.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{bbox_of_entries, Child, IndexTree, Node, MAX_NODE_ENTRIES};
use crate::entry::TreeEntry;
use crate::point::CoordType;

/// Partitioning parameters of one serial STR pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialStrParams {
    pub n_elements: usize,
    pub n_parts_per_dim: [usize; 3],
}

impl SerialStrParams {
    pub fn new(n_elements: usize, n_parts_per_dim: [usize; 3]) -> Self {
        Self {
            n_elements,
            n_parts_per_dim,
        }
    }

    /// Pick per-dimension part counts so that their product is close to
    /// `ceil(n_elements / max_elements_per_part)`, balanced across the three
    /// dimensions (largest factor first).
    pub fn from_heuristic(n_elements: usize, max_elements_per_part: usize) -> Self {
        let target = n_elements.div_ceil(max_elements_per_part.max(1)).max(1);
        let a = (target as f64).cbrt().ceil() as usize;
        let b = ((target as f64) / a as f64).sqrt().ceil() as usize;
        let c = (target as f64 / (a as f64 * b as f64)).ceil() as usize;
        Self {
            n_elements,
            n_parts_per_dim: [a.max(1), b.max(1), c.max(1)],
        }
    }

    /// Total number of final tiles.
    pub fn n_parts(&self) -> usize {
        self.n_parts_per_dim.iter().product()
    }

    /// Start offsets of every final tile, plus one trailing `n_elements`.
    ///
    /// Matches the slicing applied by [`serial_sort_tile_recursion`] exactly.
    pub fn partition_boundaries(&self) -> Vec<usize> {
        let [p0, p1, p2] = self.n_parts_per_dim;
        let b0 = even_boundaries(self.n_elements, p0);
        let mut out = Vec::with_capacity(self.n_parts() + 1);
        for i0 in 0..p0 {
            let (s0, e0) = (b0[i0], b0[i0 + 1]);
            let b1 = even_boundaries(e0 - s0, p1);
            for i1 in 0..p1 {
                let (s1, e1) = (s0 + b1[i1], s0 + b1[i1 + 1]);
                let b2 = even_boundaries(e1 - s1, p2);
                for i2 in 0..p2 {
                    out.push(s1 + b2[i2]);
                }
            }
        }
        out.push(self.n_elements);
        out
    }
}

/// `parts + 1` offsets dividing `n` as evenly as possible.
pub(crate) fn even_boundaries(n: usize, parts: usize) -> Vec<usize> {
    (0..=parts).map(|i| i * n / parts).collect()
}

/// Run the classical serial STR over `values` in place.
pub fn serial_sort_tile_recursion<T, K>(values: &mut [T], key: &K, params: &SerialStrParams)
where
    T: Send,
    K: Fn(&T, usize) -> CoordType + Sync,
{
    debug_assert_eq!(values.len(), params.n_elements);
    let [p0, p1, p2] = params.n_parts_per_dim;

    sort_by_axis(values, key, 0);
    let b0 = even_boundaries(values.len(), p0);
    for i0 in 0..p0 {
        let strip = &mut values[b0[i0]..b0[i0 + 1]];
        sort_by_axis(strip, key, 1);
        let b1 = even_boundaries(strip.len(), p1);
        for i1 in 0..p1 {
            let tile = &mut strip[b1[i1]..b1[i1 + 1]];
            if p2 > 1 {
                sort_by_axis(tile, key, 2);
            }
        }
    }
}

pub(crate) fn sort_by_axis<T, K>(values: &mut [T], key: &K, axis: usize)
where
    T: Send,
    K: Fn(&T, usize) -> CoordType + Sync,
{
    values.par_sort_unstable_by(|a, b| key(a, axis).total_cmp(&key(b, axis)));
}

/// STR bulk load: sort, emit leaf runs of 16, pack upper levels of 16.
pub(crate) fn bulk_load<T: TreeEntry + Send>(mut entries: Vec<T>) -> IndexTree<T> {
    if entries.is_empty() {
        return IndexTree::new();
    }

    let params = SerialStrParams::from_heuristic(entries.len(), MAX_NODE_ENTRIES);
    serial_sort_tile_recursion(&mut entries, &super::center_coord::<T>, &params);

    let mut nodes: Vec<Node> = Vec::new();
    let mut level: Vec<u32> = Vec::new();

    // Leaf runs follow the STR tile boundaries; tiles larger than the fan-out
    // are chopped into consecutive runs.
    let boundaries = params.partition_boundaries();
    for tile in boundaries.windows(2) {
        let (start, end) = (tile[0], tile[1]);
        let mut run = start;
        while run < end {
            let run_end = (run + MAX_NODE_ENTRIES).min(end);
            let children: Vec<Child> =
                (run..run_end).map(|i| Child::Entry(i as u32)).collect();
            let bbox = bbox_of_entries(&entries[run..run_end]);
            level.push(nodes.len() as u32);
            nodes.push(Node {
                bbox,
                leaf: true,
                children,
            });
            run = run_end;
        }
    }

    // Promote until a single root remains.
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(MAX_NODE_ENTRIES));
        for chunk in level.chunks(MAX_NODE_ENTRIES) {
            let mut bbox = nodes[chunk[0] as usize].bbox;
            for &i in &chunk[1..] {
                bbox = bbox.union(nodes[i as usize].bbox);
            }
            let children = chunk.iter().map(|&i| Child::Node(i)).collect();
            next.push(nodes.len() as u32);
            nodes.push(Node {
                bbox,
                leaf: false,
                children,
            });
        }
        level = next;
    }

    let root = level.first().copied();
    IndexTree {
        nodes,
        entries,
        root,
    }
}
