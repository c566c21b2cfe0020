//! Two-level sort-tile-recursion: the distributed build pipeline.
//!
//! A cluster-wide STR partitions the data set one axis at a time (a global
//! balanced sort followed by a communicator split into contiguous rank
//! slabs) until every rank holds one spatial cell of the grid of ranks. A
//! local
//! serial STR then tiles the rank's share; each final tile is bulk-loaded
//! into a subtree and persisted under its global id, and rank 0 assembles a
//! top-level tree over all subtree bounding boxes.
//!
//! Cancellation is polled between phases and before every subtree write, so
//! an aborted build leaves persisted subtrees but no top-level file.

pub mod comm;
pub mod sort;
pub mod storage;

pub use comm::{Communicator, ThreadComm};
pub use sort::sort_and_balance;
pub use storage::{DirStorage, SubtreeStorage};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cancel::check_signals;
use crate::entry::{IndexedSubtreeBox, TreeEntry};
use crate::error::{IndexError, Result};
use crate::point::CoordType;
use crate::rtree::{serial_sort_tile_recursion, IndexTree, SerialStrParams};

/// Cross-rank partitioning parameters: how many rank slabs per dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributedStrParams {
    pub n_elements: usize,
    pub n_ranks_per_dim: [usize; 3],
}

impl DistributedStrParams {
    /// Total number of ranks.
    pub fn n_ranks(&self) -> usize {
        self.n_ranks_per_dim.iter().product()
    }

    /// Size of one contiguous rank slab after the sorts of dimensions
    /// `0..=dim`: `P / prod(parts[j], j <= dim)`.
    pub fn n_ranks_in_subslice(&self, dim: usize) -> usize {
        let divisor: usize = self.n_ranks_per_dim[..=dim].iter().product();
        self.n_ranks() / divisor
    }
}

/// Within-rank partitioning parameters of the second level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalStrParams {
    pub n_parts_per_dim: [usize; 3],
}

impl LocalStrParams {
    pub fn n_parts(&self) -> usize {
        self.n_parts_per_dim.iter().product()
    }
}

/// Both levels of a two-level STR build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoLevelStrParams {
    pub distributed: DistributedStrParams,
    pub local: LocalStrParams,
}

/// Distribute a power-of-two rank count over the three dimensions, bumping
/// dimension `k mod 3` for every power: the per-dimension factors differ by
/// at most one doubling.
pub fn rank_distribution(comm_size: usize) -> [usize; 3] {
    assert!(
        comm_size.is_power_of_two(),
        "distributed STR requires a power-of-two communicator size"
    );
    let log2_n = comm_size.trailing_zeros() as usize;
    let mut dist = [0usize; 3];
    for k in 0..log2_n {
        dist[k % 3] += 1;
    }
    let dist = [1usize << dist[0], 1 << dist[1], 1 << dist[2]];
    debug_assert_eq!(dist[0] * dist[1] * dist[2], comm_size);
    dist
}

/// Per-dimension local part counts covering the overall target when every
/// rank slab handles its share: `ceil(overall / distributed)`.
pub fn infer_local_str_params(
    overall: &SerialStrParams,
    distributed: &DistributedStrParams,
) -> LocalStrParams {
    let o = overall.n_parts_per_dim;
    let d = distributed.n_ranks_per_dim;
    LocalStrParams {
        n_parts_per_dim: [
            o[0].div_ceil(d[0]),
            o[1].div_ceil(d[1]),
            o[2].div_ceil(d[2]),
        ],
    }
}

/// Pick both partition levels from the global element count, the target
/// maximum per leaf partition and the communicator size.
pub fn two_level_str_heuristic(
    n_elements: usize,
    max_elements_per_part: usize,
    comm_size: usize,
) -> TwoLevelStrParams {
    let distributed = DistributedStrParams {
        n_elements,
        n_ranks_per_dim: rank_distribution(comm_size),
    };
    let overall = SerialStrParams::from_heuristic(n_elements, max_elements_per_part);
    let local = infer_local_str_params(&overall, &distributed);
    TwoLevelStrParams { distributed, local }
}

/// Cross-rank STR: for each dimension, a balanced global sort by that
/// dimension's centre coordinate, then a communicator split into contiguous
/// rank slabs that recurse on the next dimension.
pub fn distributed_sort_tile_recursion<T, C, K>(
    values: &mut Vec<T>,
    params: &DistributedStrParams,
    comm: &C,
    key: &K,
) -> Result<()>
where
    T: TreeEntry + Send + 'static,
    C: Communicator,
    K: Fn(&T, usize) -> CoordType + Sync,
{
    str_dimension(values, params, comm, key, 0)
}

fn str_dimension<T, C, K>(
    values: &mut Vec<T>,
    params: &DistributedStrParams,
    comm: &C,
    key: &K,
    dim: usize,
) -> Result<()>
where
    T: TreeEntry + Send + 'static,
    C: Communicator,
    K: Fn(&T, usize) -> CoordType + Sync,
{
    check_signals()?;
    let taken = std::mem::take(values);
    *values = sort_and_balance(taken, comm, &|v: &T| key(v, dim));

    if dim == 2 {
        return Ok(());
    }

    let color = comm.rank() / params.n_ranks_in_subslice(dim);
    let sub_comm = comm.split(color, comm.rank());
    str_dimension(values, params, &sub_comm, key, dim + 1)
}

/// The whole distributed build: partition, persist every local subtree, and
/// assemble the top-level tree on rank 0.
pub fn distributed_partition<T, C, S, K>(
    storage: &S,
    mut values: Vec<T>,
    params: &TwoLevelStrParams,
    comm: &C,
    key: &K,
) -> Result<()>
where
    T: TreeEntry + Send + 'static,
    C: Communicator,
    S: SubtreeStorage<T>,
    K: Fn(&T, usize) -> CoordType + Sync,
{
    // With fewer elements a partition may end up empty, which the
    // distributed sort cannot handle; fail fast instead.
    let required = 10 * comm.size();
    if values.len() < required {
        return Err(IndexError::TooFewElements {
            n_elements: values.len(),
            required,
        });
    }

    info!(
        rank = comm.rank(),
        n_local = values.len(),
        ranks_per_dim = ?params.distributed.n_ranks_per_dim,
        local_parts_per_dim = ?params.local.n_parts_per_dim,
        "starting two-level STR build"
    );

    distributed_sort_tile_recursion(&mut values, &params.distributed, comm, key)?;

    let serial_params = SerialStrParams::new(values.len(), params.local.n_parts_per_dim);
    serial_sort_tile_recursion(&mut values, key, &serial_params);

    let n_local_parts = serial_params.n_parts();
    let boundaries = serial_params.partition_boundaries();
    let mut local_boxes = Vec::with_capacity(n_local_parts);

    for k in 0..n_local_parts {
        check_signals()?;
        let slice = &values[boundaries[k]..boundaries[k + 1]];
        let subtree = IndexTree::from_entries(slice.to_vec());
        let k_global = comm.rank() * n_local_parts + k;
        storage.save_subtree(&subtree, k_global)?;
        debug!(rank = comm.rank(), subtree = k_global, n = subtree.len(), "persisted subtree");

        let bounds = subtree.bounds().unwrap_or_default();
        local_boxes.push(IndexedSubtreeBox::new(
            k_global as u64,
            subtree.len() as u64,
            bounds,
        ));
    }

    check_signals()?;
    if let Some(gathered) = comm.gather_at_root(local_boxes) {
        let all_boxes: Vec<IndexedSubtreeBox> = gathered.into_iter().flatten().collect();
        let n_subtrees = all_boxes.len();
        let top = IndexTree::from_entries(all_boxes);
        storage.save_top_tree(&top)?;
        info!(n_subtrees, "wrote top-level tree");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_distribution_balances_powers() {
        assert_eq!(rank_distribution(1), [1, 1, 1]);
        assert_eq!(rank_distribution(2), [2, 1, 1]);
        assert_eq!(rank_distribution(4), [2, 2, 1]);
        assert_eq!(rank_distribution(8), [2, 2, 2]);
        assert_eq!(rank_distribution(32), [4, 4, 2]);
    }

    #[test]
    #[should_panic(expected = "power-of-two")]
    fn rank_distribution_rejects_non_powers() {
        rank_distribution(6);
    }

    #[test]
    fn subslice_sizes_shrink_per_dimension() {
        let params = DistributedStrParams {
            n_elements: 1 << 20,
            n_ranks_per_dim: [4, 2, 2],
        };
        assert_eq!(params.n_ranks(), 16);
        assert_eq!(params.n_ranks_in_subslice(0), 4);
        assert_eq!(params.n_ranks_in_subslice(1), 2);
        assert_eq!(params.n_ranks_in_subslice(2), 1);
    }

    #[test]
    fn local_params_cover_overall() {
        let overall = SerialStrParams::new(10_000, [8, 6, 5]);
        let distributed = DistributedStrParams {
            n_elements: 10_000,
            n_ranks_per_dim: [2, 2, 1],
        };
        let local = infer_local_str_params(&overall, &distributed);
        assert_eq!(local.n_parts_per_dim, [4, 3, 5]);
    }

    #[test]
    fn heuristic_composes() {
        let params = two_level_str_heuristic(100_000, 1000, 8);
        assert_eq!(params.distributed.n_ranks_per_dim, [2, 2, 2]);
        let overall_parts: usize = params
            .local
            .n_parts_per_dim
            .iter()
            .zip(params.distributed.n_ranks_per_dim.iter())
            .map(|(l, d)| l * d)
            .product();
        assert!(overall_parts >= 100);
    }
}
