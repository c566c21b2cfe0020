//! Balanced distributed sorting between STR dimensions.
//!
//! [`sort_and_balance`] is a sample sort with an exact redistribution pass.
//! Its only contractual guarantee is the post-condition the STR recursion
//! depends on: after the call, rank `r` holds, contiguously and in order, the
//! global `[r*N/P, (r+1)*N/P)`-th elements by the current key.

use rayon::prelude::*;

use crate::point::CoordType;
use crate::rtree::even_boundaries;

use super::comm::Communicator;

/// Globally sort `values` across the communicator by `key` and leave every
/// rank with its contiguous, evenly-sized share of the global order.
pub fn sort_and_balance<T, C, K>(mut values: Vec<T>, comm: &C, key: &K) -> Vec<T>
where
    T: Clone + Send + 'static,
    C: Communicator,
    K: Fn(&T) -> CoordType + Sync,
{
    values.par_sort_unstable_by(|a, b| key(a).total_cmp(&key(b)));

    let p = comm.size();
    if p == 1 {
        return values;
    }

    // Regular sampling: P local samples per rank, everyone derives the same
    // P-1 splitters from the gathered sample set.
    let samples: Vec<CoordType> = (0..p)
        .map(|i| {
            if values.is_empty() {
                CoordType::INFINITY
            } else {
                key(&values[((i + 1) * values.len() - 1) / (p + 1)])
            }
        })
        .collect();
    let mut all_samples: Vec<CoordType> = comm
        .all_gather(samples)
        .into_iter()
        .flatten()
        .collect();
    all_samples.sort_unstable_by(|a, b| a.total_cmp(b));
    let splitters: Vec<CoordType> = (1..p)
        .map(|i| all_samples[i * all_samples.len() / p])
        .collect();

    // Bucket the sorted run by splitter and exchange.
    let mut sendbufs: Vec<Vec<T>> = Vec::with_capacity(p);
    let mut start = 0usize;
    for splitter in &splitters {
        let end = start + values[start..].partition_point(|v| key(v) <= *splitter);
        sendbufs.push(values[start..end].to_vec());
        start = end;
    }
    sendbufs.push(values[start..].to_vec());

    let received = comm.all_to_all(sendbufs);
    let mut merged: Vec<T> = received.into_iter().flatten().collect();
    merged.par_sort_unstable_by(|a, b| key(a).total_cmp(&key(b)));

    rebalance(merged, comm)
}

/// Redistribute contiguous, globally ordered per-rank runs so that every rank
/// holds exactly its `[r*N/P, (r+1)*N/P)` slice.
fn rebalance<T, C>(values: Vec<T>, comm: &C) -> Vec<T>
where
    T: Clone + Send + 'static,
    C: Communicator,
{
    let p = comm.size();
    let counts: Vec<usize> = comm
        .all_gather(vec![values.len()])
        .into_iter()
        .flatten()
        .collect();
    let total: usize = counts.iter().sum();
    let my_start: usize = counts[..comm.rank()].iter().sum();

    let targets = even_boundaries(total, p);
    let mut sendbufs: Vec<Vec<T>> = Vec::with_capacity(p);
    for dst in 0..p {
        let lo = targets[dst].max(my_start);
        let hi = targets[dst + 1].min(my_start + values.len());
        if lo < hi {
            sendbufs.push(values[lo - my_start..hi - my_start].to_vec());
        } else {
            sendbufs.push(Vec::new());
        }
    }

    // Source ranks hold ascending global slices, so concatenation in rank
    // order preserves the global order.
    comm.all_to_all(sendbufs).into_iter().flatten().collect()
}
