//! The message-passing seam of the distributed build.
//!
//! [`Communicator`] captures the collective operations the two-level STR
//! loader needs: splitting into contiguous sub-communicators, personalized
//! all-to-all, and variable-count gathers. Ranks progress in bulk-synchronous
//! phases, so every member of a communicator issues the same operations in
//! the same order.
//!
//! [`ThreadComm`] is the in-tree implementation: one scoped thread per rank
//! exchanging buffers through a shared rendezvous table. An MPI binding would
//! implement the same trait over real collectives.

use std::any::Any;
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Collective communication between the ranks of a distributed build.
pub trait Communicator: Sized {
    /// This rank's index within the communicator.
    fn rank(&self) -> usize;

    /// Number of ranks in the communicator.
    fn size(&self) -> usize;

    /// Split into disjoint sub-communicators: ranks sharing `color` form one
    /// group, ordered by `key`.
    fn split(&self, color: usize, key: usize) -> Self;

    /// Personalized all-to-all: `sendbufs[dst]` goes to rank `dst`; returns
    /// one buffer per source rank, in rank order.
    fn all_to_all<T: Clone + Send + 'static>(&self, sendbufs: Vec<Vec<T>>) -> Vec<Vec<T>>;

    /// Variable-count gather at rank 0: the root receives one buffer per
    /// source rank, everyone else gets `None`.
    fn gather_at_root<T: Clone + Send + 'static>(&self, data: Vec<T>) -> Option<Vec<Vec<T>>>;

    /// Variable-count all-gather: every rank receives every rank's buffer.
    fn all_gather<T: Clone + Send + 'static>(&self, data: Vec<T>) -> Vec<Vec<T>> {
        let size = self.size();
        let sendbufs = vec![data; size];
        self.all_to_all(sendbufs)
    }
}

type SlotKey = (u64, u64, usize, usize);

#[derive(Default)]
struct Mailbox {
    slots: Mutex<HashMap<SlotKey, Box<dyn Any + Send>>>,
    delivered: Condvar,
}

/// In-process communicator: each rank is a thread, exchanges go through a
/// shared mailbox keyed by (communicator, operation, destination, source).
pub struct ThreadComm {
    mailbox: Arc<Mailbox>,
    comm_id: u64,
    world_rank: usize,
    rank: usize,
    size: usize,
    /// Per-communicator operation counter; identical across members because
    /// collectives are issued in lockstep.
    seq: Cell<u64>,
}

impl ThreadComm {
    /// Run `f` on `n_ranks` scoped threads, one world communicator each, and
    /// collect the per-rank results in rank order.
    pub fn run<R, F>(n_ranks: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(ThreadComm) -> R + Sync,
    {
        assert!(n_ranks > 0, "communicator needs at least one rank");
        let mailbox = Arc::new(Mailbox::default());
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..n_ranks)
                .map(|rank| {
                    let comm = ThreadComm {
                        mailbox: Arc::clone(&mailbox),
                        comm_id: 0,
                        world_rank: rank,
                        rank,
                        size: n_ranks,
                        seq: Cell::new(0),
                    };
                    let f = &f;
                    scope.spawn(move || f(comm))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("rank thread panicked"))
                .collect()
        })
    }

    fn next_seq(&self) -> u64 {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        seq
    }
}

fn derive_comm_id(parent: u64, seq: u64, color: usize) -> u64 {
    let mut h = parent ^ 0x9e37_79b9_7f4a_7c15;
    h = h
        .wrapping_mul(0xff51_afd7_ed55_8ccd)
        .wrapping_add(seq.wrapping_mul(0xc4ce_b9fe_1a85_ec53));
    h ^ (color as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn split(&self, color: usize, key: usize) -> Self {
        // Everyone learns everyone's (color, key, world rank); members of the
        // same color sort by (key, world rank) to fix the new rank order.
        let all: Vec<(usize, usize, usize)> = self
            .all_gather(vec![(color, key, self.world_rank)])
            .into_iter()
            .flatten()
            .collect();

        let mut members: Vec<(usize, usize)> = all
            .iter()
            .filter(|(c, _, _)| *c == color)
            .map(|(_, k, w)| (*k, *w))
            .collect();
        members.sort_unstable();

        let rank = members
            .iter()
            .position(|&(_, w)| w == self.world_rank)
            .expect("split member list misses own rank");

        ThreadComm {
            mailbox: Arc::clone(&self.mailbox),
            comm_id: derive_comm_id(self.comm_id, self.seq.get(), color),
            world_rank: self.world_rank,
            rank,
            size: members.len(),
            seq: Cell::new(0),
        }
    }

    fn all_to_all<T: Clone + Send + 'static>(&self, sendbufs: Vec<Vec<T>>) -> Vec<Vec<T>> {
        assert_eq!(sendbufs.len(), self.size, "one send buffer per rank");
        let seq = self.next_seq();

        let mut slots = self.mailbox.slots.lock();
        for (dst, buf) in sendbufs.into_iter().enumerate() {
            slots.insert((self.comm_id, seq, dst, self.rank), Box::new(buf));
        }
        self.mailbox.delivered.notify_all();

        let mut out: Vec<Option<Vec<T>>> = (0..self.size).map(|_| None).collect();
        let mut received = 0;
        while received < self.size {
            for (src, slot) in out.iter_mut().enumerate() {
                if slot.is_none() {
                    if let Some(boxed) = slots.remove(&(self.comm_id, seq, self.rank, src)) {
                        let buf = boxed
                            .downcast::<Vec<T>>()
                            .expect("mismatched payload type in collective");
                        *slot = Some(*buf);
                        received += 1;
                    }
                }
            }
            if received < self.size {
                self.mailbox.delivered.wait(&mut slots);
            }
        }
        out.into_iter().flatten().collect()
    }

    fn gather_at_root<T: Clone + Send + 'static>(&self, data: Vec<T>) -> Option<Vec<Vec<T>>> {
        let mut sendbufs: Vec<Vec<T>> = (0..self.size).map(|_| Vec::new()).collect();
        sendbufs[0] = data;
        let received = self.all_to_all(sendbufs);
        if self.rank == 0 {
            Some(received)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_to_all_routes_by_rank() {
        let results = ThreadComm::run(4, |comm| {
            let sendbufs: Vec<Vec<usize>> = (0..comm.size())
                .map(|dst| vec![comm.rank() * 10 + dst])
                .collect();
            comm.all_to_all(sendbufs)
        });
        for (rank, received) in results.into_iter().enumerate() {
            let got: Vec<usize> = received.into_iter().flatten().collect();
            let expected: Vec<usize> = (0..4).map(|src| src * 10 + rank).collect();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn gather_at_root_collects_everything() {
        let results = ThreadComm::run(3, |comm| {
            comm.gather_at_root(vec![comm.rank(); comm.rank() + 1])
        });
        assert_eq!(
            results[0],
            Some(vec![vec![0], vec![1, 1], vec![2, 2, 2]])
        );
        assert!(results[1].is_none() && results[2].is_none());
    }

    #[test]
    fn split_forms_contiguous_groups() {
        let results = ThreadComm::run(4, |comm| {
            let color = comm.rank() / 2;
            let sub = comm.split(color, comm.rank());
            // Exchange world ranks inside the sub-communicator.
            let members: Vec<usize> = sub
                .all_gather(vec![comm.rank()])
                .into_iter()
                .flatten()
                .collect();
            (sub.rank(), sub.size(), members)
        });
        assert_eq!(results[0], (0, 2, vec![0, 1]));
        assert_eq!(results[1], (1, 2, vec![0, 1]));
        assert_eq!(results[2], (0, 2, vec![2, 3]));
        assert_eq!(results[3], (1, 2, vec![2, 3]));
    }

    #[test]
    fn sequential_collectives_do_not_cross_talk() {
        let results = ThreadComm::run(2, |comm| {
            let first: Vec<usize> = comm.all_gather(vec![comm.rank()]).into_iter().flatten().collect();
            let second: Vec<usize> = comm
                .all_gather(vec![comm.rank() + 100])
                .into_iter()
                .flatten()
                .collect();
            (first, second)
        });
        for (first, second) in results {
            assert_eq!(first, vec![0, 1]);
            assert_eq!(second, vec![100, 101]);
        }
    }
}
