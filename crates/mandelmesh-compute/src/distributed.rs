//! Collective communication between workers.
//!
//! Workers never share memory; everything they exchange goes through the
//! [`Communicator`] collectives. The strategy mirrors an MPI job:
//!
//! - **Block-row distribution**: each rank owns a contiguous block of grid
//!   rows and computes them on its own.
//! - **Gather / Gatherv**: the collector rank first receives every rank's
//!   row count, then the variable-sized row blocks, and places each block at
//!   its prefix-sum displacement.
//! - **Hybrid workers + Rayon**: within a rank, a [`ComputeBackend`]
//!   parallelises across cores.
//!
//! [`LocalWorld`] is an in-process transport: one thread per rank, wired
//! together with per-pair channels. It gives the same fail-stop behaviour a
//! real message-passing runtime would: a rank that leaves the world before a
//! collective turns into [`CollectiveError::PeerLost`] on its peers.
//!
//! [`ComputeBackend`]: crate::backend::ComputeBackend

use crossbeam::channel::{unbounded, Receiver, Sender};
use thiserror::Error;

/// Errors raised by collective operations.
///
/// All of them are fatal for the run: there is no retry and no partial
/// result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollectiveError {
    #[error("Rank {rank} left the world before completing a collective")]
    PeerLost { rank: usize },

    #[error("Root rank {root} is outside a world of size {size}")]
    InvalidRoot { root: usize, size: usize },

    #[error("Rank {rank} contributed {actual} elements, expected {expected}")]
    LengthMismatch {
        rank: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Root must supply {expected} receive counts, got {actual}")]
    MissingCounts { expected: usize, actual: usize },

    #[error("Protocol error from rank {rank}: expected {expected:?}, received {received:?}")]
    Protocol {
        rank: usize,
        expected: Operation,
        received: Operation,
    },

    #[error("Rank {rank} sent a payload that does not belong to {op:?}")]
    MalformedPayload { rank: usize, op: Operation },

    #[error("A world needs at least one rank")]
    EmptyWorld,

    #[error("Worker thread for rank {rank} panicked")]
    WorkerPanicked { rank: usize },

    #[error("Worker scope ended with an unjoined thread")]
    ScopeAborted,
}

/// Collective operation tag carried by every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    GatherCounts,
    GatherF64,
    GatherVarcount,
    Scan,
    BarrierArrive,
    BarrierRelease,
}

/// The collective primitives a worker needs from its runtime.
///
/// Every rank of the world must call the same collectives in the same order.
/// Gather-style calls return `Some` on the root and `None` everywhere else.
pub trait Communicator: Send {
    /// This worker's 0-based rank.
    fn rank(&self) -> usize;

    /// Number of workers in the world.
    fn size(&self) -> usize;

    /// Gather one `usize` from every rank, in rank order, on `root`.
    fn gather_counts(&self, root: usize, value: usize)
        -> Result<Option<Vec<usize>>, CollectiveError>;

    /// Gather one `f64` from every rank, in rank order, on `root`.
    fn gather_f64(&self, root: usize, value: f64) -> Result<Option<Vec<f64>>, CollectiveError>;

    /// Variable-count gather.
    ///
    /// The root passes `recv_counts[k]`, the number of elements it expects
    /// from rank `k`; rank `k`'s data lands at offset `sum(recv_counts[..k])`
    /// of the returned buffer. Non-root ranks pass `None`.
    fn gather_varcount(
        &self,
        root: usize,
        send: &[u32],
        recv_counts: Option<&[usize]>,
    ) -> Result<Option<Vec<u32>>, CollectiveError>;

    /// Inclusive prefix sum: rank `i` receives `value_0 + ... + value_i`.
    fn scan_sum(&self, value: usize) -> Result<usize, CollectiveError>;

    /// Block until every rank has entered the barrier.
    fn barrier(&self) -> Result<(), CollectiveError>;
}

/// Exclusive prefix sums of `counts`: the displacement of each contributor.
pub fn displacements(counts: &[usize]) -> Vec<usize> {
    counts
        .iter()
        .scan(0usize, |acc, &c| {
            let start = *acc;
            *acc += c;
            Some(start)
        })
        .collect()
}

#[derive(Debug)]
enum Payload {
    Count(usize),
    Real(f64),
    Cells(Vec<u32>),
    Signal,
}

#[derive(Debug)]
struct Message {
    op: Operation,
    payload: Payload,
}

/// One rank's endpoint in a [`LocalWorld`].
pub struct LocalCommunicator {
    rank: usize,
    size: usize,
    /// `outboxes[dst]` delivers to rank `dst`.
    outboxes: Vec<Sender<Message>>,
    /// `inboxes[src]` receives from rank `src`.
    inboxes: Vec<Receiver<Message>>,
}

impl LocalCommunicator {
    fn check_root(&self, root: usize) -> Result<(), CollectiveError> {
        if root >= self.size {
            return Err(CollectiveError::InvalidRoot {
                root,
                size: self.size,
            });
        }
        Ok(())
    }

    fn send(&self, dst: usize, op: Operation, payload: Payload) -> Result<(), CollectiveError> {
        self.outboxes[dst]
            .send(Message { op, payload })
            .map_err(|_| CollectiveError::PeerLost { rank: dst })
    }

    fn recv(&self, src: usize, op: Operation) -> Result<Payload, CollectiveError> {
        let msg = self.inboxes[src].recv().map_err(|_| {
            log::debug!("rank {}: lost rank {} during {:?}", self.rank, src, op);
            CollectiveError::PeerLost { rank: src }
        })?;
        if msg.op != op {
            return Err(CollectiveError::Protocol {
                rank: src,
                expected: op,
                received: msg.op,
            });
        }
        Ok(msg.payload)
    }

    fn unexpected(&self, src: usize, op: Operation) -> CollectiveError {
        CollectiveError::MalformedPayload { rank: src, op }
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn gather_counts(
        &self,
        root: usize,
        value: usize,
    ) -> Result<Option<Vec<usize>>, CollectiveError> {
        self.check_root(root)?;
        let op = Operation::GatherCounts;
        if self.rank != root {
            self.send(root, op, Payload::Count(value))?;
            return Ok(None);
        }

        let mut out = Vec::with_capacity(self.size);
        for src in 0..self.size {
            if src == self.rank {
                out.push(value);
                continue;
            }
            match self.recv(src, op)? {
                Payload::Count(v) => out.push(v),
                _ => return Err(self.unexpected(src, op)),
            }
        }
        Ok(Some(out))
    }

    fn gather_f64(&self, root: usize, value: f64) -> Result<Option<Vec<f64>>, CollectiveError> {
        self.check_root(root)?;
        let op = Operation::GatherF64;
        if self.rank != root {
            self.send(root, op, Payload::Real(value))?;
            return Ok(None);
        }

        let mut out = Vec::with_capacity(self.size);
        for src in 0..self.size {
            if src == self.rank {
                out.push(value);
                continue;
            }
            match self.recv(src, op)? {
                Payload::Real(v) => out.push(v),
                _ => return Err(self.unexpected(src, op)),
            }
        }
        Ok(Some(out))
    }

    fn gather_varcount(
        &self,
        root: usize,
        send: &[u32],
        recv_counts: Option<&[usize]>,
    ) -> Result<Option<Vec<u32>>, CollectiveError> {
        self.check_root(root)?;
        let op = Operation::GatherVarcount;
        if self.rank != root {
            self.send(root, op, Payload::Cells(send.to_vec()))?;
            return Ok(None);
        }

        let counts = recv_counts.unwrap_or(&[]);
        if counts.len() != self.size {
            return Err(CollectiveError::MissingCounts {
                expected: self.size,
                actual: counts.len(),
            });
        }

        let displs = displacements(counts);
        let total: usize = counts.iter().sum();
        let mut recv = vec![0u32; total];

        for src in 0..self.size {
            let block = if src == self.rank {
                None
            } else {
                match self.recv(src, op)? {
                    Payload::Cells(cells) => Some(cells),
                    _ => return Err(self.unexpected(src, op)),
                }
            };
            let data = block.as_deref().unwrap_or(send);
            if data.len() != counts[src] {
                return Err(CollectiveError::LengthMismatch {
                    rank: src,
                    expected: counts[src],
                    actual: data.len(),
                });
            }
            recv[displs[src]..displs[src] + counts[src]].copy_from_slice(data);
        }
        Ok(Some(recv))
    }

    fn scan_sum(&self, value: usize) -> Result<usize, CollectiveError> {
        let op = Operation::Scan;
        let prev = if self.rank == 0 {
            0
        } else {
            match self.recv(self.rank - 1, op)? {
                Payload::Count(v) => v,
                _ => return Err(self.unexpected(self.rank - 1, op)),
            }
        };
        let total = prev + value;
        if self.rank + 1 < self.size {
            self.send(self.rank + 1, op, Payload::Count(total))?;
        }
        Ok(total)
    }

    fn barrier(&self) -> Result<(), CollectiveError> {
        if self.rank != 0 {
            self.send(0, Operation::BarrierArrive, Payload::Signal)?;
            self.recv(0, Operation::BarrierRelease)?;
            return Ok(());
        }
        for src in 1..self.size {
            self.recv(src, Operation::BarrierArrive)?;
        }
        for dst in 1..self.size {
            self.send(dst, Operation::BarrierRelease, Payload::Signal)?;
        }
        Ok(())
    }
}

/// A fixed set of ranks living in one process.
pub struct LocalWorld {
    comms: Vec<LocalCommunicator>,
}

impl LocalWorld {
    /// Wire up `size` communicators, one channel per ordered rank pair.
    pub fn new(size: usize) -> Result<Self, CollectiveError> {
        if size == 0 {
            return Err(CollectiveError::EmptyWorld);
        }

        let mut outboxes: Vec<Vec<Sender<Message>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut inboxes: Vec<Vec<Receiver<Message>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();
        for src in 0..size {
            for dst in 0..size {
                let (tx, rx) = unbounded();
                outboxes[src].push(tx);
                inboxes[dst].push(rx);
            }
        }

        let comms = outboxes
            .into_iter()
            .zip(inboxes)
            .enumerate()
            .map(|(rank, (outboxes, inboxes))| LocalCommunicator {
                rank,
                size,
                outboxes,
                inboxes,
            })
            .collect();
        Ok(Self { comms })
    }

    /// Hand out the endpoints, in rank order, for callers that manage their
    /// own threads.
    pub fn into_communicators(self) -> Vec<LocalCommunicator> {
        self.comms
    }

    /// Run `f` on one scoped thread per rank and collect the results in rank
    /// order.
    ///
    /// Each endpoint is moved into its worker and dropped when the worker
    /// returns, so peers still waiting on it observe `PeerLost`.
    pub fn run<F, R>(self, f: F) -> Result<Vec<R>, CollectiveError>
    where
        F: Fn(LocalCommunicator) -> R + Sync,
        R: Send,
    {
        let f = &f;
        let joined = crossbeam::thread::scope(|s| {
            let handles: Vec<_> = self
                .comms
                .into_iter()
                .map(|comm| s.spawn(move |_| f(comm)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join())
                .collect::<Vec<_>>()
        })
        .map_err(|_| CollectiveError::ScopeAborted)?;

        joined
            .into_iter()
            .enumerate()
            .map(|(rank, r)| r.map_err(|_| CollectiveError::WorkerPanicked { rank }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_displacements_are_exclusive_prefix_sums() {
        assert_eq!(displacements(&[10, 15, 5]), vec![0, 10, 25]);
        assert_eq!(displacements(&[0, 3, 0, 2]), vec![0, 0, 3, 3]);
        assert!(displacements(&[]).is_empty());
    }

    #[test]
    fn test_empty_world_rejected() {
        assert_eq!(LocalWorld::new(0).err(), Some(CollectiveError::EmptyWorld));
    }

    #[test]
    fn test_gather_counts_in_rank_order() {
        let world = LocalWorld::new(4).unwrap();
        let results = world
            .run(|comm| comm.gather_counts(2, comm.rank() * 10))
            .unwrap();
        for (rank, r) in results.into_iter().enumerate() {
            let r = r.unwrap();
            if rank == 2 {
                assert_eq!(r, Some(vec![0, 10, 20, 30]));
            } else {
                assert_eq!(r, None);
            }
        }
    }

    #[test]
    fn test_gather_f64_on_root() {
        let world = LocalWorld::new(3).unwrap();
        let results = world
            .run(|comm| comm.gather_f64(0, comm.rank() as f64 + 0.5))
            .unwrap();
        assert_eq!(results[0].as_ref().unwrap(), &Some(vec![0.5, 1.5, 2.5]));
    }

    #[test]
    fn test_gather_varcount_unequal_blocks() {
        let counts = [2usize, 0, 3, 1];
        let world = LocalWorld::new(counts.len()).unwrap();
        let results = world
            .run(|comm| {
                let r = comm.rank();
                let send = vec![r as u32 + 1; counts[r]];
                let recv = if r == 0 { Some(&counts[..]) } else { None };
                comm.gather_varcount(0, &send, recv)
            })
            .unwrap();
        let gathered = results[0].clone().unwrap().unwrap();
        assert_eq!(gathered, vec![1, 1, 3, 3, 3, 4]);
        assert!(results[1..].iter().all(|r| r == &Ok(None)));
    }

    #[test]
    fn test_gather_varcount_detects_length_mismatch() {
        let world = LocalWorld::new(2).unwrap();
        let results = world
            .run(|comm| {
                let send = vec![7u32; 3];
                let counts = [3usize, 2];
                let recv = if comm.rank() == 0 { Some(&counts[..]) } else { None };
                comm.gather_varcount(0, &send, recv)
            })
            .unwrap();
        assert_eq!(
            results[0],
            Err(CollectiveError::LengthMismatch {
                rank: 1,
                expected: 2,
                actual: 3
            })
        );
    }

    #[test]
    fn test_root_requires_counts() {
        let world = LocalWorld::new(1).unwrap();
        let results = world
            .run(|comm| comm.gather_varcount(0, &[1, 2], None))
            .unwrap();
        assert_eq!(
            results[0],
            Err(CollectiveError::MissingCounts {
                expected: 1,
                actual: 0
            })
        );
    }

    #[test]
    fn test_scan_is_inclusive() {
        let world = LocalWorld::new(4).unwrap();
        let results = world.run(|comm| comm.scan_sum(comm.rank() + 1)).unwrap();
        let totals: Vec<usize> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(totals, vec![1, 3, 6, 10]);
    }

    #[test]
    fn test_invalid_root() {
        let world = LocalWorld::new(2).unwrap();
        let results = world.run(|comm| comm.gather_counts(5, 1)).unwrap();
        for r in results {
            assert_eq!(r, Err(CollectiveError::InvalidRoot { root: 5, size: 2 }));
        }
    }

    #[test]
    fn test_departed_rank_is_peer_lost() {
        let world = LocalWorld::new(3).unwrap();
        let results = world
            .run(|comm| {
                if comm.rank() == 1 {
                    // Leaves without taking part.
                    return Ok(None);
                }
                comm.gather_counts(0, 1)
            })
            .unwrap();
        assert_eq!(results[0], Err(CollectiveError::PeerLost { rank: 1 }));
    }

    #[test]
    fn test_mismatched_collectives_are_protocol_errors() {
        let world = LocalWorld::new(2).unwrap();
        let results = world
            .run(|comm| {
                if comm.rank() == 0 {
                    comm.gather_counts(0, 4).map(|_| ())
                } else {
                    comm.gather_f64(0, 1.5).map(|_| ())
                }
            })
            .unwrap();
        assert_eq!(
            results[0],
            Err(CollectiveError::Protocol {
                rank: 1,
                expected: Operation::GatherCounts,
                received: Operation::GatherF64,
            })
        );
        assert_eq!(results[1], Ok(()));
    }

    #[test]
    fn test_panicking_worker_names_its_rank() {
        let world = LocalWorld::new(3).unwrap();
        let result = world.run(|comm| {
            if comm.rank() == 2 {
                panic!("worker failure");
            }
            comm.rank()
        });
        assert_eq!(result, Err(CollectiveError::WorkerPanicked { rank: 2 }));
    }

    #[test]
    fn test_barrier_completes() {
        let world = LocalWorld::new(5).unwrap();
        let results = world.run(|comm| comm.barrier()).unwrap();
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn test_collectives_stay_matched_in_sequence() {
        let world = LocalWorld::new(3).unwrap();
        let results = world
            .run(|comm| -> Result<(usize, Option<Vec<usize>>), CollectiveError> {
                let s = comm.scan_sum(2)?;
                let g = comm.gather_counts(1, s)?;
                comm.barrier()?;
                Ok((s, g))
            })
            .unwrap();
        assert_eq!(results[1].as_ref().unwrap().1, Some(vec![2, 4, 6]));
    }
}
