//! Collection of every worker's rows onto the collector.
//!
//! The gather runs in two collective phases:
//!
//! 1. **Row-count exchange**: each worker reports how many rows it holds; the
//!    collector receives the counts in rank order.
//! 2. **Variable-size gather**: each worker sends its flattened block. The
//!    collector expects `counts[k] * width` elements from rank `k` and places
//!    them at `sum(counts[..k]) * width`, so unequal (and empty) blocks keep
//!    their global row position.
//!
//! Phase 2 only starts once phase 1 has succeeded. The collector either ends
//! up with the complete matrix or an error; nothing partial is returned.

use log::{debug, info};
use mandelmesh_compute::{CollectiveError, Communicator};
use ndarray::Array2;
use thiserror::Error;

use crate::types::{GlobalMatrix, LocalMatrix};

/// Errors from the result gather.
#[derive(Debug, Error)]
pub enum GatherError {
    #[error("Collective failed: {0}")]
    Collective(#[from] CollectiveError),

    #[error("Workers reported {actual} rows in total, expected {expected}")]
    RowSumMismatch { expected: usize, actual: usize },

    #[error("Local block has {actual} columns, expected {expected}")]
    WidthMismatch { expected: usize, actual: usize },

    #[error("Could not shape gathered data: {0}")]
    Shape(String),
}

/// Gathers row blocks into a `(height, width)` matrix on `root`.
#[derive(Debug, Clone, Copy)]
pub struct ResultAggregator {
    pub root: usize,
    pub width: usize,
    pub height: usize,
}

impl ResultAggregator {
    pub fn new(root: usize, width: usize, height: usize) -> Self {
        Self {
            root,
            width,
            height,
        }
    }

    /// Contribute `local` and, on the collector, assemble the global matrix.
    ///
    /// Collective: every rank of `comm` must call it. Returns `Some` on the
    /// collector and `None` on every other rank.
    pub fn gather<C: Communicator + ?Sized>(
        &self,
        comm: &C,
        local: &LocalMatrix,
    ) -> Result<Option<GlobalMatrix>, GatherError> {
        if local.width() != self.width {
            return Err(GatherError::WidthMismatch {
                expected: self.width,
                actual: local.width(),
            });
        }

        // Phase 1: row counts.
        let counts = comm.gather_counts(self.root, local.row_count())?;
        if let Some(counts) = &counts {
            let total: usize = counts.iter().sum();
            if total != self.height {
                return Err(GatherError::RowSumMismatch {
                    expected: self.height,
                    actual: total,
                });
            }
            debug!("rank {}: row counts {:?}", comm.rank(), counts);
        }

        // Phase 2: the blocks themselves.
        let recv_counts: Option<Vec<usize>> = counts
            .as_ref()
            .map(|counts| counts.iter().map(|rows| rows * self.width).collect());
        let cells = comm.gather_varcount(self.root, &local.flat_cells(), recv_counts.as_deref())?;

        match cells {
            Some(cells) => {
                let cells = Array2::from_shape_vec((self.height, self.width), cells)
                    .map_err(|e| GatherError::Shape(e.to_string()))?;
                info!(
                    "rank {}: assembled {}x{} matrix from {} workers",
                    comm.rank(),
                    self.height,
                    self.width,
                    comm.size()
                );
                Ok(Some(GlobalMatrix { cells }))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::partition;
    use crate::types::RowRange;
    use mandelmesh_compute::LocalWorld;

    fn filled(range: RowRange, width: usize, value: u32) -> LocalMatrix {
        LocalMatrix {
            range,
            cells: Array2::from_elem((range.row_count, width), value),
        }
    }

    #[test]
    fn test_unequal_blocks_land_in_rank_order() {
        let shapes = [2usize, 3, 1];
        let width = 5;
        let world = LocalWorld::new(3).unwrap();
        let results = world
            .run(|comm| {
                let r = comm.rank();
                let start: usize = shapes[..r].iter().sum();
                let local = filled(RowRange::new(start, shapes[r]), width, 10 + r as u32);
                ResultAggregator::new(0, width, 6).gather(&comm, &local)
            })
            .unwrap();

        let mut results = results.into_iter();
        let global = results.next().unwrap().unwrap().unwrap();
        assert!(results.all(|r| r.unwrap().is_none()));

        assert_eq!(global.cells.dim(), (6, 5));
        let row_owner: Vec<u32> = (0..6).map(|y| global.cells[[y, 0]]).collect();
        assert_eq!(row_owner, vec![10, 10, 11, 11, 11, 12]);
        for y in 0..6 {
            assert!(global.cells.row(y).iter().all(|&v| v == row_owner[y]));
        }
    }

    #[test]
    fn test_blocks_land_at_partition_start_rows() {
        let width = 4;
        for (height, workers) in [(10usize, 4usize), (7, 3), (3, 5)] {
            let ranges = partition(height, workers).unwrap();
            let results = LocalWorld::new(workers)
                .unwrap()
                .run(|comm| {
                    let range = ranges[comm.rank()];
                    let local = filled(range, width, 100 + comm.rank() as u32);
                    ResultAggregator::new(0, width, height).gather(&comm, &local)
                })
                .unwrap();
            let global = results[0].as_ref().unwrap().as_ref().unwrap();

            assert_eq!(global.cells.dim(), (height, width));
            for (rank, range) in ranges.iter().enumerate() {
                for y in range.start_row..range.end() {
                    assert!(
                        global.cells.row(y).iter().all(|&v| v == 100 + rank as u32),
                        "row {} of {}x{} should belong to rank {}",
                        y,
                        height,
                        workers,
                        rank
                    );
                }
            }
        }
    }

    #[test]
    fn test_non_zero_root_collects() {
        let world = LocalWorld::new(2).unwrap();
        let results = world
            .run(|comm| {
                let local = filled(RowRange::new(comm.rank(), 1), 3, comm.rank() as u32);
                ResultAggregator::new(1, 3, 2).gather(&comm, &local)
            })
            .unwrap();
        assert!(results[0].as_ref().unwrap().is_none());
        let global = results[1].as_ref().unwrap().as_ref().unwrap();
        assert_eq!(global.cells.row(0).to_vec(), vec![0, 0, 0]);
        assert_eq!(global.cells.row(1).to_vec(), vec![1, 1, 1]);
    }

    #[test]
    fn test_empty_contributions_participate() {
        let counts = [0usize, 2, 0, 1, 0];
        let world = LocalWorld::new(counts.len()).unwrap();
        let results = world
            .run(|comm| {
                let r = comm.rank();
                let start: usize = counts[..r].iter().sum();
                let local = filled(RowRange::new(start, counts[r]), 4, r as u32);
                ResultAggregator::new(0, 4, 3).gather(&comm, &local)
            })
            .unwrap();
        let global = results[0].as_ref().unwrap().as_ref().unwrap();
        let owners: Vec<u32> = (0..3).map(|y| global.cells[[y, 0]]).collect();
        assert_eq!(owners, vec![1, 1, 3]);
    }

    #[test]
    fn test_row_sum_mismatch_is_reported() {
        let world = LocalWorld::new(2).unwrap();
        let results = world
            .run(|comm| {
                let local = filled(RowRange::new(0, 2), 3, 1);
                ResultAggregator::new(0, 3, 3).gather(&comm, &local)
            })
            .unwrap();
        assert!(matches!(
            results[0],
            Err(GatherError::RowSumMismatch {
                expected: 3,
                actual: 4
            })
        ));
    }

    #[test]
    fn test_missing_worker_aborts_before_phase_two() {
        let world = LocalWorld::new(3).unwrap();
        let results = world
            .run(|comm| {
                if comm.rank() == 2 {
                    return Ok(None);
                }
                let local = filled(RowRange::new(comm.rank(), 1), 2, 5);
                ResultAggregator::new(0, 2, 3).gather(&comm, &local)
            })
            .unwrap();
        assert!(matches!(
            results[0],
            Err(GatherError::Collective(CollectiveError::PeerLost { rank: 2 }))
        ));
    }

    #[test]
    fn test_width_mismatch() {
        let world = LocalWorld::new(1).unwrap();
        let results = world
            .run(|comm| {
                let local = filled(RowRange::new(0, 2), 3, 1);
                ResultAggregator::new(0, 4, 2).gather(&comm, &local)
            })
            .unwrap();
        assert!(matches!(
            results[0],
            Err(GatherError::WidthMismatch {
                expected: 4,
                actual: 3
            })
        ));
    }
}
