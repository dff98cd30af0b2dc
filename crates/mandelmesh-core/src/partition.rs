//! Row-wise block distribution.
//!
//! Worker `i` of `p` gets `height / p` rows, plus one more if
//! `i < height % p`. Its first row is the exclusive prefix sum of the row
//! counts of workers `0..i`. Remainder rows therefore go to the lowest ranks,
//! one each, and no two workers differ by more than one row.
//!
//! The start row can be computed in closed form by every worker on its own,
//! or through a collective scan ([`PartitionStrategy::Scan`]); both give the
//! same ranges.

use mandelmesh_compute::{CollectiveError, Communicator};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::RowRange;

/// Errors from the work partitioner.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("Cannot partition rows across zero workers")]
    NoWorkers,

    #[error("Worker index {index} is out of range for {count} workers")]
    WorkerOutOfRange { index: usize, count: usize },

    #[error("Collective scan failed: {0}")]
    Collective(#[from] CollectiveError),
}

/// How a worker finds its starting row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionStrategy {
    /// Closed-form prefix sum, no communication.
    #[default]
    ClosedForm,
    /// Inclusive scan over the world's row counts.
    Scan,
}

fn check(worker_count: usize, worker_index: usize) -> Result<(), PartitionError> {
    if worker_count == 0 {
        return Err(PartitionError::NoWorkers);
    }
    if worker_index >= worker_count {
        return Err(PartitionError::WorkerOutOfRange {
            index: worker_index,
            count: worker_count,
        });
    }
    Ok(())
}

/// Rows owned by `worker_index`.
pub fn row_count(height: usize, worker_count: usize, worker_index: usize) -> Result<usize, PartitionError> {
    check(worker_count, worker_index)?;
    let base = height / worker_count;
    let extra = usize::from(height % worker_count > worker_index);
    Ok(base + extra)
}

/// The block of rows owned by `worker_index`, computed without communication.
pub fn row_range(
    height: usize,
    worker_count: usize,
    worker_index: usize,
) -> Result<RowRange, PartitionError> {
    let count = row_count(height, worker_count, worker_index)?;
    let base = height / worker_count;
    let remainder = height % worker_count;
    let start = worker_index * base + worker_index.min(remainder);
    Ok(RowRange::new(start, count))
}

/// Every worker's range, in rank order.
pub fn partition(height: usize, worker_count: usize) -> Result<Vec<RowRange>, PartitionError> {
    (0..worker_count.max(1))
        .map(|i| row_range(height, worker_count, i))
        .collect()
}

/// This worker's range, with the start row taken from a collective scan.
///
/// Collective: every rank of `comm` must call it.
pub fn scan_row_range<C: Communicator + ?Sized>(
    comm: &C,
    height: usize,
) -> Result<RowRange, PartitionError> {
    let count = row_count(height, comm.size(), comm.rank())?;
    let inclusive = comm.scan_sum(count)?;
    Ok(RowRange::new(inclusive - count, count))
}

impl PartitionStrategy {
    /// Resolve this worker's range with the chosen strategy.
    pub fn row_range<C: Communicator + ?Sized>(
        &self,
        comm: &C,
        height: usize,
    ) -> Result<RowRange, PartitionError> {
        match self {
            PartitionStrategy::ClosedForm => row_range(height, comm.size(), comm.rank()),
            PartitionStrategy::Scan => scan_row_range(comm, height),
        }
    }
}
