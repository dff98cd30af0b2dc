//! Per-worker driver.
//!
//! [`run_worker`] is what every rank executes: validate the viewport, find
//! this rank's rows, compute them, and take part in the gather. The
//! transport comes from whatever [`Communicator`] the caller was launched
//! with; [`run_local`] wires everything up on an in-process [`LocalWorld`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use mandelmesh_compute::{CollectiveError, Communicator, ComputeBackend, LocalWorld};
use serde::Serialize;
use thiserror::Error;

use crate::aggregate::{GatherError, ResultAggregator};
use crate::grid::{GridComputer, GridError};
use crate::partition::{PartitionError, PartitionStrategy};
use crate::types::{ConfigError, GlobalMatrix, RowRange, Viewport};

/// Any failure of a run. None of them are retried.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Partition error: {0}")]
    Partition(#[from] PartitionError),

    #[error("Grid computation failed: {0}")]
    Grid(#[from] GridError),

    #[error("Gather failed: {0}")]
    Gather(#[from] GatherError),

    #[error("Collective failed: {0}")]
    Collective(#[from] CollectiveError),
}

impl RunError {
    /// True when this error only reflects another rank having gone away.
    pub fn is_peer_lost(&self) -> bool {
        matches!(
            self,
            RunError::Collective(CollectiveError::PeerLost { .. })
                | RunError::Gather(GatherError::Collective(CollectiveError::PeerLost { .. }))
                | RunError::Partition(PartitionError::Collective(CollectiveError::PeerLost { .. }))
        )
    }
}

/// Settings shared by every worker of a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Rank that receives the assembled matrix.
    pub root: usize,
    pub strategy: PartitionStrategy,
}

/// What a single worker did.
#[derive(Debug)]
pub struct WorkerReport {
    pub rank: usize,
    pub world_size: usize,
    pub range: RowRange,
    /// Largest count in the local block; `None` when the block is empty.
    pub local_max: Option<u32>,
    pub elapsed: Duration,
    /// The assembled matrix, present on the collector only.
    pub global: Option<GlobalMatrix>,
}

/// Execute one rank of a run.
///
/// Collective: every rank of `comm` must call it with the same `viewport`
/// and `options`.
pub fn run_worker<C: Communicator + ?Sized>(
    comm: &C,
    viewport: &Viewport,
    computer: &GridComputer,
    options: &RunOptions,
) -> Result<WorkerReport, RunError> {
    let started = Instant::now();
    viewport.validate()?;

    let rank = comm.rank();
    let size = comm.size();
    if options.root >= size {
        return Err(CollectiveError::InvalidRoot {
            root: options.root,
            size,
        }
        .into());
    }
    info!("rank {:4}: checking in ({} workers)", rank, size);

    let range = options.strategy.row_range(comm, viewport.height)?;
    if range.is_empty() {
        warn!(
            "rank {:4}: no rows assigned ({} workers for {} rows)",
            rank, size, viewport.height
        );
    } else {
        info!(
            "rank {:4}: will compute {} rows, y = [{}, {}]",
            rank,
            range.row_count,
            viewport.imag_at(range.start_row),
            viewport.imag_at(range.end() - 1)
        );
    }

    let local = computer.compute(viewport, range)?;
    let local_max = local.max_value();
    info!(
        "rank {:4}: finished computing rows; local matrix is {:?}, max value {:?}",
        rank,
        local.cells.dim(),
        local_max
    );

    let aggregator = ResultAggregator::new(options.root, viewport.width, viewport.height);
    let global = aggregator.gather(comm, &local)?;

    Ok(WorkerReport {
        rank,
        world_size: size,
        range,
        local_max,
        elapsed: started.elapsed(),
        global,
    })
}

/// Wall-clock time of every worker, as seen by the collector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunTimings {
    /// Seconds, in rank order.
    pub per_worker: Vec<f64>,
    pub max: f64,
    pub min: f64,
    pub mean: f64,
}

impl RunTimings {
    pub fn from_seconds(per_worker: Vec<f64>) -> Self {
        let max = per_worker.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = per_worker.iter().copied().fold(f64::INFINITY, f64::min);
        let mean = if per_worker.is_empty() {
            0.0
        } else {
            per_worker.iter().sum::<f64>() / per_worker.len() as f64
        };
        Self {
            per_worker,
            max,
            min,
            mean,
        }
    }
}

/// Gather every worker's elapsed time on `root`.
///
/// Collective: every rank must call it after [`run_worker`].
pub fn gather_timings<C: Communicator + ?Sized>(
    comm: &C,
    report: &WorkerReport,
    root: usize,
) -> Result<Option<RunTimings>, RunError> {
    let seconds = comm.gather_f64(root, report.elapsed.as_secs_f64())?;
    Ok(seconds.map(RunTimings::from_seconds))
}

/// Everything one rank does in a run: [`run_worker`], [`gather_timings`],
/// then a closing barrier so no rank leaves the world while others are still
/// inside a collective.
pub fn run_rank<C: Communicator + ?Sized>(
    comm: &C,
    viewport: &Viewport,
    computer: &GridComputer,
    options: &RunOptions,
) -> Result<(WorkerReport, Option<RunTimings>), RunError> {
    let report = run_worker(comm, viewport, computer, options)?;
    let timings = gather_timings(comm, &report, options.root)?;
    comm.barrier()?;
    debug!("rank {:4}: left the closing barrier", report.rank);
    Ok((report, timings))
}

/// Result of a run on a [`LocalWorld`].
#[derive(Debug)]
pub struct LocalRun {
    pub global: GlobalMatrix,
    /// Per-worker reports in rank order; the collector's `global` has been
    /// moved into [`LocalRun::global`].
    pub reports: Vec<WorkerReport>,
    pub timings: RunTimings,
}

/// Run `workers` ranks as threads of this process and return the collected
/// result.
///
/// If any rank fails the whole run fails. The error reported is the first
/// one that is not merely a consequence of another rank leaving.
pub fn run_local(
    viewport: &Viewport,
    workers: usize,
    backend: Arc<dyn ComputeBackend>,
    options: &RunOptions,
) -> Result<LocalRun, RunError> {
    viewport.validate()?;
    let world = LocalWorld::new(workers)?;
    let computer = GridComputer::new(backend);

    let outcomes = world.run(|comm| run_rank(&comm, viewport, &computer, options))?;

    let mut reports = Vec::with_capacity(outcomes.len());
    let mut timings = None;
    let mut errors = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok((report, t)) => {
                if t.is_some() {
                    timings = t;
                }
                reports.push(report);
            }
            Err(e) => errors.push(e),
        }
    }

    if !errors.is_empty() {
        let pos = errors.iter().position(|e| !e.is_peer_lost()).unwrap_or(0);
        return Err(errors.swap_remove(pos));
    }

    let global = reports
        .get_mut(options.root)
        .and_then(|r| r.global.take())
        .ok_or(CollectiveError::InvalidRoot {
            root: options.root,
            size: workers,
        })?;
    let timings = timings.unwrap_or_else(|| RunTimings::from_seconds(Vec::new()));

    Ok(LocalRun {
        global,
        reports,
        timings,
    })
}
