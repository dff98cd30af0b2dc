//! # Mandelmesh Core
//!
//! Row-partitioned escape-time computation. A run splits the rows of a
//! Mandelbrot grid across a fixed set of workers, each worker computes its
//! rows independently, and a two-phase gather rebuilds the full matrix on a
//! designated collector.
//!
//! ## Pipeline
//!
//! [`coordinator::run_worker`] → [`partition`] finds the rank's rows →
//! [`grid::GridComputer`] evaluates them with [`escape`] →
//! [`aggregate::ResultAggregator`] gathers the blocks on the collector.
//!
//! ## Modules
//!
//! - [`types`] - Viewport, row ranges, local and global matrices.
//! - [`escape`] - Escape-time evaluator for a single point.
//! - [`grid`] - Evaluation of a block of rows on a compute backend.
//! - [`partition`] - Block distribution of rows across workers.
//! - [`aggregate`] - Row-count exchange and variable-size gather.
//! - [`coordinator`] - Per-worker driver and in-process runs.

pub mod aggregate;
pub mod coordinator;
pub mod escape;
pub mod grid;
pub mod partition;
pub mod types;

pub use coordinator::{run_local, run_rank, run_worker, LocalRun, RunError, RunOptions, WorkerReport};
pub use partition::PartitionStrategy;
pub use types::{GlobalMatrix, LocalMatrix, Precision, RowRange, Viewport};
