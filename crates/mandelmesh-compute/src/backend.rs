//! Compute backend trait and device abstraction.
//!
//! The [`ComputeBackend`] trait abstracts over the way a worker evaluates
//! its share of the grid (Rayon thread pool, plain loop) so that the grid
//! code in `mandelmesh-core` stays independent of how the cells are
//! scheduled.

use ndarray::Array2;
use thiserror::Error;

/// Errors originating from compute backends.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Backend not available: {0}")]
    Unavailable(String),

    #[error("Shape error: {0}")]
    Shape(String),
}

/// Describes the capabilities of a compute backend.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub compute_units: Option<usize>,
}

/// The type of compute backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Cpu,
    Serial,
}

/// Abstraction over compute backends.
///
/// Every grid cell is independent, so implementations are free to evaluate
/// cells in any order; the result must only depend on `fill_fn`.
pub trait ComputeBackend: Send + Sync {
    /// Return information about the device.
    fn device_info(&self) -> DeviceInfo;

    /// Fill a `rows x cols` matrix, calling `fill_fn(row, col)` once per cell.
    fn parallel_grid_fill(
        &self,
        rows: usize,
        cols: usize,
        fill_fn: &(dyn Fn(usize, usize) -> u32 + Send + Sync),
    ) -> Result<Array2<u32>, ComputeError>;
}

/// Single-threaded backend. Useful as a reference and when the caller
/// already runs one worker per core.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialBackend;

impl SerialBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ComputeBackend for SerialBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "Serial".into(),
            backend_type: BackendType::Serial,
            compute_units: Some(1),
        }
    }

    fn parallel_grid_fill(
        &self,
        rows: usize,
        cols: usize,
        fill_fn: &(dyn Fn(usize, usize) -> u32 + Send + Sync),
    ) -> Result<Array2<u32>, ComputeError> {
        Ok(Array2::from_shape_fn((rows, cols), |(i, j)| fill_fn(i, j)))
    }
}
