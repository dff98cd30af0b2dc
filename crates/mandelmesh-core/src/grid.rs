//! Evaluation of a block of grid rows.
//!
//! Every worker samples the same global grid: column `x` maps to
//! [`Viewport::real_at`] and global row `r` to [`Viewport::imag_at`]. A worker
//! computing rows `[start, start + n)` therefore produces exactly the cells a
//! single worker would produce for those rows.

use std::sync::Arc;

use log::debug;
use mandelmesh_compute::{ComputeBackend, ComputeError};
use thiserror::Error;

use crate::escape::escape_time_with;
use crate::types::{ConfigError, LocalMatrix, RowRange, Viewport};

/// Errors raised while computing a block of rows.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("Invalid viewport: {0}")]
    Config(#[from] ConfigError),

    #[error("Rows [{start}, {end}) fall outside a grid of height {height}")]
    OutOfBounds {
        start: usize,
        end: usize,
        height: usize,
    },

    #[error("Compute backend error: {0}")]
    Compute(#[from] ComputeError),
}

/// Computes escape-time counts for row blocks on a compute backend.
pub struct GridComputer {
    pub backend: Arc<dyn ComputeBackend>,
}

impl Default for GridComputer {
    fn default() -> Self {
        Self {
            backend: Arc::new(mandelmesh_compute::CpuBackend::new()),
        }
    }
}

impl GridComputer {
    pub fn new(backend: Arc<dyn ComputeBackend>) -> Self {
        Self { backend }
    }

    /// Compute the `(range.row_count, width)` block starting at global row
    /// `range.start_row`.
    pub fn compute(&self, viewport: &Viewport, range: RowRange) -> Result<LocalMatrix, GridError> {
        viewport.validate()?;
        if range.end() > viewport.height {
            return Err(GridError::OutOfBounds {
                start: range.start_row,
                end: range.end(),
                height: viewport.height,
            });
        }
        if range.is_empty() {
            return Ok(LocalMatrix::empty(range, viewport.width));
        }

        let reals: Vec<f64> = (0..viewport.width).map(|x| viewport.real_at(x)).collect();
        let imags: Vec<f64> = (range.start_row..range.end())
            .map(|row| viewport.imag_at(row))
            .collect();
        let precision = viewport.precision;
        let maxiter = viewport.maxiter;

        debug!(
            "computing rows [{}, {}) x {} columns on {}",
            range.start_row,
            range.end(),
            viewport.width,
            self.backend.device_info().name
        );

        let cells = self.backend.parallel_grid_fill(
            range.row_count,
            viewport.width,
            &|y, x| escape_time_with(precision, reals[x], imags[y], maxiter),
        )?;

        Ok(LocalMatrix { range, cells })
    }

    /// Compute the whole grid as a single block.
    pub fn compute_all(&self, viewport: &Viewport) -> Result<LocalMatrix, GridError> {
        self.compute(viewport, RowRange::new(0, viewport.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escape::escape_time;
    use mandelmesh_compute::SerialBackend;

    fn small_viewport() -> Viewport {
        Viewport::new(-2.0, 0.5, -1.25, 1.25, 9, 7, 40).unwrap()
    }

    #[test]
    fn test_cells_match_point_evaluation() {
        let vp = small_viewport();
        let computer = GridComputer::new(Arc::new(SerialBackend::new()));
        let local = computer.compute(&vp, RowRange::new(2, 3)).unwrap();
        assert_eq!(local.cells.dim(), (3, 9));
        for y in 0..3 {
            for x in 0..9 {
                let expected = escape_time(vp.real_at(x), vp.imag_at(2 + y), vp.maxiter);
                assert_eq!(local.cells[[y, x]], expected);
            }
        }
    }

    #[test]
    fn test_blocks_are_position_independent() {
        let vp = small_viewport();
        let computer = GridComputer::default();
        let full = computer.compute_all(&vp).unwrap();
        let top = computer.compute(&vp, RowRange::new(0, 4)).unwrap();
        let bottom = computer.compute(&vp, RowRange::new(4, 3)).unwrap();
        for y in 0..4 {
            assert_eq!(full.cells.row(y), top.cells.row(y));
        }
        for y in 0..3 {
            assert_eq!(full.cells.row(4 + y), bottom.cells.row(y));
        }
    }

    #[test]
    fn test_empty_range_gives_empty_matrix() {
        let vp = small_viewport();
        let local = GridComputer::default()
            .compute(&vp, RowRange::new(7, 0))
            .unwrap();
        assert_eq!(local.cells.dim(), (0, 9));
    }

    #[test]
    fn test_range_past_height_is_rejected() {
        let vp = small_viewport();
        let err = GridComputer::default()
            .compute(&vp, RowRange::new(5, 3))
            .unwrap_err();
        assert!(matches!(err, GridError::OutOfBounds { end: 8, height: 7, .. }));
    }

    #[test]
    fn test_values_bounded_by_maxiter() {
        let vp = small_viewport();
        let local = GridComputer::default().compute_all(&vp).unwrap();
        assert!(local.max_value().unwrap() <= vp.maxiter);
        // Column 5, row 3 samples (-0.4375, 0.0), inside the main cardioid.
        assert_eq!(local.cells[[3, 5]], vp.maxiter);
    }
}
