//! Core types shared across the mandelmesh workspace.
//!
//! This module defines the data that flows through a run: the immutable
//! [`Viewport`], each worker's [`RowRange`], the [`LocalMatrix`] a worker
//! computes and the [`GlobalMatrix`] assembled on the collector.

use std::borrow::Cow;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors detected while validating a [`Viewport`].
///
/// These are reported before any partitioning or computation starts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be positive")]
    NotPositive { name: &'static str },

    #[error("{name} = {value} leaves no spacing between samples; at least 2 are required")]
    TooFewSamples { name: &'static str, value: usize },

    #[error("Bound {name} is not finite: {value}")]
    NonFinite { name: &'static str, value: f64 },

    #[error("Empty {axis} interval: [{min}, {max}]")]
    EmptyInterval { axis: char, min: f64, max: f64 },

    #[error("Unknown preset '{0}'")]
    UnknownPreset(String),
}

/// Floating-point precision used by the escape-time evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// f32 arithmetic. Faster, but deep zooms lose detail.
    Single,
    #[default]
    Double,
}

/// The region of the complex plane being sampled and its resolution.
///
/// Immutable for a run and shared read-only by every worker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
    /// Samples along the real axis.
    pub width: usize,
    /// Samples along the imaginary axis (grid rows).
    pub height: usize,
    /// Iteration cap of the escape-time loop.
    pub maxiter: u32,
    #[serde(default)]
    pub precision: Precision,
}

/// Named viewports.
pub const PRESETS: &[(&str, &str)] = &[
    ("full", "Whole set, x=[-2.0, 0.5] y=[-1.25, 1.25], maxiter 80"),
    (
        "seahorse",
        "Seahorse valley zoom, x=[-0.74877, -0.74872] y=[0.06505, 0.06510], maxiter 2048",
    ),
];

impl Viewport {
    /// Build and validate a viewport.
    pub fn new(
        xmin: f64,
        xmax: f64,
        ymin: f64,
        ymax: f64,
        width: usize,
        height: usize,
        maxiter: u32,
    ) -> Result<Self, ConfigError> {
        let viewport = Self {
            xmin,
            xmax,
            ymin,
            ymax,
            width,
            height,
            maxiter,
            precision: Precision::Double,
        };
        viewport.validate()?;
        Ok(viewport)
    }

    /// Look up a named viewport from [`PRESETS`].
    pub fn preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "full" => Self::new(-2.0, 0.5, -1.25, 1.25, 1000, 1000, 80),
            "seahorse" => Self::new(-0.74877, -0.74872, 0.06505, 0.06510, 3000, 3000, 2048),
            other => Err(ConfigError::UnknownPreset(other.to_string())),
        }
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    /// Check every invariant the grid code relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("xmin", self.xmin),
            ("xmax", self.xmax),
            ("ymin", self.ymin),
            ("ymax", self.ymax),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite { name, value });
            }
        }
        if self.maxiter == 0 {
            return Err(ConfigError::NotPositive { name: "maxiter" });
        }
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if value == 0 {
                return Err(ConfigError::NotPositive { name });
            }
            if value < 2 {
                return Err(ConfigError::TooFewSamples { name, value });
            }
        }
        if self.xmax <= self.xmin {
            return Err(ConfigError::EmptyInterval {
                axis: 'x',
                min: self.xmin,
                max: self.xmax,
            });
        }
        if self.ymax <= self.ymin {
            return Err(ConfigError::EmptyInterval {
                axis: 'y',
                min: self.ymin,
                max: self.ymax,
            });
        }
        Ok(())
    }

    /// Spacing between neighbouring real-axis samples.
    pub fn dx(&self) -> f64 {
        (self.xmax - self.xmin) / (self.width - 1) as f64
    }

    /// Spacing between neighbouring rows on the global grid.
    pub fn dy(&self) -> f64 {
        (self.ymax - self.ymin) / (self.height - 1) as f64
    }

    /// Real coordinate of column `col`. The last column lands exactly on `xmax`.
    pub fn real_at(&self, col: usize) -> f64 {
        if col + 1 == self.width {
            self.xmax
        } else {
            self.xmin + col as f64 * self.dx()
        }
    }

    /// Imaginary coordinate of global row `row`. The last row lands exactly
    /// on `ymax`.
    pub fn imag_at(&self, row: usize) -> f64 {
        if row + 1 == self.height {
            self.ymax
        } else {
            self.ymin + row as f64 * self.dy()
        }
    }
}

/// A contiguous block of global rows assigned to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RowRange {
    pub start_row: usize,
    pub row_count: usize,
}

impl RowRange {
    pub fn new(start_row: usize, row_count: usize) -> Self {
        Self {
            start_row,
            row_count,
        }
    }

    /// One past the last row.
    pub fn end(&self) -> usize {
        self.start_row + self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }
}

/// Iteration counts for one worker's rows, shape `(row_count, width)`.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalMatrix {
    pub range: RowRange,
    pub cells: Array2<u32>,
}

impl LocalMatrix {
    /// A zero-row matrix, the contribution of a worker with no rows.
    pub fn empty(range: RowRange, width: usize) -> Self {
        Self {
            range,
            cells: Array2::zeros((0, width)),
        }
    }

    pub fn row_count(&self) -> usize {
        self.cells.nrows()
    }

    pub fn width(&self) -> usize {
        self.cells.ncols()
    }

    /// Largest iteration count, `None` for an empty matrix.
    pub fn max_value(&self) -> Option<u32> {
        self.cells.iter().copied().max()
    }

    /// Row-major view of the cells, copied only if the layout requires it.
    pub fn flat_cells(&self) -> Cow<'_, [u32]> {
        match self.cells.as_slice() {
            Some(s) => Cow::Borrowed(s),
            None => Cow::Owned(self.cells.iter().copied().collect()),
        }
    }
}

/// The assembled `(height, width)` result, owned by the collector.
///
/// Row 0 corresponds to `ymin`.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalMatrix {
    pub cells: Array2<u32>,
}

impl GlobalMatrix {
    pub fn height(&self) -> usize {
        self.cells.nrows()
    }

    pub fn width(&self) -> usize {
        self.cells.ncols()
    }

    pub fn max_value(&self) -> Option<u32> {
        self.cells.iter().copied().max()
    }
}
