// THEORY:
// An `ActivationMap` marks the pixels of one channel that carry signal. Like the
// adaptive thresholds of a learning chunk, the cut-off is not fixed: it is derived
// from the plane's own statistics, `threshold = mean + factor * std_dev`, so the
// same factor adapts to dim and bright channels alike. A pixel is active (1) only
// if it lies strictly above the threshold.
//
// The map is computed once and never mutated. Everything downstream (aggregate
// maps, correlation estimators) reads it through the `MapView` trait, which is
// shared with the `SumMap` and `ColocMap` so that every map pair can be fed to the
// same estimator.

use crate::core_modules::plane::plane::IntensityPlane;
use crate::core_modules::region::Region;
use crate::error::{GicaError, GicaResult};
use image::{ImageBuffer, Luma};
use tracing::debug;

pub type Cell = u8;
pub type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Read access to a small-integer grid (binary masks and channel counts).
pub trait MapView: Send + Sync {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    /// Row-major cells, `width * height` entries.
    fn cells(&self) -> &[Cell];

    fn get(&self, x: usize, y: usize) -> Cell {
        self.cells()[y * self.width() + x]
    }

    /// Sum of cell values inside the region. For binary maps this is the number
    /// of active pixels.
    fn count_in(&self, region: &Region) -> usize {
        let cells = self.cells();
        region
            .indices(self.width())
            .map(|i| cells[i] as usize)
            .sum()
    }

    fn total(&self) -> usize {
        self.cells().iter().map(|&c| c as usize).sum()
    }

    /// The map as a float image, one cell per pixel.
    fn to_float_image(&self) -> FloatImage {
        let cells = self.cells();
        let width = self.width();
        ImageBuffer::from_fn(width as u32, self.height() as u32, |x, y| {
            Luma([cells[y as usize * width + x as usize] as f32])
        })
    }
}

/// Figures describing how a threshold was derived. Kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdStats {
    pub mean: f64,
    pub variance: f64,
    pub threshold: f64,
    pub active: usize,
    pub total: usize,
}

impl ThresholdStats {
    pub fn active_ratio(&self) -> f64 {
        self.active as f64 / self.total as f64
    }
}

/// Binary mask of the pixels of one channel above its adaptive threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivationMap {
    width: usize,
    height: usize,
    cells: Vec<Cell>,
    stats: ThresholdStats,
}

impl ActivationMap {
    /// Thresholds a plane at `mean + factor * std_dev`.
    pub fn from_plane(plane: &IntensityPlane, factor: f64) -> GicaResult<Self> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(GicaError::invalid(
                "threshold_factor",
                format!("{factor} is not a positive finite number"),
            ));
        }
        let mean = plane.mean();
        let variance = plane.variance(mean)?;
        let threshold = mean + factor * variance.sqrt();

        let cells: Vec<Cell> = plane
            .pixels()
            .iter()
            .map(|&v| Cell::from(v as f64 > threshold))
            .collect();
        let active = cells.iter().filter(|&&c| c == 1).count();

        let stats = ThresholdStats {
            mean,
            variance,
            threshold,
            active,
            total: cells.len(),
        };
        debug!(
            mean,
            variance,
            threshold,
            active,
            total = stats.total,
            ratio = stats.active_ratio(),
            "activation map thresholded"
        );

        Ok(Self {
            width: plane.width(),
            height: plane.height(),
            cells,
            stats,
        })
    }

    /// Wraps an existing 0/1 grid. Values other than 0 count as active.
    pub fn from_cells(width: usize, height: usize, cells: Vec<Cell>) -> GicaResult<Self> {
        if cells.len() != width * height {
            return Err(GicaError::invalid(
                "cells",
                format!("{} cells supplied for a {}x{} map", cells.len(), width, height),
            ));
        }
        let cells: Vec<Cell> = cells.into_iter().map(|c| Cell::from(c != 0)).collect();
        let active = cells.iter().filter(|&&c| c == 1).count();
        let total = cells.len();
        Ok(Self {
            width,
            height,
            cells,
            stats: ThresholdStats {
                mean: 0.0,
                variance: 0.0,
                threshold: 0.0,
                active,
                total,
            },
        })
    }

    pub fn stats(&self) -> &ThresholdStats {
        &self.stats
    }

    pub fn is_active(&self, x: usize, y: usize) -> bool {
        self.get(x, y) == 1
    }
}

impl MapView for ActivationMap {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn cells(&self) -> &[Cell] {
        &self.cells
    }
}
