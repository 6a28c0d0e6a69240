// THEORY:
// The correlation estimators measure how strongly two maps co-vary over an area.
// They never correlate pixels one-to-one. Instead they build "super-samples":
// each super-sample is the sum of many map values drawn at random (with
// replacement) from the area, using the *same* drawn pixel index for both maps so
// the pairing that carries the covariance is preserved. The correlation is then
// taken over a small set of super-samples:
//
//     corr = sum((a_i - a_mean) * (b_i - b_mean))
//            / sqrt(sum((a_i - a_mean)^2) * sum((b_i - b_mean)^2))
//
// If either sum of squares is below `DEGENERATE_VARIANCE` the correlation is
// defined as 0, so uniform areas never produce NaN or infinity.
//
// Two variants exist:
// 1.  **Bootstrap** (`bootstrap_correlation`): used for region measurements.
//     Repeats the estimate `bootstrap_count` times so the spread of the results
//     gives an error estimate. Region values are linearised once up front.
// 2.  **Dense** (`dense_correlation`): used by the topology scan, once per pixel
//     per map pair. It works on pre-gathered window buffers and caller-owned
//     scratch, allocates nothing, and also returns the raw covariance numerator
//     for the "absolute" topology channel.

use crate::core_modules::activation_map::{Cell, MapView};
use crate::core_modules::region::Region;
use crate::core_modules::sampling::UniformDraw;
use crate::error::{GicaError, GicaResult};

/// Sums of squares below this value are treated as zero variance.
pub const DEGENERATE_VARIANCE: f64 = 1e-3;

/// Result of one correlation estimate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CorrelationSample {
    /// Normalised correlation in [-1, 1], or 0 for degenerate input.
    pub normalized: f64,
    /// Unnormalised covariance numerator.
    pub covariance: f64,
}

/// Parameters of the bootstrap estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BootstrapParams {
    /// Fraction of the region drawn into each super-sample, in (0, 1].
    pub sample_fraction: f64,
    /// Number of super-samples per correlation estimate.
    pub stat_count: usize,
    /// Number of bootstrap repetitions.
    pub bootstrap_count: usize,
}

/// Reusable buffers for super-sample sums.
#[derive(Debug, Clone, Default)]
pub struct CorrelationScratch {
    sums_a: Vec<f64>,
    sums_b: Vec<f64>,
}

impl CorrelationScratch {
    pub fn with_capacity(stat_count: usize) -> Self {
        Self {
            sums_a: Vec::with_capacity(stat_count),
            sums_b: Vec::with_capacity(stat_count),
        }
    }

    fn reset(&mut self, stat_count: usize) {
        self.sums_a.clear();
        self.sums_a.resize(stat_count, 0.0);
        self.sums_b.clear();
        self.sums_b.resize(stat_count, 0.0);
    }
}

pub mod correlation {
    use super::*;

    /// Correlation of two equally long series of super-sample sums.
    pub fn correlate_sums(a: &[f64], b: &[f64]) -> CorrelationSample {
        let n = a.len().min(b.len());
        if n == 0 {
            return CorrelationSample::default();
        }
        let mean_a = a[..n].iter().sum::<f64>() / n as f64;
        let mean_b = b[..n].iter().sum::<f64>() / n as f64;

        let mut covariance = 0.0;
        let mut var_a = 0.0;
        let mut var_b = 0.0;
        for (&ai, &bi) in a[..n].iter().zip(&b[..n]) {
            let da = ai - mean_a;
            let db = bi - mean_b;
            covariance += da * db;
            var_a += da * da;
            var_b += db * db;
        }

        let normalized = if var_a.abs() > DEGENERATE_VARIANCE && var_b.abs() > DEGENERATE_VARIANCE
        {
            covariance / (var_a.sqrt() * var_b.sqrt())
        } else {
            0.0
        };
        CorrelationSample {
            normalized,
            covariance,
        }
    }

    /// Draws `stat_count` paired super-samples of `draws_per_sample` values each
    /// from the two value buffers and correlates them.
    pub fn paired_super_samples(
        values_a: &[Cell],
        values_b: &[Cell],
        stat_count: usize,
        draws_per_sample: usize,
        draw: &mut impl UniformDraw,
        scratch: &mut CorrelationScratch,
    ) -> CorrelationSample {
        let len = values_a.len().min(values_b.len());
        scratch.reset(stat_count);
        if len == 0 {
            return CorrelationSample::default();
        }
        for i in 0..stat_count {
            let mut sum_a = 0u64;
            let mut sum_b = 0u64;
            for _ in 0..draws_per_sample {
                let pos = draw.next_index(len);
                sum_a += u64::from(values_a[pos]);
                sum_b += u64::from(values_b[pos]);
            }
            scratch.sums_a[i] = sum_a as f64;
            scratch.sums_b[i] = sum_b as f64;
        }
        correlate_sums(&scratch.sums_a, &scratch.sums_b)
    }

    /// Bootstrap estimate over a region: returns `bootstrap_count` normalised
    /// correlations between `a` and `b`.
    pub fn bootstrap_correlation(
        a: &dyn MapView,
        b: &dyn MapView,
        region: &Region,
        params: &BootstrapParams,
        draw: &mut impl UniformDraw,
    ) -> GicaResult<Vec<f64>> {
        if a.width() != b.width() || a.height() != b.height() {
            return Err(GicaError::DimensionMismatch {
                index: 1,
                width: b.width(),
                height: b.height(),
                expected_width: a.width(),
                expected_height: a.height(),
            });
        }
        region.validate_within(a.width(), a.height())?;
        if !(params.sample_fraction > 0.0 && params.sample_fraction <= 1.0) {
            return Err(GicaError::invalid(
                "sample_fraction",
                format!("{} is outside (0, 1]", params.sample_fraction),
            ));
        }

        let (cells_a, cells_b) = (a.cells(), b.cells());
        let values_a: Vec<Cell> = region.indices(a.width()).map(|i| cells_a[i]).collect();
        let values_b: Vec<Cell> = region.indices(b.width()).map(|i| cells_b[i]).collect();
        let draws_per_sample = (params.sample_fraction * region.area() as f64) as usize;

        let mut scratch = CorrelationScratch::with_capacity(params.stat_count);
        Ok((0..params.bootstrap_count)
            .map(|_| {
                paired_super_samples(
                    &values_a,
                    &values_b,
                    params.stat_count,
                    draws_per_sample,
                    draw,
                    &mut scratch,
                )
                .normalized
            })
            .collect())
    }

    /// Dense single-pass estimate over two gathered windows: `n` super-samples of
    /// `n` draws each.
    #[inline]
    pub fn dense_correlation(
        window_a: &[Cell],
        window_b: &[Cell],
        n: usize,
        draw: &mut impl UniformDraw,
        scratch: &mut CorrelationScratch,
    ) -> CorrelationSample {
        paired_super_samples(window_a, window_b, n, n, draw, scratch)
    }

    /// Copies the `size x size` window with top-left corner (x, y) into `out`.
    #[inline]
    pub fn gather_window(map: &dyn MapView, x: usize, y: usize, size: usize, out: &mut Vec<Cell>) {
        out.clear();
        let cells = map.cells();
        let width = map.width();
        for row in y..y + size {
            let start = row * width + x;
            out.extend_from_slice(&cells[start..start + size]);
        }
    }
}
