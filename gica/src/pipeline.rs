// THEORY:
// The `pipeline` module is the top-level API of the engine. It wraps a prepared
// `ChannelSet` and an `AnalysisConfig` into a `GammaNorm` analysis that can
// answer the two questions a collaborator asks:
//
// 1.  **Region measurement**: "how colocalized is this rectangle?" The bootstrap
//     estimator runs once per enumerated map pair; the per-repetition correlations
//     are combined into gamma-norm samples whose mean and spread become the
//     `MeasurementResult`. The result is a value the caller appends to its own
//     `MeasurementLog`.
// 2.  **Topology**: "where in the image is colocalization happening?" This is
//     delegated to the `TopologyScanner` in `parallel_topology`, which owns the
//     worker pool.
//
// Measurements run synchronously through `measure_region*`, or on the tokio
// blocking pool through `measure_region_async` so an interactive caller is never
// blocked. Either way, progress is reported after each pair.

use crate::core_modules::activation_map::MapView;
use crate::core_modules::channel_set::ChannelSet;
use crate::core_modules::correlation::correlation::bootstrap_correlation;
use crate::core_modules::correlation::BootstrapParams;
use crate::core_modules::pairs::{enumerate_pairs, mean_and_sample_std, r_max, EuclideanCombiner};
use crate::core_modules::plane::plane::IntensityPlane;
use crate::core_modules::sampling::{DirectDraw, UniformDraw, DEFAULT_SAMPLE_CACHE_LEN};
use crate::error::{GicaError, GicaResult};
use crate::parallel_topology::TopologyScanner;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;

// Re-export key data structures for the public API.
pub use crate::core_modules::region::Region;
pub use crate::parallel_topology::{ScanOutcome, ScanState, TopologyResult};

const DEFAULT_ROWS_PER_CHUNK: usize = 16;

/// Tunable parameters of an analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    /// Activation threshold in standard deviations above the mean.
    pub threshold_factor: f64,
    /// Fraction of the region drawn into each bootstrap super-sample, in (0, 1].
    pub sample_fraction: f64,
    /// Bootstrap repetitions per measurement; the error estimate needs at least 2.
    pub bootstrap_count: usize,
    /// Super-samples per bootstrap correlation.
    pub stat_count: usize,
    /// Edge length of the square topology window, in pixels.
    pub topology_bin_size: usize,
    /// Super-samples (and draws per super-sample) per topology window.
    pub topology_stat_count: usize,
    /// Keep per-pair topology images and the intermediate maps.
    pub full_results: bool,
    /// Topology workers. `None` uses every available core.
    pub worker_count: Option<usize>,
    /// Window rows handed to a worker at a time.
    pub rows_per_chunk: usize,
    /// Length of the shared uniform-sample table used by the topology scan.
    pub sample_cache_len: usize,
    /// Seed for reproducible runs. `None` seeds from system entropy.
    pub seed: Option<u64>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            threshold_factor: 2.0,
            sample_fraction: 0.25,
            bootstrap_count: 20,
            stat_count: 20,
            topology_bin_size: 12,
            topology_stat_count: 20,
            full_results: false,
            worker_count: None,
            rows_per_chunk: DEFAULT_ROWS_PER_CHUNK,
            sample_cache_len: DEFAULT_SAMPLE_CACHE_LEN,
            seed: None,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> GicaResult<()> {
        if !self.threshold_factor.is_finite() || self.threshold_factor <= 0.0 {
            return Err(GicaError::invalid("threshold_factor", "must be a positive finite number"));
        }
        if !(self.sample_fraction > 0.0 && self.sample_fraction <= 1.0) {
            return Err(GicaError::invalid("sample_fraction", "must lie in (0, 1]"));
        }
        if self.bootstrap_count < 2 {
            return Err(GicaError::invalid("bootstrap_count", "at least 2 repetitions are needed"));
        }
        if self.stat_count == 0 {
            return Err(GicaError::invalid("stat_count", "must be at least 1"));
        }
        if self.topology_bin_size == 0 {
            return Err(GicaError::invalid("topology_bin_size", "must be at least 1"));
        }
        if self.topology_stat_count == 0 {
            return Err(GicaError::invalid("topology_stat_count", "must be at least 1"));
        }
        if self.worker_count == Some(0) {
            return Err(GicaError::invalid("worker_count", "must be at least 1"));
        }
        if self.rows_per_chunk == 0 {
            return Err(GicaError::invalid("rows_per_chunk", "must be at least 1"));
        }
        if self.sample_cache_len == 0 {
            return Err(GicaError::invalid("sample_cache_len", "must be at least 1"));
        }
        Ok(())
    }

    pub(crate) fn bootstrap_params(&self) -> BootstrapParams {
        BootstrapParams {
            sample_fraction: self.sample_fraction,
            stat_count: self.stat_count,
            bootstrap_count: self.bootstrap_count,
        }
    }

    /// Resolved worker count.
    pub fn workers(&self) -> usize {
        self.worker_count.unwrap_or_else(num_cpus::get).max(1)
    }
}

/// Progress of a long-running operation, in completed units out of a total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// The outcome of one region measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementResult {
    /// Mean of the bootstrap gamma-norm samples.
    pub g_norm: f64,
    /// Sample standard deviation of the bootstrap gamma-norm samples.
    pub g_norm_err: f64,
    /// `(r_max - g_norm) / r_max`.
    pub af: f64,
    /// Colocalized pixels as a fraction of the region area.
    pub coloc_fraction: f64,
    /// Active pixels in the region: the coloc map first, then each channel.
    pub per_map_counts: Vec<usize>,
    pub region: Region,
    pub source_label: String,
    pub threshold_factor: f64,
}

impl fmt::Display for MeasurementResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2}\t{:.2}\t{:.2}\t{:.2}\t{:.2}\t{}\t",
            self.g_norm, self.g_norm_err, self.coloc_fraction, self.af, self.threshold_factor, self.region
        )?;
        for count in &self.per_map_counts {
            write!(f, "{count} / ")?;
        }
        write!(f, "{}\t{}", self.region.area(), self.source_label)
    }
}

/// Caller-owned, append-only record of measurements.
#[derive(Debug, Clone, Default)]
pub struct MeasurementLog {
    entries: Vec<MeasurementResult>,
}

impl MeasurementLog {
    pub const HEADER: &'static str = "gNorm\tgNormErr\tIcol(rel)\tAF\tthr\tx\ty\tw\th\tIcol,Il,Itotal\timage";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: MeasurementResult) {
        self.entries.push(result);
    }

    pub fn entries(&self) -> &[MeasurementResult] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &MeasurementResult> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&MeasurementResult> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Display for MeasurementLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", Self::HEADER)?;
        for entry in &self.entries {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}

/// A gamma-norm analysis over one channel set and configuration.
#[derive(Debug, Clone)]
pub struct GammaNorm {
    channels: Arc<ChannelSet>,
    config: AnalysisConfig,
}

impl GammaNorm {
    pub fn new(channels: Arc<ChannelSet>, config: AnalysisConfig) -> GicaResult<Self> {
        config.validate()?;
        Ok(Self { channels, config })
    }

    /// Thresholds the planes with the configured factor and wraps the result.
    pub fn from_planes(planes: &[IntensityPlane], config: AnalysisConfig) -> GicaResult<Self> {
        config.validate()?;
        let started = Instant::now();
        let channels = ChannelSet::from_planes(planes, config.threshold_factor)?;
        info!(
            channels = channels.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "gamma norm created"
        );
        Ok(Self {
            channels: Arc::new(channels),
            config,
        })
    }

    pub fn channels(&self) -> &Arc<ChannelSet> {
        &self.channels
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Measures a region with a fresh generator (seeded from the config if set).
    pub fn measure_region(&self, region: Region, label: &str) -> GicaResult<MeasurementResult> {
        let mut draw = match self.config.seed {
            Some(seed) => DirectDraw::seeded(seed),
            None => DirectDraw::from_entropy(),
        };
        self.measure_region_with(region, label, &mut draw, |_| {})
    }

    /// Measures a region with the given randomness, reporting progress after
    /// each enumerated pair.
    pub fn measure_region_with(
        &self,
        region: Region,
        label: &str,
        draw: &mut impl UniformDraw,
        mut on_progress: impl FnMut(Progress),
    ) -> GicaResult<MeasurementResult> {
        let set = &*self.channels;
        region.validate_within(set.width(), set.height())?;
        let bin_size = self.config.topology_bin_size;
        if region.width < bin_size || region.height < bin_size {
            return Err(GicaError::RegionTooSmall {
                width: region.width,
                height: region.height,
                bin_size,
            });
        }

        let started = Instant::now();
        let params = self.config.bootstrap_params();
        let pairs = enumerate_pairs(set);
        let total = pairs.len();
        on_progress(Progress { completed: 0, total });

        let mut combiner = EuclideanCombiner::new(params.bootstrap_count);
        for (done, pair) in pairs.iter().enumerate() {
            let samples = bootstrap_correlation(pair.first, pair.second, &region, &params, draw)?;
            combiner.add(&samples);
            on_progress(Progress {
                completed: done + 1,
                total,
            });
        }
        let g_samples = combiner.finish();
        let (g_norm, g_norm_err) = mean_and_sample_std(&g_samples);

        let r_max = r_max(set.len());
        let coloc_count = set.coloc().count_in(&region);
        let mut per_map_counts = Vec::with_capacity(set.len() + 1);
        per_map_counts.push(coloc_count);
        per_map_counts.extend(set.channels().iter().map(|c| c.count_in(&region)));

        info!(
            g_norm,
            g_norm_err,
            pairs = total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "region measured"
        );

        Ok(MeasurementResult {
            g_norm,
            g_norm_err,
            af: (r_max - g_norm) / r_max,
            coloc_fraction: coloc_count as f64 / region.area() as f64,
            per_map_counts,
            region,
            source_label: label.to_string(),
            threshold_factor: set.threshold_factor(),
        })
    }

    /// Runs the measurement on the blocking pool. Progress, if requested, is
    /// sent after each pair.
    pub async fn measure_region_async(
        &self,
        region: Region,
        label: impl Into<String>,
        progress: Option<mpsc::UnboundedSender<Progress>>,
    ) -> GicaResult<MeasurementResult> {
        let analysis = self.clone();
        let label = label.into();
        tokio::task::spawn_blocking(move || {
            let mut draw = match analysis.config.seed {
                Some(seed) => DirectDraw::seeded(seed),
                None => DirectDraw::from_entropy(),
            };
            analysis.measure_region_with(region, &label, &mut draw, |p| {
                if let Some(tx) = &progress {
                    let _ = tx.send(p);
                }
            })
        })
        .await
        .map_err(|e| GicaError::WorkerFailed(e.to_string()))?
    }

    /// A scanner for the topology of this analysis.
    pub fn topology_scanner(&self) -> GicaResult<TopologyScanner> {
        TopologyScanner::new(Arc::clone(&self.channels), self.config.clone())
    }

    /// Runs a topology scan to completion.
    pub async fn topology(&self) -> GicaResult<ScanOutcome> {
        self.topology_scanner()?.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::activation_map::ActivationMap;
    use crate::core_modules::pairs::pair_count;

    fn all_active_pair() -> GammaNorm {
        let maps = vec![
            ActivationMap::from_cells(4, 4, vec![1; 16]).unwrap(),
            ActivationMap::from_cells(4, 4, vec![1; 16]).unwrap(),
        ];
        let config = AnalysisConfig {
            sample_fraction: 1.0,
            stat_count: 1,
            bootstrap_count: 5,
            topology_bin_size: 4,
            seed: Some(3),
            ..AnalysisConfig::default()
        };
        GammaNorm::new(Arc::new(ChannelSet::from_maps(maps, 2.0).unwrap()), config).unwrap()
    }

    fn textured(channels: usize) -> GammaNorm {
        let planes: Vec<_> = (0..channels)
            .map(|c| {
                IntensityPlane::from_fn(24, 24, move |x, y| {
                    let blob = if (6..16).contains(&x) && (6..16).contains(&y) { 100.0 } else { 0.0 };
                    blob + ((x * 13 + y * 7 + c * 5) % 17) as f32
                })
            })
            .collect();
        let config = AnalysisConfig {
            threshold_factor: 0.5,
            seed: Some(17),
            ..AnalysisConfig::default()
        };
        GammaNorm::from_planes(&planes, config).unwrap()
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = AnalysisConfig::default();
        assert_eq!(config.threshold_factor, 2.0);
        assert_eq!(config.sample_fraction, 0.25);
        assert_eq!(config.bootstrap_count, 20);
        assert_eq!(config.stat_count, 20);
        assert_eq!(config.topology_bin_size, 12);
        assert_eq!(config.topology_stat_count, 20);
        assert!(!config.full_results);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let bad = [
            AnalysisConfig { sample_fraction: 0.0, ..Default::default() },
            AnalysisConfig { sample_fraction: 1.5, ..Default::default() },
            AnalysisConfig { bootstrap_count: 1, ..Default::default() },
            AnalysisConfig { threshold_factor: -2.0, ..Default::default() },
            AnalysisConfig { worker_count: Some(0), ..Default::default() },
            AnalysisConfig { topology_bin_size: 0, ..Default::default() },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(GicaError::InvalidParameter { .. })));
        }
    }

    #[test]
    fn all_active_maps_give_a_constant_gamma_norm() {
        let analysis = all_active_pair();
        let result = analysis.measure_region(Region::new(0, 0, 4, 4), "uniform").unwrap();
        // every super-sample sum is identical, so each correlation is 0
        assert_eq!(result.g_norm, 0.0);
        assert_eq!(result.g_norm_err, 0.0);
        assert_eq!(result.af, 1.0);
        assert_eq!(result.per_map_counts, vec![16, 16, 16]);
        assert_eq!(result.coloc_fraction, 1.0);
    }

    #[test]
    fn measurement_reports_progress_per_pair() {
        let analysis = textured(3);
        let mut seen = Vec::new();
        let mut draw = DirectDraw::seeded(1);
        let result = analysis
            .measure_region_with(Region::new(2, 2, 20, 20), "tex", &mut draw, |p| seen.push(p))
            .unwrap();
        let total = pair_count(3);
        assert_eq!(seen.len(), total + 1);
        assert!(seen.windows(2).all(|w| w[1].completed == w[0].completed + 1));
        assert_eq!(seen.last(), Some(&Progress { completed: total, total }));

        assert!(result.g_norm > 0.0);
        assert!(result.g_norm <= r_max(3) + 1e-9);
        assert!((result.af - (r_max(3) - result.g_norm) / r_max(3)).abs() < 1e-12);
        assert_eq!(result.per_map_counts.len(), 4);
        assert_eq!(result.source_label, "tex");
        assert_eq!(result.threshold_factor, 0.5);
    }

    #[test]
    fn colocalized_blob_scores_high() {
        let analysis = textured(2);
        let result = analysis.measure_region(Region::full(24, 24), "blob").unwrap();
        // the shared bright square drives every pair towards correlation 1
        assert!(result.g_norm > 0.8 * r_max(2), "g_norm {}", result.g_norm);
        assert!(result.af < 0.2);
    }

    #[test]
    fn region_outside_image_is_rejected() {
        let analysis = textured(2);
        let err = analysis.measure_region(Region::new(20, 20, 10, 10), "x").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn region_smaller_than_window_is_rejected() {
        let analysis = textured(2);
        let err = analysis.measure_region(Region::new(0, 0, 1, 3), "tiny").unwrap_err();
        assert_eq!(
            err,
            GicaError::RegionTooSmall {
                width: 1,
                height: 3,
                bin_size: 12
            }
        );
        assert!(err.is_validation());

        // one side at the window size is not enough
        let err = analysis.measure_region(Region::new(0, 0, 12, 11), "tiny").unwrap_err();
        assert!(matches!(err, GicaError::RegionTooSmall { .. }));
        assert!(analysis.measure_region(Region::new(0, 0, 12, 12), "fits").is_ok());
    }

    #[test]
    fn log_is_append_only_and_clearable() {
        let analysis = all_active_pair();
        let mut log = MeasurementLog::new();
        for _ in 0..3 {
            log.push(analysis.measure_region(Region::full(4, 4), "uniform").unwrap());
        }
        assert_eq!(log.len(), 3);
        let rendered = log.to_string();
        assert!(rendered.starts_with(MeasurementLog::HEADER));
        assert!(rendered.contains("16 / 16 / 16 / 16\tuniform"));
        log.clear();
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn async_measurement_streams_progress() {
        let analysis = textured(2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = analysis
            .measure_region_async(Region::full(24, 24), "async", Some(tx))
            .await
            .unwrap();
        let mut updates = Vec::new();
        while let Some(p) = rx.recv().await {
            updates.push(p);
        }
        assert_eq!(updates.last().map(|p| p.completed), Some(pair_count(2)));
        assert!(result.g_norm.is_finite());
    }
}
