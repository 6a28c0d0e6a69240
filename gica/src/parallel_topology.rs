// THEORY:
// The topology scan slides a `bin_size x bin_size` window over the whole image
// and, at every position, runs the dense correlation estimator on every map pair.
// That is P pairs x (width - bin) x (height - bin) estimates, each hundreds of
// random draws, so the scan is spread over a pool of workers.
//
// Key architectural principles:
// 1.  **Row partitioning**: window rows are cut into chunks of `rows_per_chunk`
//     and dealt round-robin to the workers, the same way a dispatcher hands
//     frames to a fixed pool.
// 2.  **Disjoint writes, no locks**: each chunk fills its own band buffer. The
//     channel set and the random-sample table are shared read-only through `Arc`s;
//     every worker owns its random offsets and scratch space. Bands are stitched
//     into the output images only after every worker has joined, and the final
//     per-pixel square root is taken during that stitch.
// 3.  **Cooperative cancellation**: a shared flag is checked before a worker starts
//     each chunk. Once a worker sees it, it stops producing bands; the scanner
//     then discards everything and reports `Cancelled`. A half-finished topology
//     is never published.
// 4.  **Observable state**: Idle -> Scanning -> Completed | Cancelled, published
//     through a `watch` channel. Per-chunk progress goes to an optional `mpsc`
//     sender.

use crate::core_modules::activation_map::{Cell, FloatImage, MapView};
use crate::core_modules::channel_set::ChannelSet;
use crate::core_modules::correlation::correlation::{dense_correlation, gather_window};
use crate::core_modules::correlation::CorrelationScratch;
use crate::core_modules::pairs::{pair_kinds, slot_maps, PairKind};
use crate::core_modules::sampling::RandomSampleSource;
use crate::error::{GicaError, GicaResult};
use crate::pipeline::{AnalysisConfig, GammaNorm, Progress};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Images above this many pixels take long enough to deserve a warning.
const LARGE_IMAGE_PIXELS: usize = 512 * 512;

/// Lifecycle of a `TopologyScanner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    Completed,
    Cancelled,
}

/// Requests cancellation of a running scan. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Normalised and absolute topology of one map pair.
#[derive(Debug, Clone)]
pub struct PairTopology {
    pub kind: PairKind,
    pub normalized: FloatImage,
    pub absolute: FloatImage,
}

impl PairTopology {
    pub fn label(&self) -> String {
        self.kind.label()
    }

    pub fn absolute_label(&self) -> String {
        format!("abs {}", self.kind.label())
    }
}

/// The two topology images plus, on request, the per-pair images and the maps
/// they were computed from.
#[derive(Debug, Clone)]
pub struct TopologyResult {
    /// Euclidean combination of the normalised pair correlations.
    pub normalized: FloatImage,
    /// Euclidean combination of the covariance numerators.
    pub absolute: FloatImage,
    /// Per-pair images, only with `full_results`.
    pub pairs: Vec<PairTopology>,
    /// Activation, sum and coloc maps, only with `full_results`.
    pub intermediates: Vec<(String, FloatImage)>,
    source: Arc<ChannelSet>,
    config: AnalysisConfig,
}

impl TopologyResult {
    pub fn source(&self) -> &Arc<ChannelSet> {
        &self.source
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// An analysis over the channel set and configuration that produced this
    /// topology.
    pub fn analysis(&self) -> GicaResult<GammaNorm> {
        GammaNorm::new(Arc::clone(&self.source), self.config.clone())
    }
}

#[derive(Debug)]
pub enum ScanOutcome {
    Completed(TopologyResult),
    Cancelled,
}

impl ScanOutcome {
    pub fn completed(self) -> Option<TopologyResult> {
        match self {
            ScanOutcome::Completed(result) => Some(result),
            ScanOutcome::Cancelled => None,
        }
    }
}

/// Deals row chunks to a fixed number of workers.
struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    /// Round-robin assignment: chunk `i` goes to worker `i % size`.
    fn deal(&self, chunks: Vec<Range<usize>>) -> Vec<Vec<Range<usize>>> {
        let mut assignments = vec![Vec::new(); self.size];
        let mut worker_idx = 0;
        for chunk in chunks {
            assignments[worker_idx].push(chunk);
            worker_idx = (worker_idx + 1) % self.size;
        }
        assignments.retain(|a| !a.is_empty());
        assignments
    }
}

/// Everything a worker reads. Shared immutably between workers.
struct ScanContext {
    channels: Arc<ChannelSet>,
    samples: Arc<RandomSampleSource>,
    kinds: Vec<PairKind>,
    bin_size: usize,
    stat_count: usize,
    keep_pairs: bool,
}

/// Squared sums (and optionally per-pair values) for a run of output rows.
struct RowBand {
    first_row: usize,
    rows: usize,
    norm_sq: Vec<f32>,
    abs_sq: Vec<f32>,
    pair_values: Vec<(Vec<f32>, Vec<f32>)>,
}

impl ScanContext {
    fn width(&self) -> usize {
        self.channels.width()
    }

    /// Scans the windows whose top rows are in `rows`.
    fn scan_rows(&self, rows: Range<usize>, rng: &mut StdRng, scratch: &mut CorrelationScratch) -> RowBand {
        let width = self.width();
        let half = self.bin_size / 2;
        let scan_width = width - self.bin_size;
        let band_len = rows.len() * width;
        let channel_count = self.channels.len();
        let maps = slot_maps(&self.channels);
        let mut windows: Vec<Vec<Cell>> = vec![Vec::with_capacity(self.bin_size * self.bin_size); maps.len()];

        let mut band = RowBand {
            first_row: rows.start,
            rows: rows.len(),
            norm_sq: vec![0.0; band_len],
            abs_sq: vec![0.0; band_len],
            pair_values: if self.keep_pairs {
                vec![(vec![0.0; band_len], vec![0.0; band_len]); self.kinds.len()]
            } else {
                Vec::new()
            },
        };

        for (r, y) in rows.enumerate() {
            for x in 0..scan_width {
                for (window, map) in windows.iter_mut().zip(&maps) {
                    gather_window(*map, x, y, self.bin_size, window);
                }
                let out = r * width + x + half;
                let mut norm_sq = 0.0f64;
                let mut abs_sq = 0.0f64;
                for (p, kind) in self.kinds.iter().enumerate() {
                    let (a, b) = kind.slots(channel_count);
                    let mut cursor = self.samples.random_cursor(rng);
                    let sample =
                        dense_correlation(&windows[a], &windows[b], self.stat_count, &mut cursor, scratch);
                    norm_sq += sample.normalized * sample.normalized;
                    abs_sq += sample.covariance * sample.covariance;
                    if let Some((norm, abs)) = band.pair_values.get_mut(p) {
                        norm[out] = sample.normalized as f32;
                        abs[out] = sample.covariance as f32;
                    }
                }
                band.norm_sq[out] = norm_sq as f32;
                band.abs_sq[out] = abs_sq as f32;
            }
        }
        band
    }
}

/// Runs the sliding-window topology over a channel set on a worker pool.
#[derive(Debug)]
pub struct TopologyScanner {
    channels: Arc<ChannelSet>,
    config: AnalysisConfig,
    samples: Option<Arc<RandomSampleSource>>,
    cancel: CancelHandle,
    state: watch::Sender<ScanState>,
    progress: Option<mpsc::UnboundedSender<Progress>>,
}

impl TopologyScanner {
    pub fn new(channels: Arc<ChannelSet>, config: AnalysisConfig) -> GicaResult<Self> {
        config.validate()?;
        let bin_size = config.topology_bin_size;
        if channels.width() <= bin_size || channels.height() <= bin_size {
            return Err(GicaError::WindowTooLarge {
                width: channels.width(),
                height: channels.height(),
                bin_size,
            });
        }
        let (state, _) = watch::channel(ScanState::Idle);
        Ok(Self {
            channels,
            config,
            samples: None,
            cancel: CancelHandle::default(),
            state,
            progress: None,
        })
    }

    /// Shares an existing sample table instead of filling a new one per scan.
    pub fn with_sample_source(mut self, samples: Arc<RandomSampleSource>) -> Self {
        self.samples = Some(samples);
        self
    }

    /// Sends a `Progress` update after every finished row chunk.
    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn state(&self) -> ScanState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanState> {
        self.state.subscribe()
    }

    /// Window-row chunks, in top-to-bottom order.
    pub fn row_chunks(&self) -> Vec<Range<usize>> {
        let rows = self.channels.height() - self.config.topology_bin_size;
        let step = self.config.rows_per_chunk;
        (0..rows)
            .step_by(step)
            .map(|start| start..(start + step).min(rows))
            .collect()
    }

    /// Scans the whole image. A scanner runs at most once.
    pub async fn run(&self) -> GicaResult<ScanOutcome> {
        let mut claimed = false;
        self.state.send_if_modified(|state| {
            if *state == ScanState::Idle {
                *state = ScanState::Scanning;
                claimed = true;
            }
            claimed
        });
        if !claimed {
            return Err(GicaError::ScanAlreadyStarted);
        }

        let started = Instant::now();
        let (width, height) = (self.channels.width(), self.channels.height());
        if width * height > LARGE_IMAGE_PIXELS {
            warn!(width, height, "topology on images above 512x512 takes a long time");
        }

        let samples = match &self.samples {
            Some(samples) => Arc::clone(samples),
            None => Arc::new(match self.config.seed {
                Some(seed) => RandomSampleSource::seeded(self.config.sample_cache_len, seed),
                None => RandomSampleSource::from_entropy(self.config.sample_cache_len),
            }),
        };
        let context = Arc::new(ScanContext {
            channels: Arc::clone(&self.channels),
            samples,
            kinds: pair_kinds(self.channels.len()),
            bin_size: self.config.topology_bin_size,
            stat_count: self.config.topology_stat_count,
            keep_pairs: self.config.full_results,
        });

        let chunks = self.row_chunks();
        let total = chunks.len();
        let pool = WorkerPool::new(self.config.workers());
        let completed = Arc::new(AtomicUsize::new(0));

        let workers = pool.deal(chunks).into_iter().enumerate().map(|(worker, assigned)| {
            let context = Arc::clone(&context);
            let cancel = self.cancel.clone();
            let progress = self.progress.clone();
            let completed = Arc::clone(&completed);
            let seed = self.config.seed.map(|s| s.wrapping_add(1 + worker as u64));

            tokio::task::spawn_blocking(move || {
                let mut rng = match seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                let mut scratch = CorrelationScratch::with_capacity(context.stat_count);
                let mut bands = Vec::with_capacity(assigned.len());
                for rows in assigned {
                    if cancel.is_cancelled() {
                        break;
                    }
                    bands.push(context.scan_rows(rows, &mut rng, &mut scratch));
                    let done = completed.fetch_add(1, Ordering::AcqRel) + 1;
                    if let Some(tx) = &progress {
                        let _ = tx.send(Progress { completed: done, total });
                    }
                }
                bands
            })
        });

        let mut bands = Vec::with_capacity(total);
        for joined in join_all(workers).await {
            match joined {
                Ok(worker_bands) => bands.extend(worker_bands),
                Err(e) => {
                    self.state.send_replace(ScanState::Cancelled);
                    return Err(GicaError::WorkerFailed(e.to_string()));
                }
            }
        }

        if self.cancel.is_cancelled() {
            self.state.send_replace(ScanState::Cancelled);
            info!(
                finished_chunks = bands.len(),
                total_chunks = total,
                "topology scan cancelled, partial result discarded"
            );
            return Ok(ScanOutcome::Cancelled);
        }

        let result = self.stitch(&context, bands);
        self.state.send_replace(ScanState::Completed);
        info!(
            width,
            height,
            pairs = context.kinds.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "topology computed"
        );
        Ok(ScanOutcome::Completed(result))
    }

    /// Copies the bands into full-size images and takes the per-pixel root.
    fn stitch(&self, context: &ScanContext, bands: Vec<RowBand>) -> TopologyResult {
        let (width, height) = (self.channels.width(), self.channels.height());
        let half = context.bin_size / 2;
        let blank = || FloatImage::new(width as u32, height as u32);

        let mut normalized = blank();
        let mut absolute = blank();
        let mut pair_images: Vec<(FloatImage, FloatImage)> = if context.keep_pairs {
            (0..context.kinds.len()).map(|_| (blank(), blank())).collect()
        } else {
            Vec::new()
        };

        for band in bands {
            let start = (band.first_row + half) * width;
            let len = band.rows * width;
            let out_norm: &mut [f32] = &mut normalized;
            for (dst, &src) in out_norm[start..start + len].iter_mut().zip(&band.norm_sq) {
                *dst = src.sqrt();
            }
            let out_abs: &mut [f32] = &mut absolute;
            for (dst, &src) in out_abs[start..start + len].iter_mut().zip(&band.abs_sq) {
                *dst = src.sqrt();
            }
            for ((norm_img, abs_img), (norm, abs)) in pair_images.iter_mut().zip(&band.pair_values) {
                let norm_img: &mut [f32] = norm_img;
                norm_img[start..start + len].copy_from_slice(norm);
                let abs_img: &mut [f32] = abs_img;
                abs_img[start..start + len].copy_from_slice(abs);
            }
        }

        let pairs = context
            .kinds
            .iter()
            .zip(pair_images)
            .map(|(&kind, (normalized, absolute))| PairTopology {
                kind,
                normalized,
                absolute,
            })
            .collect();

        let intermediates = if context.keep_pairs {
            let set = &self.channels;
            let mut maps: Vec<(String, FloatImage)> = set
                .channels()
                .iter()
                .enumerate()
                .map(|(i, c)| (format!("I ch{i}"), c.to_float_image()))
                .collect();
            maps.push(("I sum".to_string(), set.sum().to_float_image()));
            maps.push(("I col".to_string(), set.coloc().to_float_image()));
            maps
        } else {
            Vec::new()
        };

        TopologyResult {
            normalized,
            absolute,
            pairs,
            intermediates,
            source: Arc::clone(&self.channels),
            config: self.config.clone(),
        }
    }
}
