// THEORY:
// The gamma norm is not one correlation but the Euclidean length of a vector of
// correlations. This module decides which map pairs make up that vector and how
// their results are folded together.
//
// The enumeration order is fixed:
// 1.  every channel with every later channel (i < j, strictly upper-triangular),
// 2.  every channel with the colocalization map,
// 3.  the sum map with the colocalization map.
// For N channels that is P = C(N, 2) + N + 1 pairs, and `r_max = sqrt(P)` is the
// length of the vector when every correlation is 1. The same count is used for
// progress reporting and for the `af` normalisation, so the two cannot disagree.

use crate::core_modules::activation_map::MapView;
use crate::core_modules::channel_set::ChannelSet;

/// Identifies the two maps of a pair. Slot indices address the maps of a
/// `ChannelSet` as `[channel 0, .., channel N-1, sum, coloc]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairKind {
    Channels(usize, usize),
    ChannelColoc(usize),
    SumColoc,
}

impl PairKind {
    pub fn label(&self) -> String {
        match self {
            PairKind::Channels(i, j) => format!("r_ij Ch {i},{j}"),
            PairKind::ChannelColoc(i) => format!("r_col,{i}"),
            PairKind::SumColoc => "r_col,sum".to_string(),
        }
    }

    /// Slot indices of the two maps for a set of `channel_count` channels.
    pub fn slots(&self, channel_count: usize) -> (usize, usize) {
        let sum = channel_count;
        let coloc = channel_count + 1;
        match *self {
            PairKind::Channels(i, j) => (i, j),
            PairKind::ChannelColoc(i) => (i, coloc),
            PairKind::SumColoc => (sum, coloc),
        }
    }
}

/// Two maps of a `ChannelSet` to be correlated.
pub struct MapPair<'a> {
    pub kind: PairKind,
    pub first: &'a dyn MapView,
    pub second: &'a dyn MapView,
}

/// Number of enumerated pairs for `channel_count` channels.
pub fn pair_count(channel_count: usize) -> usize {
    channel_count * channel_count.saturating_sub(1) / 2 + channel_count + 1
}

/// Length of the correlation vector when every pair correlates perfectly.
pub fn r_max(channel_count: usize) -> f64 {
    (pair_count(channel_count) as f64).sqrt()
}

/// Pair kinds in enumeration order.
pub fn pair_kinds(channel_count: usize) -> Vec<PairKind> {
    let mut kinds = Vec::with_capacity(pair_count(channel_count));
    for i in 0..channel_count {
        for j in i + 1..channel_count {
            kinds.push(PairKind::Channels(i, j));
        }
    }
    kinds.extend((0..channel_count).map(PairKind::ChannelColoc));
    kinds.push(PairKind::SumColoc);
    kinds
}

/// All pairs of a channel set in enumeration order.
pub fn enumerate_pairs(set: &ChannelSet) -> Vec<MapPair<'_>> {
    let maps = slot_maps(set);
    pair_kinds(set.len())
        .into_iter()
        .map(|kind| {
            let (a, b) = kind.slots(set.len());
            MapPair {
                kind,
                first: maps[a],
                second: maps[b],
            }
        })
        .collect()
}

/// The maps of a set in slot order: channels, then sum, then coloc.
pub fn slot_maps(set: &ChannelSet) -> Vec<&dyn MapView> {
    let mut maps: Vec<&dyn MapView> = set.channels().iter().map(|c| c as &dyn MapView).collect();
    maps.push(set.sum());
    maps.push(set.coloc());
    maps
}

/// Accumulates squared per-pair samples and takes the elementwise square root.
#[derive(Debug, Clone)]
pub struct EuclideanCombiner {
    sum_sq: Vec<f64>,
    pairs: usize,
}

impl EuclideanCombiner {
    pub fn new(samples: usize) -> Self {
        Self {
            sum_sq: vec![0.0; samples],
            pairs: 0,
        }
    }

    /// Adds one pair's samples. Extra samples beyond the combiner's length are
    /// ignored.
    pub fn add(&mut self, samples: &[f64]) {
        for (acc, s) in self.sum_sq.iter_mut().zip(samples) {
            *acc += s * s;
        }
        self.pairs += 1;
    }

    pub fn pairs(&self) -> usize {
        self.pairs
    }

    pub fn finish(self) -> Vec<f64> {
        self.sum_sq.into_iter().map(f64::sqrt).collect()
    }
}

/// Mean and sample standard deviation (divides by n - 1).
pub fn mean_and_sample_std(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    if n < 2 {
        return (mean, 0.0);
    }
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (mean, (sum_sq / (n - 1) as f64).sqrt())
}
