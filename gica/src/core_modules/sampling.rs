// THEORY:
// The estimators need a lot of uniform [0, 1) numbers: one per draw, and a
// topology scan performs billions of draws. Two sources are offered behind the
// `UniformDraw` trait:
//
// 1.  `DirectDraw` wraps any `rand` generator and produces a fresh value per draw.
// 2.  `RandomSampleSource` is an owned, pre-filled table of uniform values. It is
//     shared read-only between workers; each consumer opens a `SampleCursor` at an
//     offset of its choosing and reads forward from there, wrapping at the end of
//     the table. Cursors never write to the table, so workers can share one source
//     through an `Arc` without synchronisation. Reusing table values across
//     windows is a throughput trade-off only; each window picks its own random
//     offset.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Default table length of a `RandomSampleSource` (2^20 values).
pub const DEFAULT_SAMPLE_CACHE_LEN: usize = 1 << 20;

/// A stream of i.i.d. uniform values in [0, 1).
pub trait UniformDraw {
    fn next_unit(&mut self) -> f64;

    /// A uniformly chosen index in `0..len`. `len` must be non-zero.
    #[inline]
    fn next_index(&mut self, len: usize) -> usize {
        ((self.next_unit() * len as f64) as usize).min(len - 1)
    }
}

/// Draws directly from a random number generator.
#[derive(Debug, Clone)]
pub struct DirectDraw<R> {
    rng: R,
}

impl<R: Rng> DirectDraw<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl DirectDraw<StdRng> {
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> UniformDraw for DirectDraw<R> {
    #[inline]
    fn next_unit(&mut self) -> f64 {
        self.rng.gen_range(0.0..1.0)
    }
}

/// An owned table of uniform values, read through cursors.
#[derive(Debug, Clone)]
pub struct RandomSampleSource {
    values: Vec<f64>,
}

impl RandomSampleSource {
    /// Fills a table of `len` values from `rng`. A zero length is bumped to one.
    pub fn from_rng(len: usize, rng: &mut impl Rng) -> Self {
        let values = (0..len.max(1)).map(|_| rng.gen_range(0.0..1.0)).collect();
        Self { values }
    }

    pub fn seeded(len: usize, seed: u64) -> Self {
        Self::from_rng(len, &mut StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy(len: usize) -> Self {
        Self::from_rng(len, &mut StdRng::from_entropy())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// A cursor yielding `values[offset]`, `values[offset + 1]`, ... wrapping
    /// around. Offsets past the end are reduced modulo the table length.
    pub fn cursor(&self, offset: usize) -> SampleCursor<'_> {
        SampleCursor {
            values: &self.values,
            position: offset % self.values.len(),
        }
    }

    /// A cursor at a random offset chosen by `rng`.
    pub fn random_cursor(&self, rng: &mut impl Rng) -> SampleCursor<'_> {
        self.cursor(rng.gen_range(0..self.values.len()))
    }
}

/// Sequential read position into a `RandomSampleSource`.
#[derive(Debug, Clone)]
pub struct SampleCursor<'a> {
    values: &'a [f64],
    position: usize,
}

impl UniformDraw for SampleCursor<'_> {
    #[inline]
    fn next_unit(&mut self) -> f64 {
        let value = self.values[self.position];
        self.position += 1;
        if self.position == self.values.len() {
            self.position = 0;
        }
        value
    }
}
