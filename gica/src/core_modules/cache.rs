// THEORY:
// Thresholding every channel is cheap compared with a topology scan, but it is
// still wasted work to redo it for every measurement on the same image. The
// `ActivationCache` keeps one `ChannelSet` per source image, tagged with the
// threshold factor it was built with.
//
// Key principles:
// 1.  **Injectable**: the cache is an ordinary value owned by the collaborator
//     layer. There is no global state; two caches never share entries.
// 2.  **Factor-aware**: a lookup with a different factor is a miss, and the
//     recomputed set replaces the stale one.
// 3.  **Readers never wait on computation**: lookups take the read lock only long
//     enough to clone an `Arc`. Thresholding runs outside any lock; only the final
//     insert takes the write lock, which excludes readers for that instant.

use crate::core_modules::channel_set::ChannelSet;
use crate::core_modules::plane::plane::IntensityPlane;
use crate::error::GicaResult;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

struct CacheEntry {
    threshold_factor: f64,
    channels: Arc<ChannelSet>,
}

/// Channel sets keyed on source identity, invalidated on threshold change.
pub struct ActivationCache<K> {
    entries: RwLock<HashMap<K, CacheEntry>>,
}

impl<K: Eq + Hash + Clone> Default for ActivationCache<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> ActivationCache<K> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The cached set for `source`, if it was built with `threshold_factor`.
    pub fn get(&self, source: &K, threshold_factor: f64) -> Option<Arc<ChannelSet>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(source)
            .filter(|entry| entry.threshold_factor == threshold_factor)
            .map(|entry| Arc::clone(&entry.channels))
    }

    /// Returns the cached set or builds it from the planes `load` supplies.
    pub fn get_or_compute<F>(
        &self,
        source: K,
        threshold_factor: f64,
        load: F,
    ) -> GicaResult<Arc<ChannelSet>>
    where
        F: FnOnce() -> GicaResult<Vec<IntensityPlane>>,
    {
        if let Some(channels) = self.get(&source, threshold_factor) {
            return Ok(channels);
        }
        let planes = load()?;
        let channels = Arc::new(ChannelSet::from_planes(&planes, threshold_factor)?);
        debug!(
            channels = channels.len(),
            threshold_factor, "activation maps recomputed"
        );
        self.insert(source, Arc::clone(&channels));
        Ok(channels)
    }

    /// Stores a set built elsewhere, replacing any previous entry for `source`.
    pub fn insert(&self, source: K, channels: Arc<ChannelSet>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            source,
            CacheEntry {
                threshold_factor: channels.threshold_factor(),
                channels,
            },
        );
    }

    /// Drops the entry for `source`. Returns whether one existed.
    pub fn invalidate(&self, source: &K) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(source).is_some()
    }

    /// Drops every entry.
    pub fn reset(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
