//! Generational render cache
//!
//! Holds rendered output keyed by whatever identifies a render request. There
//! is no capacity bound: entries live until the owner clears the cache,
//! typically in response to a memory warning.
//!
//! Every clear bumps a generation counter. A render that started before a
//! clear carries the old generation and is refused on insert, so a late
//! result never repopulates a cache that was just emptied.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries currently cached
    pub entries: usize,
    /// Number of lookups that found an entry
    pub hits: u64,
    /// Number of lookups that found nothing
    pub misses: u64,
    /// Entries dropped by `clear`
    pub evictions: u64,
    /// Inserts refused because a clear happened while rendering
    pub stale_inserts: u64,
}

impl CacheStats {
    /// Cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheState<K, V> {
    entries: HashMap<K, Arc<V>>,
    generation: u64,
    stats: CacheStats,
}

/// Thread-safe memo table of shared render results
pub struct RenderCache<K, V> {
    state: Mutex<CacheState<K, V>>,
}

impl<K, V> RenderCache<K, V>
where
    K: Hash + Eq,
{
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                generation: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Look up an entry, recording a hit or miss
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut state = self.state.lock();
        match state.entries.get(key).cloned() {
            Some(value) => {
                state.stats.hits += 1;
                Some(value)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    /// Current generation; pass it back to [`insert_if_current`](Self::insert_if_current)
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Insert only if no clear happened since `generation` was read
    ///
    /// Returns `true` if the entry was stored.
    pub fn insert_if_current(&self, key: K, value: Arc<V>, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            state.stats.stale_inserts += 1;
            return false;
        }
        state.entries.insert(key, value);
        state.stats.entries = state.entries.len();
        true
    }

    /// Drop every entry, returning how many were removed
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let removed = state.entries.len();
        state.entries.clear();
        state.generation += 1;
        state.stats.entries = 0;
        state.stats.evictions += removed as u64;
        removed
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Snapshot of the statistics
    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }
}

impl<K, V> Default for RenderCache<K, V>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}
