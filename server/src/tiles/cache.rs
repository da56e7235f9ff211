//! Byte-budgeted LRU tile cache
//!
//! Tile payloads vary hugely in size with case density, so the cache is bounded
//! by the total weight of its contents rather than by entry count.
//!
//! [`ByteBudgetCache`] is the generic, unsynchronized building block: an
//! [`IndexMap`] kept in recency order (oldest first) plus a caller-supplied
//! weigher. [`TileCache`] wraps one behind a single mutex together with the
//! incident scope, so that eviction, scope changes and scoped writes all see a
//! consistent total.

use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use indexmap::IndexMap;
use metrics::{counter, gauge};
use tracing::debug;

use super::coordinates::TileCoordinates;
use crate::geo::LatLng;

/// Fixed per-entry weight on top of the encoded payload. Keeps empty
/// sentinels from being free.
pub const ENTRY_OVERHEAD_BYTES: usize = 128;

/// Incident id used before any incident is selected.
pub const NO_INCIDENT: i64 = -1;

type Weigher<K, V> = Box<dyn Fn(&K, &V) -> usize + Send + Sync>;

/// LRU map bounded by the summed weight of its values.
pub struct ByteBudgetCache<K, V> {
    /// Entries in recency order (least recently used first)
    entries: IndexMap<K, (V, usize)>,
    weigher: Weigher<K, V>,
    max_bytes: usize,
    total_bytes: usize,
}

impl<K: Hash + Eq, V> ByteBudgetCache<K, V> {
    pub fn new(
        max_bytes: usize,
        weigher: impl Fn(&K, &V) -> usize + Send + Sync + 'static,
    ) -> Self {
        Self {
            entries: IndexMap::new(),
            weigher: Box::new(weigher),
            max_bytes,
            total_bytes: 0,
        }
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let index = self.entries.get_index_of(key)?;
        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
        self.entries.get_index(last).map(|(_, (value, _))| value)
    }

    /// Look up `key` without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|(value, _)| value)
    }

    /// Insert or replace `key`, then evict least recently used entries until
    /// the total weight is within budget. Returns the number of evicted entries.
    ///
    /// An entry heavier than the whole budget is itself evicted.
    pub fn put(&mut self, key: K, value: V) -> usize {
        let weight = (self.weigher)(&key, &value);
        if let Some((_, old_weight)) = self.entries.shift_remove(&key) {
            self.total_bytes -= old_weight;
        }
        self.entries.insert(key, (value, weight));
        self.total_bytes += weight;

        let mut evicted = 0;
        while self.total_bytes > self.max_bytes {
            match self.entries.shift_remove_index(0) {
                Some((_, (_, w))) => {
                    self.total_bytes -= w;
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (value, weight) = self.entries.shift_remove(key)?;
        self.total_bytes -= weight;
        Some(value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    /// Summed weight of all entries.
    pub fn current_size(&self) -> usize {
        self.total_bytes
    }

    pub fn max_size(&self) -> usize {
        self.max_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Encoded raster tile.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    /// PNG bytes
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

/// A rendered (or known-empty) tile together with what it was rendered from.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedTileEntry {
    /// `None` is the empty sentinel: the tile was produced and had no cases.
    pub tile: Option<Tile>,
    pub southwest: LatLng,
    pub northeast: LatLng,
    /// Live case count of the incident when the tile was produced
    pub case_count: u64,
}

impl CachedTileEntry {
    pub fn weight(&self) -> usize {
        ENTRY_OVERHEAD_BYTES + self.tile.as_ref().map_or(0, |t| t.data.len())
    }
}

/// Incident a cache's contents belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheScope {
    pub incident_id: i64,
    /// Bumped on every rescope. Writes carry the generation they were
    /// started under and are dropped when it is no longer current.
    pub generation: u64,
}

struct ScopedTiles {
    scope: CacheScope,
    tiles: ByteBudgetCache<TileCoordinates, CachedTileEntry>,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCacheStats {
    pub entry_count: usize,
    pub size_bytes: usize,
    pub max_size_bytes: usize,
}

/// Thread-safe, incident-scoped tile cache.
pub struct TileCache {
    inner: Mutex<ScopedTiles>,
}

impl TileCache {
    pub fn new(max_size_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(ScopedTiles {
                scope: CacheScope {
                    incident_id: NO_INCIDENT,
                    generation: 0,
                },
                tiles: ByteBudgetCache::new(max_size_bytes, |_, entry: &CachedTileEntry| {
                    entry.weight()
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScopedTiles> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn scope(&self) -> CacheScope {
        self.lock().scope
    }

    pub fn get(&self, key: &TileCoordinates) -> Option<CachedTileEntry> {
        let entry = self.lock().tiles.get(key).cloned();
        if entry.is_some() {
            counter!("casemap_tile_cache_hits_total").increment(1);
        } else {
            counter!("casemap_tile_cache_misses_total").increment(1);
        }
        entry
    }

    /// Insert into the current scope, whatever it is.
    pub fn put(&self, key: TileCoordinates, entry: CachedTileEntry) {
        let mut inner = self.lock();
        let evicted = inner.tiles.put(key, entry);
        Self::record(&inner.tiles, evicted);
    }

    /// Insert only if `generation` is still the current scope generation.
    /// Returns whether the write happened.
    pub fn put_scoped(
        &self,
        generation: u64,
        key: TileCoordinates,
        entry: CachedTileEntry,
    ) -> bool {
        let mut inner = self.lock();
        if inner.scope.generation != generation {
            debug!(
                "Dropping tile {} written for generation {} (current {})",
                key, generation, inner.scope.generation
            );
            return false;
        }
        let evicted = inner.tiles.put(key, entry);
        Self::record(&inner.tiles, evicted);
        true
    }

    pub fn evict_all(&self) {
        let mut inner = self.lock();
        inner.tiles.clear();
        Self::record(&inner.tiles, 0);
    }

    /// Evict everything and switch to `incident_id` under one lock.
    /// Returns the new scope.
    pub fn rescope(&self, incident_id: i64) -> CacheScope {
        let mut inner = self.lock();
        inner.tiles.clear();
        inner.scope = CacheScope {
            incident_id,
            generation: inner.scope.generation + 1,
        };
        Self::record(&inner.tiles, 0);
        inner.scope
    }

    pub fn current_size(&self) -> usize {
        self.lock().tiles.current_size()
    }

    pub fn stats(&self) -> TileCacheStats {
        let inner = self.lock();
        TileCacheStats {
            entry_count: inner.tiles.len(),
            size_bytes: inner.tiles.current_size(),
            max_size_bytes: inner.tiles.max_size(),
        }
    }

    fn record(tiles: &ByteBudgetCache<TileCoordinates, CachedTileEntry>, evicted: usize) {
        if evicted > 0 {
            counter!("casemap_tile_cache_evictions_total").increment(evicted as u64);
        }
        gauge!("casemap_tile_cache_size_bytes").set(tiles.current_size() as f64);
        gauge!("casemap_tile_cache_entry_count").set(tiles.len() as f64);
    }
}
