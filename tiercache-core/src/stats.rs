//! Per-provider cache statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Snapshot of a provider's counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total number of get requests
    pub gets: u64,

    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses
    pub misses: u64,

    /// Total number of set requests
    pub sets: u64,

    /// Total number of removals requested by callers
    pub removals: u64,

    /// Entries dropped by expiry or flush
    pub evictions: u64,

    /// Current number of live entries
    pub entry_count: usize,

    /// Hit rate (0.0 to 1.0)
    pub hit_rate: f64,
}

/// Thread-safe counter set shared by a provider and its snapshots
#[derive(Debug, Default)]
pub struct StatsCollector {
    gets: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    removals: AtomicU64,
    evictions: AtomicU64,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters together with the caller-supplied entry count
    pub fn snapshot(&self, entry_count: usize) -> CacheStats {
        let gets = self.gets.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);

        let hit_rate = if gets > 0 {
            hits as f64 / gets as f64
        } else {
            0.0
        };

        CacheStats {
            gets,
            hits,
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entry_count,
            hit_rate,
        }
    }
}

/// Collector handle shared between a provider and its wrappers
pub type SharedStatsCollector = Arc<StatsCollector>;
