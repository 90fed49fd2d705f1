//! Store counters. Updated with relaxed atomics at the call sites,
//! read as a snapshot for periodic logging.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct StoreMetrics {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub map_hits: AtomicU64,
    pub loads_scheduled: AtomicU64,
    pub loads_completed: AtomicU64,
    pub loads_discarded: AtomicU64,
    pub corrupt_retries: AtomicU64,
    pub lock_timeouts: AtomicU64,
    pub light_passes: AtomicU64,
    pub light_superseded: AtomicU64,
    pub light_panics: AtomicU64,
    pub column_updates: AtomicU64,
    pub column_races: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub map_hits: u64,
    pub loads_scheduled: u64,
    pub loads_completed: u64,
    pub loads_discarded: u64,
    pub corrupt_retries: u64,
    pub lock_timeouts: u64,
    pub light_passes: u64,
    pub light_superseded: u64,
    pub light_panics: u64,
    pub column_updates: u64,
    pub column_races: u64,
}

impl StoreMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            map_hits: self.map_hits.load(Ordering::Relaxed),
            loads_scheduled: self.loads_scheduled.load(Ordering::Relaxed),
            loads_completed: self.loads_completed.load(Ordering::Relaxed),
            loads_discarded: self.loads_discarded.load(Ordering::Relaxed),
            corrupt_retries: self.corrupt_retries.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            light_passes: self.light_passes.load(Ordering::Relaxed),
            light_superseded: self.light_superseded.load(Ordering::Relaxed),
            light_panics: self.light_panics.load(Ordering::Relaxed),
            column_updates: self.column_updates.load(Ordering::Relaxed),
            column_races: self.column_races.load(Ordering::Relaxed),
        }
    }
}
