//! Cache Metrics Module
//!
//! Tracks cache performance counters for one `CacheStore` instance.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

// == Cache Metrics ==
/// Process-wide counters, updated lock-free on every store operation.
#[derive(Debug)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    invalidations: AtomicU64,
    errors: AtomicU64,
    evictions: AtomicU64,
    rejected: AtomicU64,
    last_reset: Mutex<DateTime<Utc>>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Successful cache retrievals
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Values written
    pub sets: u64,
    /// Keys removed by invalidation
    pub invalidations: u64,
    /// Store or serialization failures
    pub errors: u64,
    /// Keys removed under memory pressure
    pub evictions: u64,
    /// Writes refused for exceeding a size cap
    pub rejected: u64,
    pub hit_rate: f64,
    pub last_reset: DateTime<Utc>,
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            last_reset: Mutex::new(Utc::now()),
        }
    }
}

impl CacheMetrics {
    // == Constructor ==
    /// Creates a new CacheMetrics with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidations(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        hit_rate(hits, self.misses.load(Ordering::Relaxed))
    }

    // == Snapshot ==
    pub fn snapshot(&self) -> MetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        MetricsSnapshot {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            hit_rate: hit_rate(hits, misses),
            last_reset: *self.last_reset.lock(),
        }
    }

    // == Reset ==
    /// Zeroes every counter. Operator action only.
    pub fn reset(&self) {
        let mut last_reset = self.last_reset.lock();
        for counter in [
            &self.hits,
            &self.misses,
            &self.sets,
            &self.invalidations,
            &self.errors,
            &self.evictions,
            &self.rejected,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *last_reset = Utc::now();
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
