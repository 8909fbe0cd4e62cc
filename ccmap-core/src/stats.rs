//! # CacheStats
//!
//! Spec §1 scopes the statistics aggregator out as "an immutable record of
//! counters - a collaborator the core increments," so this module ships a
//! minimal version rather than leaving the increment points as dead
//! no-ops. Modeled on `hkv-server::metrics::Metrics`'s atomic-counter /
//! snapshot pattern.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Thread-safe counters incremented by `Cache`/`Segment` on the hot path.
/// `Ordering::Relaxed` throughout: counters are diagnostic, not used to
/// order any other memory access.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    loads_success: AtomicU64,
    loads_failure: AtomicU64,
    load_nanos_total: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load_success(&self, elapsed: Duration) {
        self.loads_success.fetch_add(1, Ordering::Relaxed);
        self.load_nanos_total
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_load_failure(&self, elapsed: Duration) {
        self.loads_failure.fetch_add(1, Ordering::Relaxed);
        self.load_nanos_total
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// A consistent-enough snapshot for reporting; not synchronized with
    /// any particular map operation (same best-effort spirit as `size()`).
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            load_success_count: self.loads_success.load(Ordering::Relaxed),
            load_failure_count: self.loads_failure.load(Ordering::Relaxed),
            total_load_nanos: self.load_nanos_total.load(Ordering::Relaxed),
            eviction_count: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// An immutable point-in-time view of `CacheStats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    pub hit_count: u64,
    pub miss_count: u64,
    pub load_success_count: u64,
    pub load_failure_count: u64,
    pub total_load_nanos: u64,
    pub eviction_count: u64,
}

impl CacheStatsSnapshot {
    pub fn request_count(&self) -> u64 {
        self.hit_count + self.miss_count
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.request_count();
        if total == 0 {
            1.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }

    pub fn average_load_nanos(&self) -> f64 {
        let loads = self.load_success_count + self.load_failure_count;
        if loads == 0 {
            0.0
        } else {
            self.total_load_nanos as f64 / loads as f64
        }
    }
}
