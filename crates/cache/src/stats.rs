//! Cache hit/miss counters.
//!
//! Counters are independent and monotonically increasing, so every atomic
//! uses `Ordering::Relaxed`; a snapshot may be off by in-flight increments
//! relative to itself.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    /// Lookups served by the in-process tier.
    pub local_hits: u64,
    /// Lookups served by the shared tier.
    pub shared_hits: u64,
    /// Lookups served by neither tier.
    pub misses: u64,
    /// Shared tier reads that failed or timed out (counted as misses too).
    pub shared_read_errors: u64,
    /// Calls to `store`.
    pub writes: u64,
    /// Shared tier writes that failed or timed out.
    pub shared_write_errors: u64,
}

impl CacheStatsSnapshot {
    /// Hits from either tier.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.local_hits + self.shared_hits
    }

    /// Fraction of lookups that hit either tier (0.0 - 1.0).
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CacheStats {
    local_hits: AtomicU64,
    shared_hits: AtomicU64,
    misses: AtomicU64,
    shared_read_errors: AtomicU64,
    writes: AtomicU64,
    shared_write_errors: AtomicU64,
}

impl CacheStats {
    pub(crate) fn record_local_hit(&self) {
        self.local_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_shared_hit(&self) {
        self.shared_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_shared_read_error(&self) {
        self.shared_read_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_shared_write_error(&self) {
        self.shared_write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            shared_hits: self.shared_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            shared_read_errors: self.shared_read_errors.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            shared_write_errors: self.shared_write_errors.load(Ordering::Relaxed),
        }
    }
}
