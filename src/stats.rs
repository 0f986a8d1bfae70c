//! Cache statistics
//!
//! When statistics are enabled every cache owns a [`StatsCounter`]: a handful
//! of cache-padded atomic counters bumped by client threads and by the
//! maintenance pass. [`Cache::stats`](crate::Cache::stats) returns an immutable
//! [`CacheStats`] snapshot of those counters.
//!
//! Snapshots can be subtracted from one another to measure an interval, and
//! converted into a `BTreeMap` so that reports always list metrics in the same
//! order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_utils::CachePadded;

/// A point-in-time snapshot of cache statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found a live entry.
    pub hit_count: u64,

    /// Lookups that found nothing, or only an expired or collected entry.
    pub miss_count: u64,

    /// Loader invocations that produced a value.
    pub load_success_count: u64,

    /// Loader invocations that failed.
    pub load_failure_count: u64,

    /// Time spent in loaders, successful or not.
    pub total_load_time: Duration,

    /// Entries removed by the cache itself: over the maximum, expired, or
    /// reclaimed. Explicit removals and replacements are not counted.
    pub eviction_count: u64,

    /// Total weight of the entries counted in `eviction_count`.
    pub eviction_weight: u64,
}

impl CacheStats {
    /// Total number of lookups.
    pub fn request_count(&self) -> u64 {
        self.hit_count.saturating_add(self.miss_count)
    }

    /// Ratio of lookups that hit, or 1.0 when there were none.
    pub fn hit_rate(&self) -> f64 {
        let requests = self.request_count();
        if requests == 0 {
            1.0
        } else {
            self.hit_count as f64 / requests as f64
        }
    }

    /// Ratio of lookups that missed, or 0.0 when there were none.
    pub fn miss_rate(&self) -> f64 {
        let requests = self.request_count();
        if requests == 0 {
            0.0
        } else {
            self.miss_count as f64 / requests as f64
        }
    }

    /// Total number of loader invocations.
    pub fn load_count(&self) -> u64 {
        self.load_success_count
            .saturating_add(self.load_failure_count)
    }

    /// Ratio of loads that failed, or 0.0 when there were none.
    pub fn load_failure_rate(&self) -> f64 {
        let loads = self.load_count();
        if loads == 0 {
            0.0
        } else {
            self.load_failure_count as f64 / loads as f64
        }
    }

    /// Mean time spent per load.
    pub fn average_load_penalty(&self) -> Duration {
        let loads = self.load_count();
        if loads == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_load_time.as_nanos() / u128::from(loads);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Difference between this snapshot and an earlier one, floored at zero.
    pub fn minus(&self, other: &CacheStats) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.saturating_sub(other.hit_count),
            miss_count: self.miss_count.saturating_sub(other.miss_count),
            load_success_count: self
                .load_success_count
                .saturating_sub(other.load_success_count),
            load_failure_count: self
                .load_failure_count
                .saturating_sub(other.load_failure_count),
            total_load_time: self.total_load_time.saturating_sub(other.total_load_time),
            eviction_count: self.eviction_count.saturating_sub(other.eviction_count),
            eviction_weight: self.eviction_weight.saturating_sub(other.eviction_weight),
        }
    }

    /// Converts the snapshot to a map with a stable key order for reporting.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();

        metrics.insert("eviction_count".to_string(), self.eviction_count as f64);
        metrics.insert("eviction_weight".to_string(), self.eviction_weight as f64);
        metrics.insert("hit_count".to_string(), self.hit_count as f64);
        metrics.insert("load_failure_count".to_string(), self.load_failure_count as f64);
        metrics.insert("load_success_count".to_string(), self.load_success_count as f64);
        metrics.insert("miss_count".to_string(), self.miss_count as f64);
        metrics.insert("requests".to_string(), self.request_count() as f64);
        metrics.insert(
            "total_load_time_ns".to_string(),
            self.total_load_time.as_nanos() as f64,
        );

        // Calculated rates
        metrics.insert("hit_rate".to_string(), self.hit_rate());
        metrics.insert("miss_rate".to_string(), self.miss_rate());

        metrics
    }
}

/// Concurrent accumulator behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounter {
    hits: CachePadded<AtomicU64>,
    misses: CachePadded<AtomicU64>,
    load_success: AtomicU64,
    load_failure: AtomicU64,
    load_time: AtomicU64,
    evictions: AtomicU64,
    eviction_weight: AtomicU64,
}

impl StatsCounter {
    pub(crate) fn record_hits(&self, count: u64) {
        self.hits.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_misses(&self, count: u64) {
        self.misses.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_load_success(&self, elapsed: Duration) {
        self.load_success.fetch_add(1, Ordering::Relaxed);
        self.add_load_time(elapsed);
    }

    pub(crate) fn record_load_failure(&self, elapsed: Duration) {
        self.load_failure.fetch_add(1, Ordering::Relaxed);
        self.add_load_time(elapsed);
    }

    fn add_load_time(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.load_time.fetch_add(nanos, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self, weight: u32) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.eviction_weight
            .fetch_add(u64::from(weight), Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            load_success_count: self.load_success.load(Ordering::Relaxed),
            load_failure_count: self.load_failure.load(Ordering::Relaxed),
            total_load_time: Duration::from_nanos(self.load_time.load(Ordering::Relaxed)),
            eviction_count: self.evictions.load(Ordering::Relaxed),
            eviction_weight: self.eviction_weight.load(Ordering::Relaxed),
        }
    }
}
