//! Executes invalidation plans against the query cache.

use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, info, instrument};

use super::planner::InvalidationPlan;
use super::store::QueryCache;

const METRIC_CACHE_INVALIDATED: &str = "mangasync_cache_invalidated_total";
const METRIC_CACHE_EVICTED: &str = "mangasync_cache_evicted_total";
const METRIC_CACHE_APPLY_MS: &str = "mangasync_cache_apply_ms";

/// What applying a plan changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Entries that flipped from fresh to stale.
    pub invalidated: usize,
    /// Entries removed.
    pub evicted: usize,
    /// In-flight fetches cancelled ahead of eviction.
    pub cancelled: usize,
}

/// Applies plans to one cache handle.
#[derive(Clone)]
pub struct CacheConsumer {
    cache: QueryCache,
}

impl CacheConsumer {
    pub fn new(cache: QueryCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Apply `plan`: invalidations, then the global flush, then evictions.
    ///
    /// Notices are left to the caller; the cache has no notification channel.
    #[instrument(skip(self, plan), fields(plan = %plan))]
    pub fn apply(&self, plan: &InvalidationPlan) -> ApplyReport {
        let started_at = Instant::now();
        let mut report = ApplyReport::default();

        if plan.is_empty() {
            debug!("Nothing to apply");
            return report;
        }

        for key in plan.invalidations() {
            report.invalidated += self.cache.invalidate(key);
        }

        if plan.is_global() {
            report.invalidated += self.cache.invalidate_all();
        }

        for key in plan.evictions() {
            report.cancelled += self.cache.cancel_fetches(key);
            report.evicted += self.cache.evict(key);
        }

        counter!(METRIC_CACHE_INVALIDATED).increment(report.invalidated as u64);
        counter!(METRIC_CACHE_EVICTED).increment(report.evicted as u64);
        histogram!(METRIC_CACHE_APPLY_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        info!(
            invalidated = report.invalidated,
            evicted = report.evicted,
            cancelled = report.cancelled,
            global = plan.is_global(),
            "Invalidation plan applied"
        );

        report
    }
}
