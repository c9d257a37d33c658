//! Process-wide counters (ambient concern A4), exposed in Prometheus text
//! format. Mirrors the teacher's original `Metrics` struct and
//! `lazy_static` global, extended with single-flight coalescing and
//! pre-cache progress counters the new pipeline needs.

use std::sync::atomic::{AtomicU64, Ordering};

use axum::{http::StatusCode, response::IntoResponse};

pub struct Metrics {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub coalesced_waits: AtomicU64,
    pub transforms: AtomicU64,
    pub errors: AtomicU64,
    pub precache_processed: AtomicU64,
    pub precache_skipped: AtomicU64,
    pub precache_errors: AtomicU64,
}

impl Metrics {
    fn new() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            coalesced_waits: AtomicU64::new(0),
            transforms: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            precache_processed: AtomicU64::new(0),
            precache_skipped: AtomicU64::new(0),
            precache_errors: AtomicU64::new(0),
        }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced_wait(&self) {
        self.coalesced_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transform(&self) {
        self.transforms.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_precache_processed(&self) {
        self.precache_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_precache_skipped(&self) {
        self.precache_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_precache_error(&self) {
        self.precache_errors.fetch_add(1, Ordering::Relaxed);
    }
}

lazy_static::lazy_static! {
    pub static ref METRICS: Metrics = Metrics::new();
}

pub async fn metrics_handler() -> impl IntoResponse {
    let body = format!(
        "# HELP imgserve_cache_hits_total Total number of cache hits\n\
         # TYPE imgserve_cache_hits_total counter\n\
         imgserve_cache_hits_total {}\n\
         # HELP imgserve_cache_misses_total Total number of cache misses\n\
         # TYPE imgserve_cache_misses_total counter\n\
         imgserve_cache_misses_total {}\n\
         # HELP imgserve_coalesced_waits_total Total number of requests that joined an in-flight transform\n\
         # TYPE imgserve_coalesced_waits_total counter\n\
         imgserve_coalesced_waits_total {}\n\
         # HELP imgserve_transforms_total Total number of image transformations run\n\
         # TYPE imgserve_transforms_total counter\n\
         imgserve_transforms_total {}\n\
         # HELP imgserve_errors_total Total number of request errors\n\
         # TYPE imgserve_errors_total counter\n\
         imgserve_errors_total {}\n\
         # HELP imgserve_precache_processed_total Pre-cache entries successfully warmed\n\
         # TYPE imgserve_precache_processed_total counter\n\
         imgserve_precache_processed_total {}\n\
         # HELP imgserve_precache_skipped_total Pre-cache entries already warm\n\
         # TYPE imgserve_precache_skipped_total counter\n\
         imgserve_precache_skipped_total {}\n\
         # HELP imgserve_precache_errors_total Pre-cache entries that failed to warm\n\
         # TYPE imgserve_precache_errors_total counter\n\
         imgserve_precache_errors_total {}\n",
        METRICS.cache_hits.load(Ordering::Relaxed),
        METRICS.cache_misses.load(Ordering::Relaxed),
        METRICS.coalesced_waits.load(Ordering::Relaxed),
        METRICS.transforms.load(Ordering::Relaxed),
        METRICS.errors.load(Ordering::Relaxed),
        METRICS.precache_processed.load(Ordering::Relaxed),
        METRICS.precache_skipped.load(Ordering::Relaxed),
        METRICS.precache_errors.load(Ordering::Relaxed),
    );

    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let m = Metrics::new();
        assert_eq!(m.cache_hits.load(Ordering::Relaxed), 0);
        m.record_cache_hit();
        assert_eq!(m.cache_hits.load(Ordering::Relaxed), 1);
    }
}
