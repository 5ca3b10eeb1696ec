//! Process-wide request counters.
//!
//! Mutated exclusively through atomic adds so the hot path never takes a
//! lock. Reset administratively by `POST /cache/clear`.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Estimated upstream cost of one uncached chat completion, used by the
/// dashboard to derive savings.
pub const COST_PER_REQUEST: f64 = 0.002;

#[derive(Debug)]
pub struct Stats {
    total_requests: AtomicI64,
    cache_hits: AtomicI64,
    cache_misses: AtomicI64,
    errors: AtomicI64,
    total_latency_ms: AtomicI64,
    start_time_unix: AtomicI64,
}

/// Point-in-time view of the counters, in the `/stats/json` wire shape.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: i64,
    pub cache_hits: i64,
    pub cache_misses: i64,
    pub errors: i64,
    pub total_latency_ms: i64,
    pub start_time: DateTime<Utc>,
    pub cost_per_request: f64,
}

impl StatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / self.total_requests as f64 * 100.0
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.total_latency_ms as f64 / self.total_requests as f64
    }

    pub fn cost_saved(&self) -> f64 {
        self.cache_hits as f64 * self.cost_per_request
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicI64::new(0),
            cache_hits: AtomicI64::new(0),
            cache_misses: AtomicI64::new(0),
            errors: AtomicI64::new(0),
            total_latency_ms: AtomicI64::new(0),
            start_time_unix: AtomicI64::new(Utc::now().timestamp()),
        }
    }

    pub fn record_hit(&self, latency_ms: i64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn record_miss(&self, latency_ms: i64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.total_latency_ms.store(0, Ordering::Relaxed);
        self.start_time_unix
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let start_unix = self.start_time_unix.load(Ordering::Relaxed);
        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
            start_time: DateTime::from_timestamp(start_unix, 0).unwrap_or_else(Utc::now),
            cost_per_request: COST_PER_REQUEST,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}
