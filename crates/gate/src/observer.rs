//! Observability hooks.
//!
//! The service reports cache lookups, request outcomes and generation
//! durations through the [`Observer`] trait. [`GateMetrics`] is the
//! in-process implementation: lock-free counters plus a fixed-bucket
//! duration histogram, read back as a [`MetricsSnapshot`]. Exporting the
//! snapshot (Prometheus, OTLP, ...) is left to the embedding process.
//!
//! All counters use `Ordering::Relaxed`; each is independent and a snapshot
//! only needs per-counter atomicity.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use admission_cache::CacheTier;
use serde::Serialize;

use crate::{endpoint::Endpoint, error::StatusCategory};

/// Upper bounds (inclusive, seconds) of the duration histogram buckets.
/// A final `+Inf` bucket catches the rest.
pub const DURATION_BUCKETS_SECS: [f64; 10] = [0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 120.0];

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestOutcome {
    /// Served.
    Success,
    /// Refused or failed, with the error's category.
    Error(StatusCategory),
}

impl RequestOutcome {
    /// Stable label for the outcome.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error(StatusCategory::BadRequest) => "bad_request",
            Self::Error(StatusCategory::Unauthorized) => "unauthorized",
            Self::Error(StatusCategory::Forbidden) => "forbidden",
            Self::Error(StatusCategory::TooManyRequests) => "quota_exceeded",
            Self::Error(StatusCategory::InternalError) => "error",
            Self::Error(StatusCategory::ServiceUnavailable) => "unavailable",
        }
    }
}

/// Receives service events. Every method defaults to a no-op.
pub trait Observer: Send + Sync {
    /// A cache lookup finished; `tier` is `None` for a miss.
    fn on_cache_lookup(&self, tier: Option<CacheTier>) {
        let _ = tier;
    }

    /// A request to `endpoint` finished.
    fn on_request(&self, endpoint: Endpoint, outcome: RequestOutcome, elapsed: Duration) {
        let _ = (endpoint, outcome, elapsed);
    }

    /// Current metrics, if this observer keeps any.
    fn snapshot(&self) -> Option<MetricsSnapshot> {
        None
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

const OUTCOMES: [RequestOutcome; 7] = [
    RequestOutcome::Success,
    RequestOutcome::Error(StatusCategory::BadRequest),
    RequestOutcome::Error(StatusCategory::Unauthorized),
    RequestOutcome::Error(StatusCategory::Forbidden),
    RequestOutcome::Error(StatusCategory::TooManyRequests),
    RequestOutcome::Error(StatusCategory::InternalError),
    RequestOutcome::Error(StatusCategory::ServiceUnavailable),
];

fn outcome_index(outcome: RequestOutcome) -> usize {
    OUTCOMES.iter().position(|o| *o == outcome).unwrap_or(0)
}

fn endpoint_index(endpoint: Endpoint) -> usize {
    Endpoint::ALL.iter().position(|e| *e == endpoint).unwrap_or(0)
}

/// Fixed-bucket duration histogram.
#[derive(Debug)]
struct DurationHistogram {
    // One slot per bound plus the +Inf bucket; counts are per bucket, not
    // cumulative.
    buckets: [AtomicU64; DURATION_BUCKETS_SECS.len() + 1],
    count: AtomicU64,
    sum_us: AtomicU64,
}

impl DurationHistogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
        }
    }

    fn observe(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let slot = DURATION_BUCKETS_SECS
            .iter()
            .position(|bound| secs <= *bound)
            .unwrap_or(DURATION_BUCKETS_SECS.len());
        self.buckets[slot].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let mut cumulative = 0;
        let mut buckets = Vec::with_capacity(self.buckets.len());
        for (i, bucket) in self.buckets.iter().enumerate() {
            cumulative += bucket.load(Ordering::Relaxed);
            buckets.push(BucketCount { le: DURATION_BUCKETS_SECS.get(i).copied(), count: cumulative });
        }
        HistogramSnapshot {
            buckets,
            count: self.count.load(Ordering::Relaxed),
            sum_secs: self.sum_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// One cumulative histogram bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketCount {
    /// Inclusive upper bound in seconds; `None` for `+Inf`.
    pub le: Option<f64>,
    /// Observations at or below `le`.
    pub count: u64,
}

/// Histogram read back from [`GateMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistogramSnapshot {
    /// Cumulative buckets in ascending order, ending with `+Inf`.
    pub buckets: Vec<BucketCount>,
    /// Number of observations.
    pub count: u64,
    /// Sum of observations in seconds.
    pub sum_secs: f64,
}

/// Point-in-time copy of [`GateMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Lookups served from either cache tier.
    pub cache_hits: u64,
    /// Lookups served by neither tier.
    pub cache_misses: u64,
    /// Request counts keyed by endpoint, then outcome label. Zero counts are
    /// omitted.
    pub requests: BTreeMap<String, BTreeMap<String, u64>>,
    /// Request durations across all endpoints.
    pub request_duration: HistogramSnapshot,
}

impl MetricsSnapshot {
    /// Count for one endpoint and outcome.
    #[must_use]
    pub fn request_count(&self, endpoint: Endpoint, outcome: RequestOutcome) -> u64 {
        self.requests
            .get(endpoint.as_str())
            .and_then(|by_outcome| by_outcome.get(outcome.as_str()))
            .copied()
            .unwrap_or(0)
    }

    /// Cache hit rate (0.0 - 1.0).
    #[must_use]
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 { 0.0 } else { self.cache_hits as f64 / total as f64 }
    }
}

/// In-process [`Observer`] keeping counters and a duration histogram.
#[derive(Debug)]
pub struct GateMetrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    requests: [[AtomicU64; OUTCOMES.len()]; Endpoint::ALL.len()],
    request_duration: DurationHistogram,
}

impl Default for GateMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GateMetrics {
    /// Creates zeroed metrics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            requests: std::array::from_fn(|_| std::array::from_fn(|_| AtomicU64::new(0))),
            request_duration: DurationHistogram::new(),
        }
    }
}

impl Observer for GateMetrics {
    fn on_cache_lookup(&self, tier: Option<CacheTier>) {
        match tier {
            Some(_) => self.cache_hits.fetch_add(1, Ordering::Relaxed),
            None => self.cache_misses.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn on_request(&self, endpoint: Endpoint, outcome: RequestOutcome, elapsed: Duration) {
        self.requests[endpoint_index(endpoint)][outcome_index(outcome)]
            .fetch_add(1, Ordering::Relaxed);
        self.request_duration.observe(elapsed);
    }

    fn snapshot(&self) -> Option<MetricsSnapshot> {
        let mut requests = BTreeMap::new();
        for (endpoint, row) in Endpoint::ALL.iter().zip(&self.requests) {
            let by_outcome: BTreeMap<String, u64> = OUTCOMES
                .iter()
                .zip(row)
                .map(|(outcome, count)| (outcome.as_str().to_owned(), count.load(Ordering::Relaxed)))
                .filter(|(_, count)| *count > 0)
                .collect();
            if !by_outcome.is_empty() {
                requests.insert(endpoint.as_str().to_owned(), by_outcome);
            }
        }
        Some(MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            requests,
            request_duration: self.request_duration.snapshot(),
        })
    }
}
