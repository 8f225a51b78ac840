//! Prometheus metrics for the screening engine

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, register_int_counter, CounterVec, Histogram,
    HistogramVec, IntCounter,
};

lazy_static! {
    /// Screening calls by outcome (completed, partial_failure, failed, cached, error, timeout)
    pub static ref SCREENING_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "screening_requests_total",
        "Total screening requests",
        &["outcome"]
    )
    .unwrap();

    /// End-to-end screen() latency
    pub static ref SCREENING_DURATION: Histogram = register_histogram!(
        "screening_duration_seconds",
        "Screening duration in seconds"
    )
    .unwrap();

    /// Result cache lookups (hit, miss, joined)
    pub static ref SCREENING_CACHE_TOTAL: CounterVec = register_counter_vec!(
        "screening_cache_total",
        "Result cache lookups",
        &["result"]
    )
    .unwrap();

    /// Adapter invocations by source and status
    pub static ref SOURCE_FETCH_TOTAL: CounterVec = register_counter_vec!(
        "screening_source_fetch_total",
        "Source adapter fetches",
        &["source_id", "status"]
    )
    .unwrap();

    /// Adapter fetch latency
    pub static ref SOURCE_FETCH_DURATION: HistogramVec = register_histogram_vec!(
        "screening_source_fetch_duration_seconds",
        "Source fetch duration in seconds",
        &["source_id"]
    )
    .unwrap();

    /// High-risk alerts published
    pub static ref SCREENING_ALERTS_TOTAL: IntCounter = register_int_counter!(
        "screening_alerts_total",
        "High-risk alerts published"
    )
    .unwrap();
}

pub fn record_request(outcome: &str) {
    SCREENING_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_cache(result: &str) {
    SCREENING_CACHE_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_source_fetch(source_id: &str, status: &str, seconds: f64) {
    SOURCE_FETCH_TOTAL.with_label_values(&[source_id, status]).inc();
    SOURCE_FETCH_DURATION.with_label_values(&[source_id]).observe(seconds);
}
