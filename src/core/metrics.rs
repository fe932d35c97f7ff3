// src/core/metrics.rs

//! Defines and registers Prometheus metrics for daemon monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only
//! once globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, TextEncoder, register_counter,
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
};

lazy_static! {
    // --- Pipeline counters ---
    /// The total number of raw records received by the coordinator.
    pub static ref RECORDS_RECEIVED_TOTAL: Counter =
        register_counter!("gatherd_records_received_total", "Total raw records received by the coordinator.").unwrap();
    /// The total number of records successfully parsed.
    pub static ref RECORDS_PARSED_TOTAL: Counter =
        register_counter!("gatherd_records_parsed_total", "Total records successfully parsed.").unwrap();
    /// The total number of records dropped, labeled by reason.
    pub static ref RECORDS_DROPPED_TOTAL: CounterVec =
        register_counter_vec!("gatherd_records_dropped_total", "Total records dropped, labeled by reason.", &["reason"]).unwrap();

    // --- Source counters ---
    /// The total number of fetches issued, labeled by driver.
    pub static ref FETCHES_TOTAL: CounterVec =
        register_counter_vec!("gatherd_fetches_total", "Total fetches issued, labeled by driver.", &["driver"]).unwrap();
    /// The total number of failed fetches, labeled by driver.
    pub static ref FETCH_ERRORS_TOTAL: CounterVec =
        register_counter_vec!("gatherd_fetch_errors_total", "Total failed fetches, labeled by driver.", &["driver"]).unwrap();

    // --- Storage counters and gauges ---
    /// Records accepted by a sink, labeled by sink name.
    pub static ref STORE_ENQUEUED_TOTAL: CounterVec =
        register_counter_vec!("gatherd_store_enqueued_total", "Records accepted by a storage sink.", &["storage"]).unwrap();
    /// Records a sink confirmed as stored, labeled by sink name.
    pub static ref STORE_OK_TOTAL: CounterVec =
        register_counter_vec!("gatherd_store_ok_total", "Records successfully stored.", &["storage"]).unwrap();
    /// Records a sink failed to store, labeled by sink name.
    pub static ref STORE_ERR_TOTAL: CounterVec =
        register_counter_vec!("gatherd_store_err_total", "Records that failed to store.", &["storage"]).unwrap();
    /// The current queue depth of each sink.
    pub static ref STORE_QUEUE_DEPTH: GaugeVec =
        register_gauge_vec!("gatherd_store_queue_depth", "Current queue depth per storage sink.", &["storage"]).unwrap();

    // --- Resolver ---
    /// The number of entries currently in the host cache.
    pub static ref HOST_CACHE_ENTRIES: Gauge =
        register_gauge!("gatherd_host_cache_entries", "Number of entries in the host cache.").unwrap();

    // --- Histograms ---
    /// A histogram of fetch latencies.
    pub static ref FETCH_LATENCY_SECONDS: Histogram =
        register_histogram!("gatherd_fetch_latency_seconds", "Latency of source fetches in seconds.").unwrap();
    /// A histogram of parse latencies.
    pub static ref PARSE_LATENCY_SECONDS: Histogram =
        register_histogram!("gatherd_parse_latency_seconds", "Latency of parsing in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
