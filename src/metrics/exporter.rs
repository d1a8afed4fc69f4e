use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

use crate::core::{ErrorContext, FetchResult};

const DEFAULT_BUCKETS: &[f64] = &[
    1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0, 30000.0,
    60000.0,
];

// Network calls actually issued, by outcome
pub(crate) static DISPATCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pingfetch_dispatches_total",
        "Number of requests dispatched to the transport",
        &["outcome"]
    )
    .expect("pingfetch_dispatches_total registration")
});

// Calls answered from a valid cache entry
pub(crate) static CACHE_HITS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pingfetch_cache_hits_total",
        "Number of calls served from the response cache"
    )
    .expect("pingfetch_cache_hits_total registration")
});

// Calls that joined an in-flight dispatch
pub(crate) static COALESCED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pingfetch_coalesced_total",
        "Number of calls coalesced onto an in-flight request"
    )
    .expect("pingfetch_coalesced_total registration")
});

pub(crate) static BATCH_FLUSHES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "pingfetch_batch_flushes_total",
        "Number of batch windows flushed"
    )
    .expect("pingfetch_batch_flushes_total registration")
});

pub(crate) static BATCH_ITEMS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "pingfetch_batch_items_total",
        "Number of batch items settled, by outcome",
        &["outcome"]
    )
    .expect("pingfetch_batch_items_total registration")
});

// Histogram for operation latency
static LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "pingfetch_operation_latency",
        "Operation latency in milliseconds per operation key",
    )
    .buckets(DEFAULT_BUCKETS.to_vec());
    register_histogram_vec!(opts, &["operation"]).expect("pingfetch_operation_latency registration")
});

pub(crate) fn observe_latency(operation: &str, elapsed: Duration) {
    LATENCY
        .with_label_values(&[operation])
        .observe(elapsed.as_secs_f64() * 1000.0);
}

pub(crate) fn outcome<T, E>(result: &Result<T, E>) -> &'static str {
    if result.is_ok() {
        "success"
    } else {
        "failure"
    }
}

/// Render every registered metric in the Prometheus text format.
pub fn gather() -> FetchResult<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .with_context("Unable to encode metrics")?;
    String::from_utf8(buffer).with_context("Metrics are not valid utf-8")
}
