//! Prometheus metrics for poews.
//!
//! Covers the three places where messages can be lost or delayed:
//! - Hub intake (enqueued / dropped on overload)
//! - Fan-out (per-connection deliveries and failures)
//! - File polling (trade lines extracted, failed ticks)
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, which is a programming error that should
//! crash at first use rather than silently lose metrics.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Currently registered WebSocket clients.
pub static CLIENTS_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "poews_clients_connected",
        "Number of clients currently registered with the hub"
    )
    .unwrap()
});

/// Messages accepted onto the intake queue.
pub static MESSAGES_ENQUEUED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "poews_messages_enqueued_total",
        "Total messages accepted onto the hub intake queue"
    )
    .unwrap()
});

/// Messages refused by the intake queue.
/// Labels: reason (full/closed)
pub static MESSAGES_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "poews_messages_dropped_total",
        "Total messages dropped before fan-out",
        &["reason"]
    )
    .unwrap()
});

/// Successful per-connection writes.
pub static DELIVERIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "poews_deliveries_total",
        "Total successful per-connection message writes"
    )
    .unwrap()
});

/// Failed per-connection writes (the connection is evicted).
/// Labels: reason (send/timeout)
pub static DELIVERY_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "poews_delivery_failures_total",
        "Total per-connection write failures",
        &["reason"]
    )
    .unwrap()
});

/// Trade lines extracted from the watched file.
pub static TRADE_LINES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "poews_trade_lines_total",
        "Total trade messages extracted from the watched file"
    )
    .unwrap()
});

/// Poll ticks skipped because the file could not be read.
pub static POLL_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "poews_poll_errors_total",
        "Total poll ticks skipped due to I/O errors"
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Force registration so every series shows up in the first scrape.
    pub fn init() {
        Lazy::force(&CLIENTS_CONNECTED);
        Lazy::force(&MESSAGES_ENQUEUED_TOTAL);
        Lazy::force(&MESSAGES_DROPPED_TOTAL);
        Lazy::force(&DELIVERIES_TOTAL);
        Lazy::force(&DELIVERY_FAILURES_TOTAL);
        Lazy::force(&TRADE_LINES_TOTAL);
        Lazy::force(&POLL_ERRORS_TOTAL);
    }

    pub fn clients_connected(count: usize) {
        CLIENTS_CONNECTED.set(count as i64);
    }

    pub fn message_enqueued() {
        MESSAGES_ENQUEUED_TOTAL.inc();
    }

    pub fn message_dropped(reason: &str) {
        MESSAGES_DROPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn delivery_succeeded() {
        DELIVERIES_TOTAL.inc();
    }

    pub fn delivery_failed(reason: &str) {
        DELIVERY_FAILURES_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn trade_lines(count: usize) {
        TRADE_LINES_TOTAL.inc_by(count as u64);
    }

    pub fn poll_error() {
        POLL_ERRORS_TOTAL.inc();
    }

    /// Render all registered metrics in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
