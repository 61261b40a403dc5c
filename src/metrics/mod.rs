//! Prometheus metrics for the work queue:
//! - item counters (enqueued, completed, reclaimed)
//! - failure counters (malformed records, ack failures)
//! - delivery latency from enqueue to completion

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, Encoder, Histogram, IntCounter, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "streamq";

lazy_static! {
    /// Total work items appended to the log
    pub static ref ITEMS_ENQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_items_enqueued_total", METRIC_PREFIX),
        "Total work items appended to the log"
    ).unwrap();

    /// Total work items completed (delivered and acknowledged)
    pub static ref ITEMS_COMPLETED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_items_completed_total", METRIC_PREFIX),
        "Total work items delivered and acknowledged"
    ).unwrap();

    /// Total stalled entries recovered through the reclaim path
    pub static ref ITEMS_RECLAIMED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_items_reclaimed_total", METRIC_PREFIX),
        "Total stalled entries recovered from other consumers"
    ).unwrap();

    /// Total records that failed to decode
    pub static ref MALFORMED_RECORDS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_malformed_records_total", METRIC_PREFIX),
        "Total records rejected by the codec"
    ).unwrap();

    /// Total acknowledgment failures after successful processing
    pub static ref ACK_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_ack_failures_total", METRIC_PREFIX),
        "Total acknowledgment failures after processing"
    ).unwrap();

    /// Enqueue-to-completion latency
    pub static ref DELIVERY_LATENCY_SECONDS: Histogram = register_histogram!(
        format!("{}_delivery_latency_seconds", METRIC_PREFIX),
        "Time from enqueue to completion in seconds",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]
    ).unwrap();
}

/// Render all registered metrics in the Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_register_and_increment() {
        // Counters are process-global and shared with concurrently running
        // tests, so only monotonicity is asserted.
        let before = ITEMS_ENQUEUED_TOTAL.get();
        ITEMS_ENQUEUED_TOTAL.inc();
        assert!(ITEMS_ENQUEUED_TOTAL.get() >= before + 1);
    }

    #[test]
    fn test_encode_metrics_includes_prefix() {
        ITEMS_COMPLETED_TOTAL.inc();
        let rendered = encode_metrics().unwrap();
        assert!(rendered.contains("streamq_items_completed_total"));
    }
}
