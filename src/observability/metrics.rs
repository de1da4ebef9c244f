//! Sidecar metrics and Prometheus exposition.
//!
//! # Metrics
//! - `sidecar_requests_total` (counter): handled requests by outcome and status
//! - `sidecar_request_duration_seconds` (histogram): handler latency
//! - `sidecar_breaker_pending` / `sidecar_breaker_in_flight` (gauges)
//! - `sidecar_breaker_capacity` (gauge)
//! - `sidecar_events_dropped_total` (counter): events lost to a full buffer
//! - `sidecar_container_ready` (gauge): 1 once the user container passed its probe

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

/// Bucket bounds for `request_latencies`, in milliseconds.
pub const LATENCY_BUCKETS_MS: [f64; 26] = [
    5.0, 10.0, 20.0, 40.0, 60.0, 80.0, 100.0, 150.0, 200.0, 250.0, 300.0, 350.0, 400.0, 450.0,
    500.0, 600.0, 700.0, 800.0, 900.0, 1000.0, 2000.0, 5000.0, 10000.0, 20000.0, 50000.0,
    100000.0,
];

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    let installed = builder().and_then(|b| b.with_http_listener(addr).install());
    match installed {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Exporter rendering `request_latencies` as a bucketed histogram.
fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("request_latencies".to_string()),
        &LATENCY_BUCKETS_MS,
    )
}

/// Record a handled request.
pub fn record_request(outcome: &'static str, status: u16, start: Instant) {
    metrics::counter!(
        "sidecar_requests_total",
        "outcome" => outcome,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("sidecar_request_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

/// Record breaker occupancy.
pub fn record_breaker(pending: usize, in_flight: usize, capacity: usize) {
    metrics::gauge!("sidecar_breaker_pending").set(pending as f64);
    metrics::gauge!("sidecar_breaker_in_flight").set(in_flight as f64);
    metrics::gauge!("sidecar_breaker_capacity").set(capacity as f64);
}

/// Count an event dropped because the consumer fell behind.
pub fn record_event_dropped() {
    metrics::counter!("sidecar_events_dropped_total").increment(1);
}

/// Record the user container's readiness.
pub fn record_container_ready(ready: bool) {
    metrics::gauge!("sidecar_container_ready").set(if ready { 1.0 } else { 0.0 });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_latencies_render_as_buckets() {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            metrics::histogram!("request_latencies", "response_code" => "200").record(42.0);
        });

        let rendered = handle.render();
        assert!(rendered.contains("request_latencies_bucket"), "{}", rendered);
        assert!(rendered.contains("le=\"60\""), "{}", rendered);
        assert!(rendered.contains("le=\"100000\""), "{}", rendered);
    }
}
