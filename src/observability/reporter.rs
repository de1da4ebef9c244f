//! Revision-scoped request statistics.
//!
//! # Responsibilities
//! - Record request concurrency, request count and latency per revision
//! - Tag each measurement with the revision identity and response code class
//!
//! # Design Decisions
//! - Reporting goes through the `metrics` facade; whichever recorder is
//!   installed (Prometheus in production, none in tests) receives it
//! - An empty service name is reported as `unknown`

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Container name attached to every measurement.
pub const CONTAINER_NAME: &str = "queue-proxy";

const VALUE_UNKNOWN: &str = "unknown";

/// Identity of the revision this sidecar fronts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RevisionLabels {
    pub namespace: String,
    /// May be empty for revisions not owned by a service.
    pub service: String,
    pub configuration: String,
    pub revision: String,
    pub pod: String,
}

/// Sink for per-request statistics.
pub trait StatsReporter: Send + Sync {
    /// Record the current request concurrency.
    fn report_request_concurrency(&self, labels: &RevisionLabels, value: f64);

    /// Count one completed request.
    fn report_request_count(&self, labels: &RevisionLabels, response_code: u16, num_tries: u32);

    /// Record how long a request took.
    fn report_response_time(&self, labels: &RevisionLabels, response_code: u16, duration: Duration);
}

/// [`StatsReporter`] backed by the `metrics` facade.
#[derive(Debug, Default, Clone)]
pub struct PrometheusStatsReporter;

impl PrometheusStatsReporter {
    pub fn new() -> Self {
        Self
    }
}

fn value_or_unknown(value: &str) -> String {
    if value.is_empty() {
        VALUE_UNKNOWN.to_string()
    } else {
        value.to_string()
    }
}

/// Class of a response code, e.g. `5xx` for 503.
pub fn response_code_class(response_code: u16) -> String {
    format!("{}xx", response_code / 100)
}

impl StatsReporter for PrometheusStatsReporter {
    fn report_request_concurrency(&self, labels: &RevisionLabels, value: f64) {
        metrics::gauge!(
            "request_concurrency",
            "namespace_name" => labels.namespace.clone(),
            "service_name" => value_or_unknown(&labels.service),
            "configuration_name" => labels.configuration.clone(),
            "revision_name" => labels.revision.clone(),
            "pod_name" => labels.pod.clone(),
            "container_name" => CONTAINER_NAME
        )
        .set(value);
    }

    fn report_request_count(&self, labels: &RevisionLabels, response_code: u16, num_tries: u32) {
        metrics::counter!(
            "request_count",
            "namespace_name" => labels.namespace.clone(),
            "service_name" => value_or_unknown(&labels.service),
            "configuration_name" => labels.configuration.clone(),
            "revision_name" => labels.revision.clone(),
            "pod_name" => labels.pod.clone(),
            "container_name" => CONTAINER_NAME,
            "response_code" => response_code.to_string(),
            "response_code_class" => response_code_class(response_code),
            "num_tries" => num_tries.to_string()
        )
        .increment(1);
    }

    fn report_response_time(&self, labels: &RevisionLabels, response_code: u16, duration: Duration) {
        metrics::histogram!(
            "request_latencies",
            "namespace_name" => labels.namespace.clone(),
            "service_name" => value_or_unknown(&labels.service),
            "configuration_name" => labels.configuration.clone(),
            "revision_name" => labels.revision.clone(),
            "pod_name" => labels.pod.clone(),
            "container_name" => CONTAINER_NAME,
            "response_code" => response_code.to_string(),
            "response_code_class" => response_code_class(response_code)
        )
        .record(duration.as_secs_f64() * 1000.0);
    }
}
