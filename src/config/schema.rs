//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the sidecar.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::observability::reporter::RevisionLabels;
use crate::queue::BreakerParams;

/// Root configuration for the sidecar.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SidecarConfig {
    /// Public listener that fronts the user container.
    pub listener: ListenerConfig,

    /// Admin API.
    pub admin: AdminConfig,

    /// The user container being fronted.
    pub user_container: UserContainerConfig,

    /// Admission control.
    pub breaker: BreakerConfig,

    /// Startup readiness probing.
    pub readiness: ReadinessConfig,

    /// Concurrency event channel and aggregation.
    pub events: EventsConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Revision identity used to label metrics.
    pub revision: RevisionLabels,

    /// Log volume link for log aggregation.
    pub var_log: VarLogConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8012").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8012".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8022".to_string(),
        }
    }
}

/// The user container's local endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UserContainerConfig {
    /// Port the user container listens on, on 127.0.0.1.
    pub port: u16,

    /// Health path polled by the readiness prober.
    pub health_path: String,
}

impl Default for UserContainerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            health_path: "/health".to_string(),
        }
    }
}

/// Admission control configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Waiting room size as a multiple of `max_concurrency`.
    pub queue_depth_factor: usize,

    /// Hard cap on concurrent requests. 0 disables admission control.
    pub max_concurrency: usize,

    /// Capacity at startup; defaults to `max_concurrency`.
    pub initial_capacity: Option<usize>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            queue_depth_factor: 10,
            max_concurrency: 100,
            initial_capacity: None,
        }
    }
}

impl BreakerConfig {
    /// Breaker parameters, or `None` when admission control is disabled.
    pub fn params(&self) -> Option<BreakerParams> {
        if self.max_concurrency == 0 {
            return None;
        }
        Some(BreakerParams {
            queue_depth_factor: self.queue_depth_factor,
            max_concurrency: self.max_concurrency,
            initial_capacity: self.initial_capacity.unwrap_or(self.max_concurrency),
        })
    }
}

/// Readiness probing configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Overall probe deadline in seconds. 0 waits indefinitely.
    pub timeout_secs: u64,
}

/// Event channel configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Undelivered events buffered before new ones are dropped.
    pub buffer_size: usize,

    /// Aggregation window in milliseconds.
    pub report_period_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            report_period_ms: 1000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response, including time
    /// spent queued) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 300 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9091".to_string(),
        }
    }
}

/// Symlink exposing the user container's log volume to the log collector.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct VarLogConfig {
    /// Create the link at startup.
    pub enabled: bool,

    /// Name of the user container.
    pub user_container_name: String,

    /// Name of the volume holding the user container's logs.
    pub volume_name: String,

    /// Directory in which the link is created.
    pub internal_volume_path: String,
}
