//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Detect the sidecar proxying to itself
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SidecarConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use crate::config::schema::SidecarConfig;
use crate::queue::Breaker;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("user_container.health_path must start with '/', got {0:?}")]
    RelativeHealthPath(String),

    #[error("{field} must not exceed {max}")]
    TooLarge { field: &'static str, max: usize },

    #[error("listener port {0} is the user container port")]
    PortConflict(u16),
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &SidecarConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    match config.listener.bind_address.parse::<SocketAddr>() {
        Ok(addr) if addr.port() != 0 && addr.port() == config.user_container.port => {
            errors.push(ValidationError::PortConflict(addr.port()));
        }
        Ok(_) => {}
        Err(_) => errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        }),
    }

    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                field: "admin.bind_address",
                value: config.admin.bind_address.clone(),
            });
        }
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::Empty("admin.api_key"));
        }
    }

    if config.user_container.port == 0 {
        errors.push(ValidationError::MustBePositive("user_container.port"));
    }
    if !config.user_container.health_path.starts_with('/') {
        errors.push(ValidationError::RelativeHealthPath(
            config.user_container.health_path.clone(),
        ));
    }

    let breaker = &config.breaker;
    if breaker.max_concurrency > 0 && breaker.queue_depth_factor == 0 {
        errors.push(ValidationError::MustBePositive("breaker.queue_depth_factor"));
    }
    if breaker.max_concurrency > Breaker::MAX_SIZE {
        errors.push(ValidationError::TooLarge {
            field: "breaker.max_concurrency",
            max: Breaker::MAX_SIZE,
        });
    } else if breaker
        .queue_depth_factor
        .checked_mul(breaker.max_concurrency)
        .map_or(true, |size| size > Breaker::MAX_SIZE)
    {
        errors.push(ValidationError::TooLarge {
            field: "breaker.queue_depth_factor * breaker.max_concurrency",
            max: Breaker::MAX_SIZE,
        });
    }

    if config.events.buffer_size == 0 {
        errors.push(ValidationError::MustBePositive("events.buffer_size"));
    }
    if config.events.report_period_ms == 0 {
        errors.push(ValidationError::MustBePositive("events.report_period_ms"));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::MustBePositive("timeouts.request_secs"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if config.var_log.enabled {
        let var_log = &config.var_log;
        let required = [
            ("var_log.user_container_name", &var_log.user_container_name),
            ("var_log.volume_name", &var_log.volume_name),
            ("var_log.internal_volume_path", &var_log.internal_volume_path),
            ("revision.namespace", &config.revision.namespace),
            ("revision.pod", &config.revision.pod),
        ];
        for (field, value) in required {
            if value.is_empty() {
                errors.push(ValidationError::Empty(field));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
