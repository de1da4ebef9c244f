//! Queue sidecar library.
//!
//! A per-pod proxy that sits in front of a single user container, bounds the
//! number of requests it executes concurrently, answers platform probes from
//! the container's readiness, and reports concurrency for autoscaling.

pub mod admin;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod queue;

pub use config::schema::SidecarConfig;
pub use http::SidecarServer;
pub use lifecycle::Shutdown;
