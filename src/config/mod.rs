//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → SidecarConfig (validated, immutable)
//!     → CLI overrides applied in main
//!     → handed to SidecarServer
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; runtime capacity changes go through
//!   the admin API, not the file
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, BreakerConfig, EventsConfig, ListenerConfig, ObservabilityConfig,
    ReadinessConfig, SidecarConfig, TimeoutConfig, UserContainerConfig, VarLogConfig,
};
pub use validation::{validate_config, ValidationError};
