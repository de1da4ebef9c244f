//! User container health subsystem.
//!
//! # Data Flow
//! ```text
//! Sidecar startup
//!     → prober.rs (poll 127.0.0.1:<port><path> until 200 or deadline)
//!     → readiness.rs (flip the readiness cell once)
//!     → request handler / admin API read it through ReadinessReader
//! ```

pub mod prober;
pub mod readiness;

pub use prober::{probe_health, HealthProber, ProbeError, ReadinessProber};
pub use readiness::{ProbeFn, ReadinessReader, ReadinessState};
