//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Init logging/metrics → varlog.rs link → Start server
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → shutdown.rs broadcast
//!
//! Shutdown:
//!     Stop accepting → Cancel queued requests → Drain in-flight → Exit
//! ```

pub mod shutdown;
pub mod signals;
pub mod varlog;

pub use shutdown::Shutdown;
pub use signals::{spawn_signal_handler, wait_for_signal};
pub use varlog::create_var_log_link;
