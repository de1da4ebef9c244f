//! Admission control and concurrency accounting.
//!
//! # Data Flow
//! ```text
//! Request handler
//!     → events.rs (RequestIn / ProxiedIn / ProxiedOut / RequestOut, non-blocking)
//!     → breaker.rs (waiting room → execution slot → work)
//!
//! events.rs receiver
//!     → stats.rs (time-weighted concurrency per report period)
//!     → StatsReporter + watch channel for the admin API
//! ```

pub mod breaker;
pub mod events;
pub mod stats;

pub use breaker::{Breaker, BreakerError, BreakerParams};
pub use events::{channel, EventSender, ReqEvent, ReqEventType};
pub use stats::{Stat, StatsAggregator};
