//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID)
//!     → handler.rs (probe, header hygiene, host restore, events, breaker)
//!     → proxy.rs (forward to the user container, relay the response)
//!     → Send to client
//! ```

pub mod handler;
pub mod proxy;
pub mod request;
pub mod server;

pub use handler::{
    RequestHandler, ORIGINAL_HOST_HEADER, PROBE_HEADER, REVISION_HEADER,
    REVISION_NAMESPACE_HEADER, SIDECAR_NAME,
};
pub use proxy::ReverseProxy;
pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use server::SidecarServer;
