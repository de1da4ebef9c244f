//! Process-wide readiness of the user container.
//!
//! # States
//! ```text
//! NotReady → Ready   (prober observed a successful health check)
//! ```
//! There is no way back: once the container has been observed ready the
//! sidecar treats it as ready for the rest of its life.
//!
//! The writer half stays with the prober; everything else only ever sees a
//! [`ReadinessReader`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Readiness check consulted by the request handler.
pub type ProbeFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Writable readiness cell. Owned by the prober.
#[derive(Debug, Default)]
pub struct ReadinessState {
    ready: Arc<AtomicBool>,
}

impl ReadinessState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the container passed its health check.
    pub(crate) fn mark_ready(&self) {
        if !self.ready.swap(true, Ordering::SeqCst) {
            tracing::info!("User container is ready");
        }
    }

    /// A read-only handle on this cell.
    pub fn reader(&self) -> ReadinessReader {
        ReadinessReader {
            ready: Arc::clone(&self.ready),
        }
    }
}

/// Read-only view of a [`ReadinessState`].
#[derive(Debug, Clone)]
pub struct ReadinessReader {
    ready: Arc<AtomicBool>,
}

impl ReadinessReader {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Adapt this reader into the handler's probe function.
    pub fn into_probe(self) -> ProbeFn {
        Arc::new(move || self.is_ready())
    }
}
