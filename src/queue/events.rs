//! Concurrency-change notifications.
//!
//! # Responsibilities
//! - Define the request lifecycle events consumed by the stats aggregator
//! - Deliver them without ever blocking a request-serving task
//!
//! # Design Decisions
//! - Bounded tokio mpsc channel; producers use `try_send`
//! - A full buffer drops the event and bumps a counter instead of waiting

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;

use crate::observability::metrics;

/// Kind of concurrency change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReqEventType {
    /// Request entered the sidecar.
    RequestIn,
    /// Request left the sidecar.
    RequestOut,
    /// Request acquired a breaker slot and is being forwarded.
    ProxiedIn,
    /// Request released its breaker slot.
    ProxiedOut,
}

/// A single concurrency-change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReqEvent {
    pub event_type: ReqEventType,
    /// When the event was emitted.
    pub time: Instant,
}

impl ReqEvent {
    pub fn new(event_type: ReqEventType) -> Self {
        Self {
            event_type,
            time: Instant::now(),
        }
    }
}

/// Producer half of the event channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<ReqEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// Emit an event, dropping it if the consumer has fallen behind.
    pub fn emit(&self, event_type: ReqEventType) {
        match self.tx.try_send(ReqEvent::new(event_type)) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_event_dropped();
                tracing::trace!(event = ?event.event_type, "Event buffer full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::trace!(event = ?event_type, "Event consumer gone");
            }
        }
    }

    /// Number of events dropped because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create an event channel with room for `buffer` undelivered events.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<ReqEvent>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (
        EventSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}
