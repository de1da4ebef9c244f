//! Bounded admission control for the user container.
//!
//! # Responsibilities
//! - Reject immediately when the waiting room is full
//! - Park excess requests in FIFO order until an execution slot frees up
//! - Cap concurrently executing work at a capacity that can change at runtime
//!
//! # Design Decisions
//! - Two independent semaphores: the waiting room is only ever `try_acquire`d,
//!   so overflow rejection never waits behind parked requests
//! - Both semaphores are tokio's fair semaphore, which grants permits in
//!   acquisition order
//! - Shrinking capacity never preempts: slots that cannot be forgotten right
//!   away become debt, repaid as in-flight work finishes

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::sync::{Semaphore, SemaphorePermit, TryAcquireError};
use tokio_util::sync::CancellationToken;

/// Error returned by [`Breaker::maybe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BreakerError {
    /// The waiting room is at its static bound.
    #[error("pending request queue is full")]
    Overflow,
    /// The caller gave up while waiting for a slot.
    #[error("context canceled while waiting for a slot")]
    Canceled,
}

/// Construction parameters for a [`Breaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerParams {
    /// Waiting room size as a multiple of `max_concurrency`.
    pub queue_depth_factor: usize,
    /// Hard upper bound on concurrently executing work.
    pub max_concurrency: usize,
    /// Execution slots available at startup, clamped to `max_concurrency`.
    pub initial_capacity: usize,
}

impl BreakerParams {
    /// Number of requests allowed to wait for a slot.
    pub fn waiting_room_size(&self) -> usize {
        self.queue_depth_factor.saturating_mul(self.max_concurrency)
    }
}

/// Waiting room plus a resizable pool of execution slots.
#[derive(Debug)]
pub struct Breaker {
    waiting_room: Semaphore,
    waiting_room_size: usize,
    slots: Semaphore,
    max_concurrency: usize,
    /// Mirror of the current capacity for lock-free reads.
    capacity: AtomicUsize,
    /// Serializes resizers; guards the authoritative capacity.
    resize_lock: Mutex<usize>,
    /// Slots to forget instead of release once in-flight work completes.
    debt: AtomicUsize,
    in_flight: AtomicUsize,
}

impl Breaker {
    /// Largest size either semaphore can hold.
    pub const MAX_SIZE: usize = Semaphore::MAX_PERMITS;

    /// Create a breaker from the given parameters.
    ///
    /// Sizes above [`Breaker::MAX_SIZE`] are clamped to it.
    pub fn new(params: BreakerParams) -> Self {
        let max_concurrency = params.max_concurrency.min(Self::MAX_SIZE);
        let capacity = params.initial_capacity.min(max_concurrency);
        let waiting_room_size = params.waiting_room_size().min(Self::MAX_SIZE);

        tracing::debug!(
            waiting_room = waiting_room_size,
            max_concurrency,
            capacity,
            "Breaker created"
        );

        Self {
            waiting_room: Semaphore::new(waiting_room_size),
            waiting_room_size,
            slots: Semaphore::new(capacity),
            max_concurrency,
            capacity: AtomicUsize::new(capacity),
            resize_lock: Mutex::new(capacity),
            debt: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Run `work` once an execution slot is free.
    ///
    /// Fails fast with [`BreakerError::Overflow`] when the waiting room is full
    /// and with [`BreakerError::Canceled`] if `cancel` fires before a slot is
    /// granted. In both cases `work` is never invoked. The slot is released when
    /// `work` completes, panics, or its future is dropped.
    pub async fn maybe<F, Fut, T>(&self, cancel: &CancellationToken, work: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let reservation = match self.waiting_room.try_acquire() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => {
                return Err(BreakerError::Overflow);
            }
        };

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BreakerError::Canceled),
            acquired = self.slots.acquire() => acquired.map_err(|_| BreakerError::Canceled)?,
        };
        drop(reservation);

        let _slot = SlotGuard::new(self, permit);
        Ok(work().await)
    }

    /// Set capacity to `min(n, max_concurrency)`.
    ///
    /// Growing wakes parked requests immediately. Shrinking only limits future
    /// admissions; in-flight work keeps its slot.
    pub fn update_concurrency(&self, n: usize) {
        let target = n.min(self.max_concurrency);
        let mut current = self.resize_lock.lock().unwrap_or_else(|e| e.into_inner());
        let previous = *current;

        if target > previous {
            let grow = target - previous;
            let owed = self
                .debt
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| Some(d.saturating_sub(grow)))
                .unwrap_or(0);
            self.slots.add_permits(grow - owed.min(grow));
        } else if target < previous {
            let shrink = previous - target;
            let forgotten = self.slots.forget_permits(shrink);
            self.debt.fetch_add(shrink - forgotten, Ordering::SeqCst);
        }

        *current = target;
        self.capacity.store(target, Ordering::SeqCst);

        if target != previous {
            tracing::info!(previous, capacity = target, requested = n, "Breaker capacity updated");
        }
    }

    /// Number of requests waiting for a slot.
    pub fn pending(&self) -> usize {
        self.waiting_room_size - self.waiting_room.available_permits()
    }

    /// Number of requests currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Current capacity.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::SeqCst)
    }

    /// Configured hard upper bound.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    fn pay_debt(&self) -> bool {
        self.debt
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1))
            .is_ok()
    }
}

/// Holds an execution slot for the duration of one `work` call.
struct SlotGuard<'a> {
    breaker: &'a Breaker,
    permit: Option<SemaphorePermit<'a>>,
}

impl<'a> SlotGuard<'a> {
    fn new(breaker: &'a Breaker, permit: SemaphorePermit<'a>) -> Self {
        breaker.in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            breaker,
            permit: Some(permit),
        }
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.breaker.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(permit) = self.permit.take() {
            if self.breaker.pay_debt() {
                permit.forget();
            }
        }
    }
}
