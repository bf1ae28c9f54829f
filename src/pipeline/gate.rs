//! Concurrency gate limiting in-flight backend calls.
//!
//! # Responsibilities
//! - Hand out at most `max_in_flight` tokens at a time
//! - Serve waiters in arrival order
//! - Give up waiting at the request deadline, the acquire timeout, or on cancel
//!
//! # Design Decisions
//! - Semaphore-backed; tokio's semaphore queues waiters FIFO
//! - `GateToken` is an RAII guard: the slot comes back on release or drop,
//!   whichever happens first, and only once
//! - The in-flight counter asserts on underflow so accounting bugs fail loudly

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::GateConfig;
use crate::observability::metrics;
use crate::resilience::timeouts::{deadline_after, deadline_passed, earliest, sleep_until_deadline};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquireError {
    #[error("timed out waiting for a concurrency slot")]
    Timeout,

    #[error("canceled while waiting for a concurrency slot")]
    Canceled,

    #[error("concurrency gate closed")]
    Closed,
}

#[derive(Debug)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    peak: AtomicUsize,
    limit: usize,
    acquire_timeout: Option<Duration>,
}

impl ConcurrencyGate {
    pub fn new(limit: usize, acquire_timeout: Option<Duration>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: AtomicUsize::new(0),
            limit,
            acquire_timeout,
        }
    }

    pub fn from_config(config: &GateConfig) -> Self {
        Self::new(config.max_in_flight, config.acquire_timeout())
    }

    /// Wait for a slot until `deadline` (or the configured acquire timeout,
    /// if sooner) or until `cancel` fires.
    pub async fn acquire(
        &self,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<GateToken, AcquireError> {
        if cancel.is_cancelled() {
            return Err(AcquireError::Canceled);
        }
        if deadline_passed(deadline) {
            return Err(AcquireError::Timeout);
        }

        let give_up_at = earliest(deadline, deadline_after(self.acquire_timeout));
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AcquireError::Canceled),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| AcquireError::Closed)?
            }
            _ = sleep_until_deadline(give_up_at) => return Err(AcquireError::Timeout),
        };
        Ok(self.issue(permit))
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<GateToken> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        Some(self.issue(permit))
    }

    /// Return a token's slot. Equivalent to dropping the token.
    pub fn release(&self, token: GateToken) {
        token.release();
    }

    fn issue(&self, permit: OwnedSemaphorePermit) -> GateToken {
        let in_flight = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        assert!(
            in_flight <= self.limit,
            "concurrency gate issued {in_flight} tokens with a limit of {}",
            self.limit
        );
        self.peak.fetch_max(in_flight, Ordering::Relaxed);
        metrics::set_in_flight(in_flight);
        GateToken {
            permit: Some(permit),
            in_flight: self.in_flight.clone(),
            acquired_at: Instant::now(),
        }
    }

    /// Tokens currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }
}

/// One concurrency slot, held for the whole (possibly retried) backend call.
#[derive(Debug)]
pub struct GateToken {
    permit: Option<OwnedSemaphorePermit>,
    in_flight: Arc<AtomicUsize>,
    acquired_at: Instant,
}

impl GateToken {
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    pub fn release(mut self) {
        self.release_slot();
    }

    fn release_slot(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        let prev = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "concurrency gate released more tokens than it issued");
        metrics::set_in_flight(prev - 1);
        // Counter first, permit second: a waiter woken by the permit must
        // never observe the old count.
        drop(permit);
    }
}

impl Drop for GateToken {
    fn drop(&mut self) {
        self.release_slot();
    }
}
