//! Bounded FIFO request queue.
//!
//! # Responsibilities
//! - Absorb bursts between producers and dispatcher workers
//! - Apply backpressure when full: wait for space or reject, per configuration
//! - Never hold more than `capacity` requests
//!
//! # Design Decisions
//! - Built on a bounded `mpsc` channel; a slot is reserved before the request
//!   is moved in, so a rejected request is handed back intact
//! - Waiting producers are served in arrival order and give up at their
//!   deadline or on cancellation
//! - Closing drops the queue's sender; workers drain what is left and then
//!   see the end of the stream

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;

use crate::config::{FullPolicy, QueueConfig};
use crate::observability::metrics;
use crate::pipeline::request::Request;
use crate::resilience::timeouts::sleep_until_deadline;

/// Why a request was not admitted to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    #[error("queue is full")]
    QueueFull,

    #[error("deadline exceeded before the request was queued")]
    DeadlineExceeded,

    #[error("request canceled while waiting for queue space")]
    Canceled,

    #[error("queue is closed")]
    Closed,
}

/// A refused request, returned to the caller untouched.
pub struct Rejected<P, R> {
    pub error: EnqueueError,
    pub request: Request<P, R>,
}

impl<P, R> std::fmt::Debug for Rejected<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .field("request", &self.request)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    /// Requests waiting in the queue right after this one was added.
    pub depth: usize,
}

pub struct RequestQueue<P, R> {
    tx: Mutex<Option<mpsc::Sender<Request<P, R>>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Request<P, R>>>,
    policy: FullPolicy,
    capacity: usize,
    depth: AtomicUsize,
    peak: AtomicUsize,
}

impl<P, R> RequestQueue<P, R> {
    pub fn new(config: &QueueConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            policy: config.full_policy,
            capacity: config.capacity,
            depth: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<Request<P, R>>> {
        self.tx.lock().expect("queue sender mutex poisoned").clone()
    }

    /// Admit a request, or hand it back with the reason it was refused.
    ///
    /// A request whose deadline has already passed is refused before it can
    /// take a slot.
    pub async fn enqueue(&self, mut request: Request<P, R>) -> Result<Accepted, Rejected<P, R>> {
        if request.is_canceled() {
            return Err(Rejected { error: EnqueueError::Canceled, request });
        }
        if request.is_expired() {
            return Err(Rejected { error: EnqueueError::DeadlineExceeded, request });
        }
        let Some(tx) = self.sender() else {
            return Err(Rejected { error: EnqueueError::Closed, request });
        };

        let reserved = match self.policy {
            FullPolicy::Reject => tx.try_reserve().map_err(|e| match e {
                TrySendError::Full(()) => EnqueueError::QueueFull,
                TrySendError::Closed(()) => EnqueueError::Closed,
            }),
            FullPolicy::Wait => {
                tokio::select! {
                    biased;
                    _ = request.cancel.cancelled() => Err(EnqueueError::Canceled),
                    permit = tx.reserve() => permit.map_err(|_| EnqueueError::Closed),
                    _ = sleep_until_deadline(request.deadline) => Err(EnqueueError::DeadlineExceeded),
                }
            }
        };
        let permit = match reserved {
            Ok(permit) => permit,
            Err(error) => return Err(Rejected { error, request }),
        };

        // Reserved slots count as occupied, so this never exceeds capacity.
        let occupied = self.capacity - tx.capacity();
        self.peak.fetch_max(occupied, Ordering::Relaxed);

        request.enqueued_at = Some(Instant::now());
        let depth = (self.depth.fetch_add(1, Ordering::AcqRel) + 1).min(self.capacity);
        permit.send(request);
        metrics::set_queue_depth(depth);
        Ok(Accepted { depth })
    }

    /// Take the oldest request, waiting if the queue is empty.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn dequeue(&self) -> Option<Request<P, R>> {
        let request = self.rx.lock().await.recv().await?;
        let depth = self
            .depth
            .fetch_sub(1, Ordering::AcqRel)
            .saturating_sub(1)
            .min(self.capacity);
        metrics::set_queue_depth(depth);
        Some(request)
    }

    /// Stop admitting requests. Already queued requests stay dequeueable.
    pub fn close(&self) {
        if self.tx.lock().expect("queue sender mutex poisoned").take().is_some() {
            tracing::info!(depth = self.depth(), "Request queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().expect("queue sender mutex poisoned").is_none()
    }

    /// Requests waiting in the queue.
    ///
    /// The channel frees a slot inside `recv`, before the counter is
    /// decremented, so the raw counter can briefly run one past capacity.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire).min(self.capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Highest occupancy observed, reserved slots included.
    pub fn peak_depth(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn policy(&self) -> FullPolicy {
        self.policy
    }
}
