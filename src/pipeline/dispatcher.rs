//! Dispatcher worker pool.
//!
//! # Responsibilities
//! - Pull requests from the queue in FIFO order
//! - Acquire a concurrency slot, then drive the breaker-guarded retry loop
//! - Release the slot and publish exactly one outcome per request
//!
//! # Design Decisions
//! - Workers are independent of the gate size; they contend for slots
//! - The gate token is released before the outcome is published, and its
//!   drop guard returns the slot on any early exit or panic
//! - Pending requests are registered by id so they can be canceled by id
//! - A panic while processing one request is contained to that request;
//!   its caller sees `Rejected(Abandoned)` and the worker moves on

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::backend::Backend;
use crate::observability::metrics;
use crate::observability::tracing::request_span;
use crate::pipeline::gate::{AcquireError, ConcurrencyGate};
use crate::pipeline::outcome::{Outcome, RejectReason};
use crate::pipeline::queue::RequestQueue;
use crate::pipeline::request::{Request, RequestId};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::retries::{CallError, Execution, RetryPolicy};
use crate::resilience::timeouts::bounded_attempt;

type PipelineRequest<B> = Request<<B as Backend>::Payload, <B as Backend>::Response>;

/// Shared state every worker drives requests through.
pub struct Dispatcher<B: Backend> {
    queue: RequestQueue<B::Payload, B::Response>,
    gate: ConcurrencyGate,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    backend: Arc<B>,
    attempt_timeout: Option<Duration>,
    pending: DashMap<RequestId, CancellationToken>,
}

impl<B: Backend> Dispatcher<B> {
    pub fn new(
        queue: RequestQueue<B::Payload, B::Response>,
        gate: ConcurrencyGate,
        breaker: CircuitBreaker,
        retry: RetryPolicy,
        backend: Arc<B>,
        attempt_timeout: Option<Duration>,
    ) -> Self {
        Self {
            queue,
            gate,
            breaker,
            retry,
            backend,
            attempt_timeout,
            pending: DashMap::new(),
        }
    }

    pub fn spawn_workers(self: &Arc<Self>, count: usize) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|worker| tokio::spawn(self.clone().run_worker(worker)))
            .collect()
    }

    async fn run_worker(self: Arc<Self>, worker: usize) {
        tracing::debug!(worker, "Dispatcher worker started");
        while let Some(request) = self.queue.dequeue().await {
            let id = request.id.clone();
            let span = request_span(&id, worker);
            let processed = AssertUnwindSafe(self.process(request).instrument(span))
                .catch_unwind()
                .await;
            if processed.is_err() {
                // The sink was dropped during unwinding, so the caller already sees `Abandoned`.
                self.pending.remove(&id);
                metrics::record_rejection(RejectReason::Abandoned.as_str());
                tracing::error!(id = %id, worker, "Request processing panicked, request abandoned");
            }
        }
        tracing::debug!(worker, "Dispatcher worker stopped, queue drained");
    }

    /// Take one dequeued request to its terminal outcome.
    pub async fn process(&self, request: PipelineRequest<B>) {
        if request.is_canceled() {
            self.publish(request, Outcome::Canceled, 0);
            return;
        }
        if request.is_expired() {
            self.publish(request, Outcome::Timeout, 0);
            return;
        }

        let token = match self.gate.acquire(request.deadline, &request.cancel).await {
            Ok(token) => token,
            Err(e) => {
                let outcome = match e {
                    AcquireError::Timeout => Outcome::Rejected(RejectReason::GateTimeout),
                    AcquireError::Canceled => Outcome::Canceled,
                    AcquireError::Closed => Outcome::Rejected(RejectReason::ShuttingDown),
                };
                self.publish(request, outcome, 0);
                return;
            }
        };

        let execution = self.drive(&request).await;
        tracing::trace!(held_ms = token.held_for().as_millis() as u64, "Releasing gate slot");
        self.gate.release(token);

        let outcome = match execution.result {
            Ok(response) => Outcome::Success(response),
            Err(error) => Outcome::from(error),
        };
        self.publish(request, outcome, execution.attempts);
    }

    async fn drive(&self, request: &PipelineRequest<B>) -> Execution<B::Response> {
        self.retry
            .execute(request.deadline, &request.cancel, |attempt| self.attempt(request, attempt))
            .await
    }

    async fn attempt(&self, request: &PipelineRequest<B>, attempt: u32) -> Result<B::Response, CallError> {
        tracing::trace!(attempt, "Calling backend");
        self.breaker
            .call(|| {
                bounded_attempt(
                    self.backend.call(&request.payload, request.deadline),
                    request.deadline,
                    self.attempt_timeout,
                    &request.cancel,
                )
            })
            .await
    }

    /// Register a request as pending. `None` if its id is already pending.
    ///
    /// The registration is undone when the returned guard drops, unless it
    /// was kept with [`Registration::keep`].
    pub fn track(&self, request: &PipelineRequest<B>) -> Option<Registration<'_>> {
        match self.pending.entry(request.id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(request.cancel.clone());
                Some(Registration {
                    pending: &self.pending,
                    id: Some(request.id.clone()),
                })
            }
        }
    }

    /// Unregister and complete a tracked request.
    pub fn publish(&self, request: PipelineRequest<B>, outcome: Outcome<B::Response>, attempts: u32) {
        self.pending.remove(&request.id);
        self.finish(request, outcome, attempts);
    }

    /// Complete a request without touching the pending registry.
    pub fn finish(&self, request: PipelineRequest<B>, outcome: Outcome<B::Response>, attempts: u32) {
        let latency = request.submitted_at.elapsed();
        let kind = outcome.kind();
        if let Some(reason) = outcome.reject_reason() {
            metrics::record_rejection(reason.as_str());
        }
        metrics::record_outcome(kind, latency);
        tracing::debug!(
            id = %request.id,
            outcome = kind,
            reason = outcome.reject_reason().map(|r| r.as_str()),
            attempts,
            latency_ms = latency.as_millis() as u64,
            "Request completed"
        );

        let id = request.id.clone();
        if !request.complete(outcome, attempts) {
            tracing::trace!(id = %id, "Caller dropped its handle before completion");
        }
    }

    /// Cancel a pending request by id.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let token = self.pending.get(id).map(|entry| entry.value().clone());
        match token {
            Some(token) => {
                token.cancel();
                tracing::debug!(id = %id, "Request canceled by id");
                true
            }
            None => false,
        }
    }

    /// Requests submitted and not yet completed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn queue(&self) -> &RequestQueue<B::Payload, B::Response> {
        &self.queue
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }
}

/// A pending-registry entry owned by a submission that has not reached the
/// queue yet.
pub struct Registration<'a> {
    pending: &'a DashMap<RequestId, CancellationToken>,
    id: Option<RequestId>,
}

impl Registration<'_> {
    /// Hand the entry over to whoever publishes the request's outcome.
    pub fn keep(mut self) {
        self.id = None;
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.pending.remove(&id);
            tracing::trace!(id = %id, "Submission dropped before admission, id released");
        }
    }
}
