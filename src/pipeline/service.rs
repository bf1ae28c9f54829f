//! Producer-facing pipeline service.

use arc_swap::ArcSwap;
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::config::watcher::restart_required;
use crate::config::{validate_config, PipelineConfig, ValidationError};
use crate::pipeline::dispatcher::Dispatcher;
use crate::pipeline::gate::ConcurrencyGate;
use crate::pipeline::outcome::{Outcome, RejectReason};
use crate::pipeline::queue::{EnqueueError, Rejected, RequestQueue};
use crate::pipeline::request::{Request, RequestId};
use crate::pipeline::sink::Handle;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitSnapshot};
use crate::resilience::retries::RetryPolicy;
use crate::resilience::timeouts::deadline_after;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {}", describe(.0))]
    InvalidConfig(Vec<ValidationError>),
}

fn describe(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Per-submission options.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Caller-assigned id; a UUID is generated when absent.
    pub id: Option<RequestId>,
    /// Absolute deadline; the configured default deadline applies when absent.
    pub deadline: Option<Instant>,
}

/// Point-in-time pipeline observability values.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub peak_queue_depth: usize,
    pub in_flight: usize,
    pub max_in_flight: usize,
    pub peak_in_flight: usize,
    pub pending: usize,
    pub retries_spent: u64,
    pub circuit: CircuitSnapshot,
}

/// A running pipeline: queue, gate, breaker, retry policy and worker pool
/// in front of one backend.
pub struct Pipeline<B: Backend> {
    dispatcher: Arc<Dispatcher<B>>,
    workers: Vec<JoinHandle<()>>,
    root: CancellationToken,
    config: ArcSwap<PipelineConfig>,
}

impl<B: Backend> Pipeline<B> {
    /// Validate `config`, build the components and start the workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: PipelineConfig, backend: B) -> Result<Self, PipelineError> {
        validate_config(&config).map_err(PipelineError::InvalidConfig)?;

        let dispatcher = Arc::new(Dispatcher::new(
            RequestQueue::new(&config.queue),
            ConcurrencyGate::from_config(&config.gate),
            CircuitBreaker::new(config.circuit_breaker.clone()),
            RetryPolicy::new(config.retries.clone()),
            Arc::new(backend),
            config.timeouts.attempt_timeout(),
        ));
        let workers = dispatcher.spawn_workers(config.dispatcher.workers);

        tracing::info!(
            queue_capacity = config.queue.capacity,
            full_policy = ?config.queue.full_policy,
            max_in_flight = config.gate.max_in_flight,
            workers = config.dispatcher.workers,
            breaker = %config.circuit_breaker.name,
            max_attempts = config.retries.effective_attempts(),
            "Pipeline started"
        );

        Ok(Self {
            dispatcher,
            workers,
            root: CancellationToken::new(),
            config: ArcSwap::from_pointee(config),
        })
    }

    /// Submit a payload with an optional absolute deadline.
    pub async fn submit(&self, payload: B::Payload, deadline: Option<Instant>) -> Handle<B::Response> {
        self.submit_with(payload, SubmitOptions { id: None, deadline }).await
    }

    /// Submit a payload. Never fails: refusals arrive through the handle.
    ///
    /// In wait mode this suspends while the queue is full, until space frees,
    /// the deadline passes, or the request is canceled.
    pub async fn submit_with(&self, payload: B::Payload, options: SubmitOptions) -> Handle<B::Response> {
        let deadline = options
            .deadline
            .or_else(|| deadline_after(self.config.load().timeouts.default_deadline()));
        let id = options.id.unwrap_or_else(RequestId::generate);
        let (request, handle) = Request::new(id, payload, deadline, self.root.child_token());

        let Some(registration) = self.dispatcher.track(&request) else {
            tracing::warn!(id = %request.id, "Rejected request with a duplicate pending id");
            self.dispatcher
                .finish(request, Outcome::Rejected(RejectReason::DuplicateId), 0);
            return handle;
        };

        // Dropping this future while it waits for queue space drops the
        // registration too, which frees the id.
        match self.dispatcher.queue().enqueue(request).await {
            Ok(accepted) => {
                registration.keep();
                tracing::trace!(id = %handle.id(), depth = accepted.depth, "Request queued");
            }
            Err(Rejected { error, request }) => {
                let outcome = match error {
                    EnqueueError::QueueFull => Outcome::Rejected(RejectReason::QueueFull),
                    EnqueueError::DeadlineExceeded => Outcome::Rejected(RejectReason::DeadlineExceeded),
                    EnqueueError::Canceled => Outcome::Canceled,
                    EnqueueError::Closed => Outcome::Rejected(RejectReason::ShuttingDown),
                };
                self.dispatcher.publish(request, outcome, 0);
            }
        }
        handle
    }

    /// Cancel a pending request by id. `false` if no such request is pending.
    pub fn cancel(&self, id: &RequestId) -> bool {
        self.dispatcher.cancel(id)
    }

    pub fn stats(&self) -> PipelineStats {
        let queue = self.dispatcher.queue();
        let gate = self.dispatcher.gate();
        PipelineStats {
            queue_depth: queue.depth(),
            queue_capacity: queue.capacity(),
            peak_queue_depth: queue.peak_depth(),
            in_flight: gate.in_flight(),
            max_in_flight: gate.limit(),
            peak_in_flight: gate.peak_in_flight(),
            pending: self.dispatcher.pending(),
            retries_spent: self.dispatcher.retry().budget().retries_spent(),
            circuit: self.dispatcher.breaker().snapshot(),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        self.dispatcher.breaker()
    }

    pub fn config(&self) -> Arc<PipelineConfig> {
        self.config.load_full()
    }

    /// Apply a reloaded configuration.
    ///
    /// Retry settings and the default deadline take effect for the next
    /// request. Returns the changed sections that need a restart; those are
    /// left as they were.
    pub fn apply_reload(&self, next: PipelineConfig) -> Result<Vec<&'static str>, PipelineError> {
        validate_config(&next).map_err(PipelineError::InvalidConfig)?;

        let current = self.config.load_full();
        let ignored = restart_required(&current, &next);
        for section in &ignored {
            tracing::warn!(section = *section, "Config section changed but requires a restart, ignoring");
        }

        let mut applied = PipelineConfig::clone(&current);
        applied.retries = next.retries.clone();
        applied.timeouts.default_deadline_ms = next.timeouts.default_deadline_ms;
        if applied.retries != current.retries {
            self.dispatcher.retry().update(applied.retries.clone());
        }
        if applied.timeouts.default_deadline_ms != current.timeouts.default_deadline_ms {
            tracing::info!(
                default_deadline_ms = applied.timeouts.default_deadline_ms,
                "Default deadline updated"
            );
        }
        self.config.store(Arc::new(applied));
        Ok(ignored)
    }

    /// Stop accepting work, drain the queue, and wait for the workers.
    ///
    /// Requests still running after the shutdown timeout are canceled.
    pub async fn shutdown(mut self) {
        let timeout = Duration::from_millis(self.config.load().dispatcher.shutdown_timeout_ms);
        tracing::info!(
            pending = self.dispatcher.pending(),
            timeout_ms = timeout.as_millis() as u64,
            "Pipeline shutting down"
        );

        self.dispatcher.queue().close();
        let drain = join_all(std::mem::take(&mut self.workers));
        tokio::pin!(drain);
        let results = match tokio::time::timeout(timeout, drain.as_mut()).await {
            Ok(results) => results,
            Err(_) => {
                tracing::warn!(
                    pending = self.dispatcher.pending(),
                    "Shutdown timeout elapsed, canceling outstanding requests"
                );
                self.root.cancel();
                drain.await
            }
        };

        for result in results {
            if let Err(e) = result {
                tracing::error!(error = %e, "Dispatcher worker terminated abnormally");
            }
        }
        tracing::info!("Pipeline stopped");
    }
}

impl<B: Backend> Drop for Pipeline<B> {
    fn drop(&mut self) {
        self.dispatcher.queue().close();
        if !self.workers.is_empty() {
            tracing::warn!("Pipeline dropped without shutdown, canceling outstanding requests");
            self.root.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::config::FullPolicy;

    struct Echo;

    impl Backend for Echo {
        type Payload = u32;
        type Response = u32;

        async fn call(&self, payload: &u32, _deadline: Option<Instant>) -> Result<u32, BackendError> {
            Ok(*payload * 2)
        }
    }

    #[tokio::test]
    async fn invalid_config_is_refused() {
        let mut config = PipelineConfig::default();
        config.gate.max_in_flight = 0;
        let err = Pipeline::new(config, Echo).err().unwrap();
        assert!(matches!(err, PipelineError::InvalidConfig(ref e) if !e.is_empty()));
        assert!(err.to_string().contains("gate.max_in_flight"));
    }

    #[tokio::test]
    async fn submit_and_await() {
        let pipeline = Pipeline::new(PipelineConfig::default(), Echo).unwrap();
        let completion = pipeline.submit(21, None).await.await;
        assert_eq!(completion.outcome, Outcome::Success(42));
        assert_eq!(completion.attempts, 1);
        assert_eq!(pipeline.stats().pending, 0);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn reload_applies_retries_only() {
        let pipeline = Pipeline::new(PipelineConfig::default(), Echo).unwrap();
        let mut next = PipelineConfig::default();
        next.retries.max_attempts = 6;
        next.queue.full_policy = FullPolicy::Reject;

        let ignored = pipeline.apply_reload(next).unwrap();
        assert_eq!(ignored, vec!["queue"]);
        assert_eq!(pipeline.config().retries.max_attempts, 6);
        assert_eq!(pipeline.config().queue.full_policy, FullPolicy::Wait);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_pending_id_is_rejected() {
        let mut config = PipelineConfig::default();
        config.dispatcher.workers = 1;
        config.gate.max_in_flight = 1;
        let pipeline = Pipeline::new(config, Echo).unwrap();

        // Hold the id pending by keeping the only worker away from the queue.
        let gate_hold = pipeline.dispatcher.gate().try_acquire().unwrap();
        let first = pipeline
            .submit_with(1, SubmitOptions { id: Some("dup".into()), deadline: None })
            .await;
        let second = pipeline
            .submit_with(2, SubmitOptions { id: Some("dup".into()), deadline: None })
            .await;

        let rejected = second.await;
        assert_eq!(rejected.outcome, Outcome::Rejected(RejectReason::DuplicateId));
        assert_eq!(pipeline.stats().pending, 1);

        drop(gate_hold);
        assert_eq!(first.await.outcome, Outcome::Success(2));
        pipeline.shutdown().await;
    }
}
