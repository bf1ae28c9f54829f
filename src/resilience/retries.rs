//! Retry logic.
//!
//! # Responsibilities
//! - Classify attempt failures (only transient backend errors are retried)
//! - Execute retries with exponential backoff + jitter
//! - Enforce the attempt limit, the request deadline and an optional retry budget
//!
//! # Design Decisions
//! - An open circuit is never retried and does not count as an attempt
//! - Settings are hot-swappable; each request runs against one snapshot
//! - Retry budget prevents retry storms under load

use arc_swap::ArcSwap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backend::BackendError;
use crate::config::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::timeouts::{deadline_passed, sleep_until_deadline};

/// Why a single guarded attempt did not produce a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The circuit breaker refused the call; the backend was not invoked.
    #[error("circuit open")]
    CircuitOpen,

    /// The request deadline passed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("request canceled")]
    Canceled,
}

impl CallError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallError::Backend(e) if e.is_transient())
    }
}

/// Result of driving one request through the retry loop.
#[derive(Debug)]
pub struct Execution<T> {
    pub result: Result<T, CallError>,
    /// Backend invocations made; circuit-open rejections are not counted.
    pub attempts: u32,
}

/// Floor of retries always allowed by the budget, so low traffic can retry.
const BUDGET_MIN_RETRIES: u64 = 10;

/// Caps retries to a fraction of executed requests.
#[derive(Debug, Default)]
pub struct RetryBudget {
    requests: AtomicU64,
    retries: AtomicU64,
}

impl RetryBudget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Reserve one retry if the budget allows it.
    pub fn try_spend(&self, ratio: f32) -> bool {
        let allowed = (self.requests.load(Ordering::Relaxed) as f64 * ratio as f64) as u64;
        let allowed = allowed.max(BUDGET_MIN_RETRIES);
        self.retries
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |spent| {
                (spent < allowed).then_some(spent + 1)
            })
            .is_ok()
    }

    pub fn retries_spent(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }
}

/// Bounded retry with jittered exponential backoff.
#[derive(Debug)]
pub struct RetryPolicy {
    config: ArcSwap<RetryConfig>,
    budget: RetryBudget,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config: ArcSwap::from_pointee(config),
            budget: RetryBudget::new(),
        }
    }

    /// Current settings snapshot.
    pub fn config(&self) -> Arc<RetryConfig> {
        self.config.load_full()
    }

    /// Replace the settings; requests already executing keep their snapshot.
    pub fn update(&self, config: RetryConfig) {
        tracing::info!(
            max_attempts = config.max_attempts,
            base_delay_ms = config.base_delay_ms,
            max_delay_ms = config.max_delay_ms,
            "Retry policy updated"
        );
        self.config.store(Arc::new(config));
    }

    pub fn budget(&self) -> &RetryBudget {
        &self.budget
    }

    /// Run `attempt` until it succeeds, fails permanently, or a limit is hit.
    ///
    /// `attempt` receives the 0-based attempt index.
    pub async fn execute<T, F, Fut>(
        &self,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Execution<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let config = self.config();
        let max_attempts = config.effective_attempts();
        let mut attempts = 0;
        self.budget.record_request();

        loop {
            if cancel.is_cancelled() {
                return Execution { result: Err(CallError::Canceled), attempts };
            }
            if deadline_passed(deadline) {
                return Execution { result: Err(CallError::DeadlineExceeded), attempts };
            }

            let error = match attempt(attempts).await {
                Ok(response) => {
                    return Execution { result: Ok(response), attempts: attempts + 1 };
                }
                Err(CallError::CircuitOpen) => {
                    return Execution { result: Err(CallError::CircuitOpen), attempts };
                }
                Err(error) => {
                    attempts += 1;
                    error
                }
            };

            if !error.is_retryable() {
                return Execution { result: Err(error), attempts };
            }
            if attempts >= max_attempts {
                tracing::debug!(attempts, error = %error, "Retry attempts exhausted");
                return Execution { result: Err(error), attempts };
            }
            if let Some(ratio) = config.budget_ratio {
                if !self.budget.try_spend(ratio) {
                    tracing::warn!(attempts, "Retry budget exhausted, surfacing last error");
                    return Execution { result: Err(error), attempts };
                }
            }

            let delay = calculate_backoff(attempts, &config);
            tracing::debug!(
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after transient error"
            );
            metrics::record_retry();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Execution { result: Err(CallError::Canceled), attempts };
                }
                _ = sleep_until_deadline(deadline) => {
                    return Execution { result: Err(CallError::DeadlineExceeded), attempts };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
