//! Backend abstraction.
//!
//! # Responsibilities
//! - Define the single operation the pipeline drives: `call(payload, deadline)`
//! - Classify backend failures as transient (retryable) or permanent
//!
//! # Design Decisions
//! - The pipeline is generic over the backend; no boxing on the hot path
//! - The payload is borrowed so retries reuse it without cloning
//! - Deadline overruns are detected by the pipeline, not reported by the backend

use std::future::Future;
use thiserror::Error;
use tokio::time::Instant;

pub mod simulated;

/// Errors a backend call can fail with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Network blip, overload, or an explicitly retryable status.
    #[error("transient backend error: {0}")]
    Transient(String),

    /// Malformed request or an explicitly non-retryable status.
    #[error("permanent backend error: {0}")]
    Permanent(String),

    /// A single attempt exceeded its per-attempt timeout.
    #[error("backend attempt timed out")]
    Timeout,
}

impl BackendError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_) | BackendError::Timeout)
    }
}

/// A rate- and concurrency-limited service the pipeline protects.
pub trait Backend: Send + Sync + 'static {
    type Payload: Send + Sync + 'static;
    type Response: Send + 'static;

    /// Issue one call. `deadline` is advisory for the backend; the pipeline
    /// enforces it independently.
    fn call(
        &self,
        payload: &Self::Payload,
        deadline: Option<Instant>,
    ) -> impl Future<Output = Result<Self::Response, BackendError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(BackendError::Transient("503".into()).is_transient());
        assert!(BackendError::Timeout.is_transient());
        assert!(!BackendError::Permanent("400".into()).is_transient());
    }
}
