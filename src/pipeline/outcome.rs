//! Terminal outcomes of a submitted request.

use std::fmt;
use std::time::Duration;

use crate::backend::BackendError;
use crate::pipeline::request::RequestId;
use crate::resilience::retries::CallError;

/// Why the pipeline refused to serve a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Reject mode and the queue was at capacity.
    QueueFull,
    /// Deadline already past at submission, or reached while waiting for queue space.
    DeadlineExceeded,
    /// Deadline or gate acquire timeout reached while waiting for a concurrency slot.
    GateTimeout,
    /// The breaker refused the call; the backend was not invoked.
    CircuitOpen,
    ShuttingDown,
    /// Another pending request already uses this id.
    DuplicateId,
    /// The request was lost without being completed (a worker panicked).
    Abandoned,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::QueueFull => "queue_full",
            RejectReason::DeadlineExceeded => "deadline_exceeded",
            RejectReason::GateTimeout => "gate_timeout",
            RejectReason::CircuitOpen => "circuit_open",
            RejectReason::ShuttingDown => "shutting_down",
            RejectReason::DuplicateId => "duplicate_id",
            RejectReason::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exactly one of these is produced per submitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<R> {
    Success(R),
    /// Permanent error, or the last transient error once retries ran out.
    Failure(BackendError),
    /// The deadline passed after the request was admitted.
    Timeout,
    Rejected(RejectReason),
    Canceled,
}

impl<R> Outcome<R> {
    /// Stable label used for metrics and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Failure(_) => "failure",
            Outcome::Timeout => "timeout",
            Outcome::Rejected(_) => "rejected",
            Outcome::Canceled => "canceled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Outcome::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }

    pub fn into_response(self) -> Option<R> {
        match self {
            Outcome::Success(response) => Some(response),
            _ => None,
        }
    }
}

impl<R> From<CallError> for Outcome<R> {
    fn from(error: CallError) -> Self {
        match error {
            CallError::Backend(e) => Outcome::Failure(e),
            CallError::CircuitOpen => Outcome::Rejected(RejectReason::CircuitOpen),
            CallError::DeadlineExceeded => Outcome::Timeout,
            CallError::Canceled => Outcome::Canceled,
        }
    }
}

/// What the caller observes through its [`Handle`](crate::pipeline::sink::Handle).
#[derive(Debug, Clone)]
pub struct Completion<R> {
    pub id: RequestId,
    pub outcome: Outcome<R>,
    /// Backend invocations made for this request.
    pub attempts: u32,
    /// Submission to completion.
    pub latency: Duration,
}

impl<R> Completion<R> {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}
