//! Deadline and timeout enforcement.
//!
//! # Responsibilities
//! - Turn optional deadlines into awaitable expiry futures
//! - Bound a single backend attempt by the request deadline, the per-attempt
//!   timeout and the request's cancellation token
//!
//! # Design Decisions
//! - Uses Tokio's time facilities so tests can pause the clock
//! - An attempt that runs into the request deadline is distinct from one that
//!   only exceeded its per-attempt timeout: the first ends the request as
//!   `Timeout`, the second is a transient backend error and may be retried

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backend::BackendError;
use crate::resilience::retries::CallError;

/// Resolves when `deadline` passes; never resolves for `None`.
pub async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

pub fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|at| Instant::now() >= at)
}

/// The earlier of two optional instants.
pub fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// `now + timeout`, if a timeout is configured.
pub fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|t| Instant::now() + t)
}

/// Run one backend attempt under the request deadline, an optional
/// per-attempt timeout, and cancellation.
pub async fn bounded_attempt<T, F>(
    call: F,
    deadline: Option<Instant>,
    attempt_timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<T, CallError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    let attempt_deadline = deadline_after(attempt_timeout);
    let request_bound = match (deadline, attempt_deadline) {
        (Some(request), Some(attempt)) => request <= attempt,
        (Some(_), None) => true,
        (None, _) => false,
    };
    let limit = earliest(deadline, attempt_deadline);

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CallError::Canceled),
        result = call => result.map_err(CallError::Backend),
        _ = sleep_until_deadline(limit) => {
            if request_bound {
                Err(CallError::DeadlineExceeded)
            } else {
                Err(CallError::Backend(BackendError::Timeout))
            }
        }
    }
}
