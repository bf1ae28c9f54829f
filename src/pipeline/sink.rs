//! Per-request completion handoff.
//!
//! A [`ResultSink`] travels with the request; the caller keeps the matching
//! [`Handle`]. Completing consumes the sink, so a request cannot be completed
//! twice. A sink dropped without completing is a pipeline bug: it is logged
//! and the handle resolves to `Rejected(Abandoned)` rather than hanging.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::pipeline::outcome::{Completion, Outcome, RejectReason};
use crate::pipeline::request::RequestId;

/// Create a connected sink/handle pair.
pub fn channel<R>(
    id: RequestId,
    cancel: CancellationToken,
    submitted_at: Instant,
) -> (ResultSink<R>, Handle<R>) {
    let (tx, rx) = oneshot::channel();
    let sink = ResultSink {
        id: id.clone(),
        tx: Some(tx),
    };
    let handle = Handle {
        id,
        cancel,
        submitted_at,
        rx,
        delivered: false,
    };
    (sink, handle)
}

/// Write side of a request's completion.
#[derive(Debug)]
pub struct ResultSink<R> {
    id: RequestId,
    tx: Option<oneshot::Sender<Completion<R>>>,
}

impl<R> ResultSink<R> {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Deliver the completion. Returns `false` if the handle was dropped.
    pub fn complete(mut self, completion: Completion<R>) -> bool {
        let Some(tx) = self.tx.take() else {
            unreachable!("result sink for request {} completed twice", self.id);
        };
        tx.send(completion).is_ok()
    }
}

impl<R> Drop for ResultSink<R> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            tracing::error!(id = %self.id, "Request dropped without an outcome");
        }
    }
}

/// Caller side of a submitted request. Await it for the [`Completion`].
#[derive(Debug)]
pub struct Handle<R> {
    id: RequestId,
    cancel: CancellationToken,
    submitted_at: Instant,
    rx: oneshot::Receiver<Completion<R>>,
    delivered: bool,
}

impl<R> Unpin for Handle<R> {}

impl<R> Handle<R> {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Cancel the request. It completes as `Canceled` at its next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Poll without waiting. Yields the completion at most once.
    pub fn try_outcome(&mut self) -> Option<Completion<R>> {
        if self.delivered {
            return None;
        }
        let completion = match self.rx.try_recv() {
            Ok(completion) => completion,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Closed) => self.abandoned(),
        };
        self.delivered = true;
        Some(completion)
    }

    fn abandoned(&self) -> Completion<R> {
        Completion {
            id: self.id.clone(),
            outcome: Outcome::Rejected(RejectReason::Abandoned),
            attempts: 0,
            latency: self.submitted_at.elapsed(),
        }
    }
}

impl<R> Future for Handle<R> {
    type Output = Completion<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let completion = match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(completion)) => completion,
            Poll::Ready(Err(_)) => this.abandoned(),
            Poll::Pending => return Poll::Pending,
        };
        this.delivered = true;
        Poll::Ready(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pair() -> (ResultSink<&'static str>, Handle<&'static str>) {
        channel("r1".into(), CancellationToken::new(), Instant::now())
    }

    fn done(outcome: Outcome<&'static str>) -> Completion<&'static str> {
        Completion {
            id: "r1".into(),
            outcome,
            attempts: 1,
            latency: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn try_outcome_yields_once() {
        let (sink, mut handle) = pair();
        assert!(handle.try_outcome().is_none());
        assert!(sink.complete(done(Outcome::Success("ok"))));
        let completion = handle.try_outcome().unwrap();
        assert_eq!(completion.outcome, Outcome::Success("ok"));
        assert!(handle.try_outcome().is_none());
    }

    #[tokio::test]
    async fn dropped_sink_resolves_abandoned() {
        let (sink, handle) = pair();
        drop(sink);
        let completion = handle.await;
        assert_eq!(completion.outcome, Outcome::Rejected(RejectReason::Abandoned));
    }

    #[tokio::test]
    async fn complete_after_handle_dropped() {
        let (sink, handle) = pair();
        drop(handle);
        assert!(!sink.complete(done(Outcome::Canceled)));
    }

    #[test]
    fn cancel_trips_token() {
        let token = CancellationToken::new();
        let (_sink, handle) = channel::<()>("r1".into(), token.clone(), Instant::now());
        handle.cancel();
        assert!(token.is_cancelled());
    }
}
