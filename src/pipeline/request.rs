//! Request identity and the in-pipeline request record.

use serde::Serialize;
use std::fmt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::pipeline::outcome::{Completion, Outcome};
use crate::pipeline::sink::{self, Handle, ResultSink};

/// Caller-assigned or generated request identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new UUID v4 id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of work travelling through the pipeline.
///
/// Owned by the queue until dequeued, then by a dispatcher worker until
/// [`Request::complete`] hands its outcome to the caller.
pub struct Request<P, R> {
    pub id: RequestId,
    pub payload: P,
    pub submitted_at: Instant,
    pub enqueued_at: Option<Instant>,
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
    sink: ResultSink<R>,
}

impl<P, R> Request<P, R> {
    /// Create a request and the handle its caller will observe.
    pub fn new(
        id: RequestId,
        payload: P,
        deadline: Option<Instant>,
        cancel: CancellationToken,
    ) -> (Self, Handle<R>) {
        let submitted_at = Instant::now();
        let (sink, handle) = sink::channel(id.clone(), cancel.clone(), submitted_at);
        let request = Self {
            id,
            payload,
            submitted_at,
            enqueued_at: None,
            deadline,
            cancel,
            sink,
        };
        (request, handle)
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|at| Instant::now() >= at)
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Publish the terminal outcome. Returns `false` if the caller dropped its handle.
    pub fn complete(self, outcome: Outcome<R>, attempts: u32) -> bool {
        let completion = Completion {
            id: self.id,
            outcome,
            attempts,
            latency: self.submitted_at.elapsed(),
        };
        self.sink.complete(completion)
    }
}

impl<P, R> fmt::Debug for Request<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("submitted_at", &self.submitted_at)
            .field("enqueued_at", &self.enqueued_at)
            .field("deadline", &self.deadline)
            .field("canceled", &self.is_canceled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(RequestId::generate(), RequestId::generate());
        assert_eq!(RequestId::from("abc").to_string(), "abc");
        assert_eq!(serde_json::to_string(&RequestId::from("abc")).unwrap(), "\"abc\"");
    }

    #[tokio::test(start_paused = true)]
    async fn completion_reaches_handle() {
        let deadline = Some(Instant::now() + Duration::from_millis(10));
        let (request, handle) =
            Request::<_, u32>::new("r1".into(), (), deadline, CancellationToken::new());
        assert!(!request.is_expired());
        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(request.is_expired());

        assert!(request.complete(Outcome::Success(5), 1));
        let completion = handle.await;
        assert_eq!(completion.id, RequestId::from("r1"));
        assert_eq!(completion.outcome, Outcome::Success(5));
        assert_eq!(completion.latency, Duration::from_millis(10));
    }
}
