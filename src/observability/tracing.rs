//! Request spans.
//!
//! Every dispatched request runs inside a `request` span so that log lines
//! from the gate, breaker and retry loop carry the request id.

use ::tracing::{info_span, Span};

use crate::pipeline::request::RequestId;

/// Span wrapping one request's trip through the dispatcher.
pub fn request_span(id: &RequestId, worker: usize) -> Span {
    info_span!("request", id = %id, worker = worker)
}
