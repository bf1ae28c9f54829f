//! Request pipeline subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline::submit (service.rs)
//!     → request.rs (id, deadline, child cancellation token, result sink)
//!     → queue.rs (bounded FIFO; wait or reject when full)
//!     → dispatcher.rs worker dequeues
//!     → gate.rs (acquire one of N slots)
//!     → resilience: breaker-guarded retry loop around Backend::call
//!     → gate token released
//!     → sink.rs delivers exactly one Completion to the caller's Handle
//! ```
//!
//! # Design Decisions
//! - Every suspension point races the request deadline and its cancellation token
//! - Refusals are outcomes, not errors: `submit` always returns a handle
//! - The breaker is owned by the pipeline; independent pipelines never share state

pub mod dispatcher;
pub mod gate;
pub mod outcome;
pub mod queue;
pub mod request;
pub mod service;
pub mod sink;

pub use outcome::{Completion, Outcome, RejectReason};
pub use request::RequestId;
pub use service::{Pipeline, PipelineError, PipelineStats, SubmitOptions};
pub use sink::Handle;
