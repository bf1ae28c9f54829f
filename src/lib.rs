//! Backpressure-aware async request pipeline.
//!
//! Bursty producers submit work to a bounded queue; a worker pool drains it
//! through a concurrency gate, a circuit breaker and a bounded retry policy
//! into a [`Backend`]. Every submission resolves to exactly one [`Outcome`].

// Core
pub mod backend;
pub mod pipeline;
pub mod resilience;

// Cross-cutting concerns
pub mod config;
pub mod observability;

pub use backend::{Backend, BackendError};
pub use config::PipelineConfig;
pub use pipeline::{Completion, Handle, Outcome, Pipeline, RejectReason, RequestId, SubmitOptions};
