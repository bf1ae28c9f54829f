//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! One dispatched request:
//!     → retries.rs (attempt loop, backoff between transient failures)
//!         → circuit_breaker.rs (fail fast while the backend is marked down)
//!         → timeouts.rs (bound each attempt by deadline, attempt timeout, cancel)
//!         → backend call
//! ```
//!
//! # Design Decisions
//! - Every backend call is bounded; nothing waits on the backend forever
//! - Only transient failures are retried, and never past the request deadline
//! - The breaker is consulted per attempt, so a retry can be refused mid-request

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;
