//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline components produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!     → tracing.rs (per-request spans carrying the request id)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape, optional)
//!     → Pipeline::stats() snapshot for in-process callers
//! ```
//!
//! # Design Decisions
//! - Request ID flows through all components via the request span
//! - Metrics are cheap (atomic increments behind the facade)
//! - The exporter is opt-in; the library never installs globals on its own

pub mod logging;
pub mod metrics;
pub mod tracing;
