//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → PipelineConfig (validated, immutable)
//!     → handed to Pipeline::new, which sizes queue, gate, breaker and workers
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → Pipeline::apply_reload swaps retry settings atomically
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Resource sizing is fixed for the pipeline's lifetime; only retry policy reloads

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    CircuitBreakerConfig, DispatcherConfig, FullPolicy, GateConfig, LogFormat, ObservabilityConfig,
    PipelineConfig, QueueConfig, RetryConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
