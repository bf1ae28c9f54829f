//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the pipeline.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the request pipeline.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bounded request queue settings.
    pub queue: QueueConfig,

    /// Concurrency gate settings.
    pub gate: GateConfig,

    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Dispatcher worker pool settings.
    pub dispatcher: DispatcherConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// What `enqueue` does when the queue is at capacity.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FullPolicy {
    /// Suspend the producer until a slot frees or its deadline elapses.
    #[default]
    Wait,
    /// Fail immediately with `QueueFull`.
    Reject,
}

/// Request queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of queued requests (backpressure).
    pub capacity: usize,

    /// Behaviour when the queue is full.
    pub full_policy: FullPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            full_policy: FullPolicy::Wait,
        }
    }
}

/// Concurrency gate configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    /// Maximum concurrent backend calls.
    pub max_in_flight: usize,

    /// Upper bound on time spent waiting for a slot, independent of the request deadline.
    pub acquire_timeout_ms: Option<u64>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            acquire_timeout_ms: None,
        }
    }
}

impl GateConfig {
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable the breaker. When disabled every call is admitted.
    pub enabled: bool,

    /// Label used in logs and metrics.
    pub name: String,

    /// Failures within `window_ms` that open the circuit.
    pub failure_threshold: u32,

    /// Rolling window for failure counting in milliseconds.
    pub window_ms: u64,

    /// Time spent Open before probing, in milliseconds.
    pub cooldown_ms: u64,

    /// Probe calls allowed concurrently while Half-Open.
    pub half_open_max_probes: u32,

    /// Consecutive probe successes required to close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "backend".to_string(),
            failure_threshold: 5,
            window_ms: 10_000,
            cooldown_ms: 30_000,
            half_open_max_probes: 1,
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries. When disabled each request gets exactly one attempt.
    pub enabled: bool,

    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Growth factor applied per retry.
    pub multiplier: f64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Add uniform jitter in `[0, delay)` to every backoff.
    pub jitter: bool,

    /// Fraction of executed requests that may be retried (retry budget).
    /// e.g., 0.1 for 10% budget. Unset means unlimited.
    pub budget_ratio: Option<f32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 2000,
            jitter: true,
            budget_ratio: None,
        }
    }
}

impl RetryConfig {
    /// Attempts actually permitted, honouring `enabled`.
    pub fn effective_attempts(&self) -> u32 {
        if self.enabled {
            self.max_attempts.max(1)
        } else {
            1
        }
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Number of worker tasks pulling from the queue.
    pub workers: usize,

    /// Time allowed for draining on shutdown before outstanding requests are cancelled.
    pub shutdown_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            shutdown_timeout_ms: 5_000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline applied to submissions that carry none, in milliseconds.
    pub default_deadline_ms: Option<u64>,

    /// Cap on a single backend attempt, in milliseconds.
    pub attempt_timeout_ms: Option<u64>,
}

impl TimeoutConfig {
    pub fn default_deadline(&self) -> Option<Duration> {
        self.default_deadline_ms.map(Duration::from_millis)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
