//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacities > 0, multiplier >= 1, delays ordered)
//! - Check observability settings parse (log level, metrics address)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: PipelineConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::PipelineConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `queue.capacity`.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &PipelineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.queue.capacity == 0 {
        errors.push(ValidationError::new("queue.capacity", "must be at least 1"));
    }

    if config.gate.max_in_flight == 0 {
        errors.push(ValidationError::new("gate.max_in_flight", "must be at least 1"));
    }
    if config.gate.acquire_timeout_ms == Some(0) {
        errors.push(ValidationError::new("gate.acquire_timeout_ms", "must be positive when set"));
    }

    if config.dispatcher.workers == 0 {
        errors.push(ValidationError::new("dispatcher.workers", "must be at least 1"));
    }

    let cb = &config.circuit_breaker;
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be at least 1"));
    }
    if cb.window_ms == 0 {
        errors.push(ValidationError::new("circuit_breaker.window_ms", "must be positive"));
    }
    if cb.half_open_max_probes == 0 {
        errors.push(ValidationError::new("circuit_breaker.half_open_max_probes", "must be at least 1"));
    }
    if cb.success_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.success_threshold", "must be at least 1"));
    }

    let retries = &config.retries;
    if retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be at least 1"));
    }
    if !(retries.multiplier >= 1.0) {
        errors.push(ValidationError::new(
            "retries.multiplier",
            format!("must be >= 1.0, got {}", retries.multiplier),
        ));
    }
    if retries.base_delay_ms > retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            format!("{} exceeds max_delay_ms {}", retries.base_delay_ms, retries.max_delay_ms),
        ));
    }
    if let Some(ratio) = retries.budget_ratio {
        if !(ratio > 0.0 && ratio <= 1.0) {
            errors.push(ValidationError::new(
                "retries.budget_ratio",
                format!("must be in (0, 1], got {}", ratio),
            ));
        }
    }

    if config.timeouts.default_deadline_ms == Some(0) {
        errors.push(ValidationError::new("timeouts.default_deadline_ms", "must be positive when set"));
    }
    if config.timeouts.attempt_timeout_ms == Some(0) {
        errors.push(ValidationError::new("timeouts.attempt_timeout_ms", "must be positive when set"));
    }

    let obs = &config.observability;
    if !LOG_LEVELS.contains(&obs.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", obs.log_level),
        ));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&PipelineConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_error() {
        let mut config = PipelineConfig::default();
        config.queue.capacity = 0;
        config.gate.max_in_flight = 0;
        config.retries.multiplier = 0.5;
        config.retries.base_delay_ms = 5_000;
        config.observability.log_level = "loud".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "queue.capacity",
                "gate.max_in_flight",
                "retries.multiplier",
                "retries.base_delay_ms",
                "observability.log_level",
            ]
        );
    }

    #[test]
    fn budget_ratio_bounds() {
        let mut config = PipelineConfig::default();
        config.retries.budget_ratio = Some(1.5);
        assert!(validate_config(&config).is_err());

        config.retries.budget_ratio = Some(0.2);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = PipelineConfig::default();
        config.observability.metrics_address = "nowhere".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "observability.metrics_address");
    }
}
