//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Un-jittered delay before retry number `retry` (1-based).
///
/// `base × multiplier^(retry-1)`, capped at `max_delay_ms`.
pub fn base_delay(retry: u32, config: &RetryConfig) -> Duration {
    if retry == 0 {
        return Duration::ZERO;
    }

    let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
    let scaled = config.base_delay_ms as f64 * config.multiplier.powi(exponent);
    let capped = if scaled.is_finite() {
        scaled.min(config.max_delay_ms as f64)
    } else {
        config.max_delay_ms as f64
    };

    Duration::from_millis(capped as u64)
}

/// Calculate the backoff before retry number `retry`, adding jitter in `[0, delay)`.
pub fn calculate_backoff(retry: u32, config: &RetryConfig) -> Duration {
    let delay = base_delay(retry, config);
    if !config.jitter {
        return delay;
    }

    let delay_ms = delay.as_millis() as u64;
    let jitter = if delay_ms > 0 {
        rand::thread_rng().gen_range(0..delay_ms)
    } else {
        0
    };

    delay + Duration::from_millis(jitter)
}
