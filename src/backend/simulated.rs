//! Simulated inference backend for load runs and demos.
//!
//! Echoes the payload after a jittered latency, failing a configurable
//! fraction of calls transiently or permanently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::backend::{Backend, BackendError};

/// Behaviour knobs for [`SimulatedBackend`].
#[derive(Debug, Clone)]
pub struct SimulatedProfile {
    /// Base latency of a successful call.
    pub latency: Duration,
    /// Extra uniformly random latency added per call.
    pub latency_jitter: Duration,
    /// Probability in `[0, 1]` of a transient failure.
    pub transient_rate: f64,
    /// Probability in `[0, 1]` of a permanent failure.
    pub permanent_rate: f64,
}

impl Default for SimulatedProfile {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(20),
            latency_jitter: Duration::from_millis(10),
            transient_rate: 0.1,
            permanent_rate: 0.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct SimulatedBackend {
    profile: SimulatedProfile,
    calls: AtomicU64,
}

impl SimulatedBackend {
    pub fn new(profile: SimulatedProfile) -> Self {
        Self {
            profile,
            calls: AtomicU64::new(0),
        }
    }

    /// Total calls received so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn latency(&self) -> Duration {
        let jitter_ms = self.profile.latency_jitter.as_millis() as u64;
        let extra = if jitter_ms > 0 { fastrand::u64(0..jitter_ms) } else { 0 };
        self.profile.latency + Duration::from_millis(extra)
    }
}

impl Backend for SimulatedBackend {
    type Payload = String;
    type Response = String;

    async fn call(&self, payload: &String, _deadline: Option<Instant>) -> Result<String, BackendError> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        tokio::time::sleep(self.latency()).await;

        let roll = fastrand::f64();
        if roll < self.profile.permanent_rate {
            return Err(BackendError::Permanent(format!("call {n} rejected as malformed")));
        }
        if roll < self.profile.permanent_rate + self.profile.transient_rate {
            return Err(BackendError::Transient(format!("call {n} hit an overloaded replica")));
        }
        Ok(format!("completion for: {payload}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn healthy_profile_echoes() {
        let backend = SimulatedBackend::new(SimulatedProfile {
            transient_rate: 0.0,
            ..Default::default()
        });
        let out = backend.call(&"hi".to_string(), None).await.unwrap();
        assert_eq!(out, "completion for: hi");
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_profile() {
        let backend = SimulatedBackend::new(SimulatedProfile {
            transient_rate: 1.0,
            ..Default::default()
        });
        let err = backend.call(&"hi".to_string(), None).await.unwrap_err();
        assert!(err.is_transient());
    }
}
