//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use request_pipeline::config::PipelineConfig;
use request_pipeline::{Backend, BackendError};

/// What the mock backend does with each call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    FailTransient,
    FailPermanent,
    /// Fail transiently for the first `n` calls, then succeed.
    FailFirst(u32),
}

/// Observation and control shared between a test and its mock backend.
#[derive(Debug)]
pub struct Probe {
    behavior: Mutex<Behavior>,
    calls: AtomicU32,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Probe {
    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Payload that makes the mock backend panic mid-call.
pub const PANIC_PAYLOAD: u32 = 999;

/// Mock backend whose payload is the call latency in milliseconds.
///
/// Zero-latency calls complete without yielding. Responses echo the payload.
/// [`PANIC_PAYLOAD`] panics instead of answering.
pub struct MockBackend {
    probe: Arc<Probe>,
}

impl MockBackend {
    pub fn new(behavior: Behavior) -> (Self, Arc<Probe>) {
        let probe = Arc::new(Probe {
            behavior: Mutex::new(behavior),
            calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        (Self { probe: probe.clone() }, probe)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Backend for MockBackend {
    type Payload = u32;
    type Response = u32;

    async fn call(&self, payload: &u32, _deadline: Option<Instant>) -> Result<u32, BackendError> {
        let n = self.probe.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.peak.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.probe.in_flight);
        if *payload == PANIC_PAYLOAD {
            panic!("mock backend panicked on call {n}");
        }

        if *payload > 0 {
            tokio::time::sleep(Duration::from_millis(u64::from(*payload))).await;
        }

        let behavior = *self.probe.behavior.lock().unwrap();
        match behavior {
            Behavior::Succeed => Ok(*payload),
            Behavior::FailTransient => Err(BackendError::Transient(format!("call {n}: 503"))),
            Behavior::FailPermanent => Err(BackendError::Permanent(format!("call {n}: 400"))),
            Behavior::FailFirst(k) if n < k => Err(BackendError::Transient(format!("call {n}: 503"))),
            Behavior::FailFirst(_) => Ok(*payload),
        }
    }
}

/// Small, deterministic configuration: no jitter, short backoff.
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.queue.capacity = 16;
    config.gate.max_in_flight = 2;
    config.dispatcher.workers = 2;
    config.dispatcher.shutdown_timeout_ms = 1_000;
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 100;
    config.retries.jitter = false;
    config
}

pub fn after_ms(ms: u64) -> Option<Instant> {
    Some(Instant::now() + Duration::from_millis(ms))
}
