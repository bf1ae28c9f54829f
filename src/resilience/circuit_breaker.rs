//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: backend assumed down, calls fail fast
//! - Half-Open: a limited number of probe calls test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures >= failure_threshold within window
//! Open → Half-Open: after cooldown (evaluated lazily on the next call or read)
//! Half-Open → Closed: success_threshold probe successes
//! Half-Open → Open: any probe fails (cooldown restarts)
//! ```
//!
//! # Design Decisions
//! - One breaker per backend target, owned by the pipeline (no globals)
//! - All state lives behind one mutex so every transition is linearizable
//! - Permits remember the generation they were granted in; results arriving
//!   after a transition are ignored, so racing callers cannot double-transition
//! - Permanent backend errors do not count as failures (caller fault)

use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use tokio::time::Instant;

use crate::backend::BackendError;
use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::resilience::retries::CallError;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }

    /// The only four legal edges of the state machine.
    pub fn can_transition_to(&self, next: CircuitState) -> bool {
        matches!(
            (self, next),
            (CircuitState::Closed, CircuitState::Open)
                | (CircuitState::Open, CircuitState::HalfOpen)
                | (CircuitState::HalfOpen, CircuitState::Closed)
                | (CircuitState::HalfOpen, CircuitState::Open)
        )
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Success,
    Failure,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    generation: u64,
    /// Failure timestamps inside the rolling window (Closed only).
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    last_transition: Instant,
    probes_in_flight: u32,
    probe_successes: u32,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
    times_opened: u64,
}

/// Point-in-time view of a breaker, for stats and admin output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failures_in_window: usize,
    pub probes_in_flight: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub times_opened: u64,
    pub ms_since_transition: u64,
}

/// Shared state machine gating all calls to one backend.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        metrics::set_circuit_state(&config.name, CircuitState::Closed);
        Self {
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                generation: 0,
                failures: VecDeque::new(),
                opened_at: None,
                last_transition: Instant::now(),
                probes_in_flight: 0,
                probe_successes: 0,
                total_successes: 0,
                total_failures: 0,
                total_rejections: 0,
                times_opened: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current state, applying an elapsed cooldown first.
    pub fn state(&self) -> CircuitState {
        let mut st = self.lock();
        self.maybe_half_open(&mut st);
        st.state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let mut st = self.lock();
        self.maybe_half_open(&mut st);
        self.prune(&mut st, Instant::now());
        CircuitSnapshot {
            name: self.config.name.clone(),
            state: st.state,
            failures_in_window: st.failures.len(),
            probes_in_flight: st.probes_in_flight,
            total_successes: st.total_successes,
            total_failures: st.total_failures,
            total_rejections: st.total_rejections,
            times_opened: st.times_opened,
            ms_since_transition: st.last_transition.elapsed().as_millis() as u64,
        }
    }

    /// Ask to make one call. Fails with `CallError::CircuitOpen` without side
    /// effects on the backend.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, CallError> {
        let mut st = self.lock();

        if !self.config.enabled {
            return Ok(CallPermit::new(self, st.generation, false));
        }

        self.maybe_half_open(&mut st);
        match st.state {
            CircuitState::Closed => Ok(CallPermit::new(self, st.generation, false)),
            CircuitState::HalfOpen if st.probes_in_flight < self.config.half_open_max_probes => {
                st.probes_in_flight += 1;
                tracing::debug!(breaker = %self.config.name, "Admitting half-open probe");
                Ok(CallPermit::new(self, st.generation, true))
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                st.total_rejections += 1;
                Err(CallError::CircuitOpen)
            }
        }
    }

    /// Guard one call: acquire a permit, run `call`, classify and record the result.
    pub async fn call<T, F, Fut>(&self, call: F) -> Result<T, CallError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let permit = self.try_acquire()?;
        let result = call().await;
        match &result {
            Ok(_) | Err(CallError::Backend(BackendError::Permanent(_))) => permit.success(),
            Err(CallError::Backend(_)) | Err(CallError::DeadlineExceeded) => permit.failure(),
            Err(CallError::Canceled) | Err(CallError::CircuitOpen) => drop(permit),
        }
        result
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }

    fn maybe_half_open(&self, st: &mut BreakerState) {
        if st.state != CircuitState::Open {
            return;
        }
        let cooled = st
            .opened_at
            .is_some_and(|at| at.elapsed() >= self.config.cooldown());
        if cooled {
            self.transition(st, CircuitState::HalfOpen);
        }
    }

    fn prune(&self, st: &mut BreakerState, now: Instant) {
        let window = self.config.window();
        while let Some(&at) = st.failures.front() {
            if now.duration_since(at) >= window {
                st.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn settle(&self, generation: u64, probe: bool, verdict: Verdict) {
        let mut st = self.lock();
        match verdict {
            Verdict::Success => st.total_successes += 1,
            Verdict::Failure => st.total_failures += 1,
        }

        if !self.config.enabled {
            return;
        }
        if generation != st.generation {
            tracing::trace!(breaker = %self.config.name, "Ignoring result from a previous breaker generation");
            return;
        }

        match (st.state, verdict) {
            (CircuitState::Closed, Verdict::Failure) => {
                let now = Instant::now();
                st.failures.push_back(now);
                self.prune(&mut st, now);
                if st.failures.len() as u32 >= self.config.failure_threshold {
                    self.transition(&mut st, CircuitState::Open);
                }
            }
            (CircuitState::Closed, Verdict::Success) => {}
            (CircuitState::HalfOpen, Verdict::Success) if probe => {
                st.probes_in_flight = st.probes_in_flight.saturating_sub(1);
                st.probe_successes += 1;
                if st.probe_successes >= self.config.success_threshold {
                    self.transition(&mut st, CircuitState::Closed);
                }
            }
            (CircuitState::HalfOpen, Verdict::Failure) if probe => {
                self.transition(&mut st, CircuitState::Open);
            }
            (state, _) => {
                tracing::warn!(breaker = %self.config.name, state = %state, probe, "Unexpected breaker result ignored");
            }
        }
    }

    fn release_probe(&self, generation: u64) {
        let mut st = self.lock();
        if generation == st.generation && st.state == CircuitState::HalfOpen {
            st.probes_in_flight = st.probes_in_flight.saturating_sub(1);
        }
    }

    fn transition(&self, st: &mut BreakerState, to: CircuitState) {
        let from = st.state;
        assert!(
            from.can_transition_to(to),
            "illegal circuit transition {from} -> {to} on breaker '{}'",
            self.config.name
        );

        let now = Instant::now();
        st.state = to;
        st.generation += 1;
        st.last_transition = now;
        st.probes_in_flight = 0;
        st.probe_successes = 0;
        match to {
            CircuitState::Open => {
                st.opened_at = Some(now);
                st.times_opened += 1;
                st.failures.clear();
                tracing::warn!(
                    breaker = %self.config.name,
                    from = %from,
                    cooldown_ms = self.config.cooldown_ms,
                    "Circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.config.name, "Circuit half-open, probing backend");
            }
            CircuitState::Closed => {
                st.opened_at = None;
                st.failures.clear();
                tracing::info!(breaker = %self.config.name, "Circuit closed, backend recovered");
            }
        }

        metrics::record_circuit_transition(&self.config.name, from, to);
        metrics::set_circuit_state(&self.config.name, to);
    }
}

/// Permission to make one call, tied to the breaker generation that granted it.
///
/// Dropping an unsettled probe permit frees its probe slot without
/// counting a result.
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    probe: bool,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, generation: u64, probe: bool) -> Self {
        Self {
            breaker,
            generation,
            probe,
            settled: false,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, self.probe, Verdict::Success);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.settle(self.generation, self.probe, Verdict::Failure);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe(self.generation);
        }
    }
}
