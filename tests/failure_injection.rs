//! Failure injection tests: retries, error classification, timeouts and
//! backpressure refusals.

use std::time::Duration;

use request_pipeline::config::FullPolicy;
use request_pipeline::pipeline::{Outcome, Pipeline, RejectReason};
use request_pipeline::resilience::circuit_breaker::CircuitState;
use request_pipeline::BackendError;

mod common;
use common::{after_ms, test_config, Behavior, MockBackend, PANIC_PAYLOAD};

#[tokio::test(start_paused = true)]
async fn test_retry_on_failure() {
    let mut config = test_config();
    config.retries.max_attempts = 3;

    let (backend, probe) = MockBackend::new(Behavior::FailFirst(2));
    let pipeline = Pipeline::new(config, backend).unwrap();

    let completion = pipeline.submit(0, None).await.await;
    assert_eq!(completion.outcome, Outcome::Success(0));
    assert_eq!(completion.attempts, 3);
    assert_eq!(completion.retries(), 2);
    // 10ms then 20ms of backoff
    assert_eq!(completion.latency, Duration::from_millis(30));
    assert_eq!(probe.calls(), 3);
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_surface_last_error() {
    let mut config = test_config();
    config.retries.max_attempts = 3;
    config.circuit_breaker.enabled = false;

    let (backend, probe) = MockBackend::new(Behavior::FailTransient);
    let pipeline = Pipeline::new(config, backend).unwrap();

    let completion = pipeline.submit(0, None).await.await;
    assert_eq!(completion.outcome, Outcome::Failure(BackendError::Transient("call 2: 503".into())));
    assert_eq!(completion.attempts, 3);
    assert_eq!(probe.calls(), 3);
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_not_retried_and_not_counted() {
    let mut config = test_config();
    config.retries.max_attempts = 5;
    config.circuit_breaker.failure_threshold = 1;

    let (backend, probe) = MockBackend::new(Behavior::FailPermanent);
    let pipeline = Pipeline::new(config, backend).unwrap();

    let completion = pipeline.submit(0, None).await.await;
    assert!(matches!(completion.outcome, Outcome::Failure(BackendError::Permanent(_))));
    assert_eq!(completion.attempts, 1);
    assert_eq!(probe.calls(), 1);
    assert_eq!(pipeline.breaker().state(), CircuitState::Closed);
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_attempt_timeout_is_retried() {
    let mut config = test_config();
    config.retries.max_attempts = 3;
    config.timeouts.attempt_timeout_ms = Some(50);
    config.circuit_breaker.enabled = false;

    let (backend, probe) = MockBackend::new(Behavior::Succeed);
    let pipeline = Pipeline::new(config, backend).unwrap();

    let completion = pipeline.submit(100, None).await.await;
    assert_eq!(completion.outcome, Outcome::Failure(BackendError::Timeout));
    assert_eq!(completion.attempts, 3);
    assert_eq!(probe.calls(), 3);
    assert_eq!(probe.in_flight(), 0);
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_deadline_interrupts_backoff() {
    let mut config = test_config();
    config.retries.max_attempts = 5;
    config.retries.base_delay_ms = 1_000;
    config.retries.max_delay_ms = 1_000;

    let (backend, probe) = MockBackend::new(Behavior::FailTransient);
    let pipeline = Pipeline::new(config, backend).unwrap();

    let completion = pipeline.submit(0, after_ms(300)).await.await;
    assert_eq!(completion.outcome, Outcome::Timeout);
    assert_eq!(completion.attempts, 1);
    assert_eq!(completion.latency, Duration::from_millis(300));
    assert_eq!(probe.calls(), 1);
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_default_deadline_applies() {
    let mut config = test_config();
    config.timeouts.default_deadline_ms = Some(30);

    let (backend, _probe) = MockBackend::new(Behavior::Succeed);
    let pipeline = Pipeline::new(config, backend).unwrap();

    let completion = pipeline.submit(100, None).await.await;
    assert_eq!(completion.outcome, Outcome::Timeout);
    assert_eq!(completion.latency, Duration::from_millis(30));
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_gate_timeout() {
    let mut config = test_config();
    config.gate.max_in_flight = 1;
    config.gate.acquire_timeout_ms = Some(20);

    let (backend, _probe) = MockBackend::new(Behavior::Succeed);
    let pipeline = Pipeline::new(config, backend).unwrap();

    let holder = pipeline.submit(1_000, None).await;
    let waiter = pipeline.submit(0, None).await;

    let waited = waiter.await;
    assert_eq!(waited.outcome, Outcome::Rejected(RejectReason::GateTimeout));
    assert_eq!(waited.attempts, 0);
    assert_eq!(waited.latency, Duration::from_millis(20));
    assert_eq!(holder.await.outcome, Outcome::Success(1_000));
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_wait_mode_deadline_while_queued() {
    let mut config = test_config();
    config.queue.capacity = 1;
    config.queue.full_policy = FullPolicy::Wait;
    config.dispatcher.workers = 1;
    config.gate.max_in_flight = 1;

    let (backend, probe) = MockBackend::new(Behavior::Succeed);
    let pipeline = Pipeline::new(config, backend).unwrap();

    let running = pipeline.submit(1_000, None).await;
    // Let the worker take the first request off the queue.
    tokio::time::sleep(Duration::from_millis(1)).await;
    let queued = pipeline.submit(0, None).await;

    let refused = pipeline.submit(0, after_ms(50)).await;
    let refused = refused.await;
    assert_eq!(refused.outcome, Outcome::Rejected(RejectReason::DeadlineExceeded));
    assert_eq!(refused.latency, Duration::from_millis(50));

    assert_eq!(running.await.outcome, Outcome::Success(1_000));
    assert_eq!(queued.await.outcome, Outcome::Success(0));
    assert_eq!(probe.calls(), 2);
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_retry_settings_reload_live() {
    let mut config = test_config();
    config.retries.max_attempts = 1;
    config.circuit_breaker.enabled = false;

    let (backend, probe) = MockBackend::new(Behavior::FailFirst(2));
    let pipeline = Pipeline::new(config.clone(), backend).unwrap();

    let first = pipeline.submit(0, None).await.await;
    assert!(matches!(first.outcome, Outcome::Failure(_)));

    let mut next = config;
    next.retries.max_attempts = 4;
    assert!(pipeline.apply_reload(next).unwrap().is_empty());

    let second = pipeline.submit(0, None).await.await;
    assert_eq!(second.outcome, Outcome::Success(0));
    assert_eq!(second.attempts, 2);
    assert_eq!(probe.calls(), 3);
    pipeline.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_backend_panic_does_not_stall_the_worker() {
    let mut config = test_config();
    config.dispatcher.workers = 1;
    config.gate.max_in_flight = 1;

    let (backend, probe) = MockBackend::new(Behavior::Succeed);
    let pipeline = Pipeline::new(config, backend).unwrap();

    let crashed = pipeline.submit(PANIC_PAYLOAD, None).await.await;
    assert_eq!(crashed.outcome, Outcome::Rejected(RejectReason::Abandoned));

    let next = pipeline.submit(1, None).await;
    let next = tokio::time::timeout(Duration::from_secs(3_600), next)
        .await
        .expect("the only worker must keep serving after a panic");
    assert_eq!(next.outcome, Outcome::Success(1));

    let stats = pipeline.stats();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(probe.in_flight(), 0);
    assert_eq!(probe.calls(), 2);
    pipeline.shutdown().await;
}
