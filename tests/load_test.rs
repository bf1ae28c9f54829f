//! Burst load tests: bounds on concurrency and queue occupancy under
//! parallel producers, and exactly-one-outcome accounting.

use futures_util::future::join_all;
use std::sync::Arc;

use request_pipeline::config::FullPolicy;
use request_pipeline::pipeline::{Outcome, Pipeline, RejectReason};

mod common;
use common::{test_config, Behavior, MockBackend};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_burst_respects_concurrency_and_capacity() {
    let mut config = test_config();
    config.queue.capacity = 16;
    config.queue.full_policy = FullPolicy::Wait;
    config.gate.max_in_flight = 4;
    config.dispatcher.workers = 8;

    let (backend, probe) = MockBackend::new(Behavior::Succeed);
    let pipeline = Arc::new(Pipeline::new(config, backend).unwrap());

    let producers = (0..300u32).map(|n| {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.submit(1 + n % 4, None).await.await })
    });
    let completions = join_all(producers).await;

    for completion in completions {
        let completion = completion.unwrap();
        assert!(completion.outcome.is_success(), "{:?}", completion.outcome);
    }
    assert_eq!(probe.calls(), 300);
    assert!(probe.peak_in_flight() <= 4, "peak backend concurrency {}", probe.peak_in_flight());

    let stats = pipeline.stats();
    assert!(stats.peak_in_flight <= 4);
    assert!(stats.peak_queue_depth <= 16);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reject_mode_burst_accounts_every_request() {
    let mut config = test_config();
    config.queue.capacity = 8;
    config.queue.full_policy = FullPolicy::Reject;
    config.gate.max_in_flight = 2;
    config.dispatcher.workers = 2;

    let (backend, probe) = MockBackend::new(Behavior::Succeed);
    let pipeline = Arc::new(Pipeline::new(config, backend).unwrap());

    let producers = (0..200).map(|_| {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.submit(5, None).await.await })
    });
    let completions: Vec<_> = join_all(producers)
        .await
        .into_iter()
        .map(|c| c.unwrap())
        .collect();

    let succeeded = completions.iter().filter(|c| c.outcome.is_success()).count();
    let refused = completions
        .iter()
        .filter(|c| c.outcome == Outcome::Rejected(RejectReason::QueueFull))
        .count();
    assert_eq!(succeeded + refused, 200, "every request gets exactly one outcome");
    assert!(refused > 0, "a burst of 200 must overflow a queue of 8");
    assert_eq!(probe.calls() as usize, succeeded);
    assert!(pipeline.stats().peak_queue_depth <= 8);
    assert!(probe.peak_in_flight() <= 2);
}
