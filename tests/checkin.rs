//! Agent check-in loop against scripted and real coordinators.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::post, Json, Router};
use lbfleet::agent::{CheckInAction, CheckInLoop, CoordinatorClient};
use lbfleet::config::{AuthConfig, HttpClientConfig, RetryConfig};
use lbfleet::lifecycle::Shutdown;
use lbfleet::models::{AgentMetadata, CheckInResponse, TrafficSourceState};
use lbfleet::resilience::RetryPolicy;

mod common;

/// Answers WAITING until `waits` calls have been seen, then DONE.
async fn scripted_coordinator(waits: u32, wait_ms: u64) -> (String, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let router = Router::new()
        .route(
            "/checkin/{group}/{action}",
            post(move |State(calls): State<Arc<AtomicU32>>| async move {
                let seen = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if seen > waits {
                    Json(CheckInResponse::done())
                } else {
                    Json(CheckInResponse::waiting(wait_ms))
                }
            }),
        )
        .with_state(calls.clone());
    (common::serve(router).await, calls)
}

fn check_in_loop(url: &str, timeout: Duration) -> CheckInLoop {
    let client = CoordinatorClient::new(&[url.to_string()], &AuthConfig::default(), &HttpClientConfig::default()).unwrap();
    let metadata = AgentMetadata {
        agent_id: "a1".to_string(),
        base_agent_uri: "http://127.0.0.1:8882".to_string(),
        domain: None,
    };
    let retry = RetryPolicy::new(
        2,
        &RetryConfig {
            base_delay_ms: 1,
            max_delay_ms: 5,
        },
    );
    CheckInLoop::new(Arc::new(client), metadata, "lb1", retry, timeout)
}

#[tokio::test]
async fn test_polls_until_done() {
    let (url, calls) = scripted_coordinator(2, 10).await;
    let outcome = check_in_loop(&url, Duration::from_secs(5))
        .notify_service(CheckInAction::Startup, None)
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.rounds, 3);
    assert_eq!(outcome.final_state, Some(TrafficSourceState::Done));
    assert!(!outcome.timed_out);
}

#[tokio::test]
async fn test_gives_up_at_deadline() {
    let (url, _calls) = scripted_coordinator(u32::MAX, 50).await;
    let outcome = check_in_loop(&url, Duration::from_millis(120))
        .notify_service(CheckInAction::Shutdown, None)
        .await
        .unwrap();

    assert!(outcome.timed_out);
    assert_eq!(outcome.final_state, Some(TrafficSourceState::Waiting));
}

#[tokio::test]
async fn test_shutdown_interrupts_wait() {
    let (url, calls) = scripted_coordinator(u32::MAX, 10_000).await;
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();
    });

    let outcome = check_in_loop(&url, Duration::from_secs(30))
        .notify_service(CheckInAction::Startup, Some(rx))
        .await
        .unwrap();
    assert!(outcome.interrupted);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unreachable_coordinator_is_an_error() {
    let err = check_in_loop("http://127.0.0.1:1", Duration::from_secs(1))
        .notify_service(CheckInAction::Startup, None)
        .await
        .unwrap_err();
    assert_eq!(err.attempts, 2);
}

#[tokio::test]
async fn test_drain_against_coordinator() {
    let mut config = common::fast_config();
    config.coordinator.drain_wait_ms = 100;
    config.coordinator.drain_poll_ms = 20;
    let coord = common::start_coordinator(&config).await;
    let check_in = check_in_loop(&coord.url, Duration::from_secs(5));

    check_in.notify_service(CheckInAction::Startup, None).await.unwrap();
    assert_eq!(coord.coordinator.registry().all().len(), 1);

    let outcome = check_in.notify_service(CheckInAction::Shutdown, None).await.unwrap();
    assert_eq!(outcome.final_state, Some(TrafficSourceState::Done));
    assert!(outcome.rounds >= 2);
    assert!(coord.coordinator.registry().all().is_empty());
}
