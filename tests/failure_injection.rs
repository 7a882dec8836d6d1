//! Agent-side failures and how they surface to the coordinator.

use std::sync::Arc;
use std::time::Duration;

use lbfleet::lifecycle::{self, Shutdown};
use lbfleet::models::{AgentStatus, RequestStatus};
use lbfleet_sdk::{ChangeRequest, FleetClient};

mod common;

use common::MemoryApplier;

#[tokio::test]
async fn test_rejected_config_is_restored() {
    let config = common::fast_config();
    let coord = common::start_coordinator(&config).await;
    let applier = Arc::new(MemoryApplier::poisoned("bad"));
    let (agent, agent_url) = common::start_agent_with(&config, &coord.url, applier.clone()).await;

    let shutdown = Shutdown::new();
    let (abort, _supervisor) = lifecycle::channel(shutdown.clone(), Duration::from_millis(1));
    agent.startup(&abort, &shutdown).await.unwrap();

    let requests = coord.coordinator.requests();
    requests
        .enqueue(common::change("r1", "svc1", &["default"], &["10.0.0.1:80"], &[]))
        .await;
    coord.coordinator.worker().process_pending().await;
    assert_eq!(requests.get_response("r1").unwrap().status, RequestStatus::Success);

    requests
        .enqueue(common::change("r2", "svc1", &["default"], &["bad:1"], &[]))
        .await;
    coord.coordinator.worker().process_pending().await;

    let response = requests.get_response("r2").unwrap();
    assert_eq!(response.status, RequestStatus::Failure);
    assert_eq!(response.agent_responses["agent-1"].status_code, Some(400));
    assert_eq!(response.agent_responses["agent-1"].attempt, 1);
    assert!(response.message.unwrap().contains("invalid configuration"));

    // the previous config survives and the state is untouched
    assert_eq!(applier.content("svc1").as_deref(), Some("10.0.0.1:80"));
    assert!(!coord.coordinator.datastore().upstreams("svc1").contains_key("bad:1"));

    // the revert resynced the service, so the agent reports a clean config
    let status: AgentStatus = reqwest::get(format!("{}/status", agent_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(status.valid_config);
    assert_eq!(status.most_recent_request_id.as_deref(), Some("r1"));

    applier.corrupt("svc1", "bad:2");
    let cached: AgentStatus = reqwest::get(format!("{}/status", agent_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(cached.valid_config);

    let fresh: AgentStatus = reqwest::get(format!("{}/status?skipCache=true", agent_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(!fresh.valid_config);
    assert!(fresh.error_message.unwrap().contains("svc1 contains bad"));
}

#[tokio::test]
async fn test_failed_request_can_be_resubmitted() {
    let config = common::fast_config();
    let coord = common::start_coordinator(&config).await;

    let mut failing = config.clone();
    failing.testing.enabled = true;
    failing.testing.apply_fail_rate = 1.0;
    let applier = Arc::new(MemoryApplier::default());
    let (agent, _) = common::start_agent_with(&failing, &coord.url, applier.clone()).await;
    let shutdown = Shutdown::new();
    let (abort, _supervisor) = lifecycle::channel(shutdown.clone(), Duration::from_millis(1));
    agent.startup(&abort, &shutdown).await.unwrap();

    let client = FleetClient::new(&coord.url);
    let request = ChangeRequest::add("r1", "svc1", &["default"], &["10.0.0.1:80"]);
    client.enqueue(&request).await.unwrap();
    coord.coordinator.worker().process_pending().await;
    assert_eq!(client.get("r1").await.unwrap().status, lbfleet_sdk::RequestStatus::Failure);
    assert!(applier.content("svc1").is_none());

    let requeued = client.enqueue(&request).await.unwrap();
    assert_eq!(requeued.status, lbfleet_sdk::RequestStatus::InProgress);
    assert_eq!(client.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_auth_key_guards_both_roles() {
    let mut config = common::fast_config();
    config.auth.key = Some("s3cret".to_string());
    let coord = common::start_coordinator(&config).await;
    let agent = common::start_agent(&config, &coord.url, "lb1", "a1").await;

    let shutdown = Shutdown::new();
    let (abort, _supervisor) = lifecycle::channel(shutdown.clone(), Duration::from_millis(1));
    agent.agent.startup(&abort, &shutdown).await.unwrap();
    assert_eq!(coord.coordinator.registry().all().len(), 1);

    let anonymous = FleetClient::new(&coord.url);
    let request = ChangeRequest::add("r1", "svc1", &["lb1"], &["10.0.0.1:80"]);
    assert!(anonymous.enqueue(&request).await.is_err());

    let client = FleetClient::new(&coord.url).with_auth_key("s3cret");
    client.enqueue(&request).await.unwrap();
    coord.coordinator.worker().process_pending().await;
    assert_eq!(client.get("r1").await.unwrap().status, lbfleet_sdk::RequestStatus::Success);

    let unauthorized = reqwest::Client::new()
        .post(format!("{}/request/r1", agent.url))
        .send()
        .await
        .unwrap();
    assert_eq!(unauthorized.status(), reqwest::StatusCode::UNAUTHORIZED);
    let status = reqwest::get(format!("{}/status", agent.url)).await.unwrap();
    assert!(status.status().is_success());
}

#[tokio::test]
async fn test_unknown_request_on_agent() {
    let config = common::fast_config();
    let coord = common::start_coordinator(&config).await;
    let agent = common::start_agent(&config, &coord.url, "lb1", "a1").await;

    let response = reqwest::Client::new()
        .post(format!("{}/request/missing", agent.url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.unwrap(), "Request missing does not exist");
}
