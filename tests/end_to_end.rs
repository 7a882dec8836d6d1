//! Coordinator and agents talking over real HTTP.

use std::time::Duration;

use lbfleet::config::StaticAgentConfig;
use lbfleet::lifecycle::{self, Shutdown};
use lbfleet_sdk::{ChangeRequest, FleetClient, RequestStatus};

mod common;

async fn register(agent: &common::TestAgent) {
    let shutdown = Shutdown::new();
    let (abort, _supervisor) = lifecycle::channel(shutdown.clone(), Duration::from_millis(1));
    agent.agent.startup(&abort, &shutdown).await.unwrap();
}

#[tokio::test]
async fn test_change_reaches_agent_config() {
    let config = common::fast_config();
    let coord = common::start_coordinator(&config).await;
    let agent = common::start_agent(&config, &coord.url, "lb1", "a1").await;
    register(&agent).await;
    assert_eq!(coord.coordinator.registry().all().len(), 1);

    let client = FleetClient::new(&coord.url);
    let queued = client
        .enqueue(&ChangeRequest::add("r1", "svc1", &["lb1"], &["10.0.0.1:80"]))
        .await
        .unwrap();
    assert_eq!(queued.status, RequestStatus::InProgress);
    assert_eq!(client.list().await.unwrap().len(), 1);

    assert_eq!(coord.coordinator.worker().process_pending().await, 1);

    let response = client.get("r1").await.unwrap();
    assert_eq!(response.status, RequestStatus::Success);
    assert_eq!(response.agent_responses["a1"].status_code, Some(200));
    assert!(client.list().await.unwrap().is_empty());

    let upstreams = coord.coordinator.datastore().upstreams("svc1");
    assert_eq!(upstreams.len(), 1);
    assert_eq!(upstreams["10.0.0.1:80"].request_id.as_deref(), Some("r1"));

    let conf = common::read_conf(&agent, "svc1").unwrap();
    assert!(conf.contains("server 10.0.0.1:80; # r1"));
    assert_eq!(agent.agent.shared().most_recent_request_id().as_deref(), Some("r1"));

    // resubmitting a finished request returns the recorded outcome
    let again = client
        .enqueue(&ChangeRequest::add("r1", "svc1", &["lb1"], &["10.0.0.1:80"]))
        .await
        .unwrap();
    assert_eq!(again.status, RequestStatus::Success);
    assert_eq!(coord.coordinator.worker().process_pending().await, 0);
}

#[tokio::test]
async fn test_removing_last_upstream_removes_config() {
    let config = common::fast_config();
    let coord = common::start_coordinator(&config).await;
    let agent = common::start_agent(&config, &coord.url, "lb1", "a1").await;
    register(&agent).await;
    let requests = coord.coordinator.requests();

    requests
        .enqueue(common::change("r1", "svc1", &["lb1"], &["10.0.0.1:80", "10.0.0.2:80"], &[]))
        .await;
    coord.coordinator.worker().process_pending().await;
    requests
        .enqueue(common::change("r2", "svc1", &["lb1"], &[], &["10.0.0.1:80"]))
        .await;
    coord.coordinator.worker().process_pending().await;

    let conf = common::read_conf(&agent, "svc1").unwrap();
    assert!(!conf.contains("10.0.0.1:80"));
    assert!(conf.contains("server 10.0.0.2:80; # r1"));

    requests
        .enqueue(common::change("r3", "svc1", &["lb1"], &[], &["10.0.0.2:80"]))
        .await;
    coord.coordinator.worker().process_pending().await;
    assert_eq!(requests.get_response("r3").unwrap().status, lbfleet::models::RequestStatus::Success);
    assert!(common::read_conf(&agent, "svc1").is_none());
    assert!(coord.coordinator.datastore().upstreams("svc1").is_empty());
}

#[tokio::test]
async fn test_one_failing_agent_reverts_the_others() {
    let config = common::fast_config();
    let coord = common::start_coordinator(&config).await;
    let good = common::start_agent(&config, &coord.url, "lb1", "a1").await;

    let mut failing = config.clone();
    failing.testing.enabled = true;
    failing.testing.apply_fail_rate = 1.0;
    let bad = common::start_agent(&failing, &coord.url, "lb1", "a2").await;
    register(&good).await;
    register(&bad).await;

    let client = FleetClient::new(&coord.url);
    client
        .enqueue(&ChangeRequest::add("r1", "svc1", &["lb1"], &["10.0.0.1:80"]))
        .await
        .unwrap();
    coord.coordinator.worker().process_pending().await;

    let response = client.get("r1").await.unwrap();
    assert_eq!(response.status, RequestStatus::Failure);
    let message = response.message.unwrap();
    assert!(message.contains("agent a2 (500): Random testing failure"), "{}", message);
    assert_eq!(response.agent_responses["a2"].attempt, 2);
    assert!(response.agent_responses["a1"].status_code == Some(200));

    assert!(coord.coordinator.datastore().service("svc1").is_none());
    assert!(common::read_conf(&good, "svc1").is_none());
    assert!(common::read_conf(&bad, "svc1").is_none());
}

#[tokio::test]
async fn test_unreachable_agent_fails_request() {
    let mut config = common::fast_config();
    config.coordinator.agents.push(StaticAgentConfig {
        group: "lb1".to_string(),
        agent_id: "ghost".to_string(),
        base_agent_uri: "http://127.0.0.1:1".to_string(),
    });
    let coord = common::start_coordinator(&config).await;

    let client = FleetClient::new(&coord.url);
    client
        .enqueue(&ChangeRequest::add("r1", "svc1", &["lb1"], &["10.0.0.1:80"]))
        .await
        .unwrap();
    coord.coordinator.worker().process_pending().await;

    let response = client.get("r1").await.unwrap();
    assert_eq!(response.status, RequestStatus::Failure);
    let ghost = &response.agent_responses["ghost"];
    assert_eq!(ghost.status_code, None);
    assert_eq!(ghost.attempt, 2);
    assert_eq!(coord.coordinator.datastore().version(), 0);
}

#[tokio::test]
async fn test_service_without_agents_is_committed() {
    let config = common::fast_config();
    let coord = common::start_coordinator(&config).await;

    let client = FleetClient::new(&coord.url);
    client
        .enqueue(&ChangeRequest::add("r1", "svc1", &["empty"], &["10.0.0.1:80"]))
        .await
        .unwrap();
    coord.coordinator.worker().process_pending().await;

    let response = client
        .wait_for_terminal("r1", Duration::from_millis(10), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(response.status, RequestStatus::Success);
    assert_eq!(response.message.as_deref(), Some("no agents"));
    assert_eq!(coord.coordinator.datastore().version(), 1);
}

#[tokio::test]
async fn test_cancel_before_dispatch() {
    let config = common::fast_config();
    let coord = common::start_coordinator(&config).await;
    let client = FleetClient::new(&coord.url);

    client
        .enqueue(&ChangeRequest::add("r1", "svc1", &["lb1"], &["10.0.0.1:80"]))
        .await
        .unwrap();
    let cancelled = client.cancel("r1").await.unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);

    assert!(coord.coordinator.worker().process("r1").await.is_none());
    assert_eq!(client.get("r1").await.unwrap().status, RequestStatus::Cancelled);
    assert_eq!(client.get("r9").await.unwrap().status, RequestStatus::NotExist);
}

#[tokio::test]
async fn test_cancel_races_dispatch() {
    let config = common::fast_config();
    let coord = common::start_coordinator(&config).await;
    let requests = coord.coordinator.requests().clone();
    requests
        .enqueue(common::change("r1", "svc1", &["empty"], &["10.0.0.1:80"], &[]))
        .await;

    let worker = coord.coordinator.worker().clone();
    let (cancelled, processed) = tokio::join!(requests.cancel("r1"), worker.process("r1"));

    use lbfleet::models::RequestStatus as Status;
    let recorded = requests.get_response("r1").unwrap().status;
    match processed {
        Some(response) => {
            assert_eq!(response.status, Status::Success);
            assert_ne!(cancelled.status, Status::Cancelled);
            assert_eq!(recorded, Status::Success);
        }
        None => {
            assert_eq!(cancelled.status, Status::Cancelled);
            assert_eq!(recorded, Status::Cancelled);
        }
    }
}

#[tokio::test]
async fn test_agent_status_before_monitoring() {
    let config = common::fast_config();
    let coord = common::start_coordinator(&config).await;
    let agent = common::start_agent(&config, &coord.url, "lb1", "a1").await;

    let status: serde_json::Value = reqwest::get(format!("{}/status", agent.url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["connectionState"], "UNKNOWN");
    assert_eq!(status["agentState"], "BOOTSTRAPPING");
    assert_eq!(status["validConfig"], true);
    assert_eq!(status["agentInfo"]["agentId"], "a1");

    register(&agent).await;
    let status: serde_json::Value = reqwest::get(format!("{}/status", agent.url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["agentState"], "ACCEPTING");
}

#[tokio::test]
async fn test_service_named_version_is_applied() {
    let config = common::fast_config();
    let coord = common::start_coordinator(&config).await;
    let agent = common::start_agent(&config, &coord.url, "lb1", "a1").await;
    register(&agent).await;

    coord
        .coordinator
        .requests()
        .enqueue(common::change("r1", "version", &["lb1"], &["10.0.0.1:80"], &[]))
        .await;
    coord.coordinator.worker().process_pending().await;

    let response = coord.coordinator.requests().get_response("r1").unwrap();
    assert_eq!(response.status, lbfleet::models::RequestStatus::Success, "{:?}", response.message);
    let conf = common::read_conf(&agent, "version").unwrap();
    assert!(conf.contains("server 10.0.0.1:80; # r1"));
}
