//! End-to-end delivery behaviour: retry classification, the retry budget,
//! circuit breaking and signed test deliveries.
//!
//! Run with: cargo test --test delivery_integration

mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use common::{spawn_receiver, test_config, MockTransport, TestHarness};
use persistence::DeliveryStore;
use domain::models::{
    AlertType, CircuitState, DeliveryOutcome, Endpoint, PublishRequest, RetryStatus,
};
use serde_json::json;
use shared::crypto::verify_signature;
use uuid::Uuid;
use webhook_engine_api::services::{ReqwestTransport, RetryResult};

async fn create_endpoint(harness: &TestHarness, form_id: Uuid, body: serde_json::Value) -> Endpoint {
    let request = serde_json::from_value(body).unwrap();
    harness
        .state
        .engine
        .create_endpoint(form_id, request)
        .await
        .unwrap()
}

fn event(form_id: Uuid) -> PublishRequest {
    PublishRequest {
        form_id,
        event_type: "form.submitted".into(),
        data: json!({ "email": "jane@example.com" }),
        source: None,
    }
}

async fn publish_and_wait(harness: &TestHarness, form_id: Uuid) {
    harness.state.engine.publish(event(form_id)).await.unwrap();
    harness.state.engine.wait_idle().await;
}

#[tokio::test]
async fn test_client_error_fails_without_retry() {
    let transport = Arc::new(MockTransport::always_status(404));
    let harness = TestHarness::new(test_config(&[]), transport.clone());
    let form_id = Uuid::new_v4();
    create_endpoint(
        &harness,
        form_id,
        json!({ "name": "crm", "url": "https://crm.example.com/hook", "event_types": ["*"] }),
    )
    .await;

    publish_and_wait(&harness, form_id).await;

    let attempts = harness.store.all_attempts().await;
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].outcome, DeliveryOutcome::TerminalFailure);
    assert_eq!(attempts[0].status_code, Some(404));
    assert!(!attempts[0].success);

    let tasks = harness.store.retry_tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, RetryStatus::Failed);
    assert_eq!(tasks[0].retry_count, 0);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_server_error_schedules_future_retry() {
    let transport = Arc::new(MockTransport::always_status(503));
    let harness = TestHarness::new(test_config(&[]), transport.clone());
    let form_id = Uuid::new_v4();
    create_endpoint(
        &harness,
        form_id,
        json!({ "name": "crm", "url": "https://crm.example.com/hook", "event_types": ["form.*"] }),
    )
    .await;

    let before = Utc::now();
    publish_and_wait(&harness, form_id).await;

    let attempts = harness.store.all_attempts().await;
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].outcome, DeliveryOutcome::RetryableFailure);
    assert_eq!(attempts[0].attempt_number, 1);

    let tasks = harness.store.retry_tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, RetryStatus::Pending);
    assert_eq!(tasks[0].retry_count, 0);
    assert!(tasks[0].next_retry_at > before);
    assert_eq!(tasks[0].delivery_id, attempts[0].delivery_id);
}

#[tokio::test]
async fn test_unsubscribed_endpoint_receives_nothing() {
    let transport = Arc::new(MockTransport::always_status(200));
    let harness = TestHarness::new(test_config(&[]), transport.clone());
    let form_id = Uuid::new_v4();
    create_endpoint(
        &harness,
        form_id,
        json!({ "name": "billing", "url": "https://billing.example.com/hook", "event_types": ["payment.*"] }),
    )
    .await;

    let receipt = harness.state.engine.publish(event(form_id)).await.unwrap();
    harness.state.engine.wait_idle().await;

    assert_eq!(receipt.endpoint_count, 0);
    assert_eq!(transport.calls(), 0);
    assert!(harness.store.all_attempts().await.is_empty());
}

#[tokio::test]
async fn test_retry_budget_bounds_attempts() {
    let transport = Arc::new(MockTransport::always_status(503));
    let harness = TestHarness::new(test_config(&[]), transport.clone());
    let form_id = Uuid::new_v4();
    create_endpoint(
        &harness,
        form_id,
        json!({
            "name": "crm",
            "url": "https://crm.example.com/hook",
            "event_types": ["*"],
            "max_retries": 2
        }),
    )
    .await;

    publish_and_wait(&harness, form_id).await;

    let scheduler = harness.state.retry_scheduler();
    for _ in 0..6 {
        scheduler.tick(Utc::now() + Duration::days(1)).await.unwrap();
    }

    // One initial attempt plus max_retries retries, never more.
    assert_eq!(transport.calls(), 3);
    let mut attempts = harness.store.all_attempts().await;
    attempts.sort_by_key(|a| a.attempt_number);
    assert_eq!(
        attempts.iter().map(|a| a.attempt_number).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(attempts.iter().all(|a| a.delivery_id == attempts[0].delivery_id));

    let tasks = harness.store.retry_tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, RetryStatus::Failed);
    assert_eq!(tasks[0].retry_count, 2);

    let alerts = harness
        .state
        .engine
        .list_alerts(form_id, true, 10)
        .await
        .unwrap();
    assert!(alerts
        .iter()
        .any(|a| a.alert_type == AlertType::RetryExhausted));
}

#[tokio::test]
async fn test_retry_recovers_after_transient_failure() {
    let transport = Arc::new(MockTransport::always_status(200));
    transport.push_status(502).await;
    let harness = TestHarness::new(test_config(&[]), transport.clone());
    let form_id = Uuid::new_v4();
    create_endpoint(
        &harness,
        form_id,
        json!({ "name": "crm", "url": "https://crm.example.com/hook", "event_types": ["*"] }),
    )
    .await;

    publish_and_wait(&harness, form_id).await;
    let processed = harness
        .state
        .retry_scheduler()
        .tick(Utc::now() + Duration::days(1))
        .await
        .unwrap();

    assert_eq!(processed, 1);
    assert_eq!(transport.calls(), 2);
    let tasks = harness.store.retry_tasks().await;
    assert_eq!(tasks[0].status, RetryStatus::Completed);

    let requests = transport.requests().await;
    assert_eq!(requests[0].body, requests[1].body);
    assert_eq!(requests[1].header("X-Webhook-Attempt"), Some("2"));
}

#[tokio::test]
async fn test_open_circuit_short_circuits_delivery() {
    let transport = Arc::new(MockTransport::always_timeout());
    let harness = TestHarness::new(
        test_config(&[("circuit_breaker.failure_threshold", "3")]),
        transport.clone(),
    );
    let form_id = Uuid::new_v4();
    let endpoint = create_endpoint(
        &harness,
        form_id,
        json!({ "name": "crm", "url": "https://crm.example.com/hook", "event_types": ["*"] }),
    )
    .await;

    for _ in 0..3 {
        publish_and_wait(&harness, form_id).await;
    }
    assert_eq!(transport.calls(), 3);

    let status = harness
        .state
        .engine
        .circuit_status(form_id, endpoint.id)
        .await
        .unwrap();
    assert_eq!(status.state, CircuitState::Open);
    assert!(status.next_reset_at.is_some());

    publish_and_wait(&harness, form_id).await;

    // The fourth event never reaches the network but is still logged.
    assert_eq!(transport.calls(), 3);
    let attempts = harness.store.all_attempts().await;
    assert_eq!(attempts.len(), 4);
    let short_circuited: Vec<_> = attempts
        .iter()
        .filter(|a| a.outcome == DeliveryOutcome::CircuitOpen)
        .collect();
    assert_eq!(short_circuited.len(), 1);
    assert_eq!(short_circuited[0].status_code, None);
    assert!(!short_circuited[0].success);

    let reset = harness
        .state
        .engine
        .reset_circuit(form_id, endpoint.id)
        .await
        .unwrap();
    assert_eq!(reset.state, CircuitState::Closed);
    assert_eq!(reset.consecutive_failures, 0);
}

#[tokio::test]
async fn test_endpoint_test_delivers_signed_request() {
    let (url, received) = spawn_receiver(200, StdDuration::from_millis(150)).await;
    let transport = Arc::new(ReqwestTransport::new("webhook-engine-test", 1024).unwrap());
    let harness = TestHarness::new(test_config(&[]), transport);
    let form_id = Uuid::new_v4();
    let endpoint = create_endpoint(
        &harness,
        form_id,
        json!({
            "name": "local",
            "url": url,
            "secret": "integration-secret",
            "event_types": ["payment.*"]
        }),
    )
    .await;

    let result = harness
        .state
        .engine
        .test_endpoint(form_id, endpoint.id)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.status_code, Some(200));
    assert_eq!(result.outcome, DeliveryOutcome::Success);
    assert!(result.response_time_ms >= 150);

    let attempts = harness.store.all_attempts().await;
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].event_type, "test");
    assert!(harness.store.retry_tasks().await.is_empty());

    let received = received.lock().await;
    assert_eq!(received.len(), 1);
    let signature = received[0]
        .headers
        .get("x-webhook-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(verify_signature(
        "integration-secret",
        received[0].body.as_bytes(),
        signature
    ));
    assert_eq!(
        received[0]
            .headers
            .get("x-webhook-event")
            .and_then(|v| v.to_str().ok()),
        Some("test")
    );
}

#[tokio::test]
async fn test_disabled_endpoint_abandons_pending_retry() {
    let transport = Arc::new(MockTransport::always_status(500));
    let harness = TestHarness::new(test_config(&[]), transport.clone());
    let form_id = Uuid::new_v4();
    let endpoint = create_endpoint(
        &harness,
        form_id,
        json!({ "name": "crm", "url": "https://crm.example.com/hook", "event_types": ["*"] }),
    )
    .await;

    publish_and_wait(&harness, form_id).await;
    let update = serde_json::from_value(json!({ "enabled": false })).unwrap();
    harness
        .state
        .engine
        .update_endpoint(form_id, endpoint.id, update)
        .await
        .unwrap();
    let processed = harness
        .state
        .retry_scheduler()
        .tick(Utc::now() + Duration::days(1))
        .await
        .unwrap();

    assert_eq!(processed, 1);
    assert_eq!(transport.calls(), 1);
    let tasks = harness.store.retry_tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, RetryStatus::Failed);
    assert_eq!(tasks[0].last_error.as_deref(), Some("endpoint disabled"));
    assert_eq!(tasks[0].retry_count, 0);
    assert_eq!(tasks[0].lease_id, None);
    assert_eq!(harness.store.all_attempts().await.len(), 1);
}

#[tokio::test]
async fn test_deleted_endpoint_drops_queued_retry() {
    let transport = Arc::new(MockTransport::always_status(500));
    let harness = TestHarness::new(test_config(&[]), transport.clone());
    let form_id = Uuid::new_v4();
    let endpoint = create_endpoint(
        &harness,
        form_id,
        json!({ "name": "crm", "url": "https://crm.example.com/hook", "event_types": ["*"] }),
    )
    .await;

    publish_and_wait(&harness, form_id).await;
    assert_eq!(harness.store.retry_tasks().await.len(), 1);
    harness
        .state
        .engine
        .delete_endpoint(form_id, endpoint.id)
        .await
        .unwrap();
    let processed = harness
        .state
        .retry_scheduler()
        .tick(Utc::now() + Duration::days(1))
        .await
        .unwrap();

    assert_eq!(processed, 0);
    assert_eq!(transport.calls(), 1);
    assert!(harness.store.retry_tasks().await.is_empty());
    // The log outlives the endpoint.
    assert_eq!(harness.store.all_attempts().await.len(), 1);
}

#[tokio::test]
async fn test_endpoint_deleted_mid_delivery_keeps_attempt_row() {
    let (url, received) = spawn_receiver(503, StdDuration::from_millis(300)).await;
    let transport = Arc::new(ReqwestTransport::new("webhook-engine-test", 1024).unwrap());
    let harness = TestHarness::new(test_config(&[]), transport);
    let form_id = Uuid::new_v4();
    let endpoint = create_endpoint(
        &harness,
        form_id,
        json!({ "name": "local", "url": url, "event_types": ["*"] }),
    )
    .await;

    harness.state.engine.publish(event(form_id)).await.unwrap();
    tokio::time::sleep(StdDuration::from_millis(100)).await;
    harness
        .state
        .engine
        .delete_endpoint(form_id, endpoint.id)
        .await
        .unwrap();
    harness.state.engine.wait_idle().await;

    assert_eq!(received.lock().await.len(), 1);
    let attempts = harness.store.all_attempts().await;
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].outcome, DeliveryOutcome::RetryableFailure);
    assert_eq!(attempts[0].status_code, Some(503));
    assert!(harness.store.retry_tasks().await.is_empty());
}

#[tokio::test]
async fn test_stale_claim_keeps_attempt_row_but_cannot_settle() {
    let transport = Arc::new(MockTransport::always_status(200));
    transport.push_status(503).await;
    let harness = TestHarness::new(test_config(&[]), transport.clone());
    let form_id = Uuid::new_v4();
    create_endpoint(
        &harness,
        form_id,
        json!({
            "name": "crm",
            "url": "https://crm.example.com/hook",
            "event_types": ["*"],
            "max_retries": 1
        }),
    )
    .await;
    publish_and_wait(&harness, form_id).await;

    // Claimant A's lease runs out and claimant B takes the task over.
    let t0 = Utc::now() + Duration::days(1);
    let lease = Duration::seconds(30);
    let mut first = harness.store.claim_due_retries(t0, 10, lease).await.unwrap();
    let mut second = harness
        .store
        .claim_due_retries(t0 + Duration::seconds(31), 10, lease)
        .await
        .unwrap();
    assert_eq!((first.len(), second.len()), (1, 1));
    let stale = first.remove(0);
    let live = second.remove(0);

    let engine = &harness.state.engine;
    assert_eq!(engine.retry(stale).await, RetryResult::Skipped);
    assert_eq!(transport.calls(), 2);
    assert_eq!(harness.store.all_attempts().await.len(), 2);
    let task = harness.store.get_retry_task(live.id).await.unwrap().unwrap();
    assert_eq!(task.status, RetryStatus::Processing);
    assert_eq!(task.lease_id, live.lease_id);

    assert_eq!(engine.retry(live.clone()).await, RetryResult::Completed);
    assert_eq!(transport.calls(), 3);
    assert_eq!(harness.store.all_attempts().await.len(), 3);
    let task = harness.store.get_retry_task(live.id).await.unwrap().unwrap();
    assert_eq!(task.status, RetryStatus::Completed);
}

#[tokio::test]
async fn test_short_circuited_retry_is_postponed_without_a_row() {
    let transport = Arc::new(MockTransport::always_status(503));
    let harness = TestHarness::new(
        test_config(&[("circuit_breaker.failure_threshold", "1")]),
        transport.clone(),
    );
    let form_id = Uuid::new_v4();
    create_endpoint(
        &harness,
        form_id,
        json!({ "name": "crm", "url": "https://crm.example.com/hook", "event_types": ["*"] }),
    )
    .await;
    publish_and_wait(&harness, form_id).await;

    let mut claimed = harness
        .store
        .claim_due_retries(Utc::now() + Duration::days(1), 10, Duration::seconds(180))
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    let task = claimed.remove(0);

    // The breaker opened on the first failure, so the retry never leaves.
    assert_eq!(
        harness.state.engine.retry(task.clone()).await,
        RetryResult::Postponed
    );
    assert_eq!(transport.calls(), 1);
    assert_eq!(harness.store.all_attempts().await.len(), 1);
    let stored = harness.store.get_retry_task(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RetryStatus::Pending);
    assert_eq!(stored.retry_count, 0);
    assert_eq!(stored.lease_id, None);
}

#[tokio::test]
async fn test_retries_are_not_claimed_without_a_free_worker() {
    let transport = Arc::new(MockTransport::always_status(200));
    transport.push_status(503).await;
    let harness = TestHarness::new(
        test_config(&[("delivery.worker_pool_size", "1")]),
        transport.clone(),
    );
    let form_id = Uuid::new_v4();
    create_endpoint(
        &harness,
        form_id,
        json!({ "name": "crm", "url": "https://crm.example.com/hook", "event_types": ["*"] }),
    )
    .await;
    publish_and_wait(&harness, form_id).await;

    let scheduler = harness.state.retry_scheduler();
    let due = Utc::now() + Duration::days(1);
    let busy = Arc::clone(harness.state.engine.workers())
        .acquire_owned()
        .await
        .unwrap();
    assert_eq!(scheduler.tick(due).await.unwrap(), 0);
    let tasks = harness.store.retry_tasks().await;
    assert_eq!(tasks[0].status, RetryStatus::Pending);
    assert_eq!(tasks[0].lease_id, None);

    drop(busy);
    assert_eq!(scheduler.tick(due).await.unwrap(), 1);
    assert_eq!(transport.calls(), 2);
    assert_eq!(
        harness.store.retry_tasks().await[0].status,
        RetryStatus::Completed
    );
    assert_eq!(harness.state.engine.workers().available_permits(), 1);
}

#[tokio::test]
async fn test_hanging_endpoint_times_out_and_frees_worker() {
    let transport = Arc::new(MockTransport::hanging());
    let harness = TestHarness::new(
        test_config(&[("delivery.worker_pool_size", "1")]),
        transport.clone(),
    );
    let form_id = Uuid::new_v4();
    create_endpoint(
        &harness,
        form_id,
        json!({
            "name": "slow",
            "url": "https://slow.example.com/hook",
            "event_types": ["*"],
            "timeout_secs": 1
        }),
    )
    .await;

    tokio::time::timeout(StdDuration::from_secs(10), publish_and_wait(&harness, form_id))
        .await
        .expect("a hanging endpoint must not stall the worker pool");

    assert_eq!(transport.calls(), 1);
    let attempts = harness.store.all_attempts().await;
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].outcome, DeliveryOutcome::RetryableFailure);
    assert_eq!(attempts[0].status_code, None);
    assert!(attempts[0].response_time_ms >= 1000);
    assert_eq!(
        attempts[0].error_message.as_deref(),
        Some("request timed out after 1s")
    );
    assert_eq!(harness.state.engine.workers().available_permits(), 1);
    assert_eq!(
        harness.store.retry_tasks().await[0].status,
        RetryStatus::Pending
    );
}
