mod support;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use phoenix_sdk::protocol::{ProjectContext, SchemaVersion, TaskMode, TaskRequest, TaskStatus};
use phoenix_sdk::transport::{RealtimeEvents, RealtimeOptions, TransportEvent};
use phoenix_sdk::{
    ErrorKind, PhoenixClient, PhoenixConfig, TaskSubmission, WaitForPlanReadyOptions,
};

use support::{
    ok_response, pending_status_json, plan_ready_event_json, ready_status_json, status_response,
    ScriptedFactory, ScriptedRequester, ScriptedTransport,
};

const SESSION: &str = "sess-001";

fn config() -> PhoenixConfig {
    PhoenixConfig::new("http://127.0.0.1:8000").with_token("local-token")
}

fn task_request(task_id: &str) -> TaskRequest {
    TaskRequest {
        schema_version: SchemaVersion::V1,
        session_id: SESSION.into(),
        task_id: task_id.into(),
        user_input: "add a player scene".into(),
        mode: TaskMode::Agent,
        submitted_at: "2026-01-01T00:00:00Z".into(),
        project_context: ProjectContext::default(),
    }
}

async fn realtime_from(script: Vec<TransportEvent>) -> RealtimeEvents {
    let factory = ScriptedFactory::new(vec![ScriptedTransport::pending(script)]);
    RealtimeEvents::connect(
        RealtimeOptions::new("wss://rt.example.com/hub")
            .with_websocket_factory(factory)
            .without_default_transports(),
    )
    .await
    .expect("connects")
}

#[tokio::test(start_paused = true)]
async fn realtime_signal_short_circuits_to_a_single_status_fetch() {
    let requester = ScriptedRequester::new(vec![ok_response(ready_status_json(SESSION, "plan-1"))]);
    let client = PhoenixClient::with_requester(config(), requester.clone());
    let events = realtime_from(vec![TransportEvent::Message(
        plan_ready_event_json("plan-1").to_string(),
    )])
    .await;

    let status = client
        .wait_for_plan_ready(
            "plan-1",
            WaitForPlanReadyOptions {
                timeout_ms: Some(5_000),
                events: Some(events),
                ..WaitForPlanReadyOptions::default()
            },
        )
        .await
        .expect("plan ready");

    assert_eq!(status.status, TaskStatus::AwaitingApproval);
    assert!(status.proposed_action_batch.is_some());
    assert_eq!(requester.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn ready_signals_for_other_plans_are_skipped() {
    let requester = ScriptedRequester::new(vec![ok_response(ready_status_json(SESSION, "plan-1"))]);
    let client = PhoenixClient::with_requester(config(), requester.clone());
    let events = realtime_from(vec![
        TransportEvent::Message(plan_ready_event_json("plan-other").to_string()),
        TransportEvent::Message(plan_ready_event_json("plan-1").to_string()),
    ])
    .await;

    client
        .wait_for_plan_ready(
            "plan-1",
            WaitForPlanReadyOptions {
                timeout_ms: Some(5_000),
                events: Some(events),
                ..WaitForPlanReadyOptions::default()
            },
        )
        .await
        .expect("plan ready");

    assert_eq!(requester.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn polling_tolerates_missing_status_until_it_appears() {
    let requester = ScriptedRequester::new(vec![
        status_response(404, json!({ "detail": "not found" }), Vec::new()),
        status_response(404, json!({ "detail": "not found" }), Vec::new()),
        ok_response(ready_status_json(SESSION, "plan-2")),
    ]);
    let client = PhoenixClient::with_requester(config(), requester.clone());

    let status = client
        .wait_for_plan_ready(
            "plan-2",
            WaitForPlanReadyOptions {
                timeout_ms: Some(1_000),
                poll_interval_ms: Some(10),
                ..WaitForPlanReadyOptions::default()
            },
        )
        .await
        .expect("plan eventually ready");

    assert_eq!(status.plan_id, "plan-2");
    assert_eq!(requester.request_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn pending_statuses_keep_the_poll_loop_going() {
    let requester = ScriptedRequester::new(vec![
        ok_response(pending_status_json(SESSION, "plan-3")),
        ok_response(ready_status_json(SESSION, "plan-3")),
    ]);
    let client = PhoenixClient::with_requester(config(), requester.clone());

    client
        .wait_for_plan_ready(
            "plan-3",
            WaitForPlanReadyOptions {
                timeout_ms: Some(1_000),
                poll_interval_ms: Some(10),
                ..WaitForPlanReadyOptions::default()
            },
        )
        .await
        .expect("ready on the second poll");

    assert_eq!(requester.request_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_deadline_names_the_plan_in_a_non_retriable_timeout() {
    let requester = ScriptedRequester::repeating(vec![status_response(
        404,
        json!({ "detail": "not found" }),
        Vec::new(),
    )]);
    let client = PhoenixClient::with_requester(config(), requester);

    let error = client
        .wait_for_plan_ready(
            "plan-lost",
            WaitForPlanReadyOptions {
                timeout_ms: Some(50),
                poll_interval_ms: Some(10),
                ..WaitForPlanReadyOptions::default()
            },
        )
        .await
        .expect_err("never becomes ready");

    assert_eq!(error.kind, ErrorKind::Timeout);
    assert!(!error.retriable);
    assert!(error.message.contains("plan-lost"));
}

#[tokio::test(start_paused = true)]
async fn silent_realtime_source_falls_back_to_polling() {
    let requester = ScriptedRequester::new(vec![
        status_response(404, json!({ "detail": "not found" }), Vec::new()),
        ok_response(ready_status_json(SESSION, "plan-4")),
    ]);
    let client = PhoenixClient::with_requester(config(), requester.clone());
    let events = realtime_from(Vec::new()).await;

    let status = client
        .wait_for_plan_ready(
            "plan-4",
            WaitForPlanReadyOptions {
                timeout_ms: Some(1_000),
                realtime_wait_ms: Some(20),
                poll_interval_ms: Some(10),
                events: Some(events),
                ..WaitForPlanReadyOptions::default()
            },
        )
        .await
        .expect("polling resolves readiness");

    assert_eq!(status.plan_id, "plan-4");
    assert_eq!(requester.request_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn accepted_submission_is_returned_as_is() {
    let requester = ScriptedRequester::new(vec![ok_response(json!({
        "schema_version": "v1",
        "event": "task_request_ack",
        "accepted": true,
        "session_id": SESSION,
        "task_id": "task-1",
        "plan_id": "plan-5",
        "job_id": "job-5",
        "status": "queued",
        "tier": "standard"
    }))]);
    let client = PhoenixClient::with_requester(config(), requester);

    match client
        .task_request(&task_request("task-1"), None)
        .await
        .expect("accepted")
    {
        TaskSubmission::Accepted(ack) => {
            assert_eq!(ack.plan_id, "plan-5");
            assert_eq!(ack.status, "queued");
        }
        TaskSubmission::Legacy(batch) => panic!("unexpected legacy batch: {batch:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn legacy_batch_is_cached_and_served_without_another_fetch() {
    let batch = support::action_batch(SESSION, "plan-legacy");
    let requester = ScriptedRequester::new(vec![ok_response(
        serde_json::to_value(&batch).expect("batch serializes"),
    )]);
    let config = config().with_legacy_sync_cutoff(Utc::now() + ChronoDuration::hours(1));
    let client = PhoenixClient::with_requester(config, requester.clone());

    match client
        .task_request(&task_request("task-2"), None)
        .await
        .expect("legacy accepted")
    {
        TaskSubmission::Legacy(returned) => assert_eq!(returned, batch),
        TaskSubmission::Accepted(ack) => panic!("unexpected ack: {ack:?}"),
    }

    let status = client
        .wait_for_plan_ready("plan-legacy", WaitForPlanReadyOptions::default())
        .await
        .expect("served from the legacy cache");

    assert_eq!(status.tier, "legacy");
    assert_eq!(status.proposed_action_batch, Some(batch));
    assert_eq!(requester.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn legacy_batch_is_rejected_after_the_cutoff() {
    let batch = support::action_batch(SESSION, "plan-late");
    let requester = ScriptedRequester::new(vec![ok_response(
        serde_json::to_value(&batch).expect("batch serializes"),
    )]);
    let client = PhoenixClient::with_requester(config(), requester);

    let error = client
        .task_request(&task_request("task-3"), None)
        .await
        .expect_err("legacy shape no longer accepted");

    assert_eq!(error.kind, ErrorKind::Validation);
}
