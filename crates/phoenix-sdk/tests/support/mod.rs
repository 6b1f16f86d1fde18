#![allow(dead_code)]

//! Shared doubles and fixtures for the integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use phoenix_sdk::protocol::{
    Command, ProjectMap, ProposedAction, ProposedActionBatch, ResourceIndex, RiskLevel,
    SceneSummary, SchemaVersion, SessionStartSnapshotRequest, TaskStatus, TaskStatusResponse,
};
use phoenix_sdk::transport::{
    HttpRequest, HttpRequester, HttpResponse, RealtimeTransport, RealtimeTransportFactory,
    TransportEvent,
};
use phoenix_sdk::PhoenixError;

/// Opt-in log output for debugging a failing test; honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Requester double that replays a scripted sequence of responses and records
/// every request it saw.
pub struct ScriptedRequester {
    script: Mutex<VecDeque<Result<HttpResponse, phoenix_sdk::transport::TransportFailure>>>,
    requests: Mutex<Vec<HttpRequest>>,
    repeat_last: Option<Result<HttpResponse, phoenix_sdk::transport::TransportFailure>>,
}

impl ScriptedRequester {
    pub fn new(
        script: Vec<Result<HttpResponse, phoenix_sdk::transport::TransportFailure>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            repeat_last: None,
        })
    }

    /// Like [`ScriptedRequester::new`], but once the script is exhausted the
    /// final entry repeats forever.
    pub fn repeating(
        mut script: Vec<Result<HttpResponse, phoenix_sdk::transport::TransportFailure>>,
    ) -> Arc<Self> {
        let repeat_last = script.pop();
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            repeat_last,
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl HttpRequester for ScriptedRequester {
    async fn send(
        &self,
        request: HttpRequest,
    ) -> Result<HttpResponse, phoenix_sdk::transport::TransportFailure> {
        self.requests.lock().push(request);
        if let Some(next) = self.script.lock().pop_front() {
            return next;
        }
        self.repeat_last
            .clone()
            .expect("scripted requester ran out of responses")
    }
}

pub fn ok_response(body: Value) -> Result<HttpResponse, phoenix_sdk::transport::TransportFailure> {
    status_response(200, body, Vec::new())
}

pub fn status_response(
    status: u16,
    body: Value,
    headers: Vec<(String, String)>,
) -> Result<HttpResponse, phoenix_sdk::transport::TransportFailure> {
    Ok(HttpResponse {
        status,
        headers,
        body: body.to_string(),
    })
}

pub fn timeout_failure() -> Result<HttpResponse, phoenix_sdk::transport::TransportFailure> {
    Err(phoenix_sdk::transport::TransportFailure {
        timed_out: true,
        message: "deadline elapsed".into(),
    })
}

pub fn network_failure() -> Result<HttpResponse, phoenix_sdk::transport::TransportFailure> {
    Err(phoenix_sdk::transport::TransportFailure {
        timed_out: false,
        message: "connection refused".into(),
    })
}

/// Realtime transport double driven by a scripted event sequence. After the
/// script is exhausted it either reports a normal end or pends forever.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<TransportEvent>>,
    pend_when_empty: bool,
    shutdowns: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn ending(script: Vec<TransportEvent>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            pend_when_empty: false,
            shutdowns: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn pending(script: Vec<TransportEvent>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            pend_when_empty: true,
            shutdowns: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl RealtimeTransport for ScriptedTransport {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        if let Some(event) = self.script.lock().pop_front() {
            return Some(event);
        }
        if self.pend_when_empty {
            std::future::pending::<()>().await;
        }
        None
    }

    async fn shutdown(&mut self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory double handing out prepared transports in order and recording the
/// URLs it was asked to connect to.
pub struct ScriptedFactory {
    transports: Mutex<VecDeque<ScriptedTransport>>,
    urls: Mutex<Vec<String>>,
}

impl ScriptedFactory {
    pub fn new(transports: Vec<ScriptedTransport>) -> Arc<Self> {
        Arc::new(Self {
            transports: Mutex::new(transports.into()),
            urls: Mutex::new(Vec::new()),
        })
    }

    pub fn connect_count(&self) -> usize {
        self.urls.lock().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl RealtimeTransportFactory for ScriptedFactory {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<Box<dyn RealtimeTransport>, PhoenixError> {
        self.urls.lock().push(url.to_string());
        let transport = self
            .transports
            .lock()
            .pop_front()
            .ok_or_else(|| PhoenixError::network("no scripted transport left", true))?;
        Ok(Box::new(transport))
    }
}

pub fn snapshot_request(session_id: &str) -> SessionStartSnapshotRequest {
    let mut scenes = HashMap::new();
    scenes.insert(
        "res://main.tscn".to_string(),
        SceneSummary {
            root: "Main".into(),
            root_type: "Node2D".into(),
            children_summary: vec!["Player: CharacterBody2D".into()],
        },
    );
    SessionStartSnapshotRequest {
        schema_version: SchemaVersion::V1,
        event: "session_start".into(),
        session_id: session_id.into(),
        idempotency_key: format!("idem-{session_id}"),
        sent_at: "2026-01-01T00:00:00Z".into(),
        project_map: ProjectMap {
            name: "demo".into(),
            godot_version: "4.3".into(),
            main_scene: "res://main.tscn".into(),
            scenes,
            scripts: vec!["res://player.gd".into()],
            resources: ResourceIndex {
                audio: Vec::new(),
                sprites: vec!["res://player.png".into()],
                tilesets: Vec::new(),
            },
            file_hash: "abc123".into(),
            extras: Default::default(),
        },
    }
}

pub fn session_ack_json(session_id: &str) -> Value {
    json!({
        "schema_version": "v1",
        "event": "session_start_ack",
        "accepted": true,
        "session_id": session_id
    })
}

pub fn delta_ack_json(session_id: &str, sequence: u64) -> Value {
    json!({
        "schema_version": "v1",
        "event": "scene_changed_ack",
        "accepted": true,
        "session_id": session_id,
        "sequence": sequence
    })
}

pub fn action_batch(session_id: &str, plan_id: &str) -> ProposedActionBatch {
    ProposedActionBatch {
        schema_version: SchemaVersion::V1,
        session_id: session_id.into(),
        plan_id: plan_id.into(),
        actions: vec![ProposedAction {
            action_id: "act-1".into(),
            command: Command::ChatMessage {
                content: "add a player scene".into(),
                agent: "builder".into(),
            },
            risk_level: RiskLevel::Low,
            reason_code: "chat".into(),
            requires_approval: false,
        }],
        requires_approval: false,
        approval_summary: None,
        proposed_at: "2026-01-01T00:00:00Z".into(),
    }
}

pub fn ready_status(session_id: &str, plan_id: &str) -> TaskStatusResponse {
    TaskStatusResponse {
        schema_version: SchemaVersion::V1,
        plan_id: plan_id.into(),
        job_id: "job-1".into(),
        session_id: session_id.into(),
        status: TaskStatus::AwaitingApproval,
        tier: "standard".into(),
        updated_at: "2026-01-01T00:00:10Z".into(),
        proposed_action_batch: Some(action_batch(session_id, plan_id)),
    }
}

pub fn pending_status_json(session_id: &str, plan_id: &str) -> Value {
    json!({
        "schema_version": "v1",
        "plan_id": plan_id,
        "job_id": "job-1",
        "session_id": session_id,
        "status": "planning",
        "tier": "standard",
        "updated_at": "2026-01-01T00:00:05Z"
    })
}

pub fn ready_status_json(session_id: &str, plan_id: &str) -> Value {
    serde_json::to_value(ready_status(session_id, plan_id)).expect("status serializes")
}

pub fn plan_ready_event_json(plan_id: &str) -> Value {
    json!({
        "schema_version": "v1",
        "event": "plan.ready",
        "plan_id": plan_id,
        "action_count": 1,
        "requires_approval": false
    })
}

pub fn resync_required_event_json(session_id: &str) -> Value {
    json!({
        "schema_version": "v1",
        "event": "session.resync_required",
        "session_id": session_id,
        "reason": "sequence_gap",
        "last_confirmed_seq": 41
    })
}

pub fn negotiate_ack_json(session_id: &str, url: &str) -> Value {
    json!({
        "schema_version": "v1",
        "event": "realtime_negotiate_ack",
        "session_id": session_id,
        "user_id": "user-001",
        "url": url,
        "access_token": "rt-token",
        "groups": [format!("session.{session_id}")]
    })
}
