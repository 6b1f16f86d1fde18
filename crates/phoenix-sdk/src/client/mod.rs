//! High-level client: endpoint wrappers over the transport executor, the
//! legacy synchronous-result cache, and the task readiness race.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::config::PhoenixConfig;
use crate::error::{ErrorKind, PhoenixError};
use crate::protocol::{
    ApprovalDecisionRequest, AuthHandshakeResponse, CommandResponse, DeltaUpdateAcceptedResponse,
    DeltaUpdateRequest, LockReleaseResponse, LocksListResponse, ProposedActionBatch,
    RealtimeNegotiateRequest, RealtimeNegotiateResponse, SessionStartAcceptedResponse,
    SessionStartSnapshotRequest, TaskRequest, TaskRequestAcceptedResponse, TaskStatus,
    TaskStatusResponse, ToolInvokeRequest, ToolInvokeResponse, ToolListResponse,
};
use crate::protocol::events::RealtimeServerEvent;
use crate::transport::http::{HttpRequester, PhoenixTransport, RequestArgs, RequestOptions};
use crate::transport::realtime::RealtimeEvents;

const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'?')
    .add(b'&')
    .add(b'+');

/// Outcome of a task submission: the asynchronous acknowledgement, or an
/// old-style synchronous batch accepted only within the legacy cutoff
/// window.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskSubmission {
    Accepted(TaskRequestAcceptedResponse),
    Legacy(ProposedActionBatch),
}

/// Options for [`PhoenixClient::wait_for_plan_ready`].
#[derive(Clone, Default)]
pub struct WaitForPlanReadyOptions {
    pub timeout_ms: Option<u64>,
    pub realtime_wait_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub events: Option<RealtimeEvents>,
    pub status_request_options: Option<RequestOptions>,
}

const DEFAULT_READY_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_REALTIME_WAIT_MS: u64 = 10_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

pub struct PhoenixClient {
    transport: PhoenixTransport,
    legacy_cutoff: Option<DateTime<Utc>>,
    legacy_results: Mutex<HashMap<String, TaskStatusResponse>>,
}

impl PhoenixClient {
    pub fn new(config: PhoenixConfig) -> Self {
        let legacy_cutoff = config.legacy_sync_cutoff;
        Self {
            transport: PhoenixTransport::new(config),
            legacy_cutoff,
            legacy_results: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_requester(config: PhoenixConfig, requester: Arc<dyn HttpRequester>) -> Self {
        let legacy_cutoff = config.legacy_sync_cutoff;
        Self {
            transport: PhoenixTransport::with_requester(config, requester),
            legacy_cutoff,
            legacy_results: Mutex::new(HashMap::new()),
        }
    }

    pub fn transport(&self) -> &PhoenixTransport {
        &self.transport
    }

    pub async fn session_start(
        &self,
        request: &SessionStartSnapshotRequest,
        options: Option<RequestOptions>,
    ) -> Result<SessionStartAcceptedResponse, PhoenixError> {
        request.validate()?;
        self.transport
            .request(
                RequestArgs::post("/api/v1/session/start", encode_body(request)?)
                    .with_options(options),
            )
            .await
    }

    pub async fn session_delta(
        &self,
        request: &DeltaUpdateRequest,
        options: Option<RequestOptions>,
    ) -> Result<DeltaUpdateAcceptedResponse, PhoenixError> {
        request.validate()?;
        self.transport
            .request(
                RequestArgs::post("/api/v1/session/delta", encode_body(request)?)
                    .with_options(options),
            )
            .await
    }

    /// Submit a task. Servers normally acknowledge with `202`-style
    /// asynchronous acceptance; within the legacy cutoff window an old-style
    /// synchronous batch is accepted and cached for the readiness fast path.
    pub async fn task_request(
        &self,
        request: &TaskRequest,
        options: Option<RequestOptions>,
    ) -> Result<TaskSubmission, PhoenixError> {
        let payload = self
            .transport
            .request_value(
                RequestArgs::post("/api/v1/task/request", encode_body(request)?)
                    .with_options(options),
            )
            .await?;

        match serde_json::from_value::<TaskRequestAcceptedResponse>(payload.clone()) {
            Ok(ack) => Ok(TaskSubmission::Accepted(ack)),
            Err(ack_error) => {
                if self.legacy_window_open() {
                    if let Ok(batch) = serde_json::from_value::<ProposedActionBatch>(payload) {
                        batch.validate()?;
                        tracing::debug!(
                            plan_id = %batch.plan_id,
                            "caching legacy synchronous task result"
                        );
                        self.legacy_results
                            .lock()
                            .insert(batch.plan_id.clone(), synthesize_status(&batch));
                        return Ok(TaskSubmission::Legacy(batch));
                    }
                }
                Err(PhoenixError::validation(
                    "response validation failed for POST /api/v1/task/request",
                )
                .with_details(json!({ "error": ack_error.to_string() })))
            }
        }
    }

    pub async fn task_status(
        &self,
        plan_id: &str,
        options: Option<RequestOptions>,
    ) -> Result<TaskStatusResponse, PhoenixError> {
        let path = format!("/api/v1/task/{}", encode_segment(plan_id));
        self.transport
            .request(RequestArgs::get(path).with_options(options))
            .await
    }

    pub async fn task_approval(
        &self,
        plan_id: &str,
        request: &ApprovalDecisionRequest,
        options: Option<RequestOptions>,
    ) -> Result<CommandResponse, PhoenixError> {
        request.validate()?;
        let path = format!("/api/v1/task/{}/approval", encode_segment(plan_id));
        self.transport
            .request(RequestArgs::post(path, encode_body(request)?).with_options(options))
            .await
    }

    pub async fn auth_handshake(
        &self,
        options: Option<RequestOptions>,
    ) -> Result<AuthHandshakeResponse, PhoenixError> {
        self.transport
            .request(RequestArgs::post("/api/v1/auth/handshake", json!({})).with_options(options))
            .await
    }

    pub async fn tools_list(
        &self,
        options: Option<RequestOptions>,
    ) -> Result<ToolListResponse, PhoenixError> {
        self.transport
            .request(RequestArgs::get("/api/v1/tools").with_options(options))
            .await
    }

    pub async fn tools_invoke(
        &self,
        request: &ToolInvokeRequest,
        options: Option<RequestOptions>,
    ) -> Result<ToolInvokeResponse, PhoenixError> {
        self.transport
            .request(
                RequestArgs::post("/api/v1/tools/invoke", encode_body(request)?)
                    .with_options(options),
            )
            .await
    }

    pub async fn realtime_negotiate(
        &self,
        request: &RealtimeNegotiateRequest,
        options: Option<RequestOptions>,
    ) -> Result<RealtimeNegotiateResponse, PhoenixError> {
        self.transport
            .request(
                RequestArgs::post("/api/v1/realtime/negotiate", encode_body(request)?)
                    .with_options(options),
            )
            .await
    }

    pub async fn locks_list(
        &self,
        options: Option<RequestOptions>,
    ) -> Result<LocksListResponse, PhoenixError> {
        self.transport
            .request(RequestArgs::get("/api/v1/locks").with_options(options))
            .await
    }

    pub async fn lock_release(
        &self,
        lock_id: &str,
        options: Option<RequestOptions>,
    ) -> Result<LockReleaseResponse, PhoenixError> {
        let path = format!("/api/v1/locks/{}/release", encode_segment(lock_id));
        self.transport
            .request(RequestArgs::post(path, json!({})).with_options(options))
            .await
    }

    /// Wait until the plan's proposed actions are available: race a realtime
    /// `plan.ready` signal against status polling, bounded by `timeout_ms`.
    pub async fn wait_for_plan_ready(
        &self,
        plan_id: &str,
        options: WaitForPlanReadyOptions,
    ) -> Result<TaskStatusResponse, PhoenixError> {
        if let Some(status) = self.take_legacy_result(plan_id) {
            tracing::debug!(plan_id, "plan ready from legacy synchronous result");
            return Ok(status);
        }

        let timeout_ms = options.timeout_ms.unwrap_or(DEFAULT_READY_TIMEOUT_MS);
        let realtime_wait_ms = options
            .realtime_wait_ms
            .unwrap_or(DEFAULT_REALTIME_WAIT_MS)
            .min(timeout_ms);
        let poll_interval = Duration::from_millis(
            options.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        );

        let started = Instant::now();
        let deadline = started + Duration::from_millis(timeout_ms);

        let saw_ready = match &options.events {
            Some(events) => {
                self.await_plan_ready_signal(events, plan_id, realtime_wait_ms)
                    .await
            }
            None => false,
        };

        if saw_ready {
            match self
                .task_status(plan_id, options.status_request_options.clone())
                .await
            {
                Ok(status) if status_is_ready(&status) => {
                    tracing::debug!(plan_id, "plan ready via realtime fast path");
                    return Ok(status);
                }
                Ok(_) => {}
                // Not yet visible despite the signal; polling covers it.
                Err(error) if error.kind == ErrorKind::Http && error.status == Some(404) => {}
                Err(error) => return Err(error),
            }
        }

        loop {
            match self
                .task_status(plan_id, options.status_request_options.clone())
                .await
            {
                Ok(status) if status_is_ready(&status) => return Ok(status),
                Ok(_) => {}
                // Not yet visible; keep polling.
                Err(error) if error.kind == ErrorKind::Http && error.status == Some(404) => {}
                Err(error) => return Err(error),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PhoenixError::timeout(
                    format!("timed out waiting for plan '{plan_id}' to become ready"),
                    false,
                ));
            }
            tokio::time::sleep(remaining.min(poll_interval)).await;
        }
    }

    /// Pull the realtime source until a matching ready signal, the source
    /// ends or fails, or the realtime budget elapses. Every individual pull
    /// is bounded by the remaining budget.
    async fn await_plan_ready_signal(
        &self,
        events: &RealtimeEvents,
        plan_id: &str,
        realtime_wait_ms: u64,
    ) -> bool {
        let deadline = Instant::now() + Duration::from_millis(realtime_wait_ms);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match tokio::time::timeout(remaining, events.next()).await {
                Err(_) => return false,
                Ok(Ok(None)) => return false,
                Ok(Err(error)) => {
                    // A broken channel is not fatal here; polling still
                    // resolves readiness.
                    tracing::debug!(
                        plan_id,
                        error = %error,
                        "realtime source failed while waiting, falling back to polling"
                    );
                    return false;
                }
                Ok(Ok(Some(RealtimeServerEvent::PlanReady(ready))))
                    if ready.plan_id == plan_id =>
                {
                    return true;
                }
                Ok(Ok(Some(_))) => {}
            }
        }
    }

    fn legacy_window_open(&self) -> bool {
        self.legacy_cutoff
            .map(|cutoff| Utc::now() < cutoff)
            .unwrap_or(false)
    }

    fn take_legacy_result(&self, plan_id: &str) -> Option<TaskStatusResponse> {
        if !self.legacy_window_open() {
            return None;
        }
        self.legacy_results.lock().remove(plan_id)
    }
}

fn status_is_ready(status: &TaskStatusResponse) -> bool {
    status.proposed_action_batch.is_some() || status.status.is_terminal()
}

/// Status record standing in for the asynchronous flow when a legacy server
/// answered synchronously.
fn synthesize_status(batch: &ProposedActionBatch) -> TaskStatusResponse {
    TaskStatusResponse {
        schema_version: batch.schema_version,
        plan_id: batch.plan_id.clone(),
        job_id: format!("legacy-{}", batch.plan_id),
        session_id: batch.session_id.clone(),
        status: if batch.requires_approval {
            TaskStatus::AwaitingApproval
        } else {
            TaskStatus::Approved
        },
        tier: "legacy".to_string(),
        updated_at: Utc::now().to_rfc3339(),
        proposed_action_batch: Some(batch.clone()),
    }
}

fn encode_body<T: Serialize>(body: &T) -> Result<Value, PhoenixError> {
    serde_json::to_value(body).map_err(|err| {
        PhoenixError::validation("request payload could not be serialized")
            .with_details(json!({ "error": err.to_string() }))
    })
}

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

#[async_trait::async_trait]
impl crate::session::SessionSyncClient for PhoenixClient {
    async fn session_start(
        &self,
        request: &SessionStartSnapshotRequest,
        options: Option<RequestOptions>,
    ) -> Result<SessionStartAcceptedResponse, PhoenixError> {
        PhoenixClient::session_start(self, request, options).await
    }

    async fn session_delta(
        &self,
        request: &DeltaUpdateRequest,
        options: Option<RequestOptions>,
    ) -> Result<DeltaUpdateAcceptedResponse, PhoenixError> {
        PhoenixClient::session_delta(self, request, options).await
    }
}

#[async_trait::async_trait]
impl crate::session::RuntimeClient for PhoenixClient {
    async fn realtime_negotiate(
        &self,
        request: &RealtimeNegotiateRequest,
        options: Option<RequestOptions>,
    ) -> Result<RealtimeNegotiateResponse, PhoenixError> {
        PhoenixClient::realtime_negotiate(self, request, options).await
    }

    async fn task_status(
        &self,
        plan_id: &str,
        options: Option<RequestOptions>,
    ) -> Result<TaskStatusResponse, PhoenixError> {
        PhoenixClient::task_status(self, plan_id, options).await
    }

    async fn wait_for_plan_ready(
        &self,
        plan_id: &str,
        options: WaitForPlanReadyOptions,
    ) -> Result<TaskStatusResponse, PhoenixError> {
        PhoenixClient::wait_for_plan_ready(self, plan_id, options).await
    }
}
