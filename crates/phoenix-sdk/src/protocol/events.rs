//! Realtime server event union.
//!
//! The union is closed: dispatch reads the `event` discriminator and decodes
//! the matching strict payload, so an unknown event name and an unknown
//! field both fail validation rather than being silently dropped.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::PhoenixError;
use crate::protocol::SchemaVersion;

macro_rules! event_payload {
    ($(#[$meta:meta])* $name:ident { $($field:ident: $ty:ty),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(deny_unknown_fields)]
        pub struct $name {
            pub schema_version: SchemaVersion,
            pub event: String,
            $(pub $field: $ty,)*
        }
    };
}

event_payload!(ChatDeltaEvent { plan_id: String, seq: u64, text: String });
event_payload!(ChatDoneEvent { plan_id: String });
event_payload!(OrchStepStartEvent {
    plan_id: String,
    step_id: String,
    agent: String,
    description: String,
});
event_payload!(OrchStepLogEvent { plan_id: String, step_id: String, message: String });
event_payload!(OrchStepEndEvent { plan_id: String, step_id: String, status: String });
event_payload!(JobQueuedEvent { job_id: String, plan_id: String, tier: String });
event_payload!(
    /// Emitted when a plan's proposed actions are ready for review; the
    /// readiness race matches on `plan_id`.
    PlanReadyEvent {
        plan_id: String,
        action_count: u64,
        requires_approval: bool,
    }
);
event_payload!(JobStartedEvent { job_id: String, worker_id: String });
event_payload!(JobDoneEvent { job_id: String, result_summary: String });
event_payload!(JobErrorEvent { job_id: String, error_code: String, message: String });
event_payload!(JobExpiredEvent { job_id: String, reason: String });
event_payload!(LockAcquiredEvent {
    session_id: String,
    resource_path: String,
    resource_type: String,
    agent_id: String,
    plan_id: String,
    expires_at: String,
});
event_payload!(LockReleasedEvent { session_id: String, resource_path: String, agent_id: String });
event_payload!(LockConflictEvent {
    session_id: String,
    resource_path: String,
    holder_agent_id: String,
    requester: String,
});
event_payload!(
    /// Server-side request for a full session resync; carries the last
    /// sequence number the server confirmed.
    SessionResyncRequiredEvent {
        session_id: String,
        reason: String,
        last_confirmed_seq: u64,
    }
);

/// Typed realtime event, discriminated by the wire `event` name.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeServerEvent {
    ChatDelta(ChatDeltaEvent),
    ChatDone(ChatDoneEvent),
    OrchStepStart(OrchStepStartEvent),
    OrchStepLog(OrchStepLogEvent),
    OrchStepEnd(OrchStepEndEvent),
    JobQueued(JobQueuedEvent),
    PlanReady(PlanReadyEvent),
    JobStarted(JobStartedEvent),
    JobDone(JobDoneEvent),
    JobError(JobErrorEvent),
    JobExpired(JobExpiredEvent),
    LockAcquired(LockAcquiredEvent),
    LockReleased(LockReleasedEvent),
    LockConflict(LockConflictEvent),
    SessionResyncRequired(SessionResyncRequiredEvent),
}

impl RealtimeServerEvent {
    /// Validate a raw payload into the typed union.
    pub fn from_value(value: Value) -> Result<Self, PhoenixError> {
        let Some(object) = value.as_object() else {
            return Err(PhoenixError::validation(
                "realtime event payload is not an object",
            ));
        };

        let Some(event) = object.get("event").and_then(Value::as_str) else {
            return Err(PhoenixError::validation(
                "realtime event payload is missing the event discriminator",
            ));
        };

        match event {
            "chat.delta" => decode(value).map(Self::ChatDelta),
            "chat.done" => decode(value).map(Self::ChatDone),
            "orch.step.start" => decode(value).map(Self::OrchStepStart),
            "orch.step.log" => decode(value).map(Self::OrchStepLog),
            "orch.step.end" => decode(value).map(Self::OrchStepEnd),
            "job.queued" => decode(value).map(Self::JobQueued),
            "plan.ready" => decode(value).map(Self::PlanReady),
            "job.started" => decode(value).map(Self::JobStarted),
            "job.done" => decode(value).map(Self::JobDone),
            "job.error" => decode(value).map(Self::JobError),
            "job.expired" => decode(value).map(Self::JobExpired),
            "lock.acquired" => decode(value).map(Self::LockAcquired),
            "lock.released" => decode(value).map(Self::LockReleased),
            "lock.conflict" => decode(value).map(Self::LockConflict),
            "session.resync_required" => decode(value).map(Self::SessionResyncRequired),
            other => Err(PhoenixError::validation(format!(
                "unknown realtime event '{other}'"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ChatDelta(_) => "chat.delta",
            Self::ChatDone(_) => "chat.done",
            Self::OrchStepStart(_) => "orch.step.start",
            Self::OrchStepLog(_) => "orch.step.log",
            Self::OrchStepEnd(_) => "orch.step.end",
            Self::JobQueued(_) => "job.queued",
            Self::PlanReady(_) => "plan.ready",
            Self::JobStarted(_) => "job.started",
            Self::JobDone(_) => "job.done",
            Self::JobError(_) => "job.error",
            Self::JobExpired(_) => "job.expired",
            Self::LockAcquired(_) => "lock.acquired",
            Self::LockReleased(_) => "lock.released",
            Self::LockConflict(_) => "lock.conflict",
            Self::SessionResyncRequired(_) => "session.resync_required",
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, PhoenixError> {
    serde_json::from_value(value).map_err(|err| {
        PhoenixError::validation("realtime event payload failed validation")
            .with_details(json!({ "error": err.to_string() }))
    })
}
