//! Control-plane wire contracts.
//!
//! Every payload carries the `schema_version` discriminator and schemas are
//! strict: unknown fields are rejected at decode time, and cross-field rules
//! that serde cannot express are enforced by `validate()` before a request
//! is sent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PhoenixError;

pub mod events;

/// Literal `"v1"` discriminator present on every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SchemaVersion {
    #[default]
    #[serde(rename = "v1")]
    V1,
}

/// Editor commands proposed or returned by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    CreateFile {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data_base64: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        import_as: Option<String>,
    },
    ModifyText {
        file: String,
        search: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        replace: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        insert_after: Option<bool>,
    },
    CreateNode {
        parent: String,
        #[serde(rename = "type")]
        node_type: String,
        name: String,
        #[serde(default)]
        properties: Map<String, Value>,
    },
    ChatMessage {
        content: String,
        agent: String,
    },
    ExecuteLocalMcp {
        content: String,
        agent: String,
    },
}

impl Command {
    pub fn validate(&self) -> Result<(), PhoenixError> {
        match self {
            Command::CreateFile {
                content, data_base64, ..
            } if content.is_none() && data_base64.is_none() => Err(PhoenixError::validation(
                "create_file requires either content or data_base64",
            )),
            Command::ModifyText {
                replace, content, ..
            } if replace.is_none() && content.is_none() => Err(PhoenixError::validation(
                "modify_text requires either replace or content",
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SceneSummary {
    pub root: String,
    pub root_type: String,
    #[serde(default)]
    pub children_summary: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceIndex {
    #[serde(default)]
    pub audio: Vec<String>,
    #[serde(default)]
    pub sprites: Vec<String>,
    #[serde(default)]
    pub tilesets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectMap {
    pub name: String,
    pub godot_version: String,
    pub main_scene: String,
    pub scenes: std::collections::HashMap<String, SceneSummary>,
    #[serde(default)]
    pub scripts: Vec<String>,
    pub resources: ResourceIndex,
    pub file_hash: String,
    #[serde(default)]
    pub extras: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionStartSnapshotRequest {
    pub schema_version: SchemaVersion,
    pub event: String,
    pub session_id: String,
    pub idempotency_key: String,
    pub sent_at: String,
    pub project_map: ProjectMap,
}

impl SessionStartSnapshotRequest {
    pub fn validate(&self) -> Result<(), PhoenixError> {
        expect_event(&self.event, "session_start")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionStartAcceptedResponse {
    pub schema_version: SchemaVersion,
    pub event: String,
    pub accepted: bool,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddedNode {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub parent: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemovedNode {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModifiedProperty {
    pub node: String,
    pub property: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SceneDelta {
    #[serde(default)]
    pub added_nodes: Vec<AddedNode>,
    #[serde(default)]
    pub removed_nodes: Vec<RemovedNode>,
    #[serde(default)]
    pub modified_properties: Vec<ModifiedProperty>,
}

impl SceneDelta {
    pub fn is_empty(&self) -> bool {
        self.added_nodes.is_empty()
            && self.removed_nodes.is_empty()
            && self.modified_properties.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeltaUpdateRequest {
    pub schema_version: SchemaVersion,
    pub event: String,
    pub session_id: String,
    pub idempotency_key: String,
    pub sequence: u64,
    pub sent_at: String,
    pub scene: String,
    pub delta: SceneDelta,
}

impl DeltaUpdateRequest {
    pub fn validate(&self) -> Result<(), PhoenixError> {
        expect_event(&self.event, "scene_changed")?;
        if self.delta.is_empty() {
            return Err(PhoenixError::validation(
                "delta must include at least one change",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeltaUpdateAcceptedResponse {
    pub schema_version: SchemaVersion,
    pub event: String,
    pub accepted: bool,
    pub session_id: String,
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    Ask,
    Plan,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectContext {
    #[serde(default)]
    pub current_file: Option<String>,
    #[serde(default)]
    pub scene_tree: Map<String, Value>,
    #[serde(default)]
    pub open_files: Vec<String>,
    #[serde(default)]
    pub project_settings: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskRequest {
    pub schema_version: SchemaVersion,
    pub session_id: String,
    pub task_id: String,
    pub user_input: String,
    pub mode: TaskMode,
    pub submitted_at: String,
    pub project_context: ProjectContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskRequestAcceptedResponse {
    pub schema_version: SchemaVersion,
    pub event: String,
    pub accepted: bool,
    pub session_id: String,
    pub task_id: String,
    pub plan_id: String,
    pub job_id: String,
    pub status: String,
    pub tier: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Destructive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProposedAction {
    pub action_id: String,
    pub command: Command,
    pub risk_level: RiskLevel,
    pub reason_code: String,
    pub requires_approval: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProposedActionBatch {
    pub schema_version: SchemaVersion,
    pub session_id: String,
    pub plan_id: String,
    pub actions: Vec<ProposedAction>,
    pub requires_approval: bool,
    #[serde(default)]
    pub approval_summary: Option<String>,
    pub proposed_at: String,
}

impl ProposedActionBatch {
    pub fn validate(&self) -> Result<(), PhoenixError> {
        if self.actions.is_empty() {
            return Err(PhoenixError::validation(
                "proposed action batch requires at least one action",
            ));
        }
        for action in &self.actions {
            action.command.validate()?;
        }
        require_approval_summary(self.requires_approval, self.approval_summary.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApprovalDecisionRequest {
    pub schema_version: SchemaVersion,
    pub session_id: String,
    pub plan_id: String,
    pub decision: ApprovalDecision,
    #[serde(default)]
    pub approved_action_ids: Vec<String>,
    #[serde(default)]
    pub rejected_action_ids: Vec<String>,
    pub reviewer_id: String,
    pub decided_at: String,
}

impl ApprovalDecisionRequest {
    pub fn validate(&self) -> Result<(), PhoenixError> {
        let has_approved = !self.approved_action_ids.is_empty();
        let has_rejected = !self.rejected_action_ids.is_empty();
        match self.decision {
            ApprovalDecision::Approve if !has_approved || has_rejected => {
                Err(PhoenixError::validation(
                    "approve decision requires approved_action_ids and no rejected_action_ids",
                ))
            }
            ApprovalDecision::Reject if !has_rejected || has_approved => {
                Err(PhoenixError::validation(
                    "reject decision requires rejected_action_ids and no approved_action_ids",
                ))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandResponse {
    pub schema_version: SchemaVersion,
    pub session_id: String,
    pub plan_id: String,
    pub commands: Vec<Command>,
    pub requires_approval: bool,
    #[serde(default)]
    pub approval_summary: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl CommandResponse {
    pub fn validate(&self) -> Result<(), PhoenixError> {
        if self.commands.is_empty() {
            return Err(PhoenixError::validation(
                "command response requires at least one command",
            ));
        }
        require_approval_summary(self.requires_approval, self.approval_summary.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Byok,
    Managed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthHandshakeResponse {
    pub schema_version: SchemaVersion,
    pub event: String,
    pub mode: AuthMode,
    pub actor_id: String,
    pub token_fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolListResponse {
    pub schema_version: SchemaVersion,
    pub event: String,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolInvokeRequest {
    pub schema_version: SchemaVersion,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolInvokeResponse {
    pub schema_version: SchemaVersion,
    pub event: String,
    pub tool_name: String,
    #[serde(default)]
    pub output: Map<String, Value>,
    pub mode: AuthMode,
    pub actor_id: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RealtimeNegotiateRequest {
    pub schema_version: SchemaVersion,
    pub session_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RealtimeNegotiateResponse {
    pub schema_version: SchemaVersion,
    pub event: String,
    pub session_id: String,
    pub user_id: String,
    pub url: String,
    pub access_token: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Planning,
    AwaitingToolResults,
    AwaitingApproval,
    Approved,
    Executing,
    Done,
    Error,
}

impl TaskStatus {
    /// Terminal states end the readiness poll loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskStatusResponse {
    pub schema_version: SchemaVersion,
    pub plan_id: String,
    pub job_id: String,
    pub session_id: String,
    pub status: TaskStatus,
    pub tier: String,
    pub updated_at: String,
    #[serde(default)]
    pub proposed_action_batch: Option<ProposedActionBatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceLock {
    pub lock_id: String,
    pub resource_type: String,
    pub resource_path: String,
    pub lock_type: String,
    pub holder_type: String,
    pub holder_id: String,
    #[serde(default)]
    pub holder_display_name: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    pub acquired_at: String,
    pub expires_at: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocksListResponse {
    pub schema_version: SchemaVersion,
    pub locks: Vec<ResourceLock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockReleaseResponse {
    pub schema_version: SchemaVersion,
    pub event: String,
    pub released: bool,
    pub lock_id: String,
}

fn expect_event(actual: &str, expected: &str) -> Result<(), PhoenixError> {
    if actual == expected {
        Ok(())
    } else {
        Err(PhoenixError::validation(format!(
            "expected event '{expected}', got '{actual}'"
        )))
    }
}

fn require_approval_summary(
    requires_approval: bool,
    approval_summary: Option<&str>,
) -> Result<(), PhoenixError> {
    if requires_approval && approval_summary.map_or(true, str::is_empty) {
        return Err(PhoenixError::validation(
            "approval_summary is required when requires_approval is true",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_fields_are_rejected() {
        let payload = json!({
            "schema_version": "v1",
            "event": "session_start_ack",
            "accepted": true,
            "session_id": "sess-001",
            "surprise": 1
        });
        assert!(serde_json::from_value::<SessionStartAcceptedResponse>(payload).is_err());
    }

    #[test]
    fn schema_version_must_be_v1() {
        let payload = json!({
            "schema_version": "v2",
            "event": "session_start_ack",
            "accepted": true,
            "session_id": "sess-001"
        });
        assert!(serde_json::from_value::<SessionStartAcceptedResponse>(payload).is_err());
    }

    #[test]
    fn create_file_requires_some_content() {
        let command = Command::CreateFile {
            path: "res://main.gd".into(),
            content: None,
            data_base64: None,
            import_as: None,
        };
        assert!(command.validate().is_err());

        let command = Command::CreateFile {
            path: "res://main.gd".into(),
            content: Some("extends Node".into()),
            data_base64: None,
            import_as: None,
        };
        assert!(command.validate().is_ok());
    }

    #[test]
    fn empty_delta_is_invalid() {
        let request = DeltaUpdateRequest {
            schema_version: SchemaVersion::V1,
            event: "scene_changed".into(),
            session_id: "sess-001".into(),
            idempotency_key: "idem-1".into(),
            sequence: 1,
            sent_at: "2026-01-01T00:00:00Z".into(),
            scene: "res://main.tscn".into(),
            delta: SceneDelta::default(),
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn approval_decision_sets_must_match_the_decision() {
        let mut request = ApprovalDecisionRequest {
            schema_version: SchemaVersion::V1,
            session_id: "sess-001".into(),
            plan_id: "plan-001".into(),
            decision: ApprovalDecision::Approve,
            approved_action_ids: vec!["a-1".into()],
            rejected_action_ids: Vec::new(),
            reviewer_id: "user-001".into(),
            decided_at: "2026-01-01T00:00:00Z".into(),
        };
        assert!(request.validate().is_ok());

        request.rejected_action_ids.push("a-2".into());
        assert!(request.validate().is_err());

        request.decision = ApprovalDecision::Reject;
        request.approved_action_ids.clear();
        assert!(request.validate().is_ok());
    }

    #[test]
    fn approval_summary_is_required_when_approval_is() {
        assert!(require_approval_summary(true, None).is_err());
        assert!(require_approval_summary(true, Some("")).is_err());
        assert!(require_approval_summary(true, Some("two risky edits")).is_ok());
        assert!(require_approval_summary(false, None).is_ok());
    }

    #[test]
    fn task_status_terminal_states() {
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
        assert!(!TaskStatus::Planning.is_terminal());
    }
}
