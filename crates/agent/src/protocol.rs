//! Core runtime data model: tool-call records, the event/timeline envelope,
//! todos, skills state, and the agent metadata and snapshot types that
//! together make up one agent's persisted state (see [`crate::store`]).

use atrium_provider::{ChatMessage, Usage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

/// State machine of one tool invocation. Legal transitions:
/// `Pending -> (ApprovalRequired -> {Approved|Denied})? -> Running ->
/// {Completed|Failed} -> Sealed?`. `Sealed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallState {
    Pending,
    ApprovalRequired,
    Approved,
    Denied,
    Running,
    Completed,
    Failed,
    Sealed,
}

impl ToolCallState {
    /// Whether moving from `self` to `next` is one of the legal edges of the
    /// grammar above.
    pub fn can_transition_to(self, next: ToolCallState) -> bool {
        use ToolCallState::*;
        matches!(
            (self, next),
            (Pending, ApprovalRequired)
                | (Pending, Running)
                | (ApprovalRequired, Approved)
                | (ApprovalRequired, Denied)
                | (Approved, Running)
                | (Denied, Completed) // denial is sealed into a failed ToolResult
                | (Denied, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Completed, Sealed)
                | (Failed, Sealed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApprovalInfo {
    pub required: bool,
    pub approval_id: Option<String>,
    pub decided_by: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub decided_at: Option<OffsetDateTime>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub state: ToolCallState,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub note: Option<String>,
}

/// Durable record of one tool invocation, keyed by `ToolUse.id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    pub state: ToolCallState,
    pub approval: ApprovalInfo,
    pub result: Option<String>,
    pub error: Option<String>,
    pub is_error: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub duration_ms: Option<u64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub audit_trail: Vec<AuditEntry>,
}

impl ToolCallRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        let now = OffsetDateTime::now_utc();
        let id = id.into();
        Self {
            id,
            name: name.into(),
            input,
            state: ToolCallState::Pending,
            approval: ApprovalInfo::default(),
            result: None,
            error: None,
            is_error: false,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            created_at: now,
            updated_at: now,
            audit_trail: vec![AuditEntry {
                state: ToolCallState::Pending,
                timestamp: now,
                note: None,
            }],
        }
    }

    /// Applies a state transition, rejecting illegal edges. On success,
    /// appends an audit entry and bumps `updated_at`.
    pub fn transition(
        &mut self,
        next: ToolCallState,
        note: Option<String>,
    ) -> Result<(), crate::error::AgentError> {
        if !self.state.can_transition_to(next) {
            return Err(crate::error::AgentError::InvariantViolation(format!(
                "illegal tool-call transition {:?} -> {:?} for {}",
                self.state, next, self.id
            )));
        }
        self.state = next;
        self.updated_at = OffsetDateTime::now_utc();
        self.audit_trail.push(AuditEntry {
            state: next,
            timestamp: self.updated_at,
            note,
        });
        Ok(())
    }
}

/// The three independent, per-channel ordered event streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Progress,
    Control,
    Monitor,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Progress => "progress",
            Channel::Control => "control",
            Channel::Monitor => "monitor",
        }
    }
}

/// A cursor into one channel: `(seq, timestamp)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub seq: u64,
    pub timestamp: i64,
}

/// Domain events carried on the three channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    TextDelta { text: String },
    ToolStart { call_id: String, name: String, input_preview: String, approval_id: Option<String> },
    ToolEnd { call_id: String, success: bool, error_summary: Option<String> },
    ToolError { call_id: String, error: String },
    PermissionRequired { call_id: String, tool_name: String, input_preview: String },
    PermissionDecision { call_id: String, approved: bool, note: Option<String> },
    MessagesChanged { message_count: usize },
    Done { reason: StopReason },
    RateLimited { attempt: usize, max_attempts: usize, wait_ms: u64 },
    ProviderTransient { message: String },
    Error { message: String },
    Lifecycle { detail: String },
}

/// A positioned envelope over a [`DomainEvent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeline {
    pub cursor: u64,
    pub bookmark: Bookmark,
    pub event: DomainEvent,
}

/// Terminal reasons the agent loop can stop a `Chat()` call with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxIterations,
    Cancelled,
    AwaitingApproval,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub title: String,
    pub status: TodoStatus,
    pub assignee: Option<String>,
    pub notes: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Invariant: at most one item is `InProgress`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TodoSnapshot {
    pub items: Vec<TodoItem>,
}

impl TodoSnapshot {
    pub fn set_status(&mut self, id: &str, status: TodoStatus) -> Result<(), crate::error::AgentError> {
        if status == TodoStatus::InProgress
            && self
                .items
                .iter()
                .any(|item| item.id != id && item.status == TodoStatus::InProgress)
        {
            return Err(crate::error::AgentError::InvariantViolation(
                "at most one todo item may be in_progress".into(),
            ));
        }
        let item = self
            .items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| crate::error::AgentError::Validation(format!("unknown todo id {id}")))?;
        item.status = status;
        item.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SkillsState {
    pub activated: HashMap<String, serde_json::Value>,
}

/// Persisted agent metadata. An agent's *existence* predicate is "meta is
/// persisted" — event logs or runtime files without meta don't count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub template_id: Option<String>,
    pub model: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_active_at: OffsetDateTime,
    pub runtime_config: serde_json::Value,
}

/// A consistent point-in-time copy of every entity in this module, for branching/restore.
/// Captured only between turns — never mid-tool-call (see DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub messages: Vec<ChatMessage>,
    pub tool_call_records: Vec<ToolCallRecord>,
    pub todos: TodoSnapshot,
    pub skills_state: SkillsState,
    pub info: AgentInfo,
}

/// Token usage accumulated across a turn, for Monitor reporting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TurnUsage {
    pub usage: Option<Usage>,
}
