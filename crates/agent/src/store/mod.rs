//! WAL-protected persistence of runtime state plus an append-only event
//! log. [`file::FileStore`] is the on-disk implementation (see the store
//! layout notes in DESIGN.md); [`memory::MemoryStore`] is the in-memory
//! fake tests substitute at this boundary.

mod error;
pub mod file;
mod legacy;
pub mod memory;

pub use error::{StoreError, StoreResult};

use crate::protocol::{AgentInfo, Channel, Snapshot, SkillsState, Timeline, ToolCallRecord, TodoSnapshot};
use async_trait::async_trait;
use atrium_provider::ChatMessage;

/// Persistence boundary for one agent's runtime state and event log. Every
/// operation is async and cancellable by the caller's executor; callers
/// must order writes so that an event is appended *after* the state change
/// it describes, never before.
#[async_trait]
pub trait Store: Send + Sync {
    async fn exists(&self, agent_id: &str) -> StoreResult<bool>;

    async fn save_info(&self, agent_id: &str, info: &AgentInfo) -> StoreResult<()>;
    async fn load_info(&self, agent_id: &str) -> StoreResult<AgentInfo>;

    async fn save_messages(&self, agent_id: &str, messages: &[ChatMessage]) -> StoreResult<()>;
    async fn load_messages(&self, agent_id: &str) -> StoreResult<Vec<ChatMessage>>;

    async fn save_tool_call_records(
        &self,
        agent_id: &str,
        records: &[ToolCallRecord],
    ) -> StoreResult<()>;
    async fn load_tool_call_records(&self, agent_id: &str) -> StoreResult<Vec<ToolCallRecord>>;

    async fn save_todos(&self, agent_id: &str, todos: &TodoSnapshot) -> StoreResult<()>;
    async fn load_todos(&self, agent_id: &str) -> StoreResult<TodoSnapshot>;

    async fn save_skills_state(&self, agent_id: &str, state: &SkillsState) -> StoreResult<()>;
    async fn load_skills_state(&self, agent_id: &str) -> StoreResult<SkillsState>;

    /// Appends one record to `events/<channel>.log`. Retries transient
    /// contention with bounded exponential backoff before surfacing the
    /// error to the caller.
    async fn append_event(&self, agent_id: &str, channel: Channel, timeline: &Timeline) -> StoreResult<()>;

    /// Yields persisted Timelines in file order, skipping malformed lines,
    /// filtered to `seq > since.map(|b| b.seq).unwrap_or(0)`.
    async fn read_events(
        &self,
        agent_id: &str,
        channel: Channel,
        since_seq: Option<u64>,
    ) -> StoreResult<Vec<Timeline>>;

    async fn save_snapshot(&self, agent_id: &str, snapshot: &Snapshot) -> StoreResult<()>;
    async fn load_snapshot(&self, agent_id: &str, snapshot_id: &str) -> StoreResult<Snapshot>;
    async fn list_snapshots(&self, agent_id: &str) -> StoreResult<Vec<String>>;
    async fn delete_snapshot(&self, agent_id: &str, snapshot_id: &str) -> StoreResult<()>;

    /// Writes a timestamp-keyed JSON artifact under `history/<kind>/`.
    /// `name` is sanitised (path-invalid characters stripped) before use,
    /// per the `recovered/<safeName>_<ts>.json` naming rule.
    async fn save_history_artifact(
        &self,
        agent_id: &str,
        kind: HistoryArtifactKind,
        name: &str,
        value: &serde_json::Value,
    ) -> StoreResult<String>;

    async fn delete_agent(&self, agent_id: &str) -> StoreResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryArtifactKind {
    Window,
    Compression,
    Recovered,
}

impl HistoryArtifactKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            HistoryArtifactKind::Window => "windows",
            HistoryArtifactKind::Compression => "compressions",
            HistoryArtifactKind::Recovered => "recovered",
        }
    }
}

/// Strips path-invalid characters from a user- or tool-supplied name before
/// it is used as (part of) a filename.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Retry policy for [`Store::append_event`], per DESIGN.md: 3 attempts,
/// 50·2ⁿ ms backoff.
pub const APPEND_RETRY_ATTEMPTS: u32 = 3;
pub const APPEND_RETRY_BASE_MS: u64 = 50;
