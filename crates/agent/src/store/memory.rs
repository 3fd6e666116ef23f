//! In-memory `Store` fake. Tests substitute this at the persistence
//! boundary instead of mocking the trait (see the dependency-inversion
//! design note in DESIGN.md).

use super::{HistoryArtifactKind, Store, StoreError, StoreResult};
use crate::protocol::{AgentInfo, Channel, Snapshot, SkillsState, Timeline, ToolCallRecord, TodoSnapshot};
use async_trait::async_trait;
use atrium_provider::ChatMessage;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct AgentState {
    info: Option<AgentInfo>,
    messages: Vec<ChatMessage>,
    tool_call_records: Vec<ToolCallRecord>,
    todos: TodoSnapshot,
    skills_state: SkillsState,
    progress: Vec<Timeline>,
    control: Vec<Timeline>,
    monitor: Vec<Timeline>,
    snapshots: HashMap<String, Snapshot>,
}

impl AgentState {
    fn channel(&mut self, channel: Channel) -> &mut Vec<Timeline> {
        match channel {
            Channel::Progress => &mut self.progress,
            Channel::Control => &mut self.control,
            Channel::Monitor => &mut self.monitor,
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    agents: Mutex<HashMap<String, AgentState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn exists(&self, agent_id: &str) -> StoreResult<bool> {
        Ok(self
            .agents
            .lock()
            .get(agent_id)
            .is_some_and(|state| state.info.is_some()))
    }

    async fn save_info(&self, agent_id: &str, info: &AgentInfo) -> StoreResult<()> {
        self.agents
            .lock()
            .entry(agent_id.to_string())
            .or_default()
            .info = Some(info.clone());
        Ok(())
    }

    async fn load_info(&self, agent_id: &str) -> StoreResult<AgentInfo> {
        self.agents
            .lock()
            .get(agent_id)
            .and_then(|state| state.info.clone())
            .ok_or_else(|| StoreError::AgentNotFound(agent_id.to_string()))
    }

    async fn save_messages(&self, agent_id: &str, messages: &[ChatMessage]) -> StoreResult<()> {
        self.agents
            .lock()
            .entry(agent_id.to_string())
            .or_default()
            .messages = messages.to_vec();
        Ok(())
    }

    async fn load_messages(&self, agent_id: &str) -> StoreResult<Vec<ChatMessage>> {
        Ok(self
            .agents
            .lock()
            .get(agent_id)
            .map(|state| state.messages.clone())
            .unwrap_or_default())
    }

    async fn save_tool_call_records(&self, agent_id: &str, records: &[ToolCallRecord]) -> StoreResult<()> {
        self.agents
            .lock()
            .entry(agent_id.to_string())
            .or_default()
            .tool_call_records = records.to_vec();
        Ok(())
    }

    async fn load_tool_call_records(&self, agent_id: &str) -> StoreResult<Vec<ToolCallRecord>> {
        Ok(self
            .agents
            .lock()
            .get(agent_id)
            .map(|state| state.tool_call_records.clone())
            .unwrap_or_default())
    }

    async fn save_todos(&self, agent_id: &str, todos: &TodoSnapshot) -> StoreResult<()> {
        self.agents.lock().entry(agent_id.to_string()).or_default().todos = todos.clone();
        Ok(())
    }

    async fn load_todos(&self, agent_id: &str) -> StoreResult<TodoSnapshot> {
        Ok(self
            .agents
            .lock()
            .get(agent_id)
            .map(|state| state.todos.clone())
            .unwrap_or_default())
    }

    async fn save_skills_state(&self, agent_id: &str, state: &SkillsState) -> StoreResult<()> {
        self.agents
            .lock()
            .entry(agent_id.to_string())
            .or_default()
            .skills_state = state.clone();
        Ok(())
    }

    async fn load_skills_state(&self, agent_id: &str) -> StoreResult<SkillsState> {
        Ok(self
            .agents
            .lock()
            .get(agent_id)
            .map(|state| state.skills_state.clone())
            .unwrap_or_default())
    }

    async fn append_event(&self, agent_id: &str, channel: Channel, timeline: &Timeline) -> StoreResult<()> {
        self.agents
            .lock()
            .entry(agent_id.to_string())
            .or_default()
            .channel(channel)
            .push(timeline.clone());
        Ok(())
    }

    async fn read_events(
        &self,
        agent_id: &str,
        channel: Channel,
        since_seq: Option<u64>,
    ) -> StoreResult<Vec<Timeline>> {
        let floor = since_seq.unwrap_or(0);
        Ok(self
            .agents
            .lock()
            .get_mut(agent_id)
            .map(|state| {
                state
                    .channel(channel)
                    .iter()
                    .filter(|timeline| timeline.bookmark.seq > floor)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn save_snapshot(&self, agent_id: &str, snapshot: &Snapshot) -> StoreResult<()> {
        self.agents
            .lock()
            .entry(agent_id.to_string())
            .or_default()
            .snapshots
            .insert(snapshot.id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(&self, agent_id: &str, snapshot_id: &str) -> StoreResult<Snapshot> {
        self.agents
            .lock()
            .get(agent_id)
            .and_then(|state| state.snapshots.get(snapshot_id).cloned())
            .ok_or_else(|| StoreError::AgentNotFound(format!("{agent_id}/{snapshot_id}")))
    }

    async fn list_snapshots(&self, agent_id: &str) -> StoreResult<Vec<String>> {
        let mut ids = self
            .agents
            .lock()
            .get(agent_id)
            .map(|state| state.snapshots.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }

    async fn delete_snapshot(&self, agent_id: &str, snapshot_id: &str) -> StoreResult<()> {
        if let Some(state) = self.agents.lock().get_mut(agent_id) {
            state.snapshots.remove(snapshot_id);
        }
        Ok(())
    }

    async fn save_history_artifact(
        &self,
        _agent_id: &str,
        kind: HistoryArtifactKind,
        name: &str,
        _value: &serde_json::Value,
    ) -> StoreResult<String> {
        Ok(format!("{}-{}", kind.dir_name(), super::sanitize_file_name(name)))
    }

    async fn delete_agent(&self, agent_id: &str) -> StoreResult<()> {
        self.agents.lock().remove(agent_id);
        Ok(())
    }
}
