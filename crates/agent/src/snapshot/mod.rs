//! Snapshot / Resume: a consistent point-in-time copy of every persisted
//! entity, captured only between completed turns (never mid-tool-call),
//! and the corresponding resume path that reconstructs an [`Agent`] from
//! [`Store`] state without replaying history unless the caller asks for it.

use crate::config::AgentConfig;
use crate::dispatcher::Dispatcher;
use crate::error::AgentResult;
use crate::event_bus::EventBus;
use crate::hooks::HookPipeline;
use crate::protocol::{Bookmark, Channel, Snapshot};
use crate::session::Agent;
use crate::store::Store;
use crate::tools::ToolRegistry;
use atrium_provider::Provider;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Captures `agent`'s current state into a [`Snapshot`] and persists it.
/// Callers must only invoke this between turns — `Agent::chat` returning is
/// the only point at which this precondition holds, since tool calls are
/// never suspended mid-flight at any other boundary.
pub async fn capture(store: &dyn Store, agent: &Agent) -> AgentResult<Snapshot> {
    let snapshot = Snapshot {
        id: Uuid::now_v7().to_string(),
        timestamp: OffsetDateTime::now_utc(),
        messages: agent.messages().to_vec(),
        tool_call_records: agent.tool_call_records_snapshot(),
        todos: agent.todos().clone(),
        skills_state: agent.skills().clone(),
        info: agent.info().clone(),
    };
    store.save_snapshot(&agent.info().agent_id, &snapshot).await?;
    Ok(snapshot)
}

/// Collaborators needed to reconstruct an [`Agent`] on resume; mirrors
/// [`crate::pool::AgentDeps`] since the pool is the usual caller.
#[allow(clippy::too_many_arguments)]
pub async fn resume(
    agent_id: &str,
    config: AgentConfig,
    store: Arc<dyn Store>,
    event_bus: Arc<EventBus>,
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    dispatcher: Arc<Dispatcher>,
    hooks: HookPipeline,
    sandbox: Arc<atrium_sandbox::Boundary>,
    since: Option<Bookmark>,
) -> AgentResult<(Agent, Vec<crate::protocol::Timeline>)> {
    let info = store.load_info(agent_id).await?;
    let messages = store.load_messages(agent_id).await?;
    let tool_call_records = store.load_tool_call_records(agent_id).await?;
    let todos = store.load_todos(agent_id).await?;
    let skills = store.load_skills_state(agent_id).await?;

    let agent = Agent::new(
        agent_id.to_string(),
        config,
        Arc::clone(&store),
        Arc::clone(&event_bus),
        provider,
        registry,
        dispatcher,
        hooks,
        sandbox,
        messages,
        tool_call_records,
        todos,
        skills,
        info,
    );

    // No replay unless the caller supplies `since`; an empty backlog plus a
    // live receiver is the default resume posture for all three channels.
    let mut backlog = Vec::new();
    if since.is_some() {
        for channel in [Channel::Progress, Channel::Control, Channel::Monitor] {
            let (events, _receiver) = event_bus.subscribe(agent_id, channel, since).await?;
            backlog.extend(events);
        }
    }

    Ok((agent, backlog))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ToolPolicy;
    use crate::protocol::{AgentInfo, SkillsState, TodoSnapshot};
    use crate::store::memory::MemoryStore;
    use atrium_provider::{ChatMessage, ChatRole};

    fn config() -> AgentConfig {
        AgentConfig {
            model: "test-model".into(),
            system_prompt: None,
            max_iterations: 50,
            concurrency: 4,
            event_buffer: 256,
            idle_ttl_secs: 300,
            permissions: Default::default(),
            retry: Default::default(),
            store_root: std::env::temp_dir(),
        }
    }

    fn agent_info(agent_id: &str) -> AgentInfo {
        AgentInfo {
            agent_id: agent_id.to_string(),
            template_id: None,
            model: "test-model".into(),
            created_at: OffsetDateTime::now_utc(),
            last_active_at: OffsetDateTime::now_utc(),
            runtime_config: serde_json::Value::Null,
        }
    }

    fn make_agent(store: Arc<dyn Store>, event_bus: Arc<EventBus>) -> Agent {
        let registry = Arc::new(ToolRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), HookPipeline::new(), ToolPolicy::default()));
        Agent::new(
            "a1".into(),
            config(),
            store,
            event_bus,
            Arc::new(atrium_provider::mock::MockProvider::new("mock")),
            registry,
            dispatcher,
            HookPipeline::new(),
            Arc::new(atrium_sandbox::Boundary::new(std::env::temp_dir())),
            vec![ChatMessage::text(ChatRole::User, "hi")],
            Vec::new(),
            TodoSnapshot::default(),
            SkillsState::default(),
            agent_info("a1"),
        )
    }

    #[tokio::test]
    async fn capture_then_load_round_trips_messages() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let event_bus = Arc::new(EventBus::new(Arc::clone(&store)));
        let agent = make_agent(Arc::clone(&store), event_bus);

        let snapshot = capture(store.as_ref(), &agent).await.unwrap();
        let loaded = store.load_snapshot("a1", &snapshot.id).await.unwrap();

        assert_eq!(loaded.messages.len(), 1);
    }

    #[tokio::test]
    async fn resume_without_since_yields_no_backlog() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let event_bus = Arc::new(EventBus::new(Arc::clone(&store)));
        store.save_info("a1", &agent_info("a1")).await.unwrap();
        store
            .save_messages("a1", &[ChatMessage::text(ChatRole::User, "hi")])
            .await
            .unwrap();

        let registry = Arc::new(ToolRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), HookPipeline::new(), ToolPolicy::default()));
        let (agent, backlog) = resume(
            "a1",
            config(),
            Arc::clone(&store),
            event_bus,
            Arc::new(atrium_provider::mock::MockProvider::new("mock")),
            registry,
            dispatcher,
            HookPipeline::new(),
            Arc::new(atrium_sandbox::Boundary::new(std::env::temp_dir())),
            None,
        )
        .await
        .unwrap();

        assert_eq!(agent.messages().len(), 1);
        assert!(backlog.is_empty());
    }
}
