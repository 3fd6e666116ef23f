//! Agent loop and state machine: drives one `Chat()` call
//! through up to `max_iterations` turns, each a model stream followed by an
//! optional tool-dispatch round, per the per-turn procedure in DESIGN.md.

use crate::config::AgentConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{AgentError, AgentResult};
use crate::event_bus::EventBus;
use crate::hooks::{HookContext, HookPipeline};
use crate::protocol::{
    AgentInfo, Channel, DomainEvent, SkillsState, StopReason, ToolCallRecord, ToolCallState, TodoSnapshot, TurnUsage,
};
use crate::store::Store;
use crate::tools::ToolRegistry;
use atrium_provider::{ChatMessage, ChatRequest, ChatRole, ContentBlock, Provider, StreamChunk};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One conversational runtime instance, owning the mutable state for one
/// `agentId`: messages, tool-call records, todos, and skills state. Only
/// the owning [`crate::pool::AgentPool`] lease holder may call [`Agent::chat`].
pub struct Agent {
    agent_id: String,
    config: AgentConfig,
    store: Arc<dyn Store>,
    event_bus: Arc<EventBus>,
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    dispatcher: Arc<Dispatcher>,
    hooks: HookPipeline,
    sandbox: Arc<atrium_sandbox::Boundary>,

    messages: Vec<ChatMessage>,
    tool_call_records: HashMap<String, ToolCallRecord>,
    todos: TodoSnapshot,
    skills: SkillsState,
    info: AgentInfo,
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: String,
        config: AgentConfig,
        store: Arc<dyn Store>,
        event_bus: Arc<EventBus>,
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        dispatcher: Arc<Dispatcher>,
        hooks: HookPipeline,
        sandbox: Arc<atrium_sandbox::Boundary>,
        messages: Vec<ChatMessage>,
        tool_call_records: Vec<ToolCallRecord>,
        todos: TodoSnapshot,
        skills: SkillsState,
        info: AgentInfo,
    ) -> Self {
        Self {
            agent_id,
            config,
            store,
            event_bus,
            provider,
            registry,
            dispatcher,
            hooks,
            sandbox,
            messages,
            tool_call_records: tool_call_records.into_iter().map(|r| (r.id.clone(), r)).collect(),
            todos,
            skills,
            info,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn tool_call_records_snapshot(&self) -> Vec<ToolCallRecord> {
        self.tool_call_records.values().cloned().collect()
    }

    pub fn todos(&self) -> &TodoSnapshot {
        &self.todos
    }

    pub fn skills(&self) -> &SkillsState {
        &self.skills
    }

    pub fn info(&self) -> &AgentInfo {
        &self.info
    }

    /// Appends a user message and runs the loop until a terminal
    /// [`StopReason`] is reached.
    pub async fn chat(&mut self, user_message: ChatMessage, cancellation: CancellationToken) -> AgentResult<StopReason> {
        self.messages.push(user_message);
        self.persist_messages().await?;
        self.info.last_active_at = time::OffsetDateTime::now_utc();
        self.store.save_info(&self.agent_id, &self.info).await?;
        self.run_turns(cancellation).await
    }

    async fn run_turns(&mut self, cancellation: CancellationToken) -> AgentResult<StopReason> {
        for turn in 0..self.config.max_iterations {
            if cancellation.is_cancelled() {
                return self.finish(StopReason::Cancelled).await;
            }

            let hook_ctx = HookContext {
                agent_id: self.agent_id.clone(),
                turn: turn as u64,
            };

            self.hooks.run_pre_model(&mut self.messages, &hook_ctx).await;

            let request = ChatRequest {
                messages: self.messages.clone(),
                tools: self.registry.specs(),
                ..Default::default()
            };

            let stream_outcome = self.stream_with_retry(request, &cancellation).await;
            let (mut assistant_message, stop_reason, tool_uses, _usage) = match stream_outcome {
                Ok(outcome) => outcome,
                Err(TurnOutcome::Cancelled) => return self.finish(StopReason::Cancelled).await,
                Err(TurnOutcome::Fatal(message)) => {
                    self.event_bus
                        .publish(&self.agent_id, Channel::Monitor, DomainEvent::Error { message })
                        .await?;
                    return self.finish(StopReason::Error).await;
                }
            };

            self.hooks.run_post_model(&mut assistant_message, &hook_ctx).await;
            self.messages.push(assistant_message);
            self.persist_messages().await?;
            self.hooks.run_messages_changed(&self.messages, &hook_ctx).await;

            if stop_reason == atrium_provider::StopReason::ToolUse && !tool_uses.is_empty() {
                self.dispatch_tool_round(tool_uses, &cancellation).await?;
                continue;
            }

            return self.finish(map_provider_stop_reason(stop_reason)).await;
        }
        self.finish(StopReason::MaxIterations).await
    }

    async fn dispatch_tool_round(
        &mut self,
        tool_uses: Vec<(String, String, serde_json::Value)>,
        cancellation: &CancellationToken,
    ) -> AgentResult<()> {
        let mut records = Vec::with_capacity(tool_uses.len());
        for (id, name, input) in &tool_uses {
            if self.tool_call_records.contains_key(id) {
                return Err(AgentError::InvariantViolation(format!("duplicate call id {id}")));
            }
            let record = ToolCallRecord::new(id.clone(), name.clone(), input.clone());
            self.tool_call_records.insert(id.clone(), record.clone());
            records.push(record);
        }
        self.persist_tool_calls().await?;

        for record in &records {
            self.event_bus
                .publish(
                    &self.agent_id,
                    Channel::Progress,
                    DomainEvent::ToolStart {
                        call_id: record.id.clone(),
                        name: record.name.clone(),
                        input_preview: record.input.to_string(),
                        approval_id: None,
                    },
                )
                .await?;
        }

        let dispatched = self
            .dispatcher
            .dispatch(
                &self.agent_id,
                records,
                &self.event_bus,
                Arc::clone(&self.sandbox),
                cancellation.clone(),
            )
            .await?;

        let mut content = Vec::with_capacity(dispatched.len());
        for (mut final_record, block) in dispatched {
            let _ = final_record.transition(ToolCallState::Sealed, None);
            self.tool_call_records.insert(final_record.id.clone(), final_record);
            content.push(block);
        }
        self.persist_tool_calls().await?;

        self.messages.push(ChatMessage {
            role: ChatRole::User,
            content,
        });
        self.persist_messages().await?;
        self.event_bus
            .publish(
                &self.agent_id,
                Channel::Progress,
                DomainEvent::MessagesChanged {
                    message_count: self.messages.len(),
                },
            )
            .await?;
        Ok(())
    }

    /// Opens the provider stream, accumulating text on Progress live and
    /// collecting tool-use parts, retrying transient failures with bounded
    /// exponential backoff.
    async fn stream_with_retry(
        &self,
        request: ChatRequest,
        cancellation: &CancellationToken,
    ) -> Result<(ChatMessage, atrium_provider::StopReason, Vec<(String, String, serde_json::Value)>, TurnUsage), TurnOutcome> {
        let mut attempt = 0u32;
        loop {
            match self.stream_once(request.clone(), cancellation).await {
                Ok(outcome) => return Ok(outcome),
                Err(TurnOutcome::Cancelled) => return Err(TurnOutcome::Cancelled),
                Err(TurnOutcome::Retryable(message)) => {
                    attempt += 1;
                    if attempt >= self.config.retry.max_attempts {
                        return Err(TurnOutcome::Fatal(message));
                    }
                    let wait_ms = (self.config.retry.base_ms * 2u64.pow(attempt - 1)).min(self.config.retry.cap_ms);
                    let _ = self
                        .event_bus
                        .publish(
                            &self.agent_id,
                            Channel::Monitor,
                            DomainEvent::RateLimited {
                                attempt: attempt as usize,
                                max_attempts: self.config.retry.max_attempts as usize,
                                wait_ms,
                            },
                        )
                        .await;
                    tokio::time::sleep(std::time::Duration::from_millis(wait_ms)).await;
                }
                Err(TurnOutcome::Fatal(message)) => return Err(TurnOutcome::Fatal(message)),
            }
        }
    }

    async fn stream_once(
        &self,
        request: ChatRequest,
        cancellation: &CancellationToken,
    ) -> Result<(ChatMessage, atrium_provider::StopReason, Vec<(String, String, serde_json::Value)>, TurnUsage), TurnOutcome> {
        use futures::StreamExt;

        let mut stream = self
            .provider
            .stream(request)
            .await
            .map_err(classify_provider_error)?;

        let mut text = String::new();
        let mut tool_uses: Vec<(String, String, serde_json::Value)> = Vec::new();
        let mut pending_names: HashMap<String, String> = HashMap::new();
        let mut stop_reason = atrium_provider::StopReason::EndTurn;
        let mut usage = TurnUsage::default();

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => return Err(TurnOutcome::Cancelled),
                chunk = stream.next() => {
                    let Some(chunk) = chunk else { break };
                    match chunk.map_err(classify_provider_error)? {
                        StreamChunk::TextDelta { text: delta } => {
                            text.push_str(&delta);
                            let _ = self
                                .event_bus
                                .publish(&self.agent_id, Channel::Progress, DomainEvent::TextDelta { text: delta })
                                .await;
                        }
                        StreamChunk::ToolUseStart { id, name } => {
                            pending_names.insert(id, name);
                        }
                        StreamChunk::ToolUseInputDelta { .. } => {}
                        StreamChunk::ToolUseComplete { id, input } => {
                            let name = pending_names.remove(&id).unwrap_or_default();
                            tool_uses.push((id, name, input));
                        }
                        StreamChunk::MessageStop { reason, usage: turn_usage } => {
                            stop_reason = reason;
                            usage = TurnUsage { usage: turn_usage };
                            break;
                        }
                    }
                }
            }
        }

        let mut content = Vec::new();
        if !text.is_empty() {
            content.push(ContentBlock::Text { text });
        }
        for (id, name, input) in &tool_uses {
            content.push(ContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            });
        }
        let message = ChatMessage {
            role: ChatRole::Assistant,
            content,
        };

        Ok((message, stop_reason, tool_uses, usage))
    }

    async fn finish(&mut self, reason: StopReason) -> AgentResult<StopReason> {
        self.event_bus
            .publish(&self.agent_id, Channel::Progress, DomainEvent::Done { reason })
            .await?;
        Ok(reason)
    }

    async fn persist_messages(&self) -> AgentResult<()> {
        self.store.save_messages(&self.agent_id, &self.messages).await?;
        Ok(())
    }

    async fn persist_tool_calls(&self) -> AgentResult<()> {
        let records: Vec<_> = self.tool_call_records.values().cloned().collect();
        self.store.save_tool_call_records(&self.agent_id, &records).await?;
        Ok(())
    }
}

enum TurnOutcome {
    Cancelled,
    Retryable(String),
    Fatal(String),
}

fn classify_provider_error(err: atrium_provider::ProviderError) -> TurnOutcome {
    match err {
        atrium_provider::ProviderError::Cancelled => TurnOutcome::Cancelled,
        other if other.is_retryable() => TurnOutcome::Retryable(other.to_string()),
        other => TurnOutcome::Fatal(other.to_string()),
    }
}

fn map_provider_stop_reason(reason: atrium_provider::StopReason) -> StopReason {
    match reason {
        atrium_provider::StopReason::EndTurn
        | atrium_provider::StopReason::MaxTokens
        | atrium_provider::StopReason::StopSequence => StopReason::EndTurn,
        atrium_provider::StopReason::ToolUse => StopReason::EndTurn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, RetryConfig, ToolPermissionConfig};
    use crate::dispatcher::{Dispatcher, ToolPolicy};
    use crate::store::memory::MemoryStore;
    use atrium_provider::mock::MockProvider;

    fn config() -> AgentConfig {
        AgentConfig {
            model: "test-model".into(),
            system_prompt: None,
            max_iterations: 50,
            concurrency: 4,
            event_buffer: 256,
            idle_ttl_secs: 300,
            permissions: ToolPermissionConfig::default(),
            retry: RetryConfig::default(),
            store_root: std::env::temp_dir(),
        }
    }

    fn agent(provider: MockProvider) -> Agent {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let event_bus = Arc::new(EventBus::new(Arc::clone(&store)));
        let registry = Arc::new(ToolRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), HookPipeline::new(), ToolPolicy::default()));
        let sandbox = Arc::new(atrium_sandbox::Boundary::new(std::env::temp_dir()));

        Agent::new(
            "agent-1".into(),
            config(),
            store,
            event_bus,
            Arc::new(provider),
            registry,
            dispatcher,
            HookPipeline::new(),
            sandbox,
            Vec::new(),
            Vec::new(),
            TodoSnapshot::default(),
            SkillsState::default(),
            AgentInfo {
                agent_id: "agent-1".into(),
                template_id: None,
                model: "test-model".into(),
                created_at: time::OffsetDateTime::now_utc(),
                last_active_at: time::OffsetDateTime::now_utc(),
                runtime_config: serde_json::Value::Null,
            },
        )
    }

    #[tokio::test]
    async fn single_turn_text_response_ends_the_turn() {
        let provider = MockProvider::new("mock");
        provider.push_chunks(vec![
            StreamChunk::TextDelta { text: "hello".into() },
            StreamChunk::MessageStop {
                reason: atrium_provider::StopReason::EndTurn,
                usage: None,
            },
        ]);
        let mut agent = agent(provider);

        let reason = agent
            .chat(ChatMessage::text(ChatRole::User, "hi"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reason, StopReason::EndTurn);
        assert_eq!(agent.messages().len(), 2);
    }

    #[tokio::test]
    async fn provider_auth_error_ends_turn_with_error_and_preserves_messages() {
        let provider = MockProvider::new("mock");
        provider.push_failure(|| atrium_provider::ProviderError::AuthOrForbidden("bad key".into()));
        let mut agent = agent(provider);

        let reason = agent
            .chat(ChatMessage::text(ChatRole::User, "hi"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reason, StopReason::Error);
        assert_eq!(agent.messages().len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_retried_twice_then_succeeds() {
        let provider = MockProvider::new("mock");
        provider.push_failure(|| atrium_provider::ProviderError::RateLimited("slow down".into()));
        provider.push_failure(|| atrium_provider::ProviderError::RateLimited("slow down".into()));
        provider.push_chunks(vec![
            StreamChunk::TextDelta { text: "ok".into() },
            StreamChunk::MessageStop {
                reason: atrium_provider::StopReason::EndTurn,
                usage: None,
            },
        ]);

        let mut agent = agent(provider);
        agent.config.retry = RetryConfig {
            max_attempts: 3,
            base_ms: 1,
            cap_ms: 4,
        };

        let reason = agent
            .chat(ChatMessage::text(ChatRole::User, "hi"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reason, StopReason::EndTurn);
    }
}
