//! Tool dispatcher and approval gate: translates a batch of
//! `ToolUse` blocks into a batch of `ToolResult` blocks, enforcing
//! permission classification, the approval gate, concurrency limits, and
//! cancellation.

mod approval;
mod permission;

pub use approval::{ApprovalDecision, ApprovalGate};
pub use permission::{classify, Classification, PermissionMode, ToolPolicy};

use crate::error::AgentResult;
use crate::event_bus::EventBus;
use crate::hooks::{Decision, HookContext, HookPipeline};
use crate::protocol::{Channel, DomainEvent, ToolCallRecord, ToolCallState};
use crate::tools::{ToolContext, ToolRegistry};
use atrium_provider::ContentBlock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    hooks: HookPipeline,
    policy: ToolPolicy,
    approval_gate: ApprovalGate,
    semaphore: Semaphore,
    /// Held for the duration of any call whose tool is not
    /// `concurrency_safe`, serializing such calls within this agent.
    serial_lock: tokio::sync::Mutex<()>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, hooks: HookPipeline, policy: ToolPolicy) -> Self {
        let concurrency = policy.concurrency.max(1);
        Self {
            registry,
            hooks,
            policy,
            approval_gate: ApprovalGate::new(),
            semaphore: Semaphore::new(concurrency),
            serial_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn approval_gate(&self) -> &ApprovalGate {
        &self.approval_gate
    }

    /// Runs every call in `calls` to completion (or denial/cancellation) and
    /// returns exactly one `(record, ToolResult)` per input `ToolUse`, in
    /// input order. The returned records carry the final pre-`Sealed` state
    /// so the caller can persist and seal them.
    pub async fn dispatch(
        &self,
        agent_id: &str,
        calls: Vec<ToolCallRecord>,
        event_bus: &EventBus,
        sandbox: Arc<atrium_sandbox::Boundary>,
        cancellation: CancellationToken,
    ) -> AgentResult<Vec<(ToolCallRecord, ContentBlock)>> {
        let mut futures = Vec::with_capacity(calls.len());
        for call in calls {
            let registry = Arc::clone(&self.registry);
            let sandbox = Arc::clone(&sandbox);
            let cancellation = cancellation.clone();
            futures.push(self.dispatch_one(agent_id, call, event_bus, registry, sandbox, cancellation));
        }
        futures::future::join_all(futures).await.into_iter().collect()
    }

    async fn dispatch_one(
        &self,
        agent_id: &str,
        mut call: ToolCallRecord,
        event_bus: &EventBus,
        registry: Arc<ToolRegistry>,
        sandbox: Arc<atrium_sandbox::Boundary>,
        cancellation: CancellationToken,
    ) -> AgentResult<(ToolCallRecord, ContentBlock)> {
        let descriptor = registry.get(&call.name).ok();
        let attributes = descriptor.map(|d| d.attributes).unwrap_or_default();
        let classification = classify(&call.name, attributes, &self.policy);

        let hook_ctx = HookContext {
            agent_id: agent_id.to_string(),
            turn: 0,
        };
        let hook_decision = self.hooks.run_pre_tool_use(&call, &hook_ctx).await;

        let outcome = match (classification, hook_decision) {
            (_, Decision::DenyWithMessage(reason)) | (Classification::Denied(reason), _) => {
                call.transition(ToolCallState::Denied, Some(reason.clone()))?;
                call.transition(ToolCallState::Completed, None)?;
                Err(reason)
            }
            (_, Decision::RequireApproval) | (Classification::ApprovalRequired, Decision::Allow) => {
                match self.await_approval(agent_id, &mut call, event_bus, &cancellation).await? {
                    Ok(()) => {
                        self.run_tool(agent_id, &mut call, descriptor, registry.as_ref(), &sandbox, &cancellation)
                            .await
                    }
                    Err(reason) => Err(reason),
                }
            }
            (Classification::Allowed, Decision::Allow) => {
                self.run_tool(agent_id, &mut call, descriptor, registry.as_ref(), &sandbox, &cancellation)
                    .await
            }
            (_, Decision::RewriteInput(rewritten)) => {
                call.input = rewritten;
                self.run_tool(agent_id, &mut call, descriptor, registry.as_ref(), &sandbox, &cancellation)
                    .await
            }
        };

        let (mut content, mut is_error) = match outcome {
            Ok(value) => (value_to_content(&value), false),
            Err(message) => (message, true),
        };

        if let Some(post) = self.hooks.run_post_tool_use(&call, &hook_ctx).await {
            if let Some(rewritten) = post.rewritten_result {
                content = rewritten;
            }
            if let Some(message) = post.convert_to_error {
                is_error = true;
                content = message;
            }
            if let Some(message) = post.convert_to_success {
                is_error = false;
                content = message;
            }
            if let Some(follow_up) = post.follow_up {
                content = format!("{content}\n\n{follow_up}");
            }
        }

        event_bus
            .publish(
                agent_id,
                Channel::Progress,
                DomainEvent::ToolEnd {
                    call_id: call.id.clone(),
                    success: !is_error,
                    error_summary: is_error.then(|| content.clone()),
                },
            )
            .await?;

        let result = ContentBlock::ToolResult {
            tool_use_id: call.id.clone(),
            content,
            is_error,
        };
        Ok((call, result))
    }

    /// Suspends the call pending an external decision. Returns `Ok(())` if
    /// approved — the caller then proceeds to [`Self::run_tool`] — or
    /// `Err(reason)` if denied or cancelled, in which case the call is
    /// already sealed in `Denied`/`Completed`.
    async fn await_approval(
        &self,
        agent_id: &str,
        call: &mut ToolCallRecord,
        event_bus: &EventBus,
        cancellation: &CancellationToken,
    ) -> Result<Result<(), String>, crate::error::AgentError> {
        call.transition(ToolCallState::ApprovalRequired, None)?;
        let receiver = self.approval_gate.register(call.id.clone());

        event_bus
            .publish(
                agent_id,
                Channel::Control,
                DomainEvent::PermissionRequired {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    input_preview: call.input.to_string(),
                },
            )
            .await?;

        let decision = tokio::select! {
            _ = cancellation.cancelled() => {
                self.approval_gate.deny(&call.id, "cancelled");
                ApprovalDecision::Denied("cancelled".into())
            }
            decision = receiver => decision.unwrap_or(ApprovalDecision::Denied("approval channel closed".into())),
        };

        match decision {
            ApprovalDecision::Approved(_) => {
                call.transition(ToolCallState::Approved, None)?;
                Ok(Ok(()))
            }
            ApprovalDecision::Denied(reason) => {
                call.transition(ToolCallState::Denied, Some(reason.clone()))?;
                call.transition(ToolCallState::Completed, None)?;
                Ok(Err(reason))
            }
        }
    }

    async fn run_tool(
        &self,
        agent_id: &str,
        call: &mut ToolCallRecord,
        descriptor: Option<&crate::tools::ToolDescriptor>,
        registry: &ToolRegistry,
        sandbox: &Arc<atrium_sandbox::Boundary>,
        cancellation: &CancellationToken,
    ) -> Result<serde_json::Value, String> {
        let Some(descriptor) = descriptor.or_else(|| registry.get(&call.name).ok()) else {
            return Err(format!("tool not found: {}", call.name));
        };

        let _permit = self.semaphore.acquire().await;
        let _serial_guard = if descriptor.attributes.concurrency_safe {
            None
        } else {
            Some(self.serial_lock.lock().await)
        };

        call.transition(ToolCallState::Running, None)
            .map_err(|e| e.to_string())?;

        let ctx = ToolContext {
            agent_id: agent_id.to_string(),
            call_id: call.id.clone(),
            cancellation: cancellation.clone(),
            sandbox: Arc::clone(sandbox),
        };

        let invocation = descriptor.handler.invoke(call.input.clone(), &ctx);
        let result = tokio::select! {
            _ = cancellation.cancelled() => Err(crate::error::AgentError::Cancelled),
            result = invocation => result,
        };

        match result {
            Ok(value) => {
                let _ = call.transition(ToolCallState::Completed, None);
                Ok(value)
            }
            Err(err) => {
                let _ = call.transition(ToolCallState::Failed, Some(err.to_string()));
                Err(err.to_string())
            }
        }
    }
}

fn value_to_content(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Per-agent map kept by the session loop between turns, tracking tool-call
/// records persisted via [`crate::store::Store::save_tool_call_records`].
pub type ToolCallTable = HashMap<String, ToolCallRecord>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::tools::{ToolAttributes, ToolDescriptor, ToolHandler};
    use async_trait::async_trait;

    struct AlwaysOk;

    #[async_trait]
    impl ToolHandler for AlwaysOk {
        async fn invoke(&self, input: serde_json::Value, _ctx: &ToolContext) -> AgentResult<serde_json::Value> {
            Ok(input)
        }
    }

    fn registry_with(name: &str, attrs: ToolAttributes) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry
            .register(ToolDescriptor {
                name: name.to_string(),
                description: "test".into(),
                input_schema: serde_json::json!({}),
                attributes: attrs,
                handler: Arc::new(AlwaysOk),
            })
            .unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn denied_tool_produces_single_error_tool_result() {
        let registry = registry_with(
            "fs_rm",
            ToolAttributes {
                read_only: false,
                ..Default::default()
            },
        );
        let policy = ToolPolicy {
            deny_tools: vec!["fs_rm".into()],
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(registry, HookPipeline::new(), policy);
        let event_bus = EventBus::new(Arc::new(MemoryStore::new()));
        let sandbox = Arc::new(atrium_sandbox::Boundary::new(std::env::temp_dir()));

        let call = ToolCallRecord::new("c1", "fs_rm", serde_json::json!({}));
        let results = dispatcher
            .dispatch("agent-1", vec![call], &event_bus, sandbox, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        match &results[0].1 {
            ContentBlock::ToolResult { is_error, tool_use_id, .. } => {
                assert!(is_error);
                assert_eq!(tool_use_id, "c1");
            }
            _ => panic!("expected a ToolResult"),
        }
        assert_eq!(results[0].0.state, ToolCallState::Completed);
    }

    #[tokio::test]
    async fn allowed_read_only_tool_succeeds() {
        let registry = registry_with(
            "fs_list",
            ToolAttributes {
                read_only: true,
                ..Default::default()
            },
        );
        let dispatcher = Dispatcher::new(registry, HookPipeline::new(), ToolPolicy::default());
        let event_bus = EventBus::new(Arc::new(MemoryStore::new()));
        let sandbox = Arc::new(atrium_sandbox::Boundary::new(std::env::temp_dir()));

        let call = ToolCallRecord::new("c1", "fs_list", serde_json::json!({"path": "."}));
        let results = dispatcher
            .dispatch("agent-1", vec![call], &event_bus, sandbox, CancellationToken::new())
            .await
            .unwrap();

        match &results[0].1 {
            ContentBlock::ToolResult { is_error, .. } => assert!(!is_error),
            _ => panic!("expected a ToolResult"),
        }
        assert_eq!(results[0].0.state, ToolCallState::Completed);
    }
}
