//! Hook pipeline: ordered, per-agent hook instances sharing a
//! [`HookContext`]. Hooks compose as a pipeline, not a global mutable
//! registry — each agent owns its own [`HookPipeline`]. Implementations
//! must be side-effect-safe under replay: idempotent, or guarded by a
//! monotonic check against already-applied state.

use crate::protocol::ToolCallRecord;
use async_trait::async_trait;
use atrium_provider::ChatMessage;
use serde_json::Value;
use std::sync::Arc;

pub struct HookContext {
    pub agent_id: String,
    pub turn: u64,
}

/// Outcome of `preToolUse`. The first hook in the pipeline to return
/// anything other than `Allow` short-circuits the rest.
#[derive(Debug, Clone)]
pub enum Decision {
    Allow,
    DenyWithMessage(String),
    RequireApproval,
    RewriteInput(Value),
}

/// Rewrite or error/success conversion a hook may apply to a completed tool
/// call before its `ToolResult` is appended to the conversation.
#[derive(Debug, Clone, Default)]
pub struct PostHookResult {
    pub rewritten_result: Option<String>,
    pub convert_to_error: Option<String>,
    pub convert_to_success: Option<String>,
    pub follow_up: Option<String>,
}

/// One hook's behavior across the five pipeline stages. Every method
/// defaults to a no-op so implementations only override what they need.
#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;

    /// May mutate the outgoing message list before it is sent to the
    /// provider.
    async fn pre_model(&self, _messages: &mut Vec<ChatMessage>, _ctx: &HookContext) {}

    /// May rewrite the assistant response once the provider stream
    /// completes.
    async fn post_model(&self, _response: &mut ChatMessage, _ctx: &HookContext) {}

    async fn pre_tool_use(&self, _call: &ToolCallRecord, _ctx: &HookContext) -> Decision {
        Decision::Allow
    }

    async fn post_tool_use(&self, _record: &ToolCallRecord, _ctx: &HookContext) -> Option<PostHookResult> {
        None
    }

    /// Notification-only: messages changed. Must not mutate anything.
    async fn messages_changed(&self, _messages: &[ChatMessage], _ctx: &HookContext) {}
}

#[derive(Clone, Default)]
pub struct HookPipeline {
    hooks: Vec<Arc<dyn Hook>>,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, hook: Arc<dyn Hook>) {
        self.hooks.push(hook);
    }

    pub async fn run_pre_model(&self, messages: &mut Vec<ChatMessage>, ctx: &HookContext) {
        for hook in &self.hooks {
            hook.pre_model(messages, ctx).await;
        }
    }

    pub async fn run_post_model(&self, response: &mut ChatMessage, ctx: &HookContext) {
        for hook in &self.hooks {
            hook.post_model(response, ctx).await;
        }
    }

    /// Runs hooks in order, stopping at the first non-`Allow` decision.
    pub async fn run_pre_tool_use(&self, call: &ToolCallRecord, ctx: &HookContext) -> Decision {
        for hook in &self.hooks {
            match hook.pre_tool_use(call, ctx).await {
                Decision::Allow => continue,
                other => return other,
            }
        }
        Decision::Allow
    }

    /// Runs every hook, folding results in pipeline order; a later hook's
    /// rewrite wins over an earlier one's for the same field.
    pub async fn run_post_tool_use(&self, record: &ToolCallRecord, ctx: &HookContext) -> Option<PostHookResult> {
        let mut folded: Option<PostHookResult> = None;
        for hook in &self.hooks {
            if let Some(result) = hook.post_tool_use(record, ctx).await {
                folded = Some(match folded {
                    None => result,
                    Some(mut acc) => {
                        if result.rewritten_result.is_some() {
                            acc.rewritten_result = result.rewritten_result;
                        }
                        if result.convert_to_error.is_some() {
                            acc.convert_to_error = result.convert_to_error;
                        }
                        if result.convert_to_success.is_some() {
                            acc.convert_to_success = result.convert_to_success;
                        }
                        if result.follow_up.is_some() {
                            acc.follow_up = result.follow_up;
                        }
                        acc
                    }
                });
            }
        }
        folded
    }

    pub async fn run_messages_changed(&self, messages: &[ChatMessage], ctx: &HookContext) {
        for hook in &self.hooks {
            hook.messages_changed(messages, ctx).await;
        }
    }
}
