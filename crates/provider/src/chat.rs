//! The provider-facing conversation model: messages built from tagged content
//! blocks, tool declarations, and the streaming chunk protocol a
//! [`Provider`] emits.

use crate::error::ProviderError;
use crate::{FunctionCall, ToolCall, Usage};
use async_trait::async_trait;
use futures::Stream;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;

/// Role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One element of a message's content, tagged by kind. The set of variants is
/// closed — consumers dispatch on the tag rather than introducing a class
/// hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    Thinking { text: String },
}

/// A single message in a conversation.
///
/// Invariant: every `ToolResult.tool_use_id` in a well-formed conversation
/// references a prior `ToolUse.id` in that same conversation; an assistant
/// message containing `ToolUse` blocks must be immediately followed by a
/// user message whose content is exactly the matching `ToolResult` blocks
/// (see [`normalize_message_order`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn text(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(ChatRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(ChatRole::Assistant, text)
    }

    /// Tool-use ids this message asks the caller to invoke, in content order.
    pub fn tool_use_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool-result ids this message carries, in content order.
    pub fn tool_result_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Reorders a conversation so every assistant `ToolUse` message is
/// immediately followed by a user message carrying exactly the matching
/// `ToolResult` blocks, in `ToolUse` id order. This is a hard correctness
/// requirement: several providers reject interleavings where plain user text
/// appears between a `ToolUse` and its `ToolResult`.
///
/// Orphan tool results (no matching pending `ToolUse` id) are dropped from
/// their original position and appended as a single trailing user message.
pub fn normalize_message_order(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(messages.len());
    let mut pending_results: HashMap<String, ContentBlock> = HashMap::new();
    let mut orphans: Vec<ContentBlock> = Vec::new();

    for message in messages {
        match message.role {
            ChatRole::User if message.tool_result_ids().len() > 0 => {
                for block in &message.content {
                    if let ContentBlock::ToolResult { tool_use_id, .. } = block {
                        pending_results.insert(tool_use_id.clone(), block.clone());
                    } else {
                        orphans.push(block.clone());
                    }
                }
            }
            _ => {
                out.push(message.clone());
                if message.role == ChatRole::Assistant {
                    let ids = message.tool_use_ids();
                    if !ids.is_empty() {
                        let mut matched = Vec::new();
                        for id in ids {
                            if let Some(result) = pending_results.remove(id) {
                                matched.push(result);
                            }
                        }
                        if !matched.is_empty() {
                            out.push(ChatMessage {
                                role: ChatRole::User,
                                content: matched,
                            });
                        }
                    }
                }
            }
        }
    }

    // Anything left in pending_results never found its ToolUse in this slice — orphaned.
    for (_, block) in pending_results {
        orphans.push(block);
    }
    if !orphans.is_empty() {
        out.push(ChatMessage {
            role: ChatRole::User,
            content: orphans,
        });
    }

    out
}

/// A tool declaration offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// How the model is permitted to use the offered tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    Any,
    Tool(String),
    None,
}

/// Why a model turn stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

/// One increment of a provider's streamed response. The set of variants is
/// closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    TextDelta { text: String },
    ToolUseStart { id: String, name: String },
    ToolUseInputDelta { id: String, json_fragment: String },
    ToolUseComplete { id: String, input: Value },
    MessageStop {
        reason: StopReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl StreamChunk {
    /// Assembles a complete `ToolCall` from a `ToolUseComplete` chunk, for
    /// callers that want the provider-common shape rather than raw JSON.
    pub fn as_tool_call(&self) -> Option<ToolCall> {
        match self {
            StreamChunk::ToolUseComplete { id, input } => Some(ToolCall {
                id: id.clone(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: String::new(),
                    arguments: input.to_string(),
                },
            }),
            _ => None,
        }
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// A single request to a model provider.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub tool_choice: ToolChoice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Streaming chat-completion abstraction. Implementations normalize message
/// order before sending (see [`normalize_message_order`]) and translate
/// wire-level tool-call ids so they round-trip verbatim in subsequent
/// `ToolResult` references; when the underlying wire protocol elides ids,
/// the implementation must synthesize one deterministic-per-stream.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable name, used in logs and Monitor events.
    fn name(&self) -> &str;

    /// Opens a streaming chat completion. The returned stream yields
    /// `StreamChunk`s in generation order and ends after exactly one
    /// `MessageStop`.
    async fn stream(&self, request: ChatRequest) -> Result<ChunkStream, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_use(id: &str) -> ContentBlock {
        ContentBlock::ToolUse {
            id: id.to_string(),
            name: "fs_list".to_string(),
            input: serde_json::json!({}),
        }
    }

    fn tool_result(id: &str) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: id.to_string(),
            content: "ok".to_string(),
            is_error: false,
        }
    }

    #[test]
    fn normalize_keeps_already_correct_order() {
        let messages = vec![
            ChatMessage::user("hi"),
            ChatMessage {
                role: ChatRole::Assistant,
                content: vec![tool_use("t1")],
            },
            ChatMessage {
                role: ChatRole::User,
                content: vec![tool_result("t1")],
            },
        ];
        let normalized = normalize_message_order(&messages);
        assert_eq!(normalized.len(), 3);
        assert_eq!(normalized[2].tool_result_ids(), vec!["t1"]);
    }

    #[test]
    fn normalize_moves_result_immediately_after_tool_use() {
        // A ToolResult appearing out of order must end up directly after its ToolUse.
        let messages = vec![
            ChatMessage {
                role: ChatRole::Assistant,
                content: vec![tool_use("t1")],
            },
            ChatMessage::user("don't interleave here"),
            ChatMessage {
                role: ChatRole::User,
                content: vec![tool_result("t1")],
            },
        ];
        let normalized = normalize_message_order(&messages);
        // assistant(tool_use) must be immediately followed by the matching result
        assert!(matches!(normalized[0].content[0], ContentBlock::ToolUse { .. }));
        assert_eq!(normalized[1].tool_result_ids(), vec!["t1"]);
    }

    #[test]
    fn normalize_appends_orphan_results_at_end() {
        let messages = vec![ChatMessage {
            role: ChatRole::User,
            content: vec![tool_result("ghost")],
        }];
        let normalized = normalize_message_order(&messages);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].tool_result_ids(), vec!["ghost"]);
    }
}
