//! Streaming chat-completion provider abstraction for the atrium agent
//! runtime.
//!
//! This crate defines the wire-neutral conversation model (tagged content
//! blocks), the streaming chunk protocol a provider emits, and the
//! [`chat::Provider`] trait the agent loop drives. It intentionally says
//! nothing about how any particular provider's HTTP/gRPC protocol works —
//! that is a concrete-provider concern outside the runtime core.

pub mod chat;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod params;

use serde::{Deserialize, Serialize};

pub use chat::{
    ChatMessage, ChatRequest, ChatRole, ChunkStream, ContentBlock, Provider, StopReason,
    StreamChunk, ToolChoice, ToolSpec, normalize_message_order,
};
pub use error::{ProviderError, ProviderResult};
pub use params::LLMParams;

/// A tool call assembled from streamed chunks, in the provider-common shape
/// used by [`StreamChunk::as_tool_call`].
#[derive(Debug, Deserialize, Serialize, Clone, Eq, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Deserialize, Serialize, Clone, Eq, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Token accounting reported at `StreamChunk::MessageStop`, accepting the
/// field-naming conventions of several wire protocols.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Default)]
pub struct Usage {
    #[serde(
        alias = "prompt_tokens",
        alias = "input_tokens",
        alias = "prompt_eval_count",
        alias = "promptTokenCount"
    )]
    pub input_tokens: u32,
    #[serde(
        alias = "completion_tokens",
        alias = "output_tokens",
        alias = "eval_count",
        alias = "candidatesTokenCount"
    )]
    pub output_tokens: u32,
}
