//! Commonly-used types for building against the agent runtime.
//!
//! ```no_run
//! use atrium_agent::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(pool: AgentPool) -> AgentResult<()> {
//! let lease = pool.lease("agent-1", CancellationToken::new()).await?;
//! let mut agent = lease.agent().lock().await;
//! agent.chat(ChatMessage::user("hi"), CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

pub use crate::config::{AgentConfig, RetryConfig, ToolPermissionConfig};
pub use crate::dispatcher::{ApprovalDecision, ApprovalGate, Classification, Dispatcher, PermissionMode, ToolPolicy};
pub use crate::error::{AgentError, AgentResult};
pub use crate::event_bus::{EventBus, EventReceiver};
pub use crate::hooks::{Decision, Hook, HookContext, HookPipeline, PostHookResult};
pub use crate::pool::{AgentDeps, AgentPool, Lease, RequestClassification, SessionRouter, classify_request};
pub use crate::protocol::{
    AgentInfo, Bookmark, Channel, DomainEvent, Snapshot, SkillsState, StopReason, Timeline, TodoItem, TodoSnapshot,
    TodoStatus, ToolCallRecord, ToolCallState,
};
pub use crate::session::Agent;
pub use crate::skills::{SkillDescriptor, SkillRegistry, SkillsManager};
pub use crate::snapshot::{capture, resume};
pub use crate::store::{Store, StoreError, StoreResult};
pub use crate::todos::TodoManager;
pub use crate::tools::{ToolAttributes, ToolContext, ToolDescriptor, ToolHandler, ToolRegistry};

pub use atrium_provider::{ChatMessage, ChatRequest, ChatRole, ContentBlock, Provider, ToolSpec};
