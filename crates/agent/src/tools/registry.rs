//! Tool registry: `name -> ToolDescriptor`, keyed by the same name the model
//! sees in `ToolSpec.name` and the dispatcher uses to classify permissions.

use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use atrium_provider::ToolSpec;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Attributes the dispatcher's permission classification and concurrency
/// scheduler read off a tool; see [`crate::dispatcher`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolAttributes {
    pub read_only: bool,
    pub requires_approval: bool,
    pub concurrency_safe: bool,
}

/// Per-invocation context handed to a tool: the owning agent, a cancellation
/// token the tool must respect at every suspension point, and the sandbox
/// boundary its filesystem/process operations must stay inside.
pub struct ToolContext {
    pub agent_id: String,
    pub call_id: String,
    pub cancellation: CancellationToken,
    pub sandbox: Arc<atrium_sandbox::Boundary>,
}

/// A tool's executable behavior. Dynamic input/output stay opaque JSON;
/// schema enforcement is tool-local, not the registry's concern.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, input: Value, ctx: &ToolContext) -> AgentResult<Value>;

    /// An optional system-prompt fragment contributed while this tool is
    /// offered, e.g. usage guidance specific to the current sandbox.
    fn get_prompt(&self, _ctx: &ToolContext) -> Option<String> {
        None
    }
}

#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub attributes: ToolAttributes,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    pub fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects duplicate names; a tool that needs to change behavior should
    /// be removed and re-registered explicitly.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> AgentResult<()> {
        if self.tools.contains_key(&descriptor.name) {
            return Err(AgentError::DuplicateTool(descriptor.name));
        }
        self.tools.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> AgentResult<&ToolDescriptor> {
        self.tools
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))
    }

    pub fn remove(&mut self, name: &str) -> Option<ToolDescriptor> {
        self.tools.remove(name)
    }

    /// No ordering is guaranteed.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(ToolDescriptor::to_spec).collect()
    }
}
