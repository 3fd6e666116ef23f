pub mod registry;

pub use registry::{ToolAttributes, ToolContext, ToolDescriptor, ToolHandler, ToolRegistry};
