pub mod events;
pub mod macros;
pub mod message;
pub mod registry;
pub mod schemas;
pub mod tools;

pub use events::{ChatEvent, GenerationContext, ToolExecutionStatus};
pub use message::{Arguments, Message, Role, ToolCall, ToolResult};
pub use registry::ToolRegistry;
pub use schemas::{FunctionDefinition, ParameterSchema, ToolDescriptor, ToolLocation, ToolSchema};
pub use tools::{Tool, ToolError};
