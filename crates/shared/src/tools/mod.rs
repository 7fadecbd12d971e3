use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::message::{Arguments, ToolResult};
use crate::schemas::{ToolDescriptor, ToolHandler, ToolLocation, ToolSchema};

pub mod toolbelts;

#[derive(Error, Debug)]
pub enum ToolError {
    /// The tool's effect must happen on another host; the caller runs it out-of-band.
    #[error("Tool '{tool}' must be executed by the client")]
    RequiresExternalExecution { tool: String },

    #[error("{0}")]
    Execution(#[from] anyhow::Error),
}

/// Capability contract every tool exposes to the engine.
#[async_trait]
pub trait Tool: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    fn requires_permission(&self) -> bool {
        false
    }

    fn parameters_schema(&self) -> Value;

    /// Pre-flight gate checked before every execution.
    fn can_execute(&self) -> bool {
        true
    }

    async fn execute(&self, parameters: &Arguments) -> Result<ToolResult, ToolError>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::function(self.name(), self.description(), self.parameters_schema())
    }
}

/// A single method of a toolbelt, exposed through the `Tool` contract.
pub struct ToolbeltTool {
    id: String,
    schema: ToolSchema,
    handler: Option<ToolHandler>,
}

impl ToolbeltTool {
    /// A tool without a handler is executed by the client.
    pub fn new(schema: ToolSchema, handler: Option<ToolHandler>) -> Self {
        Self {
            id: schema.name.to_lowercase().replace("::", "."),
            schema,
            handler,
        }
    }
}

#[async_trait]
impl Tool for ToolbeltTool {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        self.schema.name
    }

    fn description(&self) -> &str {
        self.schema.description
    }

    fn requires_permission(&self) -> bool {
        matches!(self.schema.location, ToolLocation::Client)
    }

    fn parameters_schema(&self) -> Value {
        self.schema.parameters_schema()
    }

    async fn execute(&self, parameters: &Arguments) -> Result<ToolResult, ToolError> {
        let Some(handler) = self.handler else {
            return Err(ToolError::RequiresExternalExecution {
                tool: self.schema.name.to_string(),
            });
        };

        let output = handler(parameters)?;
        Ok(ToolResult::success(output))
    }
}
