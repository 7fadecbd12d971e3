// crates/shared/src/schemas
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::message::Arguments;

/// Where a tool's effect has to happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolLocation {
    /// Runs inside the engine process.
    Server,
    /// Runs on the caller's workspace host.
    Client,
}

#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Vec<ParameterSchema>,
    pub location: ToolLocation,
}

#[derive(Debug, Clone)]
pub struct ParameterSchema {
    pub name: &'static str,
    pub type_name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

/// Tool description offered to the model for a turn.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDescriptor {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDescriptor {
    pub fn function(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

impl ToolSchema {
    pub fn parameters_schema(&self) -> Value {
        let mut properties = json!({});
        let mut required = vec![];

        for param in &self.parameters {
            properties[param.name] = json!({
                "type": param.type_name,
                "description": param.description
            });
            if param.required {
                required.push(param.name);
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required
        })
    }
}

pub type ToolHandler = fn(&Arguments) -> anyhow::Result<String>;
