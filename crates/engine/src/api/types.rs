use serde::{Deserialize, Serialize};

use colloquy_shared::ToolDescriptor;

use crate::generation::ToolOutput;

// Chat endpoint
#[derive(Deserialize, Debug, Default)]
pub struct ChatBody {
    /// A fresh session is started when omitted.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub tool_outputs: Vec<ToolOutput>,
    /// Tool names to offer. Every registered tool is offered when omitted.
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    #[serde(default)]
    pub max_turns: Option<usize>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

// Tool listing
#[derive(Serialize)]
pub struct ToolsResponse {
    pub tools: Vec<ToolDescriptor>,
}

// Session reset
#[derive(Serialize)]
pub struct ResetResponse {
    pub session_id: String,
    pub reset: bool,
}
