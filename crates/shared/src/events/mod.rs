use serde::{Deserialize, Serialize};

use crate::message::ToolResult;

/// Trace metadata about the prompt assembled for a generation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct GenerationContext {
    pub session_id: String,
    pub model: String,
    pub turn_limit: usize,
    pub history_len: usize,
    pub tools: Vec<String>,
    pub prompt_chars: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ToolExecutionStatus {
    Attempting,
    Success { result: ToolResult },
    Failure { message: String },
}

/// Events emitted by a chat stream, in emission order.
///
/// `GenerationContext` is always first and `GenerationCompleted` always last,
/// unless the stream ends in an error.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    GenerationContext {
        context: GenerationContext,
    },
    Thought {
        text: String,
    },
    ThoughtCompleted,
    /// Text already streamed as visible turned out to be reasoning.
    Reclassified {
        thought: String,
    },
    Delta {
        text: String,
    },
    ToolCall {
        index: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
    },
    ToolExecution {
        call_id: String,
        status: ToolExecutionStatus,
    },
    GenerationCompleted,
}
