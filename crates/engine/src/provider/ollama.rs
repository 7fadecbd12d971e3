use anyhow::{Context, Result};
use async_trait::async_trait;
use colloquy_shared::{Message, Role, ToolDescriptor};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{
    check_status, spawn_line_stream, Decoded, FragmentStream, ModelRequest, ModelSource, StreamFragment,
    ToolCallFragment,
};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDescriptor]>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

fn to_wire(message: &Message) -> WireMessage {
    let role = match message.role {
        Role::Summary => Role::System,
        role => role,
    };

    WireMessage {
        role: role.as_str().to_string(),
        content: message.content.clone(),
        thinking: None,
        tool_calls: message.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .map(|call| WireToolCall {
                    function: WireFunction {
                        name: call.name.clone(),
                        arguments: Value::Object(call.arguments.clone()),
                    },
                })
                .collect()
        }),
    }
}

/// Streams from an Ollama `/api/chat` endpoint.
pub struct OllamaSource {
    client: Client,
    url: String,
    model: String,
}

impl OllamaSource {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            url: format!("{}/api/chat", base_url.trim_end_matches('/')),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ModelSource for OllamaSource {
    fn model(&self) -> &str {
        &self.model
    }

    async fn stream(&self, request: &ModelRequest) -> Result<FragmentStream> {
        let body = ChatRequest {
            model: &self.model,
            messages: request.messages.iter().map(to_wire).collect(),
            stream: true,
            tools: (!request.tools.is_empty()).then_some(request.tools.as_slice()),
        };

        debug!(url = %self.url, messages = body.messages.len(), "Requesting Ollama stream");
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach Ollama at {}", self.url))?;
        let response = check_status(response, "Ollama").await?;

        let mut decoder = ChunkDecoder::default();
        Ok(spawn_line_stream(response, move |line| decoder.decode(line)))
    }
}

/// Turns NDJSON chunks into fragments.
///
/// Ollama reports reasoning in a separate `thinking` field; it is wrapped back
/// into `<think>` tags so downstream classification sees one text channel.
#[derive(Debug, Default)]
struct ChunkDecoder {
    in_thinking: bool,
    next_index: usize,
}

impl ChunkDecoder {
    fn decode(&mut self, line: &str) -> Result<Decoded> {
        let chunk: StreamChunk =
            serde_json::from_str(line).with_context(|| format!("Malformed Ollama chunk: {}", line))?;

        if let Some(error) = chunk.error {
            anyhow::bail!("Ollama error: {}", error);
        }

        let mut text = String::new();
        let mut tool_calls = Vec::new();

        if let Some(message) = chunk.message {
            if let Some(thinking) = message.thinking.filter(|t| !t.is_empty()) {
                if !self.in_thinking {
                    text.push_str("<think>");
                    self.in_thinking = true;
                }
                text.push_str(&thinking);
            }

            if !message.content.is_empty() {
                self.close_thinking(&mut text);
                text.push_str(&message.content);
            }

            for call in message.tool_calls.unwrap_or_default() {
                tool_calls.push(ToolCallFragment {
                    index: self.next_index,
                    id: None,
                    name: Some(call.function.name),
                    arguments: Some(match call.function.arguments {
                        Value::String(raw) => raw,
                        other => other.to_string(),
                    }),
                });
                self.next_index += 1;
            }
        }

        if chunk.done {
            self.close_thinking(&mut text);
        }

        let fragment = StreamFragment {
            text: (!text.is_empty()).then_some(text),
            tool_calls,
        };

        if chunk.done && fragment.is_empty() {
            return Ok(Decoded::Done);
        }
        Ok(Decoded::Fragment(fragment))
    }

    fn close_thinking(&mut self, text: &mut String) {
        if self.in_thinking {
            text.push_str("</think>");
            self.in_thinking = false;
        }
    }
}
