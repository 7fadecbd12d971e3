use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use colloquy_shared::{Message, Role, ToolDescriptor};
use reqwest::Client;
use serde::{Deserialize, Serialize};
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
    tools: Option<Vec<ToolDescriptor>>,
}

#[derive(Serialize, Debug)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Debug)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: WireFunction,
}

#[derive(Serialize, Debug)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

#[derive(Deserialize, Debug)]
struct Choice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Debug, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Deserialize, Debug)]
struct DeltaToolCall {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<DeltaFunction>,
}

#[derive(Deserialize, Debug)]
struct DeltaFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Function names must match `^[a-zA-Z0-9_-]{1,64}$`, so `Clock::current_time`
/// goes out as `Clock__current_time`.
fn wire_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Renamed descriptors plus the table that maps wire names back.
fn wire_tools(tools: &[ToolDescriptor]) -> (Vec<ToolDescriptor>, HashMap<String, String>) {
    let mut names = HashMap::with_capacity(tools.len());
    let renamed = tools
        .iter()
        .map(|descriptor| {
            let mut descriptor = descriptor.clone();
            let wire = wire_name(descriptor.name());
            names.insert(wire.clone(), descriptor.function.name.clone());
            descriptor.function.name = wire;
            descriptor
        })
        .collect();
    (renamed, names)
}

fn to_wire(message: &Message) -> WireMessage {
    let role = match message.role {
        Role::Summary => Role::System,
        role => role,
    };

    WireMessage {
        role: role.as_str(),
        content: message.content.clone(),
        tool_calls: message.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    call_type: "function",
                    function: WireFunction {
                        name: wire_name(&call.name),
                        arguments: serde_json::Value::Object(call.arguments.clone()).to_string(),
                    },
                })
                .collect()
        }),
        tool_call_id: message.tool_call_id.clone(),
    }
}

/// Streams from any OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct OpenAiSource {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiSource {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl ModelSource for OpenAiSource {
    fn model(&self) -> &str {
        &self.model
    }

    async fn stream(&self, request: &ModelRequest) -> Result<FragmentStream> {
        let (tools, names) = wire_tools(&request.tools);
        let body = ChatRequest {
            model: &self.model,
            messages: request.messages.iter().map(to_wire).collect(),
            stream: true,
            tools: (!tools.is_empty()).then_some(tools),
        };

        debug!(url = %self.url, messages = body.messages.len(), "Requesting completion stream");
        let mut builder = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.url))?;
        let response = check_status(response, "Completion endpoint").await?;

        Ok(spawn_line_stream(response, move |line| decode_line(line, &names)))
    }
}

/// Decodes one server-sent-events line. `names` maps wire tool names back to registry names.
fn decode_line(line: &str, names: &HashMap<String, String>) -> Result<Decoded> {
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(Decoded::Skip);
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return Ok(Decoded::Done);
    }

    let chunk: StreamChunk =
        serde_json::from_str(payload).with_context(|| format!("Malformed completion chunk: {}", payload))?;
    if let Some(error) = chunk.error {
        anyhow::bail!("Completion error: {}", error.message);
    }

    let mut fragment = StreamFragment::default();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            fragment.text.get_or_insert_with(String::new).push_str(&content);
        }
        for call in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match call.function {
                Some(f) => (f.name.map(|n| names.get(&n).cloned().unwrap_or(n)), f.arguments),
                None => (None, None),
            };
            fragment.tool_calls.push(ToolCallFragment {
                index: call.index,
                id: call.id,
                name,
                arguments,
            });
        }
    }

    Ok(Decoded::Fragment(fragment))
}
