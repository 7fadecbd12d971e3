pub mod ollama;
pub mod openai;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use colloquy_shared::{Message, ToolDescriptor};
use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::{Config, Provider};

pub use ollama::OllamaSource;
pub use openai::OpenAiSource;

/// One piece of a native tool call. Every field but `index` may arrive split across fragments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallFragment {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamFragment {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallFragment>,
}

impl StreamFragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(fragment: ToolCallFragment) -> Self {
        Self {
            text: None,
            tool_calls: vec![fragment],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.as_deref().is_none_or(str::is_empty) && self.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDescriptor>,
}

pub type FragmentStream = BoxStream<'static, Result<StreamFragment>>;

/// Translates a provider's streaming wire format into typed fragments.
#[async_trait]
pub trait ModelSource: Send + Sync {
    fn model(&self) -> &str;

    async fn stream(&self, request: &ModelRequest) -> Result<FragmentStream>;
}

pub fn from_config(config: &Config) -> Arc<dyn ModelSource> {
    match config.provider {
        Provider::Ollama => Arc::new(OllamaSource::new(&config.model_url, &config.model)),
        Provider::OpenAi => Arc::new(OpenAiSource::new(
            &config.model_url,
            &config.model,
            config.api_key.clone(),
        )),
    }
}

/// What a single line of provider output means.
#[derive(Debug, PartialEq)]
pub(crate) enum Decoded {
    Fragment(StreamFragment),
    Skip,
    Done,
}

/// Splits a byte stream into complete lines, holding a partial line until its newline arrives.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest);
        let line = line.trim();
        (!line.is_empty()).then(|| line.to_string())
    }
}

/// Reads `response` line by line on a background task and yields decoded fragments.
///
/// The task ends when the receiver is dropped, on the first error, or on `Decoded::Done`.
pub(crate) fn spawn_line_stream<D>(response: reqwest::Response, mut decode: D) -> FragmentStream
where
    D: FnMut(&str) -> Result<Decoded> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let mut bytes = response.bytes_stream();
        let mut lines = LineBuffer::default();

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            };

            for line in lines.push(&chunk) {
                if !forward(&tx, decode(&line)).await {
                    return;
                }
            }
        }

        if let Some(line) = lines.finish() {
            forward(&tx, decode(&line)).await;
        }
    });

    ReceiverStream::new(rx).boxed()
}

/// Returns false once the stream should stop.
async fn forward(tx: &mpsc::Sender<Result<StreamFragment>>, decoded: Result<Decoded>) -> bool {
    match decoded {
        Ok(Decoded::Fragment(fragment)) if !fragment.is_empty() => tx.send(Ok(fragment)).await.is_ok(),
        Ok(Decoded::Fragment(_)) | Ok(Decoded::Skip) => true,
        Ok(Decoded::Done) => false,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            false
        }
    }
}

/// Fails with the status and body of a non-success response.
pub(crate) async fn check_status(response: reqwest::Response, provider: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    anyhow::bail!("{} returned {}: {}", provider, status, body.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_holds_partial_lines() {
        let mut lines = LineBuffer::default();
        assert!(lines.push(b"{\"a\":").is_empty());
        assert_eq!(lines.push(b"1}\n\n{\"b\""), vec!["{\"a\":1}".to_string()]);
        assert_eq!(lines.push(b":2}\r\n"), vec!["{\"b\":2}".to_string()]);
        assert_eq!(lines.finish(), None);

        lines.push(b"tail");
        assert_eq!(lines.finish().as_deref(), Some("tail"));
    }

    #[test]
    fn empty_fragments_are_recognised() {
        assert!(StreamFragment::default().is_empty());
        assert!(StreamFragment::text("").is_empty());
        assert!(!StreamFragment::text("x").is_empty());
        assert!(!StreamFragment::tool_call(ToolCallFragment::default()).is_empty());
    }
}
