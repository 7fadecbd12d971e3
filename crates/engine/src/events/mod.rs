use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub use colloquy_shared::events::{ChatEvent, GenerationContext, ToolExecutionStatus};
use colloquy_shared::ToolResult;

use crate::error::EngineError;

pub type ChatStream = ReceiverStream<Result<ChatEvent, EngineError>>;

/// The receiving half of a chat stream is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

/// Sending half of one chat stream.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Result<ChatEvent, EngineError>>,
}

impl EventSender {
    pub fn channel(capacity: usize) -> (Self, ChatStream) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, ReceiverStream::new(rx))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn send(&self, event: ChatEvent) -> Result<(), Disconnected> {
        self.tx.send(Ok(event)).await.map_err(|_| Disconnected)
    }

    pub async fn thought(&self, text: String) -> Result<(), Disconnected> {
        self.send(ChatEvent::Thought { text }).await
    }

    pub async fn delta(&self, text: String) -> Result<(), Disconnected> {
        self.send(ChatEvent::Delta { text }).await
    }

    pub async fn attempting(&self, call_id: &str) -> Result<(), Disconnected> {
        self.tool_status(call_id, ToolExecutionStatus::Attempting).await
    }

    pub async fn tool_result(&self, call_id: &str, result: ToolResult) -> Result<(), Disconnected> {
        let status = if result.success {
            ToolExecutionStatus::Success { result }
        } else {
            ToolExecutionStatus::Failure {
                message: result.text().to_string(),
            }
        };
        self.tool_status(call_id, status).await
    }

    pub async fn complete(&self) -> Result<(), Disconnected> {
        self.send(ChatEvent::GenerationCompleted).await
    }

    /// Ends the stream with an error. Nothing should be sent afterwards.
    pub async fn fail(self, error: EngineError) {
        let _ = self.tx.send(Err(error)).await;
    }

    async fn tool_status(&self, call_id: &str, status: ToolExecutionStatus) -> Result<(), Disconnected> {
        self.send(ChatEvent::ToolExecution {
            call_id: call_id.to_string(),
            status,
        })
        .await
    }
}
