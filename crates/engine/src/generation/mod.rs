pub mod classifier;
pub mod extractor;
pub mod invoker;


use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use colloquy_shared::{ChatEvent, GenerationContext, Message, ToolCall, ToolDescriptor, ToolRegistry, ToolResult};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::events::{ChatStream, Disconnected, EventSender};
use crate::provider::{ModelRequest, ModelSource};
use crate::store::MessageStore;

use classifier::{ClassifiedDelta, Segment, StreamClassifier};
use extractor::{extract, NativeCallAccumulator};
use invoker::{InvokeError, ToolInvoker};

pub const DEFAULT_MAX_TURNS: usize = 10;

/// Placeholder some providers put in the name slot when they could not pick a function.
pub const SENTINEL_TOOL_NAME: &str = "tool_name";

const EVENT_BUFFER: usize = 64;

/// Result of a tool the caller ran on its own side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
    /// Context assembled by the caller, oldest first.
    pub history: Vec<Message>,
    pub tool_outputs: Vec<ToolOutput>,
    pub tools: Vec<ToolDescriptor>,
    pub max_turns: Option<usize>,
    pub parent_id: Option<String>,
}

impl ChatRequest {
    pub fn new(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_outputs(mut self, outputs: Vec<ToolOutput>) -> Self {
        self.tool_outputs = outputs;
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_parent(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = parent_id;
        self
    }
}

/// Why a conversation task stopped early.
enum Stop {
    Disconnected,
    Failed(EngineError),
}

impl From<Disconnected> for Stop {
    fn from(_: Disconnected) -> Self {
        Stop::Disconnected
    }
}

impl From<EngineError> for Stop {
    fn from(error: EngineError) -> Self {
        Stop::Failed(error)
    }
}

enum TurnOutcome {
    /// Tools ran; their results go back to the model.
    Continue,
    /// The model answered without (usable) tool calls.
    Answered,
    /// A tool has to run on the caller's side.
    Paused,
}

/// Messages persisted during one call, chained by `parent_id` when the caller supplied one.
struct Transcript<'a> {
    store: &'a dyn MessageStore,
    session_id: &'a str,
    parent: Option<String>,
    history: Vec<Message>,
}

impl Transcript<'_> {
    async fn record(&mut self, message: Message) -> Result<(), EngineError> {
        let message = message.with_parent(self.parent.take());
        self.store
            .save_message(self.session_id, &message)
            .await
            .map_err(EngineError::Persistence)?;

        if message.parent_id.is_some() {
            self.parent = Some(message.id.clone());
        }
        self.history.push(message);
        Ok(())
    }
}

pub struct GenerationEngine {
    source: Arc<dyn ModelSource>,
    registry: Arc<ToolRegistry>,
    store: Arc<dyn MessageStore>,
    invokers: Mutex<HashMap<String, ToolInvoker>>,
    max_turns: usize,
}

impl GenerationEngine {
    pub fn new(source: Arc<dyn ModelSource>, registry: Arc<ToolRegistry>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            source,
            registry,
            store,
            invokers: Mutex::new(HashMap::new()),
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn model(&self) -> &str {
        self.source.model()
    }

    /// Starts a generation and returns its event stream.
    ///
    /// The work runs on its own task. Dropping the stream stops it at the next
    /// model fragment, tool execution or event.
    pub fn chat_stream(self: &Arc<Self>, request: ChatRequest) -> Result<ChatStream, EngineError> {
        if request.message.trim().is_empty() && request.tool_outputs.is_empty() {
            return Err(EngineError::InvalidInput(
                "message is empty and there is no tool output to continue from".to_string(),
            ));
        }

        info!(
            session = %request.session_id,
            history = request.history.len(),
            tools = request.tools.len(),
            "Starting generation"
        );

        let (events, stream) = EventSender::channel(EVENT_BUFFER);
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run(request, events).await });
        Ok(stream)
    }

    /// Forgets the repetition history of a session.
    pub fn reset_session(&self, session_id: &str) {
        let mut invokers = self.invokers.lock().unwrap_or_else(PoisonError::into_inner);
        if invokers.remove(session_id).is_some() {
            debug!(session = session_id, "Reset tool invoker");
        }
    }

    fn checkout_invoker(&self, session_id: &str) -> ToolInvoker {
        let mut invokers = self.invokers.lock().unwrap_or_else(PoisonError::into_inner);
        invokers
            .remove(session_id)
            .unwrap_or_else(|| ToolInvoker::new(Arc::clone(&self.registry)))
    }

    /// Sessions that never ran a tool leave nothing behind.
    fn return_invoker(&self, session_id: &str, invoker: ToolInvoker) {
        if invoker.is_idle() {
            return;
        }
        let mut invokers = self.invokers.lock().unwrap_or_else(PoisonError::into_inner);
        invokers.insert(session_id.to_string(), invoker);
    }

    async fn run(self: Arc<Self>, request: ChatRequest, events: EventSender) {
        let mut invoker = self.checkout_invoker(&request.session_id);
        let outcome = self.converse(&request, &mut invoker, &events).await;
        self.return_invoker(&request.session_id, invoker);

        match outcome {
            Ok(()) => debug!(session = %request.session_id, "Generation completed"),
            Err(Stop::Disconnected) => info!(session = %request.session_id, "Caller went away, stopping generation"),
            Err(Stop::Failed(error)) => {
                warn!(session = %request.session_id, "Generation failed: {}", error);
                events.fail(error).await;
            }
        }
    }

    async fn converse(
        &self,
        request: &ChatRequest,
        invoker: &mut ToolInvoker,
        events: &EventSender,
    ) -> Result<(), Stop> {
        let max_turns = request.max_turns.unwrap_or(self.max_turns);
        let offered: HashSet<&str> = request.tools.iter().map(ToolDescriptor::name).collect();

        events
            .send(ChatEvent::GenerationContext {
                context: GenerationContext {
                    session_id: request.session_id.clone(),
                    model: self.source.model().to_string(),
                    turn_limit: max_turns,
                    history_len: request.history.len(),
                    tools: request.tools.iter().map(|t| t.name().to_string()).collect(),
                    prompt_chars: request.history.iter().map(|m| m.content.len()).sum::<usize>()
                        + request.message.len(),
                },
            })
            .await?;

        let mut transcript = Transcript {
            store: self.store.as_ref(),
            session_id: &request.session_id,
            parent: request.parent_id.clone(),
            history: request.history.clone(),
        };

        for output in &request.tool_outputs {
            transcript
                .record(Message::tool(&output.call_id, &output.content))
                .await?;
        }
        if !request.message.trim().is_empty() {
            transcript.record(Message::user(&request.message)).await?;
        }

        for turn in 1..=max_turns {
            if events.is_closed() {
                return Err(Stop::Disconnected);
            }
            debug!(session = %request.session_id, turn, max_turns, "Starting turn");

            match self.turn(request, &offered, &mut transcript, invoker, events).await? {
                TurnOutcome::Continue if turn == max_turns => {
                    info!(session = %request.session_id, max_turns, "Turn limit reached");
                }
                TurnOutcome::Continue => {}
                TurnOutcome::Answered | TurnOutcome::Paused => break,
            }
        }

        events.complete().await?;
        Ok(())
    }

    async fn turn(
        &self,
        request: &ChatRequest,
        offered: &HashSet<&str>,
        transcript: &mut Transcript<'_>,
        invoker: &mut ToolInvoker,
        events: &EventSender,
    ) -> Result<TurnOutcome, Stop> {
        let model_request = ModelRequest {
            messages: transcript.history.clone(),
            tools: request.tools.clone(),
        };
        let mut fragments = self.source.stream(&model_request).await.map_err(EngineError::Model)?;

        let mut classifier = StreamClassifier::new();
        let mut native = NativeCallAccumulator::new();
        let mut fragment_count = 0usize;

        while let Some(fragment) = fragments.next().await {
            let fragment = fragment.map_err(EngineError::Model)?;
            fragment_count += 1;

            if let Some(text) = &fragment.text {
                emit_classified(classifier.process(text), events).await?;
            }
            for piece in &fragment.tool_calls {
                if let Some(notice) = native.push(piece) {
                    events
                        .send(ChatEvent::ToolCall {
                            index: notice.index,
                            id: notice.id,
                            name: notice.name,
                        })
                        .await?;
                }
            }
        }

        emit_classified(classifier.flush(), events).await?;
        if classifier.is_thinking() {
            events.send(ChatEvent::ThoughtCompleted).await?;
        }

        let classified = classifier.finalize();
        let extraction = extract(native, &classified.visible);
        debug!(
            fragments = fragment_count,
            visible_chars = classified.visible.len(),
            extracted = extraction.calls.len(),
            "Model stream finished"
        );

        let calls: Vec<ToolCall> = extraction
            .calls
            .into_iter()
            .filter(|call| accept_call(call, offered))
            .collect();

        if calls.is_empty() {
            transcript
                .record(Message::assistant(classified.visible, classified.thinking))
                .await?;
            return Ok(TurnOutcome::Answered);
        }

        transcript
            .record(Message::assistant(extraction.text, classified.thinking).with_tool_calls(calls.clone()))
            .await?;

        for call in &calls {
            events.attempting(&call.id).await?;

            match invoker.execute(call).await {
                Ok(invocation) => {
                    events.tool_result(&call.id, invocation.result).await?;
                    transcript.record(invocation.message).await?;
                }
                Err(InvokeError::ExternalExecutionRequired { tool, call_id }) => {
                    info!(tool = %tool, call_id = %call_id, "Pausing for client-side tool execution");
                    return Ok(TurnOutcome::Paused);
                }
                Err(error @ InvokeError::ToolNotFound(_)) => {
                    warn!("{}", error);
                    let result = ToolResult::failure(error.to_string());
                    let message = Message::tool(&call.id, format!("Error: {}", error));
                    events.tool_result(&call.id, result).await?;
                    transcript.record(message).await?;
                }
            }
        }

        Ok(TurnOutcome::Continue)
    }
}

/// Calls named with the placeholder, or naming a tool this turn did not offer, are dropped.
fn accept_call(call: &ToolCall, offered: &HashSet<&str>) -> bool {
    if call.name == SENTINEL_TOOL_NAME {
        warn!("Discarding tool call with placeholder name");
        return false;
    }
    if !offered.contains(call.name.as_str()) {
        warn!(tool = %call.name, "Discarding call to a tool that was not offered");
        return false;
    }
    true
}

async fn emit_classified(delta: ClassifiedDelta, events: &EventSender) -> Result<(), Disconnected> {
    for segment in delta.into_segments() {
        match segment {
            Segment::Thinking(text) => events.thought(text).await?,
            Segment::Visible(text) => events.delta(text).await?,
            Segment::ThinkingClosed => events.send(ChatEvent::ThoughtCompleted).await?,
            Segment::Reclassified(thought) => {
                events.send(ChatEvent::Reclassified { thought }).await?;
                events.send(ChatEvent::ThoughtCompleted).await?;
            }
        }
    }
    Ok(())
}
