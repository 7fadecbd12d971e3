use std::collections::VecDeque;
use std::sync::Arc;

use colloquy_shared::{Message, ToolCall, ToolError, ToolRegistry, ToolResult};
use thiserror::Error;
use tracing::{debug, warn};

/// The Nth identical consecutive call is refused instead of executed.
pub const LOOP_THRESHOLD: usize = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvokeError {
    #[error("Tool '{0}' not found")]
    ToolNotFound(String),

    #[error("Tool '{tool}' must be executed by the client (call {call_id})")]
    ExternalExecutionRequired { tool: String, call_id: String },
}

#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub result: ToolResult,
    pub message: Message,
    pub loop_detected: bool,
}

/// `serde_json::Map` keeps keys sorted, so equal argument maps serialize identically.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Signature {
    name: String,
    arguments: String,
}

impl Signature {
    fn of(call: &ToolCall) -> Self {
        Self {
            name: call.name.clone(),
            arguments: serde_json::Value::Object(call.arguments.clone()).to_string(),
        }
    }
}

/// Executes tool calls for one conversation session.
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    recent: VecDeque<Signature>,
    threshold: usize,
}

impl ToolInvoker {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self::with_threshold(registry, LOOP_THRESHOLD)
    }

    pub fn with_threshold(registry: Arc<ToolRegistry>, threshold: usize) -> Self {
        Self {
            registry,
            recent: VecDeque::new(),
            threshold: threshold.max(1),
        }
    }

    /// True while no call has been seen since creation or the last reset.
    pub fn is_idle(&self) -> bool {
        self.recent.is_empty()
    }

    pub fn reset(&mut self) {
        self.recent.clear();
    }

    pub async fn execute(&mut self, call: &ToolCall) -> Result<ToolInvocation, InvokeError> {
        let tool = self
            .registry
            .get(&call.name)
            .ok_or_else(|| InvokeError::ToolNotFound(call.name.clone()))?;

        let signature = Signature::of(call);
        let repeated = self.is_repetition(&signature);
        self.remember(signature);

        if repeated {
            warn!(tool = %call.name, "Repeated identical tool call, not executing");
            return Ok(Self::finish(call, ToolResult::failure(loop_notice(&call.name, self.threshold)), true));
        }

        if !tool.can_execute() {
            return Ok(Self::finish(
                call,
                ToolResult::failure(format!("Tool '{}' is currently unavailable", call.name)),
                false,
            ));
        }

        debug!(tool = %call.name, call_id = %call.id, "Executing tool");
        let result = match tool.execute(&call.arguments).await {
            Ok(result) => result,
            Err(ToolError::RequiresExternalExecution { tool }) => {
                return Err(InvokeError::ExternalExecutionRequired {
                    tool,
                    call_id: call.id.clone(),
                });
            }
            Err(ToolError::Execution(e)) => ToolResult::failure(e.to_string()),
        };

        Ok(Self::finish(call, result, false))
    }

    /// Runs calls one after another; stops at the first call that cannot be handled here.
    pub async fn execute_all(&mut self, calls: &[ToolCall]) -> Result<Vec<ToolInvocation>, InvokeError> {
        let mut invocations = Vec::with_capacity(calls.len());
        for call in calls {
            invocations.push(self.execute(call).await?);
        }
        Ok(invocations)
    }

    fn is_repetition(&self, signature: &Signature) -> bool {
        self.recent.len() + 1 >= self.threshold && self.recent.iter().all(|s| s == signature)
    }

    fn remember(&mut self, signature: Signature) {
        self.recent.push_back(signature);
        while self.recent.len() >= self.threshold {
            self.recent.pop_front();
        }
    }

    fn finish(call: &ToolCall, result: ToolResult, loop_detected: bool) -> ToolInvocation {
        let content = if result.success {
            result.text().to_string()
        } else {
            format!("Error: {}", result.text())
        };

        ToolInvocation {
            message: Message::tool(&call.id, content),
            result,
            loop_detected,
        }
    }
}

fn loop_notice(name: &str, threshold: usize) -> String {
    format!(
        "Loop detected: '{}' was called with identical arguments {} times in a row, so this call was not executed. \
         Use the results you already have or try a different approach.",
        name, threshold
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use colloquy_shared::{Arguments, Role, Tool};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Echo,
        Fail,
        Remote,
        Disabled,
    }

    struct StubTool {
        name: &'static str,
        behavior: Behavior,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for StubTool {
        fn id(&self) -> &str {
            self.name
        }

        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "stub"
        }

        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }

        fn can_execute(&self) -> bool {
            !matches!(self.behavior, Behavior::Disabled)
        }

        async fn execute(&self, parameters: &Arguments) -> Result<ToolResult, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Echo => Ok(ToolResult::success(Value::Object(parameters.clone()).to_string())),
                Behavior::Fail => Err(ToolError::Execution(anyhow::anyhow!("disk on fire"))),
                Behavior::Remote => Err(ToolError::RequiresExternalExecution { tool: self.name.into() }),
                Behavior::Disabled => unreachable!("gated by can_execute"),
            }
        }
    }

    fn invoker() -> (ToolInvoker, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        for (name, behavior) in [
            ("echo", Behavior::Echo),
            ("fail", Behavior::Fail),
            ("remote", Behavior::Remote),
            ("disabled", Behavior::Disabled),
        ] {
            registry.register(Arc::new(StubTool { name, behavior, calls: calls.clone() }));
        }
        (ToolInvoker::new(Arc::new(registry)), calls)
    }

    fn call(name: &str, args: Value) -> ToolCall {
        let Value::Object(map) = args else { panic!("object args") };
        ToolCall::new(name, map)
    }

    #[tokio::test]
    async fn success_becomes_tool_message() {
        let (mut invoker, _) = invoker();
        let c = call("echo", json!({ "x": 1 }));
        let inv = invoker.execute(&c).await.unwrap();
        assert!(inv.result.success);
        assert!(!inv.loop_detected);
        assert_eq!(inv.message.role, Role::Tool);
        assert_eq!(inv.message.tool_call_id.as_deref(), Some(c.id.as_str()));
        assert_eq!(inv.message.content, r#"{"x":1}"#);
    }

    #[tokio::test]
    async fn failure_becomes_error_message() {
        let (mut invoker, _) = invoker();
        let inv = invoker.execute(&call("fail", json!({}))).await.unwrap();
        assert!(!inv.result.success);
        assert_eq!(inv.result.error.as_deref(), Some("disk on fire"));
        assert_eq!(inv.message.content, "Error: disk on fire");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let (mut invoker, _) = invoker();
        let err = invoker.execute(&call("nope", json!({}))).await.unwrap_err();
        assert_eq!(err, InvokeError::ToolNotFound("nope".into()));
    }

    #[tokio::test]
    async fn external_execution_propagates() {
        let (mut invoker, _) = invoker();
        let c = call("remote", json!({}));
        let err = invoker.execute(&c).await.unwrap_err();
        assert_eq!(
            err,
            InvokeError::ExternalExecutionRequired { tool: "remote".into(), call_id: c.id.clone() }
        );
    }

    #[tokio::test]
    async fn disabled_tool_is_not_run() {
        let (mut invoker, calls) = invoker();
        let inv = invoker.execute(&call("disabled", json!({}))).await.unwrap();
        assert!(!inv.result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn third_identical_call_is_refused() {
        let (mut invoker, calls) = invoker();
        let same = json!({ "path": "a", "n": 1 });

        let first = invoker.execute(&call("echo", same.clone())).await.unwrap();
        let second = invoker.execute(&call("echo", same.clone())).await.unwrap();
        let third = invoker.execute(&call("echo", same)).await.unwrap();
        assert!(!first.loop_detected && !second.loop_detected);
        assert!(third.loop_detected);
        assert!(third.message.content.contains("Loop detected"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let fourth = invoker.execute(&call("echo", json!({ "path": "b" }))).await.unwrap();
        assert!(fourth.result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn key_order_does_not_matter() {
        let (mut invoker, calls) = invoker();
        invoker.execute(&call("echo", json!({ "a": 1, "b": 2 }))).await.unwrap();
        invoker.execute(&call("echo", json!({ "b": 2, "a": 1 }))).await.unwrap();
        let third = invoker.execute(&call("echo", json!({ "a": 1, "b": 2 }))).await.unwrap();
        assert!(third.loop_detected);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn interleaved_calls_are_not_loops() {
        let (mut invoker, calls) = invoker();
        for i in 0..6 {
            let args = json!({ "i": i % 2 });
            assert!(!invoker.execute(&call("echo", args)).await.unwrap().loop_detected);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn reset_clears_history() {
        let (mut invoker, calls) = invoker();
        let same = json!({ "k": "v" });
        assert!(invoker.is_idle());
        invoker.execute(&call("echo", same.clone())).await.unwrap();
        invoker.execute(&call("echo", same.clone())).await.unwrap();
        assert!(!invoker.is_idle());
        invoker.reset();
        assert!(invoker.is_idle());
        let next = invoker.execute(&call("echo", same)).await.unwrap();
        assert!(!next.loop_detected);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn execute_all_keeps_going_after_failures() {
        let (mut invoker, _) = invoker();
        let batch = vec![call("fail", json!({})), call("echo", json!({ "z": 0 }))];
        let results = invoker.execute_all(&batch).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(!results[0].result.success);
        assert!(results[1].result.success);

        let batch = vec![call("echo", json!({})), call("nope", json!({}))];
        assert!(matches!(
            invoker.execute_all(&batch).await,
            Err(InvokeError::ToolNotFound(_))
        ));
    }
}
