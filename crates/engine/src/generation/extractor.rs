use std::collections::BTreeMap;
use std::ops::Range;

use colloquy_shared::{Arguments, ToolCall};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::provider::ToolCallFragment;

const FENCE: &str = "```";

static TOOL_CALL_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<tool_call>(.*?)</tool_call>").expect("valid tool call pattern"));

static TOOL_CALLS_ONLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*(?:<tool_call>.*?</tool_call>\s*)+$").expect("valid tool call pattern")
});

/// Announced the first time a native call's name becomes known.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallNotice {
    pub index: usize,
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
    announced: bool,
}

/// Collects native tool-call fragments per index until the stream ends.
#[derive(Debug, Default)]
pub struct NativeCallAccumulator {
    calls: BTreeMap<usize, PartialCall>,
}

impl NativeCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn push(&mut self, fragment: &ToolCallFragment) -> Option<ToolCallNotice> {
        let call = self.calls.entry(fragment.index).or_default();

        if let Some(id) = &fragment.id {
            call.id.push_str(id);
        }
        if let Some(name) = &fragment.name {
            call.name.push_str(name);
        }
        if let Some(arguments) = &fragment.arguments {
            call.arguments.push_str(arguments);
        }

        if call.announced || call.name.is_empty() {
            return None;
        }
        call.announced = true;
        Some(ToolCallNotice {
            index: fragment.index,
            id: (!call.id.is_empty()).then(|| call.id.clone()),
            name: call.name.clone(),
        })
    }

    /// Completed calls in index order. Calls that never received a name are dropped.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .filter_map(|(index, call)| {
                let name = call.name.trim();
                if name.is_empty() {
                    warn!(index, "Dropping native tool call without a name");
                    return None;
                }

                let mut tool_call = ToolCall::new(name, parse_arguments(name, &call.arguments));
                if !call.id.is_empty() {
                    tool_call.id = call.id;
                }
                Some(tool_call)
            })
            .collect()
    }
}

fn parse_arguments(name: &str, raw: &str) -> Arguments {
    if raw.trim().is_empty() {
        return Arguments::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(tool = name, "Tool arguments are not an object: {}", other);
            Arguments::new()
        }
        Err(e) => {
            warn!(tool = name, "Unparseable tool arguments: {}", e);
            Arguments::new()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextualExtraction {
    pub text: String,
    pub calls: Vec<ToolCall>,
}

/// Pulls `<tool_call>{"name": ..., "arguments": {...}}</tool_call>` blocks out of visible text.
///
/// A fenced region holding nothing but tool-call blocks is removed whole. Blocks
/// inside fences that also hold other code are left alone as literal code.
/// Fence markers inside a tool-call block belong to its payload.
pub fn extract_textual(text: &str) -> TextualExtraction {
    let spans: Vec<Range<usize>> = TOOL_CALL_BLOCK.find_iter(text).map(|m| m.range()).collect();
    let fences: Vec<usize> = text
        .match_indices(FENCE)
        .map(|(at, _)| at)
        .filter(|at| !spans.iter().any(|span| span.contains(at)))
        .collect();

    let mut out = String::with_capacity(text.len());
    let mut calls = Vec::new();
    let mut last = 0;

    for pair in fences.chunks(2) {
        let &[open, close] = pair else {
            // Unclosed fence: everything after it is code.
            strip_blocks(&text[last..pair[0]], &mut out, &mut calls);
            out.push_str(&text[pair[0]..]);
            return TextualExtraction { text: out, calls };
        };

        strip_blocks(&text[last..open], &mut out, &mut calls);
        let end = close + FENCE.len();
        let body = fence_body(&text[open + FENCE.len()..close]);
        match TOOL_CALLS_ONLY
            .is_match(body)
            .then(|| parse_all(body))
            .flatten()
        {
            Some(parsed) => calls.extend(parsed),
            None => out.push_str(&text[open..end]),
        }
        last = end;
    }

    strip_blocks(&text[last..], &mut out, &mut calls);
    TextualExtraction { text: out, calls }
}

/// Fence contents without the language tag line, if any.
fn fence_body(inner: &str) -> &str {
    match inner.split_once('\n') {
        Some((tag, body)) if !tag.trim().is_empty() && !tag.contains('<') => body,
        _ => inner,
    }
}

fn parse_all(body: &str) -> Option<Vec<ToolCall>> {
    TOOL_CALL_BLOCK
        .captures_iter(body)
        .map(|caps| parse_payload(&caps[1]))
        .collect()
}

fn strip_blocks(segment: &str, out: &mut String, calls: &mut Vec<ToolCall>) {
    let mut last = 0;
    for caps in TOOL_CALL_BLOCK.captures_iter(segment) {
        let Some(block) = caps.get(0) else { continue };
        match parse_payload(&caps[1]) {
            Some(call) => {
                out.push_str(&segment[last..block.start()]);
                calls.push(call);
                last = block.end();
            }
            None => warn!("Ignoring malformed <tool_call> block"),
        }
    }
    out.push_str(&segment[last..]);
}

fn parse_payload(payload: &str) -> Option<ToolCall> {
    let value: Value = serde_json::from_str(payload.trim()).ok()?;
    let object = value.as_object()?;
    let name = object.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }

    let arguments = match object.get("arguments").or_else(|| object.get("parameters")) {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(raw)) => parse_arguments(name, raw),
        _ => Arguments::new(),
    };

    let mut call = ToolCall::new(name, arguments);
    if let Some(id) = object.get("id").and_then(Value::as_str) {
        call.id = id.to_string();
    }
    Some(call)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub text: String,
    pub calls: Vec<ToolCall>,
}

/// Native calls first (index order), then textual calls (document order).
pub fn extract(native: NativeCallAccumulator, visible: &str) -> Extraction {
    let mut calls = native.finish();
    let textual = extract_textual(visible);
    calls.extend(textual.calls);
    Extraction {
        text: textual.text,
        calls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fragment(index: usize, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> ToolCallFragment {
        ToolCallFragment {
            index,
            id: id.map(String::from),
            name: name.map(String::from),
            arguments: args.map(String::from),
        }
    }

    #[test]
    fn native_fragments_accumulate_per_index() {
        let mut acc = NativeCallAccumulator::new();
        let notice = acc.push(&fragment(0, Some("call_1"), Some("search"), Some("{\"q\":")));
        assert_eq!(
            notice,
            Some(ToolCallNotice { index: 0, id: Some("call_1".into()), name: "search".into() })
        );
        assert_eq!(acc.push(&fragment(1, None, Some("clock"), None)).map(|n| n.index), Some(1));
        assert_eq!(acc.push(&fragment(0, None, None, Some("\"rust\"}"))), None);

        let calls = acc.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments["q"], json!("rust"));
        assert_eq!(calls[1].name, "clock");
        assert!(calls[1].arguments.is_empty());
        assert!(calls[1].id.starts_with("call_"));
    }

    #[test]
    fn nameless_native_calls_are_dropped() {
        let mut acc = NativeCallAccumulator::new();
        assert_eq!(acc.push(&fragment(0, Some("x"), None, Some("{}"))), None);
        acc.push(&fragment(1, None, Some(""), None));
        assert!(acc.finish().is_empty());
    }

    #[test]
    fn invalid_native_arguments_become_empty() {
        let mut acc = NativeCallAccumulator::new();
        acc.push(&fragment(0, None, Some("t"), Some("{not json")));
        acc.push(&fragment(1, None, Some("u"), Some("[1,2]")));
        let calls = acc.finish();
        assert!(calls[0].arguments.is_empty());
        assert!(calls[1].arguments.is_empty());
    }

    #[test]
    fn textual_block_is_removed() {
        let text = "Checking.\n<tool_call>{\"name\": \"Clock::current_time\", \"arguments\": {}}</tool_call>\nDone.";
        let result = extract_textual(text);
        assert_eq!(result.text, "Checking.\n\nDone.");
        assert_eq!(result.calls.len(), 1);
        assert_eq!(result.calls[0].name, "Clock::current_time");
    }

    #[test]
    fn fenced_tool_call_is_removed_with_its_fence() {
        let text = "Sure.\n```json\n<tool_call>{\"name\": \"echo\", \"arguments\": {\"text\": \"a  b\"}}</tool_call>\n```\nAfter.";
        let result = extract_textual(text);
        assert_eq!(result.text, "Sure.\n\nAfter.");
        assert_eq!(result.calls[0].arguments["text"], json!("a  b"));
    }

    #[test]
    fn unrelated_fences_are_left_intact() {
        let text = "```rust\nfn main() {}\n```\nand <tool_call>{\"name\": \"a\", \"parameters\": \"{\\\"n\\\": 1}\"}</tool_call>";
        let result = extract_textual(text);
        assert_eq!(result.text, "```rust\nfn main() {}\n```\nand ");
        assert_eq!(result.calls[0].name, "a");
        assert_eq!(result.calls[0].arguments["n"], json!(1));
    }

    #[test]
    fn tool_call_inside_code_sample_is_literal() {
        let text = "```\nexample: <tool_call>{\"name\": \"a\"}</tool_call>\n```";
        let result = extract_textual(text);
        assert_eq!(result.text, text);
        assert!(result.calls.is_empty());
    }

    #[test]
    fn malformed_block_stays_in_text() {
        let text = "x <tool_call>{oops}</tool_call> y";
        let result = extract_textual(text);
        assert_eq!(result.text, text);
        assert!(result.calls.is_empty());
    }

    #[test]
    fn backticks_inside_arguments_stay_in_the_payload() {
        let block = r#"<tool_call>{"name":"FileSmith::write_file","arguments":{"path":"README.md","content":"```rust\nfn main() {}\n```"}}</tool_call>"#;

        let result = extract_textual(&format!("Writing.\n{}", block));
        assert_eq!(result.text, "Writing.\n");
        assert_eq!(result.calls.len(), 1);
        assert_eq!(result.calls[0].arguments["content"], json!("```rust\nfn main() {}\n```"));

        let result = extract_textual(&format!("Writing.\n```json\n{}\n```\nDone.", block));
        assert_eq!(result.text, "Writing.\n\nDone.");
        assert_eq!(result.calls.len(), 1);
        assert_eq!(result.calls[0].arguments["path"], json!("README.md"));
        assert_eq!(result.calls[0].arguments["content"], json!("```rust\nfn main() {}\n```"));
    }

    #[test]
    fn unclosed_fence_keeps_the_rest_as_code() {
        let text = "<tool_call>{\"name\": \"a\"}</tool_call> then\n```\n<tool_call>{\"name\": \"b\"}</tool_call>";
        let result = extract_textual(text);
        assert_eq!(result.text, " then\n```\n<tool_call>{\"name\": \"b\"}</tool_call>");
        let names: Vec<&str> = result.calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a"]);
    }

    #[test]
    fn native_calls_come_before_textual_calls() {
        let mut acc = NativeCallAccumulator::new();
        acc.push(&fragment(0, Some("n1"), Some("native"), Some("{}")));
        let visible = "Hi <tool_call>{\"name\": \"textual\", \"arguments\": {\"k\": true}}</tool_call>there";

        let extraction = extract(acc, visible);
        let names: Vec<&str> = extraction.calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["native", "textual"]);
        assert_eq!(extraction.text, "Hi there");
    }
}
