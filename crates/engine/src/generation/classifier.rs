// Incremental thinking/visible classifier for raw model output.
//
// Fragments arrive in whatever sizes the provider chooses, so any delimiter
// may be split across calls. A tail that could still grow into a delimiter
// is held back until the next fragment (or `flush`) resolves it.

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";
const FENCE: &str = "```";

const CODE_DELIMITERS: &[&str] = &[FENCE];
const TEXT_DELIMITERS: &[&str] = &[FENCE, THINK_OPEN, THINK_CLOSE];

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Thinking(String),
    Visible(String),
    /// A reasoning block was closed.
    ThinkingClosed,
    /// An orphaned close tag moved everything shown as visible so far into thinking.
    Reclassified(String),
}

/// Output of one `process` call, in the order the text arrived.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ClassifiedDelta {
    segments: Vec<Segment>,
}

impl ClassifiedDelta {
    fn push_text(&mut self, thinking: bool, text: &str) {
        if text.is_empty() {
            return;
        }
        match (self.segments.last_mut(), thinking) {
            (Some(Segment::Thinking(prev)), true) | (Some(Segment::Visible(prev)), false) => {
                prev.push_str(text)
            }
            (_, true) => self.segments.push(Segment::Thinking(text.to_string())),
            (_, false) => self.segments.push(Segment::Visible(text.to_string())),
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Text classified as thinking by this call, including any reclassified text.
    pub fn thinking(&self) -> Option<String> {
        let text: String = self
            .segments
            .iter()
            .filter_map(|s| match s {
                Segment::Thinking(t) | Segment::Reclassified(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        (!text.is_empty()).then_some(text)
    }

    pub fn visible(&self) -> Option<String> {
        let text: String = self
            .segments
            .iter()
            .filter_map(|s| match s {
                Segment::Visible(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        (!text.is_empty()).then_some(text)
    }

    pub fn reclassified(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Reclassified(_)))
    }
}

/// Totals for a finished stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub thinking: Option<String>,
    pub visible: String,
}

#[derive(Debug, Default)]
pub struct StreamClassifier {
    pending: String,
    in_thinking: bool,
    in_code: bool,
    seen_open: bool,
    reclassified: bool,
    thinking: String,
    visible: String,
}

impl StreamClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_thinking(&self) -> bool {
        self.in_thinking
    }

    pub fn in_code_block(&self) -> bool {
        self.in_code
    }

    pub fn thinking(&self) -> &str {
        &self.thinking
    }

    pub fn visible(&self) -> &str {
        &self.visible
    }

    pub fn process(&mut self, fragment: &str) -> ClassifiedDelta {
        let mut delta = ClassifiedDelta::default();
        let mut buffer = std::mem::take(&mut self.pending);
        buffer.push_str(fragment);

        let mut rest = buffer.as_str();
        loop {
            match self.next_delimiter(rest) {
                Some((pos, delimiter)) => {
                    self.append(&mut delta, &rest[..pos]);
                    self.apply(&mut delta, delimiter);
                    rest = &rest[pos + delimiter.len()..];
                }
                None => {
                    let hold = self.partial_suffix_len(rest);
                    let (emit, keep) = rest.split_at(rest.len() - hold);
                    self.append(&mut delta, emit);
                    self.pending = keep.to_string();
                    break;
                }
            }
        }

        delta
    }

    /// Releases any held-back partial delimiter as literal text.
    pub fn flush(&mut self) -> ClassifiedDelta {
        let mut delta = ClassifiedDelta::default();
        let pending = std::mem::take(&mut self.pending);
        self.append(&mut delta, &pending);
        delta
    }

    /// An unterminated reasoning block still counts as thinking.
    pub fn finalize(mut self) -> Classified {
        self.flush();
        Classified {
            thinking: (!self.thinking.is_empty()).then_some(self.thinking),
            visible: self.visible,
        }
    }

    fn delimiters(&self) -> &'static [&'static str] {
        if self.in_code {
            CODE_DELIMITERS
        } else {
            TEXT_DELIMITERS
        }
    }

    fn next_delimiter(&self, text: &str) -> Option<(usize, &'static str)> {
        self.delimiters()
            .iter()
            .filter_map(|d| text.find(*d).map(|pos| (pos, *d)))
            .min_by_key(|(pos, _)| *pos)
    }

    /// Length of the longest tail of `text` that is a proper prefix of a delimiter.
    fn partial_suffix_len(&self, text: &str) -> usize {
        let bytes = text.as_bytes();
        let delimiters = self.delimiters();
        let longest = delimiters.iter().map(|d| d.len()).max().unwrap_or(0);

        (1..longest.min(bytes.len() + 1))
            .rev()
            .find(|&k| {
                let tail = &bytes[bytes.len() - k..];
                delimiters.iter().any(|d| d.len() > k && d.as_bytes().starts_with(tail))
            })
            .unwrap_or(0)
    }

    fn append(&mut self, delta: &mut ClassifiedDelta, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.in_thinking {
            self.thinking.push_str(text);
        } else {
            self.visible.push_str(text);
        }
        delta.push_text(self.in_thinking, text);
    }

    fn apply(&mut self, delta: &mut ClassifiedDelta, delimiter: &str) {
        match delimiter {
            FENCE => {
                // Fences are content on whichever channel is active.
                self.append(delta, FENCE);
                self.in_code = !self.in_code;
            }
            THINK_OPEN => {
                self.seen_open = true;
                self.in_thinking = true;
            }
            THINK_CLOSE if self.in_thinking => {
                self.in_thinking = false;
                delta.segments.push(Segment::ThinkingClosed);
            }
            THINK_CLOSE if !self.seen_open && !self.reclassified => {
                let moved = std::mem::take(&mut self.visible);
                self.thinking.push_str(&moved);
                self.reclassified = true;
                delta.segments.retain(|s| !matches!(s, Segment::Visible(_)));
                delta.segments.push(Segment::Reclassified(moved));
            }
            _ => {}
        }
    }
}
