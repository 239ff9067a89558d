//! Delta normalizer (C7): translates `chat`/`agent.event` payloads into a
//! canonical sequence of text/thinking deltas, tool-call transitions, and a
//! single terminal signal.
//!
//! No direct teacher precedent covers cumulative/incremental text
//! reconciliation — nothing in the retained corpus streams assistant text at
//! all — so this module is newly authored to the corpus's general idiom
//! (small `Result`-free state machine, thorough inline `#[cfg(test)]`
//! coverage of the literal scenarios in §8) rather than adapted from an
//! existing file. The adaptive `on_sync` throttle described in §4.7 is
//! deliberately left to the caller (`chat.rs`): this module is a pure
//! synchronous state machine — `process` takes one input and returns the
//! events it produced — so it stays unit-testable without a runtime, and
//! the chat-run session decides when to batch those events into UI syncs.

use serde_json::Value;

/// One item of assistant content inside a `chat` channel `delta`/`final` frame.
#[derive(Debug, Clone)]
pub enum ContentItem {
    /// A `text` content item.
    Text {
        /// The snapshot text, when present.
        text: Option<String>,
        /// The explicit incremental chunk, when present.
        delta: Option<String>,
    },
    /// A `thinking` content item.
    Thinking {
        /// The snapshot text, when present.
        thinking: Option<String>,
        /// The explicit incremental chunk, when present.
        delta: Option<String>,
    },
}

/// One normalizer input, unifying the `chat` and `agent.event` vocabularies
/// into a single sum type per §9's polymorphism design note.
#[derive(Debug, Clone)]
pub enum NormalizerInput {
    /// `chat` channel, `state=delta`.
    ChatDelta {
        /// The content items carried by this frame.
        content: Vec<ContentItem>,
    },
    /// `chat` channel, `state=final`.
    ChatFinal {
        /// The final message's content, if the server included one.
        message_content: Option<Vec<ContentItem>>,
    },
    /// `chat` channel, `state=error`.
    ChatError {
        /// The server-supplied error message, if present.
        error_message: Option<String>,
    },
    /// `agent.event`, `stream=assistant`.
    AgentAssistant {
        /// Snapshot text, when present.
        text: Option<String>,
        /// Explicit incremental chunk, when present.
        delta: Option<String>,
    },
    /// `agent.event`, `stream=thinking`.
    AgentThinking {
        /// Snapshot text, when present.
        text: Option<String>,
        /// Explicit incremental chunk, when present.
        delta: Option<String>,
    },
    /// `agent.event`, `stream=tool`, `data.phase=start`.
    AgentToolStart {
        /// The tool call id; frames missing this are dropped by the caller.
        tool_call_id: Option<String>,
        /// Tool name.
        name: String,
        /// Tool call arguments.
        args: Value,
    },
    /// `agent.event`, `stream=tool`, `data.phase=update`.
    AgentToolUpdate {
        /// The tool call id; frames missing this are dropped by the caller.
        tool_call_id: Option<String>,
        /// Partial tool result so far.
        partial_result: Value,
    },
    /// `agent.event`, `stream=tool`, `data.phase=result`.
    AgentToolResult {
        /// The tool call id; frames missing this are dropped by the caller.
        tool_call_id: Option<String>,
        /// Final tool result.
        result: Value,
        /// Whether the tool call ended in an error.
        is_error: bool,
    },
    /// `agent.event`, `stream=lifecycle`, `data.phase=start`.
    LifecycleStart,
    /// `agent.event`, `stream=lifecycle`, `data.phase=end`.
    LifecycleEnd,
    /// `agent.event`, `stream=lifecycle`, `data.phase=error`.
    LifecycleError {
        /// The server-supplied error message, if present.
        message: Option<String>,
    },
}

/// One canonical output event from the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedEvent {
    /// An incremental chunk of assistant text to append.
    TextDelta(String),
    /// The accumulated assistant text should be replaced wholesale (a
    /// non-prefix rewrite was observed).
    TextReplace(String),
    /// An incremental chunk of thinking text to append.
    ThinkingDelta(String),
    /// The accumulated thinking text should be replaced wholesale.
    ThinkingReplace(String),
    /// A tool call started.
    ToolStart {
        /// Tool call id.
        id: String,
        /// Tool name.
        name: String,
        /// Tool call arguments.
        args: Value,
    },
    /// A tool call reported partial progress.
    ToolUpdate {
        /// Tool call id.
        id: String,
        /// Partial result so far.
        partial_result: Value,
    },
    /// A tool call completed.
    ToolResult {
        /// Tool call id.
        id: String,
        /// Final result.
        result: Value,
        /// Whether the call ended in error.
        is_error: bool,
    },
    /// The run terminated. `Ok` on a clean finish, `Err` with the
    /// ChatError-worthy message otherwise.
    Terminal(Result<(), String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextMode {
    Snapshot,
    ExplicitDelta,
}

#[derive(Debug, Default)]
struct ChannelState {
    accumulated: String,
    mode: Option<TextMode>,
}

impl ChannelState {
    /// Apply one observed `(text, delta)` pair, returning the delta/replace
    /// event to emit, if any, per §4.7's normalization rules.
    fn observe(&mut self, text: Option<&str>, delta: Option<&str>) -> Option<(bool, String)> {
        if let Some(delta) = delta {
            // Rule 1: any explicit delta field latches explicit-delta mode
            // for the rest of the run; snapshots are ignored from here on.
            self.mode = Some(TextMode::ExplicitDelta);
            if delta.is_empty() {
                return None;
            }
            self.accumulated.push_str(delta);
            return Some((false, delta.to_string()));
        }

        if self.mode == Some(TextMode::ExplicitDelta) {
            // Already latched into explicit-delta mode; a bare snapshot
            // with no delta on this frame contributes nothing.
            return None;
        }
        self.mode = Some(TextMode::Snapshot);

        let snapshot = text?;
        if snapshot == self.accumulated {
            return None;
        }
        if let Some(suffix) = snapshot.strip_prefix(self.accumulated.as_str()) {
            // accumulated is a proper prefix of snapshot: extension.
            self.accumulated = snapshot.to_string();
            return Some((false, suffix.to_string()));
        }
        if self.accumulated.starts_with(snapshot) {
            // snapshot is a proper prefix of accumulated: the server sent a
            // shorter snapshot than what's already been emitted. There is
            // no well-formed positive delta to emit in this direction (see
            // DESIGN.md); track the shrink but emit nothing.
            self.accumulated = snapshot.to_string();
            return None;
        }
        // Non-prefix rewrite.
        self.accumulated = snapshot.to_string();
        Some((true, snapshot.to_string()))
    }
}

/// Per-run normalizer state, owned exclusively by one chat-run session
/// (§3's ownership summary).
#[derive(Debug, Default)]
pub struct DeltaNormalizer {
    text: ChannelState,
    thinking: ChannelState,
    lifecycle_start_observed: bool,
    terminated: bool,
}

impl DeltaNormalizer {
    /// Build a fresh normalizer for one run.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the run has already produced its terminal signal.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Feed one input, producing zero or more canonical output events.
    pub fn process(&mut self, input: NormalizerInput) -> Vec<NormalizedEvent> {
        if self.terminated {
            return Vec::new();
        }

        match input {
            NormalizerInput::ChatDelta { content } => self.process_content(&content),
            NormalizerInput::ChatFinal { message_content } => {
                let mut events = Vec::new();
                if let Some(content) = &message_content {
                    // Rule 4: fall back to emitting the whole message as a
                    // single delta if nothing was emitted yet for this run.
                    if self.text.accumulated.is_empty() && self.thinking.accumulated.is_empty() {
                        events.extend(self.process_content(content));
                    }
                }
                // Rule 3: a chat final doesn't terminate the run if an
                // agent.event lifecycle:start was already observed.
                if !self.lifecycle_start_observed {
                    self.terminated = true;
                    events.push(NormalizedEvent::Terminal(Ok(())));
                }
                events
            }
            NormalizerInput::ChatError { error_message } => {
                self.terminated = true;
                vec![NormalizedEvent::Terminal(Err(error_message.unwrap_or_else(|| {
                    "chat run failed with no error message".to_string()
                })))]
            }
            NormalizerInput::AgentAssistant { text, delta } => {
                self.emit_text(text.as_deref(), delta.as_deref())
            }
            NormalizerInput::AgentThinking { text, delta } => {
                self.emit_thinking(text.as_deref(), delta.as_deref())
            }
            NormalizerInput::AgentToolStart { tool_call_id, name, args } => tool_call_id
                .map(|id| vec![NormalizedEvent::ToolStart { id, name, args }])
                .unwrap_or_default(),
            NormalizerInput::AgentToolUpdate { tool_call_id, partial_result } => tool_call_id
                .map(|id| vec![NormalizedEvent::ToolUpdate { id, partial_result }])
                .unwrap_or_default(),
            NormalizerInput::AgentToolResult { tool_call_id, result, is_error } => tool_call_id
                .map(|id| vec![NormalizedEvent::ToolResult { id, result, is_error }])
                .unwrap_or_default(),
            NormalizerInput::LifecycleStart => {
                self.lifecycle_start_observed = true;
                Vec::new()
            }
            NormalizerInput::LifecycleEnd => {
                self.terminated = true;
                vec![NormalizedEvent::Terminal(Ok(()))]
            }
            NormalizerInput::LifecycleError { message } => {
                self.terminated = true;
                vec![NormalizedEvent::Terminal(Err(message.unwrap_or_else(|| {
                    "agent lifecycle ended in error".to_string()
                })))]
            }
        }
    }

    fn process_content(&mut self, content: &[ContentItem]) -> Vec<NormalizedEvent> {
        let mut events = Vec::new();
        for item in content {
            match item {
                ContentItem::Text { text, delta } => {
                    events.extend(self.emit_text(text.as_deref(), delta.as_deref()));
                }
                ContentItem::Thinking { thinking, delta } => {
                    events.extend(self.emit_thinking(thinking.as_deref(), delta.as_deref()));
                }
            }
        }
        events
    }

    fn emit_text(&mut self, text: Option<&str>, delta: Option<&str>) -> Vec<NormalizedEvent> {
        match self.text.observe(text, delta) {
            Some((true, s)) => vec![NormalizedEvent::TextReplace(s)],
            Some((false, s)) => vec![NormalizedEvent::TextDelta(s)],
            None => Vec::new(),
        }
    }

    fn emit_thinking(&mut self, text: Option<&str>, delta: Option<&str>) -> Vec<NormalizedEvent> {
        match self.thinking.observe(text, delta) {
            Some((true, s)) => vec![NormalizedEvent::ThinkingReplace(s)],
            Some((false, s)) => vec![NormalizedEvent::ThinkingDelta(s)],
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_item(text: &str) -> ContentItem {
        ContentItem::Text { text: Some(text.to_string()), delta: None }
    }

    /// Scenario 1: cumulative snapshot sequence.
    #[test]
    fn test_cumulative_snapshot_sequence() {
        let mut n = DeltaNormalizer::new();
        let mut deltas = Vec::new();

        for ev in n.process(NormalizerInput::ChatDelta { content: vec![text_item("Hello")] }) {
            if let NormalizedEvent::TextDelta(s) = ev {
                deltas.push(s);
            }
        }
        for ev in n.process(NormalizerInput::ChatDelta { content: vec![text_item("Hello")] }) {
            if let NormalizedEvent::TextDelta(s) = ev {
                deltas.push(s);
            }
        }
        for ev in
            n.process(NormalizerInput::ChatDelta { content: vec![text_item("Hello world")] })
        {
            if let NormalizedEvent::TextDelta(s) = ev {
                deltas.push(s);
            }
        }
        n.process(NormalizerInput::ChatFinal { message_content: None });

        assert_eq!(deltas, vec!["Hello".to_string(), " world".to_string()]);
        assert_eq!(n.text.accumulated, "Hello world");
    }

    /// Scenario 2: explicit delta mixed with snapshot.
    #[test]
    fn test_explicit_delta_mode_ignores_snapshots() {
        let mut n = DeltaNormalizer::new();
        let mut deltas = Vec::new();

        let item = ContentItem::Text { text: Some("Hello".into()), delta: Some("Hello".into()) };
        for ev in n.process(NormalizerInput::ChatDelta { content: vec![item] }) {
            if let NormalizedEvent::TextDelta(s) = ev {
                deltas.push(s);
            }
        }
        let item =
            ContentItem::Text { text: Some("Hello there".into()), delta: Some(" there".into()) };
        for ev in n.process(NormalizerInput::ChatDelta { content: vec![item] }) {
            if let NormalizedEvent::TextDelta(s) = ev {
                deltas.push(s);
            }
        }
        n.process(NormalizerInput::ChatFinal { message_content: None });

        assert_eq!(deltas, vec!["Hello".to_string(), " there".to_string()]);
    }

    /// Scenario 3: non-prefix rewrite.
    #[test]
    fn test_non_prefix_rewrite_emits_replace() {
        let mut n = DeltaNormalizer::new();
        n.process(NormalizerInput::ChatDelta { content: vec![text_item("Hello world")] });
        let events =
            n.process(NormalizerInput::ChatDelta { content: vec![text_item("Hello there")] });

        assert_eq!(events, vec![NormalizedEvent::TextReplace("Hello there".to_string())]);
        assert_eq!(n.text.accumulated, "Hello there");
    }

    /// Scenario 4: mixed chat-final then agent-assistant lifecycle.
    #[test]
    fn test_chat_final_deferred_by_lifecycle_start() {
        let mut n = DeltaNormalizer::new();
        n.process(NormalizerInput::LifecycleStart);
        n.process(NormalizerInput::AgentAssistant {
            text: Some("I'll research".to_string()),
            delta: None,
        });

        let events = n.process(NormalizerInput::ChatFinal { message_content: None });
        assert!(!events.iter().any(|e| matches!(e, NormalizedEvent::Terminal(_))));
        assert!(!n.is_terminated());

        n.process(NormalizerInput::AgentAssistant {
            text: Some("I'll research and summarize.".to_string()),
            delta: None,
        });
        let events = n.process(NormalizerInput::LifecycleEnd);

        assert_eq!(events, vec![NormalizedEvent::Terminal(Ok(()))]);
        assert_eq!(n.text.accumulated, "I'll research and summarize.");
    }

    #[test]
    fn test_chat_error_produces_terminal_err() {
        let mut n = DeltaNormalizer::new();
        let events = n.process(NormalizerInput::ChatError {
            error_message: Some("boom".to_string()),
        });
        assert_eq!(events, vec![NormalizedEvent::Terminal(Err("boom".to_string()))]);
        assert!(n.is_terminated());
    }

    #[test]
    fn test_final_fallback_emits_message_as_single_delta() {
        let mut n = DeltaNormalizer::new();
        let events = n.process(NormalizerInput::ChatFinal {
            message_content: Some(vec![text_item("Only at the end")]),
        });
        assert!(events
            .iter()
            .any(|e| matches!(e, NormalizedEvent::TextDelta(s) if s == "Only at the end")));
        assert!(events.iter().any(|e| matches!(e, NormalizedEvent::Terminal(Ok(())))));
    }

    #[test]
    fn test_tool_frames_missing_id_are_dropped() {
        let mut n = DeltaNormalizer::new();
        let events = n.process(NormalizerInput::AgentToolStart {
            tool_call_id: None,
            name: "search".to_string(),
            args: Value::Null,
        });
        assert!(events.is_empty());
    }

    #[test]
    fn test_once_terminated_further_input_is_ignored() {
        let mut n = DeltaNormalizer::new();
        n.process(NormalizerInput::LifecycleEnd);
        let events = n.process(NormalizerInput::AgentAssistant {
            text: Some("late".to_string()),
            delta: None,
        });
        assert!(events.is_empty());
    }
}
