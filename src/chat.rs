//! Chat-run session (C8): drives send → subscribe → normalize → terminate
//! for one user turn and exposes the two public streaming entry points.
//!
//! Wires together the Request router (C3), Event bus (C4), Run-sequence
//! tracker (C6), Delta normalizer (C7), and Control-block filter (C9); no
//! single teacher file covers this shape, since nothing in the corpus
//! streams assistant text, but the cancel-safe "subscribe, loop, always
//! unsubscribe on every exit path" structure follows the same discipline as
//! the teacher's channel read loops (`channel/action_cable.rs`).

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::bridge::TurnSink;
use crate::bus::EventBus;
use crate::constants::{AGENT_WAIT_TIMEOUT, CHAT_SEND_TIMEOUT, REQUEST_TIMEOUT};
use crate::control_filter::ControlBlockFilter;
use crate::error::{annotate_chat_error, GatewayError};
use crate::frame::EventFrame;
use crate::normalizer::{ContentItem, DeltaNormalizer, NormalizedEvent, NormalizerInput};
use crate::router::RequestRouter;
use crate::sequence::{SequenceOutcome, SequenceTracker};

const MODEL_PREFIX: &str = "openclaw:";

/// Validate `requested_model` is `"openclaw:<sessionKey>"` and extract the
/// session key, per §4.8 step 1.
pub fn parse_session_key(requested_model: &str) -> Result<String, GatewayError> {
    requested_model
        .strip_prefix(MODEL_PREFIX)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .ok_or_else(|| GatewayError::UnsupportedModelIdentifier(requested_model.to_string()))
}

/// One chat turn's collaborators, shared with the rest of the client.
#[derive(Clone)]
pub struct ChatRunner {
    router: Arc<RequestRouter>,
    bus: Arc<EventBus>,
    sequence: Arc<Mutex<SequenceTracker>>,
}

impl ChatRunner {
    /// Build a runner around the shared router/bus/sequence tracker.
    #[must_use]
    pub fn new(
        router: Arc<RequestRouter>,
        bus: Arc<EventBus>,
        sequence: Arc<Mutex<SequenceTracker>>,
    ) -> Self {
        Self { router, bus, sequence }
    }

    /// Start a run: issues `chat.send` and returns a driver that can be
    /// pulled (via [`ChatStream`]) or pushed into a [`TurnSink`].
    async fn start_run(
        &self,
        messages: &Value,
        requested_model: &str,
    ) -> Result<RunDriver, GatewayError> {
        let session_key = parse_session_key(requested_model)?;
        let idempotency_key = Uuid::new_v4().to_string();

        let params = json!({
            "sessionKey": session_key,
            "message": messages,
            "idempotencyKey": idempotency_key,
        });
        let result = self
            .router
            .call("chat.send", params, CHAT_SEND_TIMEOUT)
            .await
            .map_err(GatewayError::from)?;

        let run_id = result
            .get("runId")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::Chat { message: "chat.send response missing runId".into() })?
            .to_string();

        let subscriber = self.bus.subscribe(&run_id).await;
        Ok(RunDriver {
            router: self.router.clone(),
            sequence: self.sequence.clone(),
            subscriber,
            run_id,
            session_key,
            normalizer: DeltaNormalizer::new(),
            text_filter: ControlBlockFilter::new(),
        })
    }

    /// Stream a chat turn as a finite sequence of filtered text deltas.
    pub async fn stream_chat(
        &self,
        messages: Value,
        requested_model: &str,
    ) -> Result<ChatStream, GatewayError> {
        let driver = self.start_run(&messages, requested_model).await?;
        Ok(ChatStream { driver, done: false })
    }

    /// Drive a run to completion, delivering every event through `sink`.
    /// Cancel-safe: dropping the returned future at any await point leaves
    /// the subscription dropped and no pending request dangling.
    pub async fn stream_run_into_turn(
        &self,
        messages: Value,
        requested_model: &str,
        sink: &dyn TurnSink,
    ) -> Result<(), GatewayError> {
        let mut driver = self.start_run(&messages, requested_model).await?;
        loop {
            match driver.step().await? {
                Some(events) => {
                    for event in events {
                        dispatch_to_sink(sink, event).await;
                    }
                }
                None => {
                    sink.on_terminal(Ok(())).await;
                    return Ok(());
                }
            }
            if driver.normalizer.is_terminated() {
                return Ok(());
            }
        }
    }
}

async fn dispatch_to_sink(sink: &dyn TurnSink, event: NormalizedEvent) {
    match event {
        NormalizedEvent::TextDelta(s) | NormalizedEvent::TextReplace(s) => {
            sink.on_text_delta(&s).await;
        }
        NormalizedEvent::ThinkingDelta(s) | NormalizedEvent::ThinkingReplace(s) => {
            sink.on_thinking_delta(&s).await;
        }
        NormalizedEvent::ToolStart { id, name, args } => {
            sink.on_tool_call_start(&id, &name, &args).await;
        }
        NormalizedEvent::ToolUpdate { id, partial_result } => {
            sink.on_tool_call_update(&id, &partial_result).await;
        }
        NormalizedEvent::ToolResult { id, result, is_error } => {
            sink.on_tool_call_result(&id, &result, is_error).await;
        }
        NormalizedEvent::Terminal(outcome) => {
            sink.on_terminal(outcome).await;
        }
    }
}

/// Pulls filtered text deltas for one run, one at a time.
pub struct ChatStream {
    driver: RunDriver,
    done: bool,
}

impl ChatStream {
    /// Await the next filtered text chunk, or `None` once the run has
    /// terminated (including a flush of the control-block filter's tail).
    pub async fn next(&mut self) -> Option<Result<String, GatewayError>> {
        if self.done {
            return None;
        }
        loop {
            match self.driver.step().await {
                Ok(Some(events)) => {
                    let mut out = String::new();
                    for event in events {
                        match event {
                            NormalizedEvent::TextDelta(s) | NormalizedEvent::TextReplace(s) => {
                                out.push_str(&self.driver.text_filter.consume(&s));
                                self.append_promoted_artifact(&mut out);
                            }
                            NormalizedEvent::Terminal(Err(message)) => {
                                self.done = true;
                                out.push_str(&self.driver.text_filter.finalize());
                                self.append_promoted_artifact(&mut out);
                                if out.is_empty() {
                                    return Some(Err(GatewayError::Chat { message }));
                                }
                                return Some(Ok(out));
                            }
                            NormalizedEvent::Terminal(Ok(())) => {
                                self.done = true;
                                out.push_str(&self.driver.text_filter.finalize());
                                self.append_promoted_artifact(&mut out);
                            }
                            _ => {}
                        }
                    }
                    if !out.is_empty() {
                        return Some(Ok(out));
                    }
                    if self.done {
                        return None;
                    }
                }
                Ok(None) => {
                    self.done = true;
                    let mut tail = self.driver.text_filter.finalize();
                    self.append_promoted_artifact(&mut tail);
                    return if tail.is_empty() { None } else { Some(Ok(tail)) };
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }

    /// Per §4.9: once a `COMPLETE_TASK` block closes, promote its `artifact`
    /// field into the visible text that follows the filtered chunk.
    fn append_promoted_artifact(&self, out: &mut String) {
        if !self.driver.text_filter.just_closed_complete_task() {
            return;
        }
        if let Some(artifact) = ControlBlockFilter::take_artifact(self.driver.text_filter.last_closed_body()) {
            out.push_str(&artifact);
        }
    }
}

/// Internal per-run driver: subscribes, feeds C6 then C7, one step at a
/// time. `step` returns `Ok(None)` once the subscriber has no more frames
/// (e.g. the bus itself shut down without a terminal frame arriving).
struct RunDriver {
    router: Arc<RequestRouter>,
    sequence: Arc<Mutex<SequenceTracker>>,
    subscriber: crate::bus::Subscriber,
    run_id: String,
    session_key: String,
    normalizer: DeltaNormalizer,
    text_filter: ControlBlockFilter,
}

impl RunDriver {
    async fn step(&mut self) -> Result<Option<Vec<NormalizedEvent>>, GatewayError> {
        let Some(frame) = self.subscriber.next().await else {
            return Ok(None);
        };

        if let Some(seq) = frame.seq {
            let outcome = self.sequence.lock().await.observe(&self.run_id, seq);
            match outcome {
                SequenceOutcome::Duplicate => return Ok(Some(Vec::new())),
                SequenceOutcome::Gap { expected, received } => {
                    log::warn!(
                        "chat: sequence gap on run {} (expected {expected}, received {received}), resyncing",
                        self.run_id
                    );
                    self.resync().await;
                }
                SequenceOutcome::InOrder => {}
            }
        }

        let Some(input) = frame_to_input(&frame) else {
            return Ok(Some(Vec::new()));
        };
        let input = self.resolve_error_message(input, &frame.payload).await;
        Ok(Some(self.normalizer.process(input)))
    }

    async fn resync(&self) {
        let params = json!({ "runId": self.run_id });
        if let Err(e) = self.router.call("agent.wait", params, AGENT_WAIT_TIMEOUT).await {
            log::debug!("chat: resync agent.wait failed for run {}: {e}", self.run_id);
        }
    }

    /// Per §4.7 rule 5: a `chat` `state=error` or `agent.event`
    /// `lifecycle:error` frame that omitted its error message must fall back
    /// to a `chat.history` lookup for the last assistant message ending in
    /// `stopReason=="error"`. Either way, annotate the final message with
    /// provider debug info when the "HTTP 401" pattern is recognizable.
    async fn resolve_error_message(&self, input: NormalizerInput, payload: &Value) -> NormalizerInput {
        match input {
            NormalizerInput::ChatError { error_message } => NormalizerInput::ChatError {
                error_message: Some(self.finalize_error_message(error_message, payload).await),
            },
            NormalizerInput::LifecycleError { message } => NormalizerInput::LifecycleError {
                message: Some(self.finalize_error_message(message, payload).await),
            },
            other => other,
        }
    }

    async fn finalize_error_message(&self, error_message: Option<String>, payload: &Value) -> String {
        match error_message {
            Some(message) => annotate_chat_error(message, payload),
            None => self.chat_history_error().await,
        }
    }

    async fn chat_history_error(&self) -> String {
        let fallback = "chat run failed with no error message".to_string();
        let params = json!({ "sessionKey": self.session_key });
        let history = match self.router.call("chat.history", params, REQUEST_TIMEOUT).await {
            Ok(history) => history,
            Err(e) => {
                log::debug!("chat: chat.history fallback failed for run {}: {e}", self.run_id);
                return fallback;
            }
        };
        let Some(found) = find_last_error_message(&history) else {
            return fallback;
        };
        let message = found
            .get("errorMessage")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(fallback);
        annotate_chat_error(message, found)
    }
}

fn frame_to_input(frame: &EventFrame) -> Option<NormalizerInput> {
    match frame.channel() {
        Some("chat") => chat_channel_input(&frame.payload),
        Some("agent") => agent_channel_input(&frame.payload),
        _ => None,
    }
}

fn chat_channel_input(payload: &Value) -> Option<NormalizerInput> {
    let state = payload.get("state").and_then(Value::as_str)?;
    match state {
        "delta" => {
            let content = payload
                .get("message")
                .and_then(|m| m.get("content"))
                .map(parse_content_items)
                .unwrap_or_default();
            Some(NormalizerInput::ChatDelta { content })
        }
        "final" => {
            let message_content = payload
                .get("message")
                .and_then(|m| m.get("content"))
                .map(parse_content_items);
            Some(NormalizerInput::ChatFinal { message_content })
        }
        "error" => {
            let error_message =
                payload.get("errorMessage").and_then(Value::as_str).map(str::to_string);
            Some(NormalizerInput::ChatError { error_message })
        }
        _ => None,
    }
}

fn parse_content_items(value: &Value) -> Vec<ContentItem> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let ty = item.get("type").and_then(Value::as_str)?;
            match ty {
                "text" => Some(ContentItem::Text {
                    text: item.get("text").and_then(Value::as_str).map(str::to_string),
                    delta: item.get("delta").and_then(Value::as_str).map(str::to_string),
                }),
                "thinking" => Some(ContentItem::Thinking {
                    thinking: item.get("thinking").and_then(Value::as_str).map(str::to_string),
                    delta: item.get("delta").and_then(Value::as_str).map(str::to_string),
                }),
                _ => None,
            }
        })
        .collect()
}

fn agent_channel_input(payload: &Value) -> Option<NormalizerInput> {
    let stream = payload.get("stream").and_then(Value::as_str)?;
    let data = payload.get("data").cloned().unwrap_or(Value::Null);
    match stream {
        "assistant" => Some(NormalizerInput::AgentAssistant {
            text: data.get("text").and_then(Value::as_str).map(str::to_string),
            delta: data.get("delta").and_then(Value::as_str).map(str::to_string),
        }),
        "thinking" => Some(NormalizerInput::AgentThinking {
            text: data.get("text").and_then(Value::as_str).map(str::to_string),
            delta: data.get("delta").and_then(Value::as_str).map(str::to_string),
        }),
        "tool" => agent_tool_input(&data),
        "lifecycle" => agent_lifecycle_input(&data),
        _ => None,
    }
}

fn agent_tool_input(data: &Value) -> Option<NormalizerInput> {
    let tool_call_id = data.get("toolCallId").and_then(Value::as_str).map(str::to_string);
    match data.get("phase").and_then(Value::as_str)? {
        "start" => Some(NormalizerInput::AgentToolStart {
            tool_call_id,
            name: data.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            args: data.get("args").cloned().unwrap_or(Value::Null),
        }),
        "update" => Some(NormalizerInput::AgentToolUpdate {
            tool_call_id,
            partial_result: data.get("partialResult").cloned().unwrap_or(Value::Null),
        }),
        "result" => Some(NormalizerInput::AgentToolResult {
            tool_call_id,
            result: data.get("result").cloned().unwrap_or(Value::Null),
            is_error: data.get("isError").and_then(Value::as_bool).unwrap_or(false),
        }),
        _ => None,
    }
}

fn agent_lifecycle_input(data: &Value) -> Option<NormalizerInput> {
    match data.get("phase").and_then(Value::as_str)? {
        "start" => Some(NormalizerInput::LifecycleStart),
        "end" => Some(NormalizerInput::LifecycleEnd),
        "error" => Some(NormalizerInput::LifecycleError {
            message: data.get("message").and_then(Value::as_str).map(str::to_string),
        }),
        _ => None,
    }
}

/// The last assistant message in a `chat.history` response whose
/// `stopReason == "error"`, per §4.7 rule 5.
fn find_last_error_message(history_response: &Value) -> Option<&Value> {
    let messages = history_response.get("messages")?.as_array()?;
    messages.iter().rev().find(|m| {
        m.get("role").and_then(Value::as_str) == Some("assistant")
            && m.get("stopReason").and_then(Value::as_str) == Some("error")
    })
}

/// Extract a meaningful error message from `chat.history` when a `chat`
/// error frame omitted `errorMessage`, per §4.7 rule 5: the last assistant
/// message whose `stopReason == "error"`.
pub fn extract_history_error(history_response: &Value) -> Option<String> {
    find_last_error_message(history_response)
        .and_then(|m| m.get("errorMessage").and_then(Value::as_str))
        .map(str::to_string)
}

/// Floor for the adaptive `on_sync` throttle described in §4.7.
#[must_use]
pub fn sync_throttle_floor() -> Duration {
    crate::constants::SYNC_THROTTLE_MIN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_key_accepts_prefixed_model() {
        assert_eq!(parse_session_key("openclaw:abc123").unwrap(), "abc123");
    }

    #[test]
    fn test_parse_session_key_rejects_unprefixed_model() {
        let err = parse_session_key("gpt-4").unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedModelIdentifier(_)));
    }

    #[test]
    fn test_parse_session_key_rejects_empty_key() {
        assert!(parse_session_key("openclaw:").is_err());
    }

    #[test]
    fn test_chat_channel_delta_parses_content_items() {
        let payload = json!({
            "state": "delta",
            "message": { "content": [{"type": "text", "text": "hi"}] }
        });
        let input = chat_channel_input(&payload).unwrap();
        assert!(matches!(input, NormalizerInput::ChatDelta { .. }));
    }

    #[test]
    fn test_agent_tool_start_requires_phase() {
        let data = json!({ "toolCallId": "t1", "name": "search", "phase": "start" });
        assert!(matches!(agent_tool_input(&data), Some(NormalizerInput::AgentToolStart { .. })));
    }

    #[test]
    fn test_extract_history_error_finds_last_matching_assistant_message() {
        let history = json!({
            "messages": [
                {"role": "assistant", "stopReason": "stop"},
                {"role": "assistant", "stopReason": "error", "errorMessage": "HTTP 401 unauthorized"},
            ]
        });
        assert_eq!(
            extract_history_error(&history),
            Some("HTTP 401 unauthorized".to_string())
        );
    }

    #[test]
    fn test_extract_history_error_none_when_no_error_message() {
        let history = json!({ "messages": [] });
        assert_eq!(extract_history_error(&history), None);
    }
}
