//! Bridge interface (§6, out-of-core): the `TurnSink` contract a work-session
//! collaborator implements to receive one chat run's output.
//!
//! Mirrors the async-trait collaborator-object idiom already used for
//! [`crate::reconnect::Connector`] and [`crate::credentials::CredentialSource`]:
//! an object-safe trait the core calls into, with no concrete implementation
//! in this crate (the consumer lives outside the gateway client core, per
//! §1's external-collaborators list).

use async_trait::async_trait;
use serde_json::Value;

/// Receives the normalized output of one chat run.
///
/// Every method is a notification, not a request: the sink has no way to
/// push back on the run beyond what cancelling the caller's future already
/// does. `on_terminal` is always the last call.
#[async_trait]
pub trait TurnSink: Send + Sync {
    /// A chunk of assistant text to append.
    async fn on_text_delta(&self, delta: &str);

    /// A chunk of thinking (reasoning) text to append.
    async fn on_thinking_delta(&self, delta: &str);

    /// A tool call started.
    async fn on_tool_call_start(&self, id: &str, name: &str, args: &Value);

    /// A tool call produced partial progress.
    async fn on_tool_call_update(&self, id: &str, partial_result: &Value) {
        let _ = (id, partial_result);
    }

    /// A tool call completed.
    async fn on_tool_call_result(&self, id: &str, result: &Value, is_error: bool);

    /// The run reached its terminal state.
    async fn on_terminal(&self, outcome: Result<(), String>);
}
