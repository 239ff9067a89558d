//! Typed error taxonomy for the gateway client core.
//!
//! Internal helpers that can only fail for reasons callers don't need to
//! distinguish keep returning `anyhow::Result` (see `state.rs`, `credentials.rs`),
//! matching the convention already used in `config.rs`/`keyring.rs`. Anything a
//! caller of a public API is expected to match on comes through [`GatewayError`].

use serde_json::Value;
use thiserror::Error;

/// The kinds of request failure a [`crate::router::RequestRouter`] can produce.
#[derive(Debug, Clone, Error)]
pub enum RequestErrorKind {
    /// No response arrived before the deadline.
    #[error("request timed out")]
    Timeout,
    /// The connection dropped while the request was in flight.
    #[error("no channel available")]
    NoChannel,
    /// The server responded with a JSON-RPC error object.
    #[error("server error {code}: {message}")]
    Server {
        /// Server-assigned error code.
        code: i64,
        /// Human-readable error message.
        message: String,
    },
    /// The server asked the caller to slow down.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Minimum delay, in milliseconds, before retrying.
        retry_after_ms: u64,
    },
}

/// Top-level error type surfaced by the gateway client's public APIs.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The socket failed to open or a send failed outright.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame could not be decoded as valid JSON.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A request made via the router failed.
    #[error("request failed: {0}")]
    Request(#[from] RequestErrorKind),

    /// A chat run terminated with an error.
    #[error("chat error: {message}")]
    Chat {
        /// Human-readable error message. Annotated with provider debug info
        /// (model id, provider id, base URL, hint) by [`annotate_chat_error`]
        /// when the message matches the recognizable "HTTP 401" pattern and
        /// that info was available.
        message: String,
    },

    /// The caller requested a model identifier that isn't `openclaw:<sessionKey>`.
    #[error("unsupported model identifier: {0}")]
    UnsupportedModelIdentifier(String),

    /// The reconnect controller halted after an authentication failure.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A sequence discontinuity was observed (non-terminal, triggers resync).
    #[error("sequence gap: expected {expected}, received {received}")]
    SequenceGap {
        /// The `seq` the tracker expected next.
        expected: u64,
        /// The `seq` that actually arrived.
        received: u64,
    },

    /// The subscriber was cancelled by the caller dropping its stream.
    #[error("subscriber cancelled")]
    SubscriberCancelled,
}

impl GatewayError {
    /// `true` for errors that are recovered locally and never surfaced to a
    /// public API caller (`MalformedFrame`, `SequenceGap`), per the
    /// propagation policy.
    #[must_use]
    pub fn is_locally_recovered(&self) -> bool {
        matches!(self, Self::MalformedFrame(_) | Self::SequenceGap { .. })
    }
}

/// Appends provider debug info to `message` when it matches the recognizable
/// "HTTP 401" pattern, per §7's ChatError annotation rule. `context` is
/// searched for `modelId`/`providerId`/`baseUrl`/`hint` string fields;
/// whichever are present are appended, in that order. Leaves `message`
/// untouched if the pattern isn't present or none of those fields are set.
#[must_use]
pub fn annotate_chat_error(message: String, context: &Value) -> String {
    if !message.contains("HTTP 401") {
        return message;
    }

    let fields = [
        ("model", "modelId"),
        ("provider", "providerId"),
        ("baseURL", "baseUrl"),
        ("hint", "hint"),
    ];
    let parts: Vec<String> = fields
        .iter()
        .filter_map(|(label, key)| {
            context.get(*key).and_then(Value::as_str).map(|v| format!("{label}={v}"))
        })
        .collect();

    if parts.is_empty() {
        return message;
    }
    format!("{message} ({})", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locally_recovered_kinds() {
        assert!(GatewayError::MalformedFrame("bad json".into()).is_locally_recovered());
        assert!(GatewayError::SequenceGap { expected: 2, received: 3 }.is_locally_recovered());
        assert!(!GatewayError::AuthenticationFailed("nope".into()).is_locally_recovered());
    }

    #[test]
    fn test_request_error_display() {
        let err = RequestErrorKind::RateLimited { retry_after_ms: 2500 };
        assert_eq!(err.to_string(), "rate limited, retry after 2500ms");
    }

    #[test]
    fn test_annotate_chat_error_appends_provider_debug_info_on_401() {
        let context = serde_json::json!({
            "modelId": "gpt-4",
            "providerId": "openai",
            "baseUrl": "https://api.openai.com",
            "hint": "check your API key",
        });
        let annotated =
            annotate_chat_error("HTTP 401 unauthorized".to_string(), &context);
        assert_eq!(
            annotated,
            "HTTP 401 unauthorized (model=gpt-4, provider=openai, \
             baseURL=https://api.openai.com, hint=check your API key)"
        );
    }

    #[test]
    fn test_annotate_chat_error_leaves_non_401_messages_untouched() {
        let context = serde_json::json!({ "modelId": "gpt-4" });
        let message = annotate_chat_error("tool execution failed".to_string(), &context);
        assert_eq!(message, "tool execution failed");
    }

    #[test]
    fn test_annotate_chat_error_leaves_message_untouched_without_context() {
        let message = annotate_chat_error("HTTP 401 unauthorized".to_string(), &Value::Null);
        assert_eq!(message, "HTTP 401 unauthorized");
    }
}
