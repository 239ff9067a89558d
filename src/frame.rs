//! Frame codec (C1): encodes/decodes the wire envelopes carried over the
//! WebSocket — requests, responses, and server-push events.
//!
//! Grounded in the tagged-enum + predicate-method idiom used throughout the
//! teacher crate's event types: a frame is classified by which fields are
//! present rather than by an explicit type tag, since the gateway wire
//! protocol doesn't carry one.

use serde_json::Value;

/// A decoded wire envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A JSON-RPC request. The core never receives these from the server in
    /// practice (the gateway doesn't initiate requests), but the codec still
    /// recognizes the shape so it can reject it politely rather than
    /// misclassify it as something else.
    Request {
        /// Correlation id.
        id: String,
        /// Dotted method name.
        method: String,
        /// Optional parameter object.
        params: Option<Value>,
    },
    /// A successful JSON-RPC response.
    Response {
        /// Correlation id matching a prior request.
        id: String,
        /// The result value.
        result: Value,
    },
    /// A JSON-RPC error response.
    ResponseError {
        /// Correlation id matching a prior request.
        id: String,
        /// Server-assigned error code.
        code: i64,
        /// Human-readable error message.
        message: String,
    },
    /// A server-push event frame.
    Event(EventFrame),
    /// An opaque server notice the core does not interpret.
    Opaque(Value),
}

/// A single server-push event, normalized so `seq`/`ts` are always integers.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFrame {
    /// The `event` field verbatim (e.g. `"chat"`, `"agent.event"`).
    pub event: String,
    /// Monotonic per-run sequence number, when present.
    pub seq: Option<u64>,
    /// Timestamp normalized to milliseconds, when present.
    pub ts_ms: Option<u64>,
    /// The event payload, passed through unmodified for forward compatibility.
    pub payload: Value,
    /// Event metadata (`schemaVersion`, `channel`, `runId`), when present.
    pub eventmeta: Option<Value>,
}

impl EventFrame {
    /// The channel this event belongs to, preferring `eventmeta.channel` and
    /// falling back to classifying the `event` field itself.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        if let Some(meta) = &self.eventmeta {
            if let Some(channel) = meta.get("channel").and_then(Value::as_str) {
                return Some(channel);
            }
        }
        match self.event.as_str() {
            "chat" => Some("chat"),
            "agent.event" => Some("agent"),
            _ => None,
        }
    }

    /// The `runId` this event is associated with, checked in `payload` first
    /// and `eventmeta` second (see §4.4's matching rule).
    #[must_use]
    pub fn run_id(&self) -> Option<&str> {
        self.payload
            .get("runId")
            .and_then(Value::as_str)
            .or_else(|| {
                self.eventmeta
                    .as_ref()
                    .and_then(|m| m.get("runId"))
                    .and_then(Value::as_str)
            })
    }
}

/// Parse a raw JSON-RPC numeric field that may arrive as an integer or as a
/// numeric string (the gateway is inconsistent about this for `seq`/`ts`).
fn parse_numeric_field(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    }
}

/// Normalize a `ts` value to milliseconds. Values below `10^12` are assumed
/// to be seconds and are scaled up; anything else is assumed to already be
/// milliseconds.
fn normalize_ts_ms(raw: u64) -> u64 {
    const MS_THRESHOLD: u64 = 1_000_000_000_000;
    if raw < MS_THRESHOLD {
        raw * 1000
    } else {
        raw
    }
}

/// Decode a raw text frame into a [`Frame`].
///
/// # Errors
///
/// Returns `Err` with a human-readable message when the text is not valid
/// JSON. A well-formed but unrecognized shape is never an error: it decodes
/// to [`Frame::Opaque`].
pub fn decode(text: &str) -> Result<Frame, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| format!("invalid JSON: {e}"))?;
    Ok(classify(value))
}

fn classify(value: Value) -> Frame {
    let id = value.get("id").and_then(Value::as_str).map(str::to_string);

    if let Some(id) = &id {
        if let Some(result) = value.get("result") {
            return Frame::Response {
                id: id.clone(),
                result: result.clone(),
            };
        }
        if let Some(error) = value.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Frame::ResponseError {
                id: id.clone(),
                code,
                message,
            };
        }
        if let Some(method) = value.get("method").and_then(Value::as_str) {
            return Frame::Request {
                id: id.clone(),
                method: method.to_string(),
                params: value.get("params").cloned(),
            };
        }
    }

    let has_event_field = value.get("event").and_then(Value::as_str).is_some();
    let has_eventmeta_channel = value
        .get("eventmeta")
        .and_then(|m| m.get("channel"))
        .is_some();

    if has_event_field || has_eventmeta_channel {
        let event = value
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let seq = value.get("seq").and_then(parse_numeric_field);
        let ts_ms = value.get("ts").and_then(parse_numeric_field).map(normalize_ts_ms);
        let payload = value.get("payload").cloned().unwrap_or(Value::Null);
        let eventmeta = value.get("eventmeta").cloned();
        return Frame::Event(EventFrame {
            event,
            seq,
            ts_ms,
            payload,
            eventmeta,
        });
    }

    Frame::Opaque(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_response() {
        let frame = decode(r#"{"id":"abc","result":{"ok":true}}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Response {
                id: "abc".into(),
                result: json!({"ok": true}),
            }
        );
    }

    #[test]
    fn test_decode_response_error() {
        let frame = decode(r#"{"id":"abc","error":{"code":401,"message":"nope"}}"#).unwrap();
        assert_eq!(
            frame,
            Frame::ResponseError {
                id: "abc".into(),
                code: 401,
                message: "nope".into(),
            }
        );
    }

    #[test]
    fn test_decode_event_with_string_seq() {
        let frame = decode(
            r#"{"event":"chat","seq":"3","ts":"1700000000","payload":{"runId":"r1"}}"#,
        )
        .unwrap();
        match frame {
            Frame::Event(ev) => {
                assert_eq!(ev.seq, Some(3));
                assert_eq!(ev.ts_ms, Some(1_700_000_000_000));
                assert_eq!(ev.run_id(), Some("r1"));
            }
            _ => panic!("expected Event frame"),
        }
    }

    #[test]
    fn test_decode_event_channel_from_eventmeta() {
        let frame = decode(
            r#"{"event":"weird-name","payload":{},"eventmeta":{"channel":"agent","runId":"r2"}}"#,
        )
        .unwrap();
        match frame {
            Frame::Event(ev) => {
                assert_eq!(ev.channel(), Some("agent"));
                assert_eq!(ev.run_id(), Some("r2"));
            }
            _ => panic!("expected Event frame"),
        }
    }

    #[test]
    fn test_decode_opaque_notice() {
        let frame = decode(r#"{"type":"welcome"}"#).unwrap();
        assert!(matches!(frame, Frame::Opaque(_)));
    }

    #[test]
    fn test_decode_invalid_json_fails() {
        assert!(decode("not json").is_err());
    }

    #[test]
    fn test_ts_ms_threshold_is_not_rescaled() {
        assert_eq!(normalize_ts_ms(1_700_000_000_000), 1_700_000_000_000);
        assert_eq!(normalize_ts_ms(1_700_000_000), 1_700_000_000_000);
    }
}
