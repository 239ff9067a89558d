//! Transport (C2): owns a single WebSocket connection, reads frames, writes
//! requests, and surfaces the close reason verbatim.
//!
//! Directly adapted from the teacher crate's `ws.rs`, which already provided
//! exactly this shape (split reader/writer halves built from one `connect`
//! call). The transport here adds no retry logic of its own — per §4.2,
//! reconnection is the Reconnect controller's (`reconnect.rs`) job.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use crate::constants::user_agent;

/// Error from a connection attempt, classifying whether the server asked the
/// client to back off before retrying.
#[derive(Debug)]
pub enum ConnectError {
    /// The handshake was rejected with HTTP 429 Too Many Requests.
    RateLimited {
        /// Backoff parsed from the response's `Retry-After` header, in
        /// milliseconds, when the server supplied one.
        retry_after_ms: Option<u64>,
    },
    /// Any other failure: invalid URL, DNS/TCP failure, TLS, or a non-429
    /// HTTP status.
    Other(anyhow::Error),
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimited { retry_after_ms } => {
                write!(f, "gateway connect rate limited (retry_after_ms={retry_after_ms:?})")
            }
            Self::Other(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Concrete WebSocket stream type (avoids repeating the generic everywhere).
type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A message received from the transport's read half.
#[derive(Debug)]
pub enum TransportMessage {
    /// A UTF-8 text frame (a JSON-RPC response or push event).
    Text(String),
    /// A ping frame; the caller is expected to answer with a pong.
    Ping(Vec<u8>),
    /// The connection closed, with structured close data when the server
    /// supplied it.
    Close(CloseInfo),
}

/// Structured close information surfaced by the transport.
///
/// Per §9's resolution of the close-classification open question, the
/// reconnect controller prefers `code` when it's meaningful (`!= 1005`) and
/// only falls back to substring-matching `reason` otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code (1000 = normal, 1005 = no code supplied).
    pub code: u16,
    /// Human-readable close reason, possibly carrying a structured hint like
    /// `"code=1008 unauthorized"` or `"rate limited: retryAfterMs=2000"`.
    pub reason: String,
}

/// Write half of a transport connection.
#[derive(Debug)]
pub struct TransportWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl TransportWriter {
    /// Send a UTF-8 text frame. Best-effort: returns once the message is
    /// enqueued at the OS layer, per §4.2.
    pub async fn send(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("transport send failed")
    }

    /// Answer a ping with a pong carrying the same payload.
    pub async fn send_pong(&mut self, data: Vec<u8>) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Pong(data))
            .await
            .context("transport send_pong failed")
    }

    /// Initiate an intentional close.
    pub async fn close(&mut self) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Close(None))
            .await
            .context("transport close failed")?;
        self.sink.close().await.context("transport close failed")
    }
}

/// Read half of a transport connection.
#[derive(Debug)]
pub struct TransportReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl TransportReader {
    /// Receive the next message. Returns `None` once the stream is
    /// exhausted (after a close has already been surfaced).
    ///
    /// Binary/pong/raw frames carry no meaning for this protocol and are
    /// skipped; exactly one read task should drive this loop, per §4.2.
    pub async fn recv(&mut self) -> Option<Result<TransportMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(TransportMessage::Text(text.to_string())));
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    return Some(Ok(TransportMessage::Ping(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(TransportMessage::Close(CloseInfo { code, reason })));
                }
                Some(Ok(tungstenite::Message::Binary(_) | tungstenite::Message::Pong(_))) => {
                    continue;
                }
                Some(Ok(tungstenite::Message::Frame(_))) => continue,
                Some(Err(e)) => {
                    return Some(Err(anyhow::anyhow!("transport read error: {e}")));
                }
                None => return None,
            }
        }
    }
}

/// Connect to the gateway at `url`, authenticating with `token`.
///
/// Builds the HTTP upgrade request, attaches a `Bearer` authorization header
/// and a user-agent, then performs the WebSocket handshake. Returns split
/// (writer, reader) halves ready for use in `tokio::select!` loops.
///
/// # Errors
///
/// Returns [`ConnectError::RateLimited`] when the handshake is rejected with
/// HTTP 429, and [`ConnectError::Other`] for an invalid URL or any other
/// handshake failure.
pub async fn connect(
    url: &str,
    token: &str,
) -> std::result::Result<(TransportWriter, TransportReader), ConnectError> {
    use tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid gateway URL: {url}"))
        .map_err(ConnectError::Other)?;

    let headers = request.headers_mut();
    if !token.is_empty() {
        let value = tungstenite::http::HeaderValue::from_str(&format!("Bearer {token}"))
            .context("invalid token for Authorization header")
            .map_err(ConnectError::Other)?;
        headers.insert(tungstenite::http::header::AUTHORIZATION, value);
    }
    let ua = tungstenite::http::HeaderValue::from_str(&user_agent())
        .context("invalid user-agent header")
        .map_err(ConnectError::Other)?;
    headers.insert(tungstenite::http::header::USER_AGENT, ua);

    match tokio_tungstenite::connect_async(request).await {
        Ok((ws_stream, _response)) => {
            let (sink, stream) = ws_stream.split();
            Ok((TransportWriter { sink }, TransportReader { stream }))
        }
        Err(tungstenite::Error::Http(response)) if response.status().as_u16() == 429 => {
            let retry_after_ms = response
                .headers()
                .get(tungstenite::http::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            Err(ConnectError::RateLimited { retry_after_ms })
        }
        Err(e) => {
            Err(ConnectError::Other(anyhow::anyhow!(e).context("gateway WebSocket connect failed")))
        }
    }
}

/// Convert an HTTP(S) gateway URL to its WS(S) equivalent.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replace("https://", "wss://").replace("http://", "ws://")
    }
}
