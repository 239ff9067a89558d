//! Request router (C3): correlates outbound JSON-RPC requests to their
//! responses by id and enforces in-flight timeouts.
//!
//! The pending-request map + oneshot-completion idiom mirrors the
//! `ChannelSenderHandle`/pending-map pattern used throughout the teacher
//! crate's channel layer (grounding reference only; the reorder/ACK-specific
//! code itself was not reused since this router's contract is simpler — one
//! response per request id, no retransmission).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use crate::error::RequestErrorKind;
use crate::transport::TransportWriter;

/// A response slot is the `Result` of a completed request, as seen by the
/// caller of [`RequestRouter::call`].
pub type RequestResult = Result<Value, RequestErrorKind>;

struct PendingRequest {
    completion: oneshot::Sender<RequestResult>,
}

/// Correlates outbound requests with inbound responses.
///
/// Owns the pending-request map exclusively; per §5's shared-resource
/// policy, no other component reaches into it directly.
#[derive(Debug)]
pub struct RequestRouter {
    next_id: AtomicU64,
    pending: Mutex<HashMap<String, PendingRequest>>,
    writer: Mutex<TransportWriter>,
}

impl RequestRouter {
    /// Build a router around a freshly connected transport writer. The id
    /// counter resets to 1 for every new connection, per §4.3.
    #[must_use]
    pub fn new(writer: TransportWriter) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            writer: Mutex::new(writer),
        })
    }

    /// Issue `method` with `params`, waiting up to `timeout` for a matching
    /// response.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> RequestResult {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), PendingRequest { completion: tx });

        let envelope = serde_json::json!({ "id": id, "method": method, "params": params });
        let send_result = self
            .writer
            .lock()
            .await
            .send(&envelope.to_string())
            .await;

        if let Err(e) = send_result {
            self.pending.lock().await.remove(&id);
            log::warn!("router: send failed for method {method}: {e}");
            return Err(RequestErrorKind::NoChannel);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RequestErrorKind::NoChannel),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(RequestErrorKind::Timeout)
            }
        }
    }

    /// Resolve a pending request with a successful result.
    pub async fn resolve(&self, id: &str, result: Value) {
        if let Some(pending) = self.pending.lock().await.remove(id) {
            let _ = pending.completion.send(Ok(result));
        } else {
            log::debug!("router: response for unknown or already-completed id {id}");
        }
    }

    /// Resolve a pending request with a server-reported error.
    pub async fn reject(&self, id: &str, code: i64, message: String) {
        if let Some(pending) = self.pending.lock().await.remove(id) {
            let _ = pending.completion.send(Err(RequestErrorKind::Server { code, message }));
        }
    }

    /// Fail every pending request with `NoChannel`, e.g. when the transport
    /// disconnects. Per §4.3, nothing is left dangling.
    pub async fn fail_all(&self) {
        let mut pending = self.pending.lock().await;
        for (_, entry) in pending.drain() {
            let _ = entry.completion.send(Err(RequestErrorKind::NoChannel));
        }
    }

    /// Number of requests currently awaiting a response (test/diagnostic use).
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
