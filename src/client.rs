//! Gateway client (top level): wires the transport, router, bus, sequence
//! tracker, and reconnect controller into one handle, and drives the
//! connect/read/reconnect loop as a background task.
//!
//! The "own the socket in one task, hand out routers/facades built from the
//! current connection" shape mirrors how the teacher crate's hub process
//! owns one connection and republishes a fresh handle after each reconnect
//! (grounding reference: `channel/action_cable.rs`'s driving loop, already
//! adapted once for `reconnect.rs`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, RwLock};

use crate::bus::EventBus;
use crate::chat::ChatRunner;
use crate::constants::AGENT_WAIT_TIMEOUT;
use crate::facade::LifecycleFacade;
use crate::frame::{self, Frame};
use crate::reconnect::{Connector, ReconnectController, ReconnectDecision};
use crate::router::RequestRouter;
use crate::sequence::SequenceTracker;
use crate::transport::{
    self, CloseInfo, ConnectError, TransportMessage, TransportReader, TransportWriter,
};

/// Supplies the current device token for each (re)connect attempt. A
/// trait rather than a bare string so a reconnect can pick up a refreshed
/// token (see [`crate::credentials`]).
pub trait TokenProvider: Send + Sync {
    /// Current token to present as `Authorization: Bearer <token>`.
    fn current_token(&self) -> String;
}

impl<F: Fn() -> String + Send + Sync> TokenProvider for F {
    fn current_token(&self) -> String {
        self()
    }
}

struct ClientConnector {
    url: String,
    token: Arc<dyn TokenProvider>,
}

#[async_trait]
impl Connector for ClientConnector {
    async fn connect(&self) -> Result<(TransportWriter, TransportReader), ConnectError> {
        transport::connect(&self.url, &self.token.current_token()).await
    }

    async fn on_connected(&self, is_reconnect: bool) {
        log::info!("gateway: transport established (reconnect={is_reconnect})");
    }
}

/// A handle to the gateway connection: the stable parts (event bus, sequence
/// tracker, connection-state observable) survive reconnects; the request
/// router is rebuilt each time the socket reconnects.
#[derive(Clone)]
pub struct GatewayClient {
    bus: Arc<EventBus>,
    sequence: Arc<Mutex<SequenceTracker>>,
    router_slot: Arc<RwLock<Option<Arc<RequestRouter>>>>,
    reconnect: Arc<ReconnectController>,
    shutdown_tx: watch::Sender<bool>,
}

impl GatewayClient {
    /// Build a client for `url`, authenticating each connect attempt with
    /// whatever `token` currently returns.
    #[must_use]
    pub fn new(url: impl Into<String>, token: Arc<dyn TokenProvider>) -> Self {
        let connector = Arc::new(ClientConnector { url: url.into(), token });
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            bus: EventBus::new(),
            sequence: Arc::new(Mutex::new(SequenceTracker::new())),
            router_slot: Arc::new(RwLock::new(None)),
            reconnect: Arc::new(ReconnectController::new(connector)),
            shutdown_tx,
        }
    }

    /// Observable connection state (see [`crate::reconnect::ConnectionState`]).
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<crate::reconnect::ConnectionState> {
        self.reconnect.watch_state()
    }

    /// Build a chat runner bound to whatever router is currently active.
    /// Call fresh at each use site rather than caching across reconnects.
    ///
    /// # Errors
    ///
    /// Returns `None` if no connection has ever been established yet.
    pub async fn chat_runner(&self) -> Option<ChatRunner> {
        let router = self.router_slot.read().await.clone()?;
        Some(ChatRunner::new(router, self.bus.clone(), self.sequence.clone()))
    }

    /// Build a lifecycle facade bound to the current router.
    pub async fn facade(&self) -> Option<LifecycleFacade> {
        let router = self.router_slot.read().await.clone();
        router.map(LifecycleFacade::new)
    }

    /// Request a graceful shutdown: stops the connect/reconnect loop and
    /// fails any in-flight request.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Drive the connect → read → reconnect cycle until shutdown. Intended
    /// to be spawned as one long-lived background task.
    pub async fn run(&self) {
        let mut is_reconnect = false;
        loop {
            let shutdown_rx = self.shutdown_tx.subscribe();
            let Some((writer, reader)) = self.reconnect.run_until_connected(shutdown_rx).await
            else {
                return;
            };

            let router = RequestRouter::new(writer);
            *self.router_slot.write().await = Some(router.clone());

            if is_reconnect {
                self.resync_active_runs(&router).await;
            }
            is_reconnect = true;

            let close = self.drain(reader, &router).await;
            router.fail_all().await;
            *self.router_slot.write().await = None;

            match self.reconnect.on_close(&close).await {
                ReconnectDecision::Stop => return,
                ReconnectDecision::ReconnectImmediately => {}
                ReconnectDecision::ReconnectAfter(delay) => {
                    if self.sleep_or_shutdown(delay).await {
                        return;
                    }
                }
            }
        }
    }

    async fn sleep_or_shutdown(&self, delay: Duration) -> bool {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            () = tokio::time::sleep(delay) => false,
            _ = shutdown_rx.changed() => *shutdown_rx.borrow(),
        }
    }

    async fn resync_active_runs(&self, router: &Arc<RequestRouter>) {
        let runs = self.sequence.lock().await.active_runs();
        for run_id in runs {
            let params = serde_json::json!({ "runId": run_id });
            if let Err(e) = router.call("agent.wait", params, AGENT_WAIT_TIMEOUT).await {
                log::debug!("gateway: post-reconnect resync failed for run {run_id}: {e}");
            }
        }
    }

    /// Drain `reader` until the socket closes, publishing events to the bus
    /// and resolving pending requests via `router`. Returns the close info.
    async fn drain(&self, mut reader: TransportReader, router: &Arc<RequestRouter>) -> CloseInfo {
        loop {
            match reader.recv().await {
                Some(Ok(TransportMessage::Text(text))) => {
                    self.handle_text(&text, router).await;
                }
                Some(Ok(TransportMessage::Ping(_))) => {
                    // Pong replies are a writer-side concern; the router
                    // owns the writer, so this loop just logs and moves on.
                    log::debug!("gateway: received ping frame");
                }
                Some(Ok(TransportMessage::Close(close))) => return close,
                Some(Err(e)) => {
                    log::warn!("gateway: transport read error: {e}");
                    return CloseInfo { code: 1006, reason: e.to_string() };
                }
                None => {
                    return CloseInfo { code: 1005, reason: String::new() };
                }
            }
        }
    }

    async fn handle_text(&self, text: &str, router: &Arc<RequestRouter>) {
        match frame::decode(text) {
            Ok(Frame::Response { id, result }) => router.resolve(&id, result).await,
            Ok(Frame::ResponseError { id, code, message }) => router.reject(&id, code, message).await,
            Ok(Frame::Event(event)) => self.bus.publish(event).await,
            Ok(Frame::Request { method, .. }) => {
                log::debug!("gateway: ignoring unexpected server-initiated request {method}");
            }
            Ok(Frame::Opaque(_)) => {}
            Err(e) => log::warn!("gateway: dropping malformed frame: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_provider_closure_adapter() {
        let provider: Arc<dyn TokenProvider> = Arc::new(|| "tok-123".to_string());
        assert_eq!(provider.current_token(), "tok-123");
    }

    #[tokio::test]
    async fn test_chat_runner_is_none_before_any_connection() {
        let client = GatewayClient::new(
            "wss://127.0.0.1:1/gateway",
            Arc::new(|| String::new()) as Arc<dyn TokenProvider>,
        );
        assert!(client.chat_runner().await.is_none());
        assert!(client.facade().await.is_none());
    }
}
