//! Reconnect controller (C5): classifies transport closes, applies
//! backoff+jitter, and coordinates resubscription and gap resync.
//!
//! The overall loop shape — classify the close, decide whether to sleep,
//! attempt to reconnect, repeat — is adapted from the teacher crate's
//! `channel/action_cable.rs::run_connection_loop`, which already implements
//! exactly this state machine for a different wire protocol (Rails
//! ActionCable) with additive jitter and a 30s cap. Here the backoff table,
//! multiplicative jitter, and close classification follow §4.5 instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::watch;

use crate::constants::{BACKOFF_TABLE_SECS, JITTER_RANGE};
use crate::transport::{CloseInfo, ConnectError, TransportReader, TransportWriter};

/// Observable connection state, per §3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempt is in progress.
    Disconnected,
    /// The initial connect attempt is in flight.
    Connecting,
    /// A connection is established and healthy.
    Connected,
    /// Reconnecting after a non-intentional close; `attempt` is 1-based.
    Reconnecting(u32),
    /// Transient state emitted once, immediately before returning to
    /// `Connected`, so observers can distinguish a fresh connect from a
    /// recovered one.
    Reconnected,
    /// Terminal: reconnection halted (currently only on `AuthFailure`).
    Failed(String),
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

/// Internal classification of why a transport closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectClass {
    /// The client or server closed the connection on purpose.
    Intentional,
    /// Any close that doesn't match a more specific classification.
    Unexpected,
    /// The server closed because this client was consuming too slowly.
    SlowConsumer,
    /// The server closed because authentication failed.
    AuthFailure,
    /// The server asked the client to back off for at least `retry_after_ms`.
    RateLimited {
        /// Minimum delay, in milliseconds, before reconnecting.
        retry_after_ms: u64,
    },
}

/// Classify a transport close per §4.5 and §9's resolution of the
/// close-classification open question: prefer the structured `code` field
/// when it's meaningful, and only fall back to substring-matching `reason`
/// when the server didn't supply a code (`code == 1005`).
#[must_use]
pub fn classify_close(close: &CloseInfo) -> DisconnectClass {
    if close.code == 1005 {
        return classify_close_reason(&close.reason);
    }

    match close.code {
        1000 => DisconnectClass::Intentional,
        1008 => classify_policy_violation(&close.reason),
        _ => classify_close_reason(&close.reason),
    }
}

fn classify_policy_violation(reason: &str) -> DisconnectClass {
    let lower = reason.to_ascii_lowercase();
    if lower.contains("unauthorized") {
        DisconnectClass::AuthFailure
    } else if lower.contains("slow consumer") {
        DisconnectClass::SlowConsumer
    } else {
        DisconnectClass::Unexpected
    }
}

fn classify_close_reason(reason: &str) -> DisconnectClass {
    let lower = reason.to_ascii_lowercase();
    if lower.contains("code=1000") {
        return DisconnectClass::Intentional;
    }
    if lower.contains("code=1008") && lower.contains("unauthorized") {
        return DisconnectClass::AuthFailure;
    }
    if lower.contains("code=1008") && lower.contains("slow consumer") {
        return DisconnectClass::SlowConsumer;
    }
    if let Some(retry_after_ms) = parse_rate_limited(&lower) {
        return DisconnectClass::RateLimited { retry_after_ms };
    }
    DisconnectClass::Unexpected
}

fn parse_rate_limited(lower_reason: &str) -> Option<u64> {
    const MARKER: &str = "retryafterms=";
    let idx = lower_reason.find(MARKER)?;
    let rest = &lower_reason[idx + MARKER.len()..];
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse::<u64>().ok()
}

/// Compute the base backoff delay for 1-based `attempt`, before jitter.
#[must_use]
pub fn base_backoff(attempt: u32) -> Duration {
    let idx = (attempt.saturating_sub(1)) as usize;
    let secs = BACKOFF_TABLE_SECS
        .get(idx)
        .copied()
        .unwrap_or_else(|| *BACKOFF_TABLE_SECS.last().unwrap());
    Duration::from_secs(secs)
}

/// Apply the multiplicative jitter factor from §4.5 (`[0.75, 1.25]`) to a
/// base delay.
#[must_use]
pub fn with_jitter(base: Duration) -> Duration {
    let (lo, hi) = JITTER_RANGE;
    let factor = rand::rng().random_range(lo..=hi);
    Duration::from_secs_f64(base.as_secs_f64() * factor)
}

/// The delay to use before reconnecting after a rate-limited close or
/// connect failure: the server's `retryAfterMs` hint, floored at
/// `RATE_LIMIT_FLOOR` (and used as the delay outright when the server gave
/// no hint at all).
#[must_use]
pub fn rate_limited_delay(retry_after_ms: Option<u64>) -> Duration {
    let floor = crate::constants::RATE_LIMIT_FLOOR;
    retry_after_ms.map(Duration::from_millis).unwrap_or(floor).max(floor)
}

/// A connection factory the controller drives — implemented by whatever
/// owns the gateway URL and current token (the lifecycle facade in
/// practice). Kept as a trait rather than a bare closure so it can also
/// carry resubscription/gap-resync behavior in the same object.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Attempt to open a fresh transport connection.
    async fn connect(&self) -> Result<(TransportWriter, TransportReader), ConnectError>;

    /// Called once after every successful (re)connect, including the very
    /// first one. On a *re*connect this is where the active subscription
    /// set is replayed and gap resync (C6) is triggered for each run, per
    /// §4.5's "Reconnecting(n) → connect ok" transition.
    async fn on_connected(&self, is_reconnect: bool);
}

/// Drives the reconnect state machine described in §4.5's transition table.
pub struct ReconnectController {
    state_tx: watch::Sender<ConnectionState>,
    connector: Arc<dyn Connector>,
}

impl std::fmt::Debug for ReconnectController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectController")
            .field("state", &*self.state_tx.borrow())
            .finish()
    }
}

impl ReconnectController {
    /// Build a controller around `connector`, starting in `Disconnected`.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let (state_tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { state_tx, connector }
    }

    /// Subscribe to connection-state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Current connection state snapshot.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
    }

    /// Run until `shutdown` fires or an `AuthFailure` halts the loop.
    /// Returns the transport halves of the last successful connection, for
    /// the caller to hand to the Request router and read-loop driver; each
    /// subsequent reconnect calls this again internally and notifies via
    /// `on_connected`, so most callers only need the *first* returned pair
    /// plus a `watch_state` subscription to react to later reconnects.
    pub async fn run_until_connected(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<(TransportWriter, TransportReader)> {
        self.set_state(ConnectionState::Connecting);
        let mut attempt: u32 = 0;
        let mut is_reconnect = false;

        loop {
            if *shutdown.borrow() {
                self.set_state(ConnectionState::Disconnected);
                return None;
            }

            match self.connector.connect().await {
                Ok((writer, reader)) => {
                    self.connector.on_connected(is_reconnect).await;
                    if is_reconnect {
                        self.set_state(ConnectionState::Reconnected);
                    }
                    self.set_state(ConnectionState::Connected);
                    return Some((writer, reader));
                }
                Err(ConnectError::RateLimited { retry_after_ms }) => {
                    // Per §4.5's "Reconnecting(n) | connect err (RateLimited
                    // r)" row: sleep at least the server's hint, but this
                    // attempt doesn't count toward the backoff table.
                    log::warn!(
                        "reconnect: connect attempt {} rate limited (retry_after_ms={retry_after_ms:?})",
                        attempt + 1
                    );
                    is_reconnect = true;
                    let delay = rate_limited_delay(retry_after_ms);
                    self.set_state(ConnectionState::Reconnecting(attempt.max(1)));
                    if self.wait_or_shutdown(delay, &mut shutdown).await {
                        self.set_state(ConnectionState::Disconnected);
                        return None;
                    }
                }
                Err(ConnectError::Other(e)) => {
                    log::warn!("reconnect: connect attempt {} failed: {e}", attempt + 1);
                    attempt += 1;
                    is_reconnect = true;
                    let delay = with_jitter(base_backoff(attempt));
                    self.set_state(ConnectionState::Reconnecting(attempt));
                    if self.wait_or_shutdown(delay, &mut shutdown).await {
                        self.set_state(ConnectionState::Disconnected);
                        return None;
                    }
                }
            }
        }
    }

    /// Sleep for `delay`, or return early if shutdown fires first. Returns
    /// `true` if the caller should stop (shutdown was actually requested,
    /// as opposed to the channel just being dropped).
    async fn wait_or_shutdown(&self, delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            () = tokio::time::sleep(delay) => false,
            _ = shutdown.changed() => *shutdown.borrow(),
        }
    }

    /// React to a transport close observed while `Connected`, per §4.5's
    /// first four transition rows. Returns `true` if the caller should
    /// attempt to reconnect (possibly after the returned delay has already
    /// elapsed inside this call for the `SlowConsumer`/immediate case).
    pub async fn on_close(&self, close: &CloseInfo) -> ReconnectDecision {
        match classify_close(close) {
            DisconnectClass::Intentional => {
                self.set_state(ConnectionState::Disconnected);
                ReconnectDecision::Stop
            }
            DisconnectClass::AuthFailure => {
                self.set_state(ConnectionState::Failed("authentication failed".to_string()));
                ReconnectDecision::Stop
            }
            DisconnectClass::SlowConsumer => {
                self.set_state(ConnectionState::Reconnecting(1));
                ReconnectDecision::ReconnectImmediately
            }
            DisconnectClass::Unexpected => {
                self.set_state(ConnectionState::Reconnecting(1));
                ReconnectDecision::ReconnectAfter(with_jitter(base_backoff(1)))
            }
            DisconnectClass::RateLimited { retry_after_ms } => {
                self.set_state(ConnectionState::Reconnecting(1));
                ReconnectDecision::ReconnectAfter(rate_limited_delay(Some(retry_after_ms)))
            }
        }
    }
}

/// What the caller of [`ReconnectController::on_close`] should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// The close was intentional or terminal; do not reconnect.
    Stop,
    /// Reconnect immediately, no sleep (attempt resets to 1).
    ReconnectImmediately,
    /// Sleep for the given duration, then reconnect.
    ReconnectAfter(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_intentional_by_code() {
        let close = CloseInfo { code: 1000, reason: String::new() };
        assert_eq!(classify_close(&close), DisconnectClass::Intentional);
    }

    #[test]
    fn test_classify_auth_failure_by_code_and_reason() {
        let close = CloseInfo { code: 1008, reason: "unauthorized".to_string() };
        assert_eq!(classify_close(&close), DisconnectClass::AuthFailure);
    }

    #[test]
    fn test_classify_slow_consumer_by_code_and_reason() {
        let close = CloseInfo { code: 1008, reason: "slow consumer".to_string() };
        assert_eq!(classify_close(&close), DisconnectClass::SlowConsumer);
    }

    #[test]
    fn test_classify_falls_back_to_substring_when_no_code() {
        let close = CloseInfo { code: 1005, reason: "close code=1006".to_string() };
        assert_eq!(classify_close(&close), DisconnectClass::Unexpected);

        let close = CloseInfo { code: 1005, reason: "close code=1000".to_string() };
        assert_eq!(classify_close(&close), DisconnectClass::Intentional);
    }

    #[test]
    fn test_classify_rate_limited_substring() {
        let close = CloseInfo {
            code: 1005,
            reason: "rate limited: retryAfterMs=2500".to_string(),
        };
        assert_eq!(
            classify_close(&close),
            DisconnectClass::RateLimited { retry_after_ms: 2500 }
        );
    }

    #[test]
    fn test_backoff_table_matches_spec_sequence() {
        let expected = [1u64, 2, 4, 8, 16, 32, 60, 60];
        for (i, secs) in expected.iter().enumerate() {
            let attempt = (i + 1) as u32;
            assert_eq!(base_backoff(attempt).as_secs(), *secs);
        }
    }

    #[test]
    fn test_jitter_stays_within_range() {
        let base = Duration::from_secs(10);
        for _ in 0..200 {
            let jittered = with_jitter(base);
            assert!(jittered.as_secs_f64() >= 7.5);
            assert!(jittered.as_secs_f64() <= 12.5);
        }
    }

    #[test]
    fn test_rate_limited_delay_floors_short_hint() {
        assert_eq!(rate_limited_delay(Some(200)), crate::constants::RATE_LIMIT_FLOOR);
    }

    #[test]
    fn test_rate_limited_delay_respects_longer_hint() {
        assert_eq!(rate_limited_delay(Some(2500)), Duration::from_millis(2500));
    }

    #[test]
    fn test_rate_limited_delay_without_hint_uses_floor() {
        assert_eq!(rate_limited_delay(None), crate::constants::RATE_LIMIT_FLOOR);
    }
}
