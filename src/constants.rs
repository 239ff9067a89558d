//! Application-wide constants for the gateway client.
//!
//! Centralizes magic numbers so the reconnect, sequencing, and buffering
//! policies described alongside each component stay in one place.

use std::time::Duration;

// ============================================================================
// Identity
// ============================================================================

/// User-Agent sent on the initial WebSocket handshake.
pub fn user_agent() -> String {
    format!("osaurus-gateway/{}", env!("CARGO_PKG_VERSION"))
}

/// Default gateway port when no persisted state overrides it.
pub const DEFAULT_GATEWAY_PORT: u16 = 18789;

// ============================================================================
// Timeouts
// ============================================================================

/// Default timeout for a request/response round trip through the router.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for `chat.send` specifically: the server only needs to accept the
/// turn, not finish it, so this is much shorter than [`REQUEST_TIMEOUT`].
pub const CHAT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Floor applied to a server-supplied `retryAfterMs` rate-limit hint.
pub const RATE_LIMIT_FLOOR: Duration = Duration::from_millis(1_000);

/// Cap on the reconnect backoff delay.
pub const RECONNECT_BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Default timeout for a gap-resync `agent.wait` call.
pub const AGENT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Window within which a reconnect or auth failure is suppressed from
/// producing a user-visible toast notification.
pub const TOAST_SUPPRESSION_WINDOW: Duration = Duration::from_millis(200);

// ============================================================================
// Buffering & replay
// ============================================================================

/// Replay buffer capacity for the event bus (oldest-eviction policy).
pub const MAX_BUFFERED: usize = 128;

// ============================================================================
// Delta normalizer
// ============================================================================

/// Lower bound of the adaptive `on_sync` throttle interval.
pub const SYNC_THROTTLE_MIN: Duration = Duration::from_millis(100);

/// Upper bound of the adaptive `on_sync` throttle interval.
pub const SYNC_THROTTLE_MAX: Duration = Duration::from_millis(250);

// ============================================================================
// Reconnect backoff sequence
// ============================================================================

/// Base backoff delays in seconds, indexed by attempt (1-based), capped at
/// the final entry once the attempt count exceeds the table length.
pub const BACKOFF_TABLE_SECS: &[u64] = &[1, 2, 4, 8, 16, 32, 60];

/// Multiplicative jitter range applied to each chosen backoff delay.
pub const JITTER_RANGE: (f64, f64) = (0.75, 1.25);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_values_are_reasonable() {
        assert!(REQUEST_TIMEOUT >= Duration::from_secs(5));
        assert!(RECONNECT_BACKOFF_CAP >= Duration::from_secs(10));
        assert!(AGENT_WAIT_TIMEOUT <= REQUEST_TIMEOUT);
        assert!(CHAT_SEND_TIMEOUT < REQUEST_TIMEOUT);
    }

    #[test]
    fn test_backoff_table_is_monotonic_and_capped() {
        for pair in BACKOFF_TABLE_SECS.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert_eq!(*BACKOFF_TABLE_SECS.last().unwrap(), RECONNECT_BACKOFF_CAP.as_secs());
    }
}
