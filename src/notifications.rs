//! Toast-style connection notifications with flicker suppression (§7).
//!
//! A connection-state observable drives an injected sink; transient
//! reconnects or auth failures that recover within
//! [`crate::constants::TOAST_SUPPRESSION_WINDOW`] never reach the sink. The
//! debounce-a-watch-channel shape here has no single teacher precedent but
//! follows the same "observe a `watch::Receiver`, react on change" idiom
//! `reconnect.rs` itself is built on.

use tokio::sync::watch;

use crate::constants::TOAST_SUPPRESSION_WINDOW;
use crate::reconnect::ConnectionState;

/// Receives human-readable connection notices.
pub trait NotificationSink: Send + Sync {
    /// Called with a short, user-facing message.
    fn notify(&self, message: &str);
}

/// Debounces [`ConnectionState`] transitions into toast notifications.
pub struct ToastSuppressor<S: NotificationSink> {
    sink: S,
}

impl<S: NotificationSink> ToastSuppressor<S> {
    /// Build a suppressor around `sink`.
    #[must_use]
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    /// Drive the suppressor until `state` closes. Intended to run as a
    /// background task for the lifetime of the client.
    pub async fn run(&self, mut state: watch::Receiver<ConnectionState>) {
        let mut previous = state.borrow().clone();
        loop {
            if state.changed().await.is_err() {
                return;
            }
            let current = state.borrow().clone();
            if current == previous {
                continue;
            }
            match &current {
                ConnectionState::Reconnecting(_) | ConnectionState::Failed(_) => {
                    if self.settles_within_window(&mut state, &current).await {
                        previous = state.borrow().clone();
                        continue;
                    }
                    self.sink.notify(&message_for(&current));
                }
                _ => {
                    self.sink.notify(&message_for(&current));
                }
            }
            previous = current;
        }
    }

    /// Waits up to the suppression window for `state` to move away from
    /// `unsettled`. Returns `true` if it did (suppress the notification).
    async fn settles_within_window(
        &self,
        state: &mut watch::Receiver<ConnectionState>,
        unsettled: &ConnectionState,
    ) -> bool {
        tokio::select! {
            changed = state.changed() => {
                changed.is_ok() && &*state.borrow() != unsettled
            }
            () = tokio::time::sleep(TOAST_SUPPRESSION_WINDOW) => false,
        }
    }
}

fn message_for(state: &ConnectionState) -> String {
    match state {
        ConnectionState::Disconnected => "Disconnected from gateway".to_string(),
        ConnectionState::Connecting => "Connecting to gateway…".to_string(),
        ConnectionState::Connected => "Connected to gateway".to_string(),
        ConnectionState::Reconnecting(attempt) => format!("Reconnecting to gateway (attempt {attempt})…"),
        ConnectionState::Reconnected => "Reconnected to gateway".to_string(),
        ConnectionState::Failed(message) => format!("Gateway connection failed: {message}"),
    }
}
