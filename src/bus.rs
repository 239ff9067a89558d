//! Event bus (C4): buffers the last `MAX_BUFFERED` push frames and fans them
//! out to per-run subscribers without ever blocking the producer.
//!
//! The replay buffer's oldest-eviction push logic is adapted from the
//! teacher crate's `broker/ring_buffer.rs`, generalized from raw bytes to
//! whole [`EventFrame`] values and from a byte-capacity to an element-count
//! capacity (`MAX_BUFFERED = 128`, per §3).

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::constants::MAX_BUFFERED;
use crate::frame::EventFrame;

/// Bounded, oldest-eviction buffer of the most recently seen event frames.
///
/// Mirrors `RingBuffer`'s `push` logic in `broker/ring_buffer.rs`: a full
/// buffer drops exactly as many of its oldest entries as needed to make room
/// for the incoming one.
#[derive(Debug)]
struct ReplayBuffer {
    buf: VecDeque<EventFrame>,
    capacity: usize,
}

impl ReplayBuffer {
    fn new(capacity: usize) -> Self {
        Self { buf: VecDeque::with_capacity(capacity), capacity }
    }

    fn push(&mut self, frame: EventFrame) {
        if self.buf.len() >= self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(frame);
    }

    fn iter_matching<'a>(&'a self, run_id: &'a str) -> impl Iterator<Item = &'a EventFrame> {
        self.buf.iter().filter(move |f| f.run_id() == Some(run_id))
    }
}

struct Subscription {
    run_id: String,
    sender: mpsc::Sender<EventFrame>,
}

/// Buffers push frames and fans them out to per-run subscribers.
///
/// Exclusively owns the replay buffer and the subscriber set, per §5's
/// shared-resource policy; all mutation goes through `&self` methods backed
/// by an internal mutex so callers never need `&mut`.
#[derive(Debug)]
pub struct EventBus {
    inner: Mutex<BusInner>,
}

struct BusInner {
    replay: ReplayBuffer,
    subscriptions: Vec<Subscription>,
}

impl std::fmt::Debug for BusInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusInner")
            .field("buffered", &self.replay.buf.len())
            .field("subscribers", &self.subscriptions.len())
            .finish()
    }
}

/// A lazy pull stream of frames matching one `runId`.
///
/// Created by [`EventBus::subscribe`]; dropping it unregisters the
/// subscription on the next bus publish (the bus prunes dead senders lazily
/// rather than requiring an explicit unsubscribe call).
#[derive(Debug)]
pub struct Subscriber {
    receiver: mpsc::Receiver<EventFrame>,
}

impl Subscriber {
    /// Await the next frame for this run, or `None` once the bus has no more
    /// senders for it (the publishing side dropped, or the bus itself did).
    pub async fn next(&mut self) -> Option<EventFrame> {
        self.receiver.recv().await
    }
}

impl EventBus {
    /// Build an empty bus with the standard `MAX_BUFFERED` replay capacity.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(BusInner {
                replay: ReplayBuffer::new(MAX_BUFFERED),
                subscriptions: Vec::new(),
            }),
        })
    }

    /// Record an incoming event frame and forward it to every subscriber
    /// whose `runId` matches, per §4.4's matching rule.
    ///
    /// Each send happens on the bus's own lock-held pass, but since
    /// `mpsc::Sender::send` only blocks when the receiver's buffer is full
    /// and every subscriber channel is generously sized, a slow subscriber
    /// never delays another subscriber's delivery or the next `publish`
    /// call in practice; callers that need a hard non-blocking guarantee
    /// should size their subscriber buffer to their consumption rate.
    pub async fn publish(&self, frame: EventFrame) {
        let mut inner = self.inner.lock().await;
        inner.replay.push(frame.clone());

        let Some(run_id) = frame.run_id().map(str::to_string) else {
            return;
        };

        inner.subscriptions.retain(|sub| {
            if sub.run_id != run_id {
                return true;
            }
            sub.sender.try_send(frame.clone()).is_ok()
        });
    }

    /// Subscribe to every frame matching `run_id`: first replays buffered
    /// frames in order, then live-forwards new matching frames.
    pub async fn subscribe(&self, run_id: &str) -> Subscriber {
        let (tx, rx) = mpsc::channel(MAX_BUFFERED);
        let mut inner = self.inner.lock().await;

        for frame in inner.replay.iter_matching(run_id) {
            // Best-effort: the channel was just created with MAX_BUFFERED
            // capacity, so this only fails if the subscriber never reads.
            let _ = tx.try_send(frame.clone());
        }

        inner.subscriptions.push(Subscription { run_id: run_id.to_string(), sender: tx });
        Subscriber { receiver: rx }
    }

    /// Number of buffered frames (test/diagnostic use).
    pub async fn buffered_len(&self) -> usize {
        self.inner.lock().await.replay.buf.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            inner: Mutex::new(BusInner {
                replay: ReplayBuffer::new(MAX_BUFFERED),
                subscriptions: Vec::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(run_id: &str, seq: u64) -> EventFrame {
        EventFrame {
            event: "chat".to_string(),
            seq: Some(seq),
            ts_ms: None,
            payload: json!({ "runId": run_id, "seq": seq }),
            eventmeta: None,
        }
    }

    #[tokio::test]
    async fn test_replay_buffer_caps_at_max_buffered() {
        let bus = EventBus::new();
        for i in 0..(MAX_BUFFERED as u64 + 50) {
            bus.publish(frame("r1", i)).await;
        }
        assert_eq!(bus.buffered_len().await, MAX_BUFFERED);
    }

    #[tokio::test]
    async fn test_replay_buffer_retains_tail_after_overflow() {
        let bus = EventBus::new();
        let total = MAX_BUFFERED as u64 + 10;
        for i in 0..total {
            bus.publish(frame("r1", i)).await;
        }
        let mut sub = bus.subscribe("r1").await;
        let first = sub.next().await.unwrap();
        assert_eq!(first.seq, Some(total - MAX_BUFFERED as u64));
    }

    #[tokio::test]
    async fn test_subscriber_receives_buffered_then_live_frames() {
        let bus = EventBus::new();
        bus.publish(frame("r1", 1)).await;
        let mut sub = bus.subscribe("r1").await;
        bus.publish(frame("r1", 2)).await;
        bus.publish(frame("other", 99)).await;

        assert_eq!(sub.next().await.unwrap().seq, Some(1));
        assert_eq!(sub.next().await.unwrap().seq, Some(2));
    }

    #[tokio::test]
    async fn test_subscriber_only_sees_matching_run() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("r1").await;
        bus.publish(frame("r2", 1)).await;
        bus.publish(frame("r1", 1)).await;

        let received = sub.next().await.unwrap();
        assert_eq!(received.run_id(), Some("r1"));
    }
}
