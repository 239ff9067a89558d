//! Gateway client core for the OpenClaw agent runtime.
//!
//! A single persistent WebSocket carries bidirectional JSON-RPC plus
//! server-push events (the "frame" layer). Everything above that is built
//! out of small, independently testable collaborators: a request router
//! that correlates responses by id, an event bus that buffers and fans out
//! push frames per run, a reconnect controller that classifies closes and
//! applies backoff, a sequence tracker that detects gaps without
//! reordering, and a delta normalizer that turns raw chat/agent events into
//! a uniform streaming text API.
//!
//! [`client::GatewayClient`] wires all of this into one handle; most
//! embedders only need that module and [`chat`]/[`facade`].

pub mod bridge;
pub mod bus;
pub mod chat;
pub mod client;
pub mod constants;
pub mod control_filter;
pub mod credentials;
pub mod env;
pub mod error;
pub mod facade;
pub mod frame;
pub mod normalizer;
pub mod notifications;
pub mod presence;
pub mod reconnect;
pub mod router;
pub mod sequence;
pub mod state;
pub mod transport;

pub use bridge::TurnSink;
pub use bus::{EventBus, Subscriber};
pub use chat::{ChatRunner, ChatStream};
pub use client::{GatewayClient, TokenProvider};
pub use credentials::{resolve_token, standard_sources, CredentialSource};
pub use error::{GatewayError, RequestErrorKind};
pub use facade::LifecycleFacade;
pub use frame::{EventFrame, Frame};
pub use normalizer::{NormalizedEvent, NormalizerInput};
pub use notifications::{NotificationSink, ToastSuppressor};
pub use presence::PresenceRow;
pub use reconnect::{ConnectionState, ReconnectDecision};
pub use router::RequestRouter;
pub use state::{BindMode, GatewayState};
pub use transport::{CloseInfo, TransportMessage};
