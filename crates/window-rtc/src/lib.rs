//! Peer discovery and WebRTC signaling between named application windows
//!
//! Windows register with a central hub under unique names, exchange
//! offer/answer/candidate envelopes through the hub's relay, and each keep
//! one [`PeerSession`] per remote window that drives negotiation, ICE
//! restart on connectivity loss, and teardown.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── coordinator ────────────────────────────┐
//! │  WindowHub                                                          │
//! │  ├─ PeerRegistry   (name -> endpoint handle, disappearance hooks)   │
//! │  └─ SignalingRelay (envelope.receiver -> push on Signal channel)    │
//! │     bound to an IpcHost: Log, Signal, GetOwnWindowName,             │
//! │                          GetRegisteredWindows                       │
//! └──────────────▲────────────────────────────────────▲─────────────────┘
//!                │ Transport (invoke / send / push)    │
//! ┌──────────────┴─────────────┐        ┌─────────────┴────────────────┐
//! │ window "A"                 │        │ window "B"                   │
//! │ Endpoint ─ HubClient       │        │ Endpoint ─ HubClient         │
//! │ PeerSession(A->B)          │        │ PeerSession(B->A)            │
//! │  └─ ConnectionEngine       │◄──────►│  └─ ConnectionEngine         │
//! └────────────────────────────┘  media └──────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use window_rtc::transport::loopback::LoopbackHost;
//! use window_rtc::WindowHub;
//!
//! let host = LoopbackHost::new();
//! let hub = WindowHub::new();
//! hub.bind(Arc::new(host.clone()));
//!
//! let (sender, _transport) = host.open_window();
//! hub.register("Sender", sender.clone()).unwrap();
//! assert_eq!(hub.registry().list_names(), vec!["Sender".to_string()]);
//!
//! sender.close();
//! assert!(hub.registry().is_empty());
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::{TurnServerConfig, WindowRtcConfig};
pub use engine::{
    ConnectionEngine, EngineEvent, EngineFactory, MediaStream, MediaTrack, SignalingState,
};
pub use envelope::{IceCandidate, SessionDescription, SignalKind, SignalingEnvelope};
pub use error::{Error, RelayError, Result};
pub use hub::{EndpointHandle, EndpointId, IpcHost, PeerRegistry, SignalingRelay, WindowHub};
pub use protocol::Channel;
pub use session::{Endpoint, EventKind, PeerSession, SessionEvent, SessionEventData};
pub use transport::{HubClient, Transport};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
