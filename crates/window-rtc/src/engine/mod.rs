//! Connection engine capability consumed by peer sessions
//!
//! A session never tracks negotiation state itself. It reads the engine's
//! [`SignalingState`] and gates its own actions on it.

#[cfg(any(test, feature = "test-support"))]
pub mod scripted;
#[cfg(feature = "webrtc-engine")]
pub mod webrtc;

use crate::config::WindowRtcConfig;
use crate::envelope::{IceCandidate, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// WebRTC signaling state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

/// ICE connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceConnectionState {
    /// Connectivity lost in a way an ICE restart may recover
    pub fn needs_restart(&self) -> bool {
        matches!(self, IceConnectionState::Failed | IceConnectionState::Disconnected)
    }
}

/// ICE gathering state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
}

/// Details of a failed candidate gathering attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateErrorInfo {
    pub url: String,
    pub error_code: u16,
    pub error_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Local media track that can be attached to an engine
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    fn enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);

    /// Lets an engine recover its own concrete track type
    fn as_any(&self) -> &dyn Any;
}

/// A group of local tracks sharing one stream id
#[derive(Debug, Clone)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }
}

/// Track received from the remote peer
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    pub stream_ids: Vec<String>,
    /// Engine-specific track object, if the engine exposes one
    pub handle: Option<Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("stream_ids", &self.stream_ids)
            .field("has_handle", &self.handle.is_some())
            .finish()
    }
}

/// Identifies one attached local track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SenderId(Uuid);

impl SenderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SenderId {
    fn default() -> Self {
        Self::new()
    }
}

/// Attached local track and the id needed to detach it
#[derive(Debug, Clone)]
pub struct TrackSender {
    pub id: SenderId,
    pub track: Arc<dyn MediaTrack>,
}

/// Asynchronous notifications raised by an engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    IceCandidate(IceCandidate),
    IceCandidateError(IceCandidateErrorInfo),
    IceConnectionStateChange(IceConnectionState),
    IceGatheringStateChange(IceGatheringState),
    NegotiationNeeded,
    SignalingStateChange(SignalingState),
    Track(RemoteTrack),
}

pub type EngineEvents = mpsc::UnboundedReceiver<EngineEvent>;

/// WebRTC-style peer connection owned by exactly one session
#[async_trait]
pub trait ConnectionEngine: Send + Sync {
    async fn signaling_state(&self) -> SignalingState;

    async fn create_offer(&self) -> Result<SessionDescription>;
    async fn create_answer(&self) -> Result<SessionDescription>;
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;
    async fn local_description(&self) -> Option<SessionDescription>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn add_track(&self, track: Arc<dyn MediaTrack>, stream_id: &str) -> Result<SenderId>;
    async fn senders(&self) -> Vec<TrackSender>;
    async fn remove_track(&self, sender: SenderId) -> Result<()>;

    /// Request an ICE restart on the next offer
    async fn restart_ice(&self) -> Result<()>;

    /// Notification stream; available once
    fn take_events(&self) -> Option<EngineEvents>;

    /// Stop raising notifications
    async fn detach(&self);

    async fn close(&self) -> Result<()>;
}

/// Creates one engine per session
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self, config: &WindowRtcConfig) -> Result<Arc<dyn ConnectionEngine>>;
}
