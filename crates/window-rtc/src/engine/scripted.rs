//! In-memory connection engine for tests
//!
//! Follows WebRTC signaling-state transitions without any network I/O,
//! records every call it receives and lets tests inject notifications.

use super::{
    ConnectionEngine, EngineEvent, EngineEvents, EngineFactory, MediaTrack, SenderId,
    SignalingState, TrackKind, TrackSender,
};
use crate::config::WindowRtcConfig;
use crate::envelope::{IceCandidate, SdpType, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A call received by a [`ScriptedEngine`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    CreateOffer { ice_restart: bool },
    CreateAnswer,
    SetLocalDescription(SdpType),
    SetRemoteDescription(SdpType),
    AddIceCandidate,
    AddTrack(String),
    RemoveTrack,
    RestartIce,
    Detach,
    Close,
}

struct ScriptState {
    signaling: SignalingState,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    senders: Vec<TrackSender>,
    candidates: Vec<IceCandidate>,
    calls: Vec<EngineCall>,
    descriptions_created: u32,
    ice_restart_pending: bool,
    fail_next: Option<String>,
}

impl ScriptState {
    fn begin(&mut self, call: EngineCall) -> Result<()> {
        self.calls.push(call);
        if self.signaling == SignalingState::Closed {
            return Err(Error::Engine("connection is closed".to_string()));
        }
        match self.fail_next.take() {
            Some(message) => Err(Error::Engine(message)),
            None => Ok(()),
        }
    }
}

pub struct ScriptedEngine {
    label: String,
    state: Mutex<ScriptState>,
    events_tx: Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>,
    events_rx: Mutex<Option<EngineEvents>>,
}

impl ScriptedEngine {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            label: label.into(),
            state: Mutex::new(ScriptState {
                signaling: SignalingState::Stable,
                local: None,
                remote: None,
                senders: Vec::new(),
                candidates: Vec::new(),
                calls: Vec::new(),
                descriptions_created: 0,
                ice_restart_pending: false,
                fail_next: None,
            }),
            events_tx: Mutex::new(Some(tx)),
            events_rx: Mutex::new(Some(rx)),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Raise a notification as if it came from the network
    pub fn inject(&self, event: EngineEvent) {
        self.emit(event);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn state(&self) -> SignalingState {
        self.state.lock().signaling
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().candidates.clone()
    }

    pub fn ice_restart_pending(&self) -> bool {
        self.state.lock().ice_restart_pending
    }

    /// Make the next fallible call fail with `message`
    pub fn fail_next(&self, message: impl Into<String>) {
        self.state.lock().fail_next = Some(message.into());
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(tx) = self.events_tx.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn transition(&self, next: SignalingState) {
        let changed = {
            let mut state = self.state.lock();
            let changed = state.signaling != next;
            state.signaling = next;
            changed
        };
        if changed {
            self.emit(EngineEvent::SignalingStateChange(next));
        }
    }

    fn create_description(&self, sdp_type: SdpType) -> Result<SessionDescription> {
        let mut state = self.state.lock();
        state.descriptions_created += 1;
        let mut sdp = format!(
            "v=0\r\no={} {} {:?}\r\n",
            self.label, state.descriptions_created, sdp_type
        );
        if sdp_type == SdpType::Offer && std::mem::take(&mut state.ice_restart_pending) {
            sdp.push_str("a=ice-options:restart\r\n");
        }
        for sender in &state.senders {
            sdp.push_str(&format!("a=msid:{}\r\n", sender.track.id()));
        }
        Ok(SessionDescription { sdp_type, sdp })
    }
}

#[async_trait]
impl ConnectionEngine for ScriptedEngine {
    async fn signaling_state(&self) -> SignalingState {
        self.state()
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        {
            let mut state = self.state.lock();
            let ice_restart = state.ice_restart_pending;
            state.begin(EngineCall::CreateOffer { ice_restart })?;
            if !matches!(
                state.signaling,
                SignalingState::Stable | SignalingState::HaveLocalOffer
            ) {
                return Err(Error::Engine(format!(
                    "cannot create offer in {:?}",
                    state.signaling
                )));
            }
        }
        self.create_description(SdpType::Offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        {
            let mut state = self.state.lock();
            state.begin(EngineCall::CreateAnswer)?;
            if state.signaling != SignalingState::HaveRemoteOffer {
                return Err(Error::Engine(format!(
                    "cannot create answer in {:?}",
                    state.signaling
                )));
            }
        }
        self.create_description(SdpType::Answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let next = {
            let mut state = self.state.lock();
            state.begin(EngineCall::SetLocalDescription(description.sdp_type))?;
            let next = match (description.sdp_type, state.signaling) {
                (SdpType::Offer, SignalingState::Stable | SignalingState::HaveLocalOffer) => {
                    SignalingState::HaveLocalOffer
                }
                (SdpType::Answer, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
                (SdpType::Pranswer, SignalingState::HaveRemoteOffer) => {
                    SignalingState::HaveLocalPranswer
                }
                (SdpType::Rollback, _) => SignalingState::Stable,
                (sdp_type, current) => {
                    return Err(Error::SdpError(format!(
                        "cannot set local {:?} in {:?}",
                        sdp_type, current
                    )))
                }
            };
            state.local = Some(description);
            next
        };
        self.transition(next);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let next = {
            let mut state = self.state.lock();
            state.begin(EngineCall::SetRemoteDescription(description.sdp_type))?;
            let next = match (description.sdp_type, state.signaling) {
                (SdpType::Offer, SignalingState::Stable | SignalingState::HaveRemoteOffer) => {
                    SignalingState::HaveRemoteOffer
                }
                (
                    SdpType::Answer,
                    SignalingState::HaveLocalOffer | SignalingState::HaveRemotePranswer,
                ) => SignalingState::Stable,
                (SdpType::Pranswer, SignalingState::HaveLocalOffer) => {
                    SignalingState::HaveRemotePranswer
                }
                (SdpType::Rollback, _) => SignalingState::Stable,
                (sdp_type, current) => {
                    return Err(Error::SdpError(format!(
                        "cannot set remote {:?} in {:?}",
                        sdp_type, current
                    )))
                }
            };
            state.remote = Some(description);
            next
        };
        self.transition(next);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut state = self.state.lock();
        state.begin(EngineCall::AddIceCandidate)?;
        if state.remote.is_none() {
            return Err(Error::IceCandidateError(
                "remote description is not set".to_string(),
            ));
        }
        state.candidates.push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: Arc<dyn MediaTrack>, _stream_id: &str) -> Result<SenderId> {
        let id = SenderId::new();
        {
            let mut state = self.state.lock();
            state.begin(EngineCall::AddTrack(track.id().to_string()))?;
            state.senders.push(TrackSender { id, track });
        }
        self.emit(EngineEvent::NegotiationNeeded);
        Ok(id)
    }

    async fn senders(&self) -> Vec<TrackSender> {
        self.state.lock().senders.clone()
    }

    async fn remove_track(&self, sender: SenderId) -> Result<()> {
        let mut state = self.state.lock();
        state.begin(EngineCall::RemoveTrack)?;
        let before = state.senders.len();
        state.senders.retain(|existing| existing.id != sender);
        if state.senders.len() == before {
            return Err(Error::Engine(format!("unknown sender {:?}", sender)));
        }
        Ok(())
    }

    async fn restart_ice(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.begin(EngineCall::RestartIce)?;
            state.ice_restart_pending = true;
        }
        self.emit(EngineEvent::NegotiationNeeded);
        Ok(())
    }

    fn take_events(&self) -> Option<EngineEvents> {
        self.events_rx.lock().take()
    }

    async fn detach(&self) {
        self.state.lock().calls.push(EngineCall::Detach);
        self.events_tx.lock().take();
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().calls.push(EngineCall::Close);
        self.transition(SignalingState::Closed);
        Ok(())
    }
}

/// Factory keeping every engine it created reachable from tests
#[derive(Default)]
pub struct ScriptedEngineFactory {
    engines: Mutex<Vec<Arc<ScriptedEngine>>>,
}

impl ScriptedEngineFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn engines(&self) -> Vec<Arc<ScriptedEngine>> {
        self.engines.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<ScriptedEngine>> {
        self.engines.lock().last().cloned()
    }
}

#[async_trait]
impl EngineFactory for ScriptedEngineFactory {
    async fn create(&self, _config: &WindowRtcConfig) -> Result<Arc<dyn ConnectionEngine>> {
        let mut engines = self.engines.lock();
        let engine = ScriptedEngine::new(format!("engine-{}", engines.len() + 1));
        engines.push(Arc::clone(&engine));
        Ok(engine as Arc<dyn ConnectionEngine>)
    }
}

/// Local track with only an id and an enabled flag
#[derive(Debug)]
pub struct ScriptedTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
}

impl ScriptedTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            enabled: AtomicBool::new(true),
        })
    }

    pub fn audio(id: impl Into<String>) -> Arc<Self> {
        Self::new(id, TrackKind::Audio)
    }
}

impl MediaTrack for ScriptedTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
