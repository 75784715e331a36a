//! Connection engine backed by webrtc-rs

use super::{
    ConnectionEngine, EngineEvent, EngineEvents, EngineFactory, IceConnectionState,
    IceGatheringState, MediaTrack, RemoteTrack, SenderId, SignalingState, TrackKind, TrackSender,
};
use crate::config::WindowRtcConfig;
use crate::envelope::{IceCandidate, SdpType, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Creates a [`WebRtcEngine`] per session
#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcEngineFactory;

#[async_trait]
impl EngineFactory for WebRtcEngineFactory {
    async fn create(&self, config: &WindowRtcConfig) -> Result<Arc<dyn ConnectionEngine>> {
        let engine = WebRtcEngine::new(config).await?;
        Ok(Arc::new(engine) as Arc<dyn ConnectionEngine>)
    }
}

struct RtcSender {
    id: SenderId,
    rtp: Arc<RTCRtpSender>,
    track: Arc<dyn MediaTrack>,
}

/// Wraps an `RTCPeerConnection`.
///
/// ICE restart is deferred to the next offer, which is created with
/// `ice_restart: true`; the restart request raises negotiation-needed.
pub struct WebRtcEngine {
    peer_connection: Arc<RTCPeerConnection>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: Mutex<Option<EngineEvents>>,
    senders: Mutex<Vec<RtcSender>>,
    ice_restart_pending: AtomicBool,
}

impl WebRtcEngine {
    pub async fn new(config: &WindowRtcConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::Engine(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::Engine(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| Error::Engine(format!("Failed to create peer connection: {}", e)))?,
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self::attach(&peer_connection, &events_tx);
        debug!("Created webrtc engine");

        Ok(Self {
            peer_connection,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            senders: Mutex::new(Vec::new()),
            ice_restart_pending: AtomicBool::new(false),
        })
    }

    fn attach(pc: &RTCPeerConnection, events: &mpsc::UnboundedSender<EngineEvent>) {
        let tx = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let tx = tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(EngineEvent::IceCandidate(init.into()));
                    }
                    Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                }
            })
        }));

        let tx = events.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let tx = tx.clone();
            Box::pin(async move {
                if let Some(state) = ice_connection_state(state) {
                    let _ = tx.send(EngineEvent::IceConnectionStateChange(state));
                }
            })
        }));

        let tx = events.clone();
        pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            let tx = tx.clone();
            Box::pin(async move {
                let state = match state {
                    RTCIceGathererState::New => IceGatheringState::New,
                    RTCIceGathererState::Gathering => IceGatheringState::Gathering,
                    RTCIceGathererState::Complete => IceGatheringState::Complete,
                    _ => return,
                };
                let _ = tx.send(EngineEvent::IceGatheringStateChange(state));
            })
        }));

        let tx = events.clone();
        pc.on_negotiation_needed(Box::new(move || {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(EngineEvent::NegotiationNeeded);
            })
        }));

        let tx = events.clone();
        pc.on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
            let tx = tx.clone();
            Box::pin(async move {
                if let Some(state) = signaling_state(state) {
                    let _ = tx.send(EngineEvent::SignalingStateChange(state));
                }
            })
        }));

        let tx = events.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = tx.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Audio,
                };
                info!("Remote {:?} track {} arrived", kind, track.id());
                let _ = tx.send(EngineEvent::Track(RemoteTrack {
                    id: track.id(),
                    kind,
                    stream_ids: vec![track.stream_id()],
                    handle: Some(track as Arc<dyn Any + Send + Sync>),
                }));
            })
        }));
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }
}

fn signaling_state(state: RTCSignalingState) -> Option<SignalingState> {
    Some(match state {
        RTCSignalingState::Stable => SignalingState::Stable,
        RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
        RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
        RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
        RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
        RTCSignalingState::Closed => SignalingState::Closed,
        _ => return None,
    })
}

fn ice_connection_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    Some(match state {
        RTCIceConnectionState::New => IceConnectionState::New,
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        _ => return None,
    })
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_m_line_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription> {
    let sdp = description.sdp;
    match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(sdp),
        SdpType::Answer => RTCSessionDescription::answer(sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(sdp),
        SdpType::Rollback => {
            return Err(Error::SdpError(
                "rollback descriptions are not supported".to_string(),
            ))
        }
    }
    .map_err(|e| Error::SdpError(format!("Invalid session description: {}", e)))
}

fn from_rtc(description: RTCSessionDescription) -> Result<SessionDescription> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        other => {
            return Err(Error::SdpError(format!(
                "Unexpected description type: {}",
                other
            )))
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: description.sdp,
    })
}

#[async_trait]
impl ConnectionEngine for WebRtcEngine {
    async fn signaling_state(&self) -> SignalingState {
        signaling_state(self.peer_connection.signaling_state())
            .unwrap_or(SignalingState::Stable)
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let options = self
            .ice_restart_pending
            .swap(false, Ordering::SeqCst)
            .then(|| RTCOfferOptions {
                ice_restart: true,
                ..Default::default()
            });
        let offer = self
            .peer_connection
            .create_offer(options)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(to_rtc(description)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(to_rtc(description)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let description = self.peer_connection.local_description().await?;
        from_rtc(description).ok()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(candidate.into())
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn add_track(&self, track: Arc<dyn MediaTrack>, stream_id: &str) -> Result<SenderId> {
        let Some(local) = track.as_any().downcast_ref::<RtcLocalTrack>() else {
            return Err(Error::Engine(format!(
                "Track {} was not created for the webrtc engine",
                track.id()
            )));
        };
        if local.stream_id() != stream_id {
            debug!(
                "Track {} belongs to stream {}, attaching under {}",
                track.id(),
                local.stream_id(),
                stream_id
            );
        }

        let rtp = self
            .peer_connection
            .add_track(Arc::clone(&local.inner) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::Engine(format!("Failed to add track: {}", e)))?;

        let id = SenderId::new();
        self.senders.lock().push(RtcSender { id, rtp, track });
        Ok(id)
    }

    async fn senders(&self) -> Vec<TrackSender> {
        self.senders
            .lock()
            .iter()
            .map(|sender| TrackSender {
                id: sender.id,
                track: Arc::clone(&sender.track),
            })
            .collect()
    }

    async fn remove_track(&self, sender: SenderId) -> Result<()> {
        let rtp = {
            let mut senders = self.senders.lock();
            let index = senders
                .iter()
                .position(|existing| existing.id == sender)
                .ok_or_else(|| Error::Engine(format!("Unknown sender {:?}", sender)))?;
            senders.remove(index).rtp
        };
        self.peer_connection
            .remove_track(&rtp)
            .await
            .map_err(|e| Error::Engine(format!("Failed to remove track: {}", e)))
    }

    async fn restart_ice(&self) -> Result<()> {
        if !self.ice_restart_pending.swap(true, Ordering::SeqCst) {
            debug!("ICE restart requested");
            let _ = self.events_tx.send(EngineEvent::NegotiationNeeded);
        }
        Ok(())
    }

    fn take_events(&self) -> Option<EngineEvents> {
        self.events_rx.lock().take()
    }

    async fn detach(&self) {
        let pc = &self.peer_connection;
        pc.on_ice_candidate(Box::new(|_| Box::pin(async {})));
        pc.on_ice_connection_state_change(Box::new(|_| Box::pin(async {})));
        pc.on_ice_gathering_state_change(Box::new(|_| Box::pin(async {})));
        pc.on_negotiation_needed(Box::new(|| Box::pin(async {})));
        pc.on_signaling_state_change(Box::new(|_| Box::pin(async {})));
        pc.on_track(Box::new(|_, _, _| Box::pin(async {})));
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::Engine(format!("Failed to close peer connection: {}", e)))
    }
}

/// Local Opus track writable as encoded samples
pub struct RtcLocalTrack {
    inner: Arc<TrackLocalStaticSample>,
    kind: TrackKind,
    enabled: AtomicBool,
}

impl RtcLocalTrack {
    /// Opus audio track, 48 kHz stereo
    pub fn opus(id: impl Into<String>, stream_id: impl Into<String>) -> Arc<Self> {
        let inner = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                rtcp_feedback: vec![],
            },
            id.into(),
            stream_id.into(),
        ));
        Arc::new(Self {
            inner,
            kind: TrackKind::Audio,
            enabled: AtomicBool::new(true),
        })
    }

    pub fn stream_id(&self) -> &str {
        self.inner.stream_id()
    }

    /// Write one encoded frame. Disabled tracks drop it silently.
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        self.inner
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::Engine(format!("Failed to write sample: {}", e)))
    }
}

impl std::fmt::Debug for RtcLocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtcLocalTrack")
            .field("id", &self.inner.id())
            .field("stream_id", &self.inner.stream_id())
            .field("enabled", &self.enabled())
            .finish()
    }
}

impl MediaTrack for RtcLocalTrack {
    fn id(&self) -> &str {
        self.inner.id()
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
