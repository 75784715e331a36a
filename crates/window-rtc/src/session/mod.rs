//! Per-peer session: one connection engine bound to one named remote window
//!
//! # Lifecycle
//!
//! ```text
//! PeerSession::with(endpoint, "B")
//!   ├─ GetRegisteredWindows  (B must be registered)
//!   ├─ GetOwnWindowName      (self must be registered)
//!   ├─ engine = factory.create()
//!   └─ pump task: engine events + inbound Signal pushes (sender=B, receiver=self)
//!
//! add_stream / request_offer  ──► Signal(offer | request-offer) ──► relay ──► B
//! inbound offer      ──► set remote, answer, set local, Signal(answer)
//! inbound answer     ──► set remote              (dropped in stable/closed)
//! inbound candidate  ──► add ICE candidate       (dropped in closed)
//! inbound peer-left  ──► peer-left event         (engine stays open)
//! ICE failed/disconnected ──► engine.restart_ice()
//!
//! dispose(): peer-left to B, leave event, disable and remove tracks,
//!            stop the pump, detach and close the engine, clear listeners
//! ```

mod events;

pub use events::{
    EventEmitter, EventKind, Listener, ListenerId, SessionEvent, SessionEventData,
};

use crate::config::WindowRtcConfig;
use crate::engine::{
    ConnectionEngine, EngineEvent, EngineEvents, EngineFactory, MediaStream, SignalingState,
};
use crate::envelope::{SignalKind, SignalingEnvelope};
use crate::protocol::Channel;
use crate::transport::{HubClient, SubscriptionId, Transport};
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Window-side context: transport binding, engine factory and configuration
pub struct Endpoint {
    transport: RwLock<Option<Arc<dyn Transport>>>,
    engines: Arc<dyn EngineFactory>,
    config: WindowRtcConfig,
}

impl Endpoint {
    pub fn new(engines: Arc<dyn EngineFactory>, config: WindowRtcConfig) -> Self {
        Self {
            transport: RwLock::new(None),
            engines,
            config,
        }
    }

    /// Bind the transport every session of this window signals through
    pub fn define_transport(&self, transport: Arc<dyn Transport>) {
        *self.transport.write() = Some(transport);
    }

    pub fn config(&self) -> &WindowRtcConfig {
        &self.config
    }

    pub fn hub_client(&self) -> Result<HubClient> {
        let transport = self
            .transport
            .read()
            .clone()
            .ok_or(Error::TransportNotConfigured)?;
        Ok(HubClient::new(transport, self.config.invoke_timeout()))
    }
}

struct SessionInner {
    local: String,
    remote: String,
    client: HubClient,
    engine: Arc<dyn ConnectionEngine>,
    events: EventEmitter,
    disposed: AtomicBool,
    inbound: SubscriptionId,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// Negotiation state machine for one (local, remote) window pair
pub struct PeerSession {
    inner: Arc<SessionInner>,
}

impl PeerSession {
    /// Open a session with `peer`.
    ///
    /// Fails before allocating an engine if the transport is unbound, the
    /// peer is not registered, or this window is not registered.
    pub async fn with(endpoint: &Endpoint, peer: &str) -> Result<Self> {
        let client = endpoint.hub_client()?;
        let peer = peer.trim();

        let names = client.registered_names().await?;
        if !names.iter().any(|name| name == peer) {
            return Err(Error::PeerNotRegistered(peer.to_string()));
        }

        let local = client.own_name().await?;
        if local == peer {
            return Err(Error::InvalidName(format!(
                "window '{}' cannot open a session with itself",
                peer
            )));
        }

        let engine = endpoint.engines.create(endpoint.config()).await?;
        let engine_events = engine
            .take_events()
            .ok_or_else(|| Error::Engine("engine events already taken".to_string()))?;
        let inbound = client.subscribe(Channel::Signal);

        let inner = Arc::new(SessionInner {
            local,
            remote: peer.to_string(),
            client,
            engine,
            events: EventEmitter::new(),
            disposed: AtomicBool::new(false),
            inbound: inbound.id,
            pump: Mutex::new(None),
        });

        let pump = tokio::spawn(Arc::clone(&inner).pump(engine_events, inbound.rx));
        *inner.pump.lock() = Some(pump);

        info!("Opened session '{}' -> '{}'", inner.local, inner.remote);
        Ok(Self { inner })
    }

    pub fn local_name(&self) -> &str {
        &self.inner.local
    }

    pub fn remote_name(&self) -> &str {
        &self.inner.remote
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub async fn signaling_state(&self) -> SignalingState {
        self.inner.engine.signaling_state().await
    }

    pub fn events(&self) -> &EventEmitter {
        &self.inner.events
    }

    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&SessionEventData) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, listener)
    }

    pub fn on_any<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SessionEventData) + Send + Sync + 'static,
    {
        self.inner.events.on_any(listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEventData> {
        self.inner.events.subscribe()
    }

    /// Attach every track of `stream` and send an offer to the peer.
    ///
    /// Engine failures are returned; a relay failure is emitted as `error`.
    pub async fn add_stream(&self, stream: &MediaStream) -> Result<()> {
        self.inner.ensure_live()?;
        for track in &stream.tracks {
            self.inner
                .engine
                .add_track(Arc::clone(track), &stream.id)
                .await?;
        }
        debug!(
            "Attached {} track(s) of stream {} for '{}'",
            stream.tracks.len(),
            stream.id,
            self.inner.remote
        );
        self.inner.send_offer().await
    }

    /// Ask the peer to start negotiating
    pub async fn request_offer(&self) -> Result<()> {
        self.inner.ensure_live()?;
        self.inner
            .signal(SignalKind::RequestOffer, serde_json::Value::Null)
            .await;
        self.inner.emit_local(SessionEvent::RequestOffer);
        Ok(())
    }

    /// Tear the session down. Calls after the first are no-ops.
    pub async fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::SeqCst) {
            debug!("Session '{}' -> '{}' already disposed", inner.local, inner.remote);
            return;
        }

        inner
            .signal(SignalKind::PeerLeft, serde_json::Value::Null)
            .await;
        inner.emit_local(SessionEvent::Leave);

        for sender in inner.engine.senders().await {
            sender.track.set_enabled(false);
            if let Err(e) = inner.engine.remove_track(sender.id).await {
                warn!("Failed to remove track {}: {}", sender.track.id(), e);
            }
        }

        inner.stop_pump();
        inner.engine.detach().await;
        if let Err(e) = inner.engine.close().await {
            warn!("Failed to close engine for '{}': {}", inner.remote, e);
        }
        inner.events.clear();

        info!("Disposed session '{}' -> '{}'", inner.local, inner.remote);
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        if self.is_disposed() {
            return;
        }
        warn!(
            "Session '{}' -> '{}' dropped without dispose",
            self.inner.local, self.inner.remote
        );
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.inner.stop_pump();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let engine = Arc::clone(&self.inner.engine);
            runtime.spawn(async move {
                engine.detach().await;
                let _ = engine.close().await;
            });
        }
    }
}

impl SessionInner {
    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::SessionDisposed(format!(
                "'{}' -> '{}'",
                self.local, self.remote
            )));
        }
        Ok(())
    }

    fn stop_pump(&self) {
        self.client.unsubscribe(self.inbound);
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }

    async fn pump(
        self: Arc<Self>,
        mut engine_events: EngineEvents,
        mut inbound: mpsc::UnboundedReceiver<serde_json::Value>,
    ) {
        loop {
            tokio::select! {
                Some(event) = engine_events.recv() => self.on_engine_event(event).await,
                Some(raw) = inbound.recv() => self.on_inbound(raw).await,
                else => break,
            }
        }
        debug!("Session pump '{}' -> '{}' finished", self.local, self.remote);
    }

    fn emit_local(&self, event: SessionEvent) {
        self.events.emit(SessionEventData {
            sender: self.local.clone(),
            receiver: self.remote.clone(),
            event,
        });
    }

    fn emit_inbound(&self, event: SessionEvent) {
        self.events.emit(SessionEventData {
            sender: self.remote.clone(),
            receiver: self.local.clone(),
            event,
        });
    }

    fn emit_error(&self, err: Error) {
        warn!("Session '{}' -> '{}': {}", self.local, self.remote, err);
        self.emit_local(SessionEvent::Error(Arc::new(err)));
    }

    /// Forward an envelope to the peer; every failure becomes an `error` event
    async fn signal(&self, channel: SignalKind, payload: serde_json::Value) {
        let envelope = SignalingEnvelope::new(channel, &self.local, &self.remote, payload);
        match self.client.signal(&envelope).await {
            Ok(None) => debug!("Sent {} to '{}'", channel, self.remote),
            Ok(Some(relay_error)) => self.emit_error(relay_error.into()),
            Err(e) => self.emit_error(e),
        }
    }

    async fn send_offer(&self) -> Result<()> {
        let offer = self.engine.create_offer().await?;
        self.engine.set_local_description(offer.clone()).await?;
        let payload = serde_json::to_value(&offer)
            .map_err(|e| Error::SerializationError(format!("Failed to encode offer: {}", e)))?;
        self.signal(SignalKind::Offer, payload).await;
        self.emit_local(SessionEvent::SentOffer(offer));
        Ok(())
    }

    async fn is_closed(&self) -> bool {
        self.engine.signaling_state().await == SignalingState::Closed
    }

    async fn on_engine_event(&self, event: EngineEvent) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let event = match event {
            EngineEvent::IceCandidate(candidate) => {
                match serde_json::to_value(&candidate) {
                    Ok(payload) => self.signal(SignalKind::Candidate, payload).await,
                    Err(e) => self.emit_error(Error::SerializationError(format!(
                        "Failed to encode candidate: {}",
                        e
                    ))),
                }
                SessionEvent::IceCandidate(candidate)
            }
            EngineEvent::IceConnectionStateChange(state) => {
                if state.needs_restart() {
                    info!("ICE {:?} with '{}', restarting", state, self.remote);
                    if let Err(e) = self.engine.restart_ice().await {
                        self.emit_error(e);
                    }
                }
                SessionEvent::IceConnectionStateChange(state)
            }
            EngineEvent::IceCandidateError(info) => SessionEvent::IceCandidateError(info),
            EngineEvent::IceGatheringStateChange(state) => {
                SessionEvent::IceGatheringStateChange(state)
            }
            EngineEvent::NegotiationNeeded => SessionEvent::NegotiationNeeded,
            EngineEvent::SignalingStateChange(state) => SessionEvent::SignalingStateChange(state),
            EngineEvent::Track(track) => SessionEvent::Track(track),
        };
        self.emit_local(event);
    }

    async fn on_inbound(&self, raw: serde_json::Value) {
        let envelope = match SignalingEnvelope::from_value(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!("Dropping undecodable signal for '{}': {}", self.local, e);
                return;
            }
        };
        if envelope.sender != self.remote || envelope.receiver != self.local {
            return;
        }
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let handled = match envelope.channel {
            SignalKind::RequestOffer => self.handle_request_offer().await,
            SignalKind::Offer => self.handle_offer(&envelope).await,
            SignalKind::Answer => self.handle_answer(&envelope).await,
            SignalKind::Candidate => self.handle_candidate(&envelope).await,
            SignalKind::PeerLeft => {
                info!("Peer '{}' left", self.remote);
                self.emit_inbound(SessionEvent::PeerLeft);
                Ok(())
            }
        };
        if let Err(e) = handled {
            self.emit_error(e);
        }
    }

    async fn handle_request_offer(&self) -> Result<()> {
        if self.is_closed().await {
            debug!("Ignoring request-offer from '{}': closed", self.remote);
            return Ok(());
        }
        self.send_offer().await
    }

    async fn handle_offer(&self, envelope: &SignalingEnvelope) -> Result<()> {
        if self.is_closed().await {
            debug!("Ignoring offer from '{}': closed", self.remote);
            return Ok(());
        }
        let offer = envelope.description()?;
        self.engine.set_remote_description(offer.clone()).await?;
        let answer = self.engine.create_answer().await?;
        self.engine.set_local_description(answer.clone()).await?;
        let answer = self.engine.local_description().await.unwrap_or(answer);

        let payload = serde_json::to_value(&answer)
            .map_err(|e| Error::SerializationError(format!("Failed to encode answer: {}", e)))?;
        self.signal(SignalKind::Answer, payload).await;
        self.emit_inbound(SessionEvent::ReceivedOffer { offer, answer });
        Ok(())
    }

    async fn handle_answer(&self, envelope: &SignalingEnvelope) -> Result<()> {
        let state = self.engine.signaling_state().await;
        if matches!(state, SignalingState::Closed | SignalingState::Stable) {
            debug!("Ignoring answer from '{}' in {:?}", self.remote, state);
            return Ok(());
        }
        let answer = envelope.description()?;
        self.engine.set_remote_description(answer.clone()).await?;
        self.emit_inbound(SessionEvent::ReceivedAnswer(answer));
        Ok(())
    }

    async fn handle_candidate(&self, envelope: &SignalingEnvelope) -> Result<()> {
        if self.is_closed().await {
            debug!("Ignoring candidate from '{}': closed", self.remote);
            return Ok(());
        }
        let candidate = envelope.candidate()?;
        self.engine.add_ice_candidate(candidate.clone()).await?;
        self.emit_inbound(SessionEvent::ReceivedCandidate(candidate));
        Ok(())
    }
}
