//! Typed session events and their dispatcher

use crate::engine::{
    IceCandidateErrorInfo, IceConnectionState, IceGatheringState, RemoteTrack, SignalingState,
};
use crate::envelope::{IceCandidate, SessionDescription};
use crate::Error;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Event raised by a peer session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    IceCandidate(IceCandidate),
    IceConnectionStateChange(IceConnectionState),
    IceCandidateError(IceCandidateErrorInfo),
    IceGatheringStateChange(IceGatheringState),
    NegotiationNeeded,
    SignalingStateChange(SignalingState),
    Track(RemoteTrack),
    RequestOffer,
    SentOffer(SessionDescription),
    ReceivedOffer {
        offer: SessionDescription,
        answer: SessionDescription,
    },
    ReceivedAnswer(SessionDescription),
    ReceivedCandidate(IceCandidate),
    Leave,
    PeerLeft,
    Error(Arc<Error>),
}

/// Discriminant of [`SessionEvent`], used as a subscription key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    IceCandidate,
    IceConnectionStateChange,
    IceCandidateError,
    IceGatheringStateChange,
    NegotiationNeeded,
    SignalingStateChange,
    Track,
    RequestOffer,
    SentOffer,
    ReceivedOffer,
    ReceivedAnswer,
    ReceivedCandidate,
    Leave,
    PeerLeft,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::IceCandidate => "icecandidate",
            EventKind::IceConnectionStateChange => "iceconnectionstatechange",
            EventKind::IceCandidateError => "icecandidateerror",
            EventKind::IceGatheringStateChange => "icegatheringstatechange",
            EventKind::NegotiationNeeded => "negotiationneeded",
            EventKind::SignalingStateChange => "signalingstatechange",
            EventKind::Track => "track",
            EventKind::RequestOffer => "request-offer",
            EventKind::SentOffer => "sent-offer",
            EventKind::ReceivedOffer => "received-offer",
            EventKind::ReceivedAnswer => "received-answer",
            EventKind::ReceivedCandidate => "received-candidate",
            EventKind::Leave => "leave",
            EventKind::PeerLeft => "peer-left",
            EventKind::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::IceCandidate(_) => EventKind::IceCandidate,
            SessionEvent::IceConnectionStateChange(_) => EventKind::IceConnectionStateChange,
            SessionEvent::IceCandidateError(_) => EventKind::IceCandidateError,
            SessionEvent::IceGatheringStateChange(_) => EventKind::IceGatheringStateChange,
            SessionEvent::NegotiationNeeded => EventKind::NegotiationNeeded,
            SessionEvent::SignalingStateChange(_) => EventKind::SignalingStateChange,
            SessionEvent::Track(_) => EventKind::Track,
            SessionEvent::RequestOffer => EventKind::RequestOffer,
            SessionEvent::SentOffer(_) => EventKind::SentOffer,
            SessionEvent::ReceivedOffer { .. } => EventKind::ReceivedOffer,
            SessionEvent::ReceivedAnswer(_) => EventKind::ReceivedAnswer,
            SessionEvent::ReceivedCandidate(_) => EventKind::ReceivedCandidate,
            SessionEvent::Leave => EventKind::Leave,
            SessionEvent::PeerLeft => EventKind::PeerLeft,
            SessionEvent::Error(_) => EventKind::Error,
        }
    }
}

/// An event tagged with the pair it concerns.
///
/// Events originating locally carry `sender` = local name; events caused by
/// an inbound envelope carry `sender` = the remote peer.
#[derive(Debug, Clone)]
pub struct SessionEventData {
    pub sender: String,
    pub receiver: String,
    pub event: SessionEvent,
}

impl SessionEventData {
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

pub type Listener = Arc<dyn Fn(&SessionEventData) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Listeners {
    by_kind: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
    any: Vec<(ListenerId, Listener)>,
}

/// Per-kind listener lists plus a secondary wildcard list
#[derive(Default)]
pub struct EventEmitter {
    listeners: Mutex<Listeners>,
    next_id: AtomicU64,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&SessionEventData) + Send + Sync + 'static,
    {
        let id = self.allocate();
        self.listeners
            .lock()
            .by_kind
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Receive every event regardless of kind
    pub fn on_any<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SessionEventData) + Send + Sync + 'static,
    {
        let id = self.allocate();
        self.listeners.lock().any.push((id, Arc::new(listener)));
        id
    }

    /// Remove one listener, typed or wildcard. Returns whether it existed.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.any.len()
            + listeners.by_kind.values().map(Vec::len).sum::<usize>();
        listeners.any.retain(|(existing, _)| *existing != id);
        for list in listeners.by_kind.values_mut() {
            list.retain(|(existing, _)| *existing != id);
        }
        let after = listeners.any.len()
            + listeners.by_kind.values().map(Vec::len).sum::<usize>();
        before != after
    }

    /// Remove every typed listener for `kind`
    pub fn off_kind(&self, kind: EventKind) {
        self.listeners.lock().by_kind.remove(&kind);
    }

    /// Stream of every event, ending when the emitter is cleared
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEventData> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on_any(move |data| {
            let _ = tx.send(data.clone());
        });
        rx
    }

    pub fn listener_count(&self) -> usize {
        let listeners = self.listeners.lock();
        listeners.any.len() + listeners.by_kind.values().map(Vec::len).sum::<usize>()
    }

    /// Deliver to typed listeners, then wildcard listeners.
    ///
    /// Lists are snapshotted first so listeners may subscribe or unsubscribe
    /// while being called.
    pub fn emit(&self, data: SessionEventData) {
        let (typed, any) = {
            let listeners = self.listeners.lock();
            (
                listeners
                    .by_kind
                    .get(&data.kind())
                    .cloned()
                    .unwrap_or_default(),
                listeners.any.clone(),
            )
        };
        for (_, listener) in typed.iter().chain(any.iter()) {
            listener(&data);
        }
    }

    pub fn clear(&self) {
        let mut listeners = self.listeners.lock();
        listeners.by_kind.clear();
        listeners.any.clear();
    }
}
