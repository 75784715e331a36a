//! Peer session integration tests
//!
//! Two or three windows on one loopback hub, each session backed by a
//! scripted engine so negotiation can be observed call by call.
//!
//! ```bash
//! cargo test -p window-rtc --test session_test -- --nocapture
//! ```

mod harness;

use std::sync::Arc;

use harness::{
    collect_for, count, init_logging, wait_for, TestHub, EVENT_TIMEOUT, QUIET_PERIOD,
};
use serde_json::json;
use window_rtc::engine::scripted::{EngineCall, ScriptedTrack};
use window_rtc::engine::IceConnectionState;
use window_rtc::envelope::{IceCandidate, SdpType, SessionDescription, SignalKind};
use window_rtc::Transport;
use window_rtc::{
    Endpoint, EngineEvent, Error, EventKind, MediaStream, MediaTrack, PeerSession, SessionEvent,
    SignalingEnvelope, SignalingState, WindowRtcConfig,
};

fn audio_stream(track: &Arc<ScriptedTrack>) -> MediaStream {
    MediaStream::new("stream", vec![track.clone() as Arc<dyn MediaTrack>])
}

fn host_candidate() -> IceCandidate {
    IceCandidate {
        candidate: "candidate:1 1 udp 2130706431 127.0.0.1 50000 typ host".to_string(),
        sdp_mid: Some("0".to_string()),
        sdp_m_line_index: Some(0),
        username_fragment: None,
    }
}

// ============================================================================
// Construction
// ============================================================================

#[tokio::test]
async fn test_session_requires_transport() {
    init_logging();
    let engines = window_rtc::engine::scripted::ScriptedEngineFactory::new();
    let endpoint = Endpoint::new(engines.clone(), WindowRtcConfig::default());

    assert!(matches!(
        PeerSession::with(&endpoint, "B").await,
        Err(Error::TransportNotConfigured)
    ));
    assert!(engines.engines().is_empty());
}

#[tokio::test]
async fn test_session_requires_registered_peer() {
    init_logging();
    let hub = TestHub::new();
    let a = hub.open("A").unwrap();

    assert!(matches!(
        PeerSession::with(&a.endpoint, "Ghost").await,
        Err(Error::PeerNotRegistered(ref name)) if name == "Ghost"
    ));
    assert!(a.engines.engines().is_empty());
}

#[tokio::test]
async fn test_session_requires_registered_self() {
    init_logging();
    let hub = TestHub::new();
    let _b = hub.open("B").unwrap();
    let outsider = hub.open_unregistered();

    assert!(matches!(
        PeerSession::with(&outsider.endpoint, "B").await,
        Err(Error::SelfNotRegistered)
    ));
    assert!(outsider.engines.engines().is_empty());
}

#[tokio::test]
async fn test_session_with_self_is_rejected() {
    init_logging();
    let hub = TestHub::new();
    let a = hub.open("A").unwrap();

    assert!(matches!(
        PeerSession::with(&a.endpoint, "A").await,
        Err(Error::InvalidName(_))
    ));
}

#[tokio::test]
async fn test_peer_name_is_trimmed() {
    init_logging();
    let hub = TestHub::new();
    let a = hub.open("A").unwrap();
    let _b = hub.open("B").unwrap();

    let (session, _engine) = a.session_with(" B ").await.unwrap();
    assert_eq!(session.local_name(), "A");
    assert_eq!(session.remote_name(), "B");
    session.dispose().await;
}

// ============================================================================
// Negotiation
// ============================================================================

#[tokio::test]
async fn test_add_stream_negotiates_with_peer() {
    init_logging();
    let hub = TestHub::new();
    let a = hub.open("A").unwrap();
    let b = hub.open("B").unwrap();
    let (a_session, a_engine) = a.session_with("B").await.unwrap();
    let (b_session, b_engine) = b.session_with("A").await.unwrap();
    let mut a_events = a_session.subscribe();
    let mut b_events = b_session.subscribe();

    let track = ScriptedTrack::audio("mic");
    a_session.add_stream(&audio_stream(&track)).await.unwrap();

    let sent = wait_for(&mut a_events, EventKind::SentOffer, EVENT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!((sent.sender.as_str(), sent.receiver.as_str()), ("A", "B"));

    let received = wait_for(&mut b_events, EventKind::ReceivedOffer, EVENT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(
        (received.sender.as_str(), received.receiver.as_str()),
        ("A", "B")
    );
    let SessionEvent::ReceivedOffer { offer, answer } = received.event else {
        panic!("expected received-offer payload");
    };
    assert_eq!(offer.sdp_type, SdpType::Offer);
    assert!(offer.sdp.contains("a=msid:mic"));
    assert_eq!(answer.sdp_type, SdpType::Answer);

    let answered = wait_for(&mut a_events, EventKind::ReceivedAnswer, EVENT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(
        (answered.sender.as_str(), answered.receiver.as_str()),
        ("B", "A")
    );

    assert_eq!(a_engine.state(), SignalingState::Stable);
    assert_eq!(b_engine.state(), SignalingState::Stable);
    assert_eq!(a_engine.remote(), Some(answer));
    assert_eq!(
        b_engine.calls(),
        vec![
            EngineCall::SetRemoteDescription(SdpType::Offer),
            EngineCall::CreateAnswer,
            EngineCall::SetLocalDescription(SdpType::Answer),
        ]
    );

    a_session.dispose().await;
    b_session.dispose().await;
}

#[tokio::test]
async fn test_request_offer_makes_peer_offer() {
    init_logging();
    let hub = TestHub::new();
    let a = hub.open("A").unwrap();
    let b = hub.open("B").unwrap();
    let (a_session, a_engine) = a.session_with("B").await.unwrap();
    let (b_session, b_engine) = b.session_with("A").await.unwrap();
    let mut a_events = a_session.subscribe();
    let mut b_events = b_session.subscribe();

    b_session.request_offer().await.unwrap();

    let requested = wait_for(&mut b_events, EventKind::RequestOffer, EVENT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(requested.sender, "B");
    wait_for(&mut a_events, EventKind::SentOffer, EVENT_TIMEOUT)
        .await
        .unwrap();
    wait_for(&mut b_events, EventKind::ReceivedOffer, EVENT_TIMEOUT)
        .await
        .unwrap();
    wait_for(&mut a_events, EventKind::ReceivedAnswer, EVENT_TIMEOUT)
        .await
        .unwrap();

    assert_eq!(a_engine.state(), SignalingState::Stable);
    assert_eq!(b_engine.state(), SignalingState::Stable);

    a_session.dispose().await;
    b_session.dispose().await;
}

#[tokio::test]
async fn test_both_directions_share_one_state_machine() {
    init_logging();
    let hub = TestHub::new();
    let a = hub.open("A").unwrap();
    let b = hub.open("B").unwrap();
    let (a_session, _a_engine) = a.session_with("B").await.unwrap();
    let (b_session, _b_engine) = b.session_with("A").await.unwrap();
    let mut a_events = a_session.subscribe();
    let mut b_events = b_session.subscribe();

    let a_track = ScriptedTrack::audio("a-mic");
    a_session.add_stream(&audio_stream(&a_track)).await.unwrap();
    wait_for(&mut a_events, EventKind::ReceivedAnswer, EVENT_TIMEOUT)
        .await
        .unwrap();

    let b_track = ScriptedTrack::audio("b-mic");
    b_session.add_stream(&audio_stream(&b_track)).await.unwrap();
    let received = wait_for(&mut a_events, EventKind::ReceivedOffer, EVENT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(received.sender, "B");
    let answered = wait_for(&mut b_events, EventKind::ReceivedAnswer, EVENT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(answered.sender, "A");

    a_session.dispose().await;
    b_session.dispose().await;
}

#[tokio::test]
async fn test_duplicate_answer_is_applied_once() {
    init_logging();
    let hub = TestHub::new();
    let a = hub.open("A").unwrap();
    let b = hub.open("B").unwrap();
    let (a_session, a_engine) = a.session_with("B").await.unwrap();
    let mut a_events = a_session.subscribe();

    a_session
        .add_stream(&audio_stream(&ScriptedTrack::audio("mic")))
        .await
        .unwrap();
    assert_eq!(a_engine.state(), SignalingState::HaveLocalOffer);

    let answer = serde_json::to_value(SessionDescription::answer("v=0 answer")).unwrap();
    let envelope = SignalingEnvelope::new(SignalKind::Answer, "B", "A", answer);
    let client = b.client();
    assert!(client.signal(&envelope).await.unwrap().is_none());
    assert!(client.signal(&envelope).await.unwrap().is_none());

    let seen = collect_for(&mut a_events, QUIET_PERIOD).await;
    assert_eq!(count(&seen, EventKind::ReceivedAnswer), 1);
    assert_eq!(count(&seen, EventKind::Error), 0);
    assert_eq!(a_engine.state(), SignalingState::Stable);
    let remote_sets = a_engine
        .calls()
        .into_iter()
        .filter(|call| matches!(call, EngineCall::SetRemoteDescription(_)))
        .count();
    assert_eq!(remote_sets, 1);

    a_session.dispose().await;
}

#[tokio::test]
async fn test_envelopes_from_other_windows_are_ignored() {
    init_logging();
    let hub = TestHub::new();
    let a = hub.open("A").unwrap();
    let _b = hub.open("B").unwrap();
    let c = hub.open("C").unwrap();
    let (a_session, a_engine) = a.session_with("B").await.unwrap();
    let mut a_events = a_session.subscribe();

    let offer = serde_json::to_value(SessionDescription::offer("v=0 from C")).unwrap();
    let client = c.client();
    for envelope in [
        SignalingEnvelope::new(SignalKind::Offer, "C", "A", offer),
        SignalingEnvelope::new(SignalKind::RequestOffer, "C", "A", json!(null)),
        SignalingEnvelope::peer_left("C", "A"),
    ] {
        assert!(client.signal(&envelope).await.unwrap().is_none());
    }

    assert!(collect_for(&mut a_events, QUIET_PERIOD).await.is_empty());
    assert_eq!(a_engine.call_count(), 0);
    assert_eq!(a_engine.state(), SignalingState::Stable);

    a_session.dispose().await;
}

#[tokio::test]
async fn test_malformed_offer_becomes_error_event() {
    init_logging();
    let hub = TestHub::new();
    let a = hub.open("A").unwrap();
    let b = hub.open("B").unwrap();
    let (a_session, _a_engine) = a.session_with("B").await.unwrap();
    let mut a_events = a_session.subscribe();

    let envelope = SignalingEnvelope::new(SignalKind::Offer, "B", "A", json!({"sdp": 42}));
    b.client().signal(&envelope).await.unwrap();

    let failed = wait_for(&mut a_events, EventKind::Error, EVENT_TIMEOUT)
        .await
        .unwrap();
    let SessionEvent::Error(err) = failed.event else {
        panic!("expected error payload");
    };
    assert!(matches!(*err, Error::SdpError(_)));
    assert!(!a_session.is_disposed());

    a_session.dispose().await;
}

// ============================================================================
// ICE
// ============================================================================

#[tokio::test]
async fn test_local_candidate_is_forwarded() {
    init_logging();
    let hub = TestHub::new();
    let a = hub.open("A").unwrap();
    let b = hub.open("B").unwrap();
    let (a_session, a_engine) = a.session_with("B").await.unwrap();
    let (b_session, b_engine) = b.session_with("A").await.unwrap();
    let mut a_events = a_session.subscribe();
    let mut b_events = b_session.subscribe();

    a_session
        .add_stream(&audio_stream(&ScriptedTrack::audio("mic")))
        .await
        .unwrap();
    wait_for(&mut a_events, EventKind::ReceivedAnswer, EVENT_TIMEOUT)
        .await
        .unwrap();

    a_engine.inject(EngineEvent::IceCandidate(host_candidate()));

    let local = wait_for(&mut a_events, EventKind::IceCandidate, EVENT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(local.sender, "A");
    let remote = wait_for(&mut b_events, EventKind::ReceivedCandidate, EVENT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(remote.sender, "A");
    assert_eq!(b_engine.candidates(), vec![host_candidate()]);

    a_session.dispose().await;
    b_session.dispose().await;
}

#[tokio::test]
async fn test_candidate_before_remote_description_is_an_error_event() {
    init_logging();
    let hub = TestHub::new();
    let a = hub.open("A").unwrap();
    let b = hub.open("B").unwrap();
    let (a_session, a_engine) = a.session_with("B").await.unwrap();
    let (b_session, b_engine) = b.session_with("A").await.unwrap();
    let mut b_events = b_session.subscribe();

    a_engine.inject(EngineEvent::IceCandidate(host_candidate()));

    let failed = wait_for(&mut b_events, EventKind::Error, EVENT_TIMEOUT)
        .await
        .unwrap();
    let SessionEvent::Error(err) = failed.event else {
        panic!("expected error payload");
    };
    assert!(matches!(*err, Error::IceCandidateError(_)));
    assert!(b_engine.candidates().is_empty());

    a_session.dispose().await;
    b_session.dispose().await;
}

#[tokio::test]
async fn test_failed_ice_triggers_restart() {
    init_logging();
    let hub = TestHub::new();
    let a = hub.open("A").unwrap();
    let b = hub.open("B").unwrap();
    let (a_session, a_engine) = a.session_with("B").await.unwrap();
    let mut a_events = a_session.subscribe();
    let mut b_signals = b.transport.subscribe(window_rtc::Channel::Signal);

    a_engine.inject(EngineEvent::IceConnectionStateChange(IceConnectionState::Failed));

    let changed = wait_for(&mut a_events, EventKind::IceConnectionStateChange, EVENT_TIMEOUT)
        .await
        .unwrap();
    assert!(matches!(
        changed.event,
        SessionEvent::IceConnectionStateChange(IceConnectionState::Failed)
    ));
    wait_for(&mut a_events, EventKind::NegotiationNeeded, EVENT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(a_engine.calls(), vec![EngineCall::RestartIce]);
    assert!(a_engine.ice_restart_pending());

    // The restart itself sends nothing through the relay
    assert!(harness::drain_pushes(&mut b_signals.rx, QUIET_PERIOD)
        .await
        .is_empty());

    a_session.dispose().await;
}

#[tokio::test]
async fn test_healthy_ice_states_do_not_restart() {
    init_logging();
    let hub = TestHub::new();
    let a = hub.open("A").unwrap();
    let _b = hub.open("B").unwrap();
    let (a_session, a_engine) = a.session_with("B").await.unwrap();
    let mut a_events = a_session.subscribe();

    for state in [
        IceConnectionState::Checking,
        IceConnectionState::Connected,
        IceConnectionState::Completed,
    ] {
        a_engine.inject(EngineEvent::IceConnectionStateChange(state));
    }

    let seen = collect_for(&mut a_events, QUIET_PERIOD).await;
    assert_eq!(count(&seen, EventKind::IceConnectionStateChange), 3);
    assert!(!a_engine.calls().contains(&EngineCall::RestartIce));

    a_session.dispose().await;
}

#[tokio::test]
async fn test_restart_offer_carries_restart_flag() {
    init_logging();
    let hub = TestHub::new();
    let a = hub.open("A").unwrap();
    let b = hub.open("B").unwrap();
    let (a_session, a_engine) = a.session_with("B").await.unwrap();
    let (b_session, _b_engine) = b.session_with("A").await.unwrap();
    let mut a_events = a_session.subscribe();
    let mut b_events = b_session.subscribe();

    a_engine.inject(EngineEvent::IceConnectionStateChange(
        IceConnectionState::Disconnected,
    ));
    wait_for(&mut a_events, EventKind::NegotiationNeeded, EVENT_TIMEOUT)
        .await
        .unwrap();

    b_session.request_offer().await.unwrap();
    let received = wait_for(&mut b_events, EventKind::ReceivedOffer, EVENT_TIMEOUT)
        .await
        .unwrap();
    let SessionEvent::ReceivedOffer { offer, .. } = received.event else {
        panic!("expected received-offer payload");
    };
    assert!(offer.sdp.contains("ice-options:restart"));
    assert!(a_engine
        .calls()
        .contains(&EngineCall::CreateOffer { ice_restart: true }));

    a_session.dispose().await;
    b_session.dispose().await;
}

// ============================================================================
// Departure and disposal
// ============================================================================

#[tokio::test]
async fn test_dispose_notifies_peer_exactly_once() {
    init_logging();
    let hub = TestHub::new();
    let a = hub.open("A").unwrap();
    let b = hub.open("B").unwrap();
    let (a_session, a_engine) = a.session_with("B").await.unwrap();
    let (b_session, b_engine) = b.session_with("A").await.unwrap();
    let mut a_events = a_session.subscribe();
    let mut b_events = b_session.subscribe();

    let track = ScriptedTrack::audio("mic");
    a_session.add_stream(&audio_stream(&track)).await.unwrap();
    wait_for(&mut a_events, EventKind::ReceivedAnswer, EVENT_TIMEOUT)
        .await
        .unwrap();

    a_session.dispose().await;
    a_session.dispose().await;
    assert!(a_session.is_disposed());

    let seen = collect_for(&mut b_events, QUIET_PERIOD).await;
    assert_eq!(count(&seen, EventKind::PeerLeft), 1);
    let left = seen
        .iter()
        .find(|data| data.kind() == EventKind::PeerLeft)
        .unwrap();
    assert_eq!((left.sender.as_str(), left.receiver.as_str()), ("A", "B"));

    // Local side: leave, then the stream ends once listeners are cleared
    let local = collect_for(&mut a_events, QUIET_PERIOD).await;
    assert_eq!(count(&local, EventKind::Leave), 1);
    assert_eq!(a_session.events().listener_count(), 0);

    assert!(!track.enabled());
    assert_eq!(a_engine.state(), SignalingState::Closed);
    let calls = a_engine.calls();
    assert!(calls.contains(&EngineCall::RemoveTrack));
    assert_eq!(&calls[calls.len() - 2..], &[EngineCall::Detach, EngineCall::Close]);

    // Inbound peer-left leaves the peer's engine alone
    assert_ne!(b_engine.state(), SignalingState::Closed);
    assert!(!b_session.is_disposed());

    b_session.dispose().await;
}

#[tokio::test]
async fn test_disposed_session_ignores_traffic() {
    init_logging();
    let hub = TestHub::new();
    let a = hub.open("A").unwrap();
    let b = hub.open("B").unwrap();
    let (a_session, a_engine) = a.session_with("B").await.unwrap();

    a_session.dispose().await;
    let settled = a_engine.call_count();

    let client = b.client();
    let offer = serde_json::to_value(SessionDescription::offer("v=0 late")).unwrap();
    let candidate = serde_json::to_value(host_candidate()).unwrap();
    for envelope in [
        SignalingEnvelope::new(SignalKind::Offer, "B", "A", offer),
        SignalingEnvelope::new(SignalKind::Candidate, "B", "A", candidate),
        SignalingEnvelope::new(SignalKind::RequestOffer, "B", "A", json!(null)),
    ] {
        client.signal(&envelope).await.unwrap();
    }
    a_engine.inject(EngineEvent::IceConnectionStateChange(IceConnectionState::Failed));
    tokio::time::sleep(QUIET_PERIOD).await;

    assert_eq!(a_engine.call_count(), settled);
    assert!(matches!(
        a_session
            .add_stream(&audio_stream(&ScriptedTrack::audio("late")))
            .await,
        Err(Error::SessionDisposed(_))
    ));
    assert!(matches!(
        a_session.request_offer().await,
        Err(Error::SessionDisposed(_))
    ));
}

#[tokio::test]
async fn test_window_close_reports_peer_left() {
    init_logging();
    let hub = TestHub::new();
    let a = hub.open("A").unwrap();
    let b = hub.open("B").unwrap();
    let (a_session, a_engine) = a.session_with("B").await.unwrap();
    let (_b_session, _b_engine) = b.session_with("A").await.unwrap();
    let mut a_events = a_session.subscribe();

    a_session
        .add_stream(&audio_stream(&ScriptedTrack::audio("mic")))
        .await
        .unwrap();
    wait_for(&mut a_events, EventKind::ReceivedAnswer, EVENT_TIMEOUT)
        .await
        .unwrap();

    b.close();

    let left = wait_for(&mut a_events, EventKind::PeerLeft, EVENT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!((left.sender.as_str(), left.receiver.as_str()), ("B", "A"));
    assert_eq!(hub.hub.registry().list_names(), vec!["A".to_string()]);
    assert_eq!(a_engine.state(), SignalingState::Stable);
    assert!(!a_session.is_disposed());

    a_session.dispose().await;
}

#[tokio::test]
async fn test_signal_to_departed_peer_becomes_error_event() {
    init_logging();
    let hub = TestHub::new();
    let a = hub.open("A").unwrap();
    let b = hub.open("B").unwrap();
    let (a_session, _a_engine) = a.session_with("B").await.unwrap();
    let mut a_events = a_session.subscribe();

    b.close();
    wait_for(&mut a_events, EventKind::PeerLeft, EVENT_TIMEOUT)
        .await
        .unwrap();

    a_session.request_offer().await.unwrap();

    let failed = wait_for(&mut a_events, EventKind::Error, EVENT_TIMEOUT)
        .await
        .unwrap();
    let SessionEvent::Error(err) = failed.event else {
        panic!("expected error payload");
    };
    assert!(matches!(*err, Error::ReceiverNotFound(ref name) if name == "B"));

    a_session.dispose().await;
}

#[tokio::test]
async fn test_dropped_session_closes_engine() {
    init_logging();
    let hub = TestHub::new();
    let a = hub.open("A").unwrap();
    let _b = hub.open("B").unwrap();
    let (a_session, a_engine) = a.session_with("B").await.unwrap();

    drop(a_session);
    tokio::time::sleep(QUIET_PERIOD).await;

    assert_eq!(a_engine.state(), SignalingState::Closed);
    assert!(a_engine.calls().contains(&EngineCall::Detach));
}
