//! Signaling envelope and payload types

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of signaling message carried by an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    /// Ask the peer to start a negotiation
    RequestOffer,
    /// SDP offer
    Offer,
    /// SDP answer
    Answer,
    /// Trickled ICE candidate
    Candidate,
    /// Sender is going away
    PeerLeft,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::RequestOffer => "request-offer",
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
            SignalKind::PeerLeft => "peer-left",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Addressed signaling message routed by the relay.
///
/// The relay never inspects `payload`; the receiving session validates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingEnvelope {
    pub channel: SignalKind,
    pub sender: String,
    pub receiver: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl SignalingEnvelope {
    pub fn new(
        channel: SignalKind,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            channel,
            sender: sender.into(),
            receiver: receiver.into(),
            payload,
        }
    }

    /// Departure notice with an empty payload
    pub fn peer_left(sender: impl Into<String>, receiver: impl Into<String>) -> Self {
        Self::new(
            SignalKind::PeerLeft,
            sender,
            receiver,
            serde_json::Value::Null,
        )
    }

    /// Decode the payload as a session description
    pub fn description(&self) -> Result<SessionDescription> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            Error::SdpError(format!(
                "Invalid {} payload from '{}': {}",
                self.channel, self.sender, e
            ))
        })
    }

    /// Decode the payload as an ICE candidate
    pub fn candidate(&self) -> Result<IceCandidate> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            Error::IceCandidateError(format!(
                "Invalid candidate payload from '{}': {}",
                self.sender, e
            ))
        })
    }

    pub fn to_value(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize envelope: {}", e))
        })
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| {
            Error::SerializationError(format!("Failed to deserialize envelope: {}", e))
        })
    }
}

/// SDP type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Session description as exchanged over the relay (`{type, sdp}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in its browser JSON form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}
