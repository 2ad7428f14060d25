//! Signaling payloads exchanged on a room channel.
//!
//! Every message on the wire is `{type, data, from}`. `data` carries a
//! session description for `offer`/`answer` and a candidate for
//! `ice-candidate`, shaped like the browser's `RTCSessionDescriptionInit` and
//! `RTCIceCandidateInit` so either end can be a browser.

use serde::{Deserialize, Serialize};
use spark_common::{ParticipantId, RoomId, SessionError};

/// Channel name for a room's signaling traffic.
pub fn channel_for_room(room_id: &RoomId) -> String {
    room_id.channel_name()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Decoded body of a [`SignalingMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
}

/// One message on a room channel. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingMessage {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub data: serde_json::Value,
    pub from: ParticipantId,
}

impl SignalingMessage {
    pub fn new(from: &ParticipantId, signal: &Signal) -> Result<Self, SessionError> {
        let (kind, data) = match signal {
            Signal::Offer(desc) => (SignalKind::Offer, serde_json::to_value(desc)),
            Signal::Answer(desc) => (SignalKind::Answer, serde_json::to_value(desc)),
            Signal::IceCandidate(c) => (SignalKind::IceCandidate, serde_json::to_value(c)),
        };
        let data = data.map_err(|e| SessionError::SignalingFailure(e.to_string()))?;
        Ok(Self {
            kind,
            data,
            from: from.clone(),
        })
    }

    /// Decode `data` according to `type`.
    pub fn signal(&self) -> Result<Signal, SessionError> {
        let malformed = |e: serde_json::Error| {
            SessionError::SignalingFailure(format!("malformed {:?} from {}: {e}", self.kind, self.from))
        };
        Ok(match self.kind {
            SignalKind::Offer => Signal::Offer(serde_json::from_value(self.data.clone()).map_err(malformed)?),
            SignalKind::Answer => Signal::Answer(serde_json::from_value(self.data.clone()).map_err(malformed)?),
            SignalKind::IceCandidate => {
                Signal::IceCandidate(serde_json::from_value(self.data.clone()).map_err(malformed)?)
            }
        })
    }

    pub fn is_from(&self, participant: &ParticipantId) -> bool {
        &self.from == participant
    }
}
