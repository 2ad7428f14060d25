//! JSON text frames exchanged between the gateway client and the server.

use serde::{Deserialize, Serialize};

use crate::api::{QueueOp, QueueReply};
use crate::id::{EventId, ParticipantId, RoomId};

/// Frames a client sends. `Hello` must come first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Hello {
        participant_id: ParticipantId,
        display_name: String,
    },

    /// A queue API call, answered by a `Response` carrying the same id.
    Request { id: String, op: QueueOp },

    SubscribeQueue { event_id: EventId },

    UnsubscribeQueue { event_id: EventId },

    JoinChannel {
        channel: String,
        /// Receive your own broadcasts on this channel.
        #[serde(default)]
        self_send: bool,
    },

    LeaveChannel { channel: String },

    Broadcast {
        channel: String,
        payload: serde_json::Value,
    },

    Heartbeat,
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Welcome { participant_id: ParticipantId },

    Response {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<QueueReply>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// The receiving participant's queue entry for `event_id` changed.
    QueueChanged {
        event_id: EventId,
        is_matched: bool,
        current_room_id: Option<RoomId>,
    },

    Broadcast {
        channel: String,
        payload: serde_json::Value,
    },

    Error { message: String },
}

impl ServerFrame {
    pub fn ok(id: impl Into<String>, body: QueueReply) -> Self {
        Self::Response {
            id: id.into(),
            ok: true,
            body: Some(body),
            error: None,
        }
    }

    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Response {
            id: id.into(),
            ok: false,
            body: None,
            error: Some(error.into()),
        }
    }
}
