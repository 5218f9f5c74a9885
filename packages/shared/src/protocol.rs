//! Typed wire protocol for the signaling channel.
//!
//! Every message on the wire is a JSON object with a `type` tag. The envelope
//! is modeled as a closed enum so that routing logic never branches on
//! untyped fields; the loose JSON form exists only at the serialization edge.
//! Unknown tags deserialize into [`SignalMessage::Unknown`] so that newer
//! peers cannot crash an older relay.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on a chat message body, in characters.
pub const MAX_CHAT_BODY_LEN: usize = 2000;

/// A session description exchanged during offer/answer negotiation.
///
/// Opaque to the signaling layer; only the negotiating peers interpret the
/// SDP body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescription {
    /// "offer" or "answer"
    pub sdp_type: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: "offer".to_string(),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: "answer".to_string(),
            sdp: sdp.into(),
        }
    }
}

/// A connectivity-path descriptor relayed between negotiating peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u32>,
}

/// One entry of a room-state membership snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub user_id: String,
    pub user_name: String,
}

/// Kind of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Text,
    System,
}

/// An ephemeral chat message relayed over the signaling channel.
///
/// Never persisted anywhere; lives only in client-side message lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender_id: String,
    pub sender_name: String,
    pub body: String,
    pub timestamp: i64,
    pub kind: ChatKind,
}

/// The signaling envelope, one variant per wire `type` value.
///
/// Fields that are stamped on by the server during relay (`userId`,
/// `userName`, `timestamp` on the targeted kinds) are optional and omitted
/// from the JSON when absent, matching the client→server direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Handshake acknowledgement sent to a participant after it joins.
    #[serde(rename_all = "camelCase")]
    Connected {
        room_id: String,
        user_id: String,
        timestamp: i64,
    },

    /// Full membership snapshot sent privately to a new participant.
    #[serde(rename_all = "camelCase")]
    RoomState {
        participants: Vec<ParticipantInfo>,
        timestamp: i64,
    },

    /// Presence notice broadcast to everyone except the joiner.
    #[serde(rename_all = "camelCase")]
    UserJoined {
        user_id: String,
        user_name: String,
        timestamp: i64,
    },

    /// Presence notice broadcast to the remaining members.
    #[serde(rename_all = "camelCase")]
    UserLeft { user_id: String, timestamp: i64 },

    /// Session-description offer, relayed to `target_user_id`.
    #[serde(rename_all = "camelCase")]
    Offer {
        target_user_id: String,
        offer: SessionDescription,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    /// Session-description answer, relayed to `target_user_id`.
    #[serde(rename_all = "camelCase")]
    Answer {
        target_user_id: String,
        answer: SessionDescription,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    /// ICE candidate, relayed to `target_user_id`.
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        target_user_id: String,
        candidate: IceCandidate,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    /// Chat payload, broadcast to the other room members.
    #[serde(rename = "chat-message", rename_all = "camelCase")]
    Chat {
        message_data: ChatMessage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },

    /// Liveness probe, answered directly by the server.
    #[serde(rename_all = "camelCase")]
    Ping { timestamp: i64 },

    /// Liveness probe response.
    #[serde(rename_all = "camelCase")]
    Pong { timestamp: i64 },

    /// Malformed input or delivery failure, reported back to the sender.
    #[serde(rename_all = "camelCase")]
    Error { message: String, timestamp: i64 },

    /// Any tag this version does not know. Logged and ignored.
    #[serde(other)]
    Unknown,
}

impl SignalMessage {
    /// Return the relay target of this message, if it carries one.
    pub fn target_user_id(&self) -> Option<&str> {
        match self {
            SignalMessage::Offer { target_user_id, .. }
            | SignalMessage::Answer { target_user_id, .. }
            | SignalMessage::IceCandidate { target_user_id, .. } => Some(target_user_id),
            _ => None,
        }
    }

    /// Stable name of this message kind, for logging.
    pub fn kind_str(&self) -> &'static str {
        match self {
            SignalMessage::Connected { .. } => "connected",
            SignalMessage::RoomState { .. } => "room-state",
            SignalMessage::UserJoined { .. } => "user-joined",
            SignalMessage::UserLeft { .. } => "user-left",
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::IceCandidate { .. } => "ice-candidate",
            SignalMessage::Chat { .. } => "chat-message",
            SignalMessage::Ping { .. } => "ping",
            SignalMessage::Pong { .. } => "pong",
            SignalMessage::Error { .. } => "error",
            SignalMessage::Unknown => "unknown",
        }
    }

    /// Stamp sender identity and a fresh timestamp onto a relayed message.
    ///
    /// Only the relayed kinds carry stamp fields; other kinds are unchanged.
    pub fn stamp_sender(&mut self, sender_id: &str, sender_name: &str, now: i64) {
        match self {
            SignalMessage::Offer {
                user_id,
                user_name,
                timestamp,
                ..
            }
            | SignalMessage::Answer {
                user_id,
                user_name,
                timestamp,
                ..
            }
            | SignalMessage::IceCandidate {
                user_id,
                user_name,
                timestamp,
                ..
            }
            | SignalMessage::Chat {
                user_id,
                user_name,
                timestamp,
                ..
            } => {
                *user_id = Some(sender_id.to_string());
                *user_name = Some(sender_name.to_string());
                *timestamp = Some(now);
            }
            _ => {}
        }
    }
}
