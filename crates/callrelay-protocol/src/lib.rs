//! # Callrelay Protocol
//!
//! Wire protocol for the call rendezvous server.
//!
//! This crate defines the JSON frames exchanged between a client and the
//! server over a single persistent connection: the client-to-server
//! [`ClientMessage`] variants (`join`, `invite`, `ring-ack`, ...) and the
//! server-to-client [`ServerMessage`] variants (`room-state`, `ring`,
//! `start`, ...). `sdp` and `candidate` payloads are carried as
//! [`serde_json::Value`] so the server never has to parse them to relay
//! them.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier for a single call attempt, generated by the server on
/// `invite` and otherwise meaningless to either party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub Uuid);

impl CallId {
    /// Generate a fresh, unique call identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role assigned to each participant once a call reaches `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Callee,
}

/// Reason a call ended, reported in the `end` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Declined,
    Hangup,
    Timeout,
    Left,
}

/// Reason an `invite` was refused, reported in the `busy` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BusyReason {
    CallActive,
    NoPeer,
}

/// A frame sent by a client. Dispatch happens on the `type` tag; frames
/// with an unrecognized tag fail to deserialize, which the caller turns
/// into an `error{"unknown message type"}` reply rather than a silent
/// drop (silent drop is reserved for frames that aren't JSON objects at
/// all, or that exceed [`MAX_FRAME_BYTES`]).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Join {
        room: String,
        #[serde(default)]
        name: Option<String>,
    },
    Invite,
    RingAck {
        call_id: CallId,
    },
    Accept {
        call_id: CallId,
    },
    Decline {
        call_id: CallId,
    },
    Hangup {
        call_id: CallId,
    },
    Offer {
        call_id: CallId,
        sdp: serde_json::Value,
    },
    Answer {
        call_id: CallId,
        sdp: serde_json::Value,
    },
    Ice {
        call_id: CallId,
        candidate: serde_json::Value,
    },
    LeaveRoom,
}

/// A frame sent by the server to a single client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    RoomState { room: String, peers: Vec<String> },
    PeerJoined { name: String },
    PeerLeft { name: String },
    InviteOk { call_id: CallId },
    Ring { call_id: CallId, from: String },
    Ringing { call_id: CallId },
    Start { call_id: CallId, role: Role },
    End { call_id: CallId, reason: EndReason },
    Busy { reason: BusyReason },
    Error { msg: String },
    Left,
    Offer { call_id: CallId, sdp: serde_json::Value },
    Answer { call_id: CallId, sdp: serde_json::Value },
    Ice { call_id: CallId, candidate: serde_json::Value },
}

impl ServerMessage {
    /// Convenience constructor for the `error` frame.
    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error { msg: msg.into() }
    }
}

/// Maximum size of a single inbound frame, per spec.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_parses_with_defaulted_name() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"join","room":"r1"}"#).unwrap();
        match msg {
            ClientMessage::Join { room, name } => {
                assert_eq!(room, "r1");
                assert_eq!(name, None);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn ring_ack_requires_call_id() {
        let result: Result<ClientMessage, _> =
            serde_json::from_str(r#"{"type":"ring-ack"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let result: Result<ClientMessage, _> = serde_json::from_str(r#"{"type":"wat"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn server_frames_serialize_with_flat_type_tag() {
        let frame = ServerMessage::Busy {
            reason: BusyReason::NoPeer,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"type":"busy","reason":"no-peer"}"#);
    }

    #[test]
    fn offer_payload_round_trips_byte_equal() {
        let sdp = serde_json::json!({"sdp": "v=0...", "nested": [1, 2, 3]});
        let frame = ServerMessage::Offer {
            call_id: CallId::new(),
            sdp: sdp.clone(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["sdp"], sdp);
    }
}
