//! Typed signaling messages, split by direction.
//!
//! Relayed handshake messages (`SessionOffer`, `SessionAnswer`,
//! `NetworkCandidate`) carry a `target` session id on the way up and a
//! `from` session id on the way down; the relay rewrites the addressing
//! and never inspects the payload.

use crate::types::{
    CandidateBlob, ChatPayload, MediaState, Participant, ParticipantId, SessionDescription,
    SessionId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client-to-relay messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Request room entry.
    Join {
        display_name: String,
        participant_id: ParticipantId,
    },

    /// Best-effort leave notice before disconnecting.
    Leave,

    /// Advertise updated local media flags.
    MediaStateChanged {
        media_state: MediaState,
        /// Sender-stamped time, used for last-write-wins on reorder.
        sent_at: DateTime<Utc>,
    },

    /// Handshake offer for one remote session.
    SessionOffer {
        target: SessionId,
        description: SessionDescription,
    },

    /// Handshake answer for one remote session.
    SessionAnswer {
        target: SessionId,
        description: SessionDescription,
    },

    /// Network-path candidate for one remote session.
    NetworkCandidate {
        target: SessionId,
        candidate: CandidateBlob,
    },

    /// Text chat, relayed verbatim to the whole room.
    Chat { text: String },

    /// Typing presence hint.
    Typing { typing: bool },
}

/// Relay-to-client messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join accepted: assigned session id plus a snapshot of everyone
    /// already in the room (the local participant is not included).
    Welcome {
        session_id: SessionId,
        roster: Vec<Participant>,
    },

    /// Join refused (capacity, duplicate identity). Terminal for this
    /// connection; the relay closes after sending it.
    JoinRejected { reason: String },

    /// Full-roster consistency resync.
    RosterUpdate { roster: Vec<Participant> },

    /// Incremental add.
    ParticipantJoined { participant: Participant },

    /// Incremental remove.
    ParticipantLeft { session_id: SessionId },

    /// A remote participant's media flags changed.
    MediaStateChanged {
        session_id: SessionId,
        media_state: MediaState,
        sent_at: DateTime<Utc>,
    },

    /// Relayed handshake offer.
    SessionOffer {
        from: SessionId,
        description: SessionDescription,
    },

    /// Relayed handshake answer.
    SessionAnswer {
        from: SessionId,
        description: SessionDescription,
    },

    /// Relayed network-path candidate.
    NetworkCandidate {
        from: SessionId,
        candidate: CandidateBlob,
    },

    /// Room-wide chat delivery (includes the sender's own messages).
    Chat(ChatPayload),

    /// Server-originated notice.
    SystemMessage {
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// Typing presence hint from a remote participant.
    Typing { session_id: SessionId, typing: bool },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_tagging() {
        let msg = ClientMessage::Join {
            display_name: "Alice".to_string(),
            participant_id: ParticipantId::from("p1"),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "join");
        assert_eq!(json["display_name"], "Alice");
    }

    #[test]
    fn test_offer_addressing_fields() {
        let up = ClientMessage::SessionOffer {
            target: SessionId::from("s-remote"),
            description: SessionDescription("blob".to_string()),
        };
        let json = serde_json::to_value(&up).unwrap();
        assert_eq!(json["kind"], "session_offer");
        assert_eq!(json["target"], "s-remote");

        let down = ServerMessage::SessionOffer {
            from: SessionId::from("s-sender"),
            description: SessionDescription("blob".to_string()),
        };
        let json = serde_json::to_value(&down).unwrap();
        assert_eq!(json["from"], "s-sender");
    }

    #[test]
    fn test_server_message_roundtrip() {
        let msg = ServerMessage::Welcome {
            session_id: SessionId::from("s1"),
            roster: vec![Participant {
                participant_id: ParticipantId::from("p2"),
                session_id: SessionId::from("s2"),
                display_name: "Bob".to_string(),
                media_state: MediaState::default(),
            }],
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let result: Result<ServerMessage, _> =
            serde_json::from_str(r#"{"kind":"no_such_message"}"#);
        assert!(result.is_err());
    }
}
