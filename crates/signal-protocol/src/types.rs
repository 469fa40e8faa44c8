//! Shared identity and media-state types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, client-chosen participant identifier.
///
/// Survives reconnects; the relay never reassigns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Transport-assigned session identifier.
///
/// Changes on every reconnect; all relayed handshake traffic is addressed
/// by session id, not participant id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A participant's advertised media flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaState {
    /// Camera enabled.
    pub camera_on: bool,
    /// Microphone enabled.
    pub mic_on: bool,
    /// Screen share active (replaces the camera as video source).
    pub screen_sharing: bool,
}

impl Default for MediaState {
    fn default() -> Self {
        Self {
            camera_on: true,
            mic_on: true,
            screen_sharing: false,
        }
    }
}

/// One room member as seen in roster snapshots and incremental updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Stable identity.
    pub participant_id: ParticipantId,
    /// Current transport session.
    pub session_id: SessionId,
    /// Display name.
    pub display_name: String,
    /// Last-known media flags.
    pub media_state: MediaState,
}

/// Opaque session-description blob produced by the media transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionDescription(pub String);

/// Opaque network-path candidate blob produced by the media transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateBlob(pub String);

/// A relayed chat message as delivered to every room member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    /// Session of the sender.
    pub sender_session: SessionId,
    /// Display name of the sender at send time.
    pub sender_name: String,
    /// Message text, relayed verbatim.
    pub text: String,
    /// Relay-stamped delivery time.
    pub timestamp: DateTime<Utc>,
}
