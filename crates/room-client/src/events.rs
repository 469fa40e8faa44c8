//! Events surfaced to the embedding application.
//!
//! Delivered over a `tokio::sync::broadcast` channel obtained from
//! `RoomHandle::subscribe`. Events are ephemeral: a subscriber that joins
//! late sees nothing already delivered (chat scrollback is available
//! separately via `chat_history`).

use crate::chat::ChatEntry;
use crate::media::MediaWarning;
use crate::transport::RemoteTrack;
use signal_protocol::{Participant, SessionId};

/// Overall state of the room connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Join in flight.
    Connecting,
    /// Joined and signaling is up.
    Connected,
    /// Signaling lost; reconnecting with backoff.
    Reconnecting,
    /// Reconnect attempts exhausted or join rejected.
    Failed,
    /// Not in a room: the initial state, and the state after leaving.
    Left,
}

/// Something the application should react to.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// Roster membership or a member's media flags changed. Carries the
    /// full roster so subscribers never need to reconstruct deltas.
    RosterChanged(Vec<Participant>),

    /// A remote media track became available for rendering.
    RemoteMediaAttached {
        session_id: SessionId,
        track: RemoteTrack,
    },

    /// All media from this remote is gone (session closed).
    RemoteMediaDetached { session_id: SessionId },

    /// A chat or system message arrived.
    ChatReceived(ChatEntry),

    /// A remote participant started or stopped typing.
    TypingChanged { session_id: SessionId, typing: bool },

    /// Connection state transition.
    ConnectionStatusChanged(ConnectionStatus),

    /// Media degraded non-fatally (fallback chain engaged).
    MediaWarning(MediaWarning),

    /// A peer's media path dropped; the session is in its grace window.
    PeerReconnecting { session_id: SessionId },

    /// The peer's media path came back within the grace window.
    PeerRecovered { session_id: SessionId },
}
