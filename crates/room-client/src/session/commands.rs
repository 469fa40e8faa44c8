//! Command types for the room actor mailbox.

use crate::chat::ChatEntry;
use crate::errors::ClientError;
use crate::events::ConnectionStatus;
use crate::media::{MediaProfile, MediaWarning};
use signal_protocol::{MediaState, Participant, SessionId};
use tokio::sync::oneshot;

/// Commands sent from `RoomHandle` to the room actor.
#[derive(Debug)]
pub enum RoomCommand {
    /// Join the room.
    Join {
        display_name: String,
        respond_to: oneshot::Sender<Result<JoinOutcome, ClientError>>,
    },

    /// Leave the room. Every peer session is closed before the reply.
    Leave {
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    /// Flip the camera flag. Replies with the new enabled state.
    ToggleCamera {
        respond_to: oneshot::Sender<Result<bool, ClientError>>,
    },

    /// Flip the microphone flag. Replies with the new enabled state.
    ToggleMicrophone {
        respond_to: oneshot::Sender<Result<bool, ClientError>>,
    },

    /// Swap the screen in as the video source on every live session.
    StartScreenShare {
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    /// Restore the camera as the video source.
    StopScreenShare {
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    /// Relay a chat message to the room.
    SendChat {
        text: String,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },

    /// Advertise typing presence. Fire and forget.
    SetTyping { typing: bool },

    /// Snapshot of the chat scrollback.
    GetChatHistory {
        respond_to: oneshot::Sender<Vec<ChatEntry>>,
    },

    /// Snapshot of the current roster.
    GetRoster {
        respond_to: oneshot::Sender<Vec<Participant>>,
    },

    /// Snapshot of connection and session state.
    GetStatus {
        respond_to: oneshot::Sender<RoomStatus>,
    },
}

/// Reply to a successful join.
#[derive(Debug)]
pub struct JoinOutcome {
    /// Session id assigned by the relay.
    pub session_id: SessionId,
    /// What the media fallback chain settled on.
    pub profile: MediaProfile,
    /// Non-fatal degradations hit during acquisition.
    pub warnings: Vec<MediaWarning>,
}

/// Point-in-time view of the room connection.
#[derive(Debug, Clone)]
pub struct RoomStatus {
    /// Connection state.
    pub connection: ConnectionStatus,
    /// Our session id, when joined.
    pub session_id: Option<SessionId>,
    /// Local media flags.
    pub media_state: MediaState,
    /// Peer sessions currently tracked.
    pub peer_sessions: usize,
    /// Peer sessions with a live media path.
    pub connected_peers: usize,
}
