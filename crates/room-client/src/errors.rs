//! Room client error types.
//!
//! Errors are split into fatal errors (the room session cannot continue and
//! the caller must rejoin) and recoverable ones (the client keeps running
//! and repairs itself). `is_fatal` is the classifier the event loop uses to
//! decide between surfacing a failure and retrying.

use thiserror::Error;

/// Room client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Signaling relay refused the join (capacity, duplicate identity).
    #[error("Join rejected: {0}")]
    JoinRejected(String),

    /// Signaling connection lost and all reconnect attempts exhausted.
    #[error("Signaling failed after {attempts} attempts")]
    SignalingFailed { attempts: u32 },

    /// Screen capture could not be started; the previous video source is
    /// still live.
    #[error("Screen capture failed: {0}")]
    ScreenCaptureFailed(String),

    /// Operation requires a local track the current media profile lacks
    /// (toggling a camera in audio-only or chat-only mode).
    #[error("No such local track: {0}")]
    TrackUnavailable(String),

    /// The media transport rejected a handshake operation.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation requires a joined room.
    #[error("Not joined to a room")]
    NotJoined,

    /// Join called while already joined.
    #[error("Already joined")]
    AlreadyJoined,

    /// The room actor has shut down and can no longer accept commands.
    #[error("Room session closed")]
    Closed,
}

impl ClientError {
    /// Returns true if the room session is over and the caller must rejoin.
    ///
    /// Non-fatal errors leave the session running: a failed screen-share
    /// start keeps the camera track, a transport hiccup on one peer leaves
    /// the other sessions intact.
    pub fn is_fatal(&self) -> bool {
        match self {
            ClientError::JoinRejected(_)
            | ClientError::SignalingFailed { .. }
            | ClientError::Closed => true,
            ClientError::ScreenCaptureFailed(_)
            | ClientError::TrackUnavailable(_)
            | ClientError::Transport(_)
            | ClientError::NotJoined
            | ClientError::AlreadyJoined => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ClientError::JoinRejected("room full".to_string()).is_fatal());
        assert!(ClientError::SignalingFailed { attempts: 10 }.is_fatal());
        assert!(ClientError::Closed.is_fatal());
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(!ClientError::ScreenCaptureFailed("denied".to_string()).is_fatal());
        assert!(!ClientError::TrackUnavailable("no camera".to_string()).is_fatal());
        assert!(!ClientError::Transport("setRemote failed".to_string()).is_fatal());
        assert!(!ClientError::NotJoined.is_fatal());
        assert!(!ClientError::AlreadyJoined.is_fatal());
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", ClientError::SignalingFailed { attempts: 10 }),
            "Signaling failed after 10 attempts"
        );
        assert_eq!(
            format!("{}", ClientError::JoinRejected("room full".to_string())),
            "Join rejected: room full"
        );
    }
}
