//! Media transport capability.
//!
//! The core never parses session descriptions or network candidates; it
//! shuttles them between the signaling channel and a `PeerLink`, and reacts
//! to the link's path events. Real transports (a WebRTC stack, a QUIC media
//! layer) plug in behind these traits; tests use fakes.

use crate::errors::ClientError;
use crate::media::{LocalTrack, TrackId, TrackKind};
use async_trait::async_trait;
use signal_protocol::{CandidateBlob, SessionDescription, SessionId};
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for media transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Link could not be created.
    #[error("Link setup failed: {0}")]
    Setup(String),

    /// A description was rejected by the transport.
    #[error("Description rejected: {0}")]
    Description(String),

    /// A candidate was rejected by the transport.
    #[error("Candidate rejected: {0}")]
    Candidate(String),

    /// The link is already closed.
    #[error("Link closed")]
    Closed,
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        ClientError::Transport(err.to_string())
    }
}

/// Whether replacing a track requires a fresh offer/answer exchange.
///
/// Most transports splice a same-kind track into the existing path without
/// renegotiating; a transport that cannot reports `Required` and the
/// orchestrator re-runs the handshake over the existing link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenegotiationNeed {
    /// Swap completed in place.
    None,
    /// A new offer must be sent over signaling.
    Required,
}

/// A media track received from a remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    /// Transport-assigned track identifier.
    pub id: TrackId,
    /// Audio or video.
    pub kind: TrackKind,
}

/// What happened on a peer link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    /// Media path established.
    PathConnected,
    /// Media path lost (may recover).
    PathLost,
    /// Media path recovered after a loss.
    PathRecovered,
    /// Remote peer attached a track.
    RemoteTrackAdded(RemoteTrack),
    /// Remote peer removed a track.
    RemoteTrackRemoved(TrackId),
}

/// A link event, tagged with the remote session it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    /// Remote session the link is paired with.
    pub remote: SessionId,
    /// The event itself.
    pub kind: TransportEventKind,
}

/// Factory for pairwise media links.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Create a link to `remote`. Link events are delivered on `events`,
    /// tagged with `remote`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot allocate a link.
    async fn create_link(
        &self,
        local: SessionId,
        remote: SessionId,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Box<dyn PeerLink>, TransportError>;
}

/// One pairwise media path.
///
/// All methods are driven from the room actor's event loop, so a link never
/// sees concurrent calls.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Produce an offer describing the given local tracks.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot build a description.
    async fn create_offer(
        &mut self,
        tracks: &[LocalTrack],
    ) -> Result<SessionDescription, TransportError>;

    /// Apply a remote offer and produce the answer, attaching local tracks.
    ///
    /// # Errors
    ///
    /// Returns an error if the offer is rejected.
    async fn accept_offer(
        &mut self,
        offer: SessionDescription,
        tracks: &[LocalTrack],
    ) -> Result<SessionDescription, TransportError>;

    /// Apply the remote answer to our outstanding offer.
    ///
    /// # Errors
    ///
    /// Returns an error if the answer is rejected.
    async fn accept_answer(&mut self, answer: SessionDescription) -> Result<(), TransportError>;

    /// Apply one remote network-path candidate.
    ///
    /// # Errors
    ///
    /// Returns an error if the candidate is rejected.
    async fn add_candidate(&mut self, candidate: CandidateBlob) -> Result<(), TransportError>;

    /// Swap the outgoing video track in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot perform the swap.
    async fn replace_video_track(
        &mut self,
        new: LocalTrack,
    ) -> Result<RenegotiationNeed, TransportError>;

    /// Detach the outgoing video track without a replacement.
    ///
    /// Used when a screen share ends and no camera track exists to take
    /// its place.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot detach the track.
    async fn remove_video_track(&mut self) -> Result<RenegotiationNeed, TransportError>;

    /// Tear the link down. Idempotent.
    async fn close(&mut self);
}
