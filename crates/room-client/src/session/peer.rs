//! Per-peer session state machine.
//!
//! One `PeerSession` per remote participant, owned by the room actor and
//! only ever touched from its event loop. Lifecycle:
//!
//! ```text
//! Negotiating --path connected--> Connected
//! Negotiating | Connected --path lost / signaling lost--> Suspect
//! Suspect --path recovered--> Connected
//! Suspect --grace expired--> Closed
//! any state --close()--> Closed
//! ```
//!
//! Candidates that arrive before the remote description are buffered in
//! receipt order and flushed immediately after it is applied. Handshake
//! traffic arriving after `Closed` is silently discarded.

use crate::media::LocalTrack;
use crate::transport::{PeerLink, RenegotiationNeed, TransportError};
use signal_protocol::{CandidateBlob, SessionDescription, SessionId};
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Handshake in flight.
    Negotiating,
    /// Media path established.
    Connected,
    /// Media path or signaling lost; waiting out the grace window.
    Suspect { since: Instant },
    /// Torn down. Terminal.
    Closed,
}

/// Which side initiates the handshake.
///
/// Both sides learn about each other simultaneously (one from the roster
/// snapshot, one from the join broadcast), so without a tie-break both
/// would offer at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Offerer,
    Answerer,
}

impl PeerRole {
    /// Deterministic glare avoidance: the lexically smaller session id
    /// offers, the other side waits.
    pub fn decide(local: &SessionId, remote: &SessionId) -> Self {
        if local < remote {
            PeerRole::Offerer
        } else {
            PeerRole::Answerer
        }
    }
}

/// One pairwise session with a remote participant.
pub struct PeerSession {
    remote: SessionId,
    role: PeerRole,
    state: PeerState,
    link: Box<dyn PeerLink>,
    /// Candidates received before the remote description, in receipt order.
    pending_candidates: Vec<CandidateBlob>,
    remote_description_set: bool,
}

impl PeerSession {
    pub fn new(remote: SessionId, role: PeerRole, link: Box<dyn PeerLink>) -> Self {
        Self {
            remote,
            role,
            state: PeerState::Negotiating,
            link,
            pending_candidates: Vec::new(),
            remote_description_set: false,
        }
    }

    pub fn remote(&self) -> &SessionId {
        &self.remote
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == PeerState::Closed
    }

    pub fn is_connected(&self) -> bool {
        self.state == PeerState::Connected
    }

    /// Produce the initial (or renegotiation) offer.
    ///
    /// # Errors
    ///
    /// Returns an error if the link rejects the operation.
    pub async fn create_offer(
        &mut self,
        tracks: &[LocalTrack],
    ) -> Result<Option<SessionDescription>, TransportError> {
        if self.is_closed() {
            return Ok(None);
        }
        Ok(Some(self.link.create_offer(tracks).await?))
    }

    /// Apply a remote offer and produce the answer. Flushes any buffered
    /// candidates once the description is in.
    ///
    /// # Errors
    ///
    /// Returns an error if the link rejects the offer or a buffered
    /// candidate.
    pub async fn handle_offer(
        &mut self,
        offer: SessionDescription,
        tracks: &[LocalTrack],
    ) -> Result<Option<SessionDescription>, TransportError> {
        if self.is_closed() {
            debug!(target: "rc.session.peer", remote = %self.remote, "discarding offer for closed session");
            return Ok(None);
        }
        let answer = self.link.accept_offer(offer, tracks).await?;
        self.remote_description_set = true;
        self.flush_candidates().await?;
        Ok(Some(answer))
    }

    /// Apply the remote answer to our outstanding offer. Flushes any
    /// buffered candidates once the description is in.
    ///
    /// # Errors
    ///
    /// Returns an error if the link rejects the answer or a buffered
    /// candidate.
    pub async fn handle_answer(
        &mut self,
        answer: SessionDescription,
    ) -> Result<(), TransportError> {
        if self.is_closed() {
            debug!(target: "rc.session.peer", remote = %self.remote, "discarding answer for closed session");
            return Ok(());
        }
        self.link.accept_answer(answer).await?;
        self.remote_description_set = true;
        self.flush_candidates().await
    }

    /// Apply or buffer one remote candidate.
    ///
    /// # Errors
    ///
    /// Returns an error if the link rejects the candidate.
    pub async fn handle_candidate(
        &mut self,
        candidate: CandidateBlob,
    ) -> Result<(), TransportError> {
        if self.is_closed() {
            debug!(target: "rc.session.peer", remote = %self.remote, "discarding candidate for closed session");
            return Ok(());
        }
        if self.remote_description_set {
            self.link.add_candidate(candidate).await
        } else {
            self.pending_candidates.push(candidate);
            Ok(())
        }
    }

    async fn flush_candidates(&mut self) -> Result<(), TransportError> {
        for candidate in std::mem::take(&mut self.pending_candidates) {
            self.link.add_candidate(candidate).await?;
        }
        Ok(())
    }

    /// Swap the outgoing video track in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot perform the swap.
    pub async fn replace_video_track(
        &mut self,
        new: LocalTrack,
    ) -> Result<RenegotiationNeed, TransportError> {
        if self.is_closed() {
            return Ok(RenegotiationNeed::None);
        }
        self.link.replace_video_track(new).await
    }

    /// Detach the outgoing video track without a replacement.
    ///
    /// # Errors
    ///
    /// Returns an error if the link cannot detach the track.
    pub async fn remove_video_track(&mut self) -> Result<RenegotiationNeed, TransportError> {
        if self.is_closed() {
            return Ok(RenegotiationNeed::None);
        }
        self.link.remove_video_track().await
    }

    /// Media path came up. Returns the state it left, so the caller can
    /// tell a first connect from a recovery.
    pub fn path_connected(&mut self) -> PeerState {
        let prior = self.state;
        if prior != PeerState::Closed {
            self.state = PeerState::Connected;
        }
        prior
    }

    /// Clear a Suspect state without a path event, e.g. when a signaling
    /// resync shows the peer never left. Returns true if it transitioned.
    pub fn recover(&mut self) -> bool {
        if matches!(self.state, PeerState::Suspect { .. }) {
            self.state = PeerState::Connected;
            true
        } else {
            false
        }
    }

    /// Media path dropped; start the grace window.
    pub fn mark_suspect(&mut self, now: Instant) {
        if matches!(self.state, PeerState::Negotiating | PeerState::Connected) {
            self.state = PeerState::Suspect { since: now };
        }
    }

    /// True when the session has sat in Suspect longer than `grace`.
    pub fn suspect_expired(&self, now: Instant, grace: Duration) -> bool {
        match self.state {
            PeerState::Suspect { since } => now.duration_since(since) >= grace,
            _ => false,
        }
    }

    /// Tear down the link. Idempotent; reachable from every state.
    pub async fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.link.close().await;
        self.pending_candidates.clear();
        self.state = PeerState::Closed;
    }
}
