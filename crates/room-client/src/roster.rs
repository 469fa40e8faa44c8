//! Room roster projection.
//!
//! A pure, insertion-ordered view of who is in the room. Mutated only from
//! the room actor's event loop; never contains the local participant. Every
//! apply method is idempotent so replayed or reordered roster messages
//! converge on the same state.

use chrono::{DateTime, Utc};
use signal_protocol::{MediaState, Participant, SessionId};

/// The outcome of a full-snapshot apply, used for session pruning.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    /// Sessions present before and absent after.
    pub removed: Vec<SessionId>,
    /// Sessions absent before and present after.
    pub added: Vec<SessionId>,
}

/// Insertion-ordered roster of remote participants.
#[derive(Debug, Default)]
pub struct Roster {
    entries: Vec<Participant>,
    /// Timestamp of the last media-state write per session, for
    /// last-write-wins on reordered updates.
    media_clocks: Vec<(SessionId, DateTime<Utc>)>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current members in insertion order.
    pub fn participants(&self) -> &[Participant] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&Participant> {
        self.entries.iter().find(|p| &p.session_id == session_id)
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.get(session_id).is_some()
    }

    /// Replace the whole roster with a server snapshot.
    ///
    /// Returns which sessions appeared and disappeared so the caller can
    /// reconcile peer sessions. Media-state clocks for departed sessions
    /// are dropped.
    pub fn apply_snapshot(&mut self, snapshot: Vec<Participant>) -> SnapshotDiff {
        let mut diff = SnapshotDiff::default();

        for old in &self.entries {
            if !snapshot.iter().any(|p| p.session_id == old.session_id) {
                diff.removed.push(old.session_id.clone());
            }
        }
        for new in &snapshot {
            if !self.contains(&new.session_id) {
                diff.added.push(new.session_id.clone());
            }
        }

        self.media_clocks
            .retain(|(sid, _)| snapshot.iter().any(|p| &p.session_id == sid));
        self.entries = snapshot;
        diff
    }

    /// Insert or update one participant. Returns true if they were new.
    ///
    /// A duplicate join updates the stored entry in place, keeping the
    /// original position.
    pub fn apply_joined(&mut self, participant: Participant) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|p| p.session_id == participant.session_id)
        {
            Some(existing) => {
                *existing = participant;
                false
            }
            None => {
                self.entries.push(participant);
                true
            }
        }
    }

    /// Remove one participant. Returns the removed entry if present.
    pub fn apply_left(&mut self, session_id: &SessionId) -> Option<Participant> {
        let index = self
            .entries
            .iter()
            .position(|p| &p.session_id == session_id)?;
        self.media_clocks.retain(|(sid, _)| sid != session_id);
        Some(self.entries.remove(index))
    }

    /// Update a member's media flags, last-write-wins by sender timestamp.
    ///
    /// Returns true if the update was applied; false if the session is
    /// unknown or the update is stale.
    pub fn apply_media_state(
        &mut self,
        session_id: &SessionId,
        media_state: MediaState,
        sent_at: DateTime<Utc>,
    ) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|p| &p.session_id == session_id)
        else {
            return false;
        };

        match self
            .media_clocks
            .iter_mut()
            .find(|(sid, _)| sid == session_id)
        {
            Some((_, clock)) => {
                if sent_at < *clock {
                    return false;
                }
                *clock = sent_at;
            }
            None => self.media_clocks.push((session_id.clone(), sent_at)),
        }

        entry.media_state = media_state;
        true
    }
}
