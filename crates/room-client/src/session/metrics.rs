//! Session metrics.
//!
//! Lightweight atomic counters for observability; read by tests and
//! exposed through `RoomStatus`. No exporter is wired up here.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one room actor's lifetime.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    /// Events processed on the actor loop.
    messages_processed: AtomicU64,
    /// Peer sessions created.
    sessions_opened: AtomicU64,
    /// Peer sessions closed (any reason).
    sessions_closed: AtomicU64,
    /// Full offer/answer exchanges after the initial handshake.
    renegotiations: AtomicU64,
    /// Signaling reconnects survived.
    reconnects: AtomicU64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_message_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_renegotiation(&self) {
        self.renegotiations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    pub fn sessions_opened(&self) -> u64 {
        self.sessions_opened.load(Ordering::Relaxed)
    }

    pub fn sessions_closed(&self) -> u64 {
        self.sessions_closed.load(Ordering::Relaxed)
    }

    pub fn renegotiations(&self) -> u64 {
        self.renegotiations.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = SessionMetrics::new();

        metrics.record_session_opened();
        metrics.record_session_opened();
        metrics.record_session_closed();
        metrics.record_renegotiation();

        assert_eq!(metrics.sessions_opened(), 2);
        assert_eq!(metrics.sessions_closed(), 1);
        assert_eq!(metrics.renegotiations(), 1);
        assert_eq!(metrics.reconnects(), 0);
    }
}
