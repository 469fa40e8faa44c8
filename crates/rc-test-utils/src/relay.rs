//! In-memory signaling relay.
//!
//! Implements the server side of the wire protocol over channels: assigns
//! session ids, answers Join with Welcome (or JoinRejected past capacity),
//! broadcasts roster and chat traffic, and relays handshake messages by
//! target. Traffic counters let tests assert on exactly how much signaling
//! a scenario produced.

use async_trait::async_trait;
use room_client::signaling::{SignalConnection, SignalConnector, SignalError};
use signal_protocol::{
    ChatPayload, ClientMessage, MediaState, Participant, ServerMessage, SessionId,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const CLIENT_BUFFER: usize = 64;
const RELAY_BUFFER: usize = 256;

/// Relayed-message counters.
#[derive(Debug, Default)]
pub struct RelayCounters {
    offers: AtomicU64,
    answers: AtomicU64,
    candidates: AtomicU64,
}

/// One connected (or detached) client.
struct Entry {
    session_id: SessionId,
    /// Set once the client has joined.
    participant: Option<Participant>,
    /// Relay-to-client sender; `None` after `drop_client` severed it.
    sender: Option<mpsc::Sender<ServerMessage>>,
}

enum RelayEvent {
    Connect {
        respond_to: oneshot::Sender<SignalConnection>,
    },
    FromClient {
        session_id: SessionId,
        message: ClientMessage,
    },
    Disconnected {
        session_id: SessionId,
    },
    DropClient {
        session_id: SessionId,
        respond_to: oneshot::Sender<()>,
    },
    GetParticipants {
        respond_to: oneshot::Sender<Vec<Participant>>,
    },
}

/// In-memory relay for tests.
pub struct MockRelay {
    inbox: mpsc::Sender<RelayEvent>,
    counters: Arc<RelayCounters>,
    cancel: CancellationToken,
}

impl MockRelay {
    /// Spawn a relay with unlimited capacity.
    pub fn spawn() -> Self {
        Self::spawn_inner(usize::MAX, VecDeque::new())
    }

    /// Spawn a relay that rejects joins past `capacity` participants.
    pub fn spawn_with_capacity(capacity: usize) -> Self {
        Self::spawn_inner(capacity, VecDeque::new())
    }

    /// Spawn a relay that hands out the given session ids to connections
    /// in order, falling back to random ids once they run out. Pins the
    /// offer/answer tie-break for a scenario.
    pub fn spawn_with_session_ids(ids: &[&str]) -> Self {
        let scripted = ids.iter().map(|id| SessionId::from(*id)).collect();
        Self::spawn_inner(usize::MAX, scripted)
    }

    fn spawn_inner(capacity: usize, scripted_ids: VecDeque<SessionId>) -> Self {
        let (inbox, inbox_rx) = mpsc::channel(RELAY_BUFFER);
        let counters = Arc::new(RelayCounters::default());
        let cancel = CancellationToken::new();

        let task = RelayTask {
            inbox: inbox.clone(),
            inbox_rx,
            entries: Vec::new(),
            capacity,
            scripted_ids,
            counters: Arc::clone(&counters),
            cancel: cancel.clone(),
        };
        tokio::spawn(task.run());

        Self {
            inbox,
            counters,
            cancel,
        }
    }

    /// A connector clients can dial. Each `connect` is a fresh session.
    pub fn connector(&self) -> Arc<dyn SignalConnector> {
        Arc::new(RelayConnector {
            inbox: self.inbox.clone(),
        })
    }

    /// Sever one client's connection without a Leave, simulating a
    /// signaling outage. The roster entry is kept; rejoining with the same
    /// participant identity replaces it.
    pub async fn drop_client(&self, session_id: &SessionId) {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(RelayEvent::DropClient {
                session_id: session_id.clone(),
                respond_to: tx,
            })
            .await
            .expect("relay task gone");
        rx.await.expect("relay task gone");
    }

    /// Participants currently registered, in join order.
    pub async fn participants(&self) -> Vec<Participant> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(RelayEvent::GetParticipants { respond_to: tx })
            .await
            .expect("relay task gone");
        rx.await.expect("relay task gone")
    }

    pub fn offers_relayed(&self) -> u64 {
        self.counters.offers.load(Ordering::Relaxed)
    }

    pub fn answers_relayed(&self) -> u64 {
        self.counters.answers.load(Ordering::Relaxed)
    }

    pub fn candidates_relayed(&self) -> u64 {
        self.counters.candidates.load(Ordering::Relaxed)
    }

    /// Total handshake messages relayed.
    pub fn handshake_messages_relayed(&self) -> u64 {
        self.offers_relayed() + self.answers_relayed() + self.candidates_relayed()
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct RelayConnector {
    inbox: mpsc::Sender<RelayEvent>,
}

#[async_trait]
impl SignalConnector for RelayConnector {
    async fn connect(&self) -> Result<SignalConnection, SignalError> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(RelayEvent::Connect { respond_to: tx })
            .await
            .map_err(|_| SignalError::Connect("relay stopped".to_string()))?;
        rx.await
            .map_err(|_| SignalError::Connect("relay stopped".to_string()))
    }
}

struct RelayTask {
    inbox: mpsc::Sender<RelayEvent>,
    inbox_rx: mpsc::Receiver<RelayEvent>,
    entries: Vec<Entry>,
    capacity: usize,
    scripted_ids: VecDeque<SessionId>,
    counters: Arc<RelayCounters>,
    cancel: CancellationToken,
}

impl RelayTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                event = self.inbox_rx.recv() => {
                    match event {
                        Some(event) => self.handle(event).await,
                        None => break,
                    }
                }
            }
        }
    }

    async fn handle(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Connect { respond_to } => {
                let session_id = self
                    .scripted_ids
                    .pop_front()
                    .unwrap_or_else(|| SessionId(uuid::Uuid::new_v4().to_string()));
                let (to_client_tx, to_client_rx) = mpsc::channel(CLIENT_BUFFER);
                let (from_client_tx, mut from_client_rx) = mpsc::channel(CLIENT_BUFFER);

                self.entries.push(Entry {
                    session_id: session_id.clone(),
                    participant: None,
                    sender: Some(to_client_tx),
                });

                // Pump client traffic into the relay inbox
                let inbox = self.inbox.clone();
                tokio::spawn(async move {
                    while let Some(message) = from_client_rx.recv().await {
                        let event = RelayEvent::FromClient {
                            session_id: session_id.clone(),
                            message,
                        };
                        if inbox.send(event).await.is_err() {
                            return;
                        }
                    }
                    let _ = inbox
                        .send(RelayEvent::Disconnected { session_id })
                        .await;
                });

                let _ = respond_to.send(SignalConnection {
                    outbound: from_client_tx,
                    inbound: to_client_rx,
                });
            }

            RelayEvent::FromClient { session_id, message } => {
                self.handle_client_message(&session_id, message).await;
            }

            RelayEvent::Disconnected { session_id } => {
                // A severed entry stays registered; a real disconnect is a leave
                let detached = self
                    .entries
                    .iter()
                    .any(|e| e.session_id == session_id && e.sender.is_none());
                if !detached {
                    self.remove_and_announce(&session_id).await;
                }
            }

            RelayEvent::DropClient {
                session_id,
                respond_to,
            } => {
                if let Some(entry) = self
                    .entries
                    .iter_mut()
                    .find(|e| e.session_id == session_id)
                {
                    debug!(target: "rc.relay", session_id = %session_id, "severing client connection");
                    entry.sender = None;
                }
                let _ = respond_to.send(());
            }

            RelayEvent::GetParticipants { respond_to } => {
                let roster: Vec<Participant> = self
                    .entries
                    .iter()
                    .filter_map(|e| e.participant.clone())
                    .collect();
                let _ = respond_to.send(roster);
            }
        }
    }

    async fn handle_client_message(&mut self, session_id: &SessionId, message: ClientMessage) {
        match message {
            ClientMessage::Join {
                display_name,
                participant_id,
            } => {
                let joined = self
                    .entries
                    .iter()
                    .filter(|e| e.participant.is_some())
                    .count();
                if joined >= self.capacity {
                    self.send_to(
                        session_id,
                        ServerMessage::JoinRejected {
                            reason: "room is full".to_string(),
                        },
                    )
                    .await;
                    self.entries.retain(|e| &e.session_id != session_id);
                    return;
                }

                // A rejoin under the same identity replaces the old session
                let stale: Option<SessionId> = self
                    .entries
                    .iter()
                    .find(|e| {
                        &e.session_id != session_id
                            && e.participant
                                .as_ref()
                                .is_some_and(|p| p.participant_id == participant_id)
                    })
                    .map(|e| e.session_id.clone());
                if let Some(stale) = stale {
                    self.remove_and_announce(&stale).await;
                }

                let participant = Participant {
                    participant_id,
                    session_id: session_id.clone(),
                    display_name: display_name.clone(),
                    media_state: MediaState::default(),
                };

                let roster: Vec<Participant> = self
                    .entries
                    .iter()
                    .filter(|e| &e.session_id != session_id)
                    .filter_map(|e| e.participant.clone())
                    .collect();

                if let Some(entry) = self
                    .entries
                    .iter_mut()
                    .find(|e| &e.session_id == session_id)
                {
                    entry.participant = Some(participant.clone());
                }

                self.send_to(
                    session_id,
                    ServerMessage::Welcome {
                        session_id: session_id.clone(),
                        roster,
                    },
                )
                .await;

                self.broadcast_except(
                    session_id,
                    ServerMessage::ParticipantJoined {
                        participant: participant.clone(),
                    },
                )
                .await;
                self.broadcast_except(
                    session_id,
                    ServerMessage::SystemMessage {
                        text: format!("{display_name} joined the room"),
                        timestamp: chrono::Utc::now(),
                    },
                )
                .await;
            }

            ClientMessage::Leave => {
                self.remove_and_announce(session_id).await;
            }

            ClientMessage::MediaStateChanged {
                media_state,
                sent_at,
            } => {
                if let Some(entry) = self
                    .entries
                    .iter_mut()
                    .find(|e| &e.session_id == session_id)
                {
                    if let Some(participant) = &mut entry.participant {
                        participant.media_state = media_state;
                    }
                }
                self.broadcast_except(
                    session_id,
                    ServerMessage::MediaStateChanged {
                        session_id: session_id.clone(),
                        media_state,
                        sent_at,
                    },
                )
                .await;
            }

            ClientMessage::SessionOffer {
                target,
                description,
            } => {
                self.counters.offers.fetch_add(1, Ordering::Relaxed);
                self.send_to(
                    &target,
                    ServerMessage::SessionOffer {
                        from: session_id.clone(),
                        description,
                    },
                )
                .await;
            }

            ClientMessage::SessionAnswer {
                target,
                description,
            } => {
                self.counters.answers.fetch_add(1, Ordering::Relaxed);
                self.send_to(
                    &target,
                    ServerMessage::SessionAnswer {
                        from: session_id.clone(),
                        description,
                    },
                )
                .await;
            }

            ClientMessage::NetworkCandidate { target, candidate } => {
                self.counters.candidates.fetch_add(1, Ordering::Relaxed);
                self.send_to(
                    &target,
                    ServerMessage::NetworkCandidate {
                        from: session_id.clone(),
                        candidate,
                    },
                )
                .await;
            }

            ClientMessage::Chat { text } => {
                let Some(sender) = self.participant_of(session_id) else {
                    return;
                };
                let payload = ChatPayload {
                    sender_session: session_id.clone(),
                    sender_name: sender.display_name,
                    text,
                    timestamp: chrono::Utc::now(),
                };
                // Chat echoes back to the sender too
                self.broadcast(ServerMessage::Chat(payload)).await;
            }

            ClientMessage::Typing { typing } => {
                self.broadcast_except(
                    session_id,
                    ServerMessage::Typing {
                        session_id: session_id.clone(),
                        typing,
                    },
                )
                .await;
            }
        }
    }

    fn participant_of(&self, session_id: &SessionId) -> Option<Participant> {
        self.entries
            .iter()
            .find(|e| &e.session_id == session_id)
            .and_then(|e| e.participant.clone())
    }

    async fn remove_and_announce(&mut self, session_id: &SessionId) {
        let Some(index) = self
            .entries
            .iter()
            .position(|e| &e.session_id == session_id)
        else {
            return;
        };
        let entry = self.entries.remove(index);

        if let Some(participant) = entry.participant {
            self.broadcast(ServerMessage::ParticipantLeft {
                session_id: session_id.clone(),
            })
            .await;
            self.broadcast(ServerMessage::SystemMessage {
                text: format!("{} left the room", participant.display_name),
                timestamp: chrono::Utc::now(),
            })
            .await;
        }
    }

    async fn send_to(&self, session_id: &SessionId, message: ServerMessage) {
        if let Some(sender) = self
            .entries
            .iter()
            .find(|e| &e.session_id == session_id)
            .and_then(|e| e.sender.as_ref())
        {
            let _ = sender.send(message).await;
        }
    }

    async fn broadcast(&self, message: ServerMessage) {
        for entry in &self.entries {
            if let (Some(sender), Some(_)) = (&entry.sender, &entry.participant) {
                let _ = sender.send(message.clone()).await;
            }
        }
    }

    async fn broadcast_except(&self, except: &SessionId, message: ServerMessage) {
        for entry in &self.entries {
            if &entry.session_id == except {
                continue;
            }
            if let (Some(sender), Some(_)) = (&entry.sender, &entry.participant) {
                let _ = sender.send(message.clone()).await;
            }
        }
    }
}
