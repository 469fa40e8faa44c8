//! `RoomActor` - the per-room actor that owns all session state.
//!
//! Each `RoomActor`:
//! - Owns the roster, the peer session table, the media pipeline and the
//!   chat scrollback
//! - Drives one `SignalingChannel` task and replays Join after reconnects
//! - Multiplexes commands, signaling events, peer link events and capture
//!   events onto one serialized event loop
//!
//! # Reconnect handling
//!
//! When signaling drops, every peer session is marked Suspect but kept
//! (media paths are independent of signaling and usually survive). A fresh
//! Welcome after reconnect is treated as stale-roster truth: departed
//! participants are pruned, unchanged sessions are kept, changed ones are
//! replaced. Suspect sessions that outlive the grace window are closed.

use crate::chat::{ChatEntry, ChatLog};
use crate::config::Config;
use crate::errors::ClientError;
use crate::events::{ConnectionStatus, RoomEvent};
use crate::media::{CaptureEvent, LocalTrack, MediaCapture, MediaPipeline, MediaWarning};
use crate::roster::Roster;
use crate::signaling::{SignalConnector, SignalingChannel, SignalingEvent, SignalingHandle};
use crate::transport::{PeerTransport, RenegotiationNeed, TransportEvent, TransportEventKind};

use super::commands::{JoinOutcome, RoomCommand, RoomStatus};
use super::metrics::SessionMetrics;
use super::peer::{PeerRole, PeerSession, PeerState};

use signal_protocol::{
    ClientMessage, MediaState, Participant, ParticipantId, ServerMessage, SessionId,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Command mailbox depth.
const ROOM_CHANNEL_BUFFER: usize = 128;

/// Event stream buffer; slow subscribers lag rather than block the actor.
const EVENT_CHANNEL_BUFFER: usize = 256;

/// Peer link event buffer, shared across all links.
const TRANSPORT_CHANNEL_BUFFER: usize = 128;

/// How often Suspect grace windows are checked.
const GRACE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Buffer for screen acquisition results; one acquisition runs at a time.
const SCREEN_CHANNEL_BUFFER: usize = 1;

/// Outcome of an off-loop screen acquisition, tagged with the epoch it
/// was started under so results from before a leave are discarded.
type ScreenAcquired = (u64, Result<LocalTrack, String>);

/// Handle to a `RoomActor`.
#[derive(Clone)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomCommand>,
    events: broadcast::Sender<RoomEvent>,
    cancel_token: CancellationToken,
}

impl RoomHandle {
    /// Join the room under the given display name.
    ///
    /// Resolves once the relay has accepted us and a session per existing
    /// participant has been opened.
    ///
    /// # Errors
    ///
    /// Returns `JoinRejected`, `SignalingFailed` or `AlreadyJoined`.
    pub async fn join(&self, display_name: impl Into<String>) -> Result<JoinOutcome, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::Join {
                display_name: display_name.into(),
                respond_to: tx,
            })
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Leave the room. Every peer session is closed and local media is
    /// released before this resolves.
    ///
    /// # Errors
    ///
    /// Returns `NotJoined` if there is nothing to leave.
    pub async fn leave(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::Leave { respond_to: tx })
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Flip the camera flag. Returns the new enabled state.
    ///
    /// # Errors
    ///
    /// Returns `NotJoined` or `TrackUnavailable`.
    pub async fn toggle_camera(&self) -> Result<bool, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::ToggleCamera { respond_to: tx })
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Flip the microphone flag. Returns the new enabled state.
    ///
    /// # Errors
    ///
    /// Returns `NotJoined` or `TrackUnavailable`.
    pub async fn toggle_microphone(&self) -> Result<bool, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::ToggleMicrophone { respond_to: tx })
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Start sharing the screen, swapping it in as the video source on
    /// every live session. Acquisition may sit behind an OS permission
    /// prompt; the room keeps processing signaling and chat while this
    /// call waits.
    ///
    /// # Errors
    ///
    /// Returns `ScreenCaptureFailed` if acquisition fails; the previous
    /// video source stays live.
    pub async fn start_screen_share(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::StartScreenShare { respond_to: tx })
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Stop sharing the screen and restore the camera.
    ///
    /// # Errors
    ///
    /// Returns `NotJoined` if there is no media pipeline.
    pub async fn stop_screen_share(&self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::StopScreenShare { respond_to: tx })
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Relay a chat message to the whole room.
    ///
    /// # Errors
    ///
    /// Returns `NotJoined` before a join.
    pub async fn send_chat_message(&self, text: impl Into<String>) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::SendChat {
                text: text.into(),
                respond_to: tx,
            })
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    /// Advertise typing presence. Fire and forget.
    ///
    /// # Errors
    ///
    /// Returns an error only if the actor has shut down.
    pub async fn set_typing(&self, typing: bool) -> Result<(), ClientError> {
        self.sender
            .send(RoomCommand::SetTyping { typing })
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Snapshot of the chat scrollback, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error only if the actor has shut down.
    pub async fn chat_history(&self) -> Result<Vec<ChatEntry>, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::GetChatHistory { respond_to: tx })
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Snapshot of the current roster.
    ///
    /// # Errors
    ///
    /// Returns an error only if the actor has shut down.
    pub async fn roster(&self) -> Result<Vec<Participant>, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::GetRoster { respond_to: tx })
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Snapshot of connection and session state.
    ///
    /// # Errors
    ///
    /// Returns an error only if the actor has shut down.
    pub async fn status(&self) -> Result<RoomStatus, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomCommand::GetStatus { respond_to: tx })
            .await
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Subscribe to the room event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    /// Shut the actor down.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    /// Stable client identity, survives reconnects.
    participant_id: ParticipantId,
    config: Config,
    receiver: mpsc::Receiver<RoomCommand>,
    cancel_token: CancellationToken,

    connector: Arc<dyn SignalConnector>,
    transport: Arc<dyn PeerTransport>,
    capture: Arc<dyn MediaCapture>,

    /// Live signaling channel, present between join and leave.
    signaling: Option<SignalingHandle>,
    signaling_task: Option<JoinHandle<()>>,
    /// Kept so `signaling_rx` never closes while the actor runs.
    signaling_tx: mpsc::Sender<SignalingEvent>,
    signaling_rx: mpsc::Receiver<SignalingEvent>,

    /// Cloned into every peer link.
    transport_tx: mpsc::Sender<TransportEvent>,
    transport_rx: mpsc::Receiver<TransportEvent>,
    capture_rx: mpsc::Receiver<CaptureEvent>,

    /// Screen acquisition runs off the loop (the OS prompt can sit open
    /// for a long time); its result comes back through this channel.
    screen_tx: mpsc::Sender<ScreenAcquired>,
    screen_rx: mpsc::Receiver<ScreenAcquired>,
    /// Callers waiting on the in-flight screen acquisition.
    pending_screen_share: Vec<oneshot::Sender<Result<(), ClientError>>>,
    /// Bumped when pending share requests are abandoned.
    screen_epoch: u64,

    status: ConnectionStatus,
    local_session: Option<SessionId>,
    display_name: Option<String>,
    pending_join: Option<oneshot::Sender<Result<JoinOutcome, ClientError>>>,
    join_warnings: Vec<MediaWarning>,

    roster: Roster,
    sessions: HashMap<SessionId, PeerSession>,
    media: Option<MediaPipeline>,
    chat: ChatLog,

    events: broadcast::Sender<RoomEvent>,
    metrics: Arc<SessionMetrics>,
}

impl RoomActor {
    /// Spawn a room actor wired to the given external capabilities.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        connector: Arc<dyn SignalConnector>,
        transport: Arc<dyn PeerTransport>,
        capture: Arc<dyn MediaCapture>,
        config: Config,
    ) -> (RoomHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_BUFFER);
        let (signaling_tx, signaling_rx) = mpsc::channel(EVENT_CHANNEL_BUFFER);
        let (transport_tx, transport_rx) = mpsc::channel(TRANSPORT_CHANNEL_BUFFER);
        let (screen_tx, screen_rx) = mpsc::channel(SCREEN_CHANNEL_BUFFER);
        let capture_rx = capture.events();
        let cancel_token = CancellationToken::new();
        let scrollback_limit = config.chat_scrollback_limit;

        let actor = Self {
            participant_id: ParticipantId(uuid::Uuid::new_v4().to_string()),
            config,
            receiver,
            cancel_token: cancel_token.clone(),
            connector,
            transport,
            capture,
            signaling: None,
            signaling_task: None,
            signaling_tx,
            signaling_rx,
            transport_tx,
            transport_rx,
            capture_rx,
            screen_tx,
            screen_rx,
            pending_screen_share: Vec::new(),
            screen_epoch: 0,
            status: ConnectionStatus::Left,
            local_session: None,
            display_name: None,
            pending_join: None,
            join_warnings: Vec::new(),
            roster: Roster::new(),
            sessions: HashMap::new(),
            media: None,
            chat: ChatLog::new(scrollback_limit),
            events: events.clone(),
            metrics: Arc::new(SessionMetrics::new()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomHandle {
            sender,
            events,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the actor event loop.
    #[instrument(skip_all, name = "rc.session.room", fields(participant_id = %self.participant_id))]
    async fn run(mut self) {
        info!(
            target: "rc.session.room",
            participant_id = %self.participant_id,
            "RoomActor started"
        );

        let mut grace_check = tokio::time::interval(GRACE_CHECK_INTERVAL);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "rc.session.room", "RoomActor received cancellation signal");
                    self.graceful_shutdown().await;
                    break;
                }

                _ = grace_check.tick() => {
                    self.check_suspect_timeouts().await;
                }

                cmd = self.receiver.recv() => {
                    match cmd {
                        Some(command) => {
                            self.handle_command(command).await;
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(target: "rc.session.room", "RoomActor mailbox closed, exiting");
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }

                Some(event) = self.signaling_rx.recv() => {
                    self.handle_signaling_event(event).await;
                    self.metrics.record_message_processed();
                }

                Some(event) = self.transport_rx.recv() => {
                    self.handle_transport_event(event);
                    self.metrics.record_message_processed();
                }

                Some(event) = self.capture_rx.recv() => {
                    self.handle_capture_event(event).await;
                    self.metrics.record_message_processed();
                }

                Some(result) = self.screen_rx.recv() => {
                    self.handle_screen_acquired(result).await;
                    self.metrics.record_message_processed();
                }
            }
        }

        info!(
            target: "rc.session.room",
            sessions_opened = self.metrics.sessions_opened(),
            messages_processed = self.metrics.messages_processed(),
            "RoomActor stopped"
        );
    }

    async fn handle_command(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join {
                display_name,
                respond_to,
            } => {
                self.handle_join(display_name, respond_to).await;
            }

            RoomCommand::Leave { respond_to } => {
                let result = self.handle_leave().await;
                let _ = respond_to.send(result);
            }

            RoomCommand::ToggleCamera { respond_to } => {
                let result = self.handle_toggle_camera().await;
                let _ = respond_to.send(result);
            }

            RoomCommand::ToggleMicrophone { respond_to } => {
                let result = self.handle_toggle_microphone().await;
                let _ = respond_to.send(result);
            }

            RoomCommand::StartScreenShare { respond_to } => {
                self.handle_start_screen_share(respond_to);
            }

            RoomCommand::StopScreenShare { respond_to } => {
                let result = self.handle_stop_screen_share().await;
                let _ = respond_to.send(result);
            }

            RoomCommand::SendChat { text, respond_to } => {
                let result = self.handle_send_chat(text).await;
                let _ = respond_to.send(result);
            }

            RoomCommand::SetTyping { typing } => {
                self.send_signal(ClientMessage::Typing { typing }).await;
            }

            RoomCommand::GetChatHistory { respond_to } => {
                let _ = respond_to.send(self.chat.history());
            }

            RoomCommand::GetRoster { respond_to } => {
                let _ = respond_to.send(self.roster.participants().to_vec());
            }

            RoomCommand::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }
        }
    }

    // ---- Commands ----

    async fn handle_join(
        &mut self,
        display_name: String,
        respond_to: oneshot::Sender<Result<JoinOutcome, ClientError>>,
    ) {
        if self.local_session.is_some() || self.pending_join.is_some() {
            let _ = respond_to.send(Err(ClientError::AlreadyJoined));
            return;
        }

        self.display_name = Some(display_name);
        self.set_status(ConnectionStatus::Connecting);

        let (pipeline, warnings) = MediaPipeline::acquire(&self.capture).await;
        self.media = Some(pipeline);
        for warning in &warnings {
            self.emit(RoomEvent::MediaWarning(warning.clone()));
        }
        self.join_warnings = warnings;
        self.pending_join = Some(respond_to);

        if self.signaling.is_none() {
            let (handle, task) = SignalingChannel::spawn(
                Arc::clone(&self.connector),
                &self.config,
                self.signaling_tx.clone(),
                self.cancel_token.child_token(),
            );
            self.signaling = Some(handle);
            self.signaling_task = Some(task);
        }
    }

    async fn handle_leave(&mut self) -> Result<(), ClientError> {
        if self.local_session.is_none() && self.pending_join.is_none() {
            return Err(ClientError::NotJoined);
        }

        if let Some(pending) = self.pending_join.take() {
            let _ = pending.send(Err(ClientError::Closed));
        }
        self.fail_pending_screen_share();

        // Best-effort leave notice, then drop the channel
        if let Some(signaling) = self.signaling.take() {
            let _ = signaling.send(ClientMessage::Leave).await;
            signaling.disconnect();
        }
        self.signaling_task = None;

        self.close_all_sessions().await;

        if let Some(media) = &mut self.media {
            media.release();
        }
        self.media = None;
        self.roster = Roster::new();
        self.local_session = None;
        self.set_status(ConnectionStatus::Left);
        Ok(())
    }

    async fn handle_toggle_camera(&mut self) -> Result<bool, ClientError> {
        let media = self.media.as_mut().ok_or(ClientError::NotJoined)?;
        let enabled = media.toggle_camera()?;
        // Flag flip only; no track replacement, no handshake traffic
        self.broadcast_media_state().await;
        Ok(enabled)
    }

    async fn handle_toggle_microphone(&mut self) -> Result<bool, ClientError> {
        let media = self.media.as_mut().ok_or(ClientError::NotJoined)?;
        let enabled = media.toggle_microphone()?;
        self.broadcast_media_state().await;
        Ok(enabled)
    }

    fn handle_start_screen_share(&mut self, respond_to: oneshot::Sender<Result<(), ClientError>>) {
        let Some(media) = self.media.as_ref() else {
            let _ = respond_to.send(Err(ClientError::NotJoined));
            return;
        };
        if media.is_screen_sharing() {
            let _ = respond_to.send(Ok(()));
            return;
        }

        // Acquisition can sit on an OS permission prompt indefinitely, so
        // it runs off the loop; chat and signaling keep flowing meanwhile.
        // Concurrent requests piggyback on the in-flight acquisition.
        self.pending_screen_share.push(respond_to);
        if self.pending_screen_share.len() > 1 {
            return;
        }

        let capture = Arc::clone(&self.capture);
        let tx = self.screen_tx.clone();
        let epoch = self.screen_epoch;
        tokio::spawn(async move {
            let result = capture.acquire_screen().await.map_err(|e| e.to_string());
            let _ = tx.send((epoch, result)).await;
        });
    }

    async fn handle_screen_acquired(&mut self, (epoch, result): ScreenAcquired) {
        // A result from before a leave or failure must not fulfil a share
        // request made after it
        if epoch != self.screen_epoch {
            return;
        }
        let waiters = std::mem::take(&mut self.pending_screen_share);

        match result {
            Ok(track) => {
                let Some(media) = self.media.as_mut() else {
                    for waiter in waiters {
                        let _ = waiter.send(Err(ClientError::NotJoined));
                    }
                    return;
                };
                media.set_screen_track(track.clone());
                self.swap_video_track(track).await;
                self.broadcast_media_state().await;
                for waiter in waiters {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(reason) => {
                warn!(target: "rc.session.room", reason = %reason, "screen capture failed");
                for waiter in waiters {
                    let _ = waiter.send(Err(ClientError::ScreenCaptureFailed(reason.clone())));
                }
            }
        }
    }

    async fn handle_stop_screen_share(&mut self) -> Result<(), ClientError> {
        let restored = {
            let media = self.media.as_mut().ok_or(ClientError::NotJoined)?;
            if !media.is_screen_sharing() {
                return Ok(());
            }
            media.stop_screen_share()
        };
        match restored {
            Some(camera) => self.swap_video_track(camera).await,
            // No camera to fall back to; peers must still stop receiving
            // the dead screen track
            None => self.remove_video_track().await,
        }
        self.broadcast_media_state().await;
        Ok(())
    }

    async fn handle_send_chat(&mut self, text: String) -> Result<(), ClientError> {
        if self.local_session.is_none() {
            return Err(ClientError::NotJoined);
        }
        self.send_signal(ClientMessage::Chat { text }).await;
        Ok(())
    }

    // ---- Signaling events ----

    async fn handle_signaling_event(&mut self, event: SignalingEvent) {
        // Stale events from a channel torn down by leave()
        if self.signaling.is_none() {
            return;
        }

        match event {
            SignalingEvent::Connected { attempt } => {
                if attempt > 1 {
                    self.metrics.record_reconnect();
                }
                if let Some(display_name) = self.display_name.clone() {
                    self.send_signal(ClientMessage::Join {
                        display_name,
                        participant_id: self.participant_id.clone(),
                    })
                    .await;
                }
            }

            SignalingEvent::Message(message) => {
                self.handle_server_message(message).await;
            }

            SignalingEvent::Lost => {
                self.set_status(ConnectionStatus::Reconnecting);
                let now = Instant::now();
                let remotes: Vec<SessionId> = self.sessions.keys().cloned().collect();
                for remote in remotes {
                    self.suspect_session(&remote, now);
                }
            }

            SignalingEvent::Failed { attempts } => {
                warn!(target: "rc.session.room", attempts, "signaling permanently failed");
                if let Some(pending) = self.pending_join.take() {
                    let _ = pending.send(Err(ClientError::SignalingFailed { attempts }));
                }
                self.fail_pending_screen_share();
                self.close_all_sessions().await;
                if let Some(media) = &mut self.media {
                    media.release();
                }
                self.signaling = None;
                self.signaling_task = None;
                self.set_status(ConnectionStatus::Failed);
            }
        }
    }

    async fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Welcome { session_id, roster } => {
                self.handle_welcome(session_id, roster).await;
            }

            ServerMessage::JoinRejected { reason } => {
                warn!(target: "rc.session.room", reason = %reason, "join rejected by relay");
                if let Some(pending) = self.pending_join.take() {
                    let _ = pending.send(Err(ClientError::JoinRejected(reason)));
                }
                if let Some(signaling) = self.signaling.take() {
                    signaling.disconnect();
                }
                self.signaling_task = None;
                self.set_status(ConnectionStatus::Failed);
            }

            ServerMessage::RosterUpdate { roster } => {
                self.apply_roster_snapshot(roster).await;
                self.emit_roster();
            }

            ServerMessage::ParticipantJoined { participant } => {
                if Some(&participant.session_id) == self.local_session.as_ref() {
                    return;
                }
                let session_id = participant.session_id.clone();
                let is_new = self.roster.apply_joined(participant);
                if is_new {
                    self.open_session(session_id).await;
                }
                self.emit_roster();
            }

            ServerMessage::ParticipantLeft { session_id } => {
                if self.roster.apply_left(&session_id).is_some() {
                    self.close_session(&session_id).await;
                    self.emit_roster();
                }
            }

            ServerMessage::MediaStateChanged {
                session_id,
                media_state,
                sent_at,
            } => {
                // Roster-only update; session wiring is never touched
                if self.roster.apply_media_state(&session_id, media_state, sent_at) {
                    self.emit_roster();
                }
            }

            ServerMessage::SessionOffer { from, description } => {
                self.handle_session_offer(from, description).await;
            }

            ServerMessage::SessionAnswer { from, description } => {
                let Some(session) = self.sessions.get_mut(&from) else {
                    debug!(target: "rc.session.room", from = %from, "discarding answer for unknown session");
                    return;
                };
                if let Err(e) = session.handle_answer(description).await {
                    warn!(target: "rc.session.room", from = %from, error = %e, "answer failed, closing session");
                    self.close_session(&from).await;
                }
            }

            ServerMessage::NetworkCandidate { from, candidate } => {
                let Some(session) = self.sessions.get_mut(&from) else {
                    debug!(target: "rc.session.room", from = %from, "discarding candidate for unknown session");
                    return;
                };
                if let Err(e) = session.handle_candidate(candidate).await {
                    warn!(target: "rc.session.room", from = %from, error = %e, "candidate rejected");
                }
            }

            ServerMessage::Chat(payload) => {
                let entry = ChatEntry::from_payload(payload);
                self.chat.push(entry.clone());
                self.emit(RoomEvent::ChatReceived(entry));
            }

            ServerMessage::SystemMessage { text, timestamp } => {
                let entry = ChatEntry::system(text, timestamp);
                self.chat.push(entry.clone());
                self.emit(RoomEvent::ChatReceived(entry));
            }

            ServerMessage::Typing { session_id, typing } => {
                self.emit(RoomEvent::TypingChanged { session_id, typing });
            }
        }
    }

    async fn handle_welcome(&mut self, session_id: SessionId, roster: Vec<Participant>) {
        let resync = self.local_session.is_some();
        info!(
            target: "rc.session.room",
            session_id = %session_id,
            participants = roster.len(),
            resync,
            "welcomed into room"
        );
        self.local_session = Some(session_id.clone());

        self.apply_roster_snapshot(roster).await;

        if resync {
            // Suspect sessions whose peer never left self-heal here; a
            // genuinely dead path re-reports PathLost and re-suspects
            let recovered: Vec<SessionId> = self
                .sessions
                .values_mut()
                .filter_map(|s| s.recover().then(|| s.remote().clone()))
                .collect();
            for remote in recovered {
                self.emit(RoomEvent::PeerRecovered {
                    session_id: remote,
                });
            }

            // The relay assigned us a fresh session id, so the tie-break
            // for every kept pair was re-decided. Peers saw us rejoin and
            // replaced their side; where the new id makes us the offerer
            // they now wait on us, so re-run the handshake over the kept
            // link.
            let reoffer: Vec<SessionId> = self
                .sessions
                .keys()
                .filter(|remote| PeerRole::decide(&session_id, remote) == PeerRole::Offerer)
                .cloned()
                .collect();
            for remote in reoffer {
                debug!(target: "rc.session.room", remote = %remote, "re-offering after resync");
                self.renegotiate(&remote).await;
            }
        }

        if let Some(pending) = self.pending_join.take() {
            let profile = self
                .media
                .as_ref()
                .map_or(crate::media::MediaProfile::ChatOnly, MediaPipeline::profile);
            let _ = pending.send(Ok(JoinOutcome {
                session_id,
                profile,
                warnings: std::mem::take(&mut self.join_warnings),
            }));
        }

        self.set_status(ConnectionStatus::Connected);
        self.emit_roster();

        // Advertise our current flags; the snapshot the others hold for us
        // defaulted to everything-on
        self.broadcast_media_state().await;
    }

    /// Prune-and-resync against a full roster snapshot.
    async fn apply_roster_snapshot(&mut self, roster: Vec<Participant>) {
        let local = self.local_session.clone();
        let filtered: Vec<Participant> = roster
            .into_iter()
            .filter(|p| Some(&p.session_id) != local.as_ref())
            .collect();

        let diff = self.roster.apply_snapshot(filtered);
        for removed in diff.removed {
            debug!(target: "rc.session.room", session_id = %removed, "pruning departed participant");
            self.close_session(&removed).await;
        }
        for added in diff.added {
            self.open_session(added).await;
        }
    }

    async fn handle_session_offer(
        &mut self,
        from: SessionId,
        description: signal_protocol::SessionDescription,
    ) {
        if !self.sessions.contains_key(&from) {
            // An offer can beat the roster broadcast; accept it for anyone
            // the roster already knows, discard the rest
            if self.roster.contains(&from) {
                self.open_session(from.clone()).await;
            } else {
                debug!(target: "rc.session.room", from = %from, "discarding offer from unknown session");
                return;
            }
        }

        let tracks = self.local_tracks();
        let answer = match self.sessions.get_mut(&from) {
            Some(session) => session.handle_offer(description, &tracks).await,
            None => return,
        };

        match answer {
            Ok(Some(answer)) => {
                self.send_signal(ClientMessage::SessionAnswer {
                    target: from,
                    description: answer,
                })
                .await;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(target: "rc.session.room", from = %from, error = %e, "offer failed, closing session");
                self.close_session(&from).await;
            }
        }
    }

    // ---- Peer link events ----

    fn handle_transport_event(&mut self, event: TransportEvent) {
        let Some(session) = self.sessions.get_mut(&event.remote) else {
            return;
        };

        match event.kind {
            TransportEventKind::PathConnected | TransportEventKind::PathRecovered => {
                let prior = session.path_connected();
                if matches!(prior, PeerState::Suspect { .. }) {
                    self.emit(RoomEvent::PeerRecovered {
                        session_id: event.remote,
                    });
                }
            }

            TransportEventKind::PathLost => {
                let was_suspect = matches!(session.state(), PeerState::Suspect { .. });
                session.mark_suspect(Instant::now());
                if !was_suspect && matches!(session.state(), PeerState::Suspect { .. }) {
                    self.emit(RoomEvent::PeerReconnecting {
                        session_id: event.remote,
                    });
                }
            }

            TransportEventKind::RemoteTrackAdded(track) => {
                self.emit(RoomEvent::RemoteMediaAttached {
                    session_id: event.remote,
                    track,
                });
            }

            TransportEventKind::RemoteTrackRemoved(_) => {
                self.emit(RoomEvent::RemoteMediaDetached {
                    session_id: event.remote,
                });
            }
        }
    }

    // ---- Capture events ----

    async fn handle_capture_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::ScreenEnded { track_id } => {
                // Same path as an explicit stop
                let current = self
                    .media
                    .as_ref()
                    .is_some_and(|m| m.is_current_screen(&track_id));
                if current {
                    info!(target: "rc.session.room", "screen track ended externally");
                    let _ = self.handle_stop_screen_share().await;
                }
            }
        }
    }

    // ---- Session table ----

    async fn open_session(&mut self, remote: SessionId) {
        let Some(local) = self.local_session.clone() else {
            return;
        };

        // A replacement closes the old session fully before the new
        // handshake starts
        if let Some(mut old) = self.sessions.remove(&remote) {
            old.close().await;
            self.metrics.record_session_closed();
            self.emit(RoomEvent::RemoteMediaDetached {
                session_id: remote.clone(),
            });
        }

        let role = PeerRole::decide(&local, &remote);
        let link = match self
            .transport
            .create_link(local, remote.clone(), self.transport_tx.clone())
            .await
        {
            Ok(link) => link,
            Err(e) => {
                warn!(target: "rc.session.room", remote = %remote, error = %e, "link setup failed");
                return;
            }
        };

        debug!(target: "rc.session.room", remote = %remote, ?role, "opening peer session");
        let mut session = PeerSession::new(remote.clone(), role, link);
        self.metrics.record_session_opened();

        if role == PeerRole::Offerer {
            let tracks = self.local_tracks();
            match session.create_offer(&tracks).await {
                Ok(Some(offer)) => {
                    self.send_signal(ClientMessage::SessionOffer {
                        target: remote.clone(),
                        description: offer,
                    })
                    .await;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(target: "rc.session.room", remote = %remote, error = %e, "initial offer failed");
                    session.close().await;
                    self.metrics.record_session_closed();
                    return;
                }
            }
        }

        self.sessions.insert(remote, session);
    }

    async fn close_session(&mut self, remote: &SessionId) {
        if let Some(mut session) = self.sessions.remove(remote) {
            session.close().await;
            self.metrics.record_session_closed();
            self.emit(RoomEvent::RemoteMediaDetached {
                session_id: remote.clone(),
            });
        }
    }

    async fn close_all_sessions(&mut self) {
        let remotes: Vec<SessionId> = self.sessions.keys().cloned().collect();
        for remote in remotes {
            self.close_session(&remote).await;
        }
    }

    fn suspect_session(&mut self, remote: &SessionId, now: Instant) {
        if let Some(session) = self.sessions.get_mut(remote) {
            let was_suspect = matches!(session.state(), PeerState::Suspect { .. });
            session.mark_suspect(now);
            if !was_suspect && matches!(session.state(), PeerState::Suspect { .. }) {
                self.emit(RoomEvent::PeerReconnecting {
                    session_id: remote.clone(),
                });
            }
        }
    }

    async fn check_suspect_timeouts(&mut self) {
        let now = Instant::now();
        let grace = self.config.suspect_grace_period;
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.suspect_expired(now, grace))
            .map(|(id, _)| id.clone())
            .collect();

        for remote in expired {
            info!(target: "rc.session.room", remote = %remote, "suspect grace expired, closing session");
            self.close_session(&remote).await;
        }
    }

    // ---- Media helpers ----

    async fn swap_video_track(&mut self, track: LocalTrack) {
        let remotes: Vec<SessionId> = self.sessions.keys().cloned().collect();
        for remote in remotes {
            let need = match self.sessions.get_mut(&remote) {
                Some(session) if !session.is_closed() => {
                    session.replace_video_track(track.clone()).await
                }
                _ => continue,
            };

            match need {
                Ok(RenegotiationNeed::None) => {}
                Ok(RenegotiationNeed::Required) => {
                    self.renegotiate(&remote).await;
                }
                Err(e) => {
                    warn!(target: "rc.session.room", remote = %remote, error = %e, "track swap failed");
                }
            }
        }
    }

    /// Detach the outgoing video track from every live session.
    async fn remove_video_track(&mut self) {
        let remotes: Vec<SessionId> = self.sessions.keys().cloned().collect();
        for remote in remotes {
            let need = match self.sessions.get_mut(&remote) {
                Some(session) if !session.is_closed() => session.remove_video_track().await,
                _ => continue,
            };

            match need {
                Ok(RenegotiationNeed::None) => {}
                Ok(RenegotiationNeed::Required) => {
                    self.renegotiate(&remote).await;
                }
                Err(e) => {
                    warn!(target: "rc.session.room", remote = %remote, error = %e, "video detach failed");
                }
            }
        }
    }

    /// Re-run the offer over the existing link; the session itself is
    /// never torn down for a renegotiation.
    async fn renegotiate(&mut self, remote: &SessionId) {
        self.metrics.record_renegotiation();
        let tracks = self.local_tracks();
        let offer = match self.sessions.get_mut(remote) {
            Some(session) => session.create_offer(&tracks).await,
            None => return,
        };

        match offer {
            Ok(Some(offer)) => {
                self.send_signal(ClientMessage::SessionOffer {
                    target: remote.clone(),
                    description: offer,
                })
                .await;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(target: "rc.session.room", remote = %remote, error = %e, "renegotiation offer failed");
            }
        }
    }

    fn local_tracks(&self) -> Vec<LocalTrack> {
        self.media
            .as_ref()
            .map(MediaPipeline::local_tracks)
            .unwrap_or_default()
    }

    async fn broadcast_media_state(&mut self) {
        let Some(media) = &self.media else { return };
        let media_state = media.media_state();
        self.send_signal(ClientMessage::MediaStateChanged {
            media_state,
            sent_at: chrono::Utc::now(),
        })
        .await;
    }

    // ---- Plumbing ----

    async fn send_signal(&self, message: ClientMessage) {
        if let Some(signaling) = &self.signaling {
            if let Err(e) = signaling.send(message).await {
                warn!(target: "rc.session.room", error = %e, "signaling send failed");
            }
        }
    }

    fn get_status(&self) -> RoomStatus {
        RoomStatus {
            connection: self.status,
            session_id: self.local_session.clone(),
            media_state: self
                .media
                .as_ref()
                .map_or(
                    MediaState {
                        camera_on: false,
                        mic_on: false,
                        screen_sharing: false,
                    },
                    MediaPipeline::media_state,
                ),
            peer_sessions: self.sessions.values().filter(|s| !s.is_closed()).count(),
            connected_peers: self.sessions.values().filter(|s| s.is_connected()).count(),
        }
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            self.status = status;
            self.emit(RoomEvent::ConnectionStatusChanged(status));
        }
    }

    fn emit_roster(&self) {
        self.emit(RoomEvent::RosterChanged(
            self.roster.participants().to_vec(),
        ));
    }

    fn emit(&self, event: RoomEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn fail_pending_screen_share(&mut self) {
        self.screen_epoch += 1;
        for waiter in self.pending_screen_share.drain(..) {
            let _ = waiter.send(Err(ClientError::Closed));
        }
    }

    async fn graceful_shutdown(&mut self) {
        if let Some(pending) = self.pending_join.take() {
            let _ = pending.send(Err(ClientError::Closed));
        }
        self.fail_pending_screen_share();
        if let Some(signaling) = self.signaling.take() {
            let _ = signaling.send(ClientMessage::Leave).await;
            signaling.disconnect();
        }
        self.close_all_sessions().await;
        if let Some(media) = &mut self.media {
            media.release();
        }
    }
}
