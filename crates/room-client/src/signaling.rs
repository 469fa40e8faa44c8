//! Signaling channel.
//!
//! Owns the connection to the signaling relay and hides its flakiness from
//! the orchestrator: on loss it reconnects with bounded exponential backoff
//! and reports `Connected { attempt }` so the orchestrator can replay its
//! Join; after exhausting attempts it reports `Failed` and exits.
//!
//! Messages sent while the channel is down are dropped with a warning. The
//! join replay after reconnect reconstructs all state the dropped messages
//! would have carried, so queuing them would only deliver stale updates.

use crate::config::Config;
use crate::errors::ClientError;
use async_trait::async_trait;
use signal_protocol::{ClientMessage, ServerMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Outbound mailbox depth. Sends block briefly at this depth rather than
/// growing without bound.
const OUTBOUND_BUFFER: usize = 64;

/// Error type for signaling transport operations.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Could not reach the relay.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// The relay refused the connection.
    #[error("Connection refused: {0}")]
    Refused(String),
}

/// One live connection to the relay: an ordered outbound sink and an
/// ordered inbound stream. Dropping either half closes the connection.
pub struct SignalConnection {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<ServerMessage>,
}

/// Signaling transport capability. Real implementations dial a relay;
/// tests connect to an in-memory one.
#[async_trait]
pub trait SignalConnector: Send + Sync {
    /// Establish one connection to the relay.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay is unreachable.
    async fn connect(&self) -> Result<SignalConnection, SignalError>;
}

/// What the channel task reports to the orchestrator.
#[derive(Debug)]
pub enum SignalingEvent {
    /// Connection established. `attempt` is 1 for a first-try connect and
    /// counts retries otherwise; any value above 1 means state must be
    /// rebuilt by replaying Join.
    Connected { attempt: u32 },

    /// A relay message arrived.
    Message(ServerMessage),

    /// Connection dropped; reconnection is starting.
    Lost,

    /// All reconnect attempts exhausted. The channel task has exited.
    Failed { attempts: u32 },
}

/// Handle to the signaling channel task.
#[derive(Clone)]
pub struct SignalingHandle {
    outbound_tx: mpsc::Sender<ClientMessage>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl SignalingHandle {
    /// Send one message to the relay.
    ///
    /// While disconnected the message is dropped with a warning rather than
    /// queued; see the module docs.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel task has exited.
    pub async fn send(&self, msg: ClientMessage) -> Result<(), ClientError> {
        if !self.is_connected() {
            warn!(target: "rc.signaling", "dropping outbound message while disconnected");
            return Ok(());
        }
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| ClientError::Closed)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Stop the channel task. Idempotent.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }
}

/// The reconnecting channel task.
pub struct SignalingChannel {
    connector: Arc<dyn SignalConnector>,
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    outbound_rx: mpsc::Receiver<ClientMessage>,
    connected: Arc<AtomicBool>,
    events: mpsc::Sender<SignalingEvent>,
    cancel: CancellationToken,
}

impl SignalingChannel {
    /// Spawn the channel task.
    pub fn spawn(
        connector: Arc<dyn SignalConnector>,
        config: &Config,
        events: mpsc::Sender<SignalingEvent>,
        cancel: CancellationToken,
    ) -> (SignalingHandle, JoinHandle<()>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let connected = Arc::new(AtomicBool::new(false));

        let channel = SignalingChannel {
            connector,
            base_delay: config.reconnect_base_delay,
            max_delay: config.reconnect_max_delay,
            max_attempts: config.reconnect_max_attempts,
            outbound_rx,
            connected: Arc::clone(&connected),
            events,
            cancel: cancel.clone(),
        };

        let handle = SignalingHandle {
            outbound_tx,
            connected,
            cancel,
        };

        let join = tokio::spawn(channel.run());
        (handle, join)
    }

    #[instrument(skip_all, name = "signaling_channel")]
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            attempt += 1;
            match self.connector.connect().await {
                Ok(conn) => {
                    info!(target: "rc.signaling", attempt, "connected to relay");
                    self.connected.store(true, Ordering::Release);
                    if self
                        .events
                        .send(SignalingEvent::Connected { attempt })
                        .await
                        .is_err()
                    {
                        break;
                    }
                    attempt = 0;

                    let open = self.pump(conn).await;
                    self.connected.store(false, Ordering::Release);
                    if !open {
                        break;
                    }

                    info!(target: "rc.signaling", "connection lost, reconnecting");
                    if self.events.send(SignalingEvent::Lost).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    if attempt >= self.max_attempts {
                        warn!(
                            target: "rc.signaling",
                            attempts = attempt,
                            error = %e,
                            "reconnect attempts exhausted"
                        );
                        let _ = self
                            .events
                            .send(SignalingEvent::Failed { attempts: attempt })
                            .await;
                        break;
                    }

                    let delay = self.backoff(attempt);
                    debug!(
                        target: "rc.signaling",
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "connect failed, backing off"
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.connected.store(false, Ordering::Release);
        debug!(target: "rc.signaling", "signaling channel task exiting");
    }

    /// Shuttle messages over one live connection. Returns false when the
    /// orchestrator is gone or shutdown was requested.
    async fn pump(&mut self, mut conn: SignalConnection) -> bool {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return false,

                outbound = self.outbound_rx.recv() => {
                    match outbound {
                        Some(msg) => {
                            if conn.outbound.send(msg).await.is_err() {
                                warn!(target: "rc.signaling", "outbound send hit closed connection");
                                return true;
                            }
                        }
                        // All handles dropped
                        None => return false,
                    }
                }

                inbound = conn.inbound.recv() => {
                    match inbound {
                        Some(msg) => {
                            if self.events.send(SignalingEvent::Message(msg)).await.is_err() {
                                return false;
                            }
                        }
                        None => return true,
                    }
                }
            }
        }
    }

    /// Exponential backoff: base doubled per attempt, capped.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1_u32 << exp);
        delay.min(self.max_delay)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Server-side halves kept by the test to drive a scripted connection.
    struct ServerSide {
        to_client: mpsc::Sender<ServerMessage>,
        from_client: mpsc::Receiver<ClientMessage>,
    }

    /// Connector that replays a script of connect outcomes.
    struct ScriptedConnector {
        script: Mutex<VecDeque<Result<SignalConnection, SignalError>>>,
    }

    impl ScriptedConnector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(VecDeque::new()),
            })
        }

        fn push_failure(&self) {
            self.script
                .lock()
                .unwrap()
                .push_back(Err(SignalError::Connect("refused".to_string())));
        }

        fn push_success(&self) -> ServerSide {
            let (out_tx, out_rx) = mpsc::channel(16);
            let (in_tx, in_rx) = mpsc::channel(16);
            self.script.lock().unwrap().push_back(Ok(SignalConnection {
                outbound: out_tx,
                inbound: in_rx,
            }));
            ServerSide {
                to_client: in_tx,
                from_client: out_rx,
            }
        }
    }

    #[async_trait]
    impl SignalConnector for ScriptedConnector {
        async fn connect(&self) -> Result<SignalConnection, SignalError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(SignalError::Connect("script exhausted".to_string())))
        }
    }

    fn test_config() -> Config {
        Config {
            reconnect_max_attempts: 3,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_connects_and_forwards_messages() {
        let connector = ScriptedConnector::new();
        let mut server = connector.push_success();

        let (event_tx, mut event_rx) = mpsc::channel(16);
        let (handle, _join) = SignalingChannel::spawn(
            connector,
            &test_config(),
            event_tx,
            CancellationToken::new(),
        );

        assert!(matches!(
            event_rx.recv().await.unwrap(),
            SignalingEvent::Connected { attempt: 1 }
        ));
        assert!(handle.is_connected());

        // Inbound relay traffic surfaces as events
        server
            .to_client
            .send(ServerMessage::SystemMessage {
                text: "hello".to_string(),
                timestamp: chrono::Utc::now(),
            })
            .await
            .unwrap();
        assert!(matches!(
            event_rx.recv().await.unwrap(),
            SignalingEvent::Message(ServerMessage::SystemMessage { .. })
        ));

        // Outbound traffic reaches the relay
        handle.send(ClientMessage::Leave).await.unwrap();
        assert_eq!(server.from_client.recv().await.unwrap(), ClientMessage::Leave);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_loss_with_attempt_count() {
        let connector = ScriptedConnector::new();
        let first = connector.push_success();
        connector.push_failure();
        let _second = connector.push_success();

        let (event_tx, mut event_rx) = mpsc::channel(16);
        let (_handle, _join) = SignalingChannel::spawn(
            connector,
            &test_config(),
            event_tx,
            CancellationToken::new(),
        );

        assert!(matches!(
            event_rx.recv().await.unwrap(),
            SignalingEvent::Connected { attempt: 1 }
        ));

        // Server drops the connection
        drop(first);

        assert!(matches!(event_rx.recv().await.unwrap(), SignalingEvent::Lost));
        // One failed attempt, then success on the second
        assert!(matches!(
            event_rx.recv().await.unwrap(),
            SignalingEvent::Connected { attempt: 2 }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_after_max_attempts_with_backoff() {
        let connector = ScriptedConnector::new();
        connector.push_failure();
        connector.push_failure();
        connector.push_failure();

        let (event_tx, mut event_rx) = mpsc::channel(16);
        let started = Instant::now();
        let (handle, join) = SignalingChannel::spawn(
            connector,
            &test_config(),
            event_tx,
            CancellationToken::new(),
        );

        assert!(matches!(
            event_rx.recv().await.unwrap(),
            SignalingEvent::Failed { attempts: 3 }
        ));

        // Backoff slept 1s after the first failure and 2s after the second
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert!(!handle.is_connected());
        join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_capped() {
        let config = Config::default();
        let connector = ScriptedConnector::new();
        let channel = SignalingChannel {
            connector,
            base_delay: config.reconnect_base_delay,
            max_delay: config.reconnect_max_delay,
            max_attempts: config.reconnect_max_attempts,
            outbound_rx: mpsc::channel(1).1,
            connected: Arc::new(AtomicBool::new(false)),
            events: mpsc::channel(1).0,
            cancel: CancellationToken::new(),
        };

        assert_eq!(channel.backoff(1), Duration::from_secs(1));
        assert_eq!(channel.backoff(2), Duration::from_secs(2));
        assert_eq!(channel.backoff(3), Duration::from_secs(4));
        // Capped at the configured max from here on
        assert_eq!(channel.backoff(4), Duration::from_secs(5));
        assert_eq!(channel.backoff(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_dropped() {
        let connector = ScriptedConnector::new();
        let mut server = connector.push_success();

        let (event_tx, mut event_rx) = mpsc::channel(16);
        let (handle, _join) = SignalingChannel::spawn(
            connector,
            &test_config(),
            event_tx,
            CancellationToken::new(),
        );

        assert!(matches!(
            event_rx.recv().await.unwrap(),
            SignalingEvent::Connected { .. }
        ));

        // Kill the connection and wait for the channel to notice
        server.from_client.close();
        drop(server.to_client);
        assert!(matches!(event_rx.recv().await.unwrap(), SignalingEvent::Lost));

        // The drop is silent success, not an error
        handle.send(ClientMessage::Leave).await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_stops_the_task() {
        let connector = ScriptedConnector::new();
        let _server = connector.push_success();

        let (event_tx, mut event_rx) = mpsc::channel(16);
        let (handle, join) = SignalingChannel::spawn(
            connector,
            &test_config(),
            event_tx,
            CancellationToken::new(),
        );

        assert!(matches!(
            event_rx.recv().await.unwrap(),
            SignalingEvent::Connected { .. }
        ));

        handle.disconnect();
        join.await.unwrap();
        assert!(!handle.is_connected());
    }
}
