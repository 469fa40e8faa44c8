//! Integration tests for signaling outages and media path loss.
//!
//! These run under paused tokio time so backoff delays and grace windows
//! elapse deterministically.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use rc_test_utils::{init_test_tracing, FakeCapture, FakeTransport, MockRelay};
use room_client::events::{ConnectionStatus, RoomEvent};
use room_client::{Config, RoomActor, RoomHandle};
use signal_protocol::SessionId;

// ============================================================================
// Harness
// ============================================================================

struct Client {
    handle: RoomHandle,
    transport: FakeTransport,
    session_id: SessionId,
}

async fn join_client(relay: &MockRelay, name: &str, config: Config) -> Client {
    let transport = FakeTransport::new();
    let (handle, _task) = RoomActor::spawn(
        relay.connector(),
        Arc::new(transport.clone()),
        FakeCapture::all_devices(),
        config,
    );
    let outcome = handle.join(name).await.unwrap();
    Client {
        handle,
        transport,
        session_id: outcome.session_id,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

async fn wait_for_event<F>(
    rx: &mut tokio::sync::broadcast::Receiver<RoomEvent>,
    mut pred: F,
) -> RoomEvent
where
    F: FnMut(&RoomEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(_) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("expected event was never emitted")
}

// ============================================================================
// Signaling outages
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_signaling_outage_reconnects_and_resyncs() {
    init_test_tracing();
    let relay = MockRelay::spawn();

    let alice = join_client(&relay, "Alice", Config::default()).await;
    let bob = join_client(&relay, "Bob", Config::default()).await;
    settle().await;

    let mut alice_events = alice.handle.subscribe();
    relay.drop_client(&alice.session_id).await;

    // Under paused time the whole outage can play out the moment the test
    // task yields, so the sequencing is asserted on the event stream, not
    // with status polls racing the reconnect. Bob's session rides out the
    // outage as Suspect, then heals off the fresh Welcome.
    wait_for_event(&mut alice_events, |e| {
        matches!(
            e,
            RoomEvent::ConnectionStatusChanged(ConnectionStatus::Reconnecting)
        )
    })
    .await;
    wait_for_event(&mut alice_events, |e| {
        matches!(e, RoomEvent::PeerReconnecting { session_id } if *session_id == bob.session_id)
    })
    .await;
    // The fresh Welcome heals the session first, then flips the status
    wait_for_event(&mut alice_events, |e| {
        matches!(e, RoomEvent::PeerRecovered { session_id } if *session_id == bob.session_id)
    })
    .await;
    wait_for_event(&mut alice_events, |e| {
        matches!(
            e,
            RoomEvent::ConnectionStatusChanged(ConnectionStatus::Connected)
        )
    })
    .await;
    settle().await;

    let status = alice.handle.status().await.unwrap();
    assert_eq!(status.connection, ConnectionStatus::Connected);
    assert_ne!(status.session_id, Some(alice.session_id.clone()));
    assert_eq!(status.peer_sessions, 1);
    assert_eq!(status.connected_peers, 1);

    // No duplicate roster entries on either side
    let alice_roster = alice.handle.roster().await.unwrap();
    assert_eq!(alice_roster.len(), 1);
    assert_eq!(alice_roster.first().unwrap().session_id, bob.session_id);

    let bob_roster = bob.handle.roster().await.unwrap();
    assert_eq!(bob_roster.len(), 1);
    assert_eq!(bob_roster.first().unwrap().session_id, status.session_id.unwrap());
    assert_eq!(relay.participants().await.len(), 2);

    // Bob converged on the replacement session, whichever side the new
    // tie-break put the offer on
    let bob_status = bob.handle.status().await.unwrap();
    assert_eq!(bob_status.peer_sessions, 1);
    assert_eq!(bob_status.connected_peers, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_tiebreak_flip_still_reconnects_both_sides() {
    init_test_tracing();
    // Scripted ids flip the offer/answer tie-break across the rejoin:
    // "w-alice" > "m-bob" makes Alice the answerer at first, while the
    // replacement id "d-alice" < "m-bob" makes her the offerer after.
    let relay = MockRelay::spawn_with_session_ids(&["w-alice", "m-bob", "d-alice"]);

    let alice = join_client(&relay, "Alice", Config::default()).await;
    let bob = join_client(&relay, "Bob", Config::default()).await;
    settle().await;
    assert_eq!(alice.session_id, SessionId::from("w-alice"));
    assert_eq!(bob.session_id, SessionId::from("m-bob"));
    assert_eq!(relay.offers_relayed(), 1);

    let mut bob_events = bob.handle.subscribe();
    relay.drop_client(&alice.session_id).await;

    // Bob replaces his side for the new id and sits waiting; Alice must
    // notice she now offers and re-run the handshake over her kept link
    wait_for_event(&mut bob_events, |e| {
        matches!(e, RoomEvent::RosterChanged(roster)
            if roster.iter().any(|p| p.session_id == SessionId::from("d-alice")))
    })
    .await;
    settle().await;

    let bob_status = bob.handle.status().await.unwrap();
    assert_eq!(bob_status.peer_sessions, 1);
    assert_eq!(bob_status.connected_peers, 1);

    let alice_status = alice.handle.status().await.unwrap();
    assert_eq!(alice_status.session_id, Some(SessionId::from("d-alice")));
    assert_eq!(alice_status.connected_peers, 1);

    // One fresh exchange on top of the initial pair handshake
    assert_eq!(relay.offers_relayed(), 2);
    assert_eq!(relay.answers_relayed(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_departed_peer_is_pruned_on_resync() {
    init_test_tracing();
    let relay = MockRelay::spawn();

    let alice = join_client(&relay, "Alice", Config::default()).await;
    let bob = join_client(&relay, "Bob", Config::default()).await;
    let carol = join_client(&relay, "Carol", Config::default()).await;
    settle().await;

    // Bob leaves while Alice cannot hear the announcement. Subscribe
    // before the outage: under paused time the reconnect can complete
    // before a later subscribe would see Connected.
    let mut alice_events = alice.handle.subscribe();
    relay.drop_client(&alice.session_id).await;
    bob.handle.leave().await.unwrap();

    wait_for_event(&mut alice_events, |e| {
        matches!(
            e,
            RoomEvent::ConnectionStatusChanged(ConnectionStatus::Reconnecting)
        )
    })
    .await;
    // Bob's session is torn down off the Welcome snapshot (no Left was
    // heard), which precedes the status flip
    wait_for_event(&mut alice_events, |e| {
        matches!(e, RoomEvent::RemoteMediaDetached { session_id } if *session_id == bob.session_id)
    })
    .await;
    wait_for_event(&mut alice_events, |e| {
        matches!(
            e,
            RoomEvent::ConnectionStatusChanged(ConnectionStatus::Connected)
        )
    })
    .await;
    settle().await;

    // The Welcome snapshot is truth: Bob pruned, Carol kept
    let roster = alice.handle.roster().await.unwrap();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster.first().unwrap().session_id, carol.session_id);

    let status = alice.handle.status().await.unwrap();
    assert_eq!(status.peer_sessions, 1);
    assert_eq!(status.connected_peers, 1);

    // Carol converged on Alice's replacement session too
    let carol_status = carol.handle.status().await.unwrap();
    assert_eq!(carol_status.peer_sessions, 1);
    assert_eq!(carol_status.connected_peers, 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_reconnects_fail_the_room() {
    init_test_tracing();
    let relay = MockRelay::spawn();

    let config = Config {
        reconnect_max_attempts: 2,
        ..Config::default()
    };
    let alice = join_client(&relay, "Alice", config).await;
    settle().await;

    let mut events = alice.handle.subscribe();

    // Stopping the relay kills the connection and every reconnect attempt
    drop(relay);

    wait_for_event(&mut events, |e| {
        matches!(
            e,
            RoomEvent::ConnectionStatusChanged(ConnectionStatus::Reconnecting)
        )
    })
    .await;
    wait_for_event(&mut events, |e| {
        matches!(
            e,
            RoomEvent::ConnectionStatusChanged(ConnectionStatus::Failed)
        )
    })
    .await;

    let status = alice.handle.status().await.unwrap();
    assert_eq!(status.connection, ConnectionStatus::Failed);
    assert_eq!(status.peer_sessions, 0);
}

// ============================================================================
// Media path loss
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_suspect_grace_expiry_closes_session() {
    init_test_tracing();
    let relay = MockRelay::spawn();

    let alice = join_client(&relay, "Alice", Config::default()).await;
    let bob = join_client(&relay, "Bob", Config::default()).await;
    settle().await;

    let mut alice_events = alice.handle.subscribe();
    alice.transport.fail_path(&bob.session_id).await;

    wait_for_event(&mut alice_events, |e| {
        matches!(e, RoomEvent::PeerReconnecting { session_id } if *session_id == bob.session_id)
    })
    .await;
    let suspect = alice.handle.status().await.unwrap();
    assert_eq!(suspect.peer_sessions, 1);
    assert_eq!(suspect.connected_peers, 0);

    // Default grace is ten seconds
    tokio::time::sleep(Duration::from_secs(11)).await;

    wait_for_event(&mut alice_events, |e| {
        matches!(e, RoomEvent::RemoteMediaDetached { session_id } if *session_id == bob.session_id)
    })
    .await;
    let status = alice.handle.status().await.unwrap();
    assert_eq!(status.peer_sessions, 0);
}

#[tokio::test(start_paused = true)]
async fn test_path_recovery_within_grace_keeps_session() {
    init_test_tracing();
    let relay = MockRelay::spawn();

    let alice = join_client(&relay, "Alice", Config::default()).await;
    let bob = join_client(&relay, "Bob", Config::default()).await;
    settle().await;

    let mut alice_events = alice.handle.subscribe();
    alice.transport.fail_path(&bob.session_id).await;
    wait_for_event(&mut alice_events, |e| {
        matches!(e, RoomEvent::PeerReconnecting { .. })
    })
    .await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    alice.transport.recover_path(&bob.session_id).await;

    wait_for_event(&mut alice_events, |e| {
        matches!(e, RoomEvent::PeerRecovered { session_id } if *session_id == bob.session_id)
    })
    .await;

    // Well past the original grace deadline; the session must survive
    tokio::time::sleep(Duration::from_secs(15)).await;
    let status = alice.handle.status().await.unwrap();
    assert_eq!(status.peer_sessions, 1);
    assert_eq!(status.connected_peers, 1);
    assert_eq!(alice.transport.open_links(), 1);
}
