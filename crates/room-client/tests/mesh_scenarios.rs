//! Integration tests for the full-mesh session lifecycle.
//!
//! Each test wires one or more room actors to an in-memory relay, a fake
//! peer transport and a fake capture device, then asserts on roster
//! convergence, session wiring and relayed signaling traffic.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use rc_test_utils::{init_test_tracing, FakeCapture, FakeTransport, MockRelay};
use room_client::errors::ClientError;
use room_client::events::{ConnectionStatus, RoomEvent};
use room_client::media::MediaProfile;
use room_client::{Config, RoomActor, RoomHandle};
use signal_protocol::SessionId;

// ============================================================================
// Harness
// ============================================================================

/// One client wired to the shared relay, already joined.
struct Client {
    handle: RoomHandle,
    transport: FakeTransport,
    capture: Arc<FakeCapture>,
    session_id: SessionId,
}

async fn join_client(relay: &MockRelay, name: &str) -> Client {
    join_client_with_capture(relay, name, FakeCapture::all_devices()).await
}

async fn join_client_with_capture(
    relay: &MockRelay,
    name: &str,
    capture: Arc<FakeCapture>,
) -> Client {
    let transport = FakeTransport::new();
    let (handle, _task) = RoomActor::spawn(
        relay.connector(),
        Arc::new(transport.clone()),
        Arc::clone(&capture) as Arc<dyn room_client::media::MediaCapture>,
        Config::default(),
    );
    let outcome = handle.join(name).await.unwrap();
    Client {
        handle,
        transport,
        capture,
        session_id: outcome.session_id,
    }
}

/// Let the actors drain their mailboxes.
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
    tokio::time::timeout(Duration::from_secs(5), async {
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
// Roster and mesh formation
// ============================================================================

#[tokio::test]
async fn test_three_party_mesh_forms() {
    init_test_tracing();
    let relay = MockRelay::spawn();

    let alice = join_client(&relay, "Alice").await;
    let bob = join_client(&relay, "Bob").await;
    let carol = join_client(&relay, "Carol").await;
    settle().await;

    assert_eq!(relay.participants().await.len(), 3);

    for client in [&alice, &bob, &carol] {
        let status = client.handle.status().await.unwrap();
        assert_eq!(status.connection, ConnectionStatus::Connected);
        assert_eq!(status.peer_sessions, 2);
        assert_eq!(status.connected_peers, 2);
        assert_eq!(client.handle.roster().await.unwrap().len(), 2);
    }

    // One offer and one answer per pair, three pairs
    assert_eq!(relay.offers_relayed(), 3);
    assert_eq!(relay.answers_relayed(), 3);
}

#[tokio::test]
async fn test_leave_tears_down_only_own_sessions() {
    init_test_tracing();
    let relay = MockRelay::spawn();

    let alice = join_client(&relay, "Alice").await;
    let bob = join_client(&relay, "Bob").await;
    let carol = join_client(&relay, "Carol").await;
    settle().await;

    bob.handle.leave().await.unwrap();
    settle().await;

    let bob_status = bob.handle.status().await.unwrap();
    assert_eq!(bob_status.connection, ConnectionStatus::Left);
    assert_eq!(bob_status.peer_sessions, 0);
    assert_eq!(bob.transport.open_links(), 0);

    // Alice and Carol keep exactly their mutual session
    for client in [&alice, &carol] {
        let status = client.handle.status().await.unwrap();
        assert_eq!(status.connection, ConnectionStatus::Connected);
        assert_eq!(status.peer_sessions, 1);
        assert_eq!(status.connected_peers, 1);
        assert_eq!(client.handle.roster().await.unwrap().len(), 1);
        assert_eq!(client.transport.open_links(), 1);
    }

    assert_eq!(relay.participants().await.len(), 2);
}

#[tokio::test]
async fn test_leave_then_rejoin_gets_fresh_session() {
    init_test_tracing();
    let relay = MockRelay::spawn();

    let alice = join_client(&relay, "Alice").await;
    let bob = join_client(&relay, "Bob").await;
    settle().await;

    alice.handle.leave().await.unwrap();
    settle().await;

    let outcome = alice.handle.join("Alice").await.unwrap();
    settle().await;

    assert_ne!(outcome.session_id, alice.session_id);
    let bob_roster = bob.handle.roster().await.unwrap();
    assert_eq!(bob_roster.len(), 1);
    assert_eq!(
        bob_roster.first().unwrap().session_id,
        outcome.session_id
    );
    let status = alice.handle.status().await.unwrap();
    assert_eq!(status.connected_peers, 1);
}

#[tokio::test]
async fn test_room_capacity_rejects_join() {
    init_test_tracing();
    let relay = MockRelay::spawn_with_capacity(1);

    let _alice = join_client(&relay, "Alice").await;

    let (handle, _task) = RoomActor::spawn(
        relay.connector(),
        Arc::new(FakeTransport::new()),
        FakeCapture::all_devices(),
        Config::default(),
    );
    let err = handle.join("Bob").await.unwrap_err();
    assert!(matches!(err, ClientError::JoinRejected(_)));
    assert!(err.is_fatal());

    let status = handle.status().await.unwrap();
    assert_eq!(status.connection, ConnectionStatus::Failed);
}

// ============================================================================
// Media toggles and screen share
// ============================================================================

#[tokio::test]
async fn test_mute_toggles_produce_no_handshake_traffic() {
    init_test_tracing();
    let relay = MockRelay::spawn();

    let alice = join_client(&relay, "Alice").await;
    let bob = join_client(&relay, "Bob").await;
    settle().await;

    let baseline = relay.handshake_messages_relayed();

    assert!(!alice.handle.toggle_camera().await.unwrap());
    assert!(!alice.handle.toggle_microphone().await.unwrap());
    assert!(alice.handle.toggle_camera().await.unwrap());
    settle().await;

    // Flag flips ride the roster channel; no offers, answers or candidates
    assert_eq!(relay.handshake_messages_relayed(), baseline);
    assert_eq!(alice.transport.total_video_replacements(), 0);

    let bob_view = bob.handle.roster().await.unwrap();
    let alice_entry = bob_view
        .iter()
        .find(|p| p.session_id == alice.session_id)
        .unwrap();
    assert!(alice_entry.media_state.camera_on);
    assert!(!alice_entry.media_state.mic_on);
}

#[tokio::test]
async fn test_screen_share_swaps_track_in_place() {
    init_test_tracing();
    let relay = MockRelay::spawn();

    let alice = join_client(&relay, "Alice").await;
    let bob = join_client(&relay, "Bob").await;
    settle().await;

    let offers_before = relay.offers_relayed();

    alice.handle.start_screen_share().await.unwrap();
    settle().await;

    assert!(alice.handle.status().await.unwrap().media_state.screen_sharing);
    let bob_view = bob.handle.roster().await.unwrap();
    assert!(bob_view.first().unwrap().media_state.screen_sharing);

    alice.handle.stop_screen_share().await.unwrap();
    settle().await;

    assert!(!alice.handle.status().await.unwrap().media_state.screen_sharing);

    // Exactly two in-place swaps on the one live link, zero renegotiation
    let record = alice.transport.link_record(&bob.session_id);
    assert_eq!(record.video_replacements.len(), 2);
    assert!(record.video_replacements.first().unwrap().0.starts_with("screen"));
    assert!(record.video_replacements.get(1).unwrap().0.starts_with("camera"));
    assert_eq!(relay.offers_relayed(), offers_before);

    // The session never left Connected
    let status = alice.handle.status().await.unwrap();
    assert_eq!(status.peer_sessions, 1);
    assert_eq!(status.connected_peers, 1);
}

#[tokio::test]
async fn test_screen_share_renegotiates_only_when_required() {
    init_test_tracing();
    let relay = MockRelay::spawn();

    let alice = join_client(&relay, "Alice").await;
    let bob = join_client(&relay, "Bob").await;
    settle().await;

    alice
        .transport
        .require_renegotiation(room_client::transport::RenegotiationNeed::Required);
    let offers_before = relay.offers_relayed();
    let answers_before = relay.answers_relayed();

    alice.handle.start_screen_share().await.unwrap();
    settle().await;

    // One fresh offer/answer exchange over the existing link
    assert_eq!(relay.offers_relayed(), offers_before + 1);
    assert_eq!(relay.answers_relayed(), answers_before + 1);
    assert_eq!(alice.transport.open_links(), 1);

    let status = alice.handle.status().await.unwrap();
    assert_eq!(status.connected_peers, 1);
    let bob_status = bob.handle.status().await.unwrap();
    assert_eq!(bob_status.connected_peers, 1);
}

#[tokio::test]
async fn test_chat_flows_while_screen_prompt_is_open() {
    init_test_tracing();
    let relay = MockRelay::spawn();

    let alice = join_client(&relay, "Alice").await;
    let bob = join_client(&relay, "Bob").await;
    settle().await;

    // The prompt never gets answered; the room must not stall behind it
    alice.capture.hold_screen_acquisition(true);
    let sharer = alice.handle.clone();
    let pending_share = tokio::spawn(async move { sharer.start_screen_share().await });
    settle().await;

    let mut bob_events = bob.handle.subscribe();
    alice.handle.send_chat_message("still here").await.unwrap();
    wait_for_event(&mut bob_events, |e| {
        matches!(e, RoomEvent::ChatReceived(entry) if entry.text == "still here")
    })
    .await;

    // The share request is still pending, not failed
    assert!(!pending_share.is_finished());
    assert!(!alice.handle.status().await.unwrap().media_state.screen_sharing);
    pending_share.abort();
}

#[tokio::test]
async fn test_screen_share_failure_keeps_camera() {
    init_test_tracing();
    let relay = MockRelay::spawn();

    let alice = join_client(&relay, "Alice").await;
    let _bob = join_client(&relay, "Bob").await;
    settle().await;

    alice.capture.set_screen_available(false);
    let err = alice.handle.start_screen_share().await.unwrap_err();
    assert!(matches!(err, ClientError::ScreenCaptureFailed(_)));
    assert!(!err.is_fatal());

    let status = alice.handle.status().await.unwrap();
    assert!(!status.media_state.screen_sharing);
    assert!(status.media_state.camera_on);
    assert_eq!(alice.transport.total_video_replacements(), 0);
}

#[tokio::test]
async fn test_repeated_start_screen_share_is_idempotent() {
    init_test_tracing();
    let relay = MockRelay::spawn();

    let alice = join_client(&relay, "Alice").await;
    let _bob = join_client(&relay, "Bob").await;
    settle().await;

    alice.handle.start_screen_share().await.unwrap();
    alice.handle.start_screen_share().await.unwrap();
    settle().await;

    // One swap on the link, not two
    assert_eq!(alice.transport.total_video_replacements(), 1);
    assert!(alice.handle.status().await.unwrap().media_state.screen_sharing);
}

#[tokio::test]
async fn test_stopping_share_without_camera_detaches_video() {
    init_test_tracing();
    let relay = MockRelay::spawn();

    let alice = join_client_with_capture(&relay, "Alice", FakeCapture::no_camera()).await;
    let bob = join_client(&relay, "Bob").await;
    settle().await;

    alice.handle.start_screen_share().await.unwrap();
    settle().await;
    assert!(alice.handle.status().await.unwrap().media_state.screen_sharing);

    alice.handle.stop_screen_share().await.unwrap();
    settle().await;

    // No camera to restore; the link must drop the outgoing video rather
    // than keep pushing the dead screen track
    let record = alice.transport.link_record(&bob.session_id);
    assert_eq!(record.video_replacements.len(), 1);
    assert_eq!(record.video_removals, 1);
    assert!(!alice.handle.status().await.unwrap().media_state.screen_sharing);
}

#[tokio::test]
async fn test_externally_ended_screen_restores_camera() {
    init_test_tracing();
    let relay = MockRelay::spawn();

    let alice = join_client(&relay, "Alice").await;
    let _bob = join_client(&relay, "Bob").await;
    settle().await;

    alice.handle.start_screen_share().await.unwrap();
    settle().await;
    assert!(alice.handle.status().await.unwrap().media_state.screen_sharing);

    // The OS-level "stop sharing" control, not our API
    alice.capture.end_screen_track().await;
    settle().await;

    let status = alice.handle.status().await.unwrap();
    assert!(!status.media_state.screen_sharing);
    assert!(status.media_state.camera_on);
    assert_eq!(alice.transport.total_video_replacements(), 2);
}

#[tokio::test]
async fn test_degraded_capture_joins_audio_only() {
    init_test_tracing();
    let relay = MockRelay::spawn();

    let transport = FakeTransport::new();
    let (handle, _task) = RoomActor::spawn(
        relay.connector(),
        Arc::new(transport),
        FakeCapture::no_camera(),
        Config::default(),
    );
    let outcome = handle.join("Alice").await.unwrap();

    assert_eq!(outcome.profile, MediaProfile::AudioOnly);
    assert_eq!(outcome.warnings.len(), 1);

    let status = handle.status().await.unwrap();
    assert!(!status.media_state.camera_on);
    assert!(status.media_state.mic_on);
}

// ============================================================================
// Chat and presence
// ============================================================================

#[tokio::test]
async fn test_chat_echoes_to_sender_and_peers() {
    init_test_tracing();
    let relay = MockRelay::spawn();

    let alice = join_client(&relay, "Alice").await;
    let bob = join_client(&relay, "Bob").await;
    settle().await;

    let mut bob_events = bob.handle.subscribe();
    alice.handle.send_chat_message("hello room").await.unwrap();

    wait_for_event(&mut bob_events, |e| {
        matches!(e, RoomEvent::ChatReceived(entry) if entry.text == "hello room")
    })
    .await;

    for client in [&alice, &bob] {
        let history = client.handle.chat_history().await.unwrap();
        let chat = history
            .iter()
            .find(|e| e.text == "hello room")
            .expect("chat entry missing");
        assert_eq!(chat.sender_name, "Alice");
        assert_eq!(chat.sender_session, Some(alice.session_id.clone()));
        assert!(!chat.system);
    }

    // Alice was in the room when Bob joined, so she holds the notice
    let alice_history = alice.handle.chat_history().await.unwrap();
    assert!(alice_history
        .iter()
        .any(|e| e.system && e.text == "Bob joined the room"));
}

#[tokio::test]
async fn test_typing_presence_reaches_peers() {
    init_test_tracing();
    let relay = MockRelay::spawn();

    let alice = join_client(&relay, "Alice").await;
    let bob = join_client(&relay, "Bob").await;
    settle().await;

    let mut bob_events = bob.handle.subscribe();
    alice.handle.set_typing(true).await.unwrap();

    let event = wait_for_event(&mut bob_events, |e| {
        matches!(e, RoomEvent::TypingChanged { .. })
    })
    .await;
    match event {
        RoomEvent::TypingChanged { session_id, typing } => {
            assert_eq!(session_id, alice.session_id);
            assert!(typing);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
