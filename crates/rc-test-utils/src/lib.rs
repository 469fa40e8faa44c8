//! # Roomlink Test Utilities
//!
//! Shared test utilities for the Roomlink client core.
//!
//! This crate provides an in-memory signaling relay, a fake media
//! transport and a fake capture device so the client can be tested in
//! isolation, without a real network or real devices.
//!
//! ## Modules
//!
//! - `relay` - In-memory signaling relay implementing the wire protocol
//! - `fake_media` - Fake capture device and fake peer transport
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     init_test_tracing();
//!
//!     let relay = MockRelay::spawn();
//!     let transport = FakeTransport::new();
//!     let capture = FakeCapture::all_devices();
//!
//!     let (room, _task) = RoomActor::spawn(
//!         relay.connector(),
//!         Arc::new(transport.clone()),
//!         capture,
//!         Config::default(),
//!     );
//!
//!     let outcome = room.join("Alice").await.unwrap();
//!     // Drive the relay, assert on traffic counters...
//! }
//! ```

pub mod fake_media;
pub mod relay;

pub use fake_media::*;
pub use relay::*;

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Idempotent; respects `RUST_LOG`.
pub fn init_test_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    });
}
