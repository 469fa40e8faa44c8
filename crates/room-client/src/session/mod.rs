//! Peer session orchestration.
//!
//! One `RoomActor` per joined room owns every piece of mutable session
//! state: the roster, the peer session table, the media pipeline and the
//! chat log. All mutation happens on its event loop, fed by the public
//! `RoomHandle`, the signaling channel, the peer links and the capture
//! device.

pub mod commands;
pub mod metrics;
pub mod peer;
pub mod room;

pub use commands::{JoinOutcome, RoomCommand, RoomStatus};
pub use metrics::SessionMetrics;
pub use peer::{PeerRole, PeerSession, PeerState};
pub use room::{RoomActor, RoomHandle};
