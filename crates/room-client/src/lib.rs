//! Roomlink Client Core
//!
//! This library coordinates a multi-party, real-time media session over an
//! unreliable network: it keeps a full mesh of pairwise peer sessions
//! synchronized with each participant's media state, multiplexes a
//! chat/presence side-channel over the same signaling transport, and
//! survives participant churn and signaling outages without leaking
//! sessions or duplicating media tracks.
//!
//! # Architecture
//!
//! One actor owns all mutable state; everything else feeds its mailbox:
//!
//! ```text
//! RoomActor (one per joined room)
//! ├── owns the roster, the peer-session table, media pipeline, chat log
//! ├── consumes RoomCommands from RoomHandle (the public API)
//! ├── consumes SignalingEvents from the SignalingChannel task
//! ├── consumes TransportEvents from every PeerLink
//! └── consumes CaptureEvents from the media capture device
//! ```
//!
//! All roster, session-table, and media-state mutations happen on the
//! actor's event loop, so the state machine needs no locks. Blocking work
//! (device acquisition, description
//! construction) runs behind async trait seams so a slow permission prompt
//! never delays an unrelated chat message.
//!
//! # External seams
//!
//! - [`signaling::SignalConnector`] - the ordered message transport to the
//!   relay. The channel reconnects with bounded exponential backoff.
//! - [`transport::PeerTransport`] - the media transport capability that
//!   realizes session descriptions and network-path candidates.
//! - [`media::MediaCapture`] - camera/microphone/screen acquisition.
//!
//! # Modules
//!
//! - [`session`] - Room actor, peer session state machines, public handle
//! - [`signaling`] - Signaling channel with automatic reconnection
//! - [`media`] - Local media pipeline (tracks, toggles, screen share)
//! - [`roster`] - Idempotent roster projection
//! - [`chat`] - Append-only chat scrollback
//! - [`events`] - The event stream surfaced to the caller
//! - [`config`] - Tunables from environment
//! - [`errors`] - Error taxonomy

pub mod chat;
pub mod config;
pub mod errors;
pub mod events;
pub mod media;
pub mod roster;
pub mod session;
pub mod signaling;
pub mod transport;

pub use config::Config;
pub use errors::ClientError;
pub use events::{ConnectionStatus, RoomEvent};
pub use session::{RoomActor, RoomHandle};
