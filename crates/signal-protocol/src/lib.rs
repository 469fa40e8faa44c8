//! Signaling wire protocol for Roomlink.
//!
//! This crate defines the typed messages exchanged between a client and the
//! signaling relay, plus a newline-delimited JSON framing codec so the
//! protocol can run over any ordered byte stream.
//!
//! The handshake payloads (`SessionDescription`, `CandidateBlob`) are opaque
//! to this crate: the media transport capability produces and consumes them,
//! the relay only forwards them.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod message;
pub mod types;

pub use message::{ClientMessage, ServerMessage};
pub use types::{
    CandidateBlob, ChatPayload, MediaState, Participant, ParticipantId, SessionDescription,
    SessionId,
};
