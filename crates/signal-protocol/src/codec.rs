//! Newline-delimited JSON framing for signaling messages.
//!
//! One message per line. Encoding appends a single `\n`; decoding splits
//! one complete line off the front of a buffer and returns `Ok(None)` when
//! no full line has arrived yet.
//!
//! This module is the wire-format surface for transports that carry the
//! protocol over a raw byte stream; in-process connectors exchange the
//! typed messages directly and never frame them.

use crate::message::{ClientMessage, ServerMessage};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Upper bound on a single encoded message, applied on decode.
///
/// Session descriptions dominate message size; real-world descriptions are
/// a few kilobytes, so this bound only trips on corrupt streams.
pub const MAX_LINE_BYTES: usize = 256 * 1024;

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Message did not parse as the expected type.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// A line exceeded [`MAX_LINE_BYTES`], terminated or not.
    #[error("Line exceeds {MAX_LINE_BYTES} bytes")]
    LineTooLong,
}

fn encode<T: Serialize>(msg: &T) -> Result<String, CodecError> {
    let mut line =
        serde_json::to_string(msg).map_err(|e| CodecError::Malformed(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

fn decode_line<T: DeserializeOwned>(buf: &mut String) -> Result<Option<T>, CodecError> {
    let Some(newline) = buf.find('\n') else {
        if buf.len() > MAX_LINE_BYTES {
            return Err(CodecError::LineTooLong);
        }
        return Ok(None);
    };

    // A terminated line is bounded too; a corrupt stream must not smuggle
    // an oversized payload in just because the terminator arrived.
    if newline > MAX_LINE_BYTES {
        return Err(CodecError::LineTooLong);
    }

    let rest = buf.split_off(newline + 1);
    let line = std::mem::replace(buf, rest);
    let trimmed = line.trim_end();

    let msg =
        serde_json::from_str(trimmed).map_err(|e| CodecError::Malformed(e.to_string()))?;
    Ok(Some(msg))
}

/// Encode a client message as one framed line.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_client(msg: &ClientMessage) -> Result<String, CodecError> {
    encode(msg)
}

/// Encode a server message as one framed line.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_server(msg: &ServerMessage) -> Result<String, CodecError> {
    encode(msg)
}

/// Decode one client message off the front of `buf`, if a full line arrived.
///
/// # Errors
///
/// Returns an error on malformed input or an oversized line.
pub fn decode_client(buf: &mut String) -> Result<Option<ClientMessage>, CodecError> {
    decode_line(buf)
}

/// Decode one server message off the front of `buf`, if a full line arrived.
///
/// # Errors
///
/// Returns an error on malformed input or an oversized line.
pub fn decode_server(buf: &mut String) -> Result<Option<ServerMessage>, CodecError> {
    decode_line(buf)
}
