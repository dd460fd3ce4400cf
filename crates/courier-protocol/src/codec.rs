//! Codec for encoding and decoding envelopes.
//!
//! Envelopes travel as JSON text frames. Encoding produces [`Bytes`] so a
//! single serialization can be shared by every recipient of a broadcast.

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

use crate::envelope::{Envelope, EventType};
use crate::frames::ClientFrame;

/// Maximum encoded frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A frame type that requires a payload arrived without one.
    #[error("Missing data: {0}")]
    MissingData(&'static str),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Encode an envelope to bytes.
///
/// # Errors
///
/// Returns an error if the envelope is too large or encoding fails.
pub fn encode(envelope: &Envelope) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(envelope)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}

/// Build and encode an envelope carrying `data` in one step.
///
/// # Errors
///
/// Returns an error if `data` cannot be serialized or the result is too large.
pub fn encode_event<T: Serialize + ?Sized>(
    event: EventType,
    data: &T,
) -> Result<Bytes, ProtocolError> {
    encode(&Envelope::with_data(event, data)?)
}

/// Decode an envelope from bytes.
///
/// # Errors
///
/// Returns an error if the data is too large or not a valid envelope.
pub fn decode(data: &[u8]) -> Result<Envelope, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    Ok(serde_json::from_slice(data)?)
}

/// Decode an inbound control frame.
///
/// Unlike [`decode`], the `type` field may hold any string and the
/// `timestamp` field is optional.
///
/// # Errors
///
/// Returns an error if the data is too large, not JSON, or a known frame
/// type carries a malformed payload.
pub fn decode_client_frame(data: &[u8]) -> Result<ClientFrame, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    let value: serde_json::Value = serde_json::from_slice(data)?;
    ClientFrame::from_value(value)
}
