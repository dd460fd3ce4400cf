//! Transport abstraction traits for Courier.
//!
//! A live socket is split into a [`FrameSender`] owned by the writer pump
//! and a [`FrameReceiver`] owned by the reader pump, so the two halves can
//! make progress independently.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection timed out.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Inbound frame above the configured limit.
    #[error("Message size {size} exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },
}

/// Something read from the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A complete data frame (text or binary) carrying JSON.
    Frame(Bytes),
    /// A keepalive ping from the peer.
    Ping,
    /// A keepalive reply from the peer.
    Pong,
}

/// The writing half of a connection.
#[async_trait]
pub trait FrameSender: Send {
    /// Send one serialized envelope as a single frame.
    async fn send_frame(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Send a keepalive ping.
    async fn send_ping(&mut self) -> Result<(), TransportError>;

    /// Send a close frame and shut the writing half down.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// The reading half of a connection.
#[async_trait]
pub trait FrameReceiver: Send {
    /// Receive the next inbound item.
    ///
    /// Returns `None` if the peer closed the connection cleanly.
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError>;
}

/// Reject frames above `max_size` bytes.
///
/// # Errors
///
/// Returns [`TransportError::MessageTooLarge`] when the frame is too large.
pub fn check_frame_size(len: usize, max_size: usize) -> Result<(), TransportError> {
    if len > max_size {
        return Err(TransportError::MessageTooLarge {
            size: len,
            max: max_size,
        });
    }
    Ok(())
}
