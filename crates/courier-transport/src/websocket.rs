//! WebSocket transport implementation.
//!
//! Wraps an upgraded axum [`WebSocket`]. Envelopes go out as text frames;
//! both text and binary frames are accepted inbound.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::traits::{check_frame_size, FrameReceiver, FrameSender, Inbound, TransportError};

/// Split an upgraded socket into its writing and reading halves.
#[must_use]
pub fn split(socket: WebSocket, max_message_size: usize) -> (WebSocketSender, WebSocketReceiver) {
    let (sink, stream) = socket.split();
    (
        WebSocketSender { sink, closed: false },
        WebSocketReceiver {
            stream,
            max_message_size,
        },
    )
}

/// Turn an encoded envelope into a text frame body.
///
/// Reuses the buffer when this is its last handle; a payload still shared
/// with other subscribers is copied.
fn into_text(data: Bytes) -> Result<String, TransportError> {
    String::from_utf8(Vec::from(data)).map_err(|e| TransportError::SendFailed(e.to_string()))
}

/// Writing half of a WebSocket connection.
pub struct WebSocketSender {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl FrameSender for WebSocketSender {
    async fn send_frame(&mut self, data: Bytes) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.sink
            .send(Message::Text(into_text(data)?))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.sink
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(()); // Already closed
        }
        // The peer may already be gone, in which case the close frame is moot
        if let Err(e) = self.sink.send(Message::Close(None)).await {
            debug!("Failed to send close frame: {}", e);
        }
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

/// Reading half of a WebSocket connection.
pub struct WebSocketReceiver {
    stream: SplitStream<WebSocket>,
    max_message_size: usize,
}

#[async_trait]
impl FrameReceiver for WebSocketReceiver {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        match self.stream.next().await {
            Some(Ok(message)) => classify(message, self.max_message_size),
            Some(Err(e)) => {
                warn!("WebSocket error: {}", e);
                Err(TransportError::ReceiveFailed(e.to_string()))
            }
            None => {
                debug!("WebSocket stream ended");
                Ok(None)
            }
        }
    }
}

/// Map a raw WebSocket message onto [`Inbound`].
fn classify(message: Message, max_message_size: usize) -> Result<Option<Inbound>, TransportError> {
    match message {
        Message::Text(text) => {
            check_frame_size(text.len(), max_message_size)?;
            Ok(Some(Inbound::Frame(Bytes::from(text))))
        }
        Message::Binary(data) => {
            check_frame_size(data.len(), max_message_size)?;
            Ok(Some(Inbound::Frame(Bytes::from(data))))
        }
        // Pong replies to pings are queued by the socket itself
        Message::Ping(_) => Ok(Some(Inbound::Ping)),
        Message::Pong(_) => Ok(Some(Inbound::Pong)),
        Message::Close(frame) => {
            debug!(?frame, "Received close frame");
            Ok(None)
        }
    }
}
