//! In-memory transport.
//!
//! Backs the transport traits with a pair of bounded channels. The server
//! side gets a [`MemorySender`] and a [`MemoryReceiver`]; the test side gets
//! a [`MemoryPeer`] that plays the client. A peer that stops reading makes
//! `send_frame` block once the channel is full, which is how slow clients
//! are simulated.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::traits::{FrameReceiver, FrameSender, Inbound, TransportError};

/// What the peer observes from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Bytes),
    Ping,
    Close,
}

impl Outbound {
    /// The frame payload as text, if this is a frame.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Outbound::Frame(data) => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }
}

/// Create a connected in-memory transport.
///
/// `capacity` bounds both directions.
#[must_use]
pub fn pair(capacity: usize) -> (MemorySender, MemoryReceiver, MemoryPeer) {
    let (out_tx, out_rx) = mpsc::channel(capacity.max(1));
    let (in_tx, in_rx) = mpsc::channel(capacity.max(1));
    (
        MemorySender {
            tx: out_tx,
            closed: false,
        },
        MemoryReceiver { rx: in_rx },
        MemoryPeer {
            tx: Some(in_tx),
            rx: out_rx,
        },
    )
}

/// Server-side writing half.
pub struct MemorySender {
    tx: mpsc::Sender<Outbound>,
    closed: bool,
}

impl MemorySender {
    async fn push(&mut self, item: Outbound) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.tx
            .send(item)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

#[async_trait]
impl FrameSender for MemorySender {
    async fn send_frame(&mut self, data: Bytes) -> Result<(), TransportError> {
        self.push(Outbound::Frame(data)).await
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.push(Outbound::Ping).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        // Best effort; the peer may be gone or not reading
        let _ = self.tx.try_send(Outbound::Close);
        self.closed = true;
        Ok(())
    }
}

/// Server-side reading half.
pub struct MemoryReceiver {
    rx: mpsc::Receiver<Inbound>,
}

#[async_trait]
impl FrameReceiver for MemoryReceiver {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

/// The client end of an in-memory transport.
pub struct MemoryPeer {
    tx: Option<mpsc::Sender<Inbound>>,
    rx: mpsc::Receiver<Outbound>,
}

impl MemoryPeer {
    /// Send a text frame to the server. Returns `false` if the server side
    /// is gone or the peer already disconnected.
    pub async fn send_text(&self, text: &str) -> bool {
        self.send(Inbound::Frame(Bytes::copy_from_slice(text.as_bytes())))
            .await
    }

    /// Answer a keepalive ping.
    pub async fn send_pong(&self) -> bool {
        self.send(Inbound::Pong).await
    }

    async fn send(&self, item: Inbound) -> bool {
        match &self.tx {
            Some(tx) => tx.send(item).await.is_ok(),
            None => false,
        }
    }

    /// Close the client-to-server direction, as a client closing its socket.
    pub fn disconnect(&mut self) {
        self.tx = None;
    }

    /// Wait for the next item from the server. `None` once the server
    /// dropped its sending half.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.rx.recv().await
    }

    /// Take the next item if one is ready.
    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.rx.try_recv().ok()
    }
}
