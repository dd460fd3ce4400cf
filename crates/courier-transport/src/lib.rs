//! # courier-transport
//!
//! Transport abstraction layer for the Courier realtime hub.
//!
//! A connection is driven through two halves:
//!
//! - [`FrameSender`] - Owned by the writer pump (frames, pings, close)
//! - [`FrameReceiver`] - Owned by the reader pump (frames, pongs, close)
//!
//! Implementations:
//!
//! - **WebSocket** - An upgraded axum socket (feature `websocket`, default)
//! - **Memory** - Channel-backed pair used to drive sessions in tests
//!
//! ```rust,ignore
//! use courier_transport::{FrameReceiver, Inbound};
//!
//! async fn read_loop(mut rx: impl FrameReceiver) {
//!     while let Ok(Some(item)) = rx.recv().await {
//!         if let Inbound::Frame(data) = item {
//!             // Decode and dispatch
//!         }
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{check_frame_size, FrameReceiver, FrameSender, Inbound, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketReceiver, WebSocketSender};
