//! # courier-core
//!
//! Core types and fan-out for the Courier realtime hub.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Topic** - `(kind, id)` subscription keys such as `channel:general`
//! - **Connection** - One live client session with a bounded outbound queue
//! - **Presence** - Derived online/offline state per user
//! - **Hub** - Registration, subscription index and fan-out primitives
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐ register  ┌─────────────┐ try_send  ┌────────────────┐
//! │  Connection │──────────▶│     Hub     │──────────▶│ outbound queue │
//! └─────────────┘           └─────────────┘           └────────────────┘
//!                             │         │
//!                             ▼         ▼
//!                   ┌──────────────┐ ┌─────────────┐
//!                   │ Subscription │ │  Presence   │
//!                   │    index     │ │   index     │
//!                   └──────────────┘ └─────────────┘
//! ```

pub mod connection;
pub mod hub;
pub mod presence;
pub mod publish;
pub mod topic;

pub use connection::{Connection, ConnectionId, ConnectionState, OutboundReceiver, UserId};
pub use hub::{Hub, HubConfig, HubStats};
pub use presence::{PresenceChange, PresenceIndex};
pub use topic::{TopicError, TopicKey};

pub use courier_protocol::TopicKind;
