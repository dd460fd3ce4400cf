//! Connections.
//!
//! A [`Connection`] is the hub-side half of one live client session: its
//! identity, the sending end of its bounded outbound queue and its topic
//! subscriptions. The receiving end ([`OutboundReceiver`]) belongs to the
//! session's writer pump.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::topic::TopicKey;

/// Default outbound queue capacity.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// A user identifier, as produced by the authentication collaborator.
pub type UserId = String;

/// Receiving end of a connection's outbound queue.
pub type OutboundReceiver = mpsc::Receiver<Bytes>;

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Upgrade accepted, not yet registered.
    Connecting,
    /// Registered with the hub, pumps running.
    Registered,
    /// Teardown in progress.
    Closing,
    /// Pumps exited and hub bookkeeping removed. Terminal.
    Closed,
}

impl ConnectionState {
    /// Move to `next` if it is a forward transition.
    ///
    /// Returns `false` (and stays put) for anything else.
    pub fn transition(&mut self, next: ConnectionState) -> bool {
        let allowed = matches!(
            (*self, next),
            (ConnectionState::Connecting, ConnectionState::Registered)
                | (ConnectionState::Connecting, ConnectionState::Closing)
                | (ConnectionState::Registered, ConnectionState::Closing)
                | (ConnectionState::Closing, ConnectionState::Closed)
        );
        if allowed {
            *self = next;
        }
        allowed
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        *self == ConnectionState::Closed
    }
}

/// Outcome of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Queued,
    /// Queue full; message dropped for this connection.
    Full,
    /// Receiver gone; the writer pump already exited.
    Closed,
}

/// A live connection as seen by the hub.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    sender: mpsc::Sender<Bytes>,
    subscriptions: HashSet<TopicKey>,
    connected_at: DateTime<Utc>,
}

impl Connection {
    /// Create a connection with the default queue capacity.
    ///
    /// Returns the connection and the receiving end of its outbound queue.
    #[must_use]
    pub fn new(user_id: impl Into<UserId>) -> (Self, OutboundReceiver) {
        Self::with_capacity(user_id, DEFAULT_OUTBOUND_CAPACITY)
    }

    /// Create a connection with a specific queue capacity.
    #[must_use]
    pub fn with_capacity(user_id: impl Into<UserId>, capacity: usize) -> (Self, OutboundReceiver) {
        Self::with_id(ConnectionId::generate(), user_id, capacity)
    }

    /// Create a connection with a caller-chosen id.
    #[must_use]
    pub fn with_id(
        id: ConnectionId,
        user_id: impl Into<UserId>,
        capacity: usize,
    ) -> (Self, OutboundReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let connection = Self {
            id,
            user_id: user_id.into(),
            sender,
            subscriptions: HashSet::new(),
            connected_at: Utc::now(),
        };
        (connection, receiver)
    }

    /// Get the connection id.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Get the owning user id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// When the connection was created.
    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Check if the connection is subscribed to a topic.
    #[must_use]
    pub fn is_subscribed(&self, topic: &TopicKey) -> bool {
        self.subscriptions.contains(topic)
    }

    /// Get the connection's topics.
    pub fn topics(&self) -> impl Iterator<Item = &TopicKey> {
        self.subscriptions.iter()
    }

    /// Number of topics the connection is subscribed to.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub(crate) fn add_topic(&mut self, topic: TopicKey) -> bool {
        self.subscriptions.insert(topic)
    }

    pub(crate) fn remove_topic(&mut self, topic: &TopicKey) -> bool {
        self.subscriptions.remove(topic)
    }

    /// Non-blocking enqueue onto the outbound queue.
    pub(crate) fn try_deliver(&self, payload: &Bytes) -> Delivery {
        match self.sender.try_send(payload.clone()) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}
