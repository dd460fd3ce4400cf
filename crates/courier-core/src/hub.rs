//! The connection hub.
//!
//! The hub owns every live connection, the per-user presence index and the
//! topic subscription index, and fans pre-serialized envelopes out to the
//! right outbound queues.
//!
//! All state sits behind a single reader/writer lock. Broadcasts and
//! queries take the read lock; registration, unregistration and
//! subscription changes take the write lock. Presence transitions are
//! emitted while the write lock is still held so that no observer can see
//! `user_online` and `user_offline` for the same user out of order. Every
//! enqueue is a `try_send`, so the lock is never held across I/O.

use bytes::Bytes;
use chrono::Utc;
use courier_protocol::{codec, EventType, PresenceEventData, TopicKind};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, trace, warn};

use crate::connection::{
    Connection, ConnectionId, Delivery, OutboundReceiver, UserId, DEFAULT_OUTBOUND_CAPACITY,
};
use crate::presence::{PresenceChange, PresenceIndex};
use crate::topic::TopicKey;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound queue capacity of connections opened with [`Hub::connect`].
    pub outbound_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Number of registered connections.
    pub connections: usize,
    /// Number of online users.
    pub online_users: usize,
    /// Number of topics with at least one subscriber.
    pub topics: usize,
    /// Total number of (connection, topic) subscriptions.
    pub total_subscriptions: usize,
    /// Envelopes successfully enqueued since start.
    pub messages_delivered: u64,
    /// Envelopes dropped on full or closed queues since start.
    pub messages_dropped: u64,
}

#[derive(Debug, Default)]
struct HubState {
    connections: HashMap<ConnectionId, Connection>,
    presence: PresenceIndex,
    subscriptions: HashMap<TopicKey, HashSet<ConnectionId>>,
}

impl HubState {
    fn add_subscription(&mut self, id: &ConnectionId, topic: TopicKey) -> bool {
        let Some(connection) = self.connections.get_mut(id) else {
            return false;
        };
        if !connection.add_topic(topic.clone()) {
            return false;
        }
        self.subscriptions.entry(topic).or_default().insert(id.clone());
        true
    }

    fn remove_subscription(&mut self, id: &ConnectionId, topic: &TopicKey) -> bool {
        let Some(connection) = self.connections.get_mut(id) else {
            return false;
        };
        if topic.is_inbox_of(connection.user_id()) || !connection.remove_topic(topic) {
            return false;
        }
        self.prune_subscriber(id, topic);
        true
    }

    fn prune_subscriber(&mut self, id: &ConnectionId, topic: &TopicKey) {
        if let Some(subscribers) = self.subscriptions.get_mut(topic) {
            subscribers.remove(id);
            if subscribers.is_empty() {
                self.subscriptions.remove(topic);
            }
        }
    }

    fn remove_connection(&mut self, id: &ConnectionId) -> Option<(Connection, PresenceChange)> {
        let connection = self.connections.remove(id)?;
        for topic in connection.topics() {
            self.prune_subscriber(id, topic);
        }
        let change = self.presence.detach(connection.user_id(), id);
        Some((connection, change))
    }
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// The central connection hub.
#[derive(Debug)]
pub struct Hub {
    state: RwLock<HubState>,
    counters: Counters,
    config: HubConfig,
}

impl Hub {
    /// Create a new hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a new hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating hub with config: {:?}", config);
        Self {
            state: RwLock::new(HubState::default()),
            counters: Counters::default(),
            config,
        }
    }

    /// Open a connection for `user_id` with the configured queue capacity.
    ///
    /// Same as [`Hub::register`] on a fresh [`Connection`]; returns the new
    /// id and the receiving end of its outbound queue.
    pub fn connect(&self, user_id: impl Into<UserId>) -> (ConnectionId, OutboundReceiver) {
        let (connection, outbound) =
            Connection::with_capacity(user_id, self.config.outbound_capacity);
        (self.register(connection), outbound)
    }

    /// Register a connection.
    ///
    /// The connection is auto-subscribed to its user's inbox topic. If it is
    /// the user's first connection, `user_online` is sent to every
    /// registered connection, the new one included.
    pub fn register(&self, mut connection: Connection) -> ConnectionId {
        let id = connection.id().clone();
        let user_id = connection.user_id().to_string();
        let inbox = TopicKey::user(&user_id);

        let mut state = self.state.write();

        if state.connections.contains_key(&id) {
            warn!(connection = %id, "Duplicate connection id, replacing stale entry");
            self.remove_locked(&mut state, &id);
        }

        connection.add_topic(inbox.clone());
        state.subscriptions.entry(inbox).or_default().insert(id.clone());
        let change = state.presence.attach(&user_id, id.clone());
        state.connections.insert(id.clone(), connection);

        debug!(
            connection = %id,
            user = %user_id,
            connections = state.connections.len(),
            "Connection registered"
        );

        if change == PresenceChange::CameOnline {
            self.emit_presence(&state, &user_id, true);
        }

        id
    }

    /// Unregister a connection.
    ///
    /// Removes every trace of the connection and closes its outbound queue.
    /// Returns `false` if the connection was not registered.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let mut state = self.state.write();
        self.remove_locked(&mut state, id).is_some()
    }

    /// Unregister every connection, closing all outbound queues.
    ///
    /// No presence events are sent since every recipient is going away.
    /// Returns the number of connections removed.
    pub fn unregister_all(&self) -> usize {
        let mut state = self.state.write();
        let count = state.connections.len();
        state.subscriptions.clear();
        state.presence.clear();
        state.connections.clear();
        info!(connections = count, "Unregistered all connections");
        count
    }

    fn remove_locked(&self, state: &mut HubState, id: &ConnectionId) -> Option<Connection> {
        let (connection, change) = state.remove_connection(id)?;

        let lifetime = Utc::now() - connection.connected_at();
        debug!(
            connection = %id,
            user = %connection.user_id(),
            connections = state.connections.len(),
            lifetime_ms = lifetime.num_milliseconds(),
            "Connection unregistered"
        );

        if change == PresenceChange::WentOffline {
            self.emit_presence(state, connection.user_id(), false);
        }

        Some(connection)
    }

    /// Subscribe a connection to a topic.
    ///
    /// Returns `true` if the subscription was added, `false` if the
    /// connection is unknown or already subscribed.
    pub fn subscribe(&self, id: &ConnectionId, kind: TopicKind, target: &str) -> bool {
        self.subscribe_topic(id, TopicKey::new(kind, target))
    }

    /// Subscribe a connection to a topic key.
    pub fn subscribe_topic(&self, id: &ConnectionId, topic: TopicKey) -> bool {
        let mut state = self.state.write();
        let label = topic.to_string();
        let added = state.add_subscription(id, topic);
        if added {
            debug!(connection = %id, topic = %label, "Subscribed");
        }
        added
    }

    /// Unsubscribe a connection from a topic.
    ///
    /// Returns `true` if a subscription was removed. A connection can never
    /// leave its own inbox topic.
    pub fn unsubscribe(&self, id: &ConnectionId, kind: TopicKind, target: &str) -> bool {
        self.unsubscribe_topic(id, &TopicKey::new(kind, target))
    }

    /// Unsubscribe a connection from a topic key.
    pub fn unsubscribe_topic(&self, id: &ConnectionId, topic: &TopicKey) -> bool {
        let mut state = self.state.write();
        let removed = state.remove_subscription(id, topic);
        if removed {
            debug!(connection = %id, topic = %topic, "Unsubscribed");
        }
        removed
    }

    /// Send a payload to every subscriber of a topic.
    ///
    /// Subscribers whose queue is full miss this message.
    pub fn broadcast_to_subscription(&self, kind: TopicKind, target: &str, payload: Bytes) {
        self.broadcast_to_topic(&TopicKey::new(kind, target), payload);
    }

    /// Send a payload to every subscriber of a topic key.
    pub fn broadcast_to_topic(&self, topic: &TopicKey, payload: Bytes) {
        let state = self.state.read();
        let Some(subscribers) = state.subscriptions.get(topic) else {
            trace!(topic = %topic, "Broadcast to topic without subscribers");
            return;
        };

        let recipients = subscribers
            .iter()
            .filter_map(|id| state.connections.get(id))
            .filter(|connection| self.deliver(connection, &payload))
            .count();

        trace!(topic = %topic, recipients, "Broadcast to topic");
    }

    /// Send a payload to every connection of a user.
    pub fn broadcast_to_user(&self, user_id: &str, payload: Bytes) {
        let state = self.state.read();
        let recipients = state
            .presence
            .connections_of(user_id)
            .filter_map(|id| state.connections.get(id))
            .filter(|connection| self.deliver(connection, &payload))
            .count();

        trace!(user = %user_id, recipients, "Broadcast to user");
    }

    /// Send a presence event for `user_id` to every registered connection.
    pub fn broadcast_presence(&self, user_id: &str, is_online: bool) {
        let state = self.state.read();
        self.emit_presence(&state, user_id, is_online);
    }

    /// Send a payload to a single connection.
    ///
    /// Returns `true` if the payload was enqueued.
    pub fn send_to_connection(&self, id: &ConnectionId, payload: Bytes) -> bool {
        let state = self.state.read();
        state
            .connections
            .get(id)
            .is_some_and(|connection| self.deliver(connection, &payload))
    }

    fn emit_presence(&self, state: &HubState, user_id: &str, is_online: bool) {
        let event = if is_online {
            EventType::UserOnline
        } else {
            EventType::UserOffline
        };
        let data = PresenceEventData {
            user_id: user_id.to_string(),
            is_online,
        };

        let payload = match codec::encode_event(event, &data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(user = %user_id, error = %e, "Failed to encode presence event");
                return;
            }
        };

        let recipients = state
            .connections
            .values()
            .filter(|connection| self.deliver(connection, &payload))
            .count();

        debug!(user = %user_id, event = %event, recipients, "Presence broadcast");
    }

    fn deliver(&self, connection: &Connection, payload: &Bytes) -> bool {
        match connection.try_deliver(payload) {
            Delivery::Queued => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Delivery::Full => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(connection = %connection.id(), "Outbound queue full, message dropped");
                false
            }
            Delivery::Closed => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(connection = %connection.id(), "Outbound queue closed, message dropped");
                false
            }
        }
    }

    /// Check if a user has at least one registered connection.
    #[must_use]
    pub fn is_user_online(&self, user_id: &str) -> bool {
        self.state.read().presence.is_online(user_id)
    }

    /// Get all online user ids.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        self.state.read().presence.online_users()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Get the connection ids of a user.
    #[must_use]
    pub fn user_connections(&self, user_id: &str) -> Vec<ConnectionId> {
        self.state
            .read()
            .presence
            .connections_of(user_id)
            .cloned()
            .collect()
    }

    /// Get the subscriber count for a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &TopicKey) -> usize {
        self.state
            .read()
            .subscriptions
            .get(topic)
            .map_or(0, HashSet::len)
    }

    /// Get the topics a connection is subscribed to.
    #[must_use]
    pub fn connection_topics(&self, id: &ConnectionId) -> Vec<TopicKey> {
        self.state
            .read()
            .connections
            .get(id)
            .map(|c| c.topics().cloned().collect())
            .unwrap_or_default()
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let state = self.state.read();
        HubStats {
            connections: state.connections.len(),
            online_users: state.presence.online_count(),
            topics: state.subscriptions.len(),
            total_subscriptions: state.subscriptions.values().map(HashSet::len).sum(),
            messages_delivered: self.counters.delivered.load(Ordering::Relaxed),
            messages_dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
