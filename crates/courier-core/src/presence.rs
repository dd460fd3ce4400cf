//! Presence tracking.
//!
//! A user is online exactly while it has at least one registered
//! connection. The index stores only the per-user connection sets and
//! removes a user's entry the moment its set becomes empty, so the online
//! set is the key set.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::connection::{ConnectionId, UserId};

/// Result of attaching or detaching a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    /// First connection of the user.
    CameOnline,
    /// Last connection of the user went away.
    WentOffline,
    /// The user's online state did not change.
    Unchanged,
}

/// Per-user connection sets.
#[derive(Debug, Default)]
pub struct PresenceIndex {
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

impl PresenceIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection for a user.
    pub fn attach(&mut self, user_id: &str, connection_id: ConnectionId) -> PresenceChange {
        let connections = self.by_user.entry(user_id.to_string()).or_default();
        let was_offline = connections.is_empty();
        connections.insert(connection_id);

        if was_offline {
            debug!(user = %user_id, "Presence: user online");
            PresenceChange::CameOnline
        } else {
            PresenceChange::Unchanged
        }
    }

    /// Forget a connection of a user.
    pub fn detach(&mut self, user_id: &str, connection_id: &ConnectionId) -> PresenceChange {
        let Some(connections) = self.by_user.get_mut(user_id) else {
            return PresenceChange::Unchanged;
        };
        if !connections.remove(connection_id) {
            return PresenceChange::Unchanged;
        }
        if connections.is_empty() {
            self.by_user.remove(user_id);
            debug!(user = %user_id, "Presence: user offline");
            PresenceChange::WentOffline
        } else {
            PresenceChange::Unchanged
        }
    }

    /// Check if a user is online.
    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.by_user.contains_key(user_id)
    }

    /// Get all online user ids.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        self.by_user.keys().cloned().collect()
    }

    /// Number of online users.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.by_user.len()
    }

    /// Get the connections of a user.
    pub fn connections_of(&self, user_id: &str) -> impl Iterator<Item = &ConnectionId> {
        self.by_user.get(user_id).into_iter().flatten()
    }

    pub(crate) fn clear(&mut self) {
        self.by_user.clear();
    }

    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&UserId, &HashSet<ConnectionId>)> {
        self.by_user.iter()
    }
}
