//! Connection and topic indexes owned by the hub's control loop.
//!
//! Plain synchronous state with no locking: only the control loop ever holds
//! it. Every operation is total, so double registration, double removal and
//! operations on unknown users or topics are defined no-ops.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parley_core::{ConnectionId, Topic, UserId};

use crate::connection::ClientConnection;

struct Entry {
    connection: Arc<ClientConnection>,
    topics: HashSet<Topic>,
}

/// Connections indexed by identity, by owning user and by subscribed topic.
///
/// Invariant: a connection id appears in `by_user[u]` / `by_topic[t]` iff it
/// is in `connections` and (for topics) `t` is in its entry's topic set.
/// Empty user and topic sets are removed.
#[derive(Default)]
pub struct Registry {
    connections: HashMap<ConnectionId, Entry>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
    by_topic: HashMap<Topic, HashSet<ConnectionId>>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection under its owner and subscribe it to `topics`.
    ///
    /// Registering an already-known connection only adds the new topics.
    /// Returns whether the connection was new.
    pub fn register(&mut self, connection: Arc<ClientConnection>, topics: Vec<Topic>) -> bool {
        let id = connection.id();
        let is_new = !self.connections.contains_key(&id);
        if is_new {
            let _ = self
                .by_user
                .entry(connection.user_id())
                .or_default()
                .insert(id);
            let _ = self.connections.insert(
                id,
                Entry {
                    connection,
                    topics: HashSet::new(),
                },
            );
        }
        for topic in topics {
            let _ = self.subscribe_connection(id, topic);
        }
        is_new
    }

    /// Remove a connection from its user and from every topic it joined.
    ///
    /// Returns the removed connection, or `None` if it was not registered.
    pub fn unregister(&mut self, id: ConnectionId) -> Option<Arc<ClientConnection>> {
        let entry = self.connections.remove(&id)?;
        let user_id = entry.connection.user_id();
        if let Some(set) = self.by_user.get_mut(&user_id) {
            let _ = set.remove(&id);
            if set.is_empty() {
                let _ = self.by_user.remove(&user_id);
            }
        }
        for topic in &entry.topics {
            self.detach(topic, id);
        }
        Some(entry.connection)
    }

    /// Subscribe every current connection of `user_id` to `topic`.
    ///
    /// Returns how many connections were newly subscribed.
    pub fn subscribe_user(&mut self, topic: &Topic, user_id: UserId) -> usize {
        let ids: Vec<ConnectionId> = self.user_connection_ids(user_id);
        ids.into_iter()
            .filter(|id| self.subscribe_connection(*id, topic.clone()))
            .count()
    }

    /// Remove every connection of `user_id` from `topic`.
    ///
    /// Returns how many connections were removed.
    pub fn unsubscribe_user(&mut self, topic: &Topic, user_id: UserId) -> usize {
        let mut removed = 0;
        for id in self.user_connection_ids(user_id) {
            if let Some(entry) = self.connections.get_mut(&id) {
                if entry.topics.remove(topic) {
                    self.detach(topic, id);
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Remove a topic and all its subscriptions, returning the former subscribers.
    pub fn remove_topic(&mut self, topic: &Topic) -> Vec<Arc<ClientConnection>> {
        let Some(ids) = self.by_topic.remove(topic) else {
            return Vec::new();
        };
        ids.into_iter()
            .filter_map(|id| {
                let entry = self.connections.get_mut(&id)?;
                let _ = entry.topics.remove(topic);
                Some(entry.connection.clone())
            })
            .collect()
    }

    /// Live connections of one user.
    pub fn user_connections(&self, user_id: UserId) -> Vec<Arc<ClientConnection>> {
        self.collect(self.by_user.get(&user_id))
    }

    /// Live connections subscribed to one topic.
    pub fn topic_connections(&self, topic: &Topic) -> Vec<Arc<ClientConnection>> {
        self.collect(self.by_topic.get(topic))
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of users with at least one connection.
    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }

    /// Number of topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.by_topic.len()
    }

    fn subscribe_connection(&mut self, id: ConnectionId, topic: Topic) -> bool {
        let Some(entry) = self.connections.get_mut(&id) else {
            return false;
        };
        if !entry.topics.insert(topic.clone()) {
            return false;
        }
        let _ = self.by_topic.entry(topic).or_default().insert(id);
        true
    }

    fn detach(&mut self, topic: &Topic, id: ConnectionId) {
        if let Some(set) = self.by_topic.get_mut(topic) {
            let _ = set.remove(&id);
            if set.is_empty() {
                let _ = self.by_topic.remove(topic);
            }
        }
    }

    fn user_connection_ids(&self, user_id: UserId) -> Vec<ConnectionId> {
        self.by_user
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    fn collect(&self, ids: Option<&HashSet<ConnectionId>>) -> Vec<Arc<ClientConnection>> {
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.connections.get(id))
            .map(|e| e.connection.clone())
            .collect()
    }
}
