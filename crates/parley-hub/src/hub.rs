//! The hub: a single control loop that owns the connection registry.
//!
//! Every mutation and every broadcast is a [`HubCommand`] sent through one
//! bounded channel, so they are linearized: a broadcast observes a
//! connection either fully registered or fully removed, and broadcasts to
//! one topic reach every subscriber in the order the loop processed them.
//! Delivery itself is [`ClientConnection::enqueue`], which never waits, so a
//! stalled peer cannot stall the loop.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use metrics::{counter, gauge};
use parley_core::{ConnectionId, Notification, Topic, UserId};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::connection::ClientConnection;
use crate::errors::HubError;
use crate::metrics::{HUB_NOTIFICATIONS_ENQUEUED_TOTAL, HUB_TOPICS_ACTIVE};
use crate::registry::Registry;

type RenderFn = dyn Fn(UserId) -> Notification + Send + Sync;

/// What a broadcast delivers.
#[derive(Clone)]
pub enum Payload {
    /// The same notification for every recipient.
    Shared(Arc<Notification>),
    /// Rendered once per distinct recipient user inside the control loop.
    PerRecipient(Arc<RenderFn>),
}

impl Payload {
    /// A payload rendered per recipient.
    pub fn per_recipient(render: impl Fn(UserId) -> Notification + Send + Sync + 'static) -> Self {
        Self::PerRecipient(Arc::new(render))
    }

    fn fan_out(&self, targets: &[Arc<ClientConnection>]) -> Delivery {
        let mut rendered: HashMap<UserId, Arc<Notification>> = HashMap::new();
        let mut delivery = Delivery::default();
        for conn in targets {
            let notification = match self {
                Self::Shared(n) => n.clone(),
                Self::PerRecipient(render) => rendered
                    .entry(conn.user_id())
                    .or_insert_with(|| Arc::new(render(conn.user_id())))
                    .clone(),
            };
            if conn.enqueue(notification) {
                delivery.enqueued += 1;
            } else {
                delivery.failed += 1;
            }
        }
        if delivery.enqueued > 0 {
            counter!(HUB_NOTIFICATIONS_ENQUEUED_TOTAL).increment(delivery.enqueued as u64);
        }
        delivery
    }
}

impl From<Notification> for Payload {
    fn from(notification: Notification) -> Self {
        Self::Shared(Arc::new(notification))
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared(n) => f.debug_tuple("Shared").field(&n.kind()).finish(),
            Self::PerRecipient(_) => f.write_str("PerRecipient"),
        }
    }
}

#[derive(Debug, Default)]
struct Delivery {
    enqueued: usize,
    failed: usize,
}

/// Registry counts reported by [`HubHandle::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Registered connections.
    pub connections: usize,
    /// Users with at least one connection.
    pub users: usize,
    /// Topics with at least one subscriber.
    pub topics: usize,
}

/// A request to the control loop.
#[derive(Debug)]
pub enum HubCommand {
    /// Add a connection, subscribed to `topics` in the same step.
    Register {
        /// The new connection.
        connection: Arc<ClientConnection>,
        /// Topics to restore for it.
        topics: Vec<Topic>,
    },
    /// Remove a connection and all its subscriptions.
    Unregister {
        /// Connection to remove.
        connection_id: ConnectionId,
    },
    /// Subscribe the user's current connections to a topic.
    Subscribe {
        /// Topic to join.
        topic: Topic,
        /// Whose connections.
        user_id: UserId,
    },
    /// Remove the user's connections from a topic.
    Unsubscribe {
        /// Topic to leave.
        topic: Topic,
        /// Whose connections.
        user_id: UserId,
    },
    /// Deliver to every connection of one user.
    BroadcastToUser {
        /// Recipient.
        user_id: UserId,
        /// What to deliver.
        payload: Payload,
    },
    /// Deliver to every connection subscribed to a topic.
    BroadcastToTopic {
        /// Scope.
        topic: Topic,
        /// What to deliver.
        payload: Payload,
    },
    /// Deliver a terminal notification to a topic, then drop the topic.
    DeleteTopic {
        /// Topic to remove.
        topic: Topic,
        /// Final notification for its subscribers.
        payload: Payload,
    },
    /// Report registry counts.
    Stats {
        /// Reply channel.
        reply: oneshot::Sender<HubStats>,
    },
    /// Report the connections subscribed to a topic.
    TopicSubscribers {
        /// Topic to inspect.
        topic: Topic,
        /// Reply channel.
        reply: oneshot::Sender<Vec<ConnectionId>>,
    },
}

/// The control loop and the registry it owns.
pub struct Hub {
    rx: mpsc::Receiver<HubCommand>,
    registry: Registry,
}

impl Hub {
    /// Create a hub and the handle used to reach it.
    pub fn new(command_capacity: usize) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(command_capacity.max(1));
        let hub = Self {
            rx,
            registry: Registry::new(),
        };
        (hub, HubHandle { tx })
    }

    /// Create a hub and run its loop on a new task.
    pub fn spawn(command_capacity: usize) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(command_capacity);
        (handle, tokio::spawn(hub.run()))
    }

    /// Process commands until every [`HubHandle`] has been dropped.
    #[instrument(name = "hub", skip_all)]
    pub async fn run(mut self) {
        info!("hub control loop started");
        while let Some(command) = self.rx.recv().await {
            self.apply(command);
        }
        info!(
            connections = self.registry.connection_count(),
            "hub control loop stopped"
        );
    }

    fn apply(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { connection, topics } => {
                let conn_id = connection.id();
                let user_id = connection.user_id();
                let topic_count = topics.len();
                if self.registry.register(connection, topics) {
                    debug!(%conn_id, %user_id, topics = topic_count, "connection registered");
                }
            }
            HubCommand::Unregister { connection_id } => {
                if self.registry.unregister(connection_id).is_some() {
                    debug!(conn_id = %connection_id, "connection unregistered");
                }
            }
            HubCommand::Subscribe { topic, user_id } => {
                let added = self.registry.subscribe_user(&topic, user_id);
                debug!(%topic, %user_id, added, "subscribed");
            }
            HubCommand::Unsubscribe { topic, user_id } => {
                let removed = self.registry.unsubscribe_user(&topic, user_id);
                debug!(%topic, %user_id, removed, "unsubscribed");
            }
            HubCommand::BroadcastToUser { user_id, payload } => {
                let targets = self.registry.user_connections(user_id);
                let delivery = payload.fan_out(&targets);
                debug!(
                    %user_id,
                    recipients = delivery.enqueued,
                    failed = delivery.failed,
                    "broadcast to user"
                );
            }
            HubCommand::BroadcastToTopic { topic, payload } => {
                let targets = self.registry.topic_connections(&topic);
                let delivery = payload.fan_out(&targets);
                debug!(
                    %topic,
                    recipients = delivery.enqueued,
                    failed = delivery.failed,
                    "broadcast to topic"
                );
            }
            HubCommand::DeleteTopic { topic, payload } => {
                let targets = self.registry.remove_topic(&topic);
                let delivery = payload.fan_out(&targets);
                debug!(%topic, recipients = delivery.enqueued, "topic deleted");
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            HubCommand::TopicSubscribers { topic, reply } => {
                let ids = self
                    .registry
                    .topic_connections(&topic)
                    .iter()
                    .map(|c| c.id())
                    .collect();
                let _ = reply.send(ids);
            }
        }
        gauge!(HUB_TOPICS_ACTIVE).set(self.registry.topic_count() as f64);
    }

    fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.connection_count(),
            users: self.registry.user_count(),
            topics: self.registry.topic_count(),
        }
    }
}

/// Cloneable sender side of the hub.
///
/// Each method enqueues one command; it waits only for space in the command
/// channel, never for delivery.
#[derive(Clone, Debug)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.tx.send(command).await.map_err(|_| HubError::Closed)
    }

    /// Register a connection together with the topics it should start in.
    pub async fn register(
        &self,
        connection: Arc<ClientConnection>,
        topics: Vec<Topic>,
    ) -> Result<(), HubError> {
        self.send(HubCommand::Register { connection, topics }).await
    }

    /// Remove a connection from the registry. Unknown ids are ignored.
    pub async fn unregister(&self, connection_id: ConnectionId) -> Result<(), HubError> {
        self.send(HubCommand::Unregister { connection_id }).await
    }

    /// Subscribe every live connection of `user_id` to `topic`.
    ///
    /// Connections the user opens later are not subscribed by this call;
    /// they receive their topics at registration.
    pub async fn subscribe(&self, topic: Topic, user_id: UserId) -> Result<(), HubError> {
        self.send(HubCommand::Subscribe { topic, user_id }).await
    }

    /// Remove every live connection of `user_id` from `topic`.
    pub async fn unsubscribe(&self, topic: Topic, user_id: UserId) -> Result<(), HubError> {
        self.send(HubCommand::Unsubscribe { topic, user_id }).await
    }

    /// Deliver to every live connection of `user_id`. No connections is not an error.
    pub async fn broadcast_to_user(
        &self,
        user_id: UserId,
        payload: impl Into<Payload>,
    ) -> Result<(), HubError> {
        let payload = payload.into();
        self.send(HubCommand::BroadcastToUser { user_id, payload }).await
    }

    /// Deliver to every connection subscribed to `topic`. No subscribers is not an error.
    pub async fn broadcast_to_topic(
        &self,
        topic: Topic,
        payload: impl Into<Payload>,
    ) -> Result<(), HubError> {
        let payload = payload.into();
        self.send(HubCommand::BroadcastToTopic { topic, payload }).await
    }

    /// Deliver `notification` to the topic's subscribers, then remove the topic.
    pub async fn delete_topic(
        &self,
        topic: Topic,
        notification: impl Into<Payload>,
    ) -> Result<(), HubError> {
        let payload = notification.into();
        self.send(HubCommand::DeleteTopic { topic, payload }).await
    }

    /// Current registry counts.
    ///
    /// Answered after every command sent before it has been applied.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Stats { reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Connections currently subscribed to `topic`.
    pub async fn topic_subscribers(&self, topic: Topic) -> Result<Vec<ConnectionId>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::TopicSubscribers { topic, reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Whether the control loop has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
