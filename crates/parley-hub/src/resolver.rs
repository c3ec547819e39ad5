//! Notification resolver: the asynchronous bridge from the command layer to the hub.
//!
//! Command handlers call a `dispatch_*` method right after a successful
//! write. The call never waits: the event goes onto a bounded per-kind queue,
//! or is dropped with a warning if that queue is full. One drain task per
//! kind processes its queue strictly in order, re-reads whatever the payload
//! needs and hands it to the hub.
//!
//! Delivery is at most once. If the re-read fails (typically because the
//! entity was deleted in the meantime) the event is logged and dropped. A
//! message id that was already broadcast within the dedup window is skipped.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parley_core::{ConversationId, MessageId, Notification, Topic, UserId};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use parley_settings::ResolverSettings;

use crate::dedup::MessageDeduplicator;
use crate::errors::HubError;
use crate::hub::{HubHandle, Payload};
use crate::metrics::{RESOLVER_EVENTS_DROPPED_TOTAL, RESOLVER_EVENTS_TOTAL};
use crate::read_model::MessageReadModel;

/// "Something happened to entity E" signal from the command layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolverEvent {
    /// A message (text or system) was stored.
    MessageCreated {
        /// Stored message.
        message_id: MessageId,
        /// Its author; the read model renders on their behalf.
        author_id: UserId,
    },
    /// A conversation and its messages were removed.
    ConversationDeleted {
        /// Removed conversation.
        conversation_id: ConversationId,
    },
    /// A conversation got a new name.
    ConversationRenamed {
        /// Renamed conversation.
        conversation_id: ConversationId,
        /// The new name.
        new_name: String,
    },
}

impl ResolverEvent {
    /// Metric and log label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageCreated { .. } => "message_created",
            Self::ConversationDeleted { .. } => "conversation_deleted",
            Self::ConversationRenamed { .. } => "conversation_renamed",
        }
    }
}

/// Queue and deduplication sizing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Capacity of each per-kind event queue.
    pub queue_capacity: usize,
    /// Message ids remembered after broadcast; 0 disables deduplication.
    pub dedup_capacity: usize,
    /// How long a broadcast message id is remembered.
    pub dedup_ttl: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::from(&ResolverSettings::default())
    }
}

impl From<&ResolverSettings> for ResolverConfig {
    fn from(settings: &ResolverSettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity,
            dedup_capacity: settings.dedup_capacity,
            dedup_ttl: settings.dedup_ttl(),
        }
    }
}

struct Queues {
    messages: mpsc::Receiver<ResolverEvent>,
    deletions: mpsc::Receiver<ResolverEvent>,
    renames: mpsc::Receiver<ResolverEvent>,
}

/// Cloneable, non-blocking entry point for command handlers.
#[derive(Clone, Debug)]
pub struct NotificationResolver {
    messages: mpsc::Sender<ResolverEvent>,
    deletions: mpsc::Sender<ResolverEvent>,
    renames: mpsc::Sender<ResolverEvent>,
}

impl NotificationResolver {
    fn channels(capacity: usize) -> (Self, Queues) {
        let capacity = capacity.max(1);
        let (messages, messages_rx) = mpsc::channel(capacity);
        let (deletions, deletions_rx) = mpsc::channel(capacity);
        let (renames, renames_rx) = mpsc::channel(capacity);
        (
            Self {
                messages,
                deletions,
                renames,
            },
            Queues {
                messages: messages_rx,
                deletions: deletions_rx,
                renames: renames_rx,
            },
        )
    }

    /// Create the resolver with `capacity` per queue and default
    /// deduplication, then spawn the drain tasks.
    pub fn start(
        hub: HubHandle,
        read_model: Arc<dyn MessageReadModel>,
        capacity: usize,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let config = ResolverConfig {
            queue_capacity: capacity,
            ..ResolverConfig::default()
        };
        Self::start_with(hub, read_model, config)
    }

    /// Create the resolver and spawn one drain task per event kind.
    ///
    /// The tasks finish once every clone of the returned resolver is dropped
    /// and the queues are empty.
    pub fn start_with(
        hub: HubHandle,
        read_model: Arc<dyn MessageReadModel>,
        config: ResolverConfig,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (resolver, queues) = Self::channels(config.queue_capacity);
        let ctx = Arc::new(DrainContext { hub, read_model });
        let sent = MessageDeduplicator::new(config.dedup_capacity, config.dedup_ttl);
        let tasks = vec![
            tokio::spawn(drain("message_created", queues.messages, ctx.clone(), sent)),
            tokio::spawn(drain(
                "conversation_deleted",
                queues.deletions,
                ctx.clone(),
                MessageDeduplicator::disabled(),
            )),
            tokio::spawn(drain(
                "conversation_renamed",
                queues.renames,
                ctx,
                MessageDeduplicator::disabled(),
            )),
        ];
        (resolver, tasks)
    }

    /// Queue an event without waiting. Returns whether it was accepted.
    pub fn dispatch(&self, event: ResolverEvent) -> bool {
        let kind = event.kind();
        let queue = match event {
            ResolverEvent::MessageCreated { .. } => &self.messages,
            ResolverEvent::ConversationDeleted { .. } => &self.deletions,
            ResolverEvent::ConversationRenamed { .. } => &self.renames,
        };
        match queue.try_send(event) {
            Ok(()) => {
                counter!(RESOLVER_EVENTS_TOTAL, "kind" => kind).increment(1);
                true
            }
            Err(TrySendError::Full(event)) => {
                counter!(RESOLVER_EVENTS_DROPPED_TOTAL, "kind" => kind, "reason" => "queue_full")
                    .increment(1);
                warn!(kind, ?event, "resolver queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                counter!(RESOLVER_EVENTS_DROPPED_TOTAL, "kind" => kind, "reason" => "closed")
                    .increment(1);
                warn!(kind, "resolver stopped, dropping event");
                false
            }
        }
    }

    /// Signal that a message was stored.
    pub fn dispatch_message_created(&self, message_id: MessageId, author_id: UserId) -> bool {
        self.dispatch(ResolverEvent::MessageCreated {
            message_id,
            author_id,
        })
    }

    /// Signal that a conversation was deleted.
    pub fn dispatch_conversation_deleted(&self, conversation_id: ConversationId) -> bool {
        self.dispatch(ResolverEvent::ConversationDeleted { conversation_id })
    }

    /// Signal that a conversation was renamed.
    pub fn dispatch_conversation_renamed(
        &self,
        conversation_id: ConversationId,
        new_name: impl Into<String>,
    ) -> bool {
        self.dispatch(ResolverEvent::ConversationRenamed {
            conversation_id,
            new_name: new_name.into(),
        })
    }
}

struct DrainContext {
    hub: HubHandle,
    read_model: Arc<dyn MessageReadModel>,
}

#[instrument(name = "resolver", skip(rx, ctx, sent))]
async fn drain(
    kind: &'static str,
    mut rx: mpsc::Receiver<ResolverEvent>,
    ctx: Arc<DrainContext>,
    mut sent: MessageDeduplicator,
) {
    debug!("drain started");
    while let Some(event) = rx.recv().await {
        if let Err(HubError::Closed) = resolve(&ctx, event, &mut sent).await {
            warn!("hub stopped, resolver drain exiting");
            break;
        }
    }
    info!("drain stopped");
}

async fn resolve(
    ctx: &DrainContext,
    event: ResolverEvent,
    sent: &mut MessageDeduplicator,
) -> Result<(), HubError> {
    match event {
        ResolverEvent::MessageCreated {
            message_id,
            author_id,
        } => {
            if sent.already_sent(message_id) {
                counter!(
                    RESOLVER_EVENTS_DROPPED_TOTAL,
                    "kind" => "message_created",
                    "reason" => "duplicate"
                )
                .increment(1);
                debug!(%message_id, "message already broadcast, skipping");
                return Ok(());
            }
            let dto = match ctx.read_model.get_message_by_id(message_id, author_id).await {
                Ok(dto) => dto,
                Err(err) => {
                    let reason = if err.is_not_found() { "not_found" } else { "backend" };
                    counter!(
                        RESOLVER_EVENTS_DROPPED_TOTAL,
                        "kind" => "message_created",
                        "reason" => reason
                    )
                    .increment(1);
                    warn!(%message_id, %author_id, error = %err, "message lookup failed, dropping event");
                    return Ok(());
                }
            };
            let topic = Topic::conversation(dto.conversation_id);
            debug!(%message_id, %topic, "resolved message");
            let payload = Payload::per_recipient(move |user| {
                Notification::Message(dto.for_recipient(user))
            });
            ctx.hub.broadcast_to_topic(topic, payload).await?;
            sent.mark_sent(message_id);
            Ok(())
        }
        ResolverEvent::ConversationDeleted { conversation_id } => {
            ctx.hub
                .delete_topic(
                    Topic::conversation(conversation_id),
                    Notification::ConversationDeleted { conversation_id },
                )
                .await
        }
        ResolverEvent::ConversationRenamed {
            conversation_id,
            new_name,
        } => {
            ctx.hub
                .broadcast_to_topic(
                    Topic::conversation(conversation_id),
                    Notification::ConversationRenamed {
                        conversation_id,
                        new_name,
                    },
                )
                .await
        }
    }
}
