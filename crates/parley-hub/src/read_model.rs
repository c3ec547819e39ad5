//! Read interfaces the core consumes from the persistence layer.

use async_trait::async_trait;
use parley_core::{MessageDto, MessageId, Topic, UserId};

use crate::errors::ReadModelError;

/// Message lookups used to build `message` notifications.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageReadModel: Send + Sync {
    /// Load a message rendered for `requesting_user`.
    ///
    /// Returns [`ReadModelError::NotFound`] if the message (or its
    /// conversation) has been deleted since the event was raised.
    async fn get_message_by_id(
        &self,
        message_id: MessageId,
        requesting_user: UserId,
    ) -> Result<MessageDto, ReadModelError>;
}

/// Topic membership as persisted by the command layer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TopicDirectory: Send + Sync {
    /// Every topic a new connection of `user_id` should start in.
    async fn topics_for_user(&self, user_id: UserId) -> Result<Vec<Topic>, ReadModelError>;

    /// Users who belong to `topic`.
    async fn user_ids_for_topic(&self, topic: &Topic) -> Result<Vec<UserId>, ReadModelError>;
}
