//! Chat commands.
//!
//! Each command validates, persists, and only then signals the hub or the
//! notification resolver. Signals never fail the command: a stopped hub or a
//! full resolver queue is logged and the command still returns success,
//! because the write has already happened.

use std::sync::Arc;

use parley_core::{ConversationId, MessageId, MessageKind, Topic, UserId};
use parley_hub::{HubHandle, NotificationResolver, TopicDirectory};
use tracing::{info, instrument, warn};

use crate::errors::{ChatError, Result};
use crate::store::{Conversation, MemoryChatStore, StoredMessage};

/// Longest accepted conversation name, in characters.
const MAX_NAME_LEN: usize = 100;

/// Command handlers over the chat store.
#[derive(Clone)]
pub struct ChatCommands {
    store: Arc<MemoryChatStore>,
    hub: HubHandle,
    resolver: NotificationResolver,
}

impl ChatCommands {
    /// Wire the command layer to its store, the hub and the resolver.
    pub fn new(store: Arc<MemoryChatStore>, hub: HubHandle, resolver: NotificationResolver) -> Self {
        Self {
            store,
            hub,
            resolver,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<MemoryChatStore> {
        &self.store
    }

    /// Create a conversation and subscribe its owner's live connections.
    #[instrument(skip(self))]
    pub async fn create_conversation(&self, owner: UserId, name: &str) -> Result<Conversation> {
        let name = validate_name(name)?;
        let conversation = self.store.insert_conversation(owner, name);
        info!(conversation_id = %conversation.id, "conversation created");
        self.subscribe(Topic::conversation(conversation.id), owner).await;
        Ok(conversation)
    }

    /// Join a conversation.
    #[instrument(skip(self))]
    pub async fn join(&self, conversation_id: ConversationId, user_id: UserId) -> Result<()> {
        if !self.store.add_participant(conversation_id, user_id)? {
            return Err(ChatError::InvalidInput("already a participant".into()));
        }
        self.subscribe_participants(Topic::conversation(conversation_id)).await;
        let message = self.store.append_message(
            conversation_id,
            user_id,
            MessageKind::JoinedConversation,
            "",
        )?;
        self.notify_message(&message);
        Ok(())
    }

    /// Invite another user; the inviter must already participate.
    #[instrument(skip(self))]
    pub async fn invite(
        &self,
        conversation_id: ConversationId,
        inviter: UserId,
        invitee: UserId,
    ) -> Result<()> {
        let conversation = self.conversation(conversation_id)?;
        if !conversation.has_participant(inviter) {
            return Err(ChatError::Forbidden("not a participant".into()));
        }
        if !self.store.add_participant(conversation_id, invitee)? {
            return Err(ChatError::InvalidInput("invitee already a participant".into()));
        }
        self.subscribe_participants(Topic::conversation(conversation_id)).await;
        let message = self.store.append_message(
            conversation_id,
            invitee,
            MessageKind::InvitedConversation,
            "",
        )?;
        self.notify_message(&message);
        Ok(())
    }

    /// Leave a conversation. The owner cannot leave.
    ///
    /// The `left` message is signalled before the hub unsubscribes the
    /// user, but both are asynchronous; the leaver may or may not see it.
    #[instrument(skip(self))]
    pub async fn leave(&self, conversation_id: ConversationId, user_id: UserId) -> Result<()> {
        let conversation = self.conversation(conversation_id)?;
        if conversation.owner == user_id {
            return Err(ChatError::Forbidden("owner cannot leave".into()));
        }
        if !self.store.remove_participant(conversation_id, user_id)? {
            return Err(ChatError::Forbidden("not a participant".into()));
        }
        let message = self.store.append_message(
            conversation_id,
            user_id,
            MessageKind::LeftConversation,
            "",
        )?;
        self.notify_message(&message);
        if let Err(err) = self
            .hub
            .unsubscribe(Topic::conversation(conversation_id), user_id)
            .await
        {
            warn!(error = %err, "failed to unsubscribe from conversation");
        }
        Ok(())
    }

    /// Rename a conversation. Owner only.
    #[instrument(skip(self))]
    pub async fn rename(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        new_name: &str,
    ) -> Result<()> {
        let new_name = validate_name(new_name)?;
        let conversation = self.conversation(conversation_id)?;
        if conversation.owner != user_id {
            return Err(ChatError::Forbidden("only the owner can rename".into()));
        }
        self.store.rename_conversation(conversation_id, new_name)?;
        let message = self.store.append_message(
            conversation_id,
            user_id,
            MessageKind::RenamedConversation,
            new_name,
        )?;
        self.notify_message(&message);
        let _ = self
            .resolver
            .dispatch_conversation_renamed(conversation_id, new_name);
        Ok(())
    }

    /// Delete a conversation and its messages. Owner only.
    #[instrument(skip(self))]
    pub async fn delete(&self, conversation_id: ConversationId, user_id: UserId) -> Result<()> {
        let conversation = self.conversation(conversation_id)?;
        if conversation.owner != user_id {
            return Err(ChatError::Forbidden("only the owner can delete".into()));
        }
        let _ = self.store.remove_conversation(conversation_id)?;
        info!("conversation deleted");
        let _ = self.resolver.dispatch_conversation_deleted(conversation_id);
        Ok(())
    }

    /// Post a text message. The author must participate.
    #[instrument(skip(self, content))]
    pub async fn send_text_message(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        content: &str,
    ) -> Result<MessageId> {
        if content.trim().is_empty() {
            return Err(ChatError::InvalidInput("message content is empty".into()));
        }
        let conversation = self.conversation(conversation_id)?;
        if !conversation.has_participant(user_id) {
            return Err(ChatError::Forbidden("not a participant".into()));
        }
        let message = self
            .store
            .append_message(conversation_id, user_id, MessageKind::Text, content)?;
        self.notify_message(&message);
        Ok(message.id)
    }

    fn conversation(&self, id: ConversationId) -> Result<Conversation> {
        self.store
            .conversation(id)
            .ok_or_else(|| ChatError::not_found("conversation", id))
    }

    fn notify_message(&self, message: &StoredMessage) {
        let _ = self
            .resolver
            .dispatch_message_created(message.id, message.author);
    }

    /// Subscribe every participant's live connections to `topic`.
    ///
    /// Connections already in the topic are left as they are, so this also
    /// repairs any participant connection that missed an earlier subscribe.
    async fn subscribe_participants(&self, topic: Topic) {
        match self.store.user_ids_for_topic(&topic).await {
            Ok(users) => {
                for user_id in users {
                    self.subscribe(topic.clone(), user_id).await;
                }
            }
            Err(err) => warn!(%topic, error = %err, "failed to load participants"),
        }
    }

    async fn subscribe(&self, topic: Topic, user_id: UserId) {
        if let Err(err) = self.hub.subscribe(topic, user_id).await {
            warn!(%user_id, error = %err, "failed to subscribe to conversation");
        }
    }
}

fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChatError::InvalidInput("conversation name is empty".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ChatError::InvalidInput(format!(
            "conversation name longer than {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name)
}
