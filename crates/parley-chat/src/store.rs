//! In-memory chat persistence.
//!
//! Stands in for the relational store: every write is applied under one
//! lock and is visible to the next read, which is all the notification
//! core relies on.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use parley_core::{ConversationId, MessageDto, MessageId, MessageKind, Topic, UserDto, UserId};
use parley_hub::{MessageReadModel, ReadModelError, TopicDirectory};

use crate::errors::{ChatError, Result};

/// Public profile of a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserProfile {
    /// User identity.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Avatar reference.
    pub avatar: String,
}

/// A conversation and its membership.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conversation {
    /// Conversation identity.
    pub id: ConversationId,
    /// Current name.
    pub name: String,
    /// Creator; the only user allowed to rename or delete.
    pub owner: UserId,
    /// Current participants, owner included.
    pub participants: BTreeSet<UserId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Whether `user_id` participates.
    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }
}

/// A persisted message before rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredMessage {
    /// Message identity.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Author (for system messages, the user the event is about).
    pub author: UserId,
    /// Message kind.
    pub kind: MessageKind,
    /// Raw content: the text, or the new name for renames.
    pub content: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, UserProfile>,
    conversations: HashMap<ConversationId, Conversation>,
    messages: HashMap<MessageId, StoredMessage>,
}

impl Inner {
    fn conversation_mut(&mut self, id: ConversationId) -> Result<&mut Conversation> {
        self.conversations
            .get_mut(&id)
            .ok_or_else(|| ChatError::not_found("conversation", id))
    }

    fn render(&self, message: &StoredMessage, requester: UserId) -> MessageDto {
        let profile = self.users.get(&message.author);
        let name = profile.map(|p| p.name.as_str()).unwrap_or_default();
        MessageDto {
            id: message.id,
            created_at: message.created_at,
            text: message.kind.render_text(&message.content, name),
            kind: message.kind,
            user: UserDto {
                id: message.author,
                name: name.to_owned(),
                avatar: profile.map(|p| p.avatar.clone()).unwrap_or_default(),
            },
            is_inbound: false,
            conversation_id: message.conversation_id,
        }
        .for_recipient(requester)
    }
}

/// Users, conversations and messages behind a single lock.
#[derive(Default)]
pub struct MemoryChatStore {
    inner: RwLock<Inner>,
}

impl MemoryChatStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user profile.
    pub fn upsert_user(&self, profile: UserProfile) {
        let _ = self.inner.write().users.insert(profile.id, profile);
    }

    /// Create a conversation owned (and joined) by `owner`.
    pub fn insert_conversation(&self, owner: UserId, name: &str) -> Conversation {
        let conversation = Conversation {
            id: ConversationId::new(),
            name: name.to_owned(),
            owner,
            participants: BTreeSet::from([owner]),
            created_at: Utc::now(),
        };
        let _ = self
            .inner
            .write()
            .conversations
            .insert(conversation.id, conversation.clone());
        conversation
    }

    /// Look up a conversation.
    pub fn conversation(&self, id: ConversationId) -> Option<Conversation> {
        self.inner.read().conversations.get(&id).cloned()
    }

    /// Add a participant. Returns whether they were new.
    pub fn add_participant(&self, id: ConversationId, user_id: UserId) -> Result<bool> {
        let mut inner = self.inner.write();
        Ok(inner.conversation_mut(id)?.participants.insert(user_id))
    }

    /// Remove a participant. Returns whether they were present.
    pub fn remove_participant(&self, id: ConversationId, user_id: UserId) -> Result<bool> {
        let mut inner = self.inner.write();
        Ok(inner.conversation_mut(id)?.participants.remove(&user_id))
    }

    /// Change a conversation's name.
    pub fn rename_conversation(&self, id: ConversationId, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        name.clone_into(&mut inner.conversation_mut(id)?.name);
        Ok(())
    }

    /// Remove a conversation and every message in it.
    pub fn remove_conversation(&self, id: ConversationId) -> Result<Conversation> {
        let mut inner = self.inner.write();
        let conversation = inner
            .conversations
            .remove(&id)
            .ok_or_else(|| ChatError::not_found("conversation", id))?;
        inner.messages.retain(|_, m| m.conversation_id != id);
        Ok(conversation)
    }

    /// Store a message in an existing conversation.
    pub fn append_message(
        &self,
        conversation_id: ConversationId,
        author: UserId,
        kind: MessageKind,
        content: &str,
    ) -> Result<StoredMessage> {
        let mut inner = self.inner.write();
        if !inner.conversations.contains_key(&conversation_id) {
            return Err(ChatError::not_found("conversation", conversation_id));
        }
        let message = StoredMessage {
            id: MessageId::new(),
            conversation_id,
            author,
            kind,
            content: content.to_owned(),
            created_at: Utc::now(),
        };
        let _ = inner.messages.insert(message.id, message.clone());
        Ok(message)
    }

    /// Messages of a conversation, oldest first.
    pub fn messages(&self, conversation_id: ConversationId) -> Vec<StoredMessage> {
        let inner = self.inner.read();
        let mut messages: Vec<StoredMessage> = inner
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| (m.created_at, m.id));
        messages
    }

    /// Render one message for `requester`.
    pub fn render_message(&self, id: MessageId, requester: UserId) -> Option<MessageDto> {
        let inner = self.inner.read();
        let message = inner.messages.get(&id)?;
        Some(inner.render(message, requester))
    }

    /// Conversations `user_id` participates in.
    pub fn conversations_of(&self, user_id: UserId) -> Vec<ConversationId> {
        self.inner
            .read()
            .conversations
            .values()
            .filter(|c| c.has_participant(user_id))
            .map(|c| c.id)
            .collect()
    }
}

#[async_trait]
impl MessageReadModel for MemoryChatStore {
    async fn get_message_by_id(
        &self,
        message_id: MessageId,
        requesting_user: UserId,
    ) -> std::result::Result<MessageDto, ReadModelError> {
        self.render_message(message_id, requesting_user)
            .ok_or_else(|| ReadModelError::not_found("message", message_id))
    }
}

#[async_trait]
impl TopicDirectory for MemoryChatStore {
    async fn topics_for_user(&self, user_id: UserId) -> std::result::Result<Vec<Topic>, ReadModelError> {
        let mut topics: Vec<Topic> = self
            .conversations_of(user_id)
            .into_iter()
            .map(Topic::conversation)
            .collect();
        topics.push(Topic::user(user_id));
        Ok(topics)
    }

    async fn user_ids_for_topic(&self, topic: &Topic) -> std::result::Result<Vec<UserId>, ReadModelError> {
        if let Some(id) = topic.conversation_id() {
            let conversation = self
                .conversation(id)
                .ok_or_else(|| ReadModelError::not_found("conversation", id))?;
            return Ok(conversation.participants.into_iter().collect());
        }
        Ok(topic.user_id().into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn store_with_user(name: &str) -> (MemoryChatStore, UserId) {
        let store = MemoryChatStore::new();
        let id = UserId::new();
        store.upsert_user(UserProfile {
            id,
            name: name.into(),
            avatar: "a.png".into(),
        });
        (store, id)
    }

    #[test]
    fn owner_is_first_participant() {
        let (store, owner) = store_with_user("alice");
        let conv = store.insert_conversation(owner, "general");
        assert!(conv.has_participant(owner));
        assert_eq!(store.conversation(conv.id).unwrap().name, "general");
        assert_eq!(store.conversations_of(owner), vec![conv.id]);
    }

    #[test]
    fn participants_add_and_remove() {
        let (store, owner) = store_with_user("alice");
        let bob = UserId::new();
        let conv = store.insert_conversation(owner, "general");
        assert_eq!(store.add_participant(conv.id, bob), Ok(true));
        assert_eq!(store.add_participant(conv.id, bob), Ok(false));
        assert_eq!(store.remove_participant(conv.id, bob), Ok(true));
        assert_eq!(store.remove_participant(conv.id, bob), Ok(false));
        assert_matches!(
            store.add_participant(ConversationId::new(), bob),
            Err(ChatError::NotFound { entity: "conversation", .. })
        );
    }

    #[test]
    fn render_uses_author_profile() {
        let (store, alice) = store_with_user("alice");
        let conv = store.insert_conversation(alice, "general");
        let msg = store
            .append_message(conv.id, alice, MessageKind::RenamedConversation, "Lounge")
            .unwrap();
        let dto = store.render_message(msg.id, UserId::new()).unwrap();
        assert_eq!(dto.text, "alice renamed chat to Lounge");
        assert_eq!(dto.user.avatar, "a.png");
        assert!(!dto.is_inbound);
    }

    #[test]
    fn render_unknown_author() {
        let store = MemoryChatStore::new();
        let ghost = UserId::new();
        let conv = store.insert_conversation(ghost, "general");
        let msg = store
            .append_message(conv.id, ghost, MessageKind::LeftConversation, "")
            .unwrap();
        let dto = store.render_message(msg.id, ghost).unwrap();
        assert_eq!(dto.text, "Unknown left");
    }

    #[test]
    fn text_is_inbound_for_others() {
        let (store, alice) = store_with_user("alice");
        let conv = store.insert_conversation(alice, "general");
        let msg = store
            .append_message(conv.id, alice, MessageKind::Text, "hi")
            .unwrap();
        assert!(!store.render_message(msg.id, alice).unwrap().is_inbound);
        assert!(store.render_message(msg.id, UserId::new()).unwrap().is_inbound);
    }

    #[test]
    fn remove_conversation_drops_messages() {
        let (store, alice) = store_with_user("alice");
        let conv = store.insert_conversation(alice, "general");
        let msg = store
            .append_message(conv.id, alice, MessageKind::Text, "hi")
            .unwrap();
        let _ = store.remove_conversation(conv.id).unwrap();
        assert!(store.conversation(conv.id).is_none());
        assert!(store.render_message(msg.id, alice).is_none());
        assert!(store.messages(conv.id).is_empty());
        assert_matches!(
            store.append_message(conv.id, alice, MessageKind::Text, "late"),
            Err(ChatError::NotFound { .. })
        );
    }

    #[test]
    fn messages_oldest_first() {
        let (store, alice) = store_with_user("alice");
        let conv = store.insert_conversation(alice, "general");
        let first = store.append_message(conv.id, alice, MessageKind::Text, "1").unwrap();
        let second = store.append_message(conv.id, alice, MessageKind::Text, "2").unwrap();
        let ids: Vec<_> = store.messages(conv.id).into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn read_model_not_found() {
        let store = MemoryChatStore::new();
        let err = store
            .get_message_by_id(MessageId::new(), UserId::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn topic_directory() {
        let (store, alice) = store_with_user("alice");
        let bob = UserId::new();
        let conv = store.insert_conversation(alice, "general");
        let _ = store.add_participant(conv.id, bob).unwrap();

        let topics = store.topics_for_user(bob).await.unwrap();
        assert!(topics.contains(&Topic::conversation(conv.id)));
        assert!(topics.contains(&Topic::user(bob)));

        let mut users = store
            .user_ids_for_topic(&Topic::conversation(conv.id))
            .await
            .unwrap();
        users.sort();
        let mut expected = vec![alice, bob];
        expected.sort();
        assert_eq!(users, expected);

        assert_eq!(
            store.user_ids_for_topic(&Topic::user(bob)).await.unwrap(),
            vec![bob]
        );
        assert!(
            store
                .user_ids_for_topic(&Topic::conversation(ConversationId::new()))
                .await
                .is_err()
        );
    }
}
