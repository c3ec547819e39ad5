//! Inbound message handlers registered in the dispatch table.

use async_trait::async_trait;
use parley_chat::ChatCommands;
use parley_core::{ConversationId, UserId};
use parley_hub::{DispatchTable, HandlerError, NotificationHandler};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Inbound kind for posting a text message.
pub const MESSAGE_KIND: &str = "message";

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    content: String,
    conversation_id: ConversationId,
}

/// `message`: post `data.content` to `data.conversation_id` as the sender.
pub struct SendMessageHandler {
    commands: ChatCommands,
}

impl SendMessageHandler {
    /// Handler backed by the chat command layer.
    pub fn new(commands: ChatCommands) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl NotificationHandler for SendMessageHandler {
    async fn handle(&self, user_id: UserId, data: Value) -> Result<(), HandlerError> {
        let request: SendMessageRequest = serde_json::from_value(data)?;
        let message_id = self
            .commands
            .send_text_message(request.conversation_id, user_id, &request.content)
            .await
            .map_err(|err| HandlerError::Command(err.to_string()))?;
        debug!(%message_id, conversation_id = %request.conversation_id, "message stored");
        Ok(())
    }
}

/// Register every inbound handler.
pub fn register_all(table: &mut DispatchTable, commands: &ChatCommands) {
    table.register(MESSAGE_KIND, SendMessageHandler::new(commands.clone()));
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use parley_chat::{MemoryChatStore, UserProfile};
    use parley_hub::{Hub, NotificationResolver};
    use serde_json::json;

    use super::*;

    fn commands() -> ChatCommands {
        let (hub, _task) = Hub::spawn(64);
        let store = Arc::new(MemoryChatStore::new());
        let (resolver, _tasks) = NotificationResolver::start(hub.clone(), store.clone(), 16);
        ChatCommands::new(store, hub, resolver)
    }

    fn user(commands: &ChatCommands, name: &str) -> UserId {
        let id = UserId::new();
        commands.store().upsert_user(UserProfile {
            id,
            name: name.into(),
            avatar: String::new(),
        });
        id
    }

    #[tokio::test]
    async fn stores_message_from_participant() {
        let commands = commands();
        let alice = user(&commands, "alice");
        let conversation = commands.create_conversation(alice, "general").await.unwrap();

        let handler = SendMessageHandler::new(commands.clone());
        handler
            .handle(
                alice,
                json!({"content": "hello", "conversation_id": conversation.id}),
            )
            .await
            .unwrap();

        let messages = commands.store().messages(conversation.id);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[0].author, alice);
    }

    #[tokio::test]
    async fn rejects_outsider() {
        let commands = commands();
        let alice = user(&commands, "alice");
        let mallory = user(&commands, "mallory");
        let conversation = commands.create_conversation(alice, "general").await.unwrap();

        let handler = SendMessageHandler::new(commands.clone());
        let result = handler
            .handle(
                mallory,
                json!({"content": "hi", "conversation_id": conversation.id}),
            )
            .await;
        assert_matches!(result, Err(HandlerError::Command(_)));
        assert!(commands.store().messages(conversation.id).is_empty());
    }

    #[tokio::test]
    async fn rejects_malformed_payload() {
        let handler = SendMessageHandler::new(commands());
        let result = handler.handle(UserId::new(), json!({"content": 7})).await;
        assert_matches!(result, Err(HandlerError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn register_all_installs_message_kind() {
        let mut table = DispatchTable::new();
        register_all(&mut table, &commands());
        assert_eq!(table.kinds(), vec![MESSAGE_KIND.to_owned()]);
    }
}
