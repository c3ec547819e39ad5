//! Read-model DTOs pushed to clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, MessageId, UserId};

/// Kind of a stored message. Everything except `Text` is a system message
/// produced by a membership or conversation change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain user text.
    Text,
    /// The conversation was renamed; content holds the new name.
    RenamedConversation,
    /// The author left the conversation.
    LeftConversation,
    /// The author joined the conversation.
    JoinedConversation,
    /// The author was invited to the conversation.
    InvitedConversation,
}

impl MessageKind {
    /// Render the display text of a message of this kind.
    pub fn render_text(self, content: &str, author_name: &str) -> String {
        let name = if author_name.is_empty() {
            "Unknown"
        } else {
            author_name
        };
        match self {
            Self::Text => content.to_owned(),
            Self::RenamedConversation => format!("{name} renamed chat to {content}"),
            Self::LeftConversation => format!("{name} left"),
            Self::JoinedConversation => format!("{name} joined"),
            Self::InvitedConversation => format!("{name} was invited"),
        }
    }
}

/// Public profile of a message author.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDto {
    /// User identity.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Avatar URL or token; may be empty.
    pub avatar: String,
}

/// A message as rendered for one recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDto {
    /// Message identity.
    pub id: MessageId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Rendered text (system messages are expanded).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Author.
    pub user: UserDto,
    /// Whether the recipient did not author this text message.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_inbound: bool,
    /// Owning conversation.
    pub conversation_id: ConversationId,
}

impl MessageDto {
    /// Copy of this message with `is_inbound` computed for `recipient`.
    ///
    /// Only text messages are ever inbound; system messages render the same
    /// for everyone.
    #[must_use]
    pub fn for_recipient(&self, recipient: UserId) -> Self {
        let mut dto = self.clone();
        dto.is_inbound = self.kind == MessageKind::Text && self.user.id != recipient;
        dto
    }
}
