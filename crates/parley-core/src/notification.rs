//! WebSocket envelopes.
//!
//! Server → client frames are a closed union serialised as
//! `{"type": <kind>, "data": <payload>}`; each `type` value has exactly one
//! payload schema. Client → server frames keep `data` opaque until the
//! dispatch table hands it to the handler registered for `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dto::MessageDto;
use crate::ids::ConversationId;

/// A server-pushed notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Notification {
    /// A message (text or system) was stored in a conversation.
    Message(MessageDto),
    /// A conversation was deleted; clients drop it locally.
    ConversationDeleted {
        /// Deleted conversation.
        conversation_id: ConversationId,
    },
    /// A conversation was renamed.
    ConversationRenamed {
        /// Renamed conversation.
        conversation_id: ConversationId,
        /// The name now in effect.
        new_name: String,
    },
}

impl Notification {
    /// Wire `type` tag of this notification.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::ConversationDeleted { .. } => "conversation_deleted",
            Self::ConversationRenamed { .. } => "conversation_renamed",
        }
    }
}

/// An inbound frame from a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IncomingEnvelope {
    /// Message kind selecting the handler.
    #[serde(rename = "type")]
    pub kind: String,
    /// Handler-defined payload.
    #[serde(default)]
    pub data: Value,
}

impl IncomingEnvelope {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
