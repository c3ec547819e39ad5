//! Broadcast scope keys.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, UserId};

const CONVERSATION_PREFIX: &str = "conversation:";
const USER_PREFIX: &str = "user:";

/// A named broadcast scope, e.g. `conversation:<id>` or `user:<id>`.
///
/// Cheap to clone; the hub keys several maps by topic.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(Arc<str>);

impl Topic {
    /// Arbitrary topic key.
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// Topic carrying every event of one conversation.
    pub fn conversation(id: ConversationId) -> Self {
        Self::new(format!("{CONVERSATION_PREFIX}{id}"))
    }

    /// Personal inbox topic of one user.
    pub fn user(id: UserId) -> Self {
        Self::new(format!("{USER_PREFIX}{id}"))
    }

    /// The conversation this topic belongs to, if it is a conversation topic.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.0.strip_prefix(CONVERSATION_PREFIX)?.parse().ok()
    }

    /// The user this topic belongs to, if it is a personal topic.
    pub fn user_id(&self) -> Option<UserId> {
        self.0.strip_prefix(USER_PREFIX)?.parse().ok()
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_topic_format() {
        let id: ConversationId = "00000000-0000-0000-0000-00000000002a".parse().unwrap();
        assert_eq!(
            Topic::conversation(id).as_str(),
            "conversation:00000000-0000-0000-0000-00000000002a"
        );
    }

    #[test]
    fn user_topic_format() {
        let id = UserId::new();
        assert_eq!(Topic::user(id).to_string(), format!("user:{id}"));
    }

    #[test]
    fn conversation_id_roundtrip() {
        let id = ConversationId::new();
        assert_eq!(Topic::conversation(id).conversation_id(), Some(id));
    }

    #[test]
    fn user_id_roundtrip() {
        let id = UserId::new();
        assert_eq!(Topic::user(id).user_id(), Some(id));
        assert_eq!(Topic::conversation(ConversationId::new()).user_id(), None);
    }

    #[test]
    fn conversation_id_absent_for_other_topics() {
        assert_eq!(Topic::user(UserId::new()).conversation_id(), None);
        assert_eq!(Topic::from("conversation:42").conversation_id(), None);
    }

    #[test]
    fn clones_compare_equal() {
        let t = Topic::from("conversation:42");
        assert_eq!(t.clone(), t);
    }
}
