//! Command layer errors.

use thiserror::Error;

/// Errors returned by chat commands.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    /// Referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },
    /// The caller may not perform this action.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// The request itself is invalid.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ChatError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Result type for chat commands.
pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            ChatError::not_found("conversation", "abc").to_string(),
            "conversation not found: abc"
        );
        assert_eq!(
            ChatError::Forbidden("only the owner can rename".into()).to_string(),
            "forbidden: only the owner can rename"
        );
    }
}
