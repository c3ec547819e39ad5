//! Error types for the notification core.

use thiserror::Error;

/// Errors returned by [`HubHandle`](crate::HubHandle) operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// The control loop has stopped; nothing can be registered or delivered.
    #[error("hub control loop has stopped")]
    Closed,
}

/// Errors from the read-model collaborators.
#[derive(Debug, Error)]
pub enum ReadModelError {
    /// The entity no longer exists (or never did).
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind, e.g. `"message"`.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },
    /// The backing store failed.
    #[error("read model backend error: {0}")]
    Backend(String),
}

impl ReadModelError {
    /// Shorthand for [`ReadModelError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether this is a stale-entity error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors returned by inbound message handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// `data` did not match the handler's schema.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// The command the handler invoked was rejected.
    #[error("command failed: {0}")]
    Command(String),
}

impl HandlerError {
    /// Stable label for logs and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Command(_) => "command",
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}
