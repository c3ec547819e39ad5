//! # parley-core
//!
//! Foundation types shared by every parley crate.
//!
//! - Branded ID newtypes over UUIDs ([`UserId`], [`ConnectionId`], ...)
//! - [`Topic`] broadcast keys (`conversation:<id>`, `user:<id>`)
//! - Wire envelopes: the outbound [`Notification`] union and the inbound
//!   [`IncomingEnvelope`]
//! - Read-model DTOs and system-message text rendering
//! - `tracing` subscriber initialisation

#![deny(unsafe_code)]

pub mod dto;
pub mod ids;
pub mod logging;
pub mod notification;
pub mod topic;

pub use dto::{MessageDto, MessageKind, UserDto};
pub use ids::{ConnectionId, ConversationId, MessageId, UserId};
pub use notification::{IncomingEnvelope, Notification};
pub use topic::Topic;
