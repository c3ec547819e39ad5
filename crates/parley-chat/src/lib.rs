//! # parley-chat
//!
//! The command layer in front of the notification hub.
//!
//! [`MemoryChatStore`] keeps users, conversations, participants and
//! messages in process memory and serves the hub's read interfaces.
//! [`ChatCommands`] validates and persists each change, then signals the hub
//! (subscriptions) or the resolver (notifications) without waiting for
//! delivery.

#![deny(unsafe_code)]

pub mod commands;
pub mod errors;
pub mod store;

pub use commands::ChatCommands;
pub use errors::ChatError;
pub use store::{Conversation, MemoryChatStore, StoredMessage, UserProfile};
