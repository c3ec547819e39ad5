//! # parley-hub
//!
//! The real-time notification core.
//!
//! - [`ClientConnection`]: one live transport's identity and bounded outbound queue
//! - [`DispatchTable`]: inbound message kind → handler, built once at startup
//! - [`Hub`] / [`HubHandle`]: the connection and topic registry, mutated only
//!   by a single control loop fed through a bounded command channel
//! - [`NotificationResolver`]: turns "something was persisted" signals into
//!   read-model payloads and hands them to the hub for fan-out, skipping
//!   messages already broadcast ([`MessageDeduplicator`])
//!
//! Command handlers never touch the registry; they persist, then signal the
//! resolver (non-blocking) or send a subscription command to the hub.

#![deny(unsafe_code)]

pub mod connection;
pub mod dedup;
pub mod dispatch;
pub mod errors;
pub mod heartbeat;
pub mod hub;
pub mod metrics;
pub mod read_model;
pub mod registry;
pub mod resolver;

pub use connection::ClientConnection;
pub use dedup::MessageDeduplicator;
pub use dispatch::{DispatchTable, NotificationHandler};
pub use errors::{HandlerError, HubError, ReadModelError};
pub use heartbeat::HeartbeatConfig;
pub use hub::{Hub, HubHandle, HubStats, Payload};
pub use read_model::{MessageReadModel, TopicDirectory};
pub use resolver::{NotificationResolver, ResolverConfig, ResolverEvent};
