//! `WebSocket` sessions and the inbound message handlers they dispatch to.

pub mod handlers;
pub mod session;
