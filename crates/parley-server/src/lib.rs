//! # parley-server
//!
//! Axum HTTP + `WebSocket` surface for the notification hub.
//!
//! - `GET /ws`: token-authenticated upgrade, one receive pump and one send
//!   pump per connection, heartbeat enforcement
//! - `GET /health`: liveness plus hub registry counts
//! - `GET /metrics`: Prometheus text exposition
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use auth::{AuthError, JwtVerifier, TokenVerifier};
pub use config::ServerConfig;
pub use server::{AppState, ParleyServer};
pub use shutdown::{DrainReport, ShutdownCoordinator};
