//! Server configuration.

use parley_hub::HeartbeatConfig;
use parley_settings::ParleySettings;

/// Configuration for the parley server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Maximum concurrent `WebSocket` connections.
    pub max_connections: usize,
    /// Max inbound `WebSocket` message size in bytes.
    pub max_message_size: usize,
    /// Outbound queue capacity per connection.
    pub send_queue_capacity: usize,
    /// Ping, pong and write deadlines.
    pub heartbeat: HeartbeatConfig,
    /// Cookie carrying the access token.
    pub cookie_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 10_000,
            max_message_size: 512,
            send_queue_capacity: 1024,
            heartbeat: HeartbeatConfig::default(),
            cookie_name: "access_token".into(),
        }
    }
}

impl From<&ParleySettings> for ServerConfig {
    fn from(settings: &ParleySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.server.max_connections,
            max_message_size: settings.websocket.max_message_size,
            send_queue_capacity: settings.websocket.send_queue_capacity,
            heartbeat: HeartbeatConfig::from(&settings.websocket),
            cookie_name: settings.auth.cookie_name.clone(),
        }
    }
}
