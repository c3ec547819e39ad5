//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a partial JSON file only needs the keys it overrides.

use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Accepted `websocket.pongWaitMs`, from one second to one hour.
pub const PONG_WAIT_MS_RANGE: RangeInclusive<u64> = 1000..=3_600_000;

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Per-connection transport timing and buffers.
    pub websocket: WebSocketSettings,
    /// Hub control loop.
    pub hub: HubSettings,
    /// Notification resolver queues.
    pub resolver: ResolverSettings,
    /// Token verification.
    pub auth: AuthSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl ParleySettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !PONG_WAIT_MS_RANGE.contains(&self.websocket.pong_wait_ms) {
            return Err(SettingsError::InvalidValue(format!(
                "websocket.pongWaitMs must be within {}..={}",
                PONG_WAIT_MS_RANGE.start(),
                PONG_WAIT_MS_RANGE.end()
            )));
        }
        if self.websocket.write_wait_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "websocket.writeWaitMs must be positive".into(),
            ));
        }
        if self.websocket.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "websocket.sendQueueCapacity must be positive".into(),
            ));
        }
        if self.hub.command_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.commandCapacity must be positive".into(),
            ));
        }
        if self.resolver.queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "resolver.queueCapacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Upgrades beyond this many live sockets are refused with 503.
    pub max_connections: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_connections: 10_000,
        }
    }
}

/// WebSocket transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketSettings {
    /// Read deadline: a peer silent for this long is considered dead.
    pub pong_wait_ms: u64,
    /// Deadline for a single frame write.
    pub write_wait_ms: u64,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
    /// Outbound notifications buffered per connection before dropping.
    pub send_queue_capacity: usize,
}

impl WebSocketSettings {
    /// Read deadline as a [`Duration`].
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Keepalive ping period, 90% of the read deadline.
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms.saturating_mul(9) / 10)
    }

    /// Write deadline as a [`Duration`].
    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            pong_wait_ms: 60_000,
            write_wait_ms: 10_000,
            max_message_size: 512,
            send_queue_capacity: 1024,
        }
    }
}

/// Hub control loop settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Capacity of the command channel feeding the control loop.
    pub command_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            command_capacity: 4096,
        }
    }
}

/// Notification resolver settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolverSettings {
    /// Capacity of each per-kind event queue.
    pub queue_capacity: usize,
    /// Message ids remembered to skip repeated broadcasts; 0 disables.
    pub dedup_capacity: usize,
    /// How long a broadcast message id is remembered.
    pub dedup_ttl_ms: u64,
}

impl ResolverSettings {
    /// Deduplication window as a [`Duration`].
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_millis(self.dedup_ttl_ms)
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            dedup_capacity: 10_000,
            dedup_ttl_ms: 300_000,
        }
    }
}

/// Authentication settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 signing secret. Empty rejects every token.
    pub jwt_secret: String,
    /// Cookie carrying the access token.
    pub cookie_name: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            cookie_name: "access_token".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
