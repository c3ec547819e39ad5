//! Heartbeat timing for a connection's pumps.
//!
//! The receive pump enforces a read deadline of `pong_wait`, refreshed by
//! every inbound frame. The send pump pings every `ping_period` (90% of
//! `pong_wait`) so a healthy peer's pong always lands before the deadline.

use std::time::Duration;

use parley_settings::WebSocketSettings;

const MIN_PING_PERIOD: Duration = Duration::from_millis(1);

/// Timing parameters shared by the send and receive pumps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Read deadline; a peer silent for this long is dead.
    pub pong_wait: Duration,
    /// Interval between pings.
    pub ping_period: Duration,
    /// Deadline for any single frame write.
    pub write_wait: Duration,
}

impl HeartbeatConfig {
    /// Derive the ping period from the read deadline.
    ///
    /// The period is at least one millisecond, since a zero interval cannot
    /// be timed.
    pub fn new(pong_wait: Duration, write_wait: Duration) -> Self {
        Self {
            pong_wait,
            ping_period: (pong_wait / 10 * 9).max(MIN_PING_PERIOD),
            write_wait,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(10))
    }
}

impl From<&WebSocketSettings> for HeartbeatConfig {
    fn from(ws: &WebSocketSettings) -> Self {
        Self {
            pong_wait: ws.pong_wait(),
            ping_period: ws.ping_period().max(MIN_PING_PERIOD),
            write_wait: ws.write_wait(),
        }
    }
}
