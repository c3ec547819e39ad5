//! `/health` endpoint.

use std::time::Instant;

use parley_hub::HubStats;
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the hub answers, `"unavailable"` once it has stopped.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered `WebSocket` connections.
    pub connections: usize,
    /// Topics with at least one subscriber.
    pub topics: usize,
}

/// Build a health response from the hub's registry counts.
///
/// `None` means the hub's control loop did not answer.
pub fn health_check(start_time: Instant, stats: Option<HubStats>) -> HealthResponse {
    let uptime_secs = start_time.elapsed().as_secs();
    match stats {
        Some(stats) => HealthResponse {
            status: "ok".into(),
            uptime_secs,
            connections: stats.connections,
            topics: stats.topics,
        },
        None => HealthResponse {
            status: "unavailable".into(),
            uptime_secs,
            connections: 0,
            topics: 0,
        },
    }
}

impl HealthResponse {
    /// Whether the server can accept and deliver.
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn stats(connections: usize, topics: usize) -> HubStats {
        HubStats {
            connections,
            users: connections,
            topics,
        }
    }

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), Some(stats(0, 0)));
        assert_eq!(resp.status, "ok");
        assert!(resp.is_ok());
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now().checked_sub(Duration::from_secs(60)).unwrap();
        let resp = health_check(start, Some(stats(0, 0)));
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn counters_tracked() {
        let resp = health_check(Instant::now(), Some(stats(5, 3)));
        assert_eq!(resp.connections, 5);
        assert_eq!(resp.topics, 3);
    }

    #[test]
    fn stopped_hub_is_unavailable() {
        let resp = health_check(Instant::now(), None);
        assert_eq!(resp.status, "unavailable");
        assert!(!resp.is_ok());
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), Some(stats(2, 1)));
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 2);
        assert_eq!(parsed["topics"], 1);
        assert!(parsed["uptime_secs"].is_number());
    }
}
