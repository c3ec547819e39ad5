//! Metric name constants shared by the hub, the resolver and the server.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Notifications placed on an outbound queue (counter).
pub const HUB_NOTIFICATIONS_ENQUEUED_TOTAL: &str = "hub_notifications_enqueued_total";
/// Notifications dropped because an outbound queue was full (counter).
pub const HUB_NOTIFICATIONS_DROPPED_TOTAL: &str = "hub_notifications_dropped_total";
/// Topics with at least one subscriber (gauge).
pub const HUB_TOPICS_ACTIVE: &str = "hub_topics_active";
/// Resolver events accepted (counter, labels: kind).
pub const RESOLVER_EVENTS_TOTAL: &str = "resolver_events_total";
/// Resolver events discarded (counter, labels: kind, reason).
pub const RESOLVER_EVENTS_DROPPED_TOTAL: &str = "resolver_events_dropped_total";
/// Inbound envelopes whose kind has no handler (counter).
pub const DISPATCH_UNKNOWN_KIND_TOTAL: &str = "dispatch_unknown_kind_total";
/// Inbound handler failures (counter, labels: kind, error_type).
pub const DISPATCH_ERRORS_TOTAL: &str = "dispatch_errors_total";
