//! Inbound message dispatch.
//!
//! The table is built once at startup and then shared read-only behind an
//! `Arc` by every connection's receive pump. Lookups of unknown kinds are
//! silent no-ops so older and newer clients can coexist.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use parley_core::{IncomingEnvelope, UserId};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::errors::HandlerError;
use crate::metrics::{DISPATCH_ERRORS_TOTAL, DISPATCH_UNKNOWN_KIND_TOTAL};

/// Handler for one inbound message kind.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Handle `data` sent by `user_id`. The handler defines the schema of `data`.
    async fn handle(&self, user_id: UserId, data: Value) -> Result<(), HandlerError>;
}

/// Maps inbound message kinds to handlers.
pub struct DispatchTable {
    handlers: HashMap<String, Arc<dyn NotificationHandler>>,
    timeout: Duration,
}

impl DispatchTable {
    /// Maximum time a single handler is allowed to run.
    pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            timeout: Self::DEFAULT_HANDLER_TIMEOUT,
        }
    }

    /// Override the handler timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a handler for a message kind, replacing any previous one.
    pub fn register(&mut self, kind: &str, handler: impl NotificationHandler + 'static) {
        let _ = self.handlers.insert(kind.to_owned(), Arc::new(handler));
    }

    /// Registered kinds (sorted).
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Run the handler for `envelope.kind` to completion.
    ///
    /// Unknown kinds, handler errors and timeouts are logged, never returned:
    /// nothing is sent back to the client.
    pub async fn dispatch(&self, user_id: UserId, envelope: IncomingEnvelope) {
        let IncomingEnvelope { kind, data } = envelope;
        let Some(handler) = self.handlers.get(&kind) else {
            counter!(DISPATCH_UNKNOWN_KIND_TOTAL).increment(1);
            debug!(%user_id, kind, "no handler for message kind, ignoring");
            return;
        };

        match tokio::time::timeout(self.timeout, handler.handle(user_id, data)).await {
            Ok(Ok(())) => debug!(%user_id, kind, "message handled"),
            Ok(Err(err)) => {
                counter!(DISPATCH_ERRORS_TOTAL, "kind" => kind.clone(), "error_type" => err.code())
                    .increment(1);
                warn!(%user_id, kind, error = %err, "message handler failed");
            }
            Err(_elapsed) => {
                counter!(DISPATCH_ERRORS_TOTAL, "kind" => kind.clone(), "error_type" => "timeout")
                    .increment(1);
                error!(%user_id, kind, "message handler timed out after {:?}", self.timeout);
            }
        }
    }

    /// Run the handler on its own task so the caller's loop keeps reading.
    pub fn spawn_dispatch(self: &Arc<Self>, user_id: UserId, envelope: IncomingEnvelope) -> JoinHandle<()> {
        let table = Arc::clone(self);
        tokio::spawn(async move { table.dispatch(user_id, envelope).await })
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<(UserId, Value)>>>,
    }

    #[async_trait]
    impl NotificationHandler for Recorder {
        async fn handle(&self, user_id: UserId, data: Value) -> Result<(), HandlerError> {
            self.seen.lock().push((user_id, data));
            Ok(())
        }
    }

    struct Failing(Arc<AtomicUsize>);

    #[async_trait]
    impl NotificationHandler for Failing {
        async fn handle(&self, _user_id: UserId, _data: Value) -> Result<(), HandlerError> {
            let _ = self.0.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::Command("boom".into()))
        }
    }

    struct Sleepy;

    #[async_trait]
    impl NotificationHandler for Sleepy {
        async fn handle(&self, _user_id: UserId, _data: Value) -> Result<(), HandlerError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn envelope(kind: &str, data: Value) -> IncomingEnvelope {
        IncomingEnvelope {
            kind: kind.into(),
            data,
        }
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let recorder = Recorder::default();
        let mut table = DispatchTable::new();
        table.register("message", recorder.clone());

        let user = UserId::new();
        table
            .dispatch(user, envelope("message", json!({"content": "hi"})))
            .await;

        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, user);
        assert_eq!(seen[0].1["content"], "hi");
    }

    #[tokio::test]
    async fn unknown_kind_is_silent_noop() {
        let recorder = Recorder::default();
        let mut table = DispatchTable::new();
        table.register("message", recorder.clone());

        table.dispatch(UserId::new(), envelope("typing", Value::Null)).await;
        assert!(recorder.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn handler_error_is_swallowed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut table = DispatchTable::new();
        table.register("message", Failing(calls.clone()));
        table.dispatch(UserId::new(), envelope("message", Value::Null)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let mut table = DispatchTable::new().with_timeout(Duration::from_secs(1));
        table.register("slow", Sleepy);
        // Paused clock auto-advances to the timeout.
        table.dispatch(UserId::new(), envelope("slow", Value::Null)).await;
    }

    #[tokio::test]
    async fn spawn_dispatch_runs_in_background() {
        let recorder = Recorder::default();
        let mut table = DispatchTable::new();
        table.register("message", recorder.clone());
        let table = Arc::new(table);

        table
            .spawn_dispatch(UserId::new(), envelope("message", json!(1)))
            .await
            .unwrap();
        assert_eq!(recorder.seen.lock().len(), 1);
    }

    #[test]
    fn kinds_sorted() {
        let mut table = DispatchTable::default();
        table.register("zeta", Recorder::default());
        table.register("alpha", Recorder::default());
        assert_eq!(table.kinds(), vec!["alpha", "zeta"]);
    }
}
