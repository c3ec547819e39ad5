//! Ordered shutdown of a running parley server.
//!
//! Stopping happens in stages. The listener stops accepting, then live
//! sessions write their close frames and unregister from the hub, then the
//! last hub and resolver senders are released so those loops can drain and
//! exit. A single deadline covers all stages.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{info, warn};

/// Deadline used when the caller does not give one.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Which stages finished before the deadline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// The HTTP serve task returned.
    pub listener: bool,
    /// Every tracked session ended.
    pub sessions: bool,
    /// Every hub and resolver loop returned.
    pub background: bool,
}

impl DrainReport {
    /// Whether every stage completed.
    pub fn is_complete(&self) -> bool {
        self.listener && self.sessions && self.background
    }
}

/// Cancels the server and drains it in order.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a coordinator with no sessions.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            sessions: TaskTracker::new(),
        }
    }

    /// Token the listener and send pumps stop on.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop accepting and tell sessions to close. Idempotent.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            info!(sessions = self.sessions.len(), "shutdown triggered");
        }
        self.token.cancel();
    }

    /// Whether [`trigger`](Self::trigger) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Count a session as live until the returned guard is dropped.
    pub fn track_session(&self) -> TaskTrackerToken {
        self.sessions.token()
    }

    /// Sessions currently tracked.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Trigger shutdown and drain every stage within `deadline`.
    ///
    /// `senders` holds the last hub and resolver handles (usually the
    /// server itself); it is dropped once sessions are gone, which lets the
    /// `background` loops run out of work and return.
    pub async fn drain<S>(
        &self,
        listener: JoinHandle<()>,
        senders: S,
        background: Vec<JoinHandle<()>>,
        deadline: Option<Duration>,
    ) -> DrainReport {
        let deadline = Instant::now() + deadline.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        let mut report = DrainReport::default();

        self.trigger();
        report.listener = timeout_at(deadline, listener).await.is_ok();
        if !report.listener {
            warn!("listener did not stop before the deadline");
        }

        self.sessions.close();
        info!(sessions = self.sessions.len(), "waiting for sessions to close");
        report.sessions = timeout_at(deadline, self.sessions.wait()).await.is_ok();
        if !report.sessions {
            warn!(
                remaining = self.sessions.len(),
                "sessions still open at the deadline"
            );
        }

        drop(senders);
        info!(tasks = background.len(), "waiting for hub and resolver loops");
        report.background = timeout_at(deadline, futures::future::join_all(background))
            .await
            .is_ok();
        if !report.background {
            warn!("background loops still running at the deadline");
        }

        report
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
