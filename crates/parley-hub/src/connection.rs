//! Per-connection state shared between the hub and the transport pumps.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::counter;
use parley_core::{ConnectionId, Notification, UserId};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::metrics::HUB_NOTIFICATIONS_DROPPED_TOTAL;

/// One live transport belonging to one authenticated user.
///
/// The hub holds an `Arc` to this and only ever calls [`enqueue`](Self::enqueue);
/// the send pump owns the receiving end of the outbound queue.
pub struct ClientConnection {
    id: ConnectionId,
    user_id: UserId,
    tx: mpsc::Sender<Arc<Notification>>,
    /// When this connection was established.
    pub connected_at: Instant,
    dropped: AtomicU64,
}

impl ClientConnection {
    /// Create a connection around the sending half of its outbound queue.
    pub fn new(id: ConnectionId, user_id: UserId, tx: mpsc::Sender<Arc<Notification>>) -> Self {
        Self {
            id,
            user_id,
            tx,
            connected_at: Instant::now(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Create a connection with a fresh bounded queue, returning the receiver.
    pub fn with_queue(
        user_id: UserId,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Arc<Notification>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(ConnectionId::new(), user_id, tx), rx)
    }

    /// Connection identity.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Owning user.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Place a notification on the outbound queue without waiting.
    ///
    /// A full queue drops the new notification (the peer is not draining);
    /// a closed queue means the send pump has already exited. Returns
    /// whether the notification was queued.
    pub fn enqueue(&self, notification: Arc<Notification>) -> bool {
        match self.tx.try_send(notification) {
            Ok(()) => true,
            Err(TrySendError::Full(n)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                counter!(HUB_NOTIFICATIONS_DROPPED_TOTAL).increment(1);
                warn!(
                    conn_id = %self.id,
                    user_id = %self.user_id,
                    kind = n.kind(),
                    dropped,
                    "outbound queue full, dropping notification"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id = %self.id, "outbound queue closed");
                false
            }
        }
    }

    /// Total notifications dropped on a full queue.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("dropped", &self.drop_count())
            .finish_non_exhaustive()
    }
}
