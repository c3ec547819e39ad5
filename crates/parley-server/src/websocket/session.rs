//! `WebSocket` session lifecycle: one connected client from upgrade through
//! disconnect.
//!
//! Each session runs two pumps over the split socket. The receive pump reads
//! frames under a `pong_wait` deadline and hands envelopes to the dispatch
//! table without waiting for the handler. The send pump drains the
//! connection's outbound queue and pings after `ping_period` without a write. Whichever pump
//! stops first ends the session; the connection is then unregistered.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::{counter, gauge, histogram};
use parley_core::{IncomingEnvelope, Notification, Topic, UserId};
use parley_hub::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use parley_hub::{
    ClientConnection, DispatchTable, HeartbeatConfig, HubError, HubHandle, TopicDirectory,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::server::AppState;

/// Why a pump stopped abnormally.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The socket failed to read or write.
    #[error("transport error: {0}")]
    Transport(String),
    /// A single frame write exceeded `write_wait`.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
    /// Nothing arrived from the peer within `pong_wait`.
    #[error("peer silent for {0:?}")]
    ReadTimeout(Duration),
}

/// Run a session for an authenticated client until either pump stops.
#[instrument(skip_all, fields(user_id = %user_id))]
pub async fn run_session(socket: WebSocket, user_id: UserId, state: AppState) {
    let _tracked = state.shutdown.track_session();
    let (connection, queue) =
        ClientConnection::with_queue(user_id, state.config.send_queue_capacity);
    let connection = Arc::new(connection);
    let conn_id = connection.id();

    let topic_count = match register_with_topics(&state.hub, state.directory.as_ref(), &connection).await {
        Ok(count) => count,
        Err(err) => {
            warn!(%conn_id, error = %err, "hub unavailable, closing connection");
            return;
        }
    };

    info!(%conn_id, topics = topic_count, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let heartbeat = state.config.heartbeat;
    let (sink, stream) = socket.split();
    let send = send_pump(sink, queue, heartbeat, state.shutdown.token());
    let receive = receive_pump(stream, &connection, &state.dispatch, heartbeat);

    let (pump, outcome) = tokio::select! {
        result = send => ("send", result),
        result = receive => ("receive", result),
    };
    match outcome {
        Ok(()) => info!(%conn_id, pump, "client disconnected"),
        Err(err) => info!(%conn_id, pump, error = %err, "connection closed"),
    }

    if state.hub.unregister(conn_id).await.is_err() {
        debug!(%conn_id, "hub already stopped during unregister");
    }
    let dropped = connection.drop_count();
    if dropped > 0 {
        warn!(%conn_id, dropped, "notifications dropped on a full queue during this session");
    }
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
}

/// Register `connection` with the topics persisted for its user.
///
/// Topics are read a second time once the connection is in the registry. A
/// join that commits between the first read and the register subscribes
/// before the connection exists; the second read picks it up and the hub
/// merges it in. Returns the number of topics restored.
pub async fn register_with_topics(
    hub: &HubHandle,
    directory: &dyn TopicDirectory,
    connection: &Arc<ClientConnection>,
) -> Result<usize, HubError> {
    let initial = load_topics(directory, connection).await;
    hub.register(connection.clone(), initial).await?;
    let current = load_topics(directory, connection).await;
    let count = current.len();
    hub.register(connection.clone(), current).await?;
    Ok(count)
}

async fn load_topics(directory: &dyn TopicDirectory, connection: &ClientConnection) -> Vec<Topic> {
    let user_id = connection.user_id();
    match directory.topics_for_user(user_id).await {
        Ok(topics) => topics,
        Err(err) => {
            warn!(conn_id = %connection.id(), error = %err, "failed to load topics, using personal topic only");
            vec![Topic::user(user_id)]
        }
    }
}

/// Drain the outbound queue onto `sink`, pinging when nothing was written
/// for a whole `ping_period`.
///
/// Returns `Ok` after writing a close frame when the queue closes or
/// `shutdown` fires; any failed or timed-out write is an error.
pub async fn send_pump<W>(
    mut sink: W,
    mut queue: mpsc::Receiver<Arc<Notification>>,
    heartbeat: HeartbeatConfig,
    shutdown: CancellationToken,
) -> Result<(), SessionError>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut ping = interval_at(Instant::now() + heartbeat.ping_period, heartbeat.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = queue.recv() => {
                let Some(notification) = next else {
                    write(&mut sink, Message::Close(None), heartbeat.write_wait).await?;
                    return Ok(());
                };
                match serde_json::to_string(&*notification) {
                    Ok(text) => {
                        write(&mut sink, Message::Text(text.into()), heartbeat.write_wait).await?;
                        ping.reset();
                    }
                    Err(err) => {
                        warn!(kind = notification.kind(), error = %err, "failed to serialize notification");
                    }
                }
            }
            _ = ping.tick() => {
                write(&mut sink, Message::Ping(Bytes::new()), heartbeat.write_wait).await?;
            }
            () = shutdown.cancelled() => {
                // Best effort; the socket is dropped right after either way.
                let _ = write(&mut sink, Message::Close(None), heartbeat.write_wait).await;
                return Ok(());
            }
        }
    }
}

/// Read frames from `stream` and dispatch each envelope on its own task.
///
/// Every frame, pongs included, refreshes the `pong_wait` deadline.
/// Malformed envelopes are logged and skipped. Returns `Ok` on a close frame
/// or end of stream.
pub async fn receive_pump<R, E>(
    mut stream: R,
    connection: &ClientConnection,
    dispatch: &Arc<DispatchTable>,
    heartbeat: HeartbeatConfig,
) -> Result<(), SessionError>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let frame = match timeout(heartbeat.pong_wait, stream.next()).await {
            Err(_elapsed) => return Err(SessionError::ReadTimeout(heartbeat.pong_wait)),
            Ok(None) => return Ok(()),
            Ok(Some(Err(err))) => return Err(SessionError::Transport(err.to_string())),
            Ok(Some(Ok(frame))) => frame,
        };
        match frame {
            Message::Text(text) => handle_text(text.as_str(), connection, dispatch),
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => handle_text(text, connection, dispatch),
                Err(_) => debug!(conn_id = %connection.id(), len = data.len(), "ignoring non-UTF8 binary frame"),
            },
            Message::Close(_) => {
                debug!(conn_id = %connection.id(), "peer sent close frame");
                return Ok(());
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

fn handle_text(text: &str, connection: &ClientConnection, dispatch: &Arc<DispatchTable>) {
    match IncomingEnvelope::parse(text) {
        Ok(envelope) => {
            let _ = dispatch.spawn_dispatch(connection.user_id(), envelope);
        }
        Err(err) => {
            warn!(conn_id = %connection.id(), error = %err, "discarding malformed frame");
        }
    }
}

async fn write<W>(sink: &mut W, message: Message, deadline: Duration) -> Result<(), SessionError>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    match timeout(deadline, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(SessionError::Transport(err.to_string())),
        Err(_elapsed) => Err(SessionError::WriteTimeout(deadline)),
    }
}
