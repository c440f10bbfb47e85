//! One listener connection: registration, inbound control frames, outbound
//! frames with heartbeat, and a single close path.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use kickoff_core::{ConnectionId, ControlCommand, FilterCriteria};
use kickoff_telemetry::names;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::registry::{ConnectionHandle, ConnectionRegistry};

/// Per-connection tunables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_send_queue: 16,
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Why the read side stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    IdleTimeout,
    ReadError(String),
    /// Closed from the server side: failed send, writer exit, or re-register.
    Server,
}

impl CloseReason {
    fn as_str(&self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::IdleTimeout => "idle_timeout",
            Self::ReadError(_) => "read_error",
            Self::Server => "server",
        }
    }
}

/// Result of applying one inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlOutcome {
    Updated(FilterCriteria),
    Ignored(String),
    Rejected(String),
    /// The connection was already removed; nothing changed.
    Unregistered,
}

/// Apply an inbound control frame to the connection's registry entry.
///
/// Malformed frames and unknown actions leave the criteria untouched and
/// keep the connection open.
pub fn apply_control(
    registry: &ConnectionRegistry,
    id: &ConnectionId,
    frame: &[u8],
) -> ControlOutcome {
    match ControlCommand::parse(frame) {
        Ok(ControlCommand::UpdateFilters(criteria)) => {
            if registry.update_filter(id, criteria.clone()) {
                metrics::counter!(names::FILTER_UPDATES_TOTAL).increment(1);
                info!(conn_id = %id, %criteria, "filters updated");
                ControlOutcome::Updated(criteria)
            } else {
                debug!(conn_id = %id, "filter update for unregistered connection");
                ControlOutcome::Unregistered
            }
        }
        Ok(ControlCommand::Ignored(action)) => {
            debug!(conn_id = %id, %action, "ignoring control message");
            ControlOutcome::Ignored(action)
        }
        Err(e) => {
            metrics::counter!(names::CONTROL_DECODE_ERRORS_TOTAL, "kind" => e.error_kind())
                .increment(1);
            warn!(
                conn_id = %id,
                error = %e,
                kind = e.error_kind(),
                "ignoring malformed control message"
            );
            ControlOutcome::Rejected(e.to_string())
        }
    }
}

/// Lifecycle of a registered connection. `close` runs its side effects once.
struct Lifecycle {
    id: ConnectionId,
    state: ConnectionState,
    registry: Arc<ConnectionRegistry>,
    handle: ConnectionHandle,
    cancel: CancellationToken,
}

impl Lifecycle {
    fn open(registry: Arc<ConnectionRegistry>, handle: ConnectionHandle) -> Self {
        let id = handle.id().clone();
        let cancel = handle.cancellation();
        let mut lifecycle = Self {
            id,
            state: ConnectionState::Connecting,
            registry,
            handle: handle.clone(),
            cancel,
        };
        lifecycle.registry.register(handle);
        lifecycle.state = ConnectionState::Open;
        metrics::counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
        info!(conn_id = %lifecycle.id, "listener connected");
        lifecycle
    }

    fn close(&mut self, reason: &CloseReason) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        // Only our own entry; the id may since belong to a newer connection.
        let _ = self.registry.remove_handle(&self.handle);
        self.cancel.cancel();
        metrics::counter!(names::WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
        match reason {
            CloseReason::ReadError(error) => {
                warn!(conn_id = %self.id, %error, "listener disconnected on read error");
            }
            other => info!(conn_id = %self.id, reason = other.as_str(), "listener disconnected"),
        }
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.close(&CloseReason::Server);
    }
}

/// Drive one upgraded socket until it closes.
pub async fn serve(
    socket: WebSocket,
    registry: Arc<ConnectionRegistry>,
    settings: ConnectionSettings,
) {
    let (handle, rx) = ConnectionHandle::new(ConnectionId::new(), settings.max_send_queue);
    let mut lifecycle = Lifecycle::open(registry, handle);
    let id = lifecycle.id.clone();
    let cancel = lifecycle.cancel.clone();

    let (ws_tx, ws_rx) = socket.split();
    let writer = tokio::spawn(write_loop(
        ws_tx,
        rx,
        id.clone(),
        cancel.clone(),
        settings.heartbeat_interval,
    ));

    let reason = read_loop(ws_rx, &lifecycle.registry, &id, &cancel, settings.idle_timeout).await;
    lifecycle.close(&reason);
    let _ = writer.await;
}

/// Forward queued frames to the socket and ping on every heartbeat.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<String>,
    id: ConnectionId,
    cancel: CancellationToken,
    heartbeat_interval: Duration,
) {
    let mut ping_interval = tokio::time::interval(heartbeat_interval);
    ping_interval.tick().await; // consume first immediate tick

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = rx.recv() => {
                let Some(text) = frame else { break };
                if let Err(e) = ws_tx.send(WsMessage::Text(text.into())).await {
                    debug!(conn_id = %id, error = %e, "write failed");
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if ws_tx.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                trace!(conn_id = %id, "sent ping");
            }
        }
    }

    // Stop the reader too, whichever side ended first.
    cancel.cancel();
    let _ = ws_tx.send(WsMessage::Close(None)).await;
    let _ = ws_tx.close().await;
}

/// Apply control frames until the peer leaves, goes quiet, or the server
/// closes the connection.
async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    registry: &ConnectionRegistry,
    id: &ConnectionId,
    cancel: &CancellationToken,
    idle_timeout: Duration,
) -> CloseReason {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return CloseReason::Server,
            next = tokio::time::timeout(idle_timeout, ws_rx.next()) => next,
        };
        let msg = match next {
            Err(_) => return CloseReason::IdleTimeout,
            Ok(None) => return CloseReason::PeerClosed,
            Ok(Some(Err(e))) => return CloseReason::ReadError(e.to_string()),
            Ok(Some(Ok(msg))) => msg,
        };
        match msg {
            WsMessage::Text(text) => {
                let _ = apply_control(registry, id, text.as_str().as_bytes());
            }
            WsMessage::Binary(data) => {
                let _ = apply_control(registry, id, &data);
            }
            WsMessage::Close(_) => return CloseReason::PeerClosed,
            // Any inbound frame counts as liveness; axum answers pings itself.
            WsMessage::Ping(_) | WsMessage::Pong(_) => trace!(conn_id = %id, "heartbeat"),
        }
    }
}
