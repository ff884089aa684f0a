//! Connection handles and the broadcast registry.
//!
//! # Overview
//!
//! - [`Connection`] - a cheap, cloneable handle to one live websocket, used to
//!   send messages and to check liveness
//! - [`ConnectionRegistry`] - a concurrent set of handles kept by
//!   broadcast-style handlers
//! - [`ConnectionState`] - where a connection is in its lifecycle
//!
//! Every message sent through a [`Connection`] runs through the send side of
//! the middleware pipeline before it is framed.
//!
//! # Writing
//!
//! Each connection owns a write task that drains an unbounded queue into the
//! transport. [`Connection::send`] only runs the pipeline and enqueues, so a
//! peer that stops reading never stalls the task sending to it.
//!
//! # Liveness
//!
//! A handle reports closed once a read has seen the peer go away, the write
//! task has failed to write, or the connection has been closed locally.
//! Sends on a closed handle fail with [`Error::ConnectionClosed`] without
//! touching the transport.
//!
//! # Broadcasting
//!
//! [`ConnectionRegistry::broadcast`] iterates a point-in-time snapshot, so
//! connections may come and go while a broadcast is in flight. Members found
//! closed during the broadcast are pruned instead of failing it:
//!
//! ```
//! use std::sync::Arc;
//! use wsroute_core::connection::{Connection, ConnectionInfo, ConnectionRegistry};
//! use wsroute_core::transport::{CloseCode, memory};
//! use wsroute_core::{Message, Pipeline};
//!
//! # async fn example() -> wsroute_core::Result<()> {
//! let registry = ConnectionRegistry::new();
//! let mut members = Vec::new();
//! for _ in 0..3 {
//!     let (_reader, writer, peer) = memory::pair();
//!     let info = ConnectionInfo::new(wsroute_core::next_connection_id(), None, "/chatroom");
//!     let conn = Connection::new(info, Box::new(writer), Arc::new(Pipeline::empty()));
//!     registry.add(conn.clone());
//!     members.push((conn, peer));
//! }
//! members[2].0.close(CloseCode::Normal, "bye")?;
//!
//! let report = registry.broadcast(Message::text("hello")).await;
//! assert_eq!(report.delivered, 2);
//! assert_eq!(report.pruned, 1);
//! assert_eq!(registry.count(), 2);
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::message::Message;
use crate::middleware::{Direction, Pipeline};
use crate::transport::{CloseCode, Frame, FrameWriter};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Identifier assigned to each accepted connection.
pub type ConnectionId = String;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Returns a process-unique connection id of the form `conn_<n>`.
pub fn next_connection_id() -> ConnectionId {
    format!("conn_{}", NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
}

/// Lifecycle of a dispatched connection.
///
/// ```text
/// Resolving ──> Active ──> Closing ──> Closed
///     │                                  ^
///     └──────────── unresolved ──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// The request path is being matched against the router.
    Resolving,
    /// A handler owns the connection.
    Active,
    /// The handler has returned and the connection is being torn down.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Resolving,
            1 => ConnectionState::Active,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Resolving => 0,
            ConnectionState::Active => 1,
            ConnectionState::Closing => 2,
            ConnectionState::Closed => 3,
        }
    }
}

/// Static facts about a connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// Connection id.
    pub id: ConnectionId,
    /// Peer address, when the transport has one.
    pub addr: Option<SocketAddr>,
    /// Request path the connection was opened on, without the query string.
    pub path: String,
    /// Unix timestamp (seconds) of when the connection was accepted.
    pub connected_at: u64,
}

impl ConnectionInfo {
    /// Describes a connection accepted now.
    pub fn new(id: ConnectionId, addr: Option<SocketAddr>, path: impl Into<String>) -> Self {
        let connected_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Self {
            id,
            addr,
            path: path.into(),
            connected_at,
        }
    }
}

enum Outbound {
    Frame(Frame),
    Close(CloseCode, String),
}

struct Inner {
    info: ConnectionInfo,
    outbound: mpsc::UnboundedSender<Outbound>,
    pipeline: Arc<Pipeline>,
    open: Arc<AtomicBool>,
    close_sent: AtomicBool,
    state: AtomicU8,
}

/// Handle to one live websocket.
///
/// Cloning is cheap; all clones share the same write queue and liveness
/// flag. Frames are written in the order they were queued.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Wraps the write half of a transport and spawns its write task.
    ///
    /// Outbound messages run through the send side of `pipeline`. The new
    /// handle is open and in [`ConnectionState::Resolving`]. The write task
    /// ends after a close frame, a failed write, or once every handle is
    /// dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(info: ConnectionInfo, writer: Box<dyn FrameWriter>, pipeline: Arc<Pipeline>) -> Self {
        let (outbound, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        tokio::spawn(write_loop(info.id.clone(), writer, rx, open.clone()));

        Self {
            inner: Arc::new(Inner {
                info,
                outbound,
                pipeline,
                open,
                close_sent: AtomicBool::new(false),
                state: AtomicU8::new(ConnectionState::Resolving.as_u8()),
            }),
        }
    }

    /// The connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.inner.info.id
    }

    /// Static connection facts.
    pub fn info(&self) -> &ConnectionInfo {
        &self.inner.info
    }

    /// The request path, without the query string.
    pub fn path(&self) -> &str {
        &self.inner.info.path
    }

    /// Returns `true` until the connection is known to be closed.
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        debug!(conn_id = %self.id(), ?state, "Connection state changed");
        self.inner.state.store(state.as_u8(), Ordering::Release);
    }

    pub(crate) fn mark_closed(&self) {
        self.inner.open.store(false, Ordering::Release);
    }

    /// Runs a message through the pipeline and queues it for the wire.
    ///
    /// Returns once the frame is queued; it does not wait for the peer.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection is already closed or
    ///   its write task has stopped
    /// - [`Error::Pipeline`] if a send stage fails
    pub async fn send(&self, message: impl Into<Message>) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed(self.id().clone()));
        }

        let message = self.inner.pipeline.run(message.into(), Direction::Send).await?;
        let frame = message.into_frame()?;
        self.enqueue(Outbound::Frame(frame))
    }

    fn enqueue(&self, outbound: Outbound) -> Result<()> {
        self.inner.outbound.send(outbound).map_err(|_| {
            self.mark_closed();
            Error::ConnectionClosed(self.id().clone())
        })
    }

    /// Sends a text message.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Message::text(text)).await
    }

    /// Serializes `data` and sends it as a structured message.
    pub async fn send_json<T: Serialize>(&self, data: &T) -> Result<()> {
        self.send(Message::json(serde_json::to_value(data)?)).await
    }

    /// Closes the connection with `code` and `reason`.
    ///
    /// The handle reports closed at once and the close frame is queued behind
    /// any frames already sent. Only the first call queues a close frame;
    /// later calls are no-ops. The reason is truncated to fit in a control
    /// frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the write task has already
    /// stopped.
    pub fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        self.mark_closed();
        if self.inner.close_sent.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner
            .outbound
            .send(Outbound::Close(code, reason.to_string()))
            .map_err(|_| Error::ConnectionClosed(self.id().clone()))
    }
}

async fn write_loop(
    id: ConnectionId,
    mut writer: Box<dyn FrameWriter>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    open: Arc<AtomicBool>,
) {
    debug!(conn_id = %id, "Write task started");

    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(frame) => {
                if let Err(e) = writer.write_frame(frame).await {
                    debug!(conn_id = %id, error = %e, "Write failed, marking connection closed");
                    open.store(false, Ordering::Release);
                    break;
                }
            }
            Outbound::Close(code, reason) => {
                if let Err(e) = writer.close(code, &reason).await {
                    debug!(conn_id = %id, error = %e, "Close frame not written");
                }
                break;
            }
        }
    }

    debug!(conn_id = %id, "Write task ended");
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", self.id())
            .field("path", &self.path())
            .field("open", &self.is_open())
            .field("state", &self.state())
            .finish()
    }
}

/// Outcome of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the message was written to.
    pub delivered: usize,
    /// Closed connections removed from the registry.
    pub pruned: usize,
    /// Open connections whose send pipeline rejected the message.
    pub failed: usize,
}

/// Concurrent set of live connections.
///
/// Cloning shares the underlying set. Membership only; iteration order is
/// unspecified.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, Connection>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
        }
    }

    /// Adds a connection and returns the new member count.
    pub fn add(&self, conn: Connection) -> usize {
        let id = conn.id().clone();
        self.connections.insert(id.clone(), conn);
        let count = self.connections.len();
        info!(conn_id = %id, total = count, "Added connection");
        count
    }

    /// Removes a connection. Removing an absent id is not an error.
    pub fn remove(&self, id: &str) -> Option<Connection> {
        let removed = self.connections.remove(id).map(|(_, conn)| conn);
        if removed.is_some() {
            info!(conn_id = %id, total = self.connections.len(), "Removed connection");
        }
        removed
    }

    /// Looks up a connection by id.
    pub fn get(&self, id: &str) -> Option<Connection> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    /// Returns `true` if `id` is a member.
    pub fn contains(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    /// Number of members.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if there are no members.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Ids of all members.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// Copies the current membership.
    ///
    /// No lock is held once this returns, so the copy is safe to iterate
    /// across `.await` points.
    pub fn snapshot(&self) -> Vec<Connection> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }

    /// Sends `message` to every member.
    pub async fn broadcast(&self, message: Message) -> BroadcastReport {
        self.fan_out(message, None).await
    }

    /// Sends `message` to every member except `except_id`.
    pub async fn broadcast_except(&self, except_id: &str, message: Message) -> BroadcastReport {
        self.fan_out(message, Some(except_id)).await
    }

    async fn fan_out(&self, message: Message, except_id: Option<&str>) -> BroadcastReport {
        let members = self.snapshot();
        let mut report = BroadcastReport::default();
        debug!(members = members.len(), "Broadcasting message");

        for conn in members {
            if except_id == Some(conn.id().as_str()) {
                continue;
            }
            if !conn.is_open() {
                self.prune(&conn, &mut report);
                continue;
            }
            match conn.send(message.clone()).await {
                Ok(()) => report.delivered += 1,
                Err(_) if !conn.is_open() => self.prune(&conn, &mut report),
                Err(e) => {
                    warn!(conn_id = %conn.id(), error = %e, "Broadcast rejected by pipeline");
                    report.failed += 1;
                }
            }
        }

        debug!(
            delivered = report.delivered,
            pruned = report.pruned,
            failed = report.failed,
            "Broadcast complete"
        );
        report
    }

    fn prune(&self, conn: &Connection, report: &mut BroadcastReport) {
        if self.remove(conn.id()).is_some() {
            warn!(conn_id = %conn.id(), "Pruned closed connection during broadcast");
            report.pruned += 1;
        }
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("count", &self.count())
            .finish()
    }
}
