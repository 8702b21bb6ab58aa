//! A live client channel: identity, liveness, and the one outbound send
//! path every frame for that client flows through.
//!
//! `relay-core` never touches a socket directly — the transport crate
//! (`callrelay-server`) owns the actual `WebSocket` and only ever talks to
//! a [`ConnectionHandle`], matching how `otter-voice`'s `VoiceManager` is
//! transport-agnostic over a signaling channel rather than a socket.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Notify};

use callrelay_protocol::ServerMessage;

/// Stable handle identifying one connection for the lifetime of its
/// channel. Cheap to copy, hash, and use as a map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Shared handle to a connection's outbound send path and liveness flag.
///
/// Cloning a `ConnectionHandle` is cheap: the outbound sender is itself a
/// clonable `mpsc::UnboundedSender`, and liveness/shutdown state lives
/// behind `Arc`s so every clone (held by the owning task, by whichever
/// `Room` the connection has joined, and by the heartbeat supervisor) sees
/// the same state.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    alive: Arc<std::sync::atomic::AtomicBool>,
    shutdown: Arc<Notify>,
    close_reason: Arc<Mutex<Option<String>>>,
}

impl ConnectionHandle {
    /// Create a new handle and the receiving half of its outbound queue.
    /// The transport layer owns the receiver and pumps it to the socket.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: ConnectionId::next(),
            outbound: tx,
            alive: Arc::new(std::sync::atomic::AtomicBool::new(true)),
            shutdown: Arc::new(Notify::new()),
            close_reason: Arc::new(Mutex::new(None)),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the transport side has already dropped its receiver. Used
    /// by `Room` to sweep stale members on join without waiting for a
    /// heartbeat cycle.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Serialize and push a frame to this connection. Failures (the
    /// connection's receiver already dropped) are swallowed: the
    /// heartbeat supervisor or the transport's own read loop will reap a
    /// dead connection soon enough.
    pub fn send(&self, frame: ServerMessage) {
        if self.outbound.send(frame).is_err() {
            tracing::debug!(conn = %self.id, "dropped frame, connection already closing");
        }
    }

    /// Request that the transport shut this connection down, recording
    /// `reason` so the close frame (or subsequent logging) can carry it.
    /// Idempotent: closing an already-closing connection is a no-op.
    pub fn close(&self, reason: impl Into<String>) {
        *self.close_reason.lock().unwrap() = Some(reason.into());
        self.shutdown.notify_one();
    }

    /// Wait until [`ConnectionHandle::close`] has been called. The
    /// transport's read loop selects on this alongside socket reads so a
    /// server-initiated close (replace, heartbeat reap) interrupts it.
    pub async fn closed(&self) {
        self.shutdown.notified().await;
    }

    pub fn close_reason(&self) -> Option<String> {
        self.close_reason.lock().unwrap().clone()
    }

    /// Record a pong: the connection is alive again.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// Heartbeat sweep primitive: atomically read-then-clear the liveness
    /// flag, returning whether it was set. The supervisor pings the
    /// connection when this returns `true` and reaps it when `false` (it
    /// missed the previous sweep's ping entirely).
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle").field("id", &self.id).finish()
    }
}
