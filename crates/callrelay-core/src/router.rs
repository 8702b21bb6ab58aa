//! Frame-level dispatch: turns bytes off the wire into a [`RoomCommand`]
//! sent to whichever room a connection currently belongs to, tracking
//! that membership itself so callers above (the transport) never need
//! to know which room a connection is in.

use std::collections::HashMap;
use std::sync::Mutex;

use callrelay_protocol::{ClientMessage, ServerMessage, MAX_FRAME_BYTES};

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::error::RelayError;
use crate::room::{RoomCommand, RoomHandle, RoomRegistry};

struct Membership {
    room: String,
    handle: RoomHandle,
}

/// Shared across every connection the transport accepts. Cheap to clone
/// (an `Arc`-backed registry plus a small mutex-guarded map), so each
/// connection task can hold its own copy.
#[derive(Clone)]
pub struct Router {
    registry: RoomRegistry,
    memberships: std::sync::Arc<Mutex<HashMap<ConnectionId, Membership>>>,
}

impl Router {
    pub fn new(registry: RoomRegistry) -> Self {
        Self {
            registry,
            memberships: std::sync::Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Parse and route one inbound frame. Malformed JSON gets an `error`
    /// reply; a frame that isn't a JSON object at all, or that exceeds
    /// [`MAX_FRAME_BYTES`], is dropped silently (it's too malformed to
    /// trust a reply will even help).
    pub async fn handle_frame(&self, conn: &ConnectionHandle, raw: &[u8]) {
        if raw.len() > MAX_FRAME_BYTES {
            tracing::debug!(conn = %conn.id(), len = raw.len(), "dropping oversized frame");
            return;
        }
        let value: serde_json::Value = match serde_json::from_slice(raw) {
            Ok(v) => v,
            Err(_) => {
                conn.send(ServerMessage::error("malformed frame"));
                return;
            }
        };
        if !value.is_object() {
            tracing::debug!(conn = %conn.id(), "dropping non-object frame");
            return;
        }
        let msg: ClientMessage = match serde_json::from_value(value) {
            Ok(m) => m,
            Err(_) => {
                conn.send(ServerMessage::error("unknown message type"));
                return;
            }
        };
        self.dispatch(conn, msg).await;
    }

    async fn dispatch(&self, conn: &ConnectionHandle, msg: ClientMessage) {
        match msg {
            ClientMessage::Join { room, name } => self.join(conn, room, name).await,
            ClientMessage::LeaveRoom => self.leave_room(conn).await,
            ClientMessage::Invite => {
                self.forward(conn, |c| RoomCommand::Invite { conn: c }).await
            }
            ClientMessage::RingAck { call_id } => {
                self.forward(conn, |c| RoomCommand::RingAck { conn: c, call_id })
                    .await
            }
            ClientMessage::Accept { call_id } => {
                self.forward(conn, |c| RoomCommand::Accept { conn: c, call_id })
                    .await
            }
            ClientMessage::Decline { call_id } => {
                self.forward(conn, |c| RoomCommand::Decline { conn: c, call_id })
                    .await
            }
            ClientMessage::Hangup { call_id } => {
                self.forward(conn, |c| RoomCommand::Hangup { conn: c, call_id })
                    .await
            }
            ClientMessage::Offer { call_id, sdp } => {
                self.forward(conn, |c| RoomCommand::Signal {
                    conn: c,
                    call_id,
                    kind: crate::call::SignalKind::Offer,
                    payload: sdp,
                })
                .await
            }
            ClientMessage::Answer { call_id, sdp } => {
                self.forward(conn, |c| RoomCommand::Signal {
                    conn: c,
                    call_id,
                    kind: crate::call::SignalKind::Answer,
                    payload: sdp,
                })
                .await
            }
            ClientMessage::Ice { call_id, candidate } => {
                self.forward(conn, |c| RoomCommand::Signal {
                    conn: c,
                    call_id,
                    kind: crate::call::SignalKind::Ice,
                    payload: candidate,
                })
                .await
            }
        }
    }

    async fn join(&self, conn: &ConnectionHandle, room: String, name: Option<String>) {
        // A connection joining a second room replaces its old membership;
        // the old room is told as if the connection simply disconnected.
        if let Some(previous) = self.memberships.lock().unwrap().remove(&conn.id()) {
            if previous.room != room {
                if previous
                    .handle
                    .send(RoomCommand::Disconnected { conn: conn.id() })
                    .await
                    .is_err()
                {
                    log_room_gone(&previous.room);
                }
            } else {
                self.memberships
                    .lock()
                    .unwrap()
                    .insert(conn.id(), previous);
                return self.send_join(conn, room, name).await;
            }
        }
        self.send_join(conn, room, name).await;
    }

    async fn send_join(&self, conn: &ConnectionHandle, room: String, name: Option<String>) {
        let handle = self.registry.get_or_create(&room);
        let cmd = RoomCommand::Join {
            conn: conn.clone(),
            name,
        };
        if handle.send(cmd).await.is_err() {
            conn.send(ServerMessage::error("room unavailable"));
            return;
        }
        self.memberships.lock().unwrap().insert(
            conn.id(),
            Membership {
                room,
                handle,
            },
        );
    }

    async fn leave_room(&self, conn: &ConnectionHandle) {
        let membership = self.memberships.lock().unwrap().remove(&conn.id());
        match membership {
            Some(m) => {
                if m.handle
                    .send(RoomCommand::LeaveRoom { conn: conn.id() })
                    .await
                    .is_err()
                {
                    log_room_gone(&m.room);
                }
            }
            None => conn.send(ServerMessage::Left),
        }
    }

    /// Route a command that requires the sender to already be in a room;
    /// reply with `error` if it isn't.
    async fn forward<F>(&self, conn: &ConnectionHandle, build: F)
    where
        F: FnOnce(ConnectionId) -> RoomCommand,
    {
        let membership = self
            .memberships
            .lock()
            .unwrap()
            .get(&conn.id())
            .map(|m| (m.room.clone(), m.handle.clone()));
        match membership {
            Some((room, handle)) => {
                if handle.send(build(conn.id())).await.is_err() {
                    log_room_gone(&room);
                }
            }
            None => conn.send(ServerMessage::error("not in a room")),
        }
    }

    /// Called by the transport when a connection's socket closes, so its
    /// room (if any) can drop it without waiting on a heartbeat sweep.
    pub async fn disconnect(&self, conn: ConnectionId) {
        let membership = self.memberships.lock().unwrap().remove(&conn);
        if let Some(m) = membership {
            if m.handle.send(RoomCommand::Disconnected { conn }).await.is_err() {
                log_room_gone(&m.room);
            }
        }
    }
}

/// A room's mailbox was already gone by the time we tried to deliver a
/// command to it (the room task had torn itself down between the
/// membership lookup and the send). Harmless — the room emptying out is
/// exactly what closed the mailbox — but worth a typed log line rather
/// than a silently discarded `Result`.
fn log_room_gone(room: &str) {
    tracing::debug!(error = %RelayError::RoomGone(room.to_string()), "dropping command for a closed room");
}
