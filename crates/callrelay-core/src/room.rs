//! `Room`: a named set of connections plus at most one active call,
//! run as its own `tokio::task` so every mutation is serialized through
//! a single mailbox. No `Mutex<RoomState>` anywhere — the actor model
//! gives "logically single-threaded per room" for free.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

use callrelay_protocol::{BusyReason, CallId, EndReason, Role, ServerMessage};

use crate::call::{Call, PendingFrame, SignalKind};
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::timer::spawn_ring_timer;

const ROOM_MAILBOX_CAPACITY: usize = 256;

pub type RoomHandle = mpsc::Sender<RoomCommand>;

/// Everything a `Room` actor can be asked to do. One variant per
/// `ClientMessage` that requires a room to exist, plus two internal
/// events (`Disconnected`, `RingTimerFired`) that never arrive over the
/// wire.
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        conn: ConnectionHandle,
        name: Option<String>,
    },
    LeaveRoom {
        conn: ConnectionId,
    },
    /// The transport lost this connection (socket error, heartbeat
    /// reap) while it was a member of this room.
    Disconnected {
        conn: ConnectionId,
    },
    Invite {
        conn: ConnectionId,
    },
    RingAck {
        conn: ConnectionId,
        call_id: CallId,
    },
    Accept {
        conn: ConnectionId,
        call_id: CallId,
    },
    Decline {
        conn: ConnectionId,
        call_id: CallId,
    },
    Hangup {
        conn: ConnectionId,
        call_id: CallId,
    },
    Signal {
        conn: ConnectionId,
        call_id: CallId,
        kind: SignalKind,
        payload: Value,
    },
    RingTimerFired {
        call_id: CallId,
        attempt: u32,
    },
}

struct Member {
    handle: ConnectionHandle,
    name: String,
}

/// The room actor's private state. Lives entirely inside the task
/// spawned by [`RoomRegistry::get_or_create`]; nothing outside ever
/// touches it directly.
pub struct Room {
    name: String,
    members: HashMap<ConnectionId, Member>,
    active_call: Option<Call>,
    self_tx: RoomHandle,
    registry: RoomRegistry,
}

impl Room {
    fn new(name: String, self_tx: RoomHandle, registry: RoomRegistry) -> Self {
        Self {
            name,
            members: HashMap::new(),
            active_call: None,
            self_tx,
            registry,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<RoomCommand>) {
        tracing::debug!(room = %self.name, "room started");
        while let Some(cmd) = rx.recv().await {
            let destroyed = self.handle(cmd);
            if destroyed {
                break;
            }
        }
        tracing::debug!(room = %self.name, "room destroyed");
    }

    /// Returns `true` once the room has emptied out and should stop.
    fn handle(&mut self, cmd: RoomCommand) -> bool {
        match cmd {
            RoomCommand::Join { conn, name } => {
                self.join(conn, name);
                false
            }
            RoomCommand::LeaveRoom { conn } => {
                if let Some(member) = self.members.get(&conn) {
                    member.handle.send(ServerMessage::Left);
                }
                self.depart(conn);
                self.maybe_self_destruct()
            }
            RoomCommand::Disconnected { conn } => {
                self.depart(conn);
                self.maybe_self_destruct()
            }
            RoomCommand::Invite { conn } => {
                self.invite(conn);
                false
            }
            RoomCommand::RingAck { conn, call_id } => {
                self.ring_ack(conn, call_id);
                false
            }
            RoomCommand::Accept { conn, call_id } => {
                self.accept(conn, call_id);
                false
            }
            RoomCommand::Decline { conn, call_id } => {
                self.decline(conn, call_id);
                false
            }
            RoomCommand::Hangup { conn, call_id } => {
                self.hangup(conn, call_id);
                false
            }
            RoomCommand::Signal {
                conn,
                call_id,
                kind,
                payload,
            } => {
                self.signal(conn, call_id, kind, payload);
                false
            }
            RoomCommand::RingTimerFired { call_id, attempt } => {
                self.ring_timer_fired(call_id, attempt);
                false
            }
        }
    }

    fn send_to(&self, id: ConnectionId, frame: ServerMessage) {
        if let Some(member) = self.members.get(&id) {
            member.handle.send(frame);
        }
    }

    fn broadcast(&self, frame: ServerMessage) {
        for member in self.members.values() {
            member.handle.send(frame.clone());
        }
    }

    fn broadcast_except(&self, except: ConnectionId, frame: ServerMessage) {
        for (id, member) in self.members.iter() {
            if *id != except {
                member.handle.send(frame.clone());
            }
        }
    }

    fn current_call_id(&self) -> Option<CallId> {
        self.active_call.as_ref().map(|c| c.id)
    }

    fn participates(&self, conn: ConnectionId) -> bool {
        matches!(&self.active_call, Some(c) if c.caller == conn || c.callee == conn)
    }

    fn sweep_closed(&mut self) {
        let dead: Vec<ConnectionId> = self
            .members
            .iter()
            .filter(|(_, m)| m.handle.is_closed())
            .map(|(id, _)| *id)
            .collect();
        for id in dead {
            self.depart(id);
        }
    }

    fn join(&mut self, conn: ConnectionHandle, name: Option<String>) {
        self.sweep_closed();

        let name = match name {
            Some(n) if !n.trim().is_empty() => n,
            _ => "peer".to_string(),
        };

        // A connection re-joining (e.g. after changing its display name)
        // replaces its own stale entry rather than evicting itself below.
        if self.members.contains_key(&conn.id()) {
            self.depart(conn.id());
        }

        if let Some(&existing_id) = self
            .members
            .iter()
            .find(|(_, m)| m.name == name)
            .map(|(id, _)| id)
        {
            if let Some(member) = self.members.get(&existing_id) {
                member.handle.close("replaced");
            }
            self.depart(existing_id);
        }

        let peers: Vec<String> = self
            .members
            .values()
            .filter(|m| m.handle.id() != conn.id())
            .map(|m| m.name.clone())
            .collect();

        conn.send(ServerMessage::RoomState {
            room: self.name.clone(),
            peers,
        });

        let joined_id = conn.id();
        self.members.insert(
            joined_id,
            Member {
                handle: conn,
                name: name.clone(),
            },
        );
        self.broadcast_except(joined_id, ServerMessage::PeerJoined { name });
    }

    /// End the active call (if any) for `conn`'s departure, remove it
    /// from the member set, and tell whoever remains. Does not close
    /// `conn`'s own connection — callers that need that (explicit
    /// leave-room, name-collision eviction) do so themselves.
    fn depart(&mut self, conn: ConnectionId) {
        if self.participates(conn) {
            self.end_call(EndReason::Left);
        }
        if let Some(member) = self.members.remove(&conn) {
            self.broadcast(ServerMessage::PeerLeft { name: member.name });
        }
    }

    fn maybe_self_destruct(&mut self) -> bool {
        if self.members.is_empty() {
            self.registry.remove(&self.name);
            true
        } else {
            false
        }
    }

    fn invite(&mut self, conn: ConnectionId) {
        let Some(caller) = self.members.get(&conn) else {
            return;
        };
        if self.active_call.is_some() {
            caller.handle.send(ServerMessage::Busy {
                reason: BusyReason::CallActive,
            });
            return;
        }
        let Some((&callee_id, _)) = self.members.iter().find(|(id, _)| **id != conn) else {
            caller.handle.send(ServerMessage::Busy {
                reason: BusyReason::NoPeer,
            });
            return;
        };

        let caller_name = caller.name.clone();
        let call_id = CallId::new();

        self.send_to(conn, ServerMessage::InviteOk { call_id });
        self.send_to(
            callee_id,
            ServerMessage::Ring {
                call_id,
                from: caller_name,
            },
        );

        let mut call = Call::new(call_id, conn, callee_id);
        let room_tx = self.self_tx.clone();
        let timer = spawn_ring_timer(move |attempt| {
            let room_tx = room_tx.clone();
            async move {
                let _ = room_tx
                    .send(RoomCommand::RingTimerFired { call_id, attempt })
                    .await;
            }
        });
        call.arm_timer(timer);
        self.active_call = Some(call);
    }

    fn ring_ack(&mut self, _conn: ConnectionId, call_id: CallId) {
        let Some(call) = &mut self.active_call else {
            return;
        };
        if call.id != call_id || call.started || call.is_acked() {
            return;
        }
        call.mark_acked();
        call.cancel_timer();
        let caller = call.caller;
        self.send_to(caller, ServerMessage::Ringing { call_id });
    }

    fn accept(&mut self, _conn: ConnectionId, call_id: CallId) {
        let ready =
            matches!(&self.active_call, Some(call) if call.id == call_id && !call.started);
        if !ready {
            return;
        }
        let mut call = self.active_call.take().expect("checked above");
        call.cancel_timer();
        call.started = true;
        call.state = crate::call::CallState::Connecting;

        let (caller, callee) = (call.caller, call.callee);
        self.send_to(
            caller,
            ServerMessage::Start {
                call_id,
                role: Role::Initiator,
            },
        );
        self.send_to(
            callee,
            ServerMessage::Start {
                call_id,
                role: Role::Callee,
            },
        );

        for frame in call.drain_pending() {
            self.send_to(frame.destination, signal_message(call_id, frame.kind, frame.payload));
        }

        self.active_call = Some(call);
    }

    fn decline(&mut self, _conn: ConnectionId, call_id: CallId) {
        let matches_pending =
            matches!(&self.active_call, Some(call) if call.id == call_id && !call.started);
        if matches_pending {
            self.end_call(EndReason::Declined);
        }
    }

    fn hangup(&mut self, _conn: ConnectionId, call_id: CallId) {
        if self.current_call_id() == Some(call_id) {
            self.end_call(EndReason::Hangup);
        }
    }

    fn signal(&mut self, conn: ConnectionId, call_id: CallId, kind: SignalKind, payload: Value) {
        let (matches_call, destination, started) = match &self.active_call {
            Some(call) if call.id == call_id => (true, call.other(conn), call.started),
            _ => (false, None, false),
        };
        if !matches_call {
            return;
        }
        let Some(destination) = destination else {
            return;
        };
        if started {
            self.send_to(destination, signal_message(call_id, kind, payload));
        } else if let Some(call) = &mut self.active_call {
            call.enqueue(PendingFrame {
                kind,
                destination,
                payload,
            });
        }
    }

    fn ring_timer_fired(&mut self, call_id: CallId, _attempt: u32) {
        let fireable =
            matches!(&self.active_call, Some(call) if call.id == call_id && !call.started);
        if !fireable {
            return;
        }
        let call = self.active_call.as_ref().unwrap();
        let (caller, callee) = (call.caller, call.callee);
        let Some(from) = self.members.get(&caller).map(|m| m.name.clone()) else {
            return;
        };
        self.send_to(callee, ServerMessage::Ring { call_id, from });
    }

    fn end_call(&mut self, reason: EndReason) {
        let Some(mut call) = self.active_call.take() else {
            return;
        };
        call.cancel_timer();
        self.broadcast(ServerMessage::End {
            call_id: call.id,
            reason,
        });
    }
}

fn signal_message(call_id: CallId, kind: SignalKind, payload: Value) -> ServerMessage {
    match kind {
        SignalKind::Offer => ServerMessage::Offer {
            call_id,
            sdp: payload,
        },
        SignalKind::Answer => ServerMessage::Answer {
            call_id,
            sdp: payload,
        },
        SignalKind::Ice => ServerMessage::Ice {
            call_id,
            candidate: payload,
        },
    }
}

/// Lazily creates and tears down per-room tasks. The only piece of
/// shared, lockable state in the whole crate — everything past "which
/// mailbox does this room name map to" lives inside the room's own
/// task.
#[derive(Clone)]
pub struct RoomRegistry {
    rooms: Arc<Mutex<HashMap<String, RoomHandle>>>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self {
            rooms: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the mailbox for `name`, spawning a fresh room task if none
    /// exists yet (or the previous one has already torn itself down).
    pub fn get_or_create(&self, name: &str) -> RoomHandle {
        let mut rooms = self.rooms.lock().unwrap();
        if let Some(handle) = rooms.get(name) {
            if !handle.is_closed() {
                return handle.clone();
            }
        }
        let (tx, rx) = mpsc::channel(ROOM_MAILBOX_CAPACITY);
        rooms.insert(name.to_string(), tx.clone());
        drop(rooms);

        let room = Room::new(name.to_string(), tx.clone(), self.clone());
        tokio::spawn(room.run(rx));
        tx
    }

    fn remove(&self, name: &str) {
        self.rooms.lock().unwrap().remove(name);
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().unwrap().len()
    }
}
