//! The per-rendezvous state machine: RINGING -> CONNECTING -> ENDED.

use std::collections::VecDeque;

use callrelay_protocol::CallId;
use serde_json::Value;

use crate::connection::ConnectionId;
use crate::timer::RingTimer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Ringing,
    Connecting,
    Ended,
}

/// Which signaling frame a buffered [`PendingFrame`] represents. The
/// payload itself is never inspected, only tagged so it can be replayed
/// as the right `ServerMessage` variant once flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    Ice,
}

/// A pre-START signaling frame captured while the call is still RINGING,
/// tagged with the connection it must be delivered to once the call
/// reaches CONNECTING.
#[derive(Debug, Clone)]
pub struct PendingFrame {
    pub kind: SignalKind,
    pub destination: ConnectionId,
    pub payload: Value,
}

/// One rendezvous attempt between two members of the same room. Never
/// reused: once it reaches [`CallState::Ended`] it is discarded by the
/// owning `Room`.
pub struct Call {
    pub id: CallId,
    pub caller: ConnectionId,
    pub callee: ConnectionId,
    pub state: CallState,
    pub started: bool,
    /// Set once `ring-ack` has been processed, so a repeated `ring-ack`
    /// is a true no-op rather than re-sending `ringing` every time.
    acked: bool,
    pending: VecDeque<PendingFrame>,
    timer: Option<RingTimer>,
}

impl Call {
    pub fn new(id: CallId, caller: ConnectionId, callee: ConnectionId) -> Self {
        Self {
            id,
            caller,
            callee,
            state: CallState::Ringing,
            started: false,
            acked: false,
            pending: VecDeque::new(),
            timer: None,
        }
    }

    /// The participant on the other side of `who`, or `None` if `who` is
    /// not part of this call at all.
    pub fn other(&self, who: ConnectionId) -> Option<ConnectionId> {
        if who == self.caller {
            Some(self.callee)
        } else if who == self.callee {
            Some(self.caller)
        } else {
            None
        }
    }

    pub fn is_acked(&self) -> bool {
        self.acked
    }

    pub fn mark_acked(&mut self) {
        self.acked = true;
    }

    pub fn arm_timer(&mut self, timer: RingTimer) {
        self.timer = Some(timer);
    }

    /// Discard any in-flight ring resend. Safe to call more than once.
    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }

    pub fn enqueue(&mut self, frame: PendingFrame) {
        self.pending.push_back(frame);
    }

    /// Drain the pending queue in original arrival (FIFO) order.
    pub fn drain_pending(&mut self) -> Vec<PendingFrame> {
        self.pending.drain(..).collect()
    }
}
