//! Transport-agnostic room and call relay logic.
//!
//! This crate owns every stateful decision the rendezvous server makes
//! — who is in which room, whether an invite may proceed, when a call
//! transitions state — without ever touching a socket. The server
//! binary is the thin axum layer that turns WebSocket frames into calls
//! on [`Router::handle_frame`] and pumps [`ConnectionHandle`] sends back
//! out to the wire.

pub mod call;
pub mod connection;
pub mod error;
pub mod room;
pub mod router;
pub mod timer;

pub use call::{Call, CallState, PendingFrame, SignalKind};
pub use connection::{ConnectionHandle, ConnectionId};
pub use error::RelayError;
pub use room::{Room, RoomCommand, RoomHandle, RoomRegistry};
pub use router::Router;
pub use timer::{RingTimer, RING_RESEND_INTERVAL, RING_RESEND_MAX_ATTEMPTS};
