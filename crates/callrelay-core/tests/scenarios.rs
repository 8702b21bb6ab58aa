//! End-to-end scenarios driven directly against `Router`/`RoomRegistry`
//! with an in-process `ConnectionHandle` standing in for a real socket.
//! No transport is involved; `callrelay-server`'s job is only to carry
//! bytes to and from these same calls.

use std::time::Duration;

use callrelay_core::{ConnectionHandle, RoomRegistry, Router};
use callrelay_protocol::{BusyReason, EndReason, Role, ServerMessage};
use tokio::sync::mpsc::UnboundedReceiver;

async fn expect(rx: &mut UnboundedReceiver<ServerMessage>) -> ServerMessage {
    tokio::time::timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("channel closed unexpectedly")
}

async fn expect_none(rx: &mut UnboundedReceiver<ServerMessage>) {
    let result = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
    assert!(result.is_err(), "expected no frame, got {result:?}");
}

async fn send(router: &Router, conn: &ConnectionHandle, value: serde_json::Value) {
    let bytes = serde_json::to_vec(&value).unwrap();
    router.handle_frame(conn, &bytes).await;
}

async fn join(
    router: &Router,
    room: &str,
    name: &str,
) -> (ConnectionHandle, UnboundedReceiver<ServerMessage>) {
    let (conn, mut rx) = ConnectionHandle::new();
    send(
        router,
        &conn,
        serde_json::json!({"type": "join", "room": room, "name": name}),
    )
    .await;
    let room_state = expect(&mut rx).await;
    assert!(matches!(room_state, ServerMessage::RoomState { .. }));
    (conn, rx)
}

#[tokio::test]
async fn full_call_lifecycle_from_join_to_hangup() {
    let router = Router::new(RoomRegistry::new());
    let (alice, mut alice_rx) = join(&router, "lobby", "alice").await;
    let (bob, mut bob_rx) = join(&router, "lobby", "bob").await;
    expect(&mut alice_rx).await; // peer-joined(bob)

    send(&router, &alice, serde_json::json!({"type": "invite"})).await;
    let call_id = match expect(&mut alice_rx).await {
        ServerMessage::InviteOk { call_id } => call_id,
        other => panic!("expected invite-ok, got {other:?}"),
    };
    let ring = expect(&mut bob_rx).await;
    assert!(matches!(ring, ServerMessage::Ring { .. }));

    send(
        &router,
        &bob,
        serde_json::json!({"type": "ring-ack", "call_id": call_id}),
    )
    .await;
    assert!(matches!(expect(&mut alice_rx).await, ServerMessage::Ringing { .. }));

    send(
        &router,
        &bob,
        serde_json::json!({"type": "accept", "call_id": call_id}),
    )
    .await;
    assert!(matches!(
        expect(&mut alice_rx).await,
        ServerMessage::Start { role: Role::Initiator, .. }
    ));
    assert!(matches!(
        expect(&mut bob_rx).await,
        ServerMessage::Start { role: Role::Callee, .. }
    ));

    send(
        &router,
        &alice,
        serde_json::json!({"type": "offer", "call_id": call_id, "sdp": {"sdp": "v=0"}}),
    )
    .await;
    let offer = expect(&mut bob_rx).await;
    assert!(matches!(offer, ServerMessage::Offer { .. }));

    send(
        &router,
        &bob,
        serde_json::json!({"type": "answer", "call_id": call_id, "sdp": {"sdp": "v=0"}}),
    )
    .await;
    assert!(matches!(expect(&mut alice_rx).await, ServerMessage::Answer { .. }));

    send(
        &router,
        &alice,
        serde_json::json!({"type": "ice", "call_id": call_id, "candidate": {"c": 1}}),
    )
    .await;
    assert!(matches!(expect(&mut bob_rx).await, ServerMessage::Ice { .. }));

    send(
        &router,
        &alice,
        serde_json::json!({"type": "hangup", "call_id": call_id}),
    )
    .await;
    assert!(matches!(
        expect(&mut alice_rx).await,
        ServerMessage::End { reason: EndReason::Hangup, .. }
    ));
    assert!(matches!(
        expect(&mut bob_rx).await,
        ServerMessage::End { reason: EndReason::Hangup, .. }
    ));
}

#[tokio::test]
async fn signal_for_a_stale_call_id_is_dropped() {
    let router = Router::new(RoomRegistry::new());
    let (alice, mut alice_rx) = join(&router, "r1", "alice").await;
    let (bob, mut bob_rx) = join(&router, "r1", "bob").await;
    expect(&mut alice_rx).await;

    send(&router, &alice, serde_json::json!({"type": "invite"})).await;
    let call_id = match expect(&mut alice_rx).await {
        ServerMessage::InviteOk { call_id } => call_id,
        other => panic!("expected invite-ok, got {other:?}"),
    };
    expect(&mut bob_rx).await; // ring

    send(
        &router,
        &alice,
        serde_json::json!({"type": "hangup", "call_id": call_id}),
    )
    .await;
    expect(&mut alice_rx).await; // end
    expect(&mut bob_rx).await; // end

    // a leftover offer for the now-dead call must not reach anyone.
    send(
        &router,
        &alice,
        serde_json::json!({"type": "offer", "call_id": call_id, "sdp": {}}),
    )
    .await;
    expect_none(&mut bob_rx).await;
    expect_none(&mut alice_rx).await;
}

#[tokio::test]
async fn ring_is_resent_until_acknowledged() {
    let router = Router::new(RoomRegistry::new());
    let (alice, mut alice_rx) = join(&router, "r1", "alice").await;
    let (_bob, mut bob_rx) = join(&router, "r1", "bob").await;
    expect(&mut alice_rx).await;

    send(&router, &alice, serde_json::json!({"type": "invite"})).await;
    expect(&mut alice_rx).await; // invite-ok
    expect(&mut bob_rx).await; // first ring, sent immediately

    // The resend interval is short enough that a second `ring` should
    // land well within a couple of seconds if bob never acks.
    let resent = tokio::time::timeout(Duration::from_secs(3), bob_rx.recv())
        .await
        .expect("expected a ring resend")
        .expect("channel closed");
    assert!(matches!(resent, ServerMessage::Ring { .. }));
}

#[tokio::test]
async fn evicting_the_active_callers_name_ends_the_call() {
    let router = Router::new(RoomRegistry::new());
    let (alice, mut alice_rx) = join(&router, "r1", "alice").await;
    let (bob, mut bob_rx) = join(&router, "r1", "bob").await;
    expect(&mut alice_rx).await;

    send(&router, &alice, serde_json::json!({"type": "invite"})).await;
    expect(&mut alice_rx).await; // invite-ok
    expect(&mut bob_rx).await; // ring

    // A second connection claims the name "alice" mid-call, evicting the
    // original and ending the call she was part of.
    let (_alice2, _alice2_rx) = join(&router, "r1", "alice").await;

    let alice_end = expect(&mut alice_rx).await;
    assert!(matches!(
        alice_end,
        ServerMessage::End { reason: EndReason::Left, .. }
    ));
    let bob_end = expect(&mut bob_rx).await;
    assert!(matches!(
        bob_end,
        ServerMessage::End { reason: EndReason::Left, .. }
    ));

    assert_eq!(alice.close_reason(), Some("replaced".to_string()));
}

#[tokio::test]
async fn third_member_is_busy_while_a_call_is_active() {
    let router = Router::new(RoomRegistry::new());
    let (alice, mut alice_rx) = join(&router, "r1", "alice").await;
    let (_bob, mut bob_rx) = join(&router, "r1", "bob").await;
    let (carol, mut carol_rx) = join(&router, "r1", "carol").await;
    expect(&mut alice_rx).await; // bob joined
    expect(&mut alice_rx).await; // carol joined
    expect(&mut bob_rx).await; // carol joined

    send(&router, &alice, serde_json::json!({"type": "invite"})).await;
    expect(&mut alice_rx).await; // invite-ok
    expect(&mut bob_rx).await; // ring

    send(&router, &carol, serde_json::json!({"type": "invite"})).await;
    let busy = expect(&mut carol_rx).await;
    assert!(matches!(
        busy,
        ServerMessage::Busy { reason: BusyReason::CallActive }
    ));
}

#[tokio::test]
async fn disconnect_ends_the_active_call_and_notifies_the_room() {
    let router = Router::new(RoomRegistry::new());
    let (alice, mut alice_rx) = join(&router, "r1", "alice").await;
    let (bob, mut bob_rx) = join(&router, "r1", "bob").await;
    expect(&mut alice_rx).await;

    send(&router, &alice, serde_json::json!({"type": "invite"})).await;
    expect(&mut alice_rx).await; // invite-ok
    expect(&mut bob_rx).await; // ring

    router.disconnect(bob.id()).await;

    let alice_end = expect(&mut alice_rx).await;
    assert!(matches!(
        alice_end,
        ServerMessage::End { reason: EndReason::Left, .. }
    ));
    let alice_peer_left = expect(&mut alice_rx).await;
    assert!(matches!(alice_peer_left, ServerMessage::PeerLeft { name } if name == "bob"));
}
