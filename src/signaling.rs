//! Signaling router: delivers the three message classes described in
//! SPEC_FULL.md SS4.3 - point-to-point handshake relay, broadcaster-wide
//! fan-out, and subtree `room-message` forwarding. Every send goes through
//! `Registry::send`, which is a best-effort `try_send` against the
//! recipient's bounded outbound channel, so a slow or dead peer never stalls
//! the dispatcher (SS5).

use crate::{
    ids::ParticipantId,
    protocol::{HandshakeKind, Outbound},
    registry::{Registry, Role},
};
use serde_json::Value;

/// `offer`/`answer`/`candidate`: opaque to the server, delivered only to
/// `target`, rewritten to carry `from`. Unknown `target` is a silent drop.
pub fn route_handshake(reg: &Registry, kind: HandshakeKind, from: ParticipantId, target: ParticipantId, payload: Value) {
    if !reg.contains(target) {
        return;
    }
    reg.send(target, Outbound::handshake(kind, from, payload));
}

/// `cmd`: broadcaster-only fan-out to every connected participant, including
/// the broadcaster itself. A non-broadcaster sender is silently dropped.
pub fn route_cmd(reg: &Registry, from: ParticipantId, payload: Value) {
    if reg.role_of(from) != Some(Role::Broadcaster) {
        return;
    }
    for id in reg.all_ids() {
        reg.send(id, Outbound::Cmd { cmd: payload.clone() });
    }
}

/// `metadata`: broadcaster-only fan-out, with the payload's object fields
/// flattened into the outbound envelope (SPEC_FULL.md SS6). A non-object
/// payload has nothing to flatten and is dropped, same as a non-broadcaster
/// sender - see SS9, Open Question 5: a listener sending `metadata` is
/// treated identically to any other unauthorized sender of a
/// broadcaster-only type.
pub fn route_metadata(reg: &Registry, from: ParticipantId, payload: Value) {
    if reg.role_of(from) != Some(Role::Broadcaster) {
        return;
    }
    let fields = match payload {
        Value::Object(map) => map,
        _ => return,
    };
    for id in reg.all_ids() {
        reg.send(
            id,
            Outbound::Metadata {
                payload: fields.clone(),
            },
        );
    }
}

/// `room-message`: forwarded to the sender's direct children only - not
/// recursive (SS4.3).
pub fn route_room_message(reg: &Registry, from: ParticipantId, payload: Value) {
    for &child in reg.children_of(from) {
        reg.send(child, Outbound::RoomMessage { from, payload: payload.clone() });
    }
}
