//! Wire vocabulary exchanged over the participant WebSocket connections.
//!
//! Mirrors the tagged-enum-over-JSON style used for the request/response
//! envelopes in this codebase's WebSocket RPC layer: a `type` tag picks the
//! variant, everything else is plain `serde` field (de)serialization.

use crate::ids::ParticipantId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterRole {
    Broadcaster,
    Listener,
}

/// Messages a participant may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Inbound {
    #[serde(rename = "register")]
    Register {
        role: RegisterRole,
        #[serde(rename = "customId", default)]
        custom_id: Option<String>,
    },
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "offer")]
    Offer { target: ParticipantId, payload: Value },
    #[serde(rename = "answer")]
    Answer { target: ParticipantId, payload: Value },
    #[serde(rename = "candidate")]
    Candidate { target: ParticipantId, payload: Value },
    #[serde(rename = "cmd")]
    Cmd { payload: Value },
    #[serde(rename = "metadata")]
    Metadata { payload: Value },
    #[serde(rename = "room-message")]
    RoomMessage { payload: Value },
}

/// Messages the server may send.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Outbound {
    #[serde(rename = "registered-as-broadcaster")]
    RegisteredAsBroadcaster { id: ParticipantId, label: String },
    #[serde(rename = "room-assigned")]
    RoomAssigned { label: String, parent: Option<ParticipantId> },
    #[serde(rename = "listener-joined")]
    ListenerJoined { id: ParticipantId, child_label: String },
    #[serde(rename = "reassigned")]
    Reassigned { new_parent: Option<ParticipantId> },
    #[serde(rename = "child-left")]
    ChildLeft { id: ParticipantId, label: String },
    #[serde(rename = "offer")]
    Offer { from: ParticipantId, payload: Value },
    #[serde(rename = "answer")]
    Answer { from: ParticipantId, payload: Value },
    #[serde(rename = "candidate")]
    Candidate { from: ParticipantId, payload: Value },
    #[serde(rename = "cmd")]
    Cmd { cmd: Value },
    #[serde(rename = "metadata")]
    Metadata {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    #[serde(rename = "room-message")]
    RoomMessage { from: ParticipantId, payload: Value },
}

/// Which of the three opaque handshake message kinds is being relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeKind {
    Offer,
    Answer,
    Candidate,
}

impl Outbound {
    pub fn handshake(kind: HandshakeKind, from: ParticipantId, payload: Value) -> Self {
        match kind {
            HandshakeKind::Offer => Outbound::Offer { from, payload },
            HandshakeKind::Answer => Outbound::Answer { from, payload },
            HandshakeKind::Candidate => Outbound::Candidate { from, payload },
        }
    }
}

/// A single participant as seen by an operator (`GET /admin/rooms`).
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantSnapshot {
    pub id: ParticipantId,
    pub label: String,
    pub role: &'static str,
    pub parent: Option<ParticipantId>,
    pub children: Vec<ParticipantId>,
    pub last_seen_ms_ago: u64,
}
