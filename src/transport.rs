//! Connection endpoint: one task per participant, owning a WebSocket.
//!
//! Grounded on the connection multiplexer in this codebase's WebSocket RPC
//! layer (`wsrpc::client_connected`): a bounded `mpsc` channel decouples
//! outbound sends from the reader, a spawned task drains it into the
//! socket, and malformed frames are logged and dropped rather than
//! terminating the connection.

use crate::{
    dispatcher::Command,
    ids::ParticipantId,
    protocol::{Inbound, Outbound},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use warp::filters::ws::{Message, WebSocket};

/// Capacity of a single participant's outbound buffer. A peer that isn't
/// draining its socket gets its connection closed rather than stalling the
/// dispatcher (SPEC_FULL.md SS5).
const OUTBOUND_BUFFER: usize = 64;

/// What the per-connection writer task does with a value handed to it
/// through a participant's stored "transport handle".
pub enum WsCommand {
    Send(Outbound),
    Close,
}

pub async fn handle_connection(
    ws: WebSocket,
    id: ParticipantId,
    label: String,
    dispatcher: mpsc::Sender<Command>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(OUTBOUND_BUFFER);

    if dispatcher
        .send(Command::Connect {
            id,
            label,
            transport: cmd_tx.clone(),
        })
        .await
        .is_err()
    {
        return;
    }

    let writer_dispatcher = dispatcher.clone();
    let writer = tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                WsCommand::Send(msg) => match serde_json::to_string(&msg) {
                    Ok(text) => {
                        if ws_tx.send(Message::text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(%id, %err, "failed to serialize outbound message"),
                },
                WsCommand::Close => {
                    let _ = ws_tx.send(Message::close()).await;
                    break;
                }
            }
        }
        let _ = ws_tx.close().await;
        writer_dispatcher.send(Command::Close { id }).await.ok();
    });

    while let Some(frame) = ws_rx.next().await {
        let raw = match frame {
            Ok(raw) => raw,
            Err(_) => break,
        };
        if raw.is_close() {
            break;
        }
        if raw.is_ping() || raw.is_pong() || raw.is_binary() {
            continue;
        }
        let text = match raw.to_str() {
            Ok(text) => text,
            Err(_) => continue,
        };
        match serde_json::from_str::<Inbound>(text) {
            Ok(msg) => {
                if dispatcher.send(Command::Message { id, msg }).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                trace!(%id, %err, "dropping malformed or unrecognized frame");
            }
        }
    }

    debug!(%id, "connection closed, signalling writer");
    let _ = cmd_tx.send(WsCommand::Close).await;
    let _ = writer.await;
}
