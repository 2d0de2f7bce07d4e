//! The single-writer actor: a `tokio` task owning the `Registry` exclusively
//! and driven by an `mpsc` command channel. Connection tasks, timers and the
//! admin route all talk to the tree only through this channel, which is what
//! gives the whole state machine its single-writer semantics (SPEC_FULL.md
//! SS5). Grounded on the connection-multiplexing task in this codebase's
//! WebSocket RPC layer (`wsrpc::client_connected`) and the single
//! command-channel-driven supervisor used for actor-style state elsewhere in
//! this codebase.

use crate::{
    config::Config,
    ids::ParticipantId,
    liveness, placement,
    protocol::{HandshakeKind, Inbound, Outbound, ParticipantSnapshot, RegisterRole},
    rebalance,
    registry::{Registry, Role},
    signaling,
    transport::WsCommand,
};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// Everything that can mutate, or ask for a read of, the registry. One of
/// these crosses the channel per connection event or timer tick.
pub enum Command {
    Connect {
        id: ParticipantId,
        label: String,
        transport: mpsc::Sender<WsCommand>,
    },
    Message {
        id: ParticipantId,
        msg: Inbound,
    },
    Close {
        id: ParticipantId,
    },
    HeartbeatSweep,
    Rebalance,
    Snapshot {
        reply: oneshot::Sender<Vec<ParticipantSnapshot>>,
    },
}

/// Handle used by connection tasks, timers and HTTP routes to reach the
/// dispatcher. Cheap to clone - it is just an `mpsc::Sender`.
pub type DispatcherHandle = mpsc::Sender<Command>;

/// Spawns the dispatcher task and returns a handle to its command channel.
/// The channel is unbounded from the dispatcher's point of view in the sense
/// that it never drops a command; backpressure, if any, is on the senders.
pub fn spawn(config: Config) -> DispatcherHandle {
    let (tx, mut rx) = mpsc::channel::<Command>(1024);
    tokio::spawn(async move {
        let mut reg = Registry::new();
        while let Some(cmd) = rx.recv().await {
            handle(&mut reg, &config, cmd);
        }
        tracing::info!("dispatcher command channel closed, shutting down");
    });
    tx
}

fn handle(reg: &mut Registry, config: &Config, cmd: Command) {
    match cmd {
        Command::Connect { id, label, transport } => handle_connect(reg, id, label, transport),
        Command::Message { id, msg } => handle_message(reg, config, id, msg),
        Command::Close { id } => handle_close(reg, config, id),
        Command::HeartbeatSweep => liveness::sweep(reg, config, Instant::now()),
        Command::Rebalance => {
            rebalance::rebalance_once(reg, config);
            // Rebalancing can free capacity at a node an orphan couldn't
            // previously reach (SPEC_FULL.md SS7: retries happen "on every
            // broadcaster register, node departure, and rebalance tick").
            placement::place_all_orphans(reg, config);
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(reg.snapshot(Instant::now()));
        }
    }
}

fn handle_connect(reg: &mut Registry, id: ParticipantId, label: String, transport: mpsc::Sender<WsCommand>) {
    reg.insert_unregistered(id, label, transport, Instant::now());
}

fn handle_message(reg: &mut Registry, config: &Config, id: ParticipantId, msg: Inbound) {
    // An id can go missing between the connection task sending a command and
    // the dispatcher processing it (e.g. a Close raced ahead of it) - every
    // handler below is written to treat that as a silent no-op rather than a
    // panic, since `reg.get`/`reg.role_of` simply return `None`.
    match msg {
        Inbound::Register { role, custom_id: _ } => handle_register(reg, config, id, role),
        Inbound::Heartbeat => reg.update_heartbeat(id, Instant::now()),
        Inbound::Offer { target, payload } => {
            signaling::route_handshake(reg, HandshakeKind::Offer, id, target, payload)
        }
        Inbound::Answer { target, payload } => {
            signaling::route_handshake(reg, HandshakeKind::Answer, id, target, payload)
        }
        Inbound::Candidate { target, payload } => {
            signaling::route_handshake(reg, HandshakeKind::Candidate, id, target, payload)
        }
        Inbound::Cmd { payload } => signaling::route_cmd(reg, id, payload),
        Inbound::Metadata { payload } => signaling::route_metadata(reg, id, payload),
        Inbound::RoomMessage { payload } => signaling::route_room_message(reg, id, payload),
    }
}

/// A `register` is only honored once per connection - the state machine
/// forbids `BROADCASTER -> anything else` and a placed/orphan listener
/// re-sending `register` is not in the source vocabulary, so any `register`
/// arriving once the role is no longer `Unregistered` is dropped exactly
/// like any other message this server doesn't recognize as valid in context.
fn handle_register(reg: &mut Registry, config: &Config, id: ParticipantId, role: RegisterRole) {
    if reg.role_of(id) != Some(Role::Unregistered) {
        return;
    }
    match role {
        RegisterRole::Broadcaster => {
            if reg.try_set_broadcaster(id) {
                reg.send(
                    id,
                    Outbound::RegisteredAsBroadcaster {
                        id,
                        label: reg.label_of(id),
                    },
                );
                placement::place_all_orphans(reg, config);
            }
            // A second broadcaster is silently ignored (SS9, Open Question
            // 1) - the connection stays `Unregistered` forever, which is
            // harmless: it never attaches to the tree and never fans out.
        }
        RegisterRole::Listener => {
            reg.set_listener(id);
            placement::place(reg, config, id);
        }
    }
}

fn handle_close(reg: &mut Registry, config: &Config, id: ParticipantId) {
    let removed = match reg.remove(id) {
        Some(removed) => removed,
        None => return,
    };
    if let Some(parent) = removed.parent {
        reg.send(
            parent,
            Outbound::ChildLeft {
                id: removed.id,
                label: removed.label,
            },
        );
    }
    if !removed.children.is_empty() {
        placement::reassign_orphans_of(reg, config, id, removed.children);
    }
    // A departure can free capacity for orphans that have nothing to do
    // with the node that just left (e.g. a long-orphaned listener that
    // never found room) - retry all of them, not just `id`'s own children
    // (SPEC_FULL.md SS7, SS8 scenario 6).
    placement::place_all_orphans(reg, config);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant as StdInstant;

    fn connect(reg: &mut Registry, n: u64) -> (ParticipantId, mpsc::Receiver<WsCommand>) {
        let id = ParticipantId::for_test(n);
        let (tx, rx) = mpsc::channel(16);
        reg.insert_unregistered(id, format!("fm{}", 1000 + n), tx, StdInstant::now());
        (id, rx)
    }

    #[test]
    fn second_broadcaster_register_is_silently_ignored() {
        let mut reg = Registry::new();
        let config = Config::default();
        let (b1, _rx1) = connect(&mut reg, 1);
        let (b2, _rx2) = connect(&mut reg, 2);

        handle_register(&mut reg, &config, b1, RegisterRole::Broadcaster);
        handle_register(&mut reg, &config, b2, RegisterRole::Broadcaster);

        assert_eq!(reg.broadcaster(), Some(b1));
        assert_eq!(reg.role_of(b2), Some(Role::Unregistered));
    }

    #[test]
    fn register_is_ignored_once_role_is_already_set() {
        let mut reg = Registry::new();
        let config = Config::default();
        let (l, _rx) = connect(&mut reg, 1);
        handle_register(&mut reg, &config, l, RegisterRole::Listener);
        assert_eq!(reg.role_of(l), Some(Role::Listener));

        // A stray second register (broadcaster this time) must not flip the role.
        handle_register(&mut reg, &config, l, RegisterRole::Broadcaster);
        assert_eq!(reg.role_of(l), Some(Role::Listener));
        assert_eq!(reg.broadcaster(), None);
    }

    #[test]
    fn close_of_interior_node_notifies_parent_and_reassigns_children() {
        let mut reg = Registry::new();
        let config = Config::default();
        let (b, mut b_rx) = connect(&mut reg, 1);
        handle_register(&mut reg, &config, b, RegisterRole::Broadcaster);
        let _ = b_rx.try_recv(); // RegisteredAsBroadcaster

        let (l1, _) = connect(&mut reg, 2);
        handle_register(&mut reg, &config, l1, RegisterRole::Listener);
        let _ = b_rx.try_recv(); // listener-joined for l1

        let (l2, _) = connect(&mut reg, 3);
        handle_register(&mut reg, &config, l2, RegisterRole::Listener);
        let _ = b_rx.try_recv(); // listener-joined for l2

        let (l3, _) = connect(&mut reg, 4);
        handle_register(&mut reg, &config, l3, RegisterRole::Listener);
        // l3 lands under l1 (b is full), so nothing further for b_rx here.
        assert_eq!(reg.get(l3).unwrap().parent, Some(l1));

        handle_close(&mut reg, &config, l1);

        assert_eq!(reg.get(l3).unwrap().parent, Some(b));
        assert!(!reg.contains(l1));

        // b should have received both `child-left` for l1 and `listener-joined` for l3.
        let mut saw_child_left = false;
        let mut saw_listener_joined_l3 = false;
        while let Ok(cmd) = b_rx.try_recv() {
            if let WsCommand::Send(Outbound::ChildLeft { id, .. }) = &cmd {
                if *id == l1 {
                    saw_child_left = true;
                }
            }
            if let WsCommand::Send(Outbound::ListenerJoined { id, .. }) = &cmd {
                if *id == l3 {
                    saw_listener_joined_l3 = true;
                }
            }
        }
        assert!(saw_child_left);
        assert!(saw_listener_joined_l3);
    }

    #[test]
    fn a_departure_anywhere_retries_placement_for_unrelated_orphans() {
        let mut reg = Registry::new();
        let config = Config::default();
        let (b, _b_rx) = connect(&mut reg, 1);
        handle_register(&mut reg, &config, b, RegisterRole::Broadcaster);

        // Fill the tree completely: b's 2 slots + each of those children's 2 slots.
        let mut filled = Vec::new();
        for n in 2..8 {
            let (id, _rx) = connect(&mut reg, n);
            handle_register(&mut reg, &config, id, RegisterRole::Listener);
            filled.push(id);
        }

        let (orphan, mut orphan_rx) = connect(&mut reg, 100);
        handle_register(&mut reg, &config, orphan, RegisterRole::Listener);
        assert_eq!(reg.get(orphan).unwrap().parent, None, "tree is full");
        let _ = orphan_rx.try_recv(); // room-assigned{parent: null}

        // None of `orphan`'s ancestry is involved in this departure at all.
        let departing = filled[0];
        handle_close(&mut reg, &config, departing);

        assert!(
            reg.get(orphan).unwrap().parent.is_some(),
            "freeing capacity anywhere should retry the standing orphan"
        );
        let mut saw_reassigned = false;
        while let Ok(cmd) = orphan_rx.try_recv() {
            if let WsCommand::Send(Outbound::Reassigned { new_parent: Some(_) }) = cmd {
                saw_reassigned = true;
            }
        }
        assert!(saw_reassigned);
    }

    #[test]
    fn heartbeat_does_not_mutate_the_tree() {
        let mut reg = Registry::new();
        let config = Config::default();
        let (b, _) = connect(&mut reg, 1);
        handle_register(&mut reg, &config, b, RegisterRole::Broadcaster);
        let (l1, _) = connect(&mut reg, 2);
        handle_register(&mut reg, &config, l1, RegisterRole::Listener);

        let before_parent = reg.get(l1).unwrap().parent;
        let before_children = reg.children_of(b).to_vec();

        handle_message(&mut reg, &config, l1, Inbound::Heartbeat);
        handle_message(&mut reg, &config, l1, Inbound::Heartbeat);

        assert_eq!(reg.get(l1).unwrap().parent, before_parent);
        assert_eq!(reg.children_of(b), before_children.as_slice());
    }
}
