//! Tree placement engine: BFS attachment of new/orphaned listeners, and
//! orphan reassignment after a node departs. See SPEC_FULL.md SS4.2.

use crate::{
    config::Config,
    ids::ParticipantId,
    protocol::Outbound,
    registry::Registry,
};
use std::collections::{HashSet, VecDeque};

/// Breadth-first search from `root`, returning the first visited node (in
/// BFS order, children visited in insertion order) whose child count is
/// below capacity. Nodes in `exclude` are skipped as candidates but their
/// subtrees - if still reachable - are still explored.
fn bfs_find_capacity(
    reg: &Registry,
    config: &Config,
    root: ParticipantId,
    exclude: &HashSet<ParticipantId>,
) -> Option<ParticipantId> {
    let mut queue = VecDeque::new();
    let mut visited = HashSet::new();
    queue.push_back(root);
    visited.insert(root);

    while let Some(node) = queue.pop_front() {
        if !exclude.contains(&node) && reg.children_of(node).len() < reg.capacity_of(config, node) {
            return Some(node);
        }
        for &child in reg.children_of(node) {
            if visited.insert(child) {
                queue.push_back(child);
            }
        }
    }
    None
}

fn find_and_link(
    reg: &mut Registry,
    config: &Config,
    listener_id: ParticipantId,
    exclude: &HashSet<ParticipantId>,
) -> Option<ParticipantId> {
    let root = reg.broadcaster()?;
    let target = bfs_find_capacity(reg, config, root, exclude)?;
    reg.link(listener_id, target);
    Some(target)
}

/// Attaches `listener_id` to the shallowest node with free capacity, or
/// leaves it an orphan if there is no broadcaster or no free capacity.
pub fn place(reg: &mut Registry, config: &Config, listener_id: ParticipantId) {
    place_inner(reg, config, listener_id, false);
}

/// Shared implementation for `place` and `place_all_orphans`. `notify_reassigned`
/// is set for every orphan replayed via `place_all_orphans` (a late-registering
/// broadcaster, or a departure/rebalance freeing a slot): that listener already
/// received its `room-assigned{parent: null}` when it first registered, so it
/// gets `reassigned{new_parent}` instead of a second `room-assigned` - see
/// SPEC_FULL.md SS9 resolution of Open Question 6 and the scenario 2 walkthrough
/// ("receives no additional room-assigned").
fn place_inner(reg: &mut Registry, config: &Config, listener_id: ParticipantId, notify_reassigned: bool) {
    let label = reg.label_of(listener_id);
    match find_and_link(reg, config, listener_id, &HashSet::new()) {
        Some(parent) => {
            if notify_reassigned {
                reg.send(listener_id, Outbound::Reassigned { new_parent: Some(parent) });
            } else {
                reg.send(
                    listener_id,
                    Outbound::RoomAssigned {
                        label: label.clone(),
                        parent: Some(parent),
                    },
                );
            }
            reg.send(
                parent,
                Outbound::ListenerJoined {
                    id: listener_id,
                    child_label: label,
                },
            );
        }
        None => {
            reg.send(listener_id, Outbound::RoomAssigned { label, parent: None });
        }
    }
}

/// Replays placement over every currently-orphaned listener, in the order
/// they originally registered. Invoked when a broadcaster (re-)registers.
pub fn place_all_orphans(reg: &mut Registry, config: &Config) {
    for id in reg.orphans_in_registration_order() {
        place_inner(reg, config, id, true);
    }
}

/// Repairs the tree after `dead_id` departs: each of its (already detached)
/// children is re-placed, excluding the dead node and the child itself
/// (preventing a single-step cycle; see SPEC_FULL.md SS4.2 and SS9).
pub fn reassign_orphans_of(
    reg: &mut Registry,
    config: &Config,
    dead_id: ParticipantId,
    children: Vec<ParticipantId>,
) {
    for child in children {
        reg.clear_parent(child);
        let exclude: HashSet<ParticipantId> = [dead_id, child].into_iter().collect();
        match find_and_link(reg, config, child, &exclude) {
            Some(parent) => {
                reg.send(child, Outbound::Reassigned { new_parent: Some(parent) });
                reg.send(
                    parent,
                    Outbound::ListenerJoined {
                        id: child,
                        child_label: reg.label_of(child),
                    },
                );
            }
            None => {
                reg.send(child, Outbound::Reassigned { new_parent: None });
            }
        }
    }
}
