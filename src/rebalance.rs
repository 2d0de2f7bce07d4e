//! Periodic rebalancer: moves overflow children off over-capacity nodes
//! onto the least-loaded node still reachable from the broadcaster. See
//! SPEC_FULL.md SS4.5 and SS9 (decision 4: load, not depth, drives the
//! destination choice here - BFS already did the depth-minimizing work at
//! placement time).

use crate::{config::Config, ids::ParticipantId, protocol::Outbound, registry::Registry};
use std::collections::HashMap;

pub fn rebalance_once(reg: &mut Registry, config: &Config) {
    // Only nodes already attached to the tree (the broadcaster, or a
    // listener with a parent) are legitimate destinations - moving an
    // overflow child under a still-orphaned listener would silently
    // disconnect it from the broadcaster's tree.
    let mut candidates = reg.placed_node_ids();
    candidates.sort_by_key(|id| reg.children_of(*id).len());

    let mut load: HashMap<ParticipantId, usize> =
        candidates.iter().map(|&id| (id, reg.children_of(id).len())).collect();

    let over_capacity: Vec<ParticipantId> = candidates
        .iter()
        .copied()
        .filter(|&id| reg.children_of(id).len() > reg.capacity_of(config, id))
        .collect();

    for n in over_capacity {
        let capacity = reg.capacity_of(config, n);
        let children = reg.children_of(n).to_vec();
        let overflow = &children[capacity..];

        for &child in overflow {
            let dest = candidates.iter().copied().find(|&d| {
                d != n && load.get(&d).copied().unwrap_or(0) < reg.capacity_of(config, d)
            });

            if let Some(dest) = dest {
                reg.move_child(child, n, dest);
                *load.entry(dest).or_insert(0) += 1;
                if let Some(l) = load.get_mut(&n) {
                    *l = l.saturating_sub(1);
                }
                let child_label = reg.label_of(child);
                reg.send(dest, Outbound::ListenerJoined { id: child, child_label });
                reg.send(child, Outbound::Reassigned { new_parent: Some(dest) });
            }
            // No eligible destination: leave the overflow child where it is
            // and reattempt at the next tick.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::sync::mpsc;

    fn chan() -> mpsc::Sender<crate::transport::WsCommand> {
        mpsc::channel(8).0
    }

    fn connect(reg: &mut Registry, n: u64) -> ParticipantId {
        let id = ParticipantId::for_test(n);
        reg.insert_unregistered(id, format!("fm{}", 1000 + n), chan(), Instant::now());
        id
    }

    #[test]
    fn overflow_children_move_to_the_least_loaded_node() {
        let mut reg = Registry::new();
        let config = Config::default();
        let b = connect(&mut reg, 1);
        reg.try_set_broadcaster(b);
        let l1 = connect(&mut reg, 2);
        reg.set_listener(l1);
        reg.link(l1, b);

        // Manually build a lopsided tree: B has 1 child (l1), l1 has 3
        // children - a state only reachable via injection/disconnect
        // sequences in the live system but directly testable here.
        let mut overflow_children = Vec::new();
        for n in 3..6 {
            let c = connect(&mut reg, n);
            reg.set_listener(c);
            reg.link(c, l1);
            overflow_children.push(c);
        }
        assert_eq!(reg.children_of(l1).len(), 3);
        assert_eq!(reg.children_of(b).len(), 1);

        rebalance_once(&mut reg, &config);

        assert!(reg.children_of(l1).len() <= config.cnode);
        assert!(reg.children_of(b).len() <= config.croot);

        // The last (insertion-order) overflow child must have moved off l1,
        // to whichever least-loaded eligible node the rebalancer picked -
        // the rebalancer is a convergence loop, not a pinned destination.
        let moved = overflow_children[2];
        let new_parent = reg.get(moved).unwrap().parent;
        assert_ne!(new_parent, Some(l1));
        assert!(new_parent.is_some());
    }

    #[test]
    fn balanced_tree_is_left_untouched() {
        let mut reg = Registry::new();
        let config = Config::default();
        let b = connect(&mut reg, 1);
        reg.try_set_broadcaster(b);
        let l1 = connect(&mut reg, 2);
        let l2 = connect(&mut reg, 3);
        reg.set_listener(l1);
        reg.set_listener(l2);
        reg.link(l1, b);
        reg.link(l2, b);

        rebalance_once(&mut reg, &config);

        assert_eq!(reg.children_of(b), &[l1, l2]);
    }

    #[test]
    fn no_destination_leaves_overflow_child_in_place() {
        // Capacities pinned to croot=1, cnode=0 so that no node anywhere in
        // the tree ever has room - the only way to deterministically force
        // "no eligible destination" without an unboundedly deep tree.
        let config = Config {
            croot: 1,
            cnode: 0,
            ..Config::default()
        };
        let mut reg = Registry::new();
        let b = connect(&mut reg, 1);
        reg.try_set_broadcaster(b);
        let l1 = connect(&mut reg, 2);
        reg.set_listener(l1);
        reg.link(l1, b); // b at its capacity of 1

        let c1 = connect(&mut reg, 3);
        reg.set_listener(c1);
        reg.link(c1, l1); // l1 over its capacity of 0

        rebalance_once(&mut reg, &config);

        assert_eq!(reg.children_of(l1), &[c1], "no node has spare capacity, overflow child stays put");
    }
}
