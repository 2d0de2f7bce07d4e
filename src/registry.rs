//! The participant registry: the single authoritative map of participants
//! and the `parent`/`children` back-reference between them.
//!
//! Only the dispatcher task (`crate::dispatcher`) ever holds a `&mut
//! Registry`; every other component reaches it through that task's command
//! channel. See SPEC_FULL.md SS3 and SS9 ("Cyclic graphs / back-references").

use crate::{
    config::Config,
    ids::ParticipantId,
    protocol::{Outbound, ParticipantSnapshot},
    transport::WsCommand,
};
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unregistered,
    Broadcaster,
    Listener,
}

pub struct Participant {
    pub id: ParticipantId,
    pub label: String,
    pub role: Role,
    pub parent: Option<ParticipantId>,
    /// Insertion-ordered: this is what makes BFS tie-breaking deterministic.
    pub children: Vec<ParticipantId>,
    pub last_seen: Instant,
    pub transport: mpsc::Sender<WsCommand>,
}

/// What a removed participant leaves behind, for the dispatcher to act on.
pub struct Removed {
    pub id: ParticipantId,
    pub label: String,
    pub role: Role,
    pub parent: Option<ParticipantId>,
    pub children: Vec<ParticipantId>,
}

#[derive(Default)]
pub struct Registry {
    participants: HashMap<ParticipantId, Participant>,
    broadcaster: Option<ParticipantId>,
    /// Ids of participants that have registered as listeners, in the order
    /// they registered. Used to replay placement in registration order when
    /// a broadcaster (re-)registers (SPEC_FULL.md SS4.2).
    listener_registration_order: Vec<ParticipantId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_unregistered(
        &mut self,
        id: ParticipantId,
        label: String,
        transport: mpsc::Sender<WsCommand>,
        now: Instant,
    ) {
        self.participants.insert(
            id,
            Participant {
                id,
                label,
                role: Role::Unregistered,
                parent: None,
                children: Vec::new(),
                last_seen: now,
                transport,
            },
        );
    }

    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.participants.contains_key(&id)
    }

    /// Every connected participant, regardless of role, in ascending id
    /// order. Used by the broadcaster `cmd`/`metadata` fan-out, which
    /// reaches "every live participant with a valid transport" (SPEC_FULL.md
    /// SS4.3) - not just placed tree nodes.
    pub fn all_ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self.participants.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn role_of(&self, id: ParticipantId) -> Option<Role> {
        self.get(id).map(|p| p.role)
    }

    pub fn label_of(&self, id: ParticipantId) -> String {
        self.get(id).map(|p| p.label.clone()).unwrap_or_default()
    }

    pub fn broadcaster(&self) -> Option<ParticipantId> {
        self.broadcaster
    }

    pub fn children_of(&self, id: ParticipantId) -> &[ParticipantId] {
        self.get(id).map(|p| p.children.as_slice()).unwrap_or(&[])
    }

    pub fn capacity_of(&self, config: &Config, id: ParticipantId) -> usize {
        if self.broadcaster == Some(id) {
            config.croot
        } else {
            config.cnode
        }
    }

    /// All participants that currently have a role (i.e. excludes those
    /// still `Unregistered`), which is the set eligible to be a tree node.
    /// Returned in ascending id order so that callers get a deterministic
    /// tie-break when sorting by a secondary key (load, in the rebalancer).
    pub fn placed_node_ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self
            .participants
            .values()
            .filter(|p| p.role != Role::Unregistered && (p.role == Role::Broadcaster || p.parent.is_some()))
            .map(|p| p.id)
            .collect();
        ids.sort();
        ids
    }

    /// Listeners currently without a parent, in the order they registered.
    pub fn orphans_in_registration_order(&self) -> Vec<ParticipantId> {
        self.listener_registration_order
            .iter()
            .copied()
            .filter(|id| {
                self.get(*id)
                    .map(|p| p.role == Role::Listener && p.parent.is_none())
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Attempts to claim the broadcaster role for `id`. Returns `false`
    /// (no-op) if another broadcaster already exists - the caller must
    /// leave the requesting connection `Unregistered` (SS9, decision 1).
    pub fn try_set_broadcaster(&mut self, id: ParticipantId) -> bool {
        if self.broadcaster.is_some() {
            return false;
        }
        if let Some(p) = self.participants.get_mut(&id) {
            p.role = Role::Broadcaster;
            self.broadcaster = Some(id);
            true
        } else {
            false
        }
    }

    pub fn set_listener(&mut self, id: ParticipantId) {
        if let Some(p) = self.participants.get_mut(&id) {
            p.role = Role::Listener;
            self.listener_registration_order.push(id);
        }
    }

    /// Links `child` under `parent`, appending to `parent`'s insertion-ordered
    /// children. Does not unlink any previous parent - callers are expected
    /// to only link parent-less (orphan) children.
    pub fn link(&mut self, child: ParticipantId, parent: ParticipantId) {
        if let Some(p) = self.participants.get_mut(&parent) {
            p.children.push(child);
        }
        if let Some(c) = self.participants.get_mut(&child) {
            c.parent = Some(parent);
        }
    }

    pub fn clear_parent(&mut self, child: ParticipantId) {
        if let Some(c) = self.participants.get_mut(&child) {
            c.parent = None;
        }
    }

    /// Moves `child` from `from`'s children to `to`'s children (rebalancer).
    pub fn move_child(&mut self, child: ParticipantId, from: ParticipantId, to: ParticipantId) {
        if let Some(p) = self.participants.get_mut(&from) {
            p.children.retain(|c| *c != child);
        }
        self.link(child, to);
    }

    pub fn update_heartbeat(&mut self, id: ParticipantId, now: Instant) {
        if let Some(p) = self.participants.get_mut(&id) {
            p.last_seen = now;
        }
    }

    pub fn stale_ids(&self, now: Instant, t_heartbeat: Duration) -> Vec<ParticipantId> {
        self.participants
            .values()
            .filter(|p| now.duration_since(p.last_seen) > t_heartbeat)
            .map(|p| p.id)
            .collect()
    }

    /// Removes `id` entirely, unlinking it from its parent's children list.
    /// Does not touch `id`'s own children - the dispatcher is responsible
    /// for reassigning them via `crate::placement::reassign_orphans_of`.
    pub fn remove(&mut self, id: ParticipantId) -> Option<Removed> {
        let p = self.participants.remove(&id)?;
        if let Some(parent_id) = p.parent {
            if let Some(parent) = self.participants.get_mut(&parent_id) {
                parent.children.retain(|c| *c != id);
            }
        }
        if self.broadcaster == Some(id) {
            self.broadcaster = None;
        }
        self.listener_registration_order.retain(|c| *c != id);
        Some(Removed {
            id: p.id,
            label: p.label,
            role: p.role,
            parent: p.parent,
            children: p.children,
        })
    }

    /// Best-effort send: drops silently if the connection's outbound buffer
    /// is full or the connection is gone. Never blocks the dispatcher.
    pub fn send(&self, id: ParticipantId, msg: Outbound) {
        if let Some(p) = self.get(id) {
            let _ = p.transport.try_send(WsCommand::Send(msg));
        }
    }

    /// Forcibly terminates the participant's transport (heartbeat timeout).
    pub fn terminate(&self, id: ParticipantId) {
        if let Some(p) = self.get(id) {
            let _ = p.transport.try_send(WsCommand::Close);
        }
    }

    pub fn snapshot(&self, now: Instant) -> Vec<ParticipantSnapshot> {
        let mut out: Vec<ParticipantSnapshot> = self
            .participants
            .values()
            .map(|p| ParticipantSnapshot {
                id: p.id,
                label: p.label.clone(),
                role: match p.role {
                    Role::Unregistered => "unregistered",
                    Role::Broadcaster => "broadcaster",
                    Role::Listener => "listener",
                },
                parent: p.parent,
                children: p.children.clone(),
                last_seen_ms_ago: now.duration_since(p.last_seen).as_millis() as u64,
            })
            .collect();
        out.sort_by_key(|s| s.id);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> mpsc::Sender<WsCommand> {
        mpsc::channel(8).0
    }

    #[test]
    fn bidirectional_consistency_holds_after_link_and_remove() {
        let mut reg = Registry::new();
        let now = Instant::now();
        let root = ParticipantId::for_test(1);
        let child = ParticipantId::for_test(2);
        reg.insert_unregistered(root, "fm1".into(), channel(), now);
        reg.insert_unregistered(child, "fm2".into(), channel(), now);
        reg.try_set_broadcaster(root);
        reg.set_listener(child);
        reg.link(child, root);

        assert_eq!(reg.get(child).unwrap().parent, Some(root));
        assert!(reg.children_of(root).contains(&child));

        let removed = reg.remove(child).unwrap();
        assert_eq!(removed.parent, Some(root));
        assert!(!reg.children_of(root).contains(&child));
    }

    #[test]
    fn only_one_broadcaster_can_be_set() {
        let mut reg = Registry::new();
        let now = Instant::now();
        let a = ParticipantId::for_test(1);
        let b = ParticipantId::for_test(2);
        reg.insert_unregistered(a, "fm1".into(), channel(), now);
        reg.insert_unregistered(b, "fm2".into(), channel(), now);

        assert!(reg.try_set_broadcaster(a));
        assert!(!reg.try_set_broadcaster(b));
        assert_eq!(reg.broadcaster(), Some(a));
    }

    #[test]
    fn stale_ids_uses_the_heartbeat_threshold() {
        let mut reg = Registry::new();
        let now = Instant::now();
        let a = ParticipantId::for_test(1);
        reg.insert_unregistered(a, "fm1".into(), channel(), now);
        assert!(reg.stale_ids(now, Duration::from_secs(15)).is_empty());

        let later = now + Duration::from_secs(20);
        assert_eq!(reg.stale_ids(later, Duration::from_secs(15)), vec![a]);
    }
}
