//! Per-resource routing domain
//!
//! One `Domain` holds the live and abnormal adjacency maps of a resource
//! partition together with its cached order and the device-level entities
//! materialized for it. Forward and reverse maps are only touched through
//! `link`/`unlink`, which keep them mirrored and free of empty sets.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::arena::{EntityArena, EntityId};
use crate::device::QueueEvent;

pub(crate) type Adjacency = BTreeMap<EntityId, BTreeSet<EntityId>>;

/// Side of an edge an endpoint is materialized for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Source,
    Destination,
}

impl Role {
    /// Queue event a materialized endpoint is subscribed to
    pub fn event(self) -> QueueEvent {
        match self {
            Self::Source => QueueEvent::Enqueue,
            Self::Destination => QueueEvent::FullToNotFull,
        }
    }
}

/// Device-level registration of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Materialized {
    /// Group that created this entity, if it was materialized as a member
    pub host_group: Option<i32>,
}

/// Counters refreshed by `order`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelationStats {
    pub bind_num: usize,
    pub abnormal_bind_num: usize,
    pub subscribe_num: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Domain {
    pub src_to_dst: Adjacency,
    pub dst_to_src: Adjacency,
    pub abnormal_src_to_dst: Adjacency,
    pub abnormal_dst_to_src: Adjacency,
    pub ordered: Vec<EntityId>,
    pub has_loop: bool,
    pub order_dirty: bool,
    pub materialized: HashMap<(EntityId, Role), Materialized>,
    pub pending_abnormal_src: Vec<crate::EntityKey>,
    pub pending_abnormal_dst: Vec<crate::EntityKey>,
    pub stats: RelationStats,
    live_edges: usize,
    abnormal_edges: usize,
}

impl Domain {
    #[inline]
    pub fn has_edge(&self, src: EntityId, dst: EntityId) -> bool {
        contains(&self.src_to_dst, src, dst)
    }

    #[inline]
    pub fn has_abnormal_edge(&self, src: EntityId, dst: EntityId) -> bool {
        contains(&self.abnormal_src_to_dst, src, dst)
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.live_edges
    }

    #[inline]
    pub fn abnormal_edge_count(&self) -> usize {
        self.abnormal_edges
    }

    pub fn link(&mut self, src: EntityId, dst: EntityId) {
        if link(&mut self.src_to_dst, &mut self.dst_to_src, src, dst) {
            self.live_edges += 1;
        }
    }

    pub fn unlink(&mut self, src: EntityId, dst: EntityId) -> bool {
        let removed = unlink(&mut self.src_to_dst, &mut self.dst_to_src, src, dst);
        if removed {
            self.live_edges -= 1;
        }
        removed
    }

    pub fn link_abnormal(&mut self, src: EntityId, dst: EntityId) {
        if link(
            &mut self.abnormal_src_to_dst,
            &mut self.abnormal_dst_to_src,
            src,
            dst,
        ) {
            self.abnormal_edges += 1;
        }
    }

    pub fn unlink_abnormal(&mut self, src: EntityId, dst: EntityId) -> bool {
        let removed = unlink(
            &mut self.abnormal_src_to_dst,
            &mut self.abnormal_dst_to_src,
            src,
            dst,
        );
        if removed {
            self.abnormal_edges -= 1;
        }
        removed
    }

    /// Move a live edge into the abnormal maps; the cached order is kept
    pub fn move_to_abnormal(&mut self, src: EntityId, dst: EntityId) -> bool {
        if !self.unlink(src, dst) {
            return false;
        }
        self.link_abnormal(src, dst);
        true
    }

    /// Whether `id` still has a live or abnormal edge in `role`
    pub fn is_incident(&self, id: EntityId, role: Role) -> bool {
        match role {
            Role::Source => {
                self.src_to_dst.contains_key(&id) || self.abnormal_src_to_dst.contains_key(&id)
            }
            Role::Destination => {
                self.dst_to_src.contains_key(&id) || self.abnormal_dst_to_src.contains_key(&id)
            }
        }
    }

    /// Whether anything in this domain still refers to `id`
    pub fn references(&self, id: EntityId) -> bool {
        self.is_incident(id, Role::Source)
            || self.is_incident(id, Role::Destination)
            || self.materialized.contains_key(&(id, Role::Source))
            || self.materialized.contains_key(&(id, Role::Destination))
    }

    /// Whether `to` is reachable from `from` over live edges
    pub fn reaches(&self, from: EntityId, to: EntityId) -> bool {
        let mut stack = vec![from];
        let mut visited = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if !visited.insert(id) {
                continue;
            }
            if let Some(dsts) = self.src_to_dst.get(&id) {
                stack.extend(dsts.iter().copied());
            }
        }
        false
    }

    /// Every vertex with a live or abnormal edge
    pub fn vertices(&self) -> BTreeSet<EntityId> {
        self.src_to_dst
            .keys()
            .chain(self.dst_to_src.keys())
            .chain(self.abnormal_src_to_dst.keys())
            .chain(self.abnormal_dst_to_src.keys())
            .copied()
            .collect()
    }

    pub fn refresh_stats(&mut self, arena: &EntityArena) {
        self.stats = RelationStats {
            bind_num: self.edge_count(),
            abnormal_bind_num: self.abnormal_edge_count(),
            subscribe_num: self
                .materialized
                .keys()
                .filter(|(id, _)| arena.get(*id).is_some_and(|e| e.is_queue()))
                .count(),
        };
    }

    /// Mirror and disjointness check over all four maps
    pub fn is_consistent(&self) -> bool {
        let counted = self.src_to_dst.values().map(BTreeSet::len).sum::<usize>() == self.live_edges
            && self.abnormal_src_to_dst.values().map(BTreeSet::len).sum::<usize>()
                == self.abnormal_edges;
        counted
            && mirrored(&self.src_to_dst, &self.dst_to_src)
            && mirrored(&self.abnormal_src_to_dst, &self.abnormal_dst_to_src)
            && self.src_to_dst.iter().all(|(src, dsts)| {
                dsts.iter()
                    .all(|dst| !contains(&self.abnormal_src_to_dst, *src, *dst))
            })
    }
}

#[inline]
fn contains(map: &Adjacency, src: EntityId, dst: EntityId) -> bool {
    map.get(&src).is_some_and(|dsts| dsts.contains(&dst))
}

fn link(forward: &mut Adjacency, reverse: &mut Adjacency, src: EntityId, dst: EntityId) -> bool {
    let inserted = forward.entry(src).or_default().insert(dst);
    reverse.entry(dst).or_default().insert(src);
    inserted
}

fn unlink(forward: &mut Adjacency, reverse: &mut Adjacency, src: EntityId, dst: EntityId) -> bool {
    let removed = remove_from(forward, src, dst);
    if removed {
        remove_from(reverse, dst, src);
    }
    removed
}

fn remove_from(map: &mut Adjacency, key: EntityId, value: EntityId) -> bool {
    let Some(set) = map.get_mut(&key) else {
        return false;
    };
    let removed = set.remove(&value);
    if set.is_empty() {
        map.remove(&key);
    }
    removed
}

fn mirrored(forward: &Adjacency, reverse: &Adjacency) -> bool {
    let no_empty = forward.values().all(|s| !s.is_empty()) && reverse.values().all(|s| !s.is_empty());
    no_empty
        && forward
            .iter()
            .all(|(src, dsts)| dsts.iter().all(|dst| contains(reverse, *dst, *src)))
        && reverse
            .iter()
            .all(|(dst, srcs)| srcs.iter().all(|src| contains(forward, *src, *dst)))
}
