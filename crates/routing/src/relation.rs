//! Bind relation graph
//!
//! `BindRelation` is the single source of truth for what is bound to what.
//! It owns the entity arena, one `Domain` per resource partition (the second
//! one only used when NUMA routing is on), the group table and the device
//! queue service used to materialize endpoints.
//!
//! # Ownership
//!
//! The graph is not internally synchronized. Exactly one task owns the
//! `BindRelation` and every mutation goes through it; other components talk
//! to that task over a channel.
//!
//! # Bind checks
//!
//! `bind` rejects, in this order: self-binds, invalid domain indexes,
//! a full table, destinations that already have another source, edges that
//! would close a loop, and group membership conflicts. Re-binding an existing
//! edge (live or abnormal) is a no-op that succeeds.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use bqs_protocol::{BqsStatus, StatusResult};

use crate::arena::{EntityArena, EntityId};
use crate::device::DeviceQueueService;
use crate::domain::{Domain, Materialized, RelationStats, Role};
use crate::entity::EntityInfo;
use crate::group::GroupIdAllocator;

/// Maximum live edges per domain
pub const MAX_RELATION_NUM: usize = 65536;

/// Number of resource domains (primary and NUMA extra)
pub const DOMAIN_NUM: usize = 2;

/// Routing graph over both resource domains
pub struct BindRelation {
    pub(crate) arena: EntityArena,
    pub(crate) domains: [Domain; DOMAIN_NUM],
    pub(crate) groups: BTreeMap<i32, Vec<EntityId>>,
    pub(crate) group_res_index: HashMap<i32, usize>,
    pub(crate) group_ids: Arc<GroupIdAllocator>,
    pub(crate) device: Arc<dyn DeviceQueueService>,
    numa: bool,
}

impl std::fmt::Debug for BindRelation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindRelation")
            .field("entities", &self.arena.len())
            .field("binds", &self.domains[0].edge_count())
            .field("groups", &self.groups.len())
            .field("numa", &self.numa)
            .finish()
    }
}

impl BindRelation {
    pub fn new(device: Arc<dyn DeviceQueueService>) -> Self {
        Self {
            arena: EntityArena::new(),
            domains: Default::default(),
            groups: BTreeMap::new(),
            group_res_index: HashMap::new(),
            group_ids: Arc::new(GroupIdAllocator::new()),
            device,
            numa: false,
        }
    }

    /// Enable the second resource domain
    pub fn with_numa(mut self, numa: bool) -> Self {
        self.numa = numa;
        self
    }

    #[inline]
    pub fn is_numa(&self) -> bool {
        self.numa
    }

    #[inline]
    pub fn device(&self) -> &Arc<dyn DeviceQueueService> {
        &self.device
    }

    /// Domain indexes in use
    pub fn active_domains(&self) -> std::ops::Range<usize> {
        0..if self.numa { DOMAIN_NUM } else { 1 }
    }

    /// Validate a resource index
    ///
    /// The extra domain answers `Retry` while NUMA routing is off so the
    /// caller can resubmit on the primary domain.
    pub fn check_index(&self, index: usize) -> StatusResult {
        match index {
            0 => Ok(()),
            1 if self.numa => Ok(()),
            1 => Err(BqsStatus::Retry),
            _ => Err(BqsStatus::ParamInvalid),
        }
    }

    // ========================================================================
    // Bind / unbind
    // ========================================================================

    /// Bind `src` to `dst` in domain `index`
    pub fn bind(&mut self, src: &EntityInfo, dst: &EntityInfo, index: usize) -> StatusResult {
        if src == dst {
            warn!(src = %src, "rejecting bind of an entity to itself");
            return Err(BqsStatus::ParamInvalid);
        }
        self.check_index(index)?;

        let domain = &self.domains[index];
        if domain.edge_count() >= MAX_RELATION_NUM {
            error!(index, max = MAX_RELATION_NUM, "bind relation table is full");
            return Err(BqsStatus::InnerError);
        }

        if let Some(s) = self.arena.find(src)
            && let Some(d) = self.arena.find(dst)
        {
            if domain.has_edge(s, d) {
                debug!(src = %src, dst = %dst, "relation already bound");
                self.resubscribe(index, s, Role::Source);
                self.resubscribe(index, d, Role::Destination);
                return Ok(());
            }
            if domain.has_abnormal_edge(s, d) {
                debug!(src = %src, dst = %dst, "relation already bound but abnormal");
                return Ok(());
            }
        }

        let s = self.arena.intern(src);
        let d = self.arena.intern(dst);
        let result = self
            .check_bind(index, s, d)
            .and_then(|()| self.attach_edge(index, s, d));
        match result {
            Ok(()) => {
                info!(src = %src, dst = %dst, index, "bind relation");
                Ok(())
            }
            Err(status) => {
                self.collect(s);
                self.collect(d);
                warn!(src = %src, dst = %dst, index, result = ?status, "bind rejected");
                Err(status)
            }
        }
    }

    /// Remove the edge `src -> dst`; a missing edge succeeds
    pub fn unbind(&mut self, src: &EntityInfo, dst: &EntityInfo, index: usize) -> StatusResult {
        self.check_index(index)?;
        let (Some(s), Some(d)) = (self.arena.find(src), self.arena.find(dst)) else {
            debug!(src = %src, dst = %dst, "relation not found, nothing to unbind");
            return Ok(());
        };
        if self.unbind_ids(index, s, d) {
            info!(src = %src, dst = %dst, index, "unbind relation");
        } else {
            debug!(src = %src, dst = %dst, "relation not found, nothing to unbind");
        }
        Ok(())
    }

    /// Remove every edge leaving `src`, returning how many were removed
    pub fn unbind_by_src(&mut self, src: &EntityInfo, index: usize) -> StatusResult<usize> {
        self.check_index(index)?;
        let Some(s) = self.arena.find(src) else {
            return Ok(0);
        };
        let domain = &self.domains[index];
        let dsts: Vec<EntityId> = domain
            .src_to_dst
            .get(&s)
            .into_iter()
            .chain(domain.abnormal_src_to_dst.get(&s))
            .flatten()
            .copied()
            .collect();

        let removed = dsts
            .into_iter()
            .filter(|d| self.unbind_ids(index, s, *d))
            .count();
        info!(src = %src, index, removed, "unbind by source");
        Ok(removed)
    }

    /// Remove every edge entering `dst`, returning how many were removed
    pub fn unbind_by_dst(&mut self, dst: &EntityInfo, index: usize) -> StatusResult<usize> {
        self.check_index(index)?;
        let Some(d) = self.arena.find(dst) else {
            return Ok(0);
        };
        let domain = &self.domains[index];
        let srcs: Vec<EntityId> = domain
            .dst_to_src
            .get(&d)
            .into_iter()
            .chain(domain.abnormal_dst_to_src.get(&d))
            .flatten()
            .copied()
            .collect();

        let removed = srcs
            .into_iter()
            .filter(|s| self.unbind_ids(index, *s, d))
            .count();
        info!(dst = %dst, index, removed, "unbind by destination");
        Ok(removed)
    }

    fn unbind_ids(&mut self, index: usize, s: EntityId, d: EntityId) -> bool {
        let domain = &mut self.domains[index];
        let removed = if domain.unlink(s, d) {
            domain.order_dirty = true;
            true
        } else {
            domain.unlink_abnormal(s, d)
        };
        if removed {
            self.release_if_idle(index, s, Role::Source);
            self.release_if_idle(index, d, Role::Destination);
            self.collect(s);
            self.collect(d);
        }
        removed
    }

    fn check_bind(&self, index: usize, s: EntityId, d: EntityId) -> StatusResult {
        let domain = &self.domains[index];
        if domain.dst_to_src.contains_key(&d) || domain.abnormal_dst_to_src.contains_key(&d) {
            debug!(%d, "destination already bound to another source");
            return Err(BqsStatus::QueueIdError);
        }
        if domain.reaches(d, s) {
            debug!(%s, %d, "bind would close a loop");
            return Err(BqsStatus::DynamicScheduleError);
        }
        self.check_group_membership(s, d)?;
        self.check_group_conflict(index, s, Role::Source)?;
        self.check_group_conflict(index, d, Role::Destination)
    }

    /// Reject an edge between a group and one of its own members
    pub(crate) fn check_group_membership(&self, s: EntityId, d: EntityId) -> StatusResult {
        for (group, member) in [(s, d), (d, s)] {
            let Some(entity) = self.arena.get(group).filter(|e| e.is_group()) else {
                continue;
            };
            let group_id = entity.group_id();
            if self
                .groups
                .get(&group_id)
                .is_some_and(|members| members.contains(&member))
            {
                debug!(group_id, %member, "edge between a group and its own member");
                return Err(BqsStatus::EntityExist);
            }
        }
        Ok(())
    }

    /// Reject endpoints already materialized by a different owner
    pub(crate) fn check_group_conflict(&self, index: usize, id: EntityId, role: Role) -> StatusResult {
        let entity = self.arena.get(id).ok_or(BqsStatus::InnerError)?;
        if !entity.is_group() {
            return self.check_host(index, id, role, None);
        }
        let group_id = entity.group_id();
        let members = self
            .groups
            .get(&group_id)
            .ok_or(BqsStatus::GroupNotExist)?;
        members
            .iter()
            .try_for_each(|member| self.check_host(index, *member, role, Some(group_id)))
    }

    fn check_host(&self, index: usize, id: EntityId, role: Role, host: Option<i32>) -> StatusResult {
        match self.domains[index].materialized.get(&(id, role)) {
            Some(existing) if existing.host_group != host => {
                debug!(%id, ?role, existing = ?existing.host_group, requested = ?host, "entity owned elsewhere");
                Err(BqsStatus::EntityExist)
            }
            _ => Ok(()),
        }
    }

    /// Materialize both endpoints and insert the live edge
    pub(crate) fn attach_edge(&mut self, index: usize, s: EntityId, d: EntityId) -> StatusResult {
        self.materialize(index, s, Role::Source)?;
        if let Err(status) = self.materialize(index, d, Role::Destination) {
            self.release_if_idle(index, s, Role::Source);
            return Err(status);
        }
        let domain = &mut self.domains[index];
        domain.link(s, d);
        domain.order_dirty = true;
        Ok(())
    }

    // ========================================================================
    // Materialization
    // ========================================================================

    fn materialize(&mut self, index: usize, id: EntityId, role: Role) -> StatusResult {
        if self.domains[index].materialized.contains_key(&(id, role)) {
            return Ok(());
        }
        let entity = self.arena.get(id).ok_or(BqsStatus::InnerError)?;
        let Some(group_id) = entity.is_group().then(|| entity.group_id()) else {
            return self.create_entity(index, id, role, None);
        };
        let members = self
            .groups
            .get(&group_id)
            .cloned()
            .ok_or(BqsStatus::GroupNotExist)?;
        let mut created = Vec::with_capacity(members.len());
        for member in members {
            if self.domains[index].materialized.contains_key(&(member, role)) {
                continue;
            }
            if let Err(status) = self.create_entity(index, member, role, Some(group_id)) {
                for member in created {
                    self.destroy_entity(index, member, role);
                }
                return Err(status);
            }
            created.push(member);
        }
        self.domains[index]
            .materialized
            .insert((id, role), Materialized { host_group: None });
        self.group_res_index.insert(group_id, index);
        Ok(())
    }

    fn create_entity(&mut self, index: usize, id: EntityId, role: Role, host_group: Option<i32>) -> StatusResult {
        let entity = self.arena.get(id).ok_or(BqsStatus::InnerError)?;
        if entity.is_queue() {
            self.device
                .subscribe(entity.device_id, entity.id, role.event())
                .map_err(|status| {
                    warn!(entity = %entity, ?role, result = ?status, "subscribe failed");
                    BqsStatus::DriverError
                })?;
        }
        self.domains[index]
            .materialized
            .insert((id, role), Materialized { host_group });
        Ok(())
    }

    fn destroy_entity(&mut self, index: usize, id: EntityId, role: Role) {
        if self.domains[index].materialized.remove(&(id, role)).is_none() {
            return;
        }
        if let Some(entity) = self.arena.get(id)
            && entity.is_queue()
            && let Err(status) = self
                .device
                .unsubscribe(entity.device_id, entity.id, role.event())
        {
            warn!(entity = %entity, ?role, result = ?status, "unsubscribe failed");
        }
    }

    fn resubscribe(&self, index: usize, id: EntityId, role: Role) {
        if !self.domains[index].materialized.contains_key(&(id, role)) {
            return;
        }
        for target in self.queue_targets(id) {
            if let Err(status) = self.device.subscribe(target.device_id, target.id, role.event()) {
                warn!(entity = %target, ?role, result = ?status, "resubscribe failed");
            }
        }
    }

    /// Release the device-level entity once `id` has no edge left in `role`
    pub(crate) fn release_if_idle(&mut self, index: usize, id: EntityId, role: Role) {
        if self.domains[index].is_incident(id, role) {
            return;
        }
        if !self.domains[index].materialized.contains_key(&(id, role)) {
            return;
        }
        let group_id = self
            .arena
            .get(id)
            .filter(|entity| entity.is_group())
            .map(EntityInfo::group_id);
        match group_id {
            Some(group_id) => {
                let members = self.groups.get(&group_id).cloned().unwrap_or_default();
                for member in members {
                    let owned = self.domains[index]
                        .materialized
                        .get(&(member, role))
                        .is_some_and(|m| m.host_group == Some(group_id));
                    if owned {
                        self.destroy_entity(index, member, role);
                    }
                }
                self.domains[index].materialized.remove(&(id, role));
            }
            None => self.destroy_entity(index, id, role),
        }
    }

    /// Drop an arena entry nothing refers to anymore
    pub(crate) fn collect(&mut self, id: EntityId) {
        let referenced = self.domains.iter().any(|domain| domain.references(id))
            || self.groups.values().any(|members| members.contains(&id));
        if !referenced {
            self.arena.remove(id);
        }
    }

    /// Queues behind an endpoint: itself, or the queue members of a group
    pub(crate) fn queue_targets(&self, id: EntityId) -> Vec<&EntityInfo> {
        let Some(entity) = self.arena.get(id) else {
            return Vec::new();
        };
        if entity.is_group() {
            self.groups
                .get(&entity.group_id())
                .into_iter()
                .flatten()
                .filter_map(|member| self.arena.get(*member))
                .filter(|member| member.is_queue())
                .collect()
        } else if entity.is_queue() {
            vec![entity]
        } else {
            Vec::new()
        }
    }

    // ========================================================================
    // Ordering
    // ========================================================================

    /// Recompute the topological order of domain `index`
    ///
    /// Heads are vertices nobody binds to, sorted by key. Vertices caught in
    /// a loop are appended in key order and `has_loop` is set. The order
    /// covers every vertex; `ordered_dsts` and `source_heads` split it.
    pub fn order(&mut self, index: usize) {
        let arena = &self.arena;
        let Some(domain) = self.domains.get_mut(index) else {
            debug!(index, "order requested for unknown domain");
            return;
        };
        let key_of = |id: &EntityId| arena.get(*id).map(EntityInfo::key);

        let mut in_degree: BTreeMap<EntityId, usize> = BTreeMap::new();
        for (src, dsts) in &domain.src_to_dst {
            in_degree.entry(*src).or_insert(0);
            for dst in dsts {
                *in_degree.entry(*dst).or_insert(0) += 1;
            }
        }

        let mut heads: Vec<EntityId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        heads.sort_by_key(key_of);

        let mut queue: VecDeque<EntityId> = heads.into();
        let mut ordered = Vec::with_capacity(in_degree.len());
        while let Some(id) = queue.pop_front() {
            ordered.push(id);
            let mut ready = Vec::new();
            for dst in domain.src_to_dst.get(&id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dst) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(*dst);
                    }
                }
            }
            ready.sort_by_key(key_of);
            queue.extend(ready);
        }

        domain.has_loop = ordered.len() < in_degree.len();
        if domain.has_loop {
            let placed: HashSet<EntityId> = ordered.iter().copied().collect();
            let mut rest: Vec<EntityId> = in_degree
                .keys()
                .filter(|id| !placed.contains(id))
                .copied()
                .collect();
            rest.sort_by_key(key_of);
            warn!(index, looped = rest.len(), "loop detected in bind relation");
            ordered.extend(rest);
        }

        domain.ordered = ordered;
        domain.order_dirty = false;
        domain.refresh_stats(arena);
        debug!(
            index,
            vertices = domain.ordered.len(),
            binds = domain.stats.bind_num,
            "bind relation ordered"
        );
    }

    /// Cached order of domain `index`
    pub fn ordered(&self, index: usize) -> Vec<&EntityInfo> {
        self.domains
            .get(index)
            .map(|domain| {
                domain
                    .ordered
                    .iter()
                    .filter_map(|id| self.arena.get(*id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Destination vertices of domain `index` in cached order
    ///
    /// Subset of `ordered` holding only vertices with a live inbound edge.
    pub fn ordered_dsts(&self, index: usize) -> Vec<&EntityInfo> {
        self.ordered_where(index, true)
    }

    /// Source heads of domain `index`: vertices nothing binds to
    pub fn source_heads(&self, index: usize) -> Vec<&EntityInfo> {
        self.ordered_where(index, false)
    }

    fn ordered_where(&self, index: usize, bound: bool) -> Vec<&EntityInfo> {
        let Some(domain) = self.domains.get(index) else {
            return Vec::new();
        };
        domain
            .ordered
            .iter()
            .filter(|id| domain.dst_to_src.contains_key(*id) == bound)
            .filter_map(|id| self.arena.get(*id))
            .collect()
    }

    #[inline]
    pub fn has_loop(&self, index: usize) -> bool {
        self.domains.get(index).is_some_and(|d| d.has_loop)
    }

    /// Whether a mutation happened since the last `order`
    #[inline]
    pub fn is_order_dirty(&self, index: usize) -> bool {
        self.domains.get(index).is_some_and(|d| d.order_dirty)
    }

    /// Counters as of the last `order`
    #[inline]
    pub fn stats(&self, index: usize) -> RelationStats {
        self.domains
            .get(index)
            .map(|d| d.stats)
            .unwrap_or_default()
    }

    // ========================================================================
    // Schedule config keys
    // ========================================================================

    /// Clear every queue, in order, whose schedule key is in `keys`
    pub fn clear_input_queue(&mut self, keys: &HashSet<u32>, index: usize) -> StatusResult {
        self.check_index(index)?;
        if self.domains[index].order_dirty {
            self.order(index);
        }

        let mut result = Ok(());
        for id in &self.domains[index].ordered {
            let matches = self
                .arena
                .get(*id)
                .is_some_and(|e| keys.contains(&e.sched_cfg_key));
            if !matches {
                continue;
            }
            for queue in self.queue_targets(*id) {
                if let Err(status) = self.device.clear_queue(queue.device_id, queue.id) {
                    warn!(queue = %queue, result = ?status, "clear input queue failed");
                    result = Err(status);
                }
            }
        }
        result
    }

    /// Count destination queues with a matching key that still hold buffers
    pub fn make_sure_output_completion(&self, keys: &HashSet<u32>, index: usize) -> StatusResult<usize> {
        self.check_index(index)?;
        let mut pending = 0;
        for id in self.domains[index].dst_to_src.keys() {
            let matches = self
                .arena
                .get(*id)
                .is_some_and(|e| keys.contains(&e.sched_cfg_key));
            if !matches {
                continue;
            }
            for queue in self.queue_targets(*id) {
                if self.device.queue_len(queue.device_id, queue.id)? > 0 {
                    pending += 1;
                }
            }
        }
        Ok(pending)
    }

    /// Whether every comm-channel endpoint of domain `index` is connected
    pub fn link_status(&self, index: usize) -> StatusResult<bool> {
        self.check_index(index)?;
        let connected = self.domains[index]
            .vertices()
            .into_iter()
            .filter_map(|id| self.arena.get(id))
            .filter_map(|entity| entity.channel)
            .all(|channel| self.device.channel_connected(channel.handle, channel.local_tag_id));
        Ok(connected)
    }

    // ========================================================================
    // Read-only views
    // ========================================================================

    #[inline]
    pub fn entity(&self, id: EntityId) -> Option<&EntityInfo> {
        self.arena.get(id)
    }

    #[inline]
    pub fn find(&self, entity: &EntityInfo) -> Option<EntityId> {
        self.arena.find(entity)
    }

    /// Number of interned entities
    #[inline]
    pub fn entity_count(&self) -> usize {
        self.arena.len()
    }

    pub fn has_edge(&self, src: &EntityInfo, dst: &EntityInfo, index: usize) -> bool {
        self.edge_ids(src, dst)
            .zip(self.domains.get(index))
            .is_some_and(|((s, d), domain)| domain.has_edge(s, d))
    }

    pub fn has_abnormal_edge(&self, src: &EntityInfo, dst: &EntityInfo, index: usize) -> bool {
        self.edge_ids(src, dst)
            .zip(self.domains.get(index))
            .is_some_and(|((s, d), domain)| domain.has_abnormal_edge(s, d))
    }

    fn edge_ids(&self, src: &EntityInfo, dst: &EntityInfo) -> Option<(EntityId, EntityId)> {
        Some((self.arena.find(src)?, self.arena.find(dst)?))
    }

    /// Live destinations of `src`, sorted by key
    pub fn dsts_of(&self, src: &EntityInfo, index: usize) -> Vec<&EntityInfo> {
        self.neighbours(src, index, |d| &d.src_to_dst)
    }

    /// Live sources of `dst`
    pub fn srcs_of(&self, dst: &EntityInfo, index: usize) -> Vec<&EntityInfo> {
        self.neighbours(dst, index, |d| &d.dst_to_src)
    }

    pub fn abnormal_dsts_of(&self, src: &EntityInfo, index: usize) -> Vec<&EntityInfo> {
        self.neighbours(src, index, |d| &d.abnormal_src_to_dst)
    }

    pub fn abnormal_srcs_of(&self, dst: &EntityInfo, index: usize) -> Vec<&EntityInfo> {
        self.neighbours(dst, index, |d| &d.abnormal_dst_to_src)
    }

    fn neighbours<'a>(
        &'a self,
        entity: &EntityInfo,
        index: usize,
        map: impl Fn(&'a Domain) -> &'a crate::domain::Adjacency,
    ) -> Vec<&'a EntityInfo> {
        let (Some(id), Some(domain)) = (self.arena.find(entity), self.domains.get(index)) else {
            return Vec::new();
        };
        let mut found: Vec<&EntityInfo> = map(domain)
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|other| self.arena.get(*other))
            .collect();
        found.sort_by_key(|e| e.key());
        found
    }

    /// Every live edge of domain `index`, sorted by (src, dst) key
    pub fn edges(&self, index: usize) -> Vec<(&EntityInfo, &EntityInfo)> {
        self.collect_edges(index, |d| &d.src_to_dst)
    }

    /// Every abnormal edge of domain `index`
    pub fn abnormal_edges(&self, index: usize) -> Vec<(&EntityInfo, &EntityInfo)> {
        self.collect_edges(index, |d| &d.abnormal_src_to_dst)
    }

    fn collect_edges<'a>(
        &'a self,
        index: usize,
        map: impl Fn(&'a Domain) -> &'a crate::domain::Adjacency,
    ) -> Vec<(&'a EntityInfo, &'a EntityInfo)> {
        let Some(domain) = self.domains.get(index) else {
            return Vec::new();
        };
        let mut edges: Vec<(&EntityInfo, &EntityInfo)> = map(domain)
            .iter()
            .flat_map(|(src, dsts)| dsts.iter().map(move |dst| (*src, *dst)))
            .filter_map(|(s, d)| Some((self.arena.get(s)?, self.arena.get(d)?)))
            .collect();
        edges.sort_by_key(|(s, d)| (s.key(), d.key()));
        edges
    }

    /// Live edge count of domain `index`
    #[inline]
    pub fn count_binds(&self, index: usize) -> usize {
        self.domains.get(index).map_or(0, Domain::edge_count)
    }

    #[inline]
    pub fn count_abnormal_binds(&self, index: usize) -> usize {
        self.domains.get(index).map_or(0, Domain::abnormal_edge_count)
    }

    /// Domain in which `src` has live destinations
    pub fn bind_index_by_src(&self, src: &EntityInfo) -> Option<usize> {
        let id = self.arena.find(src)?;
        self.domains
            .iter()
            .position(|domain| domain.src_to_dst.contains_key(&id))
    }

    /// Whether `entity` holds a device-level registration in `role`
    pub fn is_materialized(&self, entity: &EntityInfo, role: Role, index: usize) -> bool {
        self.materialized_host(entity, role, index).is_some()
    }

    /// Group that materialized `entity`, `Some(None)` for standalone entities
    pub fn materialized_host(&self, entity: &EntityInfo, role: Role, index: usize) -> Option<Option<i32>> {
        let id = self.arena.find(entity)?;
        self.domains
            .get(index)?
            .materialized
            .get(&(id, role))
            .map(|m| m.host_group)
    }

    /// Mirror and disjointness invariants across every domain
    pub fn is_consistent(&self) -> bool {
        self.domains.iter().all(Domain::is_consistent)
    }

    /// Insert a live edge without any checks or materialization
    #[cfg(test)]
    pub(crate) fn insert_edge_unchecked(&mut self, src: &EntityInfo, dst: &EntityInfo, index: usize) {
        let s = self.arena.intern(src);
        let d = self.arena.intern(dst);
        let domain = &mut self.domains[index];
        domain.link(s, d);
        domain.order_dirty = true;
    }
}

#[cfg(test)]
#[path = "relation_test.rs"]
mod tests;
