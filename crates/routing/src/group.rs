//! Endpoint groups
//!
//! A group is an ordered list of member ids in the entity arena. Group ids
//! come from a process-wide counter; allocation is the one piece of routing
//! state that may be touched outside the graph-owning task, so it sits
//! behind its own lock.

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use bqs_protocol::{BqsStatus, StatusResult};

use crate::entity::{EntityInfo, EntityType};
use crate::relation::BindRelation;

/// Upper bound on members per group
pub const MAX_GROUP_MEMBERS: usize = 1000;

/// Sequential group id source starting at 1
#[derive(Debug)]
pub struct GroupIdAllocator {
    next: Mutex<i32>,
}

impl Default for GroupIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupIdAllocator {
    pub fn new() -> Self {
        Self {
            next: Mutex::new(1),
        }
    }

    /// Take the next id; wraps back to 1 instead of going negative
    pub fn allocate(&self) -> i32 {
        let mut next = self.next.lock();
        let id = *next;
        *next = if id == i32::MAX { 1 } else { id + 1 };
        id
    }
}

impl BindRelation {
    /// Register a group and return its generated id
    pub fn create_group(&mut self, members: &[EntityInfo], index: usize) -> StatusResult<i32> {
        let group_id = self.group_ids.allocate();
        self.create_group_with_id(group_id, members, index)?;
        Ok(group_id)
    }

    /// Register a group under a caller-chosen id
    pub fn create_group_with_id(
        &mut self,
        group_id: i32,
        members: &[EntityInfo],
        index: usize,
    ) -> StatusResult {
        self.check_index(index)?;
        if members.is_empty() || members.len() > MAX_GROUP_MEMBERS {
            warn!(group_id, members = members.len(), "invalid group size");
            return Err(BqsStatus::ParamInvalid);
        }
        if members.iter().any(EntityInfo::is_group) {
            warn!(group_id, "nested groups are not supported");
            return Err(BqsStatus::ParamInvalid);
        }

        let mut seen: HashSet<(u32, bool, u32, EntityType)> = HashSet::with_capacity(members.len());
        for member in members {
            if !seen.insert((member.device_id, member.is_host, member.id, member.ty)) {
                warn!(group_id, member = %member, "duplicate group member");
                return Err(BqsStatus::ParamInvalid);
            }
        }
        if self.groups.contains_key(&group_id) {
            warn!(group_id, "group already exists");
            return Err(BqsStatus::GroupHasExist);
        }

        let ids = members.iter().map(|m| self.arena.intern(m)).collect();
        self.groups.insert(group_id, ids);
        self.group_res_index.insert(group_id, index);
        info!(group_id, members = members.len(), index, "group created");
        Ok(())
    }

    /// Remove a group, returning its former members
    ///
    /// Unknown ids succeed with no members. A group still used by a route in
    /// its domain is refused.
    pub fn delete_group(&mut self, group_id: i32) -> StatusResult<Vec<EntityInfo>> {
        if !self.groups.contains_key(&group_id) {
            debug!(group_id, "group not found, nothing to delete");
            return Ok(Vec::new());
        }
        let index = self.group_res_index.get(&group_id).copied().unwrap_or(0);

        let in_route = self.domains.get(index).is_some_and(|domain| {
            domain
                .vertices()
                .into_iter()
                .filter_map(|id| self.arena.get(id))
                .any(|entity| entity.is_group() && entity.group_id() == group_id)
        });
        if in_route {
            warn!(group_id, index, "group is still referenced by a route");
            return Err(BqsStatus::GroupExistInRoute);
        }

        let members = self.groups.remove(&group_id).unwrap_or_default();
        self.group_res_index.remove(&group_id);
        let removed: Vec<EntityInfo> = members
            .iter()
            .filter_map(|id| self.arena.get(*id).cloned())
            .collect();
        for id in members {
            self.collect(id);
        }
        info!(group_id, members = removed.len(), "group deleted");
        Ok(removed)
    }

    /// Members of a group in insertion order
    pub fn group_members(&self, group_id: i32) -> Option<Vec<&EntityInfo>> {
        self.groups.get(&group_id).map(|members| {
            members
                .iter()
                .filter_map(|id| self.arena.get(*id))
                .collect()
        })
    }

    pub fn group_ids(&self) -> Vec<i32> {
        self.groups.keys().copied().collect()
    }

    #[inline]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Domain that owns a group
    #[inline]
    pub fn group_res_index(&self, group_id: i32) -> Option<usize> {
        self.group_res_index.get(&group_id).copied()
    }

    /// Shared id source, for callers that reserve ids ahead of creation
    pub fn group_id_allocator(&self) -> &std::sync::Arc<GroupIdAllocator> {
        &self.group_ids
    }
}

#[cfg(test)]
#[path = "group_test.rs"]
mod tests;
