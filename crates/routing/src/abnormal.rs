//! Abnormal relation tracking
//!
//! Faulty edges are moved out of the live maps into shadow maps so queries
//! can still report them. Moving an edge does not touch the cached order;
//! restoring one does.
//!
//! The marking calls are driven by the data-plane fault path (peer device or
//! queue unreachable); nothing on the control plane marks edges abnormal.
//! Restoring an edge runs the same loop and group checks as `bind`.

use tracing::{debug, info, warn};

use bqs_protocol::{BqsStatus, StatusResult};

use crate::domain::Role;
use crate::entity::EntityInfo;
use crate::relation::BindRelation;

impl BindRelation {
    /// Queue every live edge leaving `src` to be marked abnormal
    pub fn mark_abnormal_src(&mut self, src: &EntityInfo, index: usize) {
        if let Some(domain) = self.domains.get_mut(index) {
            domain.pending_abnormal_src.push(src.key());
        }
    }

    /// Queue every live edge entering `dst` to be marked abnormal
    pub fn mark_abnormal_dst(&mut self, dst: &EntityInfo, index: usize) {
        if let Some(domain) = self.domains.get_mut(index) {
            domain.pending_abnormal_dst.push(dst.key());
        }
    }

    /// Apply pending abnormal marks, returning how many edges moved
    pub fn update_relation(&mut self, index: usize) -> usize {
        let Some(domain) = self.domains.get_mut(index) else {
            return 0;
        };
        let srcs = std::mem::take(&mut domain.pending_abnormal_src);
        let dsts = std::mem::take(&mut domain.pending_abnormal_dst);

        let mut moved = 0;
        for key in srcs {
            let Some(src) = self.arena.lookup(&key) else {
                continue;
            };
            let targets: Vec<_> = domain
                .src_to_dst
                .get(&src)
                .into_iter()
                .flatten()
                .copied()
                .collect();
            for dst in targets {
                if domain.move_to_abnormal(src, dst) {
                    moved += 1;
                }
            }
        }
        for key in dsts {
            let Some(dst) = self.arena.lookup(&key) else {
                continue;
            };
            let sources: Vec<_> = domain
                .dst_to_src
                .get(&dst)
                .into_iter()
                .flatten()
                .copied()
                .collect();
            for src in sources {
                if domain.move_to_abnormal(src, dst) {
                    moved += 1;
                }
            }
        }
        if moved > 0 {
            info!(index, moved, "relations marked abnormal");
        }
        moved
    }

    /// Record `src -> dst` as abnormal, moving the live edge if there is one
    pub fn append_abnormal_entity(
        &mut self,
        src: &EntityInfo,
        dst: &EntityInfo,
        index: usize,
    ) -> StatusResult {
        if src == dst {
            return Err(BqsStatus::ParamInvalid);
        }
        self.check_index(index)?;
        let s = self.arena.intern(src);
        let d = self.arena.intern(dst);
        let domain = &mut self.domains[index];
        if !domain.move_to_abnormal(s, d) && !domain.has_abnormal_edge(s, d) {
            domain.link_abnormal(s, d);
        }
        debug!(src = %src, dst = %dst, index, "abnormal relation recorded");
        Ok(())
    }

    /// Move an abnormal edge back into the live maps
    ///
    /// Succeeds without change when the edge is not abnormal. The edge is
    /// re-materialized, so the same conflicts as `bind` apply.
    pub fn clear_abnormal(&mut self, src: &EntityInfo, dst: &EntityInfo, index: usize) -> StatusResult {
        self.check_index(index)?;
        let (Some(s), Some(d)) = (self.arena.find(src), self.arena.find(dst)) else {
            return Ok(());
        };
        let domain = &self.domains[index];
        if !domain.has_abnormal_edge(s, d) {
            return Ok(());
        }
        if domain.dst_to_src.contains_key(&d) {
            warn!(src = %src, dst = %dst, "destination rebound while abnormal");
            return Err(BqsStatus::QueueIdError);
        }
        if domain.reaches(d, s) {
            warn!(src = %src, dst = %dst, "restoring relation would close a loop");
            return Err(BqsStatus::DynamicScheduleError);
        }
        self.check_group_membership(s, d)?;
        self.check_group_conflict(index, s, Role::Source)?;
        self.check_group_conflict(index, d, Role::Destination)?;

        self.domains[index].unlink_abnormal(s, d);
        if let Err(status) = self.attach_edge(index, s, d) {
            self.domains[index].link_abnormal(s, d);
            warn!(src = %src, dst = %dst, result = ?status, "abnormal relation restore failed");
            return Err(status);
        }
        info!(src = %src, dst = %dst, index, "abnormal relation restored");
        Ok(())
    }

    /// Pending abnormal marks not yet applied
    pub fn pending_abnormal(&self, index: usize) -> usize {
        self.domains
            .get(index)
            .map_or(0, |d| d.pending_abnormal_src.len() + d.pending_abnormal_dst.len())
    }
}

#[cfg(test)]
#[path = "abnormal_test.rs"]
mod tests;
