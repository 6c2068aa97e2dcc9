//! Comm-channel registry
//!
//! Tag endpoints are identified on the wire by their full channel attributes
//! (handle, tags, ranks, depths). The graph needs a compact numeric id per
//! channel, so the manager hands out one id per distinct channel and keeps
//! the mapping until the channel is deleted.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use bqs_routing::ChannelInfo;

/// First id handed out; ids are never reused while the manager lives
const FIRST_CHANNEL_ID: u32 = 1;

#[derive(Debug)]
pub struct CommChannelManager {
    ids: HashMap<ChannelInfo, u32>,
    channels: BTreeMap<u32, ChannelInfo>,
    next_id: u32,
}

impl Default for CommChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CommChannelManager {
    pub fn new() -> Self {
        Self {
            ids: HashMap::new(),
            channels: BTreeMap::new(),
            next_id: FIRST_CHANNEL_ID,
        }
    }

    /// Id of `channel`, registering it on first sight
    pub fn channel_id(&mut self, channel: &ChannelInfo) -> u32 {
        if let Some(id) = self.ids.get(channel) {
            return *id;
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(FIRST_CHANNEL_ID);
        self.ids.insert(*channel, id);
        self.channels.insert(id, *channel);
        debug!(
            id,
            handle = channel.handle,
            local_tag = channel.local_tag_id,
            peer_rank = channel.peer_rank_id,
            "registered comm channel"
        );
        id
    }

    /// Id of an already registered channel
    #[inline]
    pub fn lookup(&self, channel: &ChannelInfo) -> Option<u32> {
        self.ids.get(channel).copied()
    }

    #[inline]
    pub fn get(&self, id: u32) -> Option<&ChannelInfo> {
        self.channels.get(&id)
    }

    /// Forget a channel, returning whether it was registered
    pub fn delete(&mut self, channel: &ChannelInfo) -> bool {
        let Some(id) = self.ids.remove(channel) else {
            return false;
        };
        self.channels.remove(&id);
        info!(id, handle = channel.handle, "deleted comm channel");
        true
    }

    /// Forget every channel opened on `handle`, returning how many went
    pub fn delete_by_handle(&mut self, handle: u64) -> usize {
        let doomed: Vec<ChannelInfo> = self
            .channels
            .values()
            .filter(|c| c.handle == handle)
            .copied()
            .collect();
        doomed.iter().filter(|c| self.delete(c)).count()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
#[path = "comm_channel_test.rs"]
mod tests;
