//! Routable endpoints
//!
//! `EntityInfo` describes one vertex of the routing graph. Identity is the
//! `EntityKey` (id, type, queue type, device id): two values with the same
//! key are the same vertex even if the rest of their metadata differs.

use std::fmt;
use std::hash::{Hash, Hasher};

/// Endpoint kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    /// Buffer queue (plain or memory queue)
    Queue,
    /// Communication-channel tag
    Tag,
    /// Group of endpoints
    Group,
    Invalid,
}

impl EntityType {
    /// Decode the numeric type used in relation events
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => Self::Queue,
            1 => Self::Tag,
            2 => Self::Group,
            _ => Self::Invalid,
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Self::Queue => 0,
            Self::Tag => 1,
            Self::Group => 2,
            Self::Invalid => 0xffff,
        }
    }
}

/// Where a queue lives relative to the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum QueueType {
    #[default]
    Local,
    Client,
}

impl QueueType {
    pub fn from_code(code: u8) -> Self {
        if code == 1 { Self::Client } else { Self::Local }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Local => 0,
            Self::Client => 1,
        }
    }
}

/// Fan-out policy of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupPolicy {
    #[default]
    Hash,
    Broadcast,
}

impl GroupPolicy {
    pub fn from_code(code: u8) -> Self {
        if code == 1 {
            Self::Broadcast
        } else {
            Self::Hash
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Hash => 0,
            Self::Broadcast => 1,
        }
    }
}

/// Vertex identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub device_id: u32,
    pub ty: EntityType,
    pub id: u32,
    pub queue_type: QueueType,
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}@dev{}", self.ty, self.id, self.device_id)
    }
}

/// Comm-channel metadata carried by tag entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChannelInfo {
    pub handle: u64,
    pub local_tag_id: u32,
    pub peer_tag_id: u32,
    pub local_rank_id: u32,
    pub peer_rank_id: u32,
    pub local_tag_depth: u32,
    pub peer_tag_depth: u32,
}

/// A routable endpoint
#[derive(Debug, Clone)]
pub struct EntityInfo {
    pub id: u32,
    pub device_id: u32,
    pub ty: EntityType,
    pub queue_type: QueueType,
    pub group_policy: GroupPolicy,
    pub peer_instance_num: u16,
    pub local_instance_index: u16,
    pub global_id: u32,
    pub uuid: u64,
    pub sched_cfg_key: u32,
    pub is_host: bool,
    pub mem_queue: bool,
    pub channel: Option<ChannelInfo>,
    pub desc: String,
}

impl EntityInfo {
    /// Create an endpoint with default metadata
    pub fn new(id: u32, device_id: u32, ty: EntityType) -> Self {
        Self {
            id,
            device_id,
            ty,
            queue_type: QueueType::Local,
            group_policy: GroupPolicy::Hash,
            peer_instance_num: 0,
            local_instance_index: 0,
            global_id: 0,
            uuid: 0,
            sched_cfg_key: 0,
            is_host: false,
            mem_queue: false,
            channel: None,
            desc: String::new(),
        }
    }

    /// Plain local queue
    #[inline]
    pub fn queue(id: u32, device_id: u32) -> Self {
        Self::new(id, device_id, EntityType::Queue)
    }

    /// Group vertex
    #[inline]
    pub fn group(group_id: i32, device_id: u32) -> Self {
        Self::new(group_id as u32, device_id, EntityType::Group)
    }

    /// Comm-channel tag vertex
    pub fn tag(id: u32, device_id: u32, channel: ChannelInfo) -> Self {
        Self {
            channel: Some(channel),
            ..Self::new(id, device_id, EntityType::Tag)
        }
    }

    pub fn with_queue_type(mut self, queue_type: QueueType) -> Self {
        self.queue_type = queue_type;
        self
    }

    pub fn with_group_policy(mut self, policy: GroupPolicy) -> Self {
        self.group_policy = policy;
        self
    }

    pub fn with_sched_cfg_key(mut self, key: u32) -> Self {
        self.sched_cfg_key = key;
        self
    }

    pub fn with_global_id(mut self, global_id: u32) -> Self {
        self.global_id = global_id;
        self
    }

    pub fn with_instances(mut self, peer_num: u16, local_index: u16) -> Self {
        self.peer_instance_num = peer_num;
        self.local_instance_index = local_index;
        self
    }

    pub fn with_host(mut self, is_host: bool) -> Self {
        self.is_host = is_host;
        self
    }

    pub fn with_mem_queue(mut self, mem_queue: bool) -> Self {
        self.mem_queue = mem_queue;
        self
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    #[inline]
    pub fn key(&self) -> EntityKey {
        EntityKey {
            device_id: self.device_id,
            ty: self.ty,
            id: self.id,
            queue_type: self.queue_type,
        }
    }

    #[inline]
    pub fn is_group(&self) -> bool {
        self.ty == EntityType::Group
    }

    #[inline]
    pub fn is_queue(&self) -> bool {
        self.ty == EntityType::Queue
    }

    #[inline]
    pub fn is_tag(&self) -> bool {
        self.ty == EntityType::Tag
    }

    /// Group id of a group vertex
    #[inline]
    pub fn group_id(&self) -> i32 {
        self.id as i32
    }
}

impl PartialEq for EntityInfo {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for EntityInfo {}

impl Hash for EntityInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for EntityInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())?;
        if self.queue_type == QueueType::Client {
            write!(f, "(client)")?;
        }
        if !self.desc.is_empty() {
            write!(f, "[{}]", self.desc)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "entity_test.rs"]
mod tests;
