//! Endpoint and entity conversion
//!
//! Configuration commands describe endpoints in their wire form; the graph
//! works on `EntityInfo`. Conversion resolves the owning device from the
//! resource id, registers comm channels to obtain their tag id and carries
//! the scheduling metadata over.

use tracing::{debug, warn};

use bqs_protocol::config::{ChannelAttr, Endpoint, EndpointAttr, EndpointType};
use bqs_protocol::{BqsStatus, StatusResult};
use bqs_routing::{ChannelInfo, EntityInfo, EntityType, GroupPolicy, QueueType};

use crate::context::SchedulerContext;

/// Resource id bit marking the device bits as valid
pub const RESOURCE_ID_ENABLE_BIT_MASK: u16 = 0x8000;

/// Device bits of a resource id
pub const RESOURCE_ID_DEVICE_MASK: u16 = 0x3FFF;

/// Resource id bit set for host-side memory queues
pub const RESOURCE_ID_HOST_BIT: u16 = 14;

/// Deepest tag a comm channel may declare
pub const MAX_TAG_DEPTH: u32 = 8 * 1024;

/// Endpoint status reported for queried endpoints
pub const ENDPOINT_STATUS_AVAILABLE: u8 = 1;

/// Oldest client version allowed to route memory queues
pub const MEM_QUEUE_MIN_VERSION: u32 = 1;

/// Client version from which instance counts are carried
pub const INSTANCE_INFO_MIN_VERSION: u32 = 2;

/// Device named by a resource id, if its enable bit is set
#[inline]
pub fn res_device_id(res_id: u16) -> Option<u32> {
    (res_id & RESOURCE_ID_ENABLE_BIT_MASK != 0).then(|| u32::from(res_id & RESOURCE_ID_DEVICE_MASK))
}

/// Whether a resource id marks a host-side queue
#[inline]
pub fn is_host_res(res_id: u16) -> bool {
    (res_id >> RESOURCE_ID_HOST_BIT) & 1 != 0
}

/// Validate comm channel attributes
///
/// Tags must match and ranks must differ; depths are only checked when the
/// channel is about to be routed, not when it is used as a query key.
pub fn check_comm_channel_attr(attr: &ChannelAttr, for_query: bool) -> StatusResult {
    if attr.local_tag_id != attr.peer_tag_id {
        warn!(
            local_tag = attr.local_tag_id,
            peer_tag = attr.peer_tag_id,
            "local and peer tag ids differ"
        );
        return Err(BqsStatus::ParamInvalid);
    }
    if attr.local_rank_id == attr.peer_rank_id {
        warn!(rank = attr.local_rank_id, "local and peer rank ids are equal");
        return Err(BqsStatus::ParamInvalid);
    }
    if for_query {
        return Ok(());
    }
    for (side, depth) in [("local", attr.local_tag_depth), ("peer", attr.peer_tag_depth)] {
        if depth == 0 || depth > MAX_TAG_DEPTH {
            warn!(side, depth, max = MAX_TAG_DEPTH, "tag depth out of range");
            return Err(BqsStatus::ParamInvalid);
        }
    }
    Ok(())
}

fn channel_info(attr: &ChannelAttr) -> ChannelInfo {
    ChannelInfo {
        handle: attr.handle,
        local_tag_id: attr.local_tag_id,
        peer_tag_id: attr.peer_tag_id,
        local_rank_id: attr.local_rank_id,
        peer_rank_id: attr.peer_rank_id,
        local_tag_depth: attr.local_tag_depth,
        peer_tag_depth: attr.peer_tag_depth,
    }
}

/// Build the graph entity for a wire endpoint
pub fn create_entity_info(
    ctx: &mut SchedulerContext,
    endpoint: &Endpoint,
    client_version: u32,
    for_query: bool,
) -> StatusResult<EntityInfo> {
    let mut device_id = ctx.device_id();
    if ctx.is_numa()
        && let Some(device) = res_device_id(endpoint.res_id)
    {
        device_id = device;
    }

    let mut entity = match (endpoint.ty, endpoint.attr) {
        (EndpointType::Queue, EndpointAttr::Queue { queue_id, queue_type }) => {
            EntityInfo::queue(queue_id, device_id).with_queue_type(QueueType::from_code(queue_type))
        }
        (EndpointType::MemQueue, EndpointAttr::Queue { queue_id, queue_type }) => {
            if client_version < MEM_QUEUE_MIN_VERSION {
                warn!(queue_id, client_version, "memory queue endpoints need a newer client");
                return Err(BqsStatus::EndpointMemTypeNotSupport);
            }
            let owner = res_device_id(endpoint.res_id).unwrap_or(ctx.device_id());
            EntityInfo::queue(queue_id, owner)
                .with_queue_type(QueueType::from_code(queue_type))
                .with_mem_queue(true)
                .with_host(is_host_res(endpoint.res_id))
        }
        (EndpointType::CommChannel, EndpointAttr::CommChannel(attr)) => {
            check_comm_channel_attr(&attr, for_query)?;
            let channel = channel_info(&attr);
            let tag_id = ctx.channels.channel_id(&channel);
            EntityInfo::tag(tag_id, device_id, channel)
        }
        (EndpointType::Group, EndpointAttr::Group { group_id, policy }) => {
            EntityInfo::group(group_id, device_id).with_group_policy(GroupPolicy::from_code(policy))
        }
        (ty, attr) => {
            debug!(?ty, ?attr, "endpoint attributes do not match its type");
            return Err(BqsStatus::ParamInvalid);
        }
    };

    entity.sched_cfg_key = endpoint.root_model_id;
    entity.global_id = endpoint.global_id;
    entity.uuid = u64::from(endpoint.model_id);
    if client_version >= INSTANCE_INFO_MIN_VERSION {
        entity = entity.with_instances(endpoint.peer_num, endpoint.local_id);
    }
    debug!(entity = %entity, "created entity from endpoint");
    Ok(entity)
}

/// Wire form of a graph entity
///
/// `prefer_mem_queue` keeps the memory-queue type for queues when the
/// caller's endpoint used it.
pub fn entity_to_endpoint(entity: &EntityInfo, prefer_mem_queue: bool) -> StatusResult<Endpoint> {
    let mut endpoint = match entity.ty {
        EntityType::Queue => {
            let base = if prefer_mem_queue || entity.mem_queue {
                Endpoint::mem_queue(entity.id)
            } else {
                Endpoint::queue(entity.id)
            };
            Endpoint {
                attr: EndpointAttr::Queue {
                    queue_id: entity.id,
                    queue_type: entity.queue_type.code(),
                },
                ..base
            }
        }
        EntityType::Group => Endpoint {
            attr: EndpointAttr::Group {
                group_id: entity.group_id(),
                policy: entity.group_policy.code(),
            },
            ..Endpoint::group(entity.group_id())
        },
        EntityType::Tag => {
            let channel = entity.channel.unwrap_or_default();
            Endpoint::channel(ChannelAttr {
                handle: channel.handle,
                local_tag_id: channel.local_tag_id,
                peer_tag_id: channel.peer_tag_id,
                local_rank_id: channel.local_rank_id,
                peer_rank_id: channel.peer_rank_id,
                local_tag_depth: channel.local_tag_depth,
                peer_tag_depth: channel.peer_tag_depth,
            })
        }
        EntityType::Invalid => {
            warn!(entity = %entity, "cannot convert invalid entity");
            return Err(BqsStatus::ParamInvalid);
        }
    };
    endpoint.status = ENDPOINT_STATUS_AVAILABLE;
    endpoint.global_id = entity.global_id;
    endpoint.root_model_id = entity.sched_cfg_key;
    endpoint.model_id = entity.uuid as u32;
    endpoint.peer_num = entity.peer_instance_num;
    endpoint.local_id = entity.local_instance_index;
    Ok(endpoint)
}

#[cfg(test)]
#[path = "convert_test.rs"]
mod tests;
