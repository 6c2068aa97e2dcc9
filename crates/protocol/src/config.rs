//! Configuration command buffers
//!
//! Configuration events carry a caller-owned buffer that the scheduler reads
//! and then writes results back into, in place. Everything is little-endian
//! with fixed record sizes.
//!
//! # Update layouts
//!
//! ```text
//! BIND_ROUTE / UNBIND_ROUTE   ConfigInfo │ Route × n      │ CfgRet × n
//! ADD_GROUP                   ConfigInfo │ Endpoint × n   │ CfgRet
//! DEL_GROUP / PROFILING / ... ConfigInfo │ CfgRet
//! INIT_DYNAMIC_SCHED          ConfigInfo │ DynamicSched   │ CfgRet
//! STOP / CLEAR_AND_RESTART    ConfigInfo │ u32 × n        │ CfgRet
//! ```
//!
//! # Query layouts
//!
//! ```text
//! QUERY_CONFIG_NUM            ConfigQuery │ CfgRet
//! QUERY_CONFIG (routes)       ConfigQuery │ ConfigInfo │ Route × n    │ CfgRet
//! QUERY_CONFIG (group)        ConfigQuery │ ConfigInfo │ Endpoint × n │ CfgRet
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::Result;
use crate::error::ProtocolError;

pub const ENDPOINT_SIZE: usize = 56;
pub const ROUTE_SIZE: usize = 2 * ENDPOINT_SIZE + 4;
pub const CFG_RET_SIZE: usize = 4;
pub const CONFIG_INFO_SIZE: usize = 16;
pub const CONFIG_QUERY_SIZE: usize = 16 + 2 * ENDPOINT_SIZE;
pub const DYNAMIC_SCHED_SIZE: usize = 16;
pub const HCOM_HANDLE_INFO_SIZE: usize = 24;

const ATTR_SIZE: usize = 32;

/// Offset of `ConfigQuery::count`
const QUERY_COUNT_OFFSET: usize = 8;
/// Offset of `HcomHandleInfo::handle`
const HCOM_HANDLE_OFFSET: usize = 8;

/// Endpoint kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EndpointType {
    Queue = 0,
    MemQueue = 1,
    Group = 2,
    CommChannel = 3,
}

impl TryFrom<u8> for EndpointType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Queue),
            1 => Ok(Self::MemQueue),
            2 => Ok(Self::Group),
            3 => Ok(Self::CommChannel),
            _ => Err(ProtocolError::invalid_value("endpoint type", u32::from(value))),
        }
    }
}

/// Type-specific endpoint attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointAttr {
    Queue {
        queue_id: u32,
        /// 0 = local queue, 1 = client queue
        queue_type: u8,
    },
    Group {
        group_id: i32,
        policy: u8,
    },
    CommChannel(ChannelAttr),
}

/// Communication channel (tag) attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelAttr {
    pub handle: u64,
    pub local_tag_id: u32,
    pub peer_tag_id: u32,
    pub local_rank_id: u32,
    pub peer_rank_id: u32,
    pub local_tag_depth: u32,
    pub peer_tag_depth: u32,
}

/// One routable endpoint as described by a configuration command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub ty: EndpointType,
    pub status: u8,
    /// Resource id: enable bit 0x8000, host bit 14, device in the low bits
    pub res_id: u16,
    pub global_id: u32,
    pub model_id: u32,
    pub root_model_id: u32,
    pub peer_num: u16,
    pub local_id: u16,
    pub attr: EndpointAttr,
}

impl Endpoint {
    /// Plain queue endpoint
    pub fn queue(queue_id: u32) -> Self {
        Self::with_attr(
            EndpointType::Queue,
            EndpointAttr::Queue {
                queue_id,
                queue_type: 0,
            },
        )
    }

    /// Memory queue endpoint
    pub fn mem_queue(queue_id: u32) -> Self {
        Self::with_attr(
            EndpointType::MemQueue,
            EndpointAttr::Queue {
                queue_id,
                queue_type: 0,
            },
        )
    }

    /// Group endpoint
    pub fn group(group_id: i32) -> Self {
        Self::with_attr(
            EndpointType::Group,
            EndpointAttr::Group {
                group_id,
                policy: 0,
            },
        )
    }

    /// Communication channel endpoint
    pub fn channel(attr: ChannelAttr) -> Self {
        Self::with_attr(EndpointType::CommChannel, EndpointAttr::CommChannel(attr))
    }

    fn with_attr(ty: EndpointType, attr: EndpointAttr) -> Self {
        Self {
            ty,
            status: 0,
            res_id: 0,
            global_id: 0,
            model_id: 0,
            root_model_id: 0,
            peer_num: 0,
            local_id: 0,
            attr,
        }
    }

    pub fn with_res_id(mut self, res_id: u16) -> Self {
        self.res_id = res_id;
        self
    }

    pub fn with_root_model(mut self, root_model_id: u32) -> Self {
        self.root_model_id = root_model_id;
        self
    }

    pub fn with_global_id(mut self, global_id: u32) -> Self {
        self.global_id = global_id;
        self
    }

    pub fn put(&self, buf: &mut BytesMut) {
        buf.put_u8(self.ty as u8);
        buf.put_u8(self.status);
        buf.put_u16_le(self.res_id);
        buf.put_u32_le(self.global_id);
        buf.put_u32_le(self.model_id);
        buf.put_u32_le(self.root_model_id);
        buf.put_u16_le(self.peer_num);
        buf.put_u16_le(self.local_id);
        buf.put_u32_le(0);

        let start = buf.len();
        match self.attr {
            EndpointAttr::Queue {
                queue_id,
                queue_type,
            } => {
                buf.put_u32_le(queue_id);
                buf.put_u8(queue_type);
            }
            EndpointAttr::Group { group_id, policy } => {
                buf.put_i32_le(group_id);
                buf.put_u8(policy);
            }
            EndpointAttr::CommChannel(channel) => {
                buf.put_u64_le(channel.handle);
                buf.put_u32_le(channel.local_tag_id);
                buf.put_u32_le(channel.peer_tag_id);
                buf.put_u32_le(channel.local_rank_id);
                buf.put_u32_le(channel.peer_rank_id);
                buf.put_u32_le(channel.local_tag_depth);
                buf.put_u32_le(channel.peer_tag_depth);
            }
        }
        buf.put_bytes(0, ATTR_SIZE - (buf.len() - start));
    }

    pub fn get(buf: &mut &[u8]) -> Result<Self> {
        ensure(buf, ENDPOINT_SIZE)?;
        let ty = EndpointType::try_from(buf.get_u8())?;
        let status = buf.get_u8();
        let res_id = buf.get_u16_le();
        let global_id = buf.get_u32_le();
        let model_id = buf.get_u32_le();
        let root_model_id = buf.get_u32_le();
        let peer_num = buf.get_u16_le();
        let local_id = buf.get_u16_le();
        let _reserved = buf.get_u32_le();

        let mut attr_bytes = &buf[..ATTR_SIZE];
        let attr = match ty {
            EndpointType::Queue | EndpointType::MemQueue => EndpointAttr::Queue {
                queue_id: attr_bytes.get_u32_le(),
                queue_type: attr_bytes.get_u8(),
            },
            EndpointType::Group => EndpointAttr::Group {
                group_id: attr_bytes.get_i32_le(),
                policy: attr_bytes.get_u8(),
            },
            EndpointType::CommChannel => EndpointAttr::CommChannel(ChannelAttr {
                handle: attr_bytes.get_u64_le(),
                local_tag_id: attr_bytes.get_u32_le(),
                peer_tag_id: attr_bytes.get_u32_le(),
                local_rank_id: attr_bytes.get_u32_le(),
                peer_rank_id: attr_bytes.get_u32_le(),
                local_tag_depth: attr_bytes.get_u32_le(),
                peer_tag_depth: attr_bytes.get_u32_le(),
            }),
        };
        buf.advance(ATTR_SIZE);

        Ok(Self {
            ty,
            status,
            res_id,
            global_id,
            model_id,
            root_model_id,
            peer_num,
            local_id,
            attr,
        })
    }
}

/// Source/destination endpoint pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub src: Endpoint,
    pub dst: Endpoint,
    pub status: i32,
}

impl Route {
    pub fn new(src: Endpoint, dst: Endpoint) -> Self {
        Self { src, dst, status: 0 }
    }

    pub fn put(&self, buf: &mut BytesMut) {
        self.src.put(buf);
        self.dst.put(buf);
        buf.put_i32_le(self.status);
    }

    pub fn get(buf: &mut &[u8]) -> Result<Self> {
        let src = Endpoint::get(buf)?;
        let dst = Endpoint::get(buf)?;
        ensure(buf, 4)?;
        let status = buf.get_i32_le();
        Ok(Self { src, dst, status })
    }
}

/// Configuration command kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ConfigCmd {
    BindRoute = 0,
    UnbindRoute = 1,
    AddGroup = 2,
    DelGroup = 3,
    UpdateProfiling = 4,
    UpdateHcclProtocol = 5,
    InitDynamicSched = 6,
    StopSchedule = 7,
    ClearAndRestartSchedule = 8,
}

impl TryFrom<u32> for ConfigCmd {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::BindRoute),
            1 => Ok(Self::UnbindRoute),
            2 => Ok(Self::AddGroup),
            3 => Ok(Self::DelGroup),
            4 => Ok(Self::UpdateProfiling),
            5 => Ok(Self::UpdateHcclProtocol),
            6 => Ok(Self::InitDynamicSched),
            7 => Ok(Self::StopSchedule),
            8 => Ok(Self::ClearAndRestartSchedule),
            _ => Err(ProtocolError::invalid_value("config cmd", value)),
        }
    }
}

impl ConfigCmd {
    /// Commands every resource domain applies; the rest run on domain 0 only
    pub const fn processed_by_all_res(self) -> bool {
        matches!(
            self,
            Self::BindRoute
                | Self::UnbindRoute
                | Self::StopSchedule
                | Self::ClearAndRestartSchedule
        )
    }
}

/// Command head
///
/// `num` is the route, endpoint or root-model count; `group_id` is used by
/// group commands; `value` holds the profiling mode or HCCL protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigInfo {
    pub cmd: u32,
    pub num: u32,
    pub group_id: i32,
    pub value: u32,
}

impl ConfigInfo {
    pub fn new(cmd: ConfigCmd, num: u32) -> Self {
        Self {
            cmd: cmd as u32,
            num,
            group_id: 0,
            value: 0,
        }
    }

    pub fn put(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.cmd);
        buf.put_u32_le(self.num);
        buf.put_i32_le(self.group_id);
        buf.put_u32_le(self.value);
    }

    pub fn get(buf: &mut &[u8]) -> Result<Self> {
        ensure(buf, CONFIG_INFO_SIZE)?;
        Ok(Self {
            cmd: buf.get_u32_le(),
            num: buf.get_u32_le(),
            group_id: buf.get_i32_le(),
            value: buf.get_u32_le(),
        })
    }
}

/// Dynamic schedule registration for one root model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DynamicSchedConfig {
    pub root_model_id: u32,
    pub request_queue_id: u32,
    pub response_queue_id: u32,
    pub res_id: u16,
}

impl DynamicSchedConfig {
    pub fn put(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.root_model_id);
        buf.put_u32_le(self.request_queue_id);
        buf.put_u32_le(self.response_queue_id);
        buf.put_u16_le(self.res_id);
        buf.put_u16_le(0);
    }

    pub fn get(buf: &mut &[u8]) -> Result<Self> {
        ensure(buf, DYNAMIC_SCHED_SIZE)?;
        let config = Self {
            root_model_id: buf.get_u32_le(),
            request_queue_id: buf.get_u32_le(),
            response_queue_id: buf.get_u32_le(),
            res_id: buf.get_u16_le(),
        };
        buf.advance(2);
        Ok(config)
    }
}

/// Query selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QueryMode {
    Src = 0,
    Dst = 1,
    SrcDst = 2,
    All = 3,
    Group = 4,
}

/// Query head; `count` is the declared (data) or returned (num) size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigQuery {
    pub mode: u32,
    pub group_id: i32,
    pub count: u32,
    pub src: Endpoint,
    pub dst: Endpoint,
}

impl ConfigQuery {
    pub fn routes(mode: QueryMode, src: Endpoint, dst: Endpoint) -> Self {
        Self {
            mode: mode as u32,
            group_id: 0,
            count: 0,
            src,
            dst,
        }
    }

    pub fn group(group_id: i32) -> Self {
        Self {
            mode: QueryMode::Group as u32,
            group_id,
            count: 0,
            src: Endpoint::queue(0),
            dst: Endpoint::queue(0),
        }
    }

    pub fn is_group(&self) -> bool {
        self.mode == QueryMode::Group as u32
    }

    pub fn put(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.mode);
        buf.put_i32_le(self.group_id);
        buf.put_u32_le(self.count);
        buf.put_u32_le(0);
        self.src.put(buf);
        self.dst.put(buf);
    }

    pub fn get(buf: &mut &[u8]) -> Result<Self> {
        ensure(buf, CONFIG_QUERY_SIZE)?;
        let mode = buf.get_u32_le();
        let group_id = buf.get_i32_le();
        let count = buf.get_u32_le();
        let _reserved = buf.get_u32_le();
        let src = Endpoint::get(buf)?;
        let dst = Endpoint::get(buf)?;
        Ok(Self {
            mode,
            group_id,
            count,
            src,
            dst,
        })
    }
}

/// Collective comm handle request head, followed by the rank table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HcomHandleInfo {
    pub rank_id: i32,
    pub rank_table_len: u32,
    pub handle: u64,
}

impl HcomHandleInfo {
    pub fn put(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.rank_id);
        buf.put_u32_le(self.rank_table_len);
        buf.put_u64_le(self.handle);
        buf.put_u64_le(0);
    }

    pub fn get(buf: &mut &[u8]) -> Result<Self> {
        ensure(buf, HCOM_HANDLE_INFO_SIZE)?;
        let info = Self {
            rank_id: buf.get_i32_le(),
            rank_table_len: buf.get_u32_le(),
            handle: buf.get_u64_le(),
        };
        buf.advance(8);
        Ok(info)
    }
}

/// Body of an update command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigBody {
    Routes(Vec<Route>),
    Endpoints(Vec<Endpoint>),
    DynamicSched(DynamicSchedConfig),
    RootModels(Vec<u32>),
    Empty,
}

/// Encode an update command with zeroed result slots
pub fn encode_update(info: &ConfigInfo, body: &ConfigBody) -> BytesMut {
    let mut buf = BytesMut::with_capacity(256);
    info.put(&mut buf);
    let results = match body {
        ConfigBody::Routes(routes) => {
            routes.iter().for_each(|route| route.put(&mut buf));
            routes.len()
        }
        ConfigBody::Endpoints(endpoints) => {
            endpoints.iter().for_each(|endpoint| endpoint.put(&mut buf));
            1
        }
        ConfigBody::DynamicSched(config) => {
            config.put(&mut buf);
            1
        }
        ConfigBody::RootModels(ids) => {
            ids.iter().for_each(|id| buf.put_u32_le(*id));
            1
        }
        ConfigBody::Empty => 1,
    };
    buf.put_bytes(0, results * CFG_RET_SIZE);
    buf
}

/// Encode a count query
pub fn encode_query_num(query: &ConfigQuery) -> BytesMut {
    let mut buf = BytesMut::with_capacity(CONFIG_QUERY_SIZE + CFG_RET_SIZE);
    query.put(&mut buf);
    buf.put_i32_le(0);
    buf
}

/// Encode a data query with room for `query.count` records
pub fn encode_query_data(query: &ConfigQuery) -> BytesMut {
    let record = if query.is_group() {
        ENDPOINT_SIZE
    } else {
        ROUTE_SIZE
    };
    let len = query_data_len(query.count as usize, record);
    let mut buf = BytesMut::with_capacity(len);
    query.put(&mut buf);
    buf.put_bytes(0, len - CONFIG_QUERY_SIZE);
    buf
}

/// Encode a create-handle request
pub fn encode_hcom_create(rank_id: i32, rank_table: &[u8]) -> Result<BytesMut> {
    let rank_table_len =
        u32::try_from(rank_table.len()).map_err(|_| ProtocolError::Overflow("rank table"))?;
    let mut buf = BytesMut::with_capacity(HCOM_HANDLE_INFO_SIZE + rank_table.len() + CFG_RET_SIZE);
    HcomHandleInfo {
        rank_id,
        rank_table_len,
        handle: 0,
    }
    .put(&mut buf);
    buf.put_slice(rank_table);
    buf.put_i32_le(0);
    Ok(buf)
}

/// Encode a destroy-handle request
pub fn encode_hcom_destroy(handle: u64) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HCOM_HANDLE_INFO_SIZE + CFG_RET_SIZE);
    HcomHandleInfo {
        handle,
        ..HcomHandleInfo::default()
    }
    .put(&mut buf);
    buf.put_i32_le(0);
    buf
}

/// Length of a data query buffer holding `count` records of `record` bytes
#[inline]
pub const fn query_data_len(count: usize, record: usize) -> usize {
    CONFIG_QUERY_SIZE + CONFIG_INFO_SIZE + count * record + CFG_RET_SIZE
}

/// Offset of the aggregate result slot (always the last four bytes)
#[inline]
pub fn cfg_ret_offset(buf_len: usize) -> usize {
    buf_len.saturating_sub(CFG_RET_SIZE)
}

/// Offset of the i-th per-route result in a route update buffer
#[inline]
pub const fn route_ret_offset(route_num: usize, index: usize) -> usize {
    CONFIG_INFO_SIZE + route_num * ROUTE_SIZE + index * CFG_RET_SIZE
}

/// Offset of `ConfigQuery::count` inside a query buffer
#[inline]
pub const fn query_count_offset() -> usize {
    QUERY_COUNT_OFFSET
}

/// Offset of `HcomHandleInfo::handle`
#[inline]
pub const fn hcom_handle_offset() -> usize {
    HCOM_HANDLE_OFFSET
}

/// Write a little-endian i32 at `offset`, ignoring out-of-range offsets
pub fn write_i32_at(buf: &mut [u8], offset: usize, value: i32) {
    if let Some(slot) = buf.get_mut(offset..offset + 4) {
        slot.copy_from_slice(&value.to_le_bytes());
    }
}

/// Write a little-endian u32 at `offset`
pub fn write_u32_at(buf: &mut [u8], offset: usize, value: u32) {
    if let Some(slot) = buf.get_mut(offset..offset + 4) {
        slot.copy_from_slice(&value.to_le_bytes());
    }
}

/// Write a little-endian u64 at `offset`
pub fn write_u64_at(buf: &mut [u8], offset: usize, value: u64) {
    if let Some(slot) = buf.get_mut(offset..offset + 8) {
        slot.copy_from_slice(&value.to_le_bytes());
    }
}

/// Read a little-endian i32 at `offset`
pub fn read_i32_at(buf: &[u8], offset: usize) -> Option<i32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read a little-endian u32 at `offset`
pub fn read_u32_at(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read a little-endian u64 at `offset`
pub fn read_u64_at(buf: &[u8], offset: usize) -> Option<u64> {
    let bytes = buf.get(offset..offset + 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Some(u64::from_le_bytes(raw))
}

fn ensure(buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(ProtocolError::too_short(needed, buf.len()));
    }
    Ok(())
}
