//! Relation event layout
//!
//! Device-side bind, unbind and query requests travel as one payload buffer:
//!
//! ```text
//! ┌──────────────┬───────────────────────┬──────────────────────────┐
//! │ QsRouteHead  │ QueueRouteQuery       │ QueueRoute × route_num   │
//! │ 24 bytes     │ 24 bytes, query only  │ 16 bytes each            │
//! └──────────────┴───────────────────────┴──────────────────────────┘
//! ```
//!
//! All fields are little-endian. `QsRouteHead::length` covers the whole
//! payload and must agree exactly with `route_num`. The scheduler writes
//! per-route status (and query results) back into the same buffer.

use bytes::{Buf, BufMut, BytesMut};

use crate::Result;
use crate::error::ProtocolError;

pub const ROUTE_HEAD_SIZE: usize = 24;
pub const QUEUE_ROUTE_SIZE: usize = 16;
pub const ROUTE_QUERY_SIZE: usize = 24;
pub const BIND_INIT_SIZE: usize = 24;

/// Offset of `QueueRoute::status` inside a route record
const ROUTE_STATUS_OFFSET: usize = 8;

/// Relation query selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Src,
    Dst,
    SrcOrDst,
    SrcAndDst,
    AbnormalForQueueError,
    Other(u32),
}

impl From<u32> for QueryType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Src,
            1 => Self::Dst,
            2 => Self::SrcOrDst,
            3 => Self::SrcAndDst,
            100 => Self::AbnormalForQueueError,
            other => Self::Other(other),
        }
    }
}

impl From<QueryType> for u32 {
    fn from(value: QueryType) -> Self {
        match value {
            QueryType::Src => 0,
            QueryType::Dst => 1,
            QueryType::SrcOrDst => 2,
            QueryType::SrcAndDst => 3,
            QueryType::AbnormalForQueueError => 100,
            QueryType::Other(other) => other,
        }
    }
}

/// Status of a relation in query replies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum RelationStatus {
    Unknown = 0,
    Bind = 1,
    AbnormalForQueueError = 2,
}

/// Payload head
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QsRouteHead {
    pub length: u32,
    pub route_num: u32,
    pub sub_event_id: u32,
    pub user_data: u64,
}

/// One relation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueRoute {
    pub src_id: u32,
    pub dst_id: u32,
    pub status: i32,
    pub src_type: u16,
    pub dst_type: u16,
}

/// Query selector following the head on query sub-events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueRouteQuery {
    pub sync_event_head: u64,
    pub query_type: u32,
    pub src_id: u32,
    pub dst_id: u32,
    pub src_type: u16,
    pub dst_type: u16,
}

/// Bind-init message carried in the event itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BindInit {
    pub sync_event_head: u64,
    pub pid: i32,
    pub group_id: u32,
    pub major_version: u32,
}

impl QsRouteHead {
    fn put(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.length);
        buf.put_u32_le(self.route_num);
        buf.put_u32_le(self.sub_event_id);
        buf.put_u32_le(0);
        buf.put_u64_le(self.user_data);
    }

    fn get(buf: &mut &[u8]) -> Self {
        let length = buf.get_u32_le();
        let route_num = buf.get_u32_le();
        let sub_event_id = buf.get_u32_le();
        let _reserved = buf.get_u32_le();
        let user_data = buf.get_u64_le();
        Self {
            length,
            route_num,
            sub_event_id,
            user_data,
        }
    }
}

impl QueueRoute {
    pub fn new(src_id: u32, dst_id: u32) -> Self {
        Self {
            src_id,
            dst_id,
            ..Self::default()
        }
    }

    fn put(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.src_id);
        buf.put_u32_le(self.dst_id);
        buf.put_i32_le(self.status);
        buf.put_u16_le(self.src_type);
        buf.put_u16_le(self.dst_type);
    }

    fn get(buf: &mut &[u8]) -> Self {
        Self {
            src_id: buf.get_u32_le(),
            dst_id: buf.get_u32_le(),
            status: buf.get_i32_le(),
            src_type: buf.get_u16_le(),
            dst_type: buf.get_u16_le(),
        }
    }

    fn write_into(&self, slot: &mut [u8]) {
        slot[0..4].copy_from_slice(&self.src_id.to_le_bytes());
        slot[4..8].copy_from_slice(&self.dst_id.to_le_bytes());
        slot[8..12].copy_from_slice(&self.status.to_le_bytes());
        slot[12..14].copy_from_slice(&self.src_type.to_le_bytes());
        slot[14..16].copy_from_slice(&self.dst_type.to_le_bytes());
    }
}

impl QueueRouteQuery {
    pub fn put(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.sync_event_head);
        buf.put_u32_le(self.query_type);
        buf.put_u32_le(self.src_id);
        buf.put_u32_le(self.dst_id);
        buf.put_u16_le(self.src_type);
        buf.put_u16_le(self.dst_type);
    }

    /// Parse a standalone query (query-num events carry it as the message)
    pub fn parse(mut buf: &[u8]) -> Result<Self> {
        if buf.len() != ROUTE_QUERY_SIZE {
            return Err(ProtocolError::length_mismatch(ROUTE_QUERY_SIZE, buf.len()));
        }
        Ok(Self::get(&mut buf))
    }

    fn get(buf: &mut &[u8]) -> Self {
        Self {
            sync_event_head: buf.get_u64_le(),
            query_type: buf.get_u32_le(),
            src_id: buf.get_u32_le(),
            dst_id: buf.get_u32_le(),
            src_type: buf.get_u16_le(),
            dst_type: buf.get_u16_le(),
        }
    }
}

impl BindInit {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(BIND_INIT_SIZE);
        buf.put_u64_le(self.sync_event_head);
        buf.put_i32_le(self.pid);
        buf.put_u32_le(self.group_id);
        buf.put_u32_le(self.major_version);
        buf.put_u32_le(0);
        buf
    }

    pub fn parse(mut buf: &[u8]) -> Result<Self> {
        if buf.len() != BIND_INIT_SIZE {
            return Err(ProtocolError::length_mismatch(BIND_INIT_SIZE, buf.len()));
        }
        Ok(Self {
            sync_event_head: buf.get_u64_le(),
            pid: buf.get_i32_le(),
            group_id: buf.get_u32_le(),
            major_version: buf.get_u32_le(),
        })
    }
}

/// Parsed relation payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationEvent {
    pub head: QsRouteHead,
    pub query: Option<QueueRouteQuery>,
    pub routes: Vec<QueueRoute>,
}

impl RelationEvent {
    /// Build a bind/unbind payload
    pub fn routes(sub_event_id: u32, routes: Vec<QueueRoute>) -> Self {
        Self {
            head: QsRouteHead {
                sub_event_id,
                route_num: routes.len() as u32,
                ..QsRouteHead::default()
            },
            query: None,
            routes,
        }
    }

    /// Build a query payload with room for `capacity` results
    pub fn query(sub_event_id: u32, query: QueueRouteQuery, capacity: u32) -> Self {
        Self {
            head: QsRouteHead {
                sub_event_id,
                route_num: capacity,
                ..QsRouteHead::default()
            },
            query: Some(query),
            routes: vec![QueueRoute::default(); capacity as usize],
        }
    }

    /// Encode with the head length computed
    pub fn encode(&self) -> BytesMut {
        let length = expected_length(self.query.is_some(), self.routes.len());
        let mut buf = BytesMut::with_capacity(length);
        let head = QsRouteHead {
            length: length as u32,
            route_num: self.routes.len() as u32,
            ..self.head
        };
        head.put(&mut buf);
        if let Some(query) = &self.query {
            query.put(&mut buf);
        }
        for route in &self.routes {
            route.put(&mut buf);
        }
        buf
    }

    /// Read only the head (to learn the sub-event before full parsing)
    pub fn peek_head(buf: &[u8]) -> Result<QsRouteHead> {
        if buf.len() < ROUTE_HEAD_SIZE {
            return Err(ProtocolError::too_short(ROUTE_HEAD_SIZE, buf.len()));
        }
        let mut cursor = buf;
        Ok(QsRouteHead::get(&mut cursor))
    }

    /// Parse a payload, checking `length` against `route_num`
    pub fn parse(buf: &[u8], with_query: bool) -> Result<Self> {
        let head = Self::peek_head(buf)?;
        let expected = expected_length(with_query, head.route_num as usize);
        if head.length as usize != expected {
            return Err(ProtocolError::malformed(format!(
                "route num {} inconsistent with length {}",
                head.route_num, head.length
            )));
        }
        if buf.len() < expected {
            return Err(ProtocolError::too_short(expected, buf.len()));
        }

        let mut cursor = &buf[ROUTE_HEAD_SIZE..expected];
        let query = with_query.then(|| QueueRouteQuery::get(&mut cursor));
        let routes = (0..head.route_num)
            .map(|_| QueueRoute::get(&mut cursor))
            .collect();
        Ok(Self {
            head,
            query,
            routes,
        })
    }
}

/// Total payload length for a route count
#[inline]
pub fn expected_length(with_query: bool, route_num: usize) -> usize {
    let query = if with_query { ROUTE_QUERY_SIZE } else { 0 };
    ROUTE_HEAD_SIZE + query + route_num * QUEUE_ROUTE_SIZE
}

/// Overwrite the status of route `index` in an encoded payload
pub fn write_route_status(buf: &mut [u8], with_query: bool, index: usize, status: i32) {
    let offset = expected_length(with_query, index) + ROUTE_STATUS_OFFSET;
    if let Some(slot) = buf.get_mut(offset..offset + 4) {
        slot.copy_from_slice(&status.to_le_bytes());
    }
}

/// Overwrite route records in an encoded query payload
pub fn write_query_results(buf: &mut [u8], routes: &[QueueRoute]) {
    for (index, route) in routes.iter().enumerate() {
        let offset = expected_length(true, index);
        if let Some(slot) = buf.get_mut(offset..offset + QUEUE_ROUTE_SIZE) {
            route.write_into(slot);
        }
    }
}
