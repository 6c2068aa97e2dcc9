//! Client wire message
//!
//! Request/response format exchanged between `BqsClient` and the scheduler's
//! socket front end.
//!
//! # Wire Format
//!
//! ```text
//! ┌──────────────┬──────────┬──────────┬──────────────────────┐
//! │ 4 bytes      │ 1 byte   │ 1 byte   │ N bytes              │
//! │ total len BE │ msg_type │ body tag │ body                 │
//! └──────────────┴──────────┴──────────┴──────────────────────┘
//! ```
//!
//! The head holds the length of the whole frame, head included. Decoding
//! checks the declared length against the received length before touching
//! the body; a mismatch is a comm error, not a parse error.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::Result;
use crate::error::ProtocolError;

/// Size of the length head
pub const HEAD_SIZE: usize = 4;

/// Largest frame accepted by readers
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

const BODY_EMPTY: u8 = 0;
const BODY_BIND_QUEUES: u8 = 1;
const BODY_QUERIES: u8 = 2;
const BODY_QUERY: u8 = 3;
const BODY_PAGED: u8 = 4;
const BODY_RESPONSES: u8 = 5;

const ITEM_SIZE: usize = 8;
const QUERY_SIZE: usize = 1 + ITEM_SIZE;

/// Request kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    Bind = 0,
    Unbind = 1,
    GetBind = 2,
    GetAllBind = 3,
    Unuse = 4,
}

impl TryFrom<u8> for MsgType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Bind),
            1 => Ok(Self::Unbind),
            2 => Ok(Self::GetBind),
            3 => Ok(Self::GetAllBind),
            4 => Ok(Self::Unuse),
            _ => Err(ProtocolError::invalid_value("msg_type", u32::from(value))),
        }
    }
}

/// Which side of a relation a query selects on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyType {
    Src = 0,
    Dst = 1,
    SrcAndDst = 2,
    SrcOrDst = 3,
}

impl TryFrom<u8> for KeyType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Src),
            1 => Ok(Self::Dst),
            2 => Ok(Self::SrcAndDst),
            3 => Ok(Self::SrcOrDst),
            _ => Err(ProtocolError::invalid_value("key_type", u32::from(value))),
        }
    }
}

/// One (src, dst) queue pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BindQueueItem {
    pub src_queue_id: u32,
    pub dst_queue_id: u32,
}

impl BindQueueItem {
    #[inline]
    pub const fn new(src_queue_id: u32, dst_queue_id: u32) -> Self {
        Self {
            src_queue_id,
            dst_queue_id,
        }
    }
}

/// Keyed query over a queue pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryItem {
    pub key_type: KeyType,
    pub item: BindQueueItem,
}

impl QueryItem {
    #[inline]
    pub const fn new(key_type: KeyType, item: BindQueueItem) -> Self {
        Self { key_type, item }
    }
}

/// Paging window; replies also carry the page items and the snapshot total
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PagedMsg {
    pub offset: u32,
    pub limit: u32,
    pub total: u32,
    pub items: Vec<BindQueueItem>,
}

/// Message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Empty,
    BindQueues(Vec<BindQueueItem>),
    Queries(Vec<QueryItem>),
    Query(QueryItem),
    Paged(PagedMsg),
    Responses(Vec<i32>),
}

/// A complete framed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: MsgType,
    pub body: Body,
}

impl Message {
    #[inline]
    pub fn new(msg_type: MsgType, body: Body) -> Self {
        Self { msg_type, body }
    }

    /// BIND request for the given pairs
    pub fn bind(items: Vec<BindQueueItem>) -> Self {
        Self::new(MsgType::Bind, Body::BindQueues(items))
    }

    /// UNBIND request for the given keyed queries
    pub fn unbind(queries: Vec<QueryItem>) -> Self {
        Self::new(MsgType::Unbind, Body::Queries(queries))
    }

    /// GET_BIND request for a single keyed query
    pub fn get_bind(query: QueryItem) -> Self {
        Self::new(MsgType::GetBind, Body::Query(query))
    }

    /// GET_ALL_BIND request for one page
    pub fn get_all_bind(offset: u32, limit: u32) -> Self {
        Self::new(
            MsgType::GetAllBind,
            Body::Paged(PagedMsg {
                offset,
                limit,
                ..PagedMsg::default()
            }),
        )
    }

    /// Encode into a frame with the total-length head filled in
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(64);

        // Reserve the head, patched once the body is written
        buf.put_u32(0);
        buf.put_u8(self.msg_type as u8);

        match &self.body {
            Body::Empty => buf.put_u8(BODY_EMPTY),
            Body::BindQueues(items) => {
                buf.put_u8(BODY_BIND_QUEUES);
                put_count(&mut buf, items.len())?;
                for item in items {
                    put_item(&mut buf, item);
                }
            }
            Body::Queries(queries) => {
                buf.put_u8(BODY_QUERIES);
                put_count(&mut buf, queries.len())?;
                for query in queries {
                    put_query(&mut buf, query);
                }
            }
            Body::Query(query) => {
                buf.put_u8(BODY_QUERY);
                put_query(&mut buf, query);
            }
            Body::Paged(paged) => {
                buf.put_u8(BODY_PAGED);
                buf.put_u32(paged.offset);
                buf.put_u32(paged.limit);
                buf.put_u32(paged.total);
                put_count(&mut buf, paged.items.len())?;
                for item in &paged.items {
                    put_item(&mut buf, item);
                }
            }
            Body::Responses(results) => {
                buf.put_u8(BODY_RESPONSES);
                put_count(&mut buf, results.len())?;
                for result in results {
                    buf.put_i32(*result);
                }
            }
        }

        let len = u32::try_from(buf.len()).map_err(|_| ProtocolError::Overflow("message"))?;
        buf[0..HEAD_SIZE].copy_from_slice(&len.to_be_bytes());
        Ok(buf.freeze())
    }

    /// Decode a complete frame, head included
    pub fn decode(mut frame: Bytes) -> Result<Self> {
        if frame.len() < HEAD_SIZE {
            return Err(ProtocolError::too_short(HEAD_SIZE, frame.len()));
        }
        let declared = frame.get_u32() as usize;
        let actual = frame.len() + HEAD_SIZE;
        if declared != actual {
            return Err(ProtocolError::length_mismatch(declared, actual));
        }

        ensure(&frame, 2)?;
        let msg_type = MsgType::try_from(frame.get_u8())?;
        let tag = frame.get_u8();

        let body = match tag {
            BODY_EMPTY => Body::Empty,
            BODY_BIND_QUEUES => {
                let count = get_count(&mut frame, ITEM_SIZE)?;
                Body::BindQueues((0..count).map(|_| get_item(&mut frame)).collect())
            }
            BODY_QUERIES => {
                let count = get_count(&mut frame, QUERY_SIZE)?;
                let mut queries = Vec::with_capacity(count);
                for _ in 0..count {
                    queries.push(get_query(&mut frame)?);
                }
                Body::Queries(queries)
            }
            BODY_QUERY => {
                ensure(&frame, QUERY_SIZE)?;
                Body::Query(get_query(&mut frame)?)
            }
            BODY_PAGED => {
                ensure(&frame, 12)?;
                let offset = frame.get_u32();
                let limit = frame.get_u32();
                let total = frame.get_u32();
                let count = get_count(&mut frame, ITEM_SIZE)?;
                let items = (0..count).map(|_| get_item(&mut frame)).collect();
                Body::Paged(PagedMsg {
                    offset,
                    limit,
                    total,
                    items,
                })
            }
            BODY_RESPONSES => {
                let count = get_count(&mut frame, 4)?;
                Body::Responses((0..count).map(|_| frame.get_i32()).collect())
            }
            other => return Err(ProtocolError::invalid_value("body tag", u32::from(other))),
        };

        if frame.has_remaining() {
            return Err(ProtocolError::malformed(format!(
                "{} trailing bytes after body",
                frame.remaining()
            )));
        }

        Ok(Self { msg_type, body })
    }
}

/// Read the total frame length from a head
///
/// Returns `None` when the length cannot describe a valid frame.
pub fn read_head(head: &[u8; HEAD_SIZE]) -> Option<usize> {
    let len = u32::from_be_bytes(*head) as usize;
    if (HEAD_SIZE + 2..=MAX_MESSAGE_SIZE).contains(&len) {
        Some(len)
    } else {
        None
    }
}

fn ensure(buf: &Bytes, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(ProtocolError::too_short(needed, buf.remaining()));
    }
    Ok(())
}

fn put_count(buf: &mut BytesMut, count: usize) -> Result<()> {
    let count = u32::try_from(count).map_err(|_| ProtocolError::Overflow("item count"))?;
    buf.put_u32(count);
    Ok(())
}

fn get_count(buf: &mut Bytes, item_size: usize) -> Result<usize> {
    ensure(buf, 4)?;
    let count = buf.get_u32() as usize;
    let needed = count
        .checked_mul(item_size)
        .ok_or(ProtocolError::Overflow("item count"))?;
    ensure(buf, needed)?;
    Ok(count)
}

fn put_item(buf: &mut BytesMut, item: &BindQueueItem) {
    buf.put_u32(item.src_queue_id);
    buf.put_u32(item.dst_queue_id);
}

fn get_item(buf: &mut Bytes) -> BindQueueItem {
    let src = buf.get_u32();
    let dst = buf.get_u32();
    BindQueueItem::new(src, dst)
}

fn put_query(buf: &mut BytesMut, query: &QueryItem) {
    buf.put_u8(query.key_type as u8);
    put_item(buf, &query.item);
}

fn get_query(buf: &mut Bytes) -> Result<QueryItem> {
    let key_type = KeyType::try_from(buf.get_u8())?;
    Ok(QueryItem::new(key_type, get_item(buf)))
}
