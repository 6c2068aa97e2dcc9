//! BQS Protocol - Status codes and wire layouts for the buffer queue scheduler
//!
//! This crate holds every format shared between the scheduler and its peers:
//! - `BqsStatus` - status taxonomy with stable numeric codes
//! - `Message` - length-prefixed client request/response frame
//! - `RelationEvent` - device-side bind/unbind/query payload
//! - `config` - configuration command buffers written back in place
//!
//! Nothing here touches the routing graph; parsing is pure and every decode
//! checks remaining length before reading.

pub mod config;
mod error;
pub mod message;
pub mod route;
mod status;

pub use error::ProtocolError;
pub use message::{BindQueueItem, Body, KeyType, Message, MsgType, PagedMsg, QueryItem};
pub use route::{
    BindInit, QsRouteHead, QueryType, QueueRoute, QueueRouteQuery, RelationEvent, RelationStatus,
};
pub use status::{BqsStatus, STATUS_OK, StatusResult, status_code, status_from_code};

pub use bytes::{Bytes, BytesMut};

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Major version reported in responses
pub const MAJOR_VERSION: u32 = 3;

/// Minor version reported in responses
pub const MINOR_VERSION: u32 = 0;

#[cfg(test)]
mod status_test;
