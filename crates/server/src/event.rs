//! Scheduler events
//!
//! Events reach the router tagged with a numeric sub-event id. Ids up to
//! `AICPU_SPLIT` come from the device-side AICPU; the rest come from host
//! clients. Relation payloads (bind, unbind, detailed query) and
//! configuration buffers travel in `QsEvent::payload`; bind-init and count
//! queries carry their fixed-size message in `QsEvent::msg`.

use bqs_operator::ConfigEventKind;
use bqs_protocol::{Bytes, BytesMut, MAJOR_VERSION, MINOR_VERSION};

/// Exclusive upper bound for queue ids accepted in relation events
pub const MAX_QUEUE_ID_NUM: u32 = 65_536;

/// Link status code reported when some channel is still unconnected
pub const LINK_NOT_CONNECTED: i32 = 1;

/// Sub-event ids at or below this value originate from the AICPU
pub const AICPU_SPLIT: u32 = 10;

/// Name prefix of the per-client pipeline queue
pub const PIPELINE_QUEUE_NAME: &str = "bqs_pipeline_";

/// Sub-event identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SubEvent {
    AicpuBindQueue = 1,
    AicpuBindQueueInit = 2,
    AicpuUnbindQueue = 3,
    AicpuQueryQueueNum = 4,
    AicpuQueryQueue = 5,
    AicpuQueueRelationProcess = 6,
    AicpuRelatedMessageSplit = 10,
    AclBindQueueInit = 11,
    AclBindQueue = 12,
    AclUnbindQueue = 13,
    AclQueryQueueNum = 14,
    AclQueryQueue = 15,
    AclQueueRelationProcess = 16,
    DgwCreateHcomHandle = 17,
    DgwDestroyHcomHandle = 18,
    BindHostPid = 19,
    UpdateConfig = 20,
    QueryConfigNum = 21,
    QueryConfig = 22,
    QueryLinkStatus = 23,
    QueryLinkStatusV2 = 24,
}

impl TryFrom<u32> for SubEvent {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::AicpuBindQueue,
            2 => Self::AicpuBindQueueInit,
            3 => Self::AicpuUnbindQueue,
            4 => Self::AicpuQueryQueueNum,
            5 => Self::AicpuQueryQueue,
            6 => Self::AicpuQueueRelationProcess,
            10 => Self::AicpuRelatedMessageSplit,
            11 => Self::AclBindQueueInit,
            12 => Self::AclBindQueue,
            13 => Self::AclUnbindQueue,
            14 => Self::AclQueryQueueNum,
            15 => Self::AclQueryQueue,
            16 => Self::AclQueueRelationProcess,
            17 => Self::DgwCreateHcomHandle,
            18 => Self::DgwDestroyHcomHandle,
            19 => Self::BindHostPid,
            20 => Self::UpdateConfig,
            21 => Self::QueryConfigNum,
            22 => Self::QueryConfig,
            23 => Self::QueryLinkStatus,
            24 => Self::QueryLinkStatusV2,
            other => return Err(other),
        })
    }
}

/// What the router does with an incoming sub-event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    BindInit,
    QueryNum,
    /// Payload-driven; the real sub-event is in the payload head
    RelationProcess,
    Config(ConfigEventKind),
    QueryLinkStatus,
    BindHostPid,
}

/// Graph operation named by a relation payload head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationOp {
    Bind,
    Unbind,
    Query,
}

impl SubEvent {
    #[inline]
    pub const fn id(self) -> u32 {
        self as u32
    }

    #[inline]
    pub const fn is_aicpu(self) -> bool {
        is_aicpu(self as u32)
    }

    /// Operation dispatched for this sub-event when it arrives as an event
    ///
    /// AICPU bind, unbind and query only ever appear inside a relation
    /// payload head, so they have no direct operation.
    /// `AclQueueRelationProcess` is reserved and has none either.
    pub const fn operation(self) -> Option<Operation> {
        Some(match self {
            Self::AicpuBindQueueInit | Self::AclBindQueueInit => Operation::BindInit,
            Self::AicpuQueryQueueNum | Self::AclQueryQueueNum => Operation::QueryNum,
            Self::AicpuQueueRelationProcess
            | Self::AclBindQueue
            | Self::AclUnbindQueue
            | Self::AclQueryQueue => Operation::RelationProcess,
            Self::DgwCreateHcomHandle => Operation::Config(ConfigEventKind::CreateHcomHandle),
            Self::DgwDestroyHcomHandle => Operation::Config(ConfigEventKind::DestroyHcomHandle),
            Self::UpdateConfig => Operation::Config(ConfigEventKind::UpdateConfig),
            Self::QueryConfigNum => Operation::Config(ConfigEventKind::QueryConfigNum),
            Self::QueryConfig => Operation::Config(ConfigEventKind::QueryConfig),
            Self::QueryLinkStatus | Self::QueryLinkStatusV2 => Operation::QueryLinkStatus,
            Self::BindHostPid => Operation::BindHostPid,
            Self::AicpuBindQueue
            | Self::AicpuUnbindQueue
            | Self::AicpuQueryQueue
            | Self::AicpuRelatedMessageSplit
            | Self::AclQueueRelationProcess => return None,
        })
    }

    /// Graph operation when this id appears in a relation payload head
    pub const fn relation_op(self) -> Option<RelationOp> {
        match self {
            Self::AicpuBindQueue | Self::AclBindQueue => Some(RelationOp::Bind),
            Self::AicpuUnbindQueue | Self::AclUnbindQueue => Some(RelationOp::Unbind),
            Self::AicpuQueryQueue | Self::AclQueryQueue => Some(RelationOp::Query),
            _ => None,
        }
    }
}

#[inline]
pub const fn is_aicpu(sub_event_id: u32) -> bool {
    sub_event_id <= AICPU_SPLIT
}

/// How the scheduler is deployed relative to its clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeployMode {
    SingleProcess,
    #[default]
    MultiProcess,
    /// Runs as a thread of the client; AICPU events are ignored
    MultiThread,
}

impl DeployMode {
    /// Parse the numeric `--deployMode` value
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::SingleProcess),
            1 => Some(Self::MultiProcess),
            2 => Some(Self::MultiThread),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SingleProcess => "single_process",
            Self::MultiProcess => "multi_process",
            Self::MultiThread => "multi_thread",
        }
    }
}

impl std::fmt::Display for DeployMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound event
#[derive(Debug, Clone, Default)]
pub struct QsEvent {
    pub sub_event_id: u32,
    /// Fixed-size message carried in the event itself
    pub msg: Bytes,
    /// Buffer handed over through the pipeline queue
    pub payload: Option<BytesMut>,
}

impl QsEvent {
    pub fn new(sub_event_id: u32) -> Self {
        Self {
            sub_event_id,
            ..Self::default()
        }
    }

    pub fn with_msg(mut self, msg: impl Into<Bytes>) -> Self {
        self.msg = msg.into();
        self
    }

    pub fn with_payload(mut self, payload: BytesMut) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Response sent back for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QsResponse {
    /// Sub-event the response answers (the payload's for relation events)
    pub sub_event_id: u32,
    /// Echoed only to AICPU senders
    pub sync_event_head: u64,
    pub ret_code: i32,
    pub ret_value: u32,
    pub major_version: u32,
    pub minor_version: u32,
}

impl QsResponse {
    pub fn new(sub_event_id: u32, ret_code: i32, ret_value: u32) -> Self {
        Self {
            sub_event_id,
            sync_event_head: 0,
            ret_code,
            ret_value,
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.ret_code == 0
    }
}
