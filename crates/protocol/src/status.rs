//! Scheduler status codes
//!
//! Every layer reports outcomes as `Result<T, BqsStatus>`. Success is `Ok`,
//! which goes on the wire as code 0; every failure carries a stable numeric
//! code shared with clients.

use thiserror::Error;

/// Wire code for success
pub const STATUS_OK: i32 = 0;

/// Failure status returned by scheduler operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum BqsStatus {
    /// Malformed or missing request fields
    #[error("parameter invalid")]
    ParamInvalid,

    /// Internal invariant violated
    #[error("inner error")]
    InnerError,

    /// Device queue service call failed
    #[error("driver error")]
    DriverError,

    /// Transport framing mismatch
    #[error("easy comm error")]
    EasyCommError,

    /// Attach or authority check failed
    #[error("queue authority error")]
    QueueAuthError,

    /// Queue id out of range or already bound elsewhere
    #[error("queue id error")]
    QueueIdError,

    /// Endpoint memory type not supported by the peer
    #[error("endpoint memory type not supported")]
    EndpointMemTypeNotSupport,

    /// Worker did not finish within the bound
    #[error("timeout")]
    Timeout,

    /// Called before initialization completed
    #[error("not initialized")]
    NotInit,

    #[error("group does not exist")]
    GroupNotExist,

    #[error("group already exists")]
    GroupHasExist,

    #[error("group is still referenced by a route")]
    GroupExistInRoute,

    /// Entity already materialized or group conflict
    #[error("entity already exists")]
    EntityExist,

    /// Collective comm service failure
    #[error("hccl error")]
    HcclError,

    /// Loop detected or schedule config failure
    #[error("dynamic schedule error")]
    DynamicScheduleError,

    #[error("not supported")]
    NotSupport,

    #[error("failed")]
    Failed,

    /// Caller should resubmit (numerically apart from the rest)
    #[error("retry")]
    Retry,
}

impl BqsStatus {
    /// Numeric wire code
    #[inline]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParamInvalid => 1,
            Self::InnerError => 2,
            Self::DriverError => 3,
            Self::EasyCommError => 4,
            Self::QueueAuthError => 5,
            Self::QueueIdError => 6,
            Self::EndpointMemTypeNotSupport => 7,
            Self::Timeout => 8,
            Self::NotInit => 9,
            Self::GroupNotExist => 10,
            Self::GroupHasExist => 11,
            Self::GroupExistInRoute => 12,
            Self::EntityExist => 13,
            Self::HcclError => 14,
            Self::DynamicScheduleError => 15,
            Self::NotSupport => 16,
            Self::Failed => 17,
            Self::Retry => 100,
        }
    }

    /// Parse a wire code; `Ok(())` for 0, `None` for unknown codes
    pub const fn from_code(code: i32) -> Option<Result<(), Self>> {
        let status = match code {
            STATUS_OK => return Some(Ok(())),
            1 => Self::ParamInvalid,
            2 => Self::InnerError,
            3 => Self::DriverError,
            4 => Self::EasyCommError,
            5 => Self::QueueAuthError,
            6 => Self::QueueIdError,
            7 => Self::EndpointMemTypeNotSupport,
            8 => Self::Timeout,
            9 => Self::NotInit,
            10 => Self::GroupNotExist,
            11 => Self::GroupHasExist,
            12 => Self::GroupExistInRoute,
            13 => Self::EntityExist,
            14 => Self::HcclError,
            15 => Self::DynamicScheduleError,
            16 => Self::NotSupport,
            17 => Self::Failed,
            100 => Self::Retry,
            _ => return None,
        };
        Some(Err(status))
    }
}

/// Shorthand for scheduler results
pub type StatusResult<T = ()> = std::result::Result<T, BqsStatus>;

/// Wire code of a result
#[inline]
pub fn status_code<T>(result: &StatusResult<T>) -> i32 {
    match result {
        Ok(_) => STATUS_OK,
        Err(status) => status.code(),
    }
}

/// Result from a wire code, treating unknown codes as `InnerError`
#[inline]
pub fn status_from_code(code: i32) -> StatusResult {
    BqsStatus::from_code(code).unwrap_or(Err(BqsStatus::InnerError))
}
