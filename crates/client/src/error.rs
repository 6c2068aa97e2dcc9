//! Client error types

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use bqs_protocol::{BqsStatus, MsgType, ProtocolError};

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors returned by `BqsClient`
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connecting gave up
    #[error("failed to connect to {path} after {attempts} attempts: {source}")]
    Connect {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// Socket I/O failed after connecting
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A reply frame could not be decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The scheduler answered with a failure status
    #[error("request failed: {0}")]
    Status(#[from] BqsStatus),

    /// Reply type or body does not answer the request
    #[error("unexpected reply to {request:?}: {reply}")]
    UnexpectedReply { request: MsgType, reply: String },

    /// Reply carries a different number of results than items sent
    #[error("expected {expected} results, got {actual}")]
    ResultCount { expected: usize, actual: usize },

    /// The server closed the connection
    #[error("connection closed by server")]
    Closed,
}

impl ClientError {
    pub fn unexpected_reply(request: MsgType, reply: impl std::fmt::Debug) -> Self {
        Self::UnexpectedReply {
            request,
            reply: format!("{reply:?}"),
        }
    }

    /// Status equivalent of this error
    pub fn status(&self) -> BqsStatus {
        match self {
            Self::Connect { .. } | Self::Io(_) | Self::Closed => BqsStatus::EasyCommError,
            Self::Protocol(e) => e.status(),
            Self::Status(status) => *status,
            Self::UnexpectedReply { .. } | Self::ResultCount { .. } => BqsStatus::EasyCommError,
        }
    }
}
