//! Server error types

use std::io;

use thiserror::Error;

use bqs_protocol::{BqsStatus, ProtocolError};

/// Errors raised by the scheduler front ends
#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame or payload could not be decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The scheduler rejected the request
    #[error("request failed: {0}")]
    Status(#[from] BqsStatus),

    /// The router has not been initialized
    #[error("router not initialized")]
    NotInit,

    /// The management task could not reach a ready state
    #[error("router initialization failed: {0}")]
    InitFailed(BqsStatus),

    /// The event loop or the graph worker is gone
    #[error("event channel closed")]
    ChannelClosed,
}

impl ServerError {
    /// Status reported on the wire for this error
    pub fn status(&self) -> BqsStatus {
        match self {
            Self::Io(_) | Self::ChannelClosed => BqsStatus::InnerError,
            Self::Protocol(e) => e.status(),
            Self::Status(status) | Self::InitFailed(status) => *status,
            Self::NotInit => BqsStatus::NotInit,
        }
    }
}

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServerError::Status(BqsStatus::Timeout);
        assert!(err.to_string().contains("request failed"));

        let err = ServerError::InitFailed(BqsStatus::InnerError);
        assert!(err.to_string().contains("initialization failed"));

        let err = ServerError::ChannelClosed;
        assert!(err.to_string().contains("closed"));
    }

    #[test]
    fn test_error_status() {
        assert_eq!(ServerError::NotInit.status(), BqsStatus::NotInit);
        assert_eq!(ServerError::Status(BqsStatus::Timeout).status(), BqsStatus::Timeout);
        assert_eq!(
            ServerError::Protocol(ProtocolError::length_mismatch(10, 12)).status(),
            BqsStatus::EasyCommError
        );
    }
}
