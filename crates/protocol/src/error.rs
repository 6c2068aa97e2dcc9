//! Protocol error types
//!
//! Errors raised while framing or parsing scheduler messages.

use thiserror::Error;

use crate::status::BqsStatus;

/// Errors that can occur during protocol operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Declared length does not match the bytes received
    #[error("length mismatch: head declares {declared} bytes, received {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Buffer is too short to contain the next field
    #[error("message too short: expected at least {expected} bytes, got {actual}")]
    MessageTooShort { expected: usize, actual: usize },

    /// Unknown discriminant for an enum field
    #[error("invalid {field}: {value}")]
    InvalidValue { field: &'static str, value: u32 },

    /// Body does not match the message type
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Length arithmetic overflowed 32 bits
    #[error("length overflow in {0}")]
    Overflow(&'static str),
}

impl ProtocolError {
    #[inline]
    pub fn length_mismatch(declared: usize, actual: usize) -> Self {
        Self::LengthMismatch { declared, actual }
    }

    #[inline]
    pub fn too_short(expected: usize, actual: usize) -> Self {
        Self::MessageTooShort { expected, actual }
    }

    #[inline]
    pub fn invalid_value(field: &'static str, value: u32) -> Self {
        Self::InvalidValue { field, value }
    }

    #[inline]
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// True for framing failures (transport level rather than content)
    pub fn is_comm_error(&self) -> bool {
        matches!(self, Self::LengthMismatch { .. })
    }

    /// Status reported to the peer for this error
    pub fn status(&self) -> BqsStatus {
        match self {
            Self::LengthMismatch { .. } => BqsStatus::EasyCommError,
            Self::Overflow(_) => BqsStatus::InnerError,
            _ => BqsStatus::ParamInvalid,
        }
    }
}

impl From<ProtocolError> for BqsStatus {
    fn from(err: ProtocolError) -> Self {
        err.status()
    }
}
