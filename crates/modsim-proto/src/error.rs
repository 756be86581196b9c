// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol-level errors.
//!
//! These are bounded by the lifetime of one TCP connection: the engine
//! closes the connection and the error is logged at debug. Nothing here
//! reaches the supervisor.

use thiserror::Error;

/// A Result type with ProtocolError.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that terminate a Modbus/TCP connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The MBAP protocol identifier was not zero.
    #[error("invalid protocol id: 0x{actual:04X}")]
    InvalidProtocolId {
        /// The value found on the wire.
        actual: u16,
    },

    /// The MBAP length field is outside the valid ADU range.
    #[error("invalid frame length: {length}")]
    InvalidFrameLength {
        /// The value found on the wire.
        length: u16,
    },

    /// The connection delivered a truncated frame body.
    #[error("truncated frame body")]
    TruncatedBody,

    /// A configured read or write deadline expired.
    #[error("connection deadline expired")]
    DeadlineExpired,

    /// Transport-level I/O failure.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        let err = ProtocolError::InvalidProtocolId { actual: 1 };
        assert_eq!(err.to_string(), "invalid protocol id: 0x0001");

        let err = ProtocolError::InvalidFrameLength { length: 300 };
        assert_eq!(err.to_string(), "invalid frame length: 300");
    }
}
