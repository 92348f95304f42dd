// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Library Error types

use thiserror::Error;

use crate::frame::{ExceptionResponse, FunctionCode};

/// A specialized [`Result`](std::result::Result) type for Modbus operations.
pub type Result<T> = std::result::Result<T, self::Error>;

/// Construction-time validation failure.
///
/// These are signalled synchronously by the request/response
/// constructors and never enter the transaction queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The quantity of coils or registers is outside the range the
    /// function code permits.
    #[error("function 0x{function:0>2X}: quantity {quantity} out of range 1..={max}")]
    QuantityOutOfRange {
        function: FunctionCode,
        quantity: usize,
        max: u16,
    },

    /// The addressed range would run past the end of the 16 bit
    /// address space.
    #[error(
        "function 0x{function:0>2X}: address 0x{address:0>4X} + quantity {quantity} exceeds 0xFFFF"
    )]
    AddressOverflow {
        function: FunctionCode,
        address: u16,
        quantity: u16,
    },
}

/// Modbus errors.
#[derive(Debug, Error)]
pub enum Error {
    /// No response arrived within the transaction timeout.
    #[error("response timed out")]
    ResponseTimeout,

    /// A frame arrived whose CRC-16 or LRC did not verify.
    #[error("invalid checksum: expected = 0x{expected:0>4X}, actual = 0x{actual:0>4X}")]
    InvalidChecksum { expected: u16, actual: u16 },

    /// A complete frame or PDU whose contents are inconsistent.
    #[error("invalid response data: {0}")]
    InvalidResponseData(&'static str),

    /// Not enough bytes for a complete frame or PDU.
    #[error("incomplete response frame")]
    IncompleteResponseFrame,

    /// The connection closed while the transaction was pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer rejected the request with a Modbus exception.
    #[error(transparent)]
    Exception(#[from] ExceptionResponse),

    /// Invalid request or response parameters.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// General I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Frame-shaped failures are retried while the transaction has
    /// retry budget left. Exceptions express the peer's semantic
    /// rejection and are final, as are validation and connection
    /// errors.
    pub(crate) const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ResponseTimeout
                | Self::InvalidChecksum { .. }
                | Self::InvalidResponseData(_)
                | Self::IncompleteResponseFrame
        )
    }
}
