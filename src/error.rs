// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Library Error type
//!
//! [`Error`] is a richer alternative to the bare [`std::io::Error`] that
//! flows through the [`client`](crate::client) and
//! [`server`](crate::server) call paths. It distinguishes a protocol
//! exception, a framing defect (bad CRC/LRC, truncated ADU) and a
//! transport failure, which callers that need to react differently to
//! each (e.g. retry on [`Error::Transport`] but not on
//! [`Error::Exception`]) can match on directly.

use thiserror::Error as ThisError;

use crate::frame::ExceptionResponse;

/// A specialized [Result] type for Modbus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Modbus errors.
#[derive(Debug, ThisError)]
pub enum Error {
    /// The server replied with a Modbus exception.
    #[error("Modbus exception: {0}")]
    Exception(ExceptionResponse),

    /// A frame could not be decoded: bad CRC/LRC, malformed ASCII
    /// envelope, or an ADU length that could not be determined.
    #[error("Modbus frame error: {0}")]
    Frame(FrameError),

    /// The underlying transport failed, e.g. a closed socket or serial
    /// port, or a request that timed out waiting for a response.
    #[error("Modbus transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// A defect detected while decoding a frame, independent of the
/// physical transport it arrived on.
#[derive(Debug, ThisError)]
pub enum FrameError {
    /// RTU CRC-16 mismatch.
    #[error("invalid CRC: expected = 0x{expected:04X}, actual = 0x{actual:04X}")]
    Crc { expected: u16, actual: u16 },

    /// ASCII LRC mismatch.
    #[error("invalid LRC: expected = 0x{expected:02X}, actual = 0x{actual:02X}")]
    Lrc { expected: u8, actual: u8 },

    /// An ASCII frame was missing its leading `:` marker.
    #[error("ASCII frame missing ':' marker")]
    AsciiMissingColon,

    /// An ASCII frame was missing its trailing CRLF.
    #[error("ASCII frame missing CRLF terminator")]
    AsciiMissingCrLf,

    /// An ASCII frame contained a non-hexadecimal character.
    #[error("invalid ASCII hex character: {0:?}")]
    AsciiBadChar(char),

    /// The response header (transaction id, unit id, or slave id) did
    /// not match the request that produced it.
    #[error("response header does not match request")]
    HeaderMismatch,
}

impl From<ExceptionResponse> for Error {
    fn from(value: ExceptionResponse) -> Self {
        Error::Exception(value)
    }
}

impl From<FrameError> for Error {
    fn from(value: FrameError) -> Self {
        Error::Frame(value)
    }
}

impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Transport(io) => io,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}
