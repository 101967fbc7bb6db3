//! # Stream Errors
//!
//! Decoding failures for the binary protocol.

use thiserror::Error;

/// Errors produced while reading a binary stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The stream ended before the requested field.
    #[error("stream underflow: needed {needed} bytes, {remaining} remaining")]
    Underflow {
        /// Bytes the read required.
        needed: usize,
        /// Bytes left in the stream.
        remaining: usize,
    },

    /// A field decoded to a value outside its domain.
    #[error("invalid {what}: {value}")]
    InvalidValue {
        /// Name of the field.
        what: &'static str,
        /// Raw value read.
        value: u64,
    },

    /// A string field was not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// Bytes were left over after a complete message was read.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// Result type for stream decoding.
pub type StreamResult<T> = Result<T, StreamError>;
