use std::fmt;

use serde::{de, ser};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A Document or Array didn't match its declared length: the terminator byte was missing or
    /// misplaced, the input ended before the declared end, or a nested frame overran its parent.
    #[error("Framing error at byte {offset}: {reason}")]
    Framing { offset: u64, reason: String },
    /// An element type tag that isn't supported. On read this is an unknown or legacy tag; on
    /// write it is a value the writer can't encode.
    #[error("Unsupported element type 0x{tag:02x} at byte {offset}")]
    UnsupportedType { tag: u8, offset: u64 },
    /// A value accessor was called on a token that doesn't hold a compatible value.
    #[error("Type mismatch: expected {expected}, but current token is {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },
    /// The reader or writer was driven out of order: unbalanced start/end calls, a value with no
    /// pending field name, reading past the end of input, or use after a fatal error.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
    /// Failure from the underlying byte source or sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Basic BSON encoding failure: invalid UTF-8, an embedded NUL in a cstring, or a malformed
    /// payload.
    #[error("Basic data encoding failure: {0}")]
    BadEncode(String),
    /// Document was greater than maximum allowed size.
    #[error("Data too long: was {actual} bytes, maximum allowed is {max}")]
    LengthTooLong { max: usize, actual: usize },
    /// Nesting went past the configured depth limit.
    #[error("Hit parsing limit: {0}")]
    ParseLimit(String),
    /// A BSON regular expression couldn't be compiled.
    #[error("Regex compile failure: {0}")]
    Pattern(#[from] regex::Error),
    /// Occurs when serde serialization or deserialization fails
    #[error("{0}")]
    SerdeFail(String),
}

impl Error {
    pub(crate) fn framing(offset: u64, reason: impl Into<String>) -> Self {
        Error::Framing {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::ProtocolViolation(msg.into())
    }

    /// True for the error classes that leave the reader or writer unusable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::TypeMismatch { .. })
    }
}

impl ser::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::SerdeFail(msg.to_string())
    }
}

impl de::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::SerdeFail(msg.to_string())
    }
}
