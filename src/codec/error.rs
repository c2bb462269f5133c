// src/codec/error.rs
use std::fmt;

/// Which half of a property overflowed its one-byte length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Key,
    Value,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Key => write!(f, "key"),
            Field::Value => write!(f, "value"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// A property key or value is longer than 255 bytes.
    FieldTooLong { field: Field, len: usize },
    /// More than 255 properties on one entry.
    TooManyProperties { count: usize },
    /// Message does not fit the u32 length field.
    MessageTooLong { len: usize },
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingError::FieldTooLong { field, len } => {
                write!(f, "property {} is {} bytes, limit is 255", field, len)
            }
            EncodingError::TooManyProperties { count } => {
                write!(f, "entry has {} properties, limit is 255", count)
            }
            EncodingError::MessageTooLong { len } => {
                write!(f, "message is {} bytes, limit is {}", len, u32::MAX)
            }
        }
    }
}

impl std::error::Error for EncodingError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ended before a fixed or length-prefixed field was complete.
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    /// Field bytes starting at `offset` are not valid UTF-8.
    InvalidText { offset: usize },
    /// Strict decode found bytes after a complete entry.
    TrailingBytes { remaining: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated {
                offset,
                needed,
                available,
            } => write!(
                f,
                "truncated at byte {}: needed {} bytes, {} available",
                offset, needed, available
            ),
            DecodeError::InvalidText { offset } => {
                write!(f, "invalid UTF-8 in field at byte {}", offset)
            }
            DecodeError::TrailingBytes { remaining } => {
                write!(f, "{} unconsumed bytes after entry", remaining)
            }
        }
    }
}

impl std::error::Error for DecodeError {}
