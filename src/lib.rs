pub mod broker;
pub mod codec;
pub mod generator;
pub mod query;
pub mod storage;

pub use codec::{ChunkDecoder, DecodeError, EncodingError, Level, LogEntry, Property};
pub use query::{Query, QueryError};

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Serialization(bincode::Error),
    Encoding(EncodingError),
    Decode(DecodeError),
    ChecksumMismatch { position: u64 },
    /// Record cannot fit even in an empty segment.
    EntryTooLarge { len: usize, max_segment_bytes: u64 },
    FrameTooLarge { len: usize, max: usize },
    /// The ingest server refused a frame.
    Rejected(String),
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Serialization(e) => write!(f, "Serialization error: {}", e),
            Error::Encoding(e) => write!(f, "Encoding error: {}", e),
            Error::Decode(e) => write!(f, "Decode error: {}", e),
            Error::ChecksumMismatch { position } => {
                write!(f, "Checksum mismatch for record at byte {}", position)
            }
            Error::EntryTooLarge {
                len,
                max_segment_bytes,
            } => write!(
                f,
                "Entry of {} bytes does not fit a segment of {} bytes",
                len, max_segment_bytes
            ),
            Error::FrameTooLarge { len, max } => {
                write!(f, "Frame of {} bytes exceeds limit of {}", len, max)
            }
            Error::Rejected(reason) => write!(f, "Rejected by server: {}", reason),
            Error::Internal(s) => write!(f, "Internal error: {}", s),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Serialization(e) => Some(e),
            Error::Encoding(e) => Some(e),
            Error::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e)
    }
}

impl From<EncodingError> for Error {
    fn from(e: EncodingError) -> Self {
        Error::Encoding(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}
