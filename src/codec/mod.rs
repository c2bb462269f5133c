//! Binary codec for structured log entries.
//!
//! An entry is a 10-byte header (timestamp, level, property count), the
//! length-prefixed properties in order, then a u32-length-prefixed
//! message. All integers are little-endian. The codec itself is stateless;
//! `ChunkDecoder` adds the buffering needed for streams that arrive in
//! pieces.

pub mod chunk;
mod cursor;
pub mod entry;
pub mod error;
pub mod level;
pub mod property;

pub use chunk::ChunkDecoder;
pub use entry::{EntryDecoder, LogEntry, HEADER_LEN, MAX_PROPERTIES};
pub use error::{DecodeError, EncodingError, Field};
pub use level::{level_name, Level};
pub use property::{Property, MAX_FIELD_LEN};
