pub mod compaction;
pub mod index;
pub mod log;
pub mod reader;
pub mod segment;

pub use self::log::{Log, LogConfig, DEFAULT_MAX_SEGMENT_BYTES};
pub use compaction::{CompactionOptions, CompactionPolicy};
pub use reader::SegmentReader;
