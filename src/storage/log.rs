// src/storage/log.rs
use crate::codec::LogEntry;
use crate::storage::compaction::{CompactionOptions, SegmentStat};
use crate::storage::segment::{Segment, RECORD_HEADER_LEN};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const DEFAULT_MAX_SEGMENT_BYTES: u64 = 1024 * 1024 * 16;

#[derive(Debug, Clone, Copy)]
pub struct LogConfig {
    pub max_segment_bytes: u64,
    pub compaction: CompactionOptions,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            max_segment_bytes: DEFAULT_MAX_SEGMENT_BYTES,
            compaction: CompactionOptions::default(),
        }
    }
}

/// Append-only journal of encoded entries, split into segment files
/// named by the offset of their first record.
pub struct Log {
    log_dir: PathBuf,
    active_segment: Segment,
    segments: BTreeMap<u64, Segment>, // finalized (non-active) segments
    config: LogConfig,
}

impl Log {
    pub fn open<P: AsRef<Path>>(log_dir: P, config: LogConfig) -> Result<Self> {
        let log_dir = log_dir.as_ref();
        fs::create_dir_all(log_dir)?;

        let mut segments = BTreeMap::new();
        for base_offset in discover_segments(log_dir)? {
            let mut segment = Segment::open(log_dir, base_offset, config.max_segment_bytes)?;
            segment.recover()?;
            segments.insert(base_offset, segment);
        }

        let active_segment = match segments.pop_last() {
            Some((_, last)) if !last.is_full() => last,
            Some((base_offset, last)) => {
                let next_base = last.next_offset();
                segments.insert(base_offset, last);
                let mut fresh = Segment::open(log_dir, next_base, config.max_segment_bytes)?;
                fresh.recover()?;
                fresh
            }
            None => {
                let mut fresh = Segment::open(log_dir, 0, config.max_segment_bytes)?;
                fresh.recover()?;
                fresh
            }
        };

        log::info!(
            "Opened log at {:?}: {} segments, next offset {}",
            log_dir,
            segments.len() + 1,
            active_segment.next_offset()
        );

        Ok(Log {
            log_dir: log_dir.to_path_buf(),
            active_segment,
            segments,
            config,
        })
    }

    /// Encodes and appends `entry`, returning its offset.
    pub fn append(&mut self, entry: &LogEntry) -> Result<u64> {
        let payload = entry.encode()?;
        self.append_encoded(&payload)
    }

    /// Appends an already-encoded entry. The caller vouches that `payload`
    /// decodes; it is stored as-is.
    pub fn append_encoded(&mut self, payload: &[u8]) -> Result<u64> {
        let record_len = RECORD_HEADER_LEN + payload.len() as u64;
        if record_len > self.config.max_segment_bytes {
            return Err(Error::EntryTooLarge {
                len: payload.len(),
                max_segment_bytes: self.config.max_segment_bytes,
            });
        }

        if self.active_segment.is_full() {
            self.roll_segment()?;
        }
        if let Some(offset) = self.active_segment.append(payload)? {
            return Ok(offset);
        }

        // Not enough room left in the active segment.
        self.roll_segment()?;
        self.active_segment.append(payload)?.ok_or_else(|| {
            Error::Internal("fresh segment rejected a record that fits".to_string())
        })
    }

    fn roll_segment(&mut self) -> Result<()> {
        self.active_segment.flush()?;

        let next_base = self.active_segment.next_offset();
        let mut fresh = Segment::open(&self.log_dir, next_base, self.config.max_segment_bytes)?;
        fresh.recover()?;

        let old = std::mem::replace(&mut self.active_segment, fresh);
        log::debug!(
            "Rolled segment {} ({} bytes), new segment starts at {}",
            old.base_offset,
            old.size_bytes(),
            next_base
        );
        self.segments.insert(old.base_offset, old);
        Ok(())
    }

    /// Entry at `offset`, or None if it was never written or has been compacted away.
    pub fn read(&mut self, offset: u64) -> Result<Option<LogEntry>> {
        if self.active_segment.contains(offset) {
            let relative = offset - self.active_segment.base_offset;
            return self.active_segment.read(relative);
        }
        match self.segments.range_mut(..=offset).next_back() {
            Some((&base, segment)) if segment.contains(offset) => segment.read(offset - base),
            _ => Ok(None),
        }
    }

    pub fn next_offset(&self) -> u64 {
        self.active_segment.next_offset()
    }

    /// Oldest offset still stored.
    pub fn first_offset(&self) -> u64 {
        self.segments
            .keys()
            .next()
            .copied()
            .unwrap_or(self.active_segment.base_offset)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len() + 1
    }

    /// `.log` files oldest first, active segment last.
    pub fn segment_paths(&self) -> Vec<PathBuf> {
        self.segments
            .values()
            .map(|s| s.file_path.clone())
            .chain(std::iter::once(self.active_segment.file_path.clone()))
            .collect()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.active_segment.flush()?;
        for segment in self.segments.values_mut() {
            segment.flush()?;
        }
        Ok(())
    }

    /// Applies the configured compaction policy; returns how many segments were removed.
    pub fn compact(&mut self) -> Result<usize> {
        let mut stats = Vec::with_capacity(self.segments.len());
        for segment in self.segments.values() {
            stats.push(SegmentStat {
                base_offset: segment.base_offset,
                size_bytes: segment.size_bytes(),
                modified: segment.modified()?,
            });
        }

        let count = self.config.compaction.policy.removable(
            &stats,
            self.active_segment.size_bytes(),
            SystemTime::now(),
        );
        for stat in &stats[..count] {
            if let Some(segment) = self.segments.remove(&stat.base_offset) {
                log::info!(
                    "Compaction removing segment {} ({} bytes)",
                    stat.base_offset,
                    stat.size_bytes
                );
                segment.remove()?;
            }
        }
        Ok(count)
    }
}

// Base offsets of every `<u64>.log` file in `dir`.
pub(crate) fn discover_segments(dir: &Path) -> Result<Vec<u64>> {
    let mut bases = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().map_or(true, |ext| ext != "log") {
            continue;
        }
        match path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
        {
            Some(base) => bases.push(base),
            None => log::warn!("Ignoring unrecognised file {:?}", path),
        }
    }
    bases.sort_unstable();
    Ok(bases)
}
