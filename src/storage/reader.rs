// src/storage/reader.rs
use crate::codec::LogEntry;
use crate::storage::log::discover_segments;
use crate::storage::segment::{record_checksum, segment_file_name, RECORD_HEADER_LEN};
use crate::{Error, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Read-only, memory-mapped view of one segment's `.log` file.
///
/// Doesn't touch the index. Appends made by another writer after the map
/// was taken are simply not seen, but truncating the file underneath a live
/// map (`Log::open` recovering a torn tail, or compaction removing the
/// segment) can fault the reader with SIGBUS. Don't scan a journal while it
/// is being opened or compacted for writing.
#[derive(Debug)]
pub struct SegmentReader {
    path: PathBuf,
    base_offset: u64,
    // None for an empty file, which cannot be mapped portably
    map: Option<Mmap>,
}

impl SegmentReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let base_offset = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| Error::Internal(format!("{:?} is not a segment file", path)))?;

        let file = File::open(&path)?;
        let map = if file.metadata()?.len() == 0 {
            None
        } else {
            // SAFETY: the mapping is read-only and segments are append-only;
            // bytes already written are never rewritten in place.
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(SegmentReader {
            path,
            base_offset,
            map,
        })
    }

    /// Opens every `<base>.log` in `dir`, oldest first. Never creates or
    /// modifies anything; a missing directory is an error.
    pub fn open_dir<P: AsRef<Path>>(dir: P) -> Result<Vec<SegmentReader>> {
        let dir = dir.as_ref();
        discover_segments(dir)?
            .into_iter()
            .map(|base| SegmentReader::open(dir.join(segment_file_name(base))))
            .collect()
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    /// Yields `(absolute_offset, entry)` in order.
    pub fn iter(&self) -> SegmentIter<'_> {
        SegmentIter {
            buf: self.bytes(),
            pos: 0,
            relative: 0,
            base_offset: self.base_offset,
            done: false,
        }
    }
}

#[derive(Debug)]
pub struct SegmentIter<'a> {
    buf: &'a [u8],
    pos: usize,
    relative: u64,
    base_offset: u64,
    done: bool,
}

impl<'a> SegmentIter<'a> {
    fn read_record(&mut self) -> Option<Result<(u64, LogEntry)>> {
        let header_len = RECORD_HEADER_LEN as usize;
        let buf = self.buf;
        let rest = &buf[self.pos..];
        if rest.len() < header_len {
            if !rest.is_empty() {
                log::debug!("torn record header at byte {}", self.pos);
            }
            return None;
        }
        let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let crc = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]);
        let Some(payload) = rest.get(header_len..header_len + len) else {
            log::debug!("torn record payload at byte {}", self.pos);
            return None;
        };

        if record_checksum(self.relative, payload) != crc {
            return Some(Err(Error::ChecksumMismatch {
                position: self.pos as u64,
            }));
        }
        let entry = match LogEntry::decode(payload) {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e.into())),
        };

        let offset = self.base_offset + self.relative;
        self.pos += header_len + len;
        self.relative += 1;
        Some(Ok((offset, entry)))
    }
}

impl<'a> Iterator for SegmentIter<'a> {
    type Item = Result<(u64, LogEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.read_record();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Level;
    use crate::storage::segment::Segment;
    use assert_matches::assert_matches;
    use std::fs;
    use tempfile::tempdir;

    fn write_segment(dir: &Path, base: u64, count: u64) -> PathBuf {
        let mut segment = Segment::open(dir, base, 1 << 20).unwrap();
        segment.recover().unwrap();
        for i in 0..count {
            let entry = LogEntry::new(i, Level::Debug, format!("scan {}", i));
            segment.append(&entry.encode().unwrap()).unwrap();
        }
        segment.flush().unwrap();
        dir.join(segment_file_name(base))
    }

    #[test]
    fn scans_all_records_with_absolute_offsets() {
        let dir = tempdir().unwrap();
        let path = write_segment(dir.path(), 10, 3);

        let reader = SegmentReader::open(&path).unwrap();
        let items: Vec<_> = reader.iter().map(|r| r.unwrap()).collect();
        let offsets: Vec<u64> = items.iter().map(|(o, _)| *o).collect();
        assert_eq!(offsets, [10, 11, 12]);
        assert_eq!(items[2].1.message, "scan 2");
    }

    #[test]
    fn empty_segment_yields_nothing() {
        let dir = tempdir().unwrap();
        let path = write_segment(dir.path(), 0, 0);
        let reader = SegmentReader::open(&path).unwrap();
        assert_eq!(reader.iter().count(), 0);
    }

    #[test]
    fn stops_at_torn_tail() {
        let dir = tempdir().unwrap();
        let path = write_segment(dir.path(), 0, 2);
        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0, 0, 0, 9, 1, 2, 3, 4, 5]);
        fs::write(&path, &bytes).unwrap();

        let reader = SegmentReader::open(&path).unwrap();
        assert_eq!(reader.iter().filter(|r| r.is_ok()).count(), 2);
    }

    #[test]
    fn reports_checksum_mismatch() {
        let dir = tempdir().unwrap();
        let path = write_segment(dir.path(), 0, 1);
        let mut bytes = fs::read(&path).unwrap();
        bytes[5] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let reader = SegmentReader::open(&path).unwrap();
        let mut iter = reader.iter();
        assert_matches!(iter.next(), Some(Err(Error::ChecksumMismatch { position: 0 })));
        assert!(iter.next().is_none());
    }

    #[test]
    fn rejects_non_segment_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.log");
        fs::write(&path, b"").unwrap();
        assert_matches!(SegmentReader::open(&path), Err(Error::Internal(_)));
    }

    #[test]
    fn open_dir_lists_segments_in_order() {
        let dir = tempdir().unwrap();
        write_segment(dir.path(), 5, 2);
        write_segment(dir.path(), 0, 5);
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let readers = SegmentReader::open_dir(dir.path()).unwrap();
        let bases: Vec<u64> = readers.iter().map(SegmentReader::base_offset).collect();
        assert_eq!(bases, [0, 5]);
        assert!(format!("{:?}", readers[0]).contains("base_offset: 0"));
    }

    #[test]
    fn open_dir_does_not_create_missing_dir() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_matches!(SegmentReader::open_dir(&missing), Err(Error::Io(_)));
        assert!(!missing.exists());
    }
}
