// src/storage/segment.rs
//
// Record layout in a .log file:
//   [u32 BE payload_len][u32 BE crc32(relative_offset BE ++ payload)][payload]
// The payload is one codec-encoded LogEntry.

use crate::codec::LogEntry;
use crate::storage::index::Index;
use crate::{Error, Result};
use crc32fast::Hasher;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const RECORD_HEADER_LEN: u64 = 8;

/// Checksum binds the payload to its slot so a misdirected read is detected.
pub fn record_checksum(relative_offset: u64, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&relative_offset.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}

pub fn segment_file_name(base_offset: u64) -> String {
    format!("{}.log", base_offset)
}

// A single segment file in the log, plus its index.
pub struct Segment {
    pub base_offset: u64,
    pub file_path: PathBuf,
    current_relative_offset: u64,
    file: File,
    index: Index,
    max_segment_bytes: u64,
    current_data_bytes: u64,
}

impl Segment {
    // Opens or creates the .log/.index pair. Call `recover` before use.
    pub fn open<P: AsRef<Path>>(dir: P, base_offset: u64, max_segment_bytes: u64) -> Result<Self> {
        let file_path = dir.as_ref().join(segment_file_name(base_offset));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&file_path)?;
        let index = Index::open(dir.as_ref(), base_offset)?;

        Ok(Segment {
            base_offset,
            file_path,
            current_relative_offset: 0,
            file,
            index,
            max_segment_bytes,
            current_data_bytes: 0,
        })
    }

    /// Brings the index in line with the .log file.
    ///
    /// Scanning starts after the last indexed record when that record is
    /// intact, otherwise from the beginning with a fresh index. A torn or
    /// corrupt tail is truncated away.
    pub fn recover(&mut self) -> Result<()> {
        self.index.load()?;
        let file_len = self.file.metadata()?.len();

        let (mut pos, mut relative) = match self.index.last() {
            Some(last) => match self.record_end(last.position, file_len)? {
                Some(end) => (end, last.relative_offset + 1),
                None => {
                    log::warn!(
                        "Segment {}: index points past the end of {:?}, rebuilding",
                        self.base_offset,
                        self.file_path
                    );
                    self.index.reset()?;
                    (0, 0)
                }
            },
            None => (0, 0),
        };

        loop {
            if pos == file_len {
                break;
            }
            let Some(end) = self.record_end(pos, file_len)? else {
                log::warn!(
                    "Segment {}: torn record at byte {}, truncating {:?}",
                    self.base_offset,
                    pos,
                    self.file_path
                );
                self.file.set_len(pos)?;
                break;
            };

            let (stored_crc, payload) = self.read_record_at(pos)?;
            if record_checksum(relative, &payload) != stored_crc {
                log::warn!(
                    "Segment {}: checksum mismatch at byte {}, truncating {:?}",
                    self.base_offset,
                    pos,
                    self.file_path
                );
                self.file.set_len(pos)?;
                break;
            }

            if self.index.find_position(relative) != Some(pos) {
                self.index.add_entry(relative, pos)?;
            }
            pos = end;
            relative += 1;
        }

        self.current_data_bytes = pos;
        self.current_relative_offset = relative;
        self.file.seek(SeekFrom::Start(pos))?;
        self.index.sync_all()?;
        log::debug!(
            "Segment {} recovered: {} records, {} bytes",
            self.base_offset,
            relative,
            pos
        );
        Ok(())
    }

    // End position of the record starting at `pos`, or None if it runs past `file_len`.
    fn record_end(&mut self, pos: u64, file_len: u64) -> Result<Option<u64>> {
        if pos + RECORD_HEADER_LEN > file_len {
            return Ok(None);
        }
        self.file.seek(SeekFrom::Start(pos))?;
        let mut len_bytes = [0u8; 4];
        self.file.read_exact(&mut len_bytes)?;
        let end = pos + RECORD_HEADER_LEN + u32::from_be_bytes(len_bytes) as u64;
        Ok((end <= file_len).then_some(end))
    }

    fn read_record_at(&mut self, pos: u64) -> Result<(u32, Vec<u8>)> {
        self.file.seek(SeekFrom::Start(pos))?;
        let mut header = [0u8; RECORD_HEADER_LEN as usize];
        self.file.read_exact(&mut header)?;
        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let crc = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

        let mut payload = vec![0u8; len as usize];
        self.file.read_exact(&mut payload)?;
        Ok((crc, payload))
    }

    /// Appends one encoded entry. Returns its absolute offset, or None when
    /// the record does not fit in the remaining space.
    pub fn append(&mut self, payload: &[u8]) -> Result<Option<u64>> {
        let record_len = RECORD_HEADER_LEN + payload.len() as u64;
        if self.current_data_bytes + record_len > self.max_segment_bytes {
            return Ok(None);
        }
        let payload_len = u32::try_from(payload.len()).map_err(|_| Error::EntryTooLarge {
            len: payload.len(),
            max_segment_bytes: self.max_segment_bytes,
        })?;

        let position = self.current_data_bytes;
        let checksum = record_checksum(self.current_relative_offset, payload);

        self.file.seek(SeekFrom::Start(position))?;
        self.file.write_all(&payload_len.to_be_bytes())?;
        self.file.write_all(&checksum.to_be_bytes())?;
        self.file.write_all(payload)?;

        self.index.add_entry(self.current_relative_offset, position)?;

        let absolute_offset = self.base_offset + self.current_relative_offset;
        self.current_data_bytes += record_len;
        self.current_relative_offset += 1;
        Ok(Some(absolute_offset))
    }

    /// Reads the entry at `relative_offset`; None if it was never written.
    pub fn read(&mut self, relative_offset: u64) -> Result<Option<LogEntry>> {
        let Some(position) = self.index.find_position(relative_offset) else {
            return Ok(None);
        };
        let (stored_crc, payload) = self.read_record_at(position)?;
        if record_checksum(relative_offset, &payload) != stored_crc {
            return Err(Error::ChecksumMismatch { position });
        }
        Ok(Some(LogEntry::decode(&payload)?))
    }

    pub fn is_full(&self) -> bool {
        self.current_data_bytes >= self.max_segment_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.current_relative_offset == 0
    }

    /// Offset the next appended record will receive.
    pub fn next_offset(&self) -> u64 {
        self.base_offset + self.current_relative_offset
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.base_offset && offset < self.next_offset()
    }

    pub fn size_bytes(&self) -> u64 {
        self.current_data_bytes
    }

    pub fn modified(&self) -> Result<SystemTime> {
        Ok(self.file.metadata()?.modified()?)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        self.index.sync_all()
    }

    /// Deletes both files of this segment.
    pub fn remove(self) -> Result<()> {
        let Segment {
            file_path, index, file, ..
        } = self;
        let index_path = index.file_path.clone();
        drop(file);
        drop(index);
        fs::remove_file(&file_path)?;
        fs::remove_file(&index_path)?;
        Ok(())
    }
}
