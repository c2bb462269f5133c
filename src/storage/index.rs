// src/storage/index.rs
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Maps a record's offset within its segment to its byte position in the `.log` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub relative_offset: u64,
    pub position: u64,
}

pub struct Index {
    pub(crate) file_path: PathBuf,
    file: File,
    entries: Vec<IndexEntry>,
    entry_size: usize,
}

impl Index {
    pub fn open<P: AsRef<Path>>(dir: P, segment_base_offset: u64) -> Result<Self> {
        let file_path = dir.as_ref().join(format!("{}.index", segment_base_offset));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&file_path)?;

        // bincode's default config encodes u64 fixed-width, so every record has the same size.
        let entry_size = bincode::serialized_size(&IndexEntry {
            relative_offset: 0,
            position: 0,
        })? as usize;
        if entry_size == 0 {
            return Err(Error::Internal(
                "IndexEntry serialized size is zero".to_string(),
            ));
        }

        Ok(Index {
            file_path,
            file,
            entries: Vec::new(),
            entry_size,
        })
    }

    /// Reads every complete record from disk. A partial, undecodable or
    /// out-of-order tail is cut from the file so later appends stay aligned.
    pub fn load(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.entries.clear();

        let mut entry_buf = vec![0u8; self.entry_size];
        loop {
            match self.file.read_exact(&mut entry_buf) {
                Ok(()) => match bincode::deserialize::<IndexEntry>(&entry_buf) {
                    Ok(entry) => {
                        let in_order = self
                            .entries
                            .last()
                            .map_or(true, |last| entry.relative_offset > last.relative_offset);
                        if !in_order {
                            log::warn!(
                                "{:?}: out-of-order index record {:?}, ignoring the rest",
                                self.file_path,
                                entry
                            );
                            break;
                        }
                        self.entries.push(entry);
                    }
                    Err(e) => {
                        log::warn!(
                            "{:?}: failed to decode index record: {}. Assuming end of valid entries.",
                            self.file_path,
                            e
                        );
                        break;
                    }
                },
                Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
        }

        let valid_len = (self.entries.len() * self.entry_size) as u64;
        if self.file.metadata()?.len() > valid_len {
            log::warn!(
                "{:?}: truncating index to {} records",
                self.file_path,
                self.entries.len()
            );
            self.file.set_len(valid_len)?;
        }
        Ok(())
    }

    pub fn add_entry(&mut self, relative_offset: u64, position: u64) -> Result<()> {
        let entry = IndexEntry {
            relative_offset,
            position,
        };
        let encoded = bincode::serialize(&entry)?;
        if encoded.len() != self.entry_size {
            return Err(Error::Internal(format!(
                "index record size mismatch for {:?}: expected {}, got {}",
                self.file_path,
                self.entry_size,
                encoded.len()
            )));
        }

        self.file.write_all(&encoded)?;
        self.entries.push(entry);
        Ok(())
    }

    /// Drops every record on disk and in memory.
    pub fn reset(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.entries.clear();
        Ok(())
    }

    pub fn find_position(&self, relative_offset: u64) -> Option<u64> {
        self.entries
            .binary_search_by_key(&relative_offset, |e| e.relative_offset)
            .ok()
            .map(|idx| self.entries[idx].position)
    }

    pub fn last(&self) -> Option<IndexEntry> {
        self.entries.last().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sync_all(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn entries_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut index = Index::open(dir.path(), 0).unwrap();
            index.add_entry(0, 0).unwrap();
            index.add_entry(1, 40).unwrap();
            index.add_entry(2, 97).unwrap();
            index.sync_all().unwrap();
        }

        let mut index = Index::open(dir.path(), 0).unwrap();
        assert!(index.is_empty());
        index.load().unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.find_position(1), Some(40));
        assert_eq!(index.find_position(3), None);
        assert_eq!(
            index.last(),
            Some(IndexEntry {
                relative_offset: 2,
                position: 97
            })
        );
    }

    #[test]
    fn partial_tail_record_is_ignored() {
        let dir = tempdir().unwrap();
        let path;
        {
            let mut index = Index::open(dir.path(), 7).unwrap();
            index.add_entry(0, 0).unwrap();
            path = index.file_path.clone();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();

        let mut index = Index::open(dir.path(), 7).unwrap();
        index.load().unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(fs::metadata(&path).unwrap().len(), 16);

        index.add_entry(1, 33).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 32);
        let mut index = Index::open(dir.path(), 7).unwrap();
        index.load().unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.find_position(1), Some(33));
    }

    #[test]
    fn out_of_order_tail_is_cut() {
        let dir = tempdir().unwrap();
        let mut index = Index::open(dir.path(), 0).unwrap();
        index.add_entry(0, 0).unwrap();
        index.add_entry(1, 20).unwrap();
        index.add_entry(1, 40).unwrap();

        let mut index = Index::open(dir.path(), 0).unwrap();
        index.load().unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(fs::metadata(&index.file_path).unwrap().len(), 32);
        index.add_entry(2, 40).unwrap();

        index.load().unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.find_position(2), Some(40));
    }

    #[test]
    fn reset_truncates_file() {
        let dir = tempdir().unwrap();
        let mut index = Index::open(dir.path(), 0).unwrap();
        index.add_entry(0, 0).unwrap();
        index.reset().unwrap();
        assert!(index.is_empty());

        index.load().unwrap();
        assert!(index.is_empty());
        assert_eq!(std::fs::metadata(&index.file_path).unwrap().len(), 0);
    }
}
