// src/codec/chunk.rs
use super::entry::LogEntry;
use super::error::DecodeError;

/// Decodes entries from a byte stream that arrives in arbitrary pieces,
/// e.g. socket reads or file chunks.
///
/// Complete entries are yielded as soon as their last byte has been pushed;
/// a partial entry stays buffered until more data arrives. Any error other
/// than truncation is returned once and the decoder yields nothing after it.
/// Error offsets are relative to `stream_position()` at the time of failure.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    buf: Vec<u8>,
    // start of the first undecoded entry within `buf`
    pos: usize,
    // bytes dropped from the front of `buf` so far
    consumed: u64,
    failed: bool,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.consumed += self.pos as u64;
            self.pos = 0;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Stream offset of the next entry to be decoded.
    pub fn stream_position(&self) -> u64 {
        self.consumed + self.pos as u64
    }

    /// Bytes buffered but not yet part of a decoded entry.
    pub fn pending(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn next_entry(&mut self) -> Option<Result<LogEntry, DecodeError>> {
        if self.failed || self.pos >= self.buf.len() {
            return None;
        }
        match LogEntry::decode_from(&self.buf[self.pos..], 0) {
            Ok((entry, len)) => {
                self.pos += len;
                Some(Ok(entry))
            }
            Err(DecodeError::Truncated { .. }) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }

    /// Call at end of stream; a leftover partial entry is reported as
    /// `Truncated`. Entries not yet taken with `next_entry` are dropped.
    pub fn finish(self) -> Result<(), DecodeError> {
        if self.failed || self.pending() == 0 {
            return Ok(());
        }
        LogEntry::decode_from(&self.buf[self.pos..], 0).map(|_| ())
    }
}

impl Iterator for ChunkDecoder {
    type Item = Result<LogEntry, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Level;
    use assert_matches::assert_matches;

    fn entries() -> Vec<LogEntry> {
        vec![
            LogEntry::new(1, Level::Info, "first").with_property("host", "web-1"),
            LogEntry::new(2, Level::Debug, ""),
            LogEntry::new(3, Level::Error, "thïrd").with_property("k", "v").with_property("", ""),
        ]
    }

    fn stream() -> Vec<u8> {
        let mut buf = Vec::new();
        for entry in entries() {
            entry.encode_into(&mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn every_split_point_yields_all_entries() {
        let bytes = stream();
        for split in 0..=bytes.len() {
            let mut decoder = ChunkDecoder::new();
            let mut decoded = Vec::new();

            decoder.push(&bytes[..split]);
            decoded.extend(decoder.by_ref().map(|r| r.unwrap()));
            decoder.push(&bytes[split..]);
            decoded.extend(decoder.by_ref().map(|r| r.unwrap()));

            assert_eq!(decoded, entries(), "split at {}", split);
            assert_eq!(decoder.stream_position(), bytes.len() as u64);
            assert_eq!(decoder.finish(), Ok(()));
        }
    }

    #[test]
    fn byte_at_a_time() {
        let bytes = stream();
        let mut decoder = ChunkDecoder::new();
        let mut decoded = Vec::new();
        for b in &bytes {
            decoder.push(std::slice::from_ref(b));
            decoded.extend(decoder.by_ref().map(|r| r.unwrap()));
        }
        assert_eq!(decoded, entries());
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn partial_tail_waits_for_more_data() {
        let bytes = stream();
        let first_len = entries()[0].encoded_len();
        let mut decoder = ChunkDecoder::new();
        decoder.push(&bytes[..first_len + 3]);

        assert_matches!(decoder.next_entry(), Some(Ok(_)));
        assert!(decoder.next_entry().is_none());
        assert_eq!(decoder.pending(), 3);
        assert_eq!(decoder.stream_position(), first_len as u64);
        assert_matches!(decoder.finish(), Err(DecodeError::Truncated { .. }));
    }

    #[test]
    fn invalid_text_is_reported_once() {
        let mut bytes = LogEntry::new(0, Level::Info, "ok").encode().unwrap();
        bytes[14] = 0xff;
        let mut decoder = ChunkDecoder::new();
        decoder.push(&stream());
        decoder.push(&bytes);

        assert_eq!(decoder.by_ref().take(3).filter(|r| r.is_ok()).count(), 3);
        assert_matches!(
            decoder.next_entry(),
            Some(Err(DecodeError::InvalidText { offset: 14 }))
        );
        assert!(decoder.next_entry().is_none());

        decoder.push(&stream());
        assert!(decoder.next_entry().is_none());
    }
}
