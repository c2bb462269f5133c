// src/codec/entry.rs
//
// Layout (little-endian):
//   [u64 timestamp][u8 level][u8 property_count]
//   property_count x [u8 key_len][key][u8 value_len][value]
//   [u32 message_len][message]

use super::cursor::Cursor;
use super::error::{DecodeError, EncodingError};
use super::level::level_name;
use super::property::Property;

/// timestamp + level + property count
pub const HEADER_LEN: usize = 10;
pub const MAX_PROPERTIES: usize = u8::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Opaque to the codec; producers in this crate use epoch milliseconds.
    pub timestamp: u64,
    pub level: u8,
    pub properties: Vec<Property>,
    pub message: String,
}

impl LogEntry {
    pub fn new(timestamp: u64, level: impl Into<u8>, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            level: level.into(),
            properties: Vec::new(),
            message: message.into(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push(Property::new(key, value));
        self
    }

    pub fn level_name(&self) -> &'static str {
        level_name(self.level)
    }

    /// Exact size of `encode()`'s output.
    pub fn encoded_len(&self) -> usize {
        let props: usize = self.properties.iter().map(Property::encoded_len).sum();
        HEADER_LEN + props + 4 + self.message.len()
    }

    /// Checks every length limit without writing anything.
    pub fn validate(&self) -> Result<(), EncodingError> {
        if self.properties.len() > MAX_PROPERTIES {
            return Err(EncodingError::TooManyProperties {
                count: self.properties.len(),
            });
        }
        for property in &self.properties {
            property.validate()?;
        }
        message_len_field(self.message.len())?;
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        self.validate()?;
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.write_validated(&mut buf);
        Ok(buf)
    }

    /// Appends the encoding to `buf`; on error `buf` is unchanged.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.validate()?;
        buf.reserve(self.encoded_len());
        self.write_validated(buf);
        Ok(())
    }

    fn write_validated(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.push(self.level);
        buf.push(self.properties.len() as u8);
        for property in &self.properties {
            property.write_validated(buf);
        }
        buf.extend_from_slice(&(self.message.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.message.as_bytes());
    }

    /// Strict decode: `buf` must hold exactly one entry.
    pub fn decode(buf: &[u8]) -> Result<LogEntry, DecodeError> {
        let (entry, end) = Self::decode_from(buf, 0)?;
        if end != buf.len() {
            return Err(DecodeError::TrailingBytes {
                remaining: buf.len() - end,
            });
        }
        Ok(entry)
    }

    /// Streaming decode: reads one entry at `offset` and returns the
    /// position just past it, so back-to-back entries can be walked.
    pub fn decode_from(buf: &[u8], offset: usize) -> Result<(LogEntry, usize), DecodeError> {
        let mut cursor = Cursor::new(buf, offset);

        let timestamp = cursor.read_u64_le()?;
        let level = cursor.read_u8()?;
        let count = cursor.read_u8()? as usize;

        // Each property needs at least its two length bytes; don't trust
        // `count` for the allocation beyond what the buffer could hold.
        let mut properties = Vec::with_capacity(count.min(cursor.remaining() / 2));
        for _ in 0..count {
            properties.push(Property::read(&mut cursor)?);
        }

        let message_len = cursor.read_u32_le()? as usize;
        let message = cursor.read_text(message_len)?;

        let entry = LogEntry {
            timestamp,
            level,
            properties,
            message,
        };
        Ok((entry, cursor.position()))
    }
}

fn message_len_field(len: usize) -> Result<u32, EncodingError> {
    u32::try_from(len).map_err(|_| EncodingError::MessageTooLong { len })
}

/// Iterates over a buffer of concatenated entries.
///
/// Stops after the first error; `position()` then points at the start of
/// the entry that failed.
pub struct EntryDecoder<'a> {
    buf: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> EntryDecoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            failed: false,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }
}

impl<'a> Iterator for EntryDecoder<'a> {
    type Item = Result<LogEntry, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.buf.len() {
            return None;
        }
        match LogEntry::decode_from(self.buf, self.pos) {
            Ok((entry, next)) => {
                self.pos = next;
                Some(Ok(entry))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::level::Level;
    use assert_matches::assert_matches;

    fn sample() -> LogEntry {
        LogEntry::new(1_700_000_000, Level::Info, "ok").with_property("host", "web-1")
    }

    #[test]
    fn concrete_entry_is_27_bytes() {
        let entry = sample();
        let bytes = entry.encode().unwrap();

        // 10 header + (1 + 4 + 1 + 5) property + (4 + 2) message
        assert_eq!(bytes.len(), 27);
        assert_eq!(entry.encoded_len(), 27);
        assert_eq!(&bytes[..8], &1_700_000_000u64.to_le_bytes());
        assert_eq!(bytes[8], 1);
        assert_eq!(bytes[9], 1);
        assert_eq!(&bytes[10..21], b"\x04host\x05web-1");
        assert_eq!(&bytes[21..25], &2u32.to_le_bytes());
        assert_eq!(&bytes[25..], b"ok");

        assert_eq!(LogEntry::decode(&bytes).unwrap(), entry);
    }

    #[test]
    fn roundtrip_preserves_order_and_duplicates() {
        let entry = LogEntry::new(u64::MAX, Level::Error, "disk full on /var")
            .with_property("b", "2")
            .with_property("a", "1")
            .with_property("a", "again")
            .with_property("", "");
        let decoded = LogEntry::decode(&entry.encode().unwrap()).unwrap();

        assert_eq!(decoded, entry);
        let keys: Vec<&str> = decoded.properties.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, ["b", "a", "a", ""]);
    }

    #[test]
    fn size_formula_matches_output() {
        let entries = [
            LogEntry::new(0, 0u8, ""),
            LogEntry::new(5, 2u8, "héllo wörld").with_property("ключ", "значение"),
            LogEntry {
                timestamp: 42,
                level: 3,
                properties: (0..255)
                    .map(|i| Property::new(format!("k{}", i), "v".repeat(i % 7)))
                    .collect(),
                message: "m".repeat(1000),
            },
        ];
        for entry in &entries {
            let expected = 10
                + entry
                    .properties
                    .iter()
                    .map(|p| 2 + p.key.len() + p.value.len())
                    .sum::<usize>()
                + 4
                + entry.message.len();
            let bytes = entry.encode().unwrap();
            assert_eq!(bytes.len(), expected);
            assert_eq!(LogEntry::decode(&bytes).unwrap(), *entry);
        }
    }

    #[test]
    fn every_prefix_is_truncated() {
        let entry = sample()
            .with_property("region", "eu-west")
            .with_property("", "x");
        let bytes = entry.encode().unwrap();
        for n in 0..bytes.len() {
            assert_matches!(
                LogEntry::decode(&bytes[..n]),
                Err(DecodeError::Truncated { .. }),
                "prefix of {} bytes",
                n
            );
        }
    }

    #[test]
    fn unknown_level_decodes() {
        let mut entry = sample();
        entry.level = 9;
        let decoded = LogEntry::decode(&entry.encode().unwrap()).unwrap();
        assert_eq!(decoded.level, 9);
        assert_eq!(decoded.level_name(), "Unknown");
    }

    #[test]
    fn too_many_properties() {
        let mut entry = LogEntry::new(1, 1u8, "m");
        entry.properties = vec![Property::new("k", "v"); 256];
        assert_matches!(
            entry.encode(),
            Err(EncodingError::TooManyProperties { count: 256 })
        );

        entry.properties.pop();
        assert!(entry.encode().is_ok());
    }

    #[test]
    fn long_key_propagates_from_property() {
        let entry = sample().with_property("k".repeat(256), "v");
        assert_matches!(entry.encode(), Err(EncodingError::FieldTooLong { len: 256, .. }));
    }

    #[test]
    fn failed_encode_into_keeps_buffer() {
        let mut buf = b"prefix".to_vec();
        let entry = sample().with_property("k", "v".repeat(256));
        assert!(entry.encode_into(&mut buf).is_err());
        assert_eq!(buf, b"prefix");
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn message_length_limit() {
        assert_eq!(message_len_field(u32::MAX as usize), Ok(u32::MAX));
        let len = u32::MAX as usize + 1;
        assert_matches!(message_len_field(len), Err(EncodingError::MessageTooLong { len: l }) if l == len);
    }

    #[test]
    fn trailing_bytes_rejected_by_strict_decode() {
        let mut bytes = sample().encode().unwrap();
        bytes.extend_from_slice(&[0, 0, 0]);
        assert_matches!(
            LogEntry::decode(&bytes),
            Err(DecodeError::TrailingBytes { remaining: 3 })
        );
    }

    #[test]
    fn streaming_decode_walks_concatenated_entries() {
        let first = sample();
        let second = LogEntry::new(1_700_000_001, Level::Warning, "slow").with_property("a", "1");
        let mut buf = Vec::new();
        first.encode_into(&mut buf).unwrap();
        second.encode_into(&mut buf).unwrap();

        let (a, pos) = LogEntry::decode_from(&buf, 0).unwrap();
        let (b, end) = LogEntry::decode_from(&buf, pos).unwrap();
        assert_eq!((a, b), (first, second));
        assert_eq!(pos, 27);
        assert_eq!(end, buf.len());
    }

    #[test]
    fn invalid_message_text() {
        let mut bytes = LogEntry::new(1, 1u8, "ab").encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 0xff;
        assert_matches!(
            LogEntry::decode(&bytes),
            Err(DecodeError::InvalidText { offset: 14 })
        );
    }

    #[test]
    fn invalid_property_text_propagates() {
        // header (10) + key_len (1): key starts at 11
        let mut bytes = sample().encode().unwrap();
        bytes[11] = 0xff;
        assert_matches!(
            LogEntry::decode(&bytes),
            Err(DecodeError::InvalidText { offset: 11 })
        );

        // value_len sits at 15, value starts at 16
        let mut bytes = sample().encode().unwrap();
        bytes[17] = 0xc3;
        bytes[18] = 0x28;
        assert_matches!(
            LogEntry::decode(&bytes),
            Err(DecodeError::InvalidText { offset: 16 })
        );
    }

    #[test]
    fn huge_declared_count_does_not_overallocate() {
        // header claims 255 properties but the buffer ends right away
        let mut bytes = vec![0u8; 8];
        bytes.extend_from_slice(&[1, 255]);
        assert_matches!(LogEntry::decode(&bytes), Err(DecodeError::Truncated { offset: 10, .. }));
    }

    #[test]
    fn decoder_iterates_and_stops_on_error() {
        let entries: Vec<LogEntry> = (0..5)
            .map(|i| LogEntry::new(i, (i % 4) as u8, format!("entry {}", i)).with_property("i", i.to_string()))
            .collect();
        let mut buf = Vec::new();
        for entry in &entries {
            entry.encode_into(&mut buf).unwrap();
        }
        let decoded: Result<Vec<_>, _> = EntryDecoder::new(&buf).collect();
        assert_eq!(decoded.unwrap(), entries);

        buf.push(7);
        let mut decoder = EntryDecoder::new(&buf);
        assert_eq!(decoder.by_ref().take(5).filter(Result::is_ok).count(), 5);
        assert_matches!(decoder.next(), Some(Err(DecodeError::Truncated { .. })));
        assert_eq!(decoder.position(), buf.len() - 1);
        assert!(decoder.next().is_none());
    }
}
