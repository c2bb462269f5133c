// src/codec/cursor.rs
use super::error::DecodeError;

/// Bounds-checked read cursor over a borrowed buffer.
pub(crate) struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    #[inline]
    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.remaining();
        if n > available {
            return Err(DecodeError::Truncated {
                offset: self.pos,
                needed: n,
                available,
            });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf[start..self.pos])
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    pub(crate) fn read_u64_le(&mut self) -> Result<u64, DecodeError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    /// Reads `len` bytes and validates them as UTF-8.
    pub(crate) fn read_text(&mut self, len: usize) -> Result<String, DecodeError> {
        let offset = self.pos;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidText { offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn take_past_end_reports_shortfall() {
        let mut cursor = Cursor::new(&[1, 2, 3], 1);
        assert_matches!(
            cursor.take(4),
            Err(DecodeError::Truncated {
                offset: 1,
                needed: 4,
                available: 2
            })
        );
        // a failed read does not move the cursor
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn start_beyond_buffer_is_truncated_not_panic() {
        let mut cursor = Cursor::new(&[0u8; 2], 10);
        assert_eq!(cursor.remaining(), 0);
        assert_matches!(cursor.read_u8(), Err(DecodeError::Truncated { .. }));
    }

    #[test]
    fn integers_are_little_endian() {
        let buf = [0x01, 0, 0, 0, 0x02, 0, 0, 0, 0, 0, 0, 0];
        let mut cursor = Cursor::new(&buf, 0);
        assert_eq!(cursor.read_u32_le().unwrap(), 1);
        assert_eq!(cursor.read_u64_le().unwrap(), 2);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn invalid_utf8_reports_field_start() {
        let buf = [b'a', 0xff, 0xfe];
        let mut cursor = Cursor::new(&buf, 1);
        assert_matches!(cursor.read_text(2), Err(DecodeError::InvalidText { offset: 1 }));
    }
}
