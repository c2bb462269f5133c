// src/codec/property.rs
use super::cursor::Cursor;
use super::error::{DecodeError, EncodingError, Field};

/// Largest key or value, in bytes, that the one-byte length prefix can carry.
pub const MAX_FIELD_LEN: usize = u8::MAX as usize;

/// One key/value pair attached to an entry. Keys are not required to be unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Property {
    pub key: String,
    pub value: String,
}

impl Property {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Bytes this property occupies on the wire.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        2 + self.key.len() + self.value.len()
    }

    pub(crate) fn validate(&self) -> Result<(), EncodingError> {
        if self.key.len() > MAX_FIELD_LEN {
            return Err(EncodingError::FieldTooLong {
                field: Field::Key,
                len: self.key.len(),
            });
        }
        if self.value.len() > MAX_FIELD_LEN {
            return Err(EncodingError::FieldTooLong {
                field: Field::Value,
                len: self.value.len(),
            });
        }
        Ok(())
    }

    /// `[key_len][key][value_len][value]`
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Appends the encoding to `buf`. Nothing is written if a field is too long.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.validate()?;
        self.write_validated(buf);
        Ok(())
    }

    /// Writes the wire layout; callers must have run `validate` first.
    pub(crate) fn write_validated(&self, buf: &mut Vec<u8>) {
        buf.push(self.key.len() as u8);
        buf.extend_from_slice(self.key.as_bytes());
        buf.push(self.value.len() as u8);
        buf.extend_from_slice(self.value.as_bytes());
    }

    /// Decodes one property at `offset`, returning it with the cursor past it.
    pub fn decode(buf: &[u8], offset: usize) -> Result<(Property, usize), DecodeError> {
        let mut cursor = Cursor::new(buf, offset);
        let property = Self::read(&mut cursor)?;
        Ok((property, cursor.position()))
    }

    pub(crate) fn read(cursor: &mut Cursor<'_>) -> Result<Property, DecodeError> {
        let key_len = cursor.read_u8()? as usize;
        let key = cursor.read_text(key_len)?;
        let value_len = cursor.read_u8()? as usize;
        let value = cursor.read_text(value_len)?;
        Ok(Property { key, value })
    }
}

impl<K: Into<String>, V: Into<String>> From<(K, V)> for Property {
    fn from((key, value): (K, V)) -> Self {
        Property::new(key, value)
    }
}
