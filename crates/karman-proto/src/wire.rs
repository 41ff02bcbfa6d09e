//! Field-level codec for message bodies.
//!
//! All integers are fixed-width little-endian. Variable-length fields carry an
//! `i32` length prefix, except "raw" tails which consume the rest of the
//! buffer and are therefore only usable as the last field of a value.
//!
//! | field    | encoding                              |
//! |----------|---------------------------------------|
//! | `guid`   | 16 bytes                              |
//! | `string` | `i32` byte length + UTF-8 bytes       |
//! | `bytes`  | `i32` byte length + bytes             |
//! | `raw`    | remaining bytes, no prefix            |

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::errors::{ProtocolError, Result};

/// Append-only writer for message bodies.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a 16-byte guid
    pub fn put_guid(&mut self, value: Uuid) {
        self.buf.put_slice(value.as_bytes());
    }

    /// Write a little-endian `i32`
    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    /// Write a little-endian `u32`
    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    /// Write a length-prefixed UTF-8 string
    pub fn put_string(&mut self, value: &str) {
        self.put_bytes(value.as_bytes());
    }

    /// Write a length-prefixed byte string
    pub fn put_bytes(&mut self, value: &[u8]) {
        self.buf.put_i32_le(value.len() as i32);
        self.buf.put_slice(value);
    }

    /// Write bytes with no prefix (last field only)
    pub fn put_raw(&mut self, value: &[u8]) {
        self.buf.put_slice(value);
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing was written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish writing and return the encoded bytes
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Cursor over an encoded message body.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    /// Start reading `buf` from the beginning
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8]> {
        if self.buf.len() < len {
            return Err(ProtocolError::Truncated { field, expected: len, actual: self.buf.len() });
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Read a 16-byte guid
    pub fn guid(&mut self, field: &'static str) -> Result<Uuid> {
        let bytes = self.take(field, 16)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(bytes);
        Ok(Uuid::from_bytes(raw))
    }

    /// Read a little-endian `i32`
    pub fn i32(&mut self, field: &'static str) -> Result<i32> {
        let bytes = self.take(field, 4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a little-endian `u32`
    pub fn u32(&mut self, field: &'static str) -> Result<u32> {
        let bytes = self.take(field, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a length-prefixed byte string
    pub fn bytes(&mut self, field: &'static str) -> Result<&'a [u8]> {
        let length = self.i32(field)?;
        let length = usize::try_from(length).map_err(|_| ProtocolError::InvalidLength {
            length: i64::from(length),
            max: self.buf.len(),
        })?;
        self.take(field, length)
    }

    /// Read a length-prefixed UTF-8 string
    pub fn string(&mut self, field: &'static str) -> Result<String> {
        let bytes = self.bytes(field)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8 { field })
    }

    /// Consume the rest of the buffer
    pub fn raw(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    /// Consume the rest of the buffer as UTF-8
    pub fn raw_string(&mut self, field: &'static str) -> Result<String> {
        std::str::from_utf8(self.raw())
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8 { field })
    }

    /// Assert that every byte was consumed.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TrailingBytes`] if anything is left.
    pub fn finish(self, type_name: &'static str) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::TrailingBytes { type_name, remaining: self.buf.len() })
        }
    }
}

/// Write a serde value as a CBOR raw tail.
///
/// Convenience for application fragments and mutations that do not need a
/// hand-written layout.
pub fn cbor_encode<T: Serialize>(value: &T, dst: &mut WireWriter) -> Result<()> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out).map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
    dst.put_raw(&out);
    Ok(())
}

/// Read a serde value from the remaining bytes as CBOR.
pub fn cbor_decode<T: DeserializeOwned>(src: &mut WireReader<'_>) -> Result<T> {
    ciborium::de::from_reader(src.raw()).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_read_back_in_order() {
        let id = Uuid::from_u128(0x1234_5678_9abc_def0_1234_5678_9abc_def0);
        let mut w = WireWriter::new();
        w.put_guid(id);
        w.put_string("score/A");
        w.put_bytes(&[1, 2, 3]);
        w.put_raw(b"tail");
        let bytes = w.into_bytes();

        let mut r = WireReader::new(&bytes);
        assert_eq!(r.guid("id").unwrap(), id);
        assert_eq!(r.string("key").unwrap(), "score/A");
        assert_eq!(r.bytes("payload").unwrap(), &[1, 2, 3]);
        assert_eq!(r.raw_string("tail").unwrap(), "tail");
        assert!(r.finish("test").is_ok());
    }

    #[test]
    fn truncated_string_is_rejected() {
        let mut w = WireWriter::new();
        w.put_i32(10);
        w.put_raw(b"short");
        let bytes = w.into_bytes();

        let mut r = WireReader::new(&bytes);
        let result = r.string("name");
        assert_eq!(
            result,
            Err(ProtocolError::Truncated { field: "name", expected: 10, actual: 5 })
        );
    }

    #[test]
    fn negative_length_is_rejected() {
        let mut w = WireWriter::new();
        w.put_i32(-4);
        let bytes = w.into_bytes();

        let mut r = WireReader::new(&bytes);
        assert!(matches!(r.bytes("payload"), Err(ProtocolError::InvalidLength { length: -4, .. })));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut w = WireWriter::new();
        w.put_bytes(&[0xff, 0xfe]);
        let bytes = w.into_bytes();

        let mut r = WireReader::new(&bytes);
        assert_eq!(r.string("name"), Err(ProtocolError::InvalidUtf8 { field: "name" }));
    }

    #[test]
    fn trailing_bytes_are_reported() {
        let bytes = [0u8; 3];
        let r = WireReader::new(&bytes);
        assert_eq!(
            r.finish("Leave"),
            Err(ProtocolError::TrailingBytes { type_name: "Leave", remaining: 3 })
        );
    }

    #[test]
    fn cbor_tail_round_trip() {
        let mut w = WireWriter::new();
        w.put_string("prefix");
        cbor_encode(&(7u32, "seven".to_string()), &mut w).unwrap();
        let bytes = w.into_bytes();

        let mut r = WireReader::new(&bytes);
        assert_eq!(r.string("prefix").unwrap(), "prefix");
        let value: (u32, String) = cbor_decode(&mut r).unwrap();
        assert_eq!(value, (7, "seven".to_string()));
    }
}
