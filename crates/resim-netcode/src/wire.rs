//! Little-endian wire primitives
//!
//! Explicit fixed-width framing plus length-prefixed typed blobs. The
//! framing bytes are written by hand so the message shape is stable and
//! inspectable; typed payloads inside the frame go through bincode.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Byte writer for one outgoing message
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Create an empty writer
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Finish and take the bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check whether nothing was written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write a u8
    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Write a little-endian u16
    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a little-endian u32
    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a little-endian u64
    pub fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a little-endian i64
    pub fn put_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a typed payload as a u32-length-prefixed bincode blob
    pub fn put_blob<T: Serialize>(&mut self, value: &T) -> crate::Result<()> {
        let bytes = bincode::serialize(value)?;
        self.put_u32(bytes.len() as u32);
        self.buf.extend_from_slice(&bytes);
        Ok(())
    }
}

/// Byte reader over one incoming message
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Create a reader over a payload
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes remaining
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, count: usize) -> crate::Result<&'a [u8]> {
        if self.remaining() < count {
            return Err(crate::Error::UnexpectedEof(self.pos));
        }
        let slice = &self.buf[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    /// Read a u8
    pub fn get_u8(&mut self) -> crate::Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a little-endian u16
    pub fn get_u16(&mut self) -> crate::Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    /// Read a little-endian u32
    pub fn get_u32(&mut self) -> crate::Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    /// Read a little-endian u64
    pub fn get_u64(&mut self) -> crate::Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Read a little-endian i64
    pub fn get_i64(&mut self) -> crate::Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Read a u32-length-prefixed bincode blob into a typed payload
    pub fn get_blob<T: DeserializeOwned>(&mut self) -> crate::Result<T> {
        let len = self.get_u32()? as usize;
        let bytes = self.take(len)?;
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_round_trip() {
        let mut w = Writer::new();
        w.put_u8(7);
        w.put_u16(300);
        w.put_u32(70_000);
        w.put_u64(u64::MAX - 1);
        w.put_i64(-42);
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        assert_eq!(r.get_u8().unwrap(), 7);
        assert_eq!(r.get_u16().unwrap(), 300);
        assert_eq!(r.get_u32().unwrap(), 70_000);
        assert_eq!(r.get_u64().unwrap(), u64::MAX - 1);
        assert_eq!(r.get_i64().unwrap(), -42);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_blob_round_trip() {
        let mut w = Writer::new();
        w.put_blob(&(3u32, String::from("hello"))).unwrap();
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        let value: (u32, String) = r.get_blob().unwrap();
        assert_eq!(value, (3, String::from("hello")));
    }

    #[test]
    fn test_truncated_payload_errors() {
        let mut w = Writer::new();
        w.put_u64(5);
        let mut bytes = w.into_bytes();
        bytes.truncate(4);

        let mut r = Reader::new(&bytes);
        assert!(matches!(r.get_u64(), Err(crate::Error::UnexpectedEof(_))));
    }

    #[test]
    fn test_little_endian_layout() {
        let mut w = Writer::new();
        w.put_u16(0x0102);
        assert_eq!(w.into_bytes(), vec![0x02, 0x01]);
    }
}
