// Little-endian read/write primitives for packet payloads.
//
// `PacketWriter` appends fields to a growable buffer; `PacketReader` walks a
// borrowed byte slice with a cursor. The reader's only failure mode is
// running out of bytes (`ProtocolError::Truncated`). The frame decoder has
// already guaranteed that a whole frame is buffered, so a short read here
// means the sender declared a frame too small for its opcode's layout.

use crate::error::{ProtocolError, Result};

/// Appends little-endian fields to an owned buffer.
#[derive(Clone, Debug, Default)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_i16(&mut self, value: i16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads little-endian fields from a borrowed payload.
#[derive(Clone, Debug)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Consume exactly `N` bytes into a fixed array.
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.take::<2>().map(u16::from_le_bytes)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.take::<2>().map(i16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.take::<4>().map(i32::from_le_bytes)
    }

    /// Borrow the next `len` bytes without copying.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(ProtocolError::Truncated {
                needed: len,
                remaining,
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.buf[start..self.pos])
    }

    /// Everything after the cursor.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_little_endian() {
        let mut w = PacketWriter::new();
        w.write_u16(0x0102).write_u32(0x0304_0506).write_i32(-2);
        assert_eq!(
            w.as_slice(),
            &[0x02, 0x01, 0x06, 0x05, 0x04, 0x03, 0xFE, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn reads_back_mixed_fields() {
        let mut w = PacketWriter::new();
        w.write_i16(-300)
            .write_u16(65535)
            .write_i32(i32::MIN)
            .write_u32(u32::MAX)
            .write_bytes(b"xyz");
        let bytes = w.into_inner();

        let mut r = PacketReader::new(&bytes);
        assert_eq!(r.read_i16().unwrap(), -300);
        assert_eq!(r.read_u16().unwrap(), 65535);
        assert_eq!(r.read_i32().unwrap(), i32::MIN);
        assert_eq!(r.read_u32().unwrap(), u32::MAX);
        assert_eq!(r.read_bytes(3).unwrap(), b"xyz");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn short_read_reports_truncation_and_keeps_cursor() {
        let bytes = [1u8, 2, 3];
        let mut r = PacketReader::new(&bytes);
        let err = r.read_u32().unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Truncated {
                needed: 4,
                remaining: 3
            }
        );
        // A failed read consumes nothing.
        assert_eq!(r.read_u16().unwrap(), 0x0201);
        assert_eq!(r.rest(), &[3]);
    }
}
