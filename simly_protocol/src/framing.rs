// Length-prefixed framing for the sensor link.
//
// Wire format: a 2-byte little-endian length, then exactly that many payload
// bytes. The payload itself starts with the opcode (see `message.rs`), so a
// legal frame is never empty.
//
// Two ways to consume frames:
// - `FrameDecoder` is the incremental state machine the server runs against
//   non-blocking sockets. Bytes are pushed in as they arrive, in chunks of any
//   size, and complete frames are pulled out. Partially received headers and
//   bodies stay buffered across calls.
// - `read_frame` / `write_frame` are blocking helpers over `Read`/`Write`,
//   used by the diagnostic client and tests.

use std::io::{self, Read, Write};

use crate::error::{ProtocolError, Result};

/// Size of the length prefix in bytes.
pub const HEADER_LEN: usize = 2;

/// Largest payload the 2-byte length prefix can announce.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Wrap a payload in a frame. Empty and oversized payloads are rejected
/// before anything is allocated for the wire.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let len = payload.len();
    if len == 0 {
        return Err(ProtocolError::EmptyPacket);
    }
    let prefix = u16::try_from(len).map_err(|_| ProtocolError::Oversized {
        len,
        max: MAX_PAYLOAD_LEN,
    })?;
    let mut frame = Vec::with_capacity(HEADER_LEN + len);
    frame.extend_from_slice(&prefix.to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Frame `payload` and write it in one `write_all`, then flush.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let frame =
        encode_frame(payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    writer.write_all(&frame)?;
    writer.flush()
}

/// Blocking read of one frame payload.
///
/// Returns `UnexpectedEof` if the stream closes before or during a frame.
/// A zero-length frame is returned as an empty `Vec`; deciding whether that
/// is acceptable is the caller's job.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; HEADER_LEN];
    reader.read_exact(&mut len_buf)?;
    let len = usize::from(u16::from_le_bytes(len_buf));
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Where the decoder is within the current frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeState {
    /// Waiting for the 2-byte length prefix.
    AwaitingHeader,
    /// Header consumed; this many payload bytes are still owed.
    AwaitingBody(u16),
}

/// Incremental frame decoder.
///
/// The accumulator only ever grows by `push` and shrinks by whole headers or
/// whole bodies, so `state` always matches the bytes still outstanding for
/// the current frame.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    buf: Vec<u8>,
    // Start of unconsumed data in `buf`. Compacted lazily.
    start: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::AwaitingHeader,
            buf: Vec::new(),
            start: 0,
        }
    }

    /// Current decode state.
    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Bytes received but not yet consumed as a header or body.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.start
    }

    /// Append freshly received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pull the next complete frame payload, if one is fully buffered.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let available = self.buffered();
            match self.state {
                DecodeState::AwaitingHeader => {
                    if available < HEADER_LEN {
                        self.compact();
                        return None;
                    }
                    let len =
                        u16::from_le_bytes([self.buf[self.start], self.buf[self.start + 1]]);
                    self.start += HEADER_LEN;
                    self.state = DecodeState::AwaitingBody(len);
                }
                DecodeState::AwaitingBody(len) => {
                    let len = usize::from(len);
                    if available < len {
                        self.compact();
                        return None;
                    }
                    let payload = self.buf[self.start..self.start + len].to_vec();
                    self.start += len;
                    self.state = DecodeState::AwaitingHeader;
                    return Some(payload);
                }
            }
        }
    }

    /// Drop consumed bytes from the front of the accumulator.
    fn compact(&mut self) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn payload_of(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + 7) as u8).collect()
    }

    /// Feed `wire` in the given chunk sizes (last chunk takes the rest) and
    /// collect every frame produced.
    fn decode_in_chunks(wire: &[u8], chunk_sizes: &[usize]) -> Vec<Vec<u8>> {
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        let mut rest = wire;
        for &size in chunk_sizes {
            let size = size.min(rest.len());
            let (chunk, tail) = rest.split_at(size);
            decoder.push(chunk);
            while let Some(frame) = decoder.next_frame() {
                frames.push(frame);
            }
            rest = tail;
        }
        decoder.push(rest);
        while let Some(frame) = decoder.next_frame() {
            frames.push(frame);
        }
        assert_eq!(decoder.state(), DecodeState::AwaitingHeader);
        assert_eq!(decoder.buffered(), 0);
        frames
    }

    /// Raw frame bytes, bypassing `encode_frame`'s empty check.
    fn raw_frame(payload: &[u8]) -> Vec<u8> {
        let mut wire = (payload.len() as u16).to_le_bytes().to_vec();
        wire.extend_from_slice(payload);
        wire
    }

    #[test]
    fn encode_prefixes_little_endian_length() {
        let frame = encode_frame(&[0x02, 0x00, 0xAA]).unwrap();
        assert_eq!(frame, vec![0x03, 0x00, 0x02, 0x00, 0xAA]);
    }

    #[test]
    fn encode_rejects_empty_payload() {
        assert_eq!(encode_frame(&[]), Err(ProtocolError::EmptyPacket));
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let big = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            encode_frame(&big),
            Err(ProtocolError::Oversized { .. })
        ));
    }

    #[test]
    fn write_frame_rejects_empty_without_writing() {
        let mut out = Vec::new();
        let err = write_frame(&mut out, &[]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(out.is_empty());
    }

    #[test]
    fn blocking_read_after_write() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"first").unwrap();
        write_frame(&mut wire, b"second").unwrap();

        let mut cursor = Cursor::new(wire);
        assert_eq!(read_frame(&mut cursor).unwrap(), b"first");
        assert_eq!(read_frame(&mut cursor).unwrap(), b"second");
        let err = read_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn header_split_across_pushes_waits() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&[0x04]);
        assert_eq!(decoder.next_frame(), None);
        assert_eq!(decoder.state(), DecodeState::AwaitingHeader);
        decoder.push(&[0x00, 0x01, 0x02]);
        assert_eq!(decoder.next_frame(), None);
        assert_eq!(decoder.state(), DecodeState::AwaitingBody(4));
        assert_eq!(decoder.buffered(), 2);
        decoder.push(&[0x03, 0x04, 0x09]);
        assert_eq!(decoder.next_frame(), Some(vec![1, 2, 3, 4]));
        assert_eq!(decoder.state(), DecodeState::AwaitingHeader);
        // The trailing byte is the first half of the next header.
        assert_eq!(decoder.buffered(), 1);
    }

    #[test]
    fn chunked_delivery_yields_exactly_one_frame() {
        for len in [0usize, 1, 2, 3, 16, 255, 256, 2048, 40_000, MAX_PAYLOAD_LEN] {
            let payload = payload_of(len);
            let wire = raw_frame(&payload);

            // Whole frame in one chunk.
            assert_eq!(decode_in_chunks(&wire, &[]), vec![payload.clone()]);

            // Two chunks at several split points, including inside the header.
            for split in [1, 2, 3, wire.len() / 2, wire.len() - 1] {
                let frames = decode_in_chunks(&wire, &[split]);
                assert_eq!(frames, vec![payload.clone()], "len {len} split {split}");
            }
        }
    }

    #[test]
    fn byte_by_byte_delivery_yields_exactly_one_frame() {
        for len in [0usize, 1, 6, 16, 1000, MAX_PAYLOAD_LEN] {
            let payload = payload_of(len);
            let wire = raw_frame(&payload);
            let ones = vec![1usize; wire.len()];
            assert_eq!(decode_in_chunks(&wire, &ones), vec![payload]);
        }
    }

    #[test]
    fn back_to_back_frames_in_irregular_chunks() {
        let payloads: Vec<Vec<u8>> = (1..=20).map(|n| payload_of(n * 13)).collect();
        let mut wire = Vec::new();
        for p in &payloads {
            wire.extend(raw_frame(p));
        }
        let chunks = [7usize, 1, 1, 300, 2, 55, 5, 1000];
        assert_eq!(decode_in_chunks(&wire, &chunks), payloads);
    }
}
