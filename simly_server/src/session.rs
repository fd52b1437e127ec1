// Per-connection state for one sensor client.
//
// `ClientSession` is owned by the `SessionRegistry` and driven exclusively
// from the loop thread in `server.rs`, so nothing in here locks. Each tick
// the loop calls, in order:
//
// 1. `pull_available`: drain whatever the non-blocking socket has into the
//    `FrameDecoder`. EOF or a hard read error marks the session closed, but
//    bytes read before that are kept so their frames still get dispatched.
// 2. `process_frames`: pull every complete frame out of the decoder, decode
//    it, and act on it (update the sensor snapshots, emit events, validate
//    pongs). Bad frames are logged and skipped; the session stays open.
// 3. `LivenessMonitor::check` (see `liveness.rs`): may send a ping or close
//    the session.
//
// Closing is a flag plus a socket shutdown. The loop removes closed sessions
// from the registry at the end of the tick and reports them then, so a
// session is always removed and reported exactly once.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Instant;

use simly_protocol::{
    ClientPacket, DecodeState, ForceSensor, FrameDecoder, RotatorSensor, ServerPacket,
    encode_frame,
};

use crate::error::{Result, ServerError};
use crate::events::{EventDispatcher, ServerEvent};

/// Upper bound on socket reads per session per tick, so one chatty client
/// cannot stall the loop.
const MAX_READS_PER_TICK: usize = 16;

/// Server-side state for one connected client.
pub struct ClientSession {
    address: String,
    stream: TcpStream,
    decoder: FrameDecoder,
    closed: bool,

    // Liveness bookkeeping, driven by `LivenessMonitor`.
    last_ping: Instant,
    outstanding_nonce: Option<i32>,

    // Latest sensor snapshots.
    force: ForceSensor,
    rotator: RotatorSensor,
}

impl ClientSession {
    /// Wrap an accepted stream. The stream must already be non-blocking.
    pub fn new(address: String, stream: TcpStream, now: Instant) -> Self {
        Self {
            address,
            stream,
            decoder: FrameDecoder::new(),
            closed: false,
            last_ping: now,
            outstanding_nonce: None,
            force: ForceSensor::default(),
            rotator: RotatorSensor::default(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn decode_state(&self) -> DecodeState {
        self.decoder.state()
    }

    pub fn force(&self) -> ForceSensor {
        self.force
    }

    pub fn rotator(&self) -> RotatorSensor {
        self.rotator
    }

    pub fn last_ping(&self) -> Instant {
        self.last_ping
    }

    pub fn outstanding_nonce(&self) -> Option<i32> {
        self.outstanding_nonce
    }

    pub(crate) fn set_last_ping(&mut self, at: Instant) {
        self.last_ping = at;
    }

    /// Shut the socket down and mark the session for removal. Idempotent.
    pub fn close(&mut self) {
        if !self.closed {
            log::debug!("[{}] closing session", self.address);
            self.closed = true;
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }

    /// Read everything currently available without blocking. `scratch` is
    /// the per-read buffer, sized by `buffer_max_size`. Returns the number of
    /// bytes read.
    pub fn pull_available(&mut self, scratch: &mut [u8]) -> usize {
        let mut total = 0;
        for _ in 0..MAX_READS_PER_TICK {
            if self.closed {
                break;
            }
            match self.stream.read(scratch) {
                Ok(0) => {
                    log::debug!("[{}] peer closed connection", self.address);
                    self.close();
                }
                Ok(n) => {
                    self.decoder.push(&scratch[..n]);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::debug!("[{}] read failed: {e}", self.address);
                    self.close();
                }
            }
        }
        total
    }

    /// Decode and act on every complete buffered frame. Returns how many
    /// frames were consumed.
    pub fn process_frames(&mut self, events: &EventDispatcher, emit_raw: bool) -> usize {
        let mut count = 0;
        let closed_by_peer = self.closed;
        while let Some(payload) = self.decoder.next_frame() {
            count += 1;
            if emit_raw {
                events.emit(ServerEvent::ReceivedBytes {
                    address: self.address.clone(),
                    payload: payload.clone(),
                });
            }
            self.handle_frame(&payload, events);
            // A failed pong closes the session; later frames are moot. Frames
            // that arrived before a peer close are still delivered.
            if self.closed && !closed_by_peer {
                break;
            }
        }
        count
    }

    /// Dispatch one frame payload by opcode.
    fn handle_frame(&mut self, payload: &[u8], events: &EventDispatcher) {
        let packet = match ClientPacket::decode(payload) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!(
                    "[{}] dropping malformed frame ({} bytes): {e}",
                    self.address,
                    payload.len()
                );
                return;
            }
        };
        log::trace!("[{}] received {}", self.address, packet.name());

        match packet {
            ClientPacket::Handshake => {}
            ClientPacket::Pong { code } => self.handle_pong(code),
            ClientPacket::ForceSensorReport(force) => {
                self.force = force;
                events.emit(ServerEvent::ForceSensorData {
                    address: self.address.clone(),
                    data: force,
                });
            }
            ClientPacket::RotatorReport(rotator) => {
                self.rotator = rotator;
                events.emit(ServerEvent::RotationData {
                    address: self.address.clone(),
                    data: rotator,
                });
            }
            ClientPacket::Unknown { opcode } => {
                log::debug!(
                    "[{}] ignoring unknown opcode {opcode:#06x} ({} bytes)",
                    self.address,
                    payload.len()
                );
            }
        }
    }

    /// A pong must echo the outstanding nonce exactly. Anything else,
    /// including a pong nobody asked for, closes the session.
    fn handle_pong(&mut self, code: i32) {
        if self.outstanding_nonce == Some(code) {
            log::trace!("[{}] pong validated", self.address);
            self.outstanding_nonce = None;
        } else {
            log::info!(
                "[{}] pong mismatch (got {code}, expected {:?}), closing",
                self.address,
                self.outstanding_nonce
            );
            self.close();
        }
    }

    /// Send a ping for `nonce` and remember it as outstanding.
    pub fn send_ping(&mut self, nonce: i32) -> Result<()> {
        self.outstanding_nonce = Some(nonce);
        self.send(&ServerPacket::ping_for_nonce(nonce))
    }

    /// Frame and write a packet. A write failure closes the session.
    pub fn send(&mut self, packet: &ServerPacket) -> Result<()> {
        log::trace!("[{}] sending {}", self.address, packet.name());
        self.send_payload(&packet.encode())
    }

    /// Frame and write an already encoded payload. An empty payload is
    /// rejected before any I/O.
    pub fn send_payload(&mut self, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(payload).inspect_err(|e| {
            log::error!("[{}] not sending packet: {e}", self.address);
        })?;
        if self.closed {
            return Err(ServerError::Send {
                address: self.address.clone(),
                source: io::Error::from(io::ErrorKind::NotConnected),
            });
        }
        let result = self.stream.write_all(&frame).and_then(|()| self.stream.flush());
        match result {
            Ok(()) => {
                log::trace!("[{}] sent {} bytes", self.address, frame.len());
                Ok(())
            }
            Err(source) => {
                log::warn!("[{}] send failed: {source}", self.address);
                self.close();
                Err(ServerError::Send {
                    address: self.address.clone(),
                    source,
                })
            }
        }
    }
}
