// Typed packets for both directions of the sensor link.
//
// Every frame payload begins with a little-endian `u16` opcode, followed by
// opcode-specific fields:
//
//   client → server                       server → client
//   0x00F0 Handshake   (reserved, no-op)
//   0x0001 Pong        i32 code            0x0001 Ping             i32 code
//   0x0002 ForceSensor u32 ×4              0x0002 RotationRequest  u16, u16, i32
//   0x0003 Rotator     u16, u16, i32
//
// Opcodes overlap between directions, so each direction has its own enum.
// Unknown inbound opcodes decode to `ClientPacket::Unknown` rather than an
// error: the frame has already been consumed whole, so skipping it cannot
// desynchronize the stream.
//
// Ping codes are the server's nonce XOR `PING_KEY`. A well-behaved client
// undoes the XOR and echoes the raw nonce in its Pong. The XOR is only a
// checksum against stray or stale replies, not authentication.

use crate::codec::{PacketReader, PacketWriter};
use crate::error::Result;
use crate::types::{ForceSensor, RotatorSensor};

/// Opcode constants.
pub mod opcode {
    pub const HANDSHAKE: u16 = 0xF0;
    pub const PONG: u16 = 0x01;
    pub const PING: u16 = 0x01;
    pub const FORCE_SENSOR: u16 = 0x02;
    pub const ROTATION_REQUEST: u16 = 0x02;
    pub const ROTATOR: u16 = 0x03;
}

/// Static mixing key applied to outbound ping nonces.
pub const PING_KEY: i32 = 0x2010_1010;

/// Packets sent by a sensor client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientPacket {
    /// Reserved handshake; carries nothing the server acts on.
    Handshake,
    /// Reply to a ping, echoing the un-mixed nonce.
    Pong { code: i32 },
    /// Latest force plate reading.
    ForceSensorReport(ForceSensor),
    /// Latest rotator state.
    RotatorReport(RotatorSensor),
    /// Any opcode this server does not understand.
    Unknown { opcode: u16 },
}

impl ClientPacket {
    /// Decode a frame payload.
    ///
    /// Fails with `ProtocolError::Truncated` when the payload is too short
    /// for the opcode or for its fixed fields. Bytes beyond the fixed fields
    /// are ignored.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PacketReader::new(payload);
        let packet = match r.read_u16()? {
            opcode::HANDSHAKE => ClientPacket::Handshake,
            opcode::PONG => ClientPacket::Pong { code: r.read_i32()? },
            opcode::FORCE_SENSOR => ClientPacket::ForceSensorReport(ForceSensor {
                front: r.read_u32()?,
                back: r.read_u32()?,
                left: r.read_u32()?,
                right: r.read_u32()?,
            }),
            opcode::ROTATOR => ClientPacket::RotatorReport(read_rotator(&mut r)?),
            other => ClientPacket::Unknown { opcode: other },
        };
        Ok(packet)
    }

    /// Encode to a frame payload (opcode + fields). Used by clients.
    ///
    /// `Unknown` encodes as its bare opcode.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = PacketWriter::with_capacity(18);
        match self {
            ClientPacket::Handshake => {
                w.write_u16(opcode::HANDSHAKE);
            }
            ClientPacket::Pong { code } => {
                w.write_u16(opcode::PONG).write_i32(*code);
            }
            ClientPacket::ForceSensorReport(force) => {
                w.write_u16(opcode::FORCE_SENSOR)
                    .write_u32(force.front)
                    .write_u32(force.back)
                    .write_u32(force.left)
                    .write_u32(force.right);
            }
            ClientPacket::RotatorReport(rotator) => {
                w.write_u16(opcode::ROTATOR);
                write_rotator(&mut w, rotator);
            }
            ClientPacket::Unknown { opcode } => {
                w.write_u16(*opcode);
            }
        }
        w.into_inner()
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientPacket::Handshake => "Handshake",
            ClientPacket::Pong { .. } => "Pong",
            ClientPacket::ForceSensorReport(_) => "ForceSensorReport",
            ClientPacket::RotatorReport(_) => "RotatorReport",
            ClientPacket::Unknown { .. } => "Unknown",
        }
    }
}

/// Packets sent by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerPacket {
    /// Liveness probe. `code` is already mixed with `PING_KEY`.
    Ping { code: i32 },
    /// Ask a client to move a rotator.
    RotationRequest(RotatorSensor),
}

impl ServerPacket {
    /// Build a ping for a raw nonce, applying the mixing key.
    pub fn ping_for_nonce(nonce: i32) -> Self {
        ServerPacket::Ping {
            code: nonce ^ PING_KEY,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = PacketWriter::with_capacity(10);
        match self {
            ServerPacket::Ping { code } => {
                w.write_u16(opcode::PING).write_i32(*code);
            }
            ServerPacket::RotationRequest(rotator) => {
                w.write_u16(opcode::ROTATION_REQUEST);
                write_rotator(&mut w, rotator);
            }
        }
        w.into_inner()
    }

    /// Decode a frame payload received from the server. Returns `Ok(None)`
    /// for opcodes a client does not know.
    pub fn decode(payload: &[u8]) -> Result<Option<Self>> {
        let mut r = PacketReader::new(payload);
        let packet = match r.read_u16()? {
            opcode::PING => Some(ServerPacket::Ping { code: r.read_i32()? }),
            opcode::ROTATION_REQUEST => Some(ServerPacket::RotationRequest(read_rotator(&mut r)?)),
            _ => None,
        };
        Ok(packet)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerPacket::Ping { .. } => "Ping",
            ServerPacket::RotationRequest(_) => "RotationRequest",
        }
    }
}

/// The Pong a client should send in reply to `ping_code`.
pub fn pong_for_ping(ping_code: i32) -> ClientPacket {
    ClientPacket::Pong {
        code: ping_code ^ PING_KEY,
    }
}

fn read_rotator(r: &mut PacketReader<'_>) -> Result<RotatorSensor> {
    Ok(RotatorSensor {
        kind: r.read_u16()?,
        id: r.read_u16()?,
        rotation: r.read_i32()?,
    })
}

fn write_rotator(w: &mut PacketWriter, rotator: &RotatorSensor) {
    w.write_u16(rotator.kind)
        .write_u16(rotator.id)
        .write_i32(rotator.rotation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;

    #[test]
    fn force_report_layout() {
        let packet = ClientPacket::ForceSensorReport(ForceSensor {
            front: 1,
            back: 2,
            left: 0x0102_0304,
            right: u32::MAX,
        });
        assert_eq!(
            packet.encode(),
            vec![
                0x02, 0x00, // opcode
                1, 0, 0, 0, // front
                2, 0, 0, 0, // back
                4, 3, 2, 1, // left
                0xFF, 0xFF, 0xFF, 0xFF, // right
            ]
        );
    }

    #[test]
    fn force_report_survives_encode_decode() {
        let quads = [
            (0, 0, 0, 0),
            (1, 2, 3, 4),
            (u32::MAX, 0, u32::MAX, 0),
            (0xDEAD_BEEF, 0x0BAD_F00D, 7, 0x8000_0000),
        ];
        for (front, back, left, right) in quads {
            let force = ForceSensor {
                front,
                back,
                left,
                right,
            };
            let bytes = ClientPacket::ForceSensorReport(force).encode();
            assert_eq!(
                ClientPacket::decode(&bytes).unwrap(),
                ClientPacket::ForceSensorReport(force)
            );
        }
    }

    #[test]
    fn rotator_report_decodes_signed_rotation() {
        let bytes = [0x03, 0x00, 0x05, 0x00, 0x09, 0x00, 0xF6, 0xFF, 0xFF, 0xFF];
        assert_eq!(
            ClientPacket::decode(&bytes).unwrap(),
            ClientPacket::RotatorReport(RotatorSensor {
                kind: 5,
                id: 9,
                rotation: -10
            })
        );
    }

    #[test]
    fn handshake_and_unknown_opcodes() {
        assert_eq!(
            ClientPacket::decode(&[0xF0, 0x00]).unwrap(),
            ClientPacket::Handshake
        );
        assert_eq!(
            ClientPacket::decode(&[0x7E, 0x01, 0xAA, 0xBB]).unwrap(),
            ClientPacket::Unknown { opcode: 0x017E }
        );
    }

    #[test]
    fn short_force_report_is_truncated_error() {
        // Declared body of 6 bytes: opcode 0x0002 plus one 4-byte field.
        let err = ClientPacket::decode(&[0x02, 0x00, 0x01, 0x00, 0x00, 0x00]).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Truncated {
                needed: 4,
                remaining: 0
            }
        );
    }

    #[test]
    fn payload_without_full_opcode_is_truncated_error() {
        assert!(ClientPacket::decode(&[]).is_err());
        assert!(ClientPacket::decode(&[0x02]).is_err());
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut bytes = ClientPacket::Pong { code: 42 }.encode();
        bytes.extend_from_slice(&[9, 9, 9]);
        assert_eq!(
            ClientPacket::decode(&bytes).unwrap(),
            ClientPacket::Pong { code: 42 }
        );
    }

    #[test]
    fn ping_mixing_is_undone_by_pong() {
        let nonce = 123_456;
        let ping = ServerPacket::ping_for_nonce(nonce);
        let ServerPacket::Ping { code } = ping else {
            panic!("expected Ping");
        };
        assert_ne!(code, nonce);
        assert_eq!(pong_for_ping(code), ClientPacket::Pong { code: nonce });
    }

    #[test]
    fn server_packets_decode_on_client_side() {
        let request = ServerPacket::RotationRequest(RotatorSensor {
            kind: 1,
            id: 2,
            rotation: -90,
        });
        assert_eq!(ServerPacket::decode(&request.encode()).unwrap(), Some(request));

        let ping = ServerPacket::Ping { code: -7 };
        assert_eq!(ServerPacket::decode(&ping.encode()).unwrap(), Some(ping));

        assert_eq!(ServerPacket::decode(&[0x44, 0x00]).unwrap(), None);
    }
}
