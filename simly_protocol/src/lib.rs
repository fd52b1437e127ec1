// simly_protocol — wire protocol for Simly hardware sensor clients.
//
// Defines the binary framing, the little-endian codec, and the typed packets
// exchanged between sensor devices and the listen server
// (`simly_server`). Shared by both sides; no networking or threads here.
//
// Module overview:
// - `codec.rs`:    `PacketWriter` / `PacketReader` little-endian primitives.
// - `framing.rs`:  2-byte length prefix framing. `FrameDecoder` is the
//                  incremental decode state machine for non-blocking sockets;
//                  `read_frame` / `write_frame` are blocking helpers.
// - `message.rs`:  Opcodes, `ClientPacket` (inbound) and `ServerPacket`
//                  (outbound), ping nonce mixing.
// - `types.rs`:    Sensor snapshots, `ForceSensor`, `RotatorSensor`.
// - `error.rs`:    `ProtocolError`.
//
// Design decisions:
// - **Hand-rolled binary layout.** Device firmware writes fixed little-endian
//   structs, so fields are read one at a time rather than through a serde
//   format. Sensor types still derive serde traits so consumers can log or
//   forward them as JSON.
// - **Unknown opcodes are values, not errors.** The framing layer has
//   already consumed the whole frame, so skipping it is always safe.

pub mod codec;
pub mod error;
pub mod framing;
pub mod message;
pub mod types;

pub use codec::{PacketReader, PacketWriter};
pub use error::ProtocolError;
pub use framing::{
    DecodeState, FrameDecoder, HEADER_LEN, MAX_PAYLOAD_LEN, encode_frame, read_frame, write_frame,
};
pub use message::{ClientPacket, PING_KEY, ServerPacket, opcode, pong_for_ping};
pub use types::{ForceSensor, RotatorSensor};
