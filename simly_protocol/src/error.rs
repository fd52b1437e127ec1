// Error type for codec, framing, and packet decoding.

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Everything that can go wrong turning bytes into packets or back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Fewer bytes were buffered than the field being read requires.
    #[error("truncated payload: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// Attempt to frame a zero-length payload.
    #[error("refusing to send an empty packet")]
    EmptyPacket,

    /// Payload does not fit the 2-byte length prefix.
    #[error("payload too large: {len} bytes (max {max})")]
    Oversized { len: usize, max: usize },
}
