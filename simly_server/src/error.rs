// Error type for the listen server.
//
// Failures are session-scoped except `Bind`, which keeps the server from
// starting at all. Nothing here is allowed to end the loop thread; the loop
// logs session errors and closes the offending session instead.

use std::io;
use std::net::SocketAddr;

use simly_protocol::ProtocolError;

/// Result alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Creating, binding, or listening on the server socket failed.
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// `start` called while the loop is already running.
    #[error("server is already running")]
    AlreadyRunning,

    /// Operation needs a running loop.
    #[error("server is not running")]
    NotRunning,

    /// No session is registered under this address.
    #[error("unknown client: {0}")]
    UnknownClient(String),

    /// A session with this address is already registered.
    #[error("duplicate client address: {0}")]
    DuplicateKey(String),

    /// Writing to a client failed; the session has been closed.
    #[error("send to {address} failed: {source}")]
    Send {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Encoding an outbound packet failed (empty or oversized payload).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Loading the configuration file failed.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
