// Listen server configuration.
//
// Every field has a default, so a config file only needs to name what it
// changes. Files are JSON (the same serde_json stack the protocol types use);
// the binary layers command-line flags on top (see `main.rs`).
//
// Example:
//   { "listen_port": 3001, "ping_enabled": true, "ping_interval_secs": 5.0 }

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};

/// Configuration for a `Server`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port used by `Server::start_default` and auto-listen.
    pub listen_port: u16,
    /// Interface to bind. All interfaces by default.
    pub bind_address: Ipv4Addr,
    /// Pending-connection queue length passed to `listen(2)`.
    pub listen_backlog: i32,
    /// Socket send/receive buffer size in bytes, also the size of each
    /// non-blocking read.
    pub buffer_max_size: usize,
    /// Start listening as soon as the server is launched.
    pub auto_listen: bool,
    /// Run the ping/pong liveness check.
    pub ping_enabled: bool,
    /// Seconds between liveness checks. A silent client is dropped after
    /// roughly twice this.
    pub ping_interval_secs: f32,
    /// Pause between loop ticks, in microseconds.
    pub tick_interval_micros: u64,
    /// Also deliver every decoded frame as `ServerEvent::ReceivedBytes`.
    pub emit_raw_frames: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: 3001,
            bind_address: Ipv4Addr::UNSPECIFIED,
            listen_backlog: 8,
            buffer_max_size: 2048,
            auto_listen: true,
            ping_enabled: false,
            ping_interval_secs: 10.0,
            tick_interval_micros: 100,
            emit_raw_frames: false,
        }
    }
}

impl ServerConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Parse and validate a JSON config document.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_max_size == 0 {
            return Err(ServerError::Config("buffer_max_size must be > 0".into()));
        }
        if self.listen_backlog <= 0 {
            return Err(ServerError::Config("listen_backlog must be > 0".into()));
        }
        if self.ping_interval_secs.is_nan() || self.ping_interval_secs <= 0.0 {
            return Err(ServerError::Config(
                "ping_interval_secs must be a positive number".into(),
            ));
        }
        Duration::try_from_secs_f32(self.ping_interval_secs)
            .map_err(|e| ServerError::Config(format!("ping_interval_secs: {e}")))?;
        Ok(())
    }

    /// Saturates instead of panicking on values `validate` rejects.
    pub fn ping_interval(&self) -> Duration {
        Duration::try_from_secs_f32(self.ping_interval_secs).unwrap_or(Duration::MAX)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(self.tick_interval_micros)
    }

    /// Socket address for a given port on the configured interface.
    pub fn listen_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.bind_address, port))
    }
}
