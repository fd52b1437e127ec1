// CLI entry point for the sensor listen server.
//
// Starts a standalone server and logs every event it produces. Useful for
// bench-testing devices before the server is embedded in an application.
// See `server.rs` for the loop architecture and `session.rs` for per-client
// state.
//
// Usage:
//   simly-server [OPTIONS]
//     --config <FILE>          JSON config file (flags below override it)
//     --port <PORT>            Listen port (default: 3001)
//     --bind <ADDR>            IPv4 interface to bind (default: 0.0.0.0)
//     --ping-interval <SECS>   Enable keep-alive pings at this interval
//     --no-ping                Disable keep-alive pings
//     --raw                    Also log every raw frame
//
// Log verbosity follows `RUST_LOG` (default: info).

use std::time::Duration;

use simly_protocol::{ForceSensor, RotatorSensor};
use simly_server::{Server, ServerConfig, ServerObserver};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = parse_args();
    config.auto_listen = true;

    let (server, queue) = match Server::launch(config) {
        Ok(result) => result,
        Err(e) => {
            log::error!("failed to start server: {e}");
            std::process::exit(1);
        }
    };
    if let Some(addr) = server.local_addr() {
        log::info!("sensor server listening on {addr}, press Ctrl+C to stop");
    }

    // The process ends on SIGINT; the OS tears down the sockets.
    let mut logger = EventLogger::default();
    loop {
        if let Some(event) = queue.recv_timeout(Duration::from_secs(1)) {
            logger.on_event(&event);
        }
    }
}

/// Logs each event, with sensor payloads rendered as JSON.
#[derive(Default)]
struct EventLogger {
    connected: usize,
}

impl ServerObserver for EventLogger {
    fn on_listen_begin(&mut self) {
        log::info!("listen begin");
    }

    fn on_listen_end(&mut self) {
        log::info!("listen end");
    }

    fn on_client_connected(&mut self, address: &str) {
        self.connected += 1;
        log::info!("+ {address} ({} connected)", self.connected);
    }

    fn on_client_disconnected(&mut self, address: &str) {
        self.connected = self.connected.saturating_sub(1);
        log::info!("- {address} ({} connected)", self.connected);
    }

    fn on_force_sensor_data(&mut self, address: &str, data: ForceSensor) {
        log::info!("{address} force {}", to_json(&data));
    }

    fn on_rotation_data(&mut self, address: &str, data: RotatorSensor) {
        log::info!("{address} rotation {}", to_json(&data));
    }

    fn on_received_bytes(&mut self, address: &str, payload: &[u8]) {
        log::debug!("{address} frame {payload:02x?}");
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<{e}>"))
}

/// Parse command-line arguments into a `ServerConfig`. Uses simple
/// `std::env::args()` matching, no clap dependency.
fn parse_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();

    // The config file is the base layer, so find it before applying flags.
    let mut config = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).unwrap_or_else(|| {
                eprintln!("--config requires a file path");
                std::process::exit(1);
            });
            ServerConfig::from_json_file(path).unwrap_or_else(|e| {
                eprintln!("{e}");
                std::process::exit(1);
            })
        }
        None => ServerConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
            }
            "--port" => {
                i += 1;
                config.listen_port =
                    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                        eprintln!("--port requires a valid port number");
                        std::process::exit(1);
                    });
            }
            "--bind" => {
                i += 1;
                config.bind_address =
                    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                        eprintln!("--bind requires an IPv4 address");
                        std::process::exit(1);
                    });
            }
            "--ping-interval" => {
                i += 1;
                config.ping_interval_secs =
                    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                        eprintln!("--ping-interval requires a number of seconds");
                        std::process::exit(1);
                    });
                config.ping_enabled = true;
            }
            "--no-ping" => config.ping_enabled = false,
            "--raw" => config.emit_raw_frames = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    if let Err(e) = config.validate() {
        eprintln!("{e}");
        std::process::exit(1);
    }
    config
}

fn print_usage() {
    println!("Usage: simly-server [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <FILE>          JSON config file (flags override it)");
    println!("  --port <PORT>            Listen port (default: 3001)");
    println!("  --bind <ADDR>            IPv4 interface to bind (default: 0.0.0.0)");
    println!("  --ping-interval <SECS>   Enable keep-alive pings at this interval");
    println!("  --no-ping                Disable keep-alive pings");
    println!("  --raw                    Also log every raw frame");
    println!("  --help, -h               Show this help");
}
