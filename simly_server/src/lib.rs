// simly_server — TCP listen server for force and rotator sensor clients.
//
// Sensor devices connect over TCP and stream length-prefixed binary packets
// (see the `simly_protocol` crate). The server keeps one session per
// connection, decodes frames as they arrive, mirrors the latest readings per
// client, optionally pings clients to detect dead links, and reports
// everything to the application as `ServerEvent`s.
//
// Module overview:
// - `server.rs`:   `Server` handle and the single polling loop thread that
//                  accepts, reads, dispatches and removes sessions.
// - `session.rs`:  Per-client state: socket, frame decoder, latest sensor
//                  snapshots, outstanding ping nonce.
// - `registry.rs`: Address-keyed session map owned by the loop thread.
// - `liveness.rs`: Ping/pong keep-alive check.
// - `events.rs`:   `ServerEvent`, the event channel, and `ServerObserver`.
// - `config.rs`:   `ServerConfig` with JSON loading.
// - `sockopt.rs`:  Listen socket setup (backlog, SO_REUSEADDR, buffer sizes).
// - `client.rs`:   `SensorClient`, a small device-side client for tests and
//                  tooling.
// - `error.rs`:    `ServerError`.
//
// The server can run as a standalone binary (`main.rs`) or be embedded in
// an application through `Server`.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod liveness;
pub mod registry;
pub mod server;
pub mod session;
pub mod sockopt;

pub use client::SensorClient;
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use events::{EventDispatcher, EventQueue, ServerEvent, ServerObserver, event_channel};
pub use server::{DisconnectTarget, Server};
