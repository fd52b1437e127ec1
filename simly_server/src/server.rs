// Listen server: the public handle and the polling loop behind it.
//
// Architecture: one dedicated loop thread, no per-client threads.
//
// - **`Server`** is the handle the application holds. `start` binds the
//   listen socket on the calling thread (so bind errors come back
//   synchronously), then spawns the loop thread. `stop` raises the stop flag
//   and joins the thread, so once it returns nothing touches sessions any
//   more. Both are idempotent in the obvious direction: starting twice is an
//   error without side effects, stopping twice is a no-op.
// - **`ListenLoop`** runs on the loop thread and exclusively owns the
//   `SessionRegistry`. Each tick: apply queued commands, accept every pending
//   connection, pull bytes and dispatch frames for every session, run the
//   liveness check, then remove and report sessions that closed during the
//   tick. A short sleep paces the loop; all socket calls are non-blocking.
// - **Commands** (`disconnect_client`, `send_rotation_request`) cross from
//   the application thread to the loop over an `mpsc` channel and are applied
//   at the top of the next tick. Synchronous variants wait for an
//   acknowledgement on a one-shot channel.
// - **Events** go the other way through `EventDispatcher` (see `events.rs`).
//
// No session error ends the loop. Only the stop flag does.

use std::net::{SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use simly_protocol::{RotatorSensor, ServerPacket};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::events::{EventDispatcher, EventQueue, ServerEvent, event_channel};
use crate::liveness::LivenessMonitor;
use crate::registry::SessionRegistry;
use crate::session::ClientSession;
use crate::sockopt;

/// Which sessions a disconnect applies to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisconnectTarget {
    All,
    Client(String),
}

impl From<&str> for DisconnectTarget {
    /// `"All"` selects every client; anything else is an address.
    fn from(value: &str) -> Self {
        if value == "All" {
            DisconnectTarget::All
        } else {
            DisconnectTarget::Client(value.to_string())
        }
    }
}

impl From<String> for DisconnectTarget {
    fn from(value: String) -> Self {
        DisconnectTarget::from(value.as_str())
    }
}

/// Requests applied by the loop thread at the top of a tick.
enum Command {
    Disconnect {
        target: DisconnectTarget,
        ack: Option<Sender<Result<usize>>>,
    },
    SendRotation {
        address: String,
        request: RotatorSensor,
        ack: Sender<Result<()>>,
    },
}

/// State that exists only while the loop thread is alive.
struct RunningLoop {
    keep_running: Arc<AtomicBool>,
    commands: Sender<Command>,
    thread: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// Handle to the listen server.
pub struct Server {
    config: ServerConfig,
    events: EventDispatcher,
    running: Option<RunningLoop>,
}

impl Server {
    /// Create a stopped server and the queue its events will arrive on.
    pub fn new(config: ServerConfig) -> (Self, EventQueue) {
        let (events, queue) = event_channel();
        (
            Self {
                config,
                events,
                running: None,
            },
            queue,
        )
    }

    /// Validate `config`, create the server, and start listening on
    /// `listen_port` if `auto_listen` is set.
    pub fn launch(config: ServerConfig) -> Result<(Self, EventQueue)> {
        config.validate()?;
        let auto_listen = config.auto_listen;
        let (mut server, queue) = Self::new(config);
        if auto_listen {
            server.start_default()?;
        }
        Ok((server, queue))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address actually bound, useful when listening on port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Start listening on the configured `listen_port`.
    pub fn start_default(&mut self) -> Result<SocketAddr> {
        self.start(self.config.listen_port)
    }

    /// Bind `port` on the configured interface and spawn the loop thread.
    ///
    /// Fails with `AlreadyRunning` if the loop is up, `Config` if the
    /// configuration does not validate, or `Bind` if the socket cannot be
    /// set up; in every case nothing changes.
    pub fn start(&mut self, port: u16) -> Result<SocketAddr> {
        if self.running.is_some() {
            log::warn!("start requested while already listening");
            return Err(ServerError::AlreadyRunning);
        }
        self.config.validate()?;

        let addr = SocketAddrV4::new(self.config.bind_address, port);
        let listener = sockopt::bind_listener(
            addr,
            self.config.listen_backlog,
            self.config.buffer_max_size,
        )
        .and_then(|l| l.set_nonblocking(true).map(|()| l))
        .and_then(|l| l.local_addr().map(|bound| (l, bound)));
        let (listener, local_addr) = listener.map_err(|source| {
            log::error!("failed to listen on {addr}: {source}");
            ServerError::Bind {
                addr: SocketAddr::V4(addr),
                source,
            }
        })?;

        let keep_running = Arc::new(AtomicBool::new(true));
        let (commands_tx, commands_rx) = mpsc::channel();
        let listen_loop = ListenLoop::new(
            listener,
            local_addr,
            &self.config,
            Arc::clone(&keep_running),
            commands_rx,
            self.events.clone(),
        );

        let thread = thread::Builder::new()
            .name("simly-listen".to_string())
            .spawn(move || listen_loop.run())?;

        self.running = Some(RunningLoop {
            keep_running,
            commands: commands_tx,
            thread,
            local_addr,
        });
        Ok(local_addr)
    }

    /// Stop the loop, close every session, and wait for the thread to exit.
    /// Safe to call when not running.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        log::info!("stopping listen server on {}", running.local_addr);
        running.keep_running.store(false, Ordering::SeqCst);
        if running.thread.join().is_err() {
            log::error!("listen loop thread panicked");
        }
    }

    /// Disconnect one client by address, or all of them.
    ///
    /// With `defer` the request is queued for the next tick and this returns
    /// `Ok(0)` immediately. Without it, the call waits for the loop to apply
    /// it and returns how many sessions were closed; an unknown address is
    /// `UnknownClient`.
    pub fn disconnect_client(
        &self,
        target: impl Into<DisconnectTarget>,
        defer: bool,
    ) -> Result<usize> {
        let running = self.running.as_ref().ok_or(ServerError::NotRunning)?;
        let target = target.into();
        if defer {
            running
                .commands
                .send(Command::Disconnect { target, ack: None })
                .map_err(|_| ServerError::NotRunning)?;
            return Ok(0);
        }
        let (ack_tx, ack_rx) = mpsc::channel();
        running
            .commands
            .send(Command::Disconnect {
                target,
                ack: Some(ack_tx),
            })
            .map_err(|_| ServerError::NotRunning)?;
        ack_rx.recv().map_err(|_| ServerError::NotRunning)?
    }

    /// Send a `RotationRequest` to the client at `address`. Waits for the
    /// loop to perform the write.
    pub fn send_rotation_request(&self, address: &str, request: RotatorSensor) -> Result<()> {
        let running = self.running.as_ref().ok_or(ServerError::NotRunning)?;
        let (ack_tx, ack_rx) = mpsc::channel();
        running
            .commands
            .send(Command::SendRotation {
                address: address.to_string(),
                request,
                ack: ack_tx,
            })
            .map_err(|_| ServerError::NotRunning)?;
        ack_rx.recv().map_err(|_| ServerError::NotRunning)?
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Loop-thread state. Everything here is touched by the loop thread only.
struct ListenLoop {
    listener: TcpListener,
    local_addr: SocketAddr,
    keep_running: Arc<AtomicBool>,
    commands: Receiver<Command>,
    events: EventDispatcher,
    registry: SessionRegistry,
    liveness: LivenessMonitor,
    scratch: Vec<u8>,
    buffer_max_size: usize,
    emit_raw_frames: bool,
    tick_interval: std::time::Duration,
}

impl ListenLoop {
    fn new(
        listener: TcpListener,
        local_addr: SocketAddr,
        config: &ServerConfig,
        keep_running: Arc<AtomicBool>,
        commands: Receiver<Command>,
        events: EventDispatcher,
    ) -> Self {
        Self {
            listener,
            local_addr,
            keep_running,
            commands,
            events,
            registry: SessionRegistry::new(),
            liveness: LivenessMonitor::new(config.ping_enabled, config.ping_interval()),
            scratch: vec![0u8; config.buffer_max_size],
            buffer_max_size: config.buffer_max_size,
            emit_raw_frames: config.emit_raw_frames,
            tick_interval: config.tick_interval(),
        }
    }

    fn run(mut self) {
        log::info!(
            "listening on {} (ping {})",
            self.local_addr,
            if self.liveness.is_enabled() {
                format!("every {:?}", self.liveness.interval())
            } else {
                "off".to_string()
            }
        );
        self.events.emit(ServerEvent::ListenBegin);

        while self.keep_running.load(Ordering::SeqCst) {
            self.tick(Instant::now());
            thread::sleep(self.tick_interval);
        }

        self.shutdown();
    }

    fn tick(&mut self, now: Instant) {
        self.apply_commands();
        self.accept_pending(now);
        self.service_sessions(now);
        self.remove_closed();
    }

    fn apply_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(Command::Disconnect { target, ack }) => {
                    let result = self.disconnect(&target);
                    if let Err(e) = &result {
                        log::warn!("disconnect {target:?}: {e}");
                    }
                    if let Some(ack) = ack {
                        let _ = ack.send(result);
                    }
                }
                Ok(Command::SendRotation {
                    address,
                    request,
                    ack,
                }) => {
                    let result = match self.registry.get_mut(&address) {
                        Some(session) => session.send(&ServerPacket::RotationRequest(request)),
                        None => Err(ServerError::UnknownClient(address)),
                    };
                    let _ = ack.send(result);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // The handle is gone without calling stop.
                    self.keep_running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
    }

    /// Close and unregister sessions immediately, reporting each one.
    fn disconnect(&mut self, target: &DisconnectTarget) -> Result<usize> {
        let removed = match target {
            DisconnectTarget::All => self.registry.drain(),
            DisconnectTarget::Client(address) => match self.registry.remove(address) {
                Some(session) => vec![session],
                None => return Err(ServerError::UnknownClient(address.clone())),
            },
        };
        let count = removed.len();
        for mut session in removed {
            session.close();
            self.report_disconnected(session);
        }
        Ok(count)
    }

    fn accept_pending(&mut self, now: Instant) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.register(stream, peer, now),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::warn!("accept failed: {e}");
                    break;
                }
            }
        }
    }

    fn register(&mut self, stream: TcpStream, peer: SocketAddr, now: Instant) {
        if let Err(e) = stream.set_nonblocking(true) {
            log::warn!("dropping {peer}: cannot make socket non-blocking: {e}");
            return;
        }
        if let Err(e) = sockopt::apply_buffer_sizes(&stream, self.buffer_max_size) {
            log::debug!("{peer}: keeping default socket buffers: {e}");
        }

        let address = peer.to_string();
        match self
            .registry
            .add(ClientSession::new(address.clone(), stream, now))
        {
            Ok(()) => {
                log::info!("client connected: {address}");
                self.events.emit(ServerEvent::ClientConnected { address });
            }
            Err(e) => log::warn!("rejecting connection: {e}"),
        }
    }

    fn service_sessions(&mut self, now: Instant) {
        for session in self.registry.iter_mut() {
            session.pull_available(&mut self.scratch);
            session.process_frames(&self.events, self.emit_raw_frames);
            self.liveness.check(session, now);
        }
    }

    fn remove_closed(&mut self) {
        for address in self.registry.closed_addresses() {
            if let Some(session) = self.registry.remove(&address) {
                self.report_disconnected(session);
            }
        }
    }

    fn report_disconnected(&self, session: ClientSession) {
        let address = session.address().to_string();
        // Dropping the session releases the socket.
        drop(session);
        log::info!("client disconnected: {address}");
        self.events.emit(ServerEvent::ClientDisconnected { address });
    }

    fn shutdown(&mut self) {
        let sessions = self.registry.drain();
        log::info!(
            "listen loop on {} exiting, closing {} session(s)",
            self.local_addr,
            sessions.len()
        );
        for mut session in sessions {
            session.close();
        }
        self.events.emit(ServerEvent::ListenEnd);
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::*;

    fn local_config() -> ServerConfig {
        ServerConfig {
            bind_address: Ipv4Addr::LOCALHOST,
            listen_port: 0,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn disconnect_target_from_str() {
        assert_eq!(DisconnectTarget::from("All"), DisconnectTarget::All);
        assert_eq!(
            DisconnectTarget::from("127.0.0.1:9"),
            DisconnectTarget::Client("127.0.0.1:9".into())
        );
        assert_eq!(
            DisconnectTarget::from(String::from("all")),
            DisconnectTarget::Client("all".into())
        );
    }

    #[test]
    fn stop_without_start_is_noop() {
        let (mut server, queue) = Server::new(local_config());
        server.stop();
        server.stop();
        assert!(!server.is_running());
        assert!(queue.poll().is_empty());
    }

    #[test]
    fn start_then_stop_emits_begin_and_end() {
        let (mut server, queue) = Server::new(local_config());
        let addr = server.start(0).unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr(), Some(addr));
        server.stop();
        server.stop();
        assert!(!server.is_running());
        assert_eq!(
            queue.poll(),
            vec![ServerEvent::ListenBegin, ServerEvent::ListenEnd]
        );
    }

    #[test]
    fn double_start_fails_cleanly() {
        let (mut server, _queue) = Server::new(local_config());
        let addr = server.start(0).unwrap();
        assert!(matches!(server.start(0), Err(ServerError::AlreadyRunning)));
        assert_eq!(server.local_addr(), Some(addr));
        server.stop();
    }

    #[test]
    fn bind_conflict_is_reported_and_server_stays_stopped() {
        let (mut first, _q1) = Server::new(local_config());
        let addr = first.start(0).unwrap();

        let (mut second, q2) = Server::new(local_config());
        let err = second.start(addr.port()).unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
        assert!(!second.is_running());
        assert!(q2.recv_timeout(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn invalid_config_fails_start_before_binding() {
        let bad = [
            ServerConfig {
                listen_backlog: 0,
                ..local_config()
            },
            ServerConfig {
                buffer_max_size: 0,
                ..local_config()
            },
            ServerConfig {
                ping_interval_secs: 1e30,
                ..local_config()
            },
        ];
        for config in bad {
            let (mut server, queue) = Server::new(config);
            assert!(matches!(server.start(0), Err(ServerError::Config(_))));
            assert!(!server.is_running());
            assert!(queue.recv_timeout(Duration::from_millis(20)).is_none());
        }

        let launched = Server::launch(ServerConfig {
            ping_interval_secs: 1e30,
            ..local_config()
        });
        assert!(matches!(launched, Err(ServerError::Config(_))));
    }

    #[test]
    fn restart_after_stop() {
        let (mut server, queue) = Server::new(local_config());
        server.start(0).unwrap();
        server.stop();
        server.start(0).unwrap();
        server.stop();
        assert_eq!(queue.poll().len(), 4);
    }

    #[test]
    fn commands_require_running_server() {
        let (server, _queue) = Server::new(local_config());
        assert!(matches!(
            server.disconnect_client("All", false),
            Err(ServerError::NotRunning)
        ));
        assert!(matches!(
            server.send_rotation_request("127.0.0.1:1", RotatorSensor::default()),
            Err(ServerError::NotRunning)
        ));
    }

    #[test]
    fn unknown_client_commands_fail_without_side_effects() {
        let (mut server, _queue) = Server::new(local_config());
        server.start(0).unwrap();
        assert!(matches!(
            server.disconnect_client("10.9.9.9:1", false),
            Err(ServerError::UnknownClient(_))
        ));
        assert!(matches!(
            server.send_rotation_request("10.9.9.9:1", RotatorSensor::default()),
            Err(ServerError::UnknownClient(_))
        ));
        assert_eq!(server.disconnect_client("All", false).unwrap(), 0);
        assert!(server.is_running());
    }

    #[test]
    fn launch_respects_auto_listen() {
        let (server, _queue) = Server::launch(ServerConfig {
            auto_listen: false,
            ..local_config()
        })
        .unwrap();
        assert!(!server.is_running());

        let (server, _queue) = Server::launch(local_config()).unwrap();
        assert!(server.is_running());
    }
}
