// Server events and their hand-off to a consumer.
//
// The loop thread never runs consumer code. It pushes `ServerEvent`s into an
// `mpsc` channel through `EventDispatcher`; whoever owns the matching
// `EventQueue` receives them, on whatever thread that is. The loop thread is
// the only producer, so events for any one client arrive in the order the
// loop produced them.
//
// Consumers pick one of three styles:
// - poll: `EventQueue::poll` / `recv_timeout` from their own loop, e.g. a
//   frame-driven application thread;
// - observe: implement `ServerObserver` and call `dispatch_to` periodically;
// - dedicated thread: `spawn_consumer` moves the queue and an observer onto
//   a new thread that runs until the server and all dispatchers are gone.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use simly_protocol::{ForceSensor, RotatorSensor};

/// Notification produced by the listen server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerEvent {
    /// The listen socket is bound and the loop is starting.
    ListenBegin,
    /// The loop has exited and every session is closed.
    ListenEnd,
    ClientConnected {
        address: String,
    },
    ClientDisconnected {
        address: String,
    },
    ForceSensorData {
        address: String,
        data: ForceSensor,
    },
    RotationData {
        address: String,
        data: RotatorSensor,
    },
    /// Raw frame payload, only when `emit_raw_frames` is configured.
    ReceivedBytes {
        address: String,
        payload: Vec<u8>,
    },
}

impl ServerEvent {
    /// Client address the event concerns, if any.
    pub fn address(&self) -> Option<&str> {
        match self {
            ServerEvent::ListenBegin | ServerEvent::ListenEnd => None,
            ServerEvent::ClientConnected { address }
            | ServerEvent::ClientDisconnected { address }
            | ServerEvent::ForceSensorData { address, .. }
            | ServerEvent::RotationData { address, .. }
            | ServerEvent::ReceivedBytes { address, .. } => Some(address),
        }
    }
}

/// Callback interface for event consumers. Every method defaults to a no-op
/// so implementors only override what they care about.
pub trait ServerObserver {
    fn on_listen_begin(&mut self) {}
    fn on_listen_end(&mut self) {}
    fn on_client_connected(&mut self, _address: &str) {}
    fn on_client_disconnected(&mut self, _address: &str) {}
    fn on_force_sensor_data(&mut self, _address: &str, _data: ForceSensor) {}
    fn on_rotation_data(&mut self, _address: &str, _data: RotatorSensor) {}
    fn on_received_bytes(&mut self, _address: &str, _payload: &[u8]) {}

    /// Route one event to the matching method.
    fn on_event(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::ListenBegin => self.on_listen_begin(),
            ServerEvent::ListenEnd => self.on_listen_end(),
            ServerEvent::ClientConnected { address } => self.on_client_connected(address),
            ServerEvent::ClientDisconnected { address } => self.on_client_disconnected(address),
            ServerEvent::ForceSensorData { address, data } => {
                self.on_force_sensor_data(address, *data);
            }
            ServerEvent::RotationData { address, data } => self.on_rotation_data(address, *data),
            ServerEvent::ReceivedBytes { address, payload } => {
                self.on_received_bytes(address, payload);
            }
        }
    }
}

/// Producer half, cloned into the loop thread.
#[derive(Clone, Debug)]
pub struct EventDispatcher {
    tx: Sender<ServerEvent>,
}

impl EventDispatcher {
    /// Queue an event. A consumer that has gone away is not an error for the
    /// server; the event is dropped.
    pub fn emit(&self, event: ServerEvent) {
        log::trace!("event: {event:?}");
        let _ = self.tx.send(event);
    }
}

/// Consumer half. Owned by exactly one execution context.
#[derive(Debug)]
pub struct EventQueue {
    rx: Receiver<ServerEvent>,
}

impl EventQueue {
    /// Drain all queued events without blocking.
    pub fn poll(&self) -> Vec<ServerEvent> {
        self.rx.try_iter().collect()
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ServerEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Deliver every queued event to `observer` on the calling thread.
    /// Returns how many were delivered.
    pub fn dispatch_to(&self, observer: &mut dyn ServerObserver) -> usize {
        let mut delivered = 0;
        for event in self.rx.try_iter() {
            observer.on_event(&event);
            delivered += 1;
        }
        delivered
    }

    /// Run `observer` on a dedicated thread until every dispatcher has been
    /// dropped. The observer is handed back when the thread ends.
    pub fn spawn_consumer<O>(self, mut observer: O) -> std::io::Result<JoinHandle<O>>
    where
        O: ServerObserver + Send + 'static,
    {
        thread::Builder::new()
            .name("simly-events".to_string())
            .spawn(move || {
                for event in self.rx.iter() {
                    observer.on_event(&event);
                }
                observer
            })
    }
}

/// Create a connected dispatcher/queue pair.
pub fn event_channel() -> (EventDispatcher, EventQueue) {
    let (tx, rx) = mpsc::channel();
    (EventDispatcher { tx }, EventQueue { rx })
}
