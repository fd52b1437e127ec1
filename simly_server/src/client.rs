// Device-side client for the sensor link.
//
// `SensorClient` speaks the protocol from the device's end: it sends
// handshakes, sensor reports and pongs, and receives pings and rotation
// requests. The server itself never uses it; it exists for integration tests,
// load tools and bench-top checks against a running server.
//
// Architecture:
// - `connect()` opens the TCP connection on the calling thread and spawns a
//   background reader thread.
// - The reader thread blocks in `read_frame()`, decodes `ServerPacket`s and
//   pushes them into an `mpsc` channel. Unknown opcodes are skipped.
// - The caller holds a `BufWriter<TcpStream>` for sending; every send is
//   flushed immediately.
// - `poll()` drains the inbox without blocking.

use std::io::{BufReader, BufWriter, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use simly_protocol::{
    ClientPacket, ForceSensor, RotatorSensor, ServerPacket, pong_for_ping, read_frame,
    write_frame,
};

use crate::error::Result;

/// Blocking-send, polling-receive client for one sensor connection.
pub struct SensorClient {
    writer: BufWriter<TcpStream>,
    inbox: Receiver<ServerPacket>,
    local_addr: SocketAddr,
    reader_thread: Option<JoinHandle<()>>,
}

impl SensorClient {
    /// Connect to a server and start the reader thread.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let local_addr = stream.local_addr()?;
        let reader = BufReader::new(stream.try_clone()?);

        let (tx, rx) = mpsc::channel();
        let reader_thread = thread::Builder::new()
            .name(format!("simly-client-{}", local_addr.port()))
            .spawn(move || reader_loop(reader, tx))?;

        Ok(Self {
            writer: BufWriter::new(stream),
            inbox: rx,
            local_addr,
            reader_thread: Some(reader_thread),
        })
    }

    /// The address the server knows this client by.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn send_packet(&mut self, packet: &ClientPacket) -> Result<()> {
        write_frame(&mut self.writer, &packet.encode())?;
        Ok(())
    }

    pub fn send_handshake(&mut self) -> Result<()> {
        self.send_packet(&ClientPacket::Handshake)
    }

    pub fn send_force(&mut self, data: ForceSensor) -> Result<()> {
        self.send_packet(&ClientPacket::ForceSensorReport(data))
    }

    pub fn send_rotator(&mut self, data: RotatorSensor) -> Result<()> {
        self.send_packet(&ClientPacket::RotatorReport(data))
    }

    /// Write bytes to the socket as-is, with no framing added. For
    /// exercising malformed or split input.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Drain all received packets (non-blocking).
    pub fn poll(&self) -> Vec<ServerPacket> {
        self.inbox.try_iter().collect()
    }

    /// Wait up to `timeout` for the next packet. `None` on timeout or once
    /// the connection is gone and the inbox is empty.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ServerPacket> {
        match self.inbox.recv_timeout(timeout) {
            Ok(packet) => Some(packet),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Reply to every queued ping with the matching pong and return the
    /// remaining packets in arrival order.
    pub fn answer_pings(&mut self) -> Result<Vec<ServerPacket>> {
        let mut others = Vec::new();
        for packet in self.poll() {
            match packet {
                ServerPacket::Ping { code } => self.send_packet(&pong_for_ping(code))?,
                other => others.push(other),
            }
        }
        Ok(others)
    }

    /// True once the reader thread has seen the connection end.
    pub fn is_disconnected(&self) -> bool {
        self.reader_thread
            .as_ref()
            .is_none_or(JoinHandle::is_finished)
    }

    /// Close both directions of the connection. The reader thread exits on
    /// its next read.
    pub fn shutdown(&mut self) {
        let _ = self.writer.flush();
        let _ = self.writer.get_ref().shutdown(Shutdown::Both);
    }
}

impl Drop for SensorClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Reader thread: read frames until the stream ends, push decoded packets.
fn reader_loop(mut reader: BufReader<TcpStream>, tx: Sender<ServerPacket>) {
    while let Ok(payload) = read_frame(&mut reader) {
        match ServerPacket::decode(&payload) {
            Ok(Some(packet)) => {
                if tx.send(packet).is_err() {
                    break; // Client handle dropped.
                }
            }
            Ok(None) => log::debug!("client: skipping unknown server packet"),
            Err(e) => log::warn!("client: bad server packet: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::{Ipv4Addr, TcpListener};

    use simly_protocol::PING_KEY;

    use super::*;

    fn accept_one() -> (SensorClient, TcpStream) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let client = SensorClient::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        assert_eq!(peer, client.local_addr());
        server
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        (client, server)
    }

    #[test]
    fn reports_arrive_framed() {
        let (mut client, mut server) = accept_one();
        let force = ForceSensor {
            front: 1,
            back: 2,
            left: 3,
            right: 4,
        };
        client.send_handshake().unwrap();
        client.send_force(force).unwrap();

        let first = read_frame(&mut server).unwrap();
        assert_eq!(ClientPacket::decode(&first).unwrap(), ClientPacket::Handshake);
        let second = read_frame(&mut server).unwrap();
        assert_eq!(
            ClientPacket::decode(&second).unwrap(),
            ClientPacket::ForceSensorReport(force)
        );
    }

    #[test]
    fn answer_pings_replies_and_keeps_other_packets() {
        let (mut client, mut server) = accept_one();
        let request = RotatorSensor {
            kind: 1,
            id: 2,
            rotation: -90,
        };
        write_frame(&mut server, &ServerPacket::ping_for_nonce(1234).encode()).unwrap();
        write_frame(&mut server, &ServerPacket::RotationRequest(request).encode()).unwrap();

        let mut others = Vec::new();
        for _ in 0..500 {
            others.extend(client.answer_pings().unwrap());
            if !others.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(others, vec![ServerPacket::RotationRequest(request)]);

        let pong = read_frame(&mut server).unwrap();
        assert_eq!(
            ClientPacket::decode(&pong).unwrap(),
            ClientPacket::Pong { code: 1234 }
        );
        assert_eq!(ServerPacket::ping_for_nonce(1234), ServerPacket::Ping {
            code: 1234 ^ PING_KEY
        });
    }

    #[test]
    fn raw_bytes_are_not_framed() {
        let (mut client, mut server) = accept_one();
        client.send_raw(&[0xAA, 0xBB, 0xCC]).unwrap();
        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn server_close_ends_reader() {
        let (client, server) = accept_one();
        drop(server);
        for _ in 0..500 {
            if client.is_disconnected() {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(client.is_disconnected());
        assert!(client.recv_timeout(Duration::from_millis(10)).is_none());
    }
}
