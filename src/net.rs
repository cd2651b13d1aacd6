use log::{debug, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use crate::error::{AvmuError, AvmuResult};
use crate::protocol::{self, opcode, Command, Reply, FRAME_OVERHEAD, MAX_BODY_LEN, STATUS_OK};
use crate::traits::Transport;

/// Sequence number reserved for transport-level pings.
const PING_SEQ: u16 = 0xFFFF;

/// Smallest timeout the OS accepts; zero would mean "block forever".
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

pub fn create_unit_socket(peer: SocketAddrV4) -> AvmuResult<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    let local = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
    socket.bind(&local.into())?;
    socket.connect(&peer.into())?;
    if let Err(e) = socket.set_recv_buffer_size(1 << 20) {
        warn!("Failed to enlarge receive buffer: {}", e);
    }
    Ok(socket.into())
}

/// UDP link to a unit.
#[derive(Default)]
pub struct UdpTransport {
    socket: Option<UdpSocket>,
    peer: Option<SocketAddrV4>,
}

impl UdpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peer(&self) -> Option<SocketAddrV4> {
        self.peer
    }

    fn socket(&self) -> AvmuResult<&UdpSocket> {
        self.socket.as_ref().ok_or(AvmuError::NotConnected)
    }

    /// Throw away anything queued from an earlier exchange.
    fn drain(&self) -> AvmuResult<()> {
        let sock = self.socket()?;
        sock.set_nonblocking(true)?;
        let mut buf = [0u8; 2048];
        let mut dropped = 0;
        loop {
            match sock.recv(&mut buf) {
                Ok(_) => dropped += 1,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
        sock.set_nonblocking(false)?;
        if dropped > 0 {
            debug!("Discarded {} stale datagrams", dropped);
        }
        Ok(())
    }
}

impl Transport for UdpTransport {
    fn connect(&mut self, addr: SocketAddrV4, timeout: Duration) -> AvmuResult<()> {
        let socket = create_unit_socket(addr)?;
        socket.set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))?;
        info!("UDP link to {} open (local {})", addr, socket.local_addr()?);
        self.socket = Some(socket);
        self.peer = Some(addr);
        self.drain()
    }

    fn send_command(&mut self, body: &[u8]) -> AvmuResult<()> {
        let framed = protocol::frame(body)?;
        let sent = self.socket()?.send(&framed)?;
        if sent != framed.len() {
            return Err(AvmuError::Socket(std::io::Error::new(
                ErrorKind::WriteZero,
                format!("sent {} of {} bytes", sent, framed.len()),
            )));
        }
        Ok(())
    }

    fn receive_reply(&mut self, timeout: Duration) -> AvmuResult<Vec<u8>> {
        let sock = self.socket()?;
        sock.set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))?;
        // Full size, so a late sweep frame is read whole and can be matched as stale.
        let mut buf = vec![0u8; MAX_BODY_LEN + FRAME_OVERHEAD];
        match sock.recv(&mut buf) {
            Ok(size) => protocol::unframe(&buf[..size]),
            Err(ref e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Err(AvmuError::NoResponse { timeout_ms: timeout.as_millis() as u64 })
            }
            Err(e) => Err(AvmuError::Socket(e)),
        }
    }

    fn ping(&mut self, timeout: Duration) -> bool {
        let body = Command::new(opcode::PING, PING_SEQ, Vec::new()).encode();
        if self.send_command(&body).is_err() {
            return false;
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.receive_reply(remaining).and_then(|b| Reply::decode(&b)) {
                Ok(r) if r.opcode == opcode::PING && r.seq == PING_SEQ => return r.status == STATUS_OK,
                Ok(_) => continue,
                Err(AvmuError::CorruptReply(_)) | Err(AvmuError::UnexpectedReply(_)) => continue,
                Err(_) => return false,
            }
        }
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            info!("UDP link to {:?} closed", self.peer);
        }
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }
}
