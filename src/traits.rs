use std::net::SocketAddrV4;
use std::time::Duration;

use crate::error::AvmuResult;

/// Datagram link to one unit.
///
/// Bodies passed in and out are unframed; implementations add and strip the
/// length prefix and checksum. Nothing here retries.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Open the link. Fails with `Socket` if the address is unreachable.
    fn connect(&mut self, addr: SocketAddrV4, timeout: Duration) -> AvmuResult<()>;

    fn send_command(&mut self, body: &[u8]) -> AvmuResult<()>;

    /// Block for one reply of any size. `NoResponse` if nothing arrives
    /// within `timeout`, `CorruptReply` if the frame fails its checksum.
    fn receive_reply(&mut self, timeout: Duration) -> AvmuResult<Vec<u8>>;

    /// Liveness probe. Never errors.
    fn ping(&mut self, timeout: Duration) -> bool;

    /// Release the socket. Safe to call more than once.
    fn close(&mut self) {}

    fn is_connected(&self) -> bool;
}
