//! Socket seam between the engine and the host network stack.
//!
//! Every socket the engine opens goes through [`Net`], so tests can swap
//! the whole stack for a scripted one and feed synthetic bytes through the
//! receiver without touching a real wire.

pub mod raw;

pub use raw::RawNet;

use futures::future::BoxFuture;
use std::io;
use std::net::{IpAddr, SocketAddr};

use crate::options::Family;

/// Raw ICMP socket surface used by the shared receiver. One per family.
pub trait Wire: Send + Sync {
    /// Receive one message. Implementations use a short internal poll
    /// timeout and return `WouldBlock`/`TimedOut` when idle so the
    /// receiver loop can observe cancellation and its grace timer.
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, IpAddr)>;

    /// Set the hop limit and transmit `packet` to `dest`.
    fn send_to(&self, packet: &[u8], dest: IpAddr, hop_limit: u8) -> io::Result<usize>;
}

/// A UDP probe socket bound to `(unspecified, 0)`; the kernel-assigned
/// source port is the probe's correlation identifier.
pub trait DatagramProbe: Send {
    fn source_port(&self) -> u16;
    fn send_to(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize>;
}

/// A TCP probe socket bound to `(unspecified, 0)`. `connect` resolves
/// when the kernel reports the handshake outcome.
pub trait StreamProbe: Send {
    fn source_port(&self) -> u16;
    fn connect(self: Box<Self>, dest: SocketAddr) -> BoxFuture<'static, io::Result<()>>;
}

/// Factory for the sockets the engine opens.
pub trait Net: Send + Sync + 'static {
    fn open_wire(&self, family: Family) -> io::Result<Box<dyn Wire>>;
    fn open_datagram(&self, family: Family, hop_limit: u8) -> io::Result<Box<dyn DatagramProbe>>;
    fn open_stream(&self, family: Family, hop_limit: u8) -> io::Result<Box<dyn StreamProbe>>;
}
