//! Host-kernel implementations of the socket seam, built on socket2.

use futures::future::BoxFuture;
use socket2::{Domain, Protocol as SockProtocol, SockAddr, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::net::{DatagramProbe, Net, StreamProbe, Wire};
use crate::options::Family;

/// Poll timeout on the receiver socket; bounds how quickly the receive
/// loop observes cancellation and the grace timer.
const RECV_POLL: Duration = Duration::from_millis(100);

fn domain(family: Family) -> Domain {
    match family {
        Family::V4 => Domain::IPV4,
        Family::V6 => Domain::IPV6,
    }
}

fn set_hop_limit(socket: &Socket, family: Family, hop_limit: u8) -> io::Result<()> {
    match family {
        Family::V4 => socket.set_ttl(u32::from(hop_limit)),
        Family::V6 => socket.set_unicast_hops_v6(u32::from(hop_limit)),
    }
}

/// The real network stack.
pub struct RawNet;

impl Net for RawNet {
    fn open_wire(&self, family: Family) -> io::Result<Box<dyn Wire>> {
        let protocol = match family {
            Family::V4 => SockProtocol::ICMPV4,
            Family::V6 => SockProtocol::ICMPV6,
        };
        let socket = Socket::new(domain(family), Type::RAW, Some(protocol))?;
        socket.set_read_timeout(Some(RECV_POLL))?;
        // Headroom for bursts of error messages at high probe rates
        socket.set_recv_buffer_size(1024 * 1024)?;

        Ok(Box::new(RawWire { socket, family }))
    }

    fn open_datagram(&self, family: Family, hop_limit: u8) -> io::Result<Box<dyn DatagramProbe>> {
        let socket = Socket::new(domain(family), Type::DGRAM, Some(SockProtocol::UDP))?;
        set_hop_limit(&socket, family, hop_limit)?;
        socket.bind(&SockAddr::from(SocketAddr::new(family.unspecified(), 0)))?;

        let port = local_port(&socket)?;
        Ok(Box::new(RawDatagramProbe { socket, port }))
    }

    fn open_stream(&self, family: Family, hop_limit: u8) -> io::Result<Box<dyn StreamProbe>> {
        let socket = Socket::new(domain(family), Type::STREAM, Some(SockProtocol::TCP))?;
        set_hop_limit(&socket, family, hop_limit)?;
        socket.set_nonblocking(true)?;
        socket.bind(&SockAddr::from(SocketAddr::new(family.unspecified(), 0)))?;

        let port = local_port(&socket)?;
        let socket = tokio::net::TcpSocket::from_std_stream(socket.into());
        Ok(Box::new(RawStreamProbe { socket, port }))
    }
}

fn local_port(socket: &Socket) -> io::Result<u16> {
    socket
        .local_addr()?
        .as_socket()
        .map(|addr| addr.port())
        .ok_or_else(|| io::Error::other("socket bound to a non-IP address"))
}

struct RawWire {
    socket: Socket,
    family: Family,
}

impl Wire for RawWire {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, IpAddr)> {
        let uninit: &mut [MaybeUninit<u8>] = unsafe {
            std::slice::from_raw_parts_mut(buf.as_mut_ptr().cast::<MaybeUninit<u8>>(), buf.len())
        };
        let (len, addr) = self.socket.recv_from(uninit)?;
        let ip = addr
            .as_socket()
            .map(|s| s.ip())
            .ok_or_else(|| io::Error::other("message from a non-IP peer"))?;
        Ok((len, ip))
    }

    fn send_to(&self, packet: &[u8], dest: IpAddr, hop_limit: u8) -> io::Result<usize> {
        set_hop_limit(&self.socket, self.family, hop_limit)?;
        self.socket
            .send_to(packet, &SockAddr::from(SocketAddr::new(dest, 0)))
    }
}

struct RawDatagramProbe {
    socket: Socket,
    port: u16,
}

impl DatagramProbe for RawDatagramProbe {
    fn source_port(&self) -> u16 {
        self.port
    }

    fn send_to(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(payload, &SockAddr::from(dest))
    }
}

struct RawStreamProbe {
    socket: tokio::net::TcpSocket,
    port: u16,
}

impl StreamProbe for RawStreamProbe {
    fn source_port(&self) -> u16 {
        self.port
    }

    fn connect(self: Box<Self>, dest: SocketAddr) -> BoxFuture<'static, io::Result<()>> {
        Box::pin(async move {
            // The stream is dropped as soon as the handshake settles; the
            // probe only needs the outcome.
            let _stream = self.socket.connect(dest).await?;
            Ok(())
        })
    }
}
