//! Scripted in-process network for end-to-end engine tests.
//!
//! Implements the engine's socket seam so synthetic bytes can be fed
//! through the shared receiver exactly as the kernel would deliver them,
//! with per-TTL behavior scripted by the test.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use hoptrace::Family;
use hoptrace::net::{DatagramProbe, Net, StreamProbe, Wire};

/// Scripted behavior of one TTL.
#[derive(Clone)]
pub enum HopScript {
    /// Time-exceeded errors from these router addresses, round-robin
    /// across the hop's probes
    TimeExceeded(Vec<IpAddr>),
    /// Echo reply from the target
    EchoReply,
    /// Port-unreachable from the target
    PortUnreachable,
    /// TCP handshake refused by the target
    ConnectRefused,
    /// No response at all
    Silent,
}

pub struct MockNet {
    target: IpAddr,
    /// Self-reference so probe sockets can hold the hub
    me: std::sync::Weak<MockNet>,
    script: Mutex<HashMap<u8, HopScript>>,
    /// Injection side of the wire; replaced when a fresh receiver opens it
    inject: Mutex<Option<std_mpsc::Sender<(Vec<u8>, IpAddr)>>>,
    /// Per-TTL probe counter, for round-robin responder selection
    sends: Mutex<HashMap<u8, usize>>,
    next_port: AtomicU16,
}

impl MockNet {
    pub fn new(target: IpAddr) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            target,
            me: me.clone(),
            script: Mutex::new(HashMap::new()),
            inject: Mutex::new(None),
            sends: Mutex::new(HashMap::new()),
            next_port: AtomicU16::new(40_000),
        })
    }

    fn hub(&self) -> Arc<MockNet> {
        self.me.upgrade().expect("hub outlives its probes")
    }

    pub fn script(&self, ttl: u8, hop: HopScript) {
        self.script.lock().insert(ttl, hop);
    }

    /// Push raw bytes into the receiver as if they arrived from `peer`.
    pub fn inject(&self, bytes: Vec<u8>, peer: IpAddr) {
        if let Some(tx) = self.inject.lock().as_ref() {
            tx.send((bytes, peer)).expect("receiver is gone");
        }
    }

    fn script_for(&self, ttl: u8) -> HopScript {
        self.script
            .lock()
            .get(&ttl)
            .cloned()
            .unwrap_or(HopScript::Silent)
    }

    fn next_responder(&self, ttl: u8, routers: &[IpAddr]) -> IpAddr {
        let mut sends = self.sends.lock();
        let counter = sends.entry(ttl).or_insert(0);
        let responder = routers[*counter % routers.len()];
        *counter += 1;
        responder
    }

    /// React to an outbound probe the way the scripted network would.
    /// `transport8` is the first 8 bytes of the probe's transport header,
    /// exactly what a real router quotes back.
    fn respond(&self, ttl: u8, proto: u8, transport8: &[u8]) {
        match self.script_for(ttl) {
            HopScript::TimeExceeded(routers) => {
                let responder = self.next_responder(ttl, &routers);
                self.inject(time_exceeded_quoting(proto, transport8), responder);
            }
            HopScript::EchoReply => {
                // Mirror identifier and sequence out of the request.
                let reply = echo_reply(
                    u16::from_be_bytes([transport8[4], transport8[5]]),
                    u16::from_be_bytes([transport8[6], transport8[7]]),
                );
                self.inject(reply, self.target);
            }
            HopScript::PortUnreachable => {
                self.inject(dest_unreachable_quoting(3, proto, transport8), self.target);
            }
            HopScript::ConnectRefused | HopScript::Silent => {}
        }
    }
}

impl Net for MockNet {
    fn open_wire(&self, _family: Family) -> io::Result<Box<dyn Wire>> {
        let (tx, rx) = std_mpsc::channel();
        *self.inject.lock() = Some(tx);
        Ok(Box::new(MockWire {
            hub: self.hub(),
            rx: Mutex::new(rx),
        }))
    }

    fn open_datagram(&self, _family: Family, hop_limit: u8) -> io::Result<Box<dyn DatagramProbe>> {
        Ok(Box::new(MockDatagramProbe {
            hub: self.hub(),
            port: self.next_port.fetch_add(1, Ordering::Relaxed),
            ttl: hop_limit,
        }))
    }

    fn open_stream(&self, _family: Family, hop_limit: u8) -> io::Result<Box<dyn StreamProbe>> {
        Ok(Box::new(MockStreamProbe {
            hub: self.hub(),
            port: self.next_port.fetch_add(1, Ordering::Relaxed),
            ttl: hop_limit,
        }))
    }
}

struct MockWire {
    hub: Arc<MockNet>,
    rx: Mutex<std_mpsc::Receiver<(Vec<u8>, IpAddr)>>,
}

impl Wire for MockWire {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, IpAddr)> {
        match self.rx.lock().recv_timeout(Duration::from_millis(10)) {
            Ok((bytes, peer)) => {
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok((bytes.len(), peer))
            }
            Err(_) => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    /// Echo probes transmit through the shared receiver socket; the
    /// scripted hop answers with the probe's own header quoted back.
    fn send_to(&self, packet: &[u8], _dest: IpAddr, hop_limit: u8) -> io::Result<usize> {
        if packet.len() >= 8 {
            self.hub.respond(hop_limit, 1, &packet[..8]);
        }
        Ok(packet.len())
    }
}

struct MockDatagramProbe {
    hub: Arc<MockNet>,
    port: u16,
    ttl: u8,
}

impl DatagramProbe for MockDatagramProbe {
    fn source_port(&self) -> u16 {
        self.port
    }

    fn send_to(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize> {
        // Quoted UDP header: src port, dst port, length, checksum
        let len = (payload.len() + 8) as u16;
        let mut transport8 = [0u8; 8];
        transport8[0..2].copy_from_slice(&self.port.to_be_bytes());
        transport8[2..4].copy_from_slice(&dest.port().to_be_bytes());
        transport8[4..6].copy_from_slice(&len.to_be_bytes());

        self.hub.respond(self.ttl, 17, &transport8);
        Ok(payload.len())
    }
}

struct MockStreamProbe {
    hub: Arc<MockNet>,
    port: u16,
    ttl: u8,
}

impl StreamProbe for MockStreamProbe {
    fn source_port(&self) -> u16 {
        self.port
    }

    fn connect(self: Box<Self>, dest: SocketAddr) -> BoxFuture<'static, io::Result<()>> {
        // Quoted TCP header prefix: src port, dst port, sequence number
        let mut transport8 = [0u8; 8];
        transport8[0..2].copy_from_slice(&self.port.to_be_bytes());
        transport8[2..4].copy_from_slice(&dest.port().to_be_bytes());

        match self.hub.script_for(self.ttl) {
            HopScript::ConnectRefused => Box::pin(async {
                // A short wire delay so the measured RTT is nonzero.
                tokio::time::sleep(Duration::from_millis(2)).await;
                Err(io::ErrorKind::ConnectionRefused.into())
            }),
            HopScript::Silent => Box::pin(futures::future::pending()),
            _ => {
                // The SYN dies en route; the ICMP error tells the story
                // while the connect never settles.
                self.hub.respond(self.ttl, 6, &transport8);
                Box::pin(futures::future::pending())
            }
        }
    }
}

/// Bare echo reply (v4 namespace).
pub fn echo_reply(identifier: u16, sequence: u16) -> Vec<u8> {
    let mut data = vec![0u8; 8];
    data[4..6].copy_from_slice(&identifier.to_be_bytes());
    data[6..8].copy_from_slice(&sequence.to_be_bytes());
    data
}

/// Bare time-exceeded quoting an IPv4 original with `proto`.
pub fn time_exceeded_quoting(proto: u8, transport8: &[u8]) -> Vec<u8> {
    error_quoting(11, 0, proto, transport8)
}

/// Bare destination-unreachable quoting an IPv4 original with `proto`.
pub fn dest_unreachable_quoting(code: u8, proto: u8, transport8: &[u8]) -> Vec<u8> {
    error_quoting(3, code, proto, transport8)
}

fn error_quoting(kind: u8, code: u8, proto: u8, transport8: &[u8]) -> Vec<u8> {
    let mut data = vec![0u8; 8 + 20 + transport8.len()];
    data[0] = kind;
    data[1] = code;
    data[8] = 0x45; // quoted IPv4 header, IHL 5
    data[8 + 9] = proto;
    data[28..].copy_from_slice(transport8);
    data
}
