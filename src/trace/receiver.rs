//! Shared per-family ICMP receiver.
//!
//! Raw ICMP sockets on some kernels deliver every inbound echo/error
//! message to every open ICMP socket, on others to only one. A single
//! process-wide receiver per address family drains one raw socket and
//! routes each message to exactly the probe that provoked it, keyed by
//! the echo identifier or the source port quoted in the error payload.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{TraceError, TraceResult};
use crate::net::{Net, RawNet, Wire};
use crate::options::{Family, Protocol};
use crate::packet::{self, IcmpMessage, OriginalProtocol, Transport};
use crate::probe::ProbeKey;

/// Delay between the last unregister and receiver shutdown. Keeps the
/// socket warm across back-to-back hops instead of thrashing open/close.
const GRACE_PERIOD: Duration = Duration::from_secs(5);

const RECV_BUF: usize = 1600;

/// One routed message: the responding address and the bare ICMP bytes.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub peer: IpAddr,
    pub bytes: Vec<u8>,
}

/// Send side of a probe's wait channel.
pub type Waiter = mpsc::Sender<Delivery>;

struct Registrations {
    waiters: HashMap<ProbeKey, Waiter>,
    /// When the map last became empty; shutdown after the grace period
    empty_since: Option<Instant>,
    closed: bool,
}

struct ReceiverShared {
    family: Family,
    wire: Arc<dyn Wire>,
    regs: Mutex<Registrations>,
}

/// Handle to a live per-family receiver.
#[derive(Clone)]
pub struct ReceiverHandle {
    shared: Arc<ReceiverShared>,
}

impl ReceiverHandle {
    /// Transmit through the shared socket with the given hop limit. Echo
    /// probes send here so replies come back on the same socket.
    pub fn send(&self, packet: &[u8], dest: IpAddr, hop_limit: u8) -> TraceResult<()> {
        self.shared
            .wire
            .send_to(packet, dest, hop_limit)
            .map_err(TraceError::from_send)?;
        Ok(())
    }

    /// Register a waiter for `key`. Must happen before the probe packet
    /// leaves, or a fast reply can race past the registration.
    pub fn register(&self, key: ProbeKey, waiter: Waiter) -> TraceResult<()> {
        let mut regs = self.shared.regs.lock();
        if regs.closed {
            return Err(TraceError::ReceiverClosed);
        }
        if regs.waiters.contains_key(&key) {
            return Err(TraceError::AlreadyRegistered);
        }
        regs.waiters.insert(key, waiter);
        regs.empty_since = None;
        Ok(())
    }

    /// Remove a registration. Tolerant of unknown keys; runs on every
    /// probe exit path.
    pub fn unregister(&self, key: ProbeKey) {
        let mut regs = self.shared.regs.lock();
        regs.waiters.remove(&key);
        if regs.waiters.is_empty() && !regs.closed {
            regs.empty_since = Some(Instant::now());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.regs.lock().closed
    }

    #[cfg(test)]
    fn same_receiver(&self, other: &ReceiverHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

/// Per-family receiver registry. One receiver is live per family at any
/// time; `get_or_start` is the idempotent entry point.
pub struct Registry {
    net: Arc<dyn Net>,
    grace: Duration,
    receivers: Mutex<HashMap<Family, Arc<ReceiverShared>>>,
}

impl Registry {
    pub fn new(net: Arc<dyn Net>) -> Arc<Self> {
        Self::with_grace(net, GRACE_PERIOD)
    }

    /// Registry with a custom shutdown grace, for tests that exercise the
    /// receiver lifecycle without waiting out the real window.
    pub fn with_grace(net: Arc<dyn Net>, grace: Duration) -> Arc<Self> {
        Arc::new(Self {
            net,
            grace,
            receivers: Mutex::new(HashMap::new()),
        })
    }

    /// Process-wide registry over the host network stack.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Registry::new(Arc::new(RawNet))).clone()
    }

    pub fn net(&self) -> Arc<dyn Net> {
        self.net.clone()
    }

    /// Get the live receiver for `family`, starting one if none is live.
    pub fn get_or_start(&self, family: Family) -> TraceResult<ReceiverHandle> {
        let mut receivers = self.receivers.lock();
        if let Some(shared) = receivers.get(&family) {
            if !shared.regs.lock().closed {
                return Ok(ReceiverHandle {
                    shared: shared.clone(),
                });
            }
        }

        let wire: Arc<dyn Wire> = Arc::from(self.net.open_wire(family).map_err(|e| {
            if e.kind() == io::ErrorKind::PermissionDenied {
                TraceError::PermissionDenied(e)
            } else {
                TraceError::Io(e)
            }
        })?);

        let shared = Arc::new(ReceiverShared {
            family,
            wire,
            regs: Mutex::new(Registrations {
                waiters: HashMap::new(),
                // A receiver that never sees a registration shuts down
                // after the same grace window.
                empty_since: Some(Instant::now()),
                closed: false,
            }),
        });
        receivers.insert(family, shared.clone());

        let grace = self.grace;
        let thread_shared = shared.clone();
        let name = match family {
            Family::V4 => "icmp-recv-v4",
            Family::V6 => "icmp-recv-v6",
        };
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(thread_shared, grace))?;

        Ok(ReceiverHandle { shared })
    }
}

/// Receive loop, on a dedicated thread per receiver (blocking I/O).
fn run_loop(shared: Arc<ReceiverShared>, grace: Duration) {
    let mut buf = [0u8; RECV_BUF];
    debug!(family = ?shared.family, "receiver started");

    loop {
        {
            let mut regs = shared.regs.lock();

            // Drop registrations whose probe has gone away
            regs.waiters.retain(|key, waiter| {
                if waiter.is_closed() {
                    debug!(?key, "pruning dead waiter");
                    false
                } else {
                    true
                }
            });

            if regs.waiters.is_empty() {
                match regs.empty_since {
                    None => regs.empty_since = Some(Instant::now()),
                    Some(since) if since.elapsed() >= grace => regs.closed = true,
                    Some(_) => {}
                }
            }
            if regs.closed {
                break;
            }
        }

        match shared.wire.recv_from(&mut buf) {
            Ok((len, peer)) => deliver(&shared, &buf[..len], peer),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => {
                debug!(family = ?shared.family, error = %e, "receive error");
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }

    debug!(family = ?shared.family, "receiver closed");
}

/// Parse one inbound message and hand it to the single matching waiter.
/// Unmatched messages are dropped, never broadcast.
fn deliver(shared: &ReceiverShared, data: &[u8], peer: IpAddr) {
    let Some((source, message)) = packet::split_received(data, peer) else {
        return;
    };
    let Some(decoded) = packet::decode(shared.family, message) else {
        return;
    };
    let Some(key) = correlation_key(shared.family, &decoded) else {
        debug!(family = ?shared.family, %source, "discarding uncorrelatable message");
        return;
    };

    let mut regs = shared.regs.lock();
    match regs.waiters.get(&key) {
        Some(waiter) => {
            let delivery = Delivery {
                peer: source,
                bytes: message.to_vec(),
            };
            // A full or dead channel means the probe is done with this key.
            if waiter.try_send(delivery).is_err() {
                debug!(?key, "waiter gone, dropping registration");
                regs.waiters.remove(&key);
                if regs.waiters.is_empty() {
                    regs.empty_since = Some(Instant::now());
                }
            }
        }
        None => debug!(?key, %source, "no registered probe for message"),
    }
}

/// Correlation key of a decoded message: echo replies by their own
/// identifier, errors by the identifier or source port quoted in them.
fn correlation_key(family: Family, message: &IcmpMessage) -> Option<ProbeKey> {
    match message {
        IcmpMessage::EchoReply { identifier, .. } => {
            Some(ProbeKey::new(Protocol::Icmp, *identifier))
        }
        IcmpMessage::TimeExceeded { original, .. }
        | IcmpMessage::DestinationUnreachable { original, .. } => {
            match (original.protocol, &original.transport) {
                (OriginalProtocol::Echo, Transport::Echo { kind, identifier, .. })
                    if *kind == family.echo_request_type() =>
                {
                    Some(ProbeKey::new(Protocol::Icmp, *identifier))
                }
                (OriginalProtocol::Datagram, Transport::Udp { source_port, .. }) => {
                    Some(ProbeKey::new(Protocol::Udp, *source_port))
                }
                (OriginalProtocol::Stream, Transport::Tcp { source_port, .. }) => {
                    Some(ProbeKey::new(Protocol::Tcp, *source_port))
                }
                _ => None,
            }
        }
        IcmpMessage::Other { .. } => None,
    }
}
