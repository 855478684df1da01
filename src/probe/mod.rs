//! Probe senders: one task per in-flight probe.
//!
//! Every flavor follows the same skeleton: claim a correlation key,
//! register with the shared receiver, transmit, then wait for a routed
//! message or the deadline. Registration happens before the packet leaves
//! and is dropped on every exit path.

pub mod icmp;
pub mod tcp;
pub mod udp;

use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TraceResult;
use crate::net::Net;
use crate::options::{Family, Protocol};
use crate::options::duration_serde;
use crate::packet::{self, IcmpMessage};
use crate::trace::receiver::{Delivery, Registry};

/// Delay between concurrent probes at the same TTL. Routers rate-limit
/// error generation, so a hop's probes must never fire at the same
/// instant. Tunable but always > 0.
pub const STAGGER: Duration = Duration::from_millis(50);

/// Default destination port for UDP probes (classic traceroute base port)
pub const DEFAULT_UDP_PORT: u16 = 33434;
/// Default destination port for TCP probes
pub const DEFAULT_TCP_PORT: u16 = 80;

/// Attempts to claim an unused correlation key before giving up. Echo
/// identifiers are redrawn, ephemeral ports rebound.
pub(crate) const REGISTER_ATTEMPTS: usize = 8;

/// Room for one delivery plus a straggler
pub(crate) const CHANNEL_CAP: usize = 2;

/// Correlation key routing an inbound message back to its probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeKey {
    pub proto: Protocol,
    pub id: u16,
}

impl ProbeKey {
    pub fn new(proto: Protocol, id: u16) -> Self {
        Self { proto, id }
    }
}

/// A successful probe: who answered and how long it took.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub responder: IpAddr,
    #[serde(with = "duration_serde")]
    pub rtt: Duration,
}

/// Outcome of a single send/await cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The destination itself answered
    Reached(ProbeReport),
    /// An intermediate node answered
    Intermediate(ProbeReport),
    Timeout,
}

/// Dispatch a probe of the configured flavor.
pub async fn send_probe(
    registry: &Arc<Registry>,
    net: &Arc<dyn Net>,
    protocol: Protocol,
    target: IpAddr,
    ttl: u8,
    port: Option<u16>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> TraceResult<ProbeOutcome> {
    match protocol {
        Protocol::Icmp => icmp::probe(registry, target, ttl, timeout, cancel).await,
        Protocol::Udp => udp::probe(registry, net, target, ttl, port, timeout, cancel).await,
        Protocol::Tcp => tcp::probe(registry, net, target, ttl, port, timeout, cancel).await,
    }
}

/// Pattern-filled probe payload.
pub(crate) fn probe_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i & 0xFF) as u8).collect()
}

/// Decide what a routed message means for this probe. `None` keeps the
/// probe waiting (e.g. an unparseable straggler).
pub(crate) fn classify(
    family: Family,
    delivery: &Delivery,
    target: IpAddr,
    rtt: Duration,
) -> Option<ProbeOutcome> {
    let message = packet::decode(family, &delivery.bytes)?;
    let report = ProbeReport {
        responder: delivery.peer,
        rtt,
    };

    match message {
        // An echo reply from the target means we are done; one from
        // anywhere else still names the responding node.
        IcmpMessage::EchoReply { .. } if delivery.peer == target => {
            Some(ProbeOutcome::Reached(report))
        }
        IcmpMessage::EchoReply { .. } => Some(ProbeOutcome::Intermediate(report)),
        // Destination-unreachable was provoked by our packet addressed to
        // the target, so the packet made it there (port closed included).
        IcmpMessage::DestinationUnreachable { .. } => Some(ProbeOutcome::Reached(report)),
        IcmpMessage::TimeExceeded { .. } => Some(ProbeOutcome::Intermediate(report)),
        IcmpMessage::Other { .. } => None,
    }
}

/// Wait for a routed message, cancellation, or the deadline.
pub(crate) async fn await_reply(
    rx: &mut mpsc::Receiver<Delivery>,
    family: Family,
    target: IpAddr,
    start: Instant,
    deadline: tokio::time::Instant,
    cancel: &CancellationToken,
) -> ProbeOutcome {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return ProbeOutcome::Timeout,
            delivery = rx.recv() => match delivery {
                Some(delivery) => {
                    if let Some(outcome) = classify(family, &delivery, target, start.elapsed()) {
                        return outcome;
                    }
                }
                None => {
                    // Receiver dropped the registration; nothing more can
                    // arrive, so just run out the clock.
                    tokio::time::sleep_until(deadline).await;
                    return ProbeOutcome::Timeout;
                }
            },
            _ = tokio::time::sleep_until(deadline) => return ProbeOutcome::Timeout,
        }
    }
}
