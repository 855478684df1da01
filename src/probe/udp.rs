//! Datagram probe: a short UDP payload aimed at a high port, correlated
//! by the ephemeral source port quoted back in the ICMP error.

use scopeguard::guard;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{TraceError, TraceResult};
use crate::net::{DatagramProbe, Net};
use crate::options::{Family, Protocol};
use crate::probe::{
    CHANNEL_CAP, DEFAULT_UDP_PORT, ProbeKey, ProbeOutcome, REGISTER_ATTEMPTS, await_reply,
    probe_payload,
};
use crate::trace::receiver::{ReceiverHandle, Registry, Waiter};

pub(crate) async fn probe(
    registry: &Arc<Registry>,
    net: &Arc<dyn Net>,
    target: IpAddr,
    ttl: u8,
    port: Option<u16>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> TraceResult<ProbeOutcome> {
    let family = Family::of(target);
    let (tx, mut rx) = mpsc::channel(CHANNEL_CAP);

    let (handle, socket, key) = bind_and_register(registry, net, family, ttl, &tx)?;
    let _cleanup = guard((handle.clone(), key), |(handle, key)| {
        handle.unregister(key);
    });

    let dest = SocketAddr::new(target, port.unwrap_or(DEFAULT_UDP_PORT));
    let start = Instant::now();
    let deadline = tokio::time::Instant::now() + timeout;
    socket
        .send_to(&probe_payload(8), dest)
        .map_err(TraceError::from_send)?;

    Ok(await_reply(&mut rx, family, target, start, deadline, cancel).await)
    // socket drops here, releasing the ephemeral port
}

/// Bind an ephemeral-port socket and register its port as the correlation
/// key, rebinding on collision with a live probe.
fn bind_and_register(
    registry: &Arc<Registry>,
    net: &Arc<dyn Net>,
    family: Family,
    ttl: u8,
    tx: &Waiter,
) -> TraceResult<(ReceiverHandle, Box<dyn DatagramProbe>, ProbeKey)> {
    for _ in 0..REGISTER_ATTEMPTS {
        let socket = net
            .open_datagram(family, ttl)
            .map_err(TraceError::from_send)?;
        let key = ProbeKey::new(Protocol::Udp, socket.source_port());
        let handle = registry.get_or_start(family)?;
        match handle.register(key, tx.clone()) {
            Ok(()) => return Ok((handle, socket, key)),
            Err(TraceError::AlreadyRegistered) => continue,
            Err(TraceError::ReceiverClosed) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(TraceError::AlreadyRegistered)
}
