//! Echo-request probe.

use scopeguard::guard;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{TraceError, TraceResult};
use crate::options::{Family, Protocol};
use crate::packet;
use crate::probe::{
    CHANNEL_CAP, ProbeKey, ProbeOutcome, REGISTER_ATTEMPTS, await_reply, probe_payload,
};
use crate::trace::receiver::{ReceiverHandle, Registry, Waiter};

pub(crate) async fn probe(
    registry: &Arc<Registry>,
    target: IpAddr,
    ttl: u8,
    timeout: Duration,
    cancel: &CancellationToken,
) -> TraceResult<ProbeOutcome> {
    let family = Family::of(target);
    let (tx, mut rx) = mpsc::channel(CHANNEL_CAP);

    let (handle, key) = register_echo(registry, family, &tx)?;
    let _cleanup = guard((handle.clone(), key), |(handle, key)| {
        handle.unregister(key);
    });

    // The sequence field is not part of the correlation key; carry the
    // TTL there for anyone watching the wire.
    let request = packet::build_echo_request(family, key.id, u16::from(ttl), &probe_payload(16));

    let start = Instant::now();
    let deadline = tokio::time::Instant::now() + timeout;
    // Send through the shared receiver socket so replies come back on the
    // socket we are draining.
    handle.send(&request, target, ttl)?;

    Ok(await_reply(&mut rx, family, target, start, deadline, cancel).await)
}

/// Draw a random 16-bit echo identifier and register it, redrawing on
/// collision with a concurrently live probe.
fn register_echo(
    registry: &Arc<Registry>,
    family: Family,
    tx: &Waiter,
) -> TraceResult<(ReceiverHandle, ProbeKey)> {
    for _ in 0..REGISTER_ATTEMPTS {
        let key = ProbeKey::new(Protocol::Icmp, rand::random::<u16>());
        let handle = registry.get_or_start(family)?;
        match handle.register(key, tx.clone()) {
            Ok(()) => return Ok((handle, key)),
            Err(TraceError::AlreadyRegistered) => continue,
            // Receiver shut down between lookup and registration; the next
            // get_or_start brings up a fresh one.
            Err(TraceError::ReceiverClosed) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(TraceError::AlreadyRegistered)
}
