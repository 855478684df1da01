//! Stream probe: a hop-limited TCP handshake through the kernel's connect
//! primitive. A refused or reset handshake still proves the packet made
//! it to the host.

use futures::FutureExt;
use scopeguard::guard;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{TraceError, TraceResult};
use crate::net::{Net, StreamProbe};
use crate::options::{Family, Protocol};
use crate::probe::{
    CHANNEL_CAP, DEFAULT_TCP_PORT, ProbeKey, ProbeOutcome, ProbeReport, REGISTER_ATTEMPTS,
    classify,
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

    let dest = SocketAddr::new(target, port.unwrap_or(DEFAULT_TCP_PORT));
    let start = Instant::now();
    let deadline = tokio::time::Instant::now() + timeout;

    let mut connect = socket.connect(dest).fuse();
    let mut connect_pending = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(ProbeOutcome::Timeout),
            delivery = rx.recv() => match delivery {
                Some(delivery) => {
                    if let Some(outcome) = classify(family, &delivery, target, start.elapsed()) {
                        return Ok(outcome);
                    }
                }
                None => {
                    tokio::time::sleep_until(deadline).await;
                    return Ok(ProbeOutcome::Timeout);
                }
            },
            result = &mut connect, if connect_pending => {
                connect_pending = false;
                match result {
                    // Handshake completed, or the port is closed: either
                    // way the packet reached the host.
                    Ok(()) => {
                        return Ok(ProbeOutcome::Reached(ProbeReport {
                            responder: target,
                            rtt: start.elapsed(),
                        }));
                    }
                    Err(e) => match e.kind() {
                        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => {
                            return Ok(ProbeOutcome::Reached(ProbeReport {
                                responder: target,
                                rtt: start.elapsed(),
                            }));
                        }
                        // The hop-limited SYN died en route; the ICMP
                        // error carries the real story, keep waiting.
                        io::ErrorKind::HostUnreachable
                        | io::ErrorKind::NetworkUnreachable
                        | io::ErrorKind::TimedOut => {}
                        _ => return Err(TraceError::Io(e)),
                    },
                }
            },
            _ = tokio::time::sleep_until(deadline) => return Ok(ProbeOutcome::Timeout),
        }
    }
}

/// Bind an ephemeral-port TCP socket and register its port as the
/// correlation key, rebinding on collision with a live probe.
fn bind_and_register(
    registry: &Arc<Registry>,
    net: &Arc<dyn Net>,
    family: Family,
    ttl: u8,
    tx: &Waiter,
) -> TraceResult<(ReceiverHandle, Box<dyn StreamProbe>, ProbeKey)> {
    for _ in 0..REGISTER_ATTEMPTS {
        let socket = net
            .open_stream(family, ttl)
            .map_err(TraceError::from_send)?;
        let key = ProbeKey::new(Protocol::Tcp, socket.source_port());
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
