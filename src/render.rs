//! Human console rendering of a finished trace.

use std::io::Write;
use std::net::IpAddr;
use std::time::Duration;

use crate::lookup::ReverseLookup;
use crate::probe::ProbeReport;
use crate::trace::{Hop, Trace};

/// Print the trace, one line per TTL, grouping probe times by responder.
/// Extra responders at the same TTL continue on indented lines. Pass no
/// resolver to render numeric addresses only.
pub async fn print_trace<W: Write>(
    out: &mut W,
    trace: &Trace,
    dns: Option<&ReverseLookup>,
) -> std::io::Result<()> {
    for hop in &trace.hops {
        match hop {
            Hop::Reached { ttl, probes } | Hop::Intermediate { ttl, probes } => {
                for (i, (responder, rtts)) in group_by_responder(probes).into_iter().enumerate() {
                    let name = display_name(dns, responder).await;
                    if i == 0 {
                        write!(out, "{:>2}  {} ({})", ttl, name, responder)?;
                    } else {
                        write!(out, "   {} ({})", name, responder)?;
                    }
                    for rtt in rtts {
                        write!(out, "  {}ms", format_ms(rtt))?;
                    }
                    writeln!(out)?;
                }
            }
            Hop::Timeout { ttl, retries } => {
                let stars = vec!["*"; (*retries).max(1) as usize].join(" ");
                writeln!(out, "{:>2}  {}", ttl, stars)?;
            }
            Hop::Failed { ttl, reason } => {
                writeln!(out, "{:>2}  error: {}", ttl, reason)?;
            }
        }
    }
    Ok(())
}

async fn display_name(dns: Option<&ReverseLookup>, addr: IpAddr) -> String {
    match dns {
        Some(dns) => dns.lookup(addr).await.unwrap_or_else(|| addr.to_string()),
        None => addr.to_string(),
    }
}

/// Group a hop's probe reports by responder, preserving first-seen order.
fn group_by_responder(probes: &[ProbeReport]) -> Vec<(IpAddr, Vec<Duration>)> {
    let mut groups: Vec<(IpAddr, Vec<Duration>)> = Vec::new();
    for probe in probes {
        match groups.iter_mut().find(|(ip, _)| *ip == probe.responder) {
            Some((_, rtts)) => rtts.push(probe.rtt),
            None => groups.push((probe.responder, vec![probe.rtt])),
        }
    }
    groups
}

fn format_ms(rtt: Duration) -> String {
    format!("{:.3}", rtt.as_secs_f64() * 1000.0)
}
