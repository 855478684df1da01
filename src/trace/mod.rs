//! Trace engine: the shared receiver, the per-hop orchestrator, and the
//! result types they produce.

pub mod receiver;
pub mod tracer;

pub use receiver::{Delivery, ReceiverHandle, Registry};
pub use tracer::Tracer;

use serde::Serialize;
use std::net::IpAddr;

use crate::probe::ProbeReport;

/// Aggregate result of one TTL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Hop {
    /// The destination answered at this TTL. Includes intermediate
    /// responses from the same TTL, which in practice also made it there.
    Reached { ttl: u8, probes: Vec<ProbeReport> },
    /// Routers along the path answered with time-exceeded
    Intermediate { ttl: u8, probes: Vec<ProbeReport> },
    /// Every probe timed out, across all retries
    Timeout { ttl: u8, retries: u32 },
    /// A transport error with no successful probe at this TTL
    Failed { ttl: u8, reason: String },
}

impl Hop {
    pub fn ttl(&self) -> u8 {
        match self {
            Hop::Reached { ttl, .. }
            | Hop::Intermediate { ttl, .. }
            | Hop::Timeout { ttl, .. }
            | Hop::Failed { ttl, .. } => *ttl,
        }
    }
}

/// Ordered hop results, indexed from `min_ttl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trace {
    pub target: IpAddr,
    pub hops: Vec<Hop>,
}

/// How a trace ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TraceOutcome {
    Reached(Trace),
    MaxHopsExceeded(Trace),
}

impl TraceOutcome {
    pub fn trace(&self) -> &Trace {
        match self {
            TraceOutcome::Reached(trace) | TraceOutcome::MaxHopsExceeded(trace) => trace,
        }
    }

    pub fn reached(&self) -> bool {
        matches!(self, TraceOutcome::Reached(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    #[test]
    fn test_hop_ttl_accessor() {
        let hop = Hop::Timeout { ttl: 4, retries: 3 };
        assert_eq!(hop.ttl(), 4);

        let hop = Hop::Intermediate {
            ttl: 2,
            probes: vec![ProbeReport {
                responder: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                rtt: Duration::from_millis(3),
            }],
        };
        assert_eq!(hop.ttl(), 2);
    }

    #[test]
    fn test_outcome_accessors() {
        let trace = Trace {
            target: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
            hops: vec![],
        };
        assert!(TraceOutcome::Reached(trace.clone()).reached());
        assert!(!TraceOutcome::MaxHopsExceeded(trace).reached());
    }

    #[test]
    fn test_trace_serializes_to_json() {
        let trace = Trace {
            target: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
            hops: vec![Hop::Timeout { ttl: 1, retries: 3 }],
        };
        let json = serde_json::to_string(&trace).unwrap();
        assert!(json.contains("\"timeout\""));
        assert!(json.contains("192.0.2.1"));
    }
}
