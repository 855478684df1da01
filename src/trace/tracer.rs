//! Per-hop probe orchestrator.
//!
//! For each TTL the tracer launches a round of staggered parallel probes,
//! folds their outcomes into one hop result, applies the retry policy,
//! and advances until the destination answers or the hop cap runs out.

use futures::future::join_all;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{TraceError, TraceResult};
use crate::options::Options;
use crate::probe::{self, ProbeOutcome, STAGGER};
use crate::trace::receiver::Registry;
use crate::trace::{Hop, Trace, TraceOutcome};

/// Slack on top of the per-probe timeout before a wedged task is killed
const HARD_CAP_SLACK: Duration = Duration::from_secs(1);

pub struct Tracer {
    registry: Arc<Registry>,
    target: IpAddr,
    options: Options,
}

impl Tracer {
    /// Tracer over the process-wide receiver registry.
    pub fn new(target: IpAddr, options: Options) -> Self {
        Self::with_registry(target, options, Registry::global())
    }

    /// Tracer over a specific registry (and through it, network stack).
    pub fn with_registry(target: IpAddr, options: Options, registry: Arc<Registry>) -> Self {
        Self {
            registry,
            target,
            options,
        }
    }

    /// Run the trace to completion or cancellation.
    pub async fn trace(&self, cancel: CancellationToken) -> TraceResult<TraceOutcome> {
        let mut hops = Vec::new();

        for ttl in self.options.min_ttl..=self.options.max_hops {
            if cancel.is_cancelled() {
                break;
            }

            let hop = self.probe_hop(ttl, &cancel, hops.is_empty()).await?;
            let done = matches!(hop, Hop::Reached { .. });
            hops.push(hop);
            if done {
                return Ok(TraceOutcome::Reached(self.finish(hops)));
            }
        }

        Ok(TraceOutcome::MaxHopsExceeded(self.finish(hops)))
    }

    fn finish(&self, hops: Vec<Hop>) -> Trace {
        Trace {
            target: self.target,
            hops,
        }
    }

    /// Probe one TTL, retrying while every probe times out.
    async fn probe_hop(
        &self,
        ttl: u8,
        cancel: &CancellationToken,
        first_hop: bool,
    ) -> TraceResult<Hop> {
        let max_retries = self.options.max_retries.max(1);

        for attempt in 1..=max_retries {
            let outcomes = self.run_round(ttl, cancel).await;

            // Partition in launch order.
            let mut successes = Vec::new();
            let mut intermediates = Vec::new();
            let mut reached = false;
            let mut errors = Vec::new();

            for outcome in outcomes {
                match outcome {
                    Ok(ProbeOutcome::Reached(report)) => {
                        reached = true;
                        successes.push(report);
                    }
                    Ok(ProbeOutcome::Intermediate(report)) => {
                        successes.push(report.clone());
                        intermediates.push(report);
                    }
                    Ok(ProbeOutcome::Timeout) => {}
                    Err(e) => errors.push(e),
                }
            }

            // A receiver that cannot open its socket kills the trace.
            if let Some(pos) = errors
                .iter()
                .position(|e| matches!(e, TraceError::PermissionDenied(_)))
            {
                return Err(errors.swap_remove(pos));
            }
            // An unreachable kernel verdict on the very first hop means
            // nothing will ever get out.
            if first_hop && successes.is_empty() {
                if let Some(pos) = errors
                    .iter()
                    .position(|e| matches!(e, TraceError::HostUnreachable))
                {
                    return Err(errors.swap_remove(pos));
                }
            }

            if reached {
                // Same-TTL intermediates most likely reached the
                // destination as well; fold them into the final hop.
                return Ok(Hop::Reached {
                    ttl,
                    probes: successes,
                });
            }
            if !intermediates.is_empty() {
                return Ok(Hop::Intermediate {
                    ttl,
                    probes: intermediates,
                });
            }
            if let Some(error) = errors.into_iter().next() {
                return Ok(Hop::Failed {
                    ttl,
                    reason: error.to_string(),
                });
            }

            if cancel.is_cancelled() {
                return Ok(Hop::Timeout {
                    ttl,
                    retries: attempt,
                });
            }
            debug!(ttl, attempt, "every probe timed out");
        }

        Ok(Hop::Timeout {
            ttl,
            retries: max_retries,
        })
    }

    /// One round: `probes_per_hop` staggered probes, each hard-capped.
    async fn run_round(
        &self,
        ttl: u8,
        cancel: &CancellationToken,
    ) -> Vec<TraceResult<ProbeOutcome>> {
        let net = self.registry.net();

        let probes = (0..self.options.probes_per_hop).map(|k| {
            let registry = self.registry.clone();
            let net = net.clone();
            let cancel = cancel.clone();
            let options = &self.options;
            let target = self.target;

            async move {
                tokio::time::sleep(STAGGER * u32::from(k)).await;

                let cap = options.timeout + HARD_CAP_SLACK;
                let probe = probe::send_probe(
                    &registry,
                    &net,
                    options.protocol,
                    target,
                    ttl,
                    options.port,
                    options.timeout,
                    &cancel,
                );
                match tokio::time::timeout(cap, probe).await {
                    Ok(result) => result,
                    // Hard cap: a wedged probe counts as timed out. Its
                    // cleanup guard still runs when the future drops.
                    Err(_) => Ok(ProbeOutcome::Timeout),
                }
            }
        });

        join_all(probes).await
    }
}
