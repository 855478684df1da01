//! Parallel traceroute engine with shared ICMP response correlation.
//!
//! One raw ICMP receiver per address family drains the kernel socket and
//! routes every inbound echo/error message to exactly the probe that sent
//! the provoking packet, keyed by echo identifier or ephemeral source
//! port. Around it, a per-hop orchestrator runs staggered parallel probes
//! with retry and timeout policy.

pub mod error;
pub mod lookup;
pub mod net;
pub mod options;
pub mod packet;
pub mod probe;
pub mod render;
pub mod trace;

pub use error::{TraceError, TraceResult};
pub use options::{Family, Options, Protocol};
pub use trace::{Hop, Trace, TraceOutcome, Tracer};

use tokio_util::sync::CancellationToken;

/// Trace the path to `target` (hostname or numeric address) and return
/// the structured result, printing the human listing when
/// `options.print_output` is set.
pub async fn run(target: &str, options: Options) -> TraceResult<TraceOutcome> {
    let addr = lookup::resolve(target, options.family)?;
    let print_output = options.print_output;

    let tracer = Tracer::new(addr, options);
    let outcome = tracer.trace(CancellationToken::new()).await?;

    if print_output {
        let dns = lookup::ReverseLookup::new();
        let mut stdout = std::io::stdout();
        render::print_trace(&mut stdout, outcome.trace(), Some(&dns)).await?;
    }

    Ok(outcome)
}
