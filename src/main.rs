use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::Args;
use hoptrace::{Options, Tracer, lookup, render};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    init_logging(args.verbose);

    let options = Options::from(&args);
    let target_ip = lookup::resolve(&args.target, options.family)
        .with_context(|| format!("Failed to resolve target: {}", args.target))?;

    // Cancellation token for graceful shutdown
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        cancel_clone.cancel();
    });

    let max_hops = options.max_hops;
    let tracer = Tracer::new(target_ip, options);
    let outcome = tracer.trace(cancel).await?;

    if args.json {
        serde_json::to_writer_pretty(std::io::stdout(), &outcome)?;
        println!();
    } else {
        let dns = (!args.no_dns).then(lookup::ReverseLookup::new);
        let mut stdout = std::io::stdout();
        render::print_trace(&mut stdout, outcome.trace(), dns.as_ref()).await?;
        if !outcome.reached() {
            eprintln!("Target not reached within {} hops", max_hops);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "hoptrace=debug" } else { "hoptrace=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
