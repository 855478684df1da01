use clap::Parser;
use std::time::Duration;

use hoptrace::{Family, Options, Protocol};

/// Traceroute with parallel per-hop probes and shared response correlation
#[derive(Parser, Debug, Clone)]
#[command(name = "hoptrace")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Target host to trace (IP address or hostname)
    #[arg(required = true)]
    pub target: String,

    /// Probe protocol (icmp, udp, tcp)
    #[arg(short = 'p', long = "protocol", default_value = "udp")]
    pub protocol: String,

    /// Force IPv4
    #[arg(short = '4', long = "ipv4")]
    pub ipv4: bool,

    /// Force IPv6
    #[arg(short = '6', long = "ipv6")]
    pub ipv6: bool,

    /// Maximum TTL (hops)
    #[arg(short = 'm', long = "max-hops", default_value = "20")]
    pub max_hops: u8,

    /// Retries per hop when every probe times out
    #[arg(long = "retries", default_value = "3")]
    pub retries: u32,

    /// Per-probe timeout in seconds
    #[arg(long = "timeout", default_value = "1.0")]
    pub timeout: f64,

    /// Parallel probes per hop
    #[arg(short = 'q', long = "probes", default_value = "3")]
    pub probes: u8,

    /// Starting TTL (skip near hops)
    #[arg(long = "first-ttl", default_value = "1")]
    pub first_ttl: u8,

    /// Destination port for UDP/TCP probes
    #[arg(long = "port")]
    pub port: Option<u16>,

    /// Output the trace as JSON instead of the human listing
    #[arg(long = "json")]
    pub json: bool,

    /// Skip reverse DNS lookups
    #[arg(long = "no-dns")]
    pub no_dns: bool,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Args {
    /// Get timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        if self.ipv4 && self.ipv6 {
            return Err("Cannot specify both -4 and -6".into());
        }
        if self.probes == 0 {
            return Err("--probes must be at least 1".into());
        }
        if self.first_ttl == 0 || self.first_ttl > self.max_hops {
            return Err("--first-ttl must be between 1 and --max-hops".into());
        }
        if self.timeout <= 0.0 {
            return Err("--timeout must be positive".into());
        }
        Ok(())
    }
}

impl From<&Args> for Options {
    fn from(args: &Args) -> Self {
        let protocol = match args.protocol.to_lowercase().as_str() {
            "icmp" => Protocol::Icmp,
            "tcp" => Protocol::Tcp,
            _ => Protocol::Udp,
        };

        let family = if args.ipv6 { Family::V6 } else { Family::V4 };

        Self {
            protocol,
            family,
            max_hops: args.max_hops,
            max_retries: args.retries,
            timeout: args.timeout_duration(),
            probes_per_hop: args.probes,
            min_ttl: args.first_ttl,
            port: args.port,
            print_output: !args.json,
        }
    }
}
