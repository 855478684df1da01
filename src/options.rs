use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

/// Address family of a trace. Carries the wire constants that differ
/// between IPv4 and IPv6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Family {
    #[default]
    V4,
    V6,
}

impl Family {
    pub fn of(addr: IpAddr) -> Self {
        if addr.is_ipv6() { Family::V6 } else { Family::V4 }
    }

    /// IP protocol number of the family's control protocol (ICMP/ICMPv6).
    pub fn icmp_protocol(self) -> u8 {
        match self {
            Family::V4 => 1,
            Family::V6 => 58,
        }
    }

    /// Echo request message type on the wire.
    pub fn echo_request_type(self) -> u8 {
        match self {
            Family::V4 => 8,
            Family::V6 => 128,
        }
    }

    /// The unspecified bind address for ephemeral-port sockets.
    pub fn unspecified(self) -> IpAddr {
        match self {
            Family::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Family::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

/// Probe protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Protocol {
    Icmp,
    #[default]
    Udp,
    Tcp,
}

/// Runtime configuration for a trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
    /// Probe protocol
    pub protocol: Protocol,
    /// Preferred address family for hostname targets. Numeric targets pick
    /// their own family.
    pub family: Family,
    /// Upper hop bound
    pub max_hops: u8,
    /// Per-hop retry count when every probe times out
    pub max_retries: u32,
    /// Per-probe wait
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Parallel probes per TTL
    pub probes_per_hop: u8,
    /// Starting TTL (skip near hops)
    pub min_ttl: u8,
    /// Destination port for UDP/TCP probes (33434 / 80 when unset)
    pub port: Option<u16>,
    /// Emit the human trace to stdout
    pub print_output: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            protocol: Protocol::Udp,
            family: Family::V4,
            max_hops: 20,
            max_retries: 3,
            timeout: Duration::from_secs(1),
            probes_per_hop: 3,
            min_ttl: 1,
            port: None,
            print_output: true,
        }
    }
}

/// Serde helper for Duration
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
