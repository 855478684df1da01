//! Name resolution at the engine boundary.

use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{IpAddr, ToSocketAddrs};

use crate::error::{TraceError, TraceResult};
use crate::options::Family;

/// Resolve a target to an address of the requested family. Numeric
/// targets skip resolution and pick their own family.
pub fn resolve(target: &str, family: Family) -> TraceResult<IpAddr> {
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs: Vec<IpAddr> = format!("{}:0", target)
        .to_socket_addrs()
        .map_err(|_| TraceError::ResolutionFailed(target.to_string()))?
        .map(|s| s.ip())
        .collect();

    // Prefer the requested family, fall back to whatever resolved.
    addrs
        .iter()
        .find(|ip| Family::of(**ip) == family)
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| TraceError::ResolutionFailed(target.to_string()))
}

/// Reverse DNS lookup with an in-memory cache, for human display only.
pub struct ReverseLookup {
    resolver: TokioAsyncResolver,
    cache: RwLock<HashMap<IpAddr, Option<String>>>,
}

impl ReverseLookup {
    pub fn new() -> Self {
        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self {
            resolver,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Lookup reverse DNS for an IP, using the cache. None when the
    /// address has no name; render the numeric form instead.
    pub async fn lookup(&self, ip: IpAddr) -> Option<String> {
        if let Some(cached) = self.cache.read().get(&ip) {
            return cached.clone();
        }

        let hostname = match self.resolver.reverse_lookup(ip).await {
            Ok(lookup) => lookup
                .iter()
                .next()
                .map(|name| name.to_string().trim_end_matches('.').to_string()),
            Err(_) => None,
        };

        self.cache.write().insert(ip, hostname.clone());
        hostname
    }
}

impl Default for ReverseLookup {
    fn default() -> Self {
        Self::new()
    }
}
