//! # resolver
//!
//! Pluggable hostname → address-set resolution, plus the pseudo-host
//! expansion (`faang`) used by the `ping` subcommand.
#![warn(
    missing_debug_implementations,
    missing_docs,
    missing_copy_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![allow(clippy::cognitive_complexity)]
#![deny(rustdoc::broken_intra_doc_links)]

mod errors;

use std::collections::BTreeSet;
use std::net::IpAddr;

use async_trait::async_trait;
pub use errors::{Error, Result};
use hickory_resolver::Resolver as HickoryResolver;
use hickory_resolver::TokioResolver;
use hickory_resolver::config::ResolverOpts;
use hickory_resolver::name_server::TokioConnectionProvider;

/// a handful of well-known hostnames, resolved on startup to smoke-test
/// connectivity / latency against large, topologically distant
/// services. Expanded from the `faang` pseudo-host.
pub const FAANG: &[&str] = &[
    "facebook.com",
    "apple.com",
    "amazon.com",
    "netflix.com",
    "google.com",
];

/// hostnames used by the crate's own tests and examples
pub const TEST_HOSTNAMES: &[&str] = &[
    "localhost",
    "example.com",
    "facebook.com",
    "amazon.com",
    "apple.com",
    "netflix.com",
    "google.com",
];

/// expand a user-supplied host argument into one or more literal
/// hostnames. Only `faang` is special-cased; everything else passes
/// through unchanged (including `speedtest`, which is expanded by the
/// `locate` crate instead, since it needs network access to do so).
pub fn expand_pseudo_host(host: &str) -> Vec<String> {
    if host.eq_ignore_ascii_case("faang") {
        FAANG.iter().map(|h| h.to_string()).collect()
    } else {
        vec![host.to_string()]
    }
}

/// resolves a hostname to the set of addresses it currently answers to.
///
/// A trait so the ICMP/NDT7 orchestration can be tested against a fixed
/// table of addresses without touching the network.
#[async_trait]
pub trait Resolver: std::fmt::Debug + Send + Sync {
    /// resolve `hostname` to its current address set. An already-literal
    /// IP address resolves to the single-element set containing itself.
    async fn resolve(&self, hostname: &str) -> Result<BTreeSet<IpAddr>>;
}

/// system DNS resolver backed by `hickory-resolver`'s Tokio runtime
/// integration.
#[derive(Debug)]
pub struct SystemResolver {
    inner: TokioResolver,
}

impl SystemResolver {
    /// build a resolver using the system's configured nameservers
    pub fn new() -> anyhow::Result<Self> {
        let inner = HickoryResolver::builder(TokioConnectionProvider::default())
            .map_err(|e| anyhow::anyhow!("failed to create tokio resolver: {e}"))?
            .with_options(ResolverOpts::default())
            .build();
        Ok(Self { inner })
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, hostname: &str) -> Result<BTreeSet<IpAddr>> {
        if let Ok(addr) = hostname.parse::<IpAddr>() {
            return Ok(BTreeSet::from([addr]));
        }

        let response = self
            .inner
            .lookup_ip(hostname)
            .await
            .map_err(|e| Error::ResolverFailed {
                hostname: hostname.to_string(),
                source: anyhow::anyhow!(e),
            })?;

        let addrs: BTreeSet<IpAddr> = response.iter().collect();
        if addrs.is_empty() {
            return Err(Error::NoAddresses {
                hostname: hostname.to_string(),
            });
        }
        Ok(addrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faang_expands() {
        let hosts = expand_pseudo_host("faang");
        assert_eq!(hosts.len(), FAANG.len());
        assert!(hosts.contains(&"google.com".to_string()));
    }

    #[test]
    fn faang_expansion_is_case_insensitive() {
        assert_eq!(expand_pseudo_host("FAANG").len(), FAANG.len());
    }

    #[test]
    fn other_hosts_pass_through() {
        assert_eq!(expand_pseudo_host("example.com"), vec!["example.com"]);
    }

    #[tokio::test]
    async fn literal_ip_resolves_to_itself() {
        let resolver = SystemResolver::new().expect("resolver builds without network access");
        let addrs = resolver.resolve("127.0.0.1").await.unwrap();
        assert_eq!(addrs, BTreeSet::from(["127.0.0.1".parse().unwrap()]));
    }
}
