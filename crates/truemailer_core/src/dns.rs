//! Mail-routing checks via DNS MX resolution
//!
//! The pipeline only needs a yes/no answer within a time budget, so every failure mode
//! (timeout, NXDOMAIN, resolver error) collapses to "no routing".

use anyhow::{Context, Result};
use async_trait::async_trait;
use hickory_resolver::{
    config::{ResolverConfig, ResolverOpts},
    system_conf, AsyncResolver, TokioAsyncResolver,
};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

/// Confirms that a domain can receive mail
#[async_trait]
pub trait MailRoutingCheck: Send + Sync {
    /// `true` if at least one MX record was found within `budget`
    async fn has_mail_routing(&self, domain: &str, budget: Duration) -> bool;
}

/// DNS resolver wrapper with caching
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    /// Create a new DNS resolver
    ///
    /// # Arguments
    /// * `timeout_ms` - Per-query timeout in milliseconds
    /// * `attempts` - Maximum number of attempts per query
    /// * `cache_size` - Number of entries to cache
    /// * `use_system_conf` - Read nameservers from the host instead of using Cloudflare
    pub fn new(
        timeout_ms: u64,
        attempts: usize,
        cache_size: usize,
        use_system_conf: bool,
    ) -> Result<Self> {
        let (config, mut opts) = if use_system_conf {
            info!("Initializing DNS resolver from system configuration");
            system_conf::read_system_conf().context("Failed to read system DNS configuration")?
        } else {
            info!("Initializing DNS resolver with Cloudflare DNS");
            (ResolverConfig::cloudflare(), ResolverOpts::default())
        };

        opts.timeout = Duration::from_millis(timeout_ms);
        opts.attempts = attempts;
        opts.cache_size = cache_size;
        opts.negative_min_ttl = Some(Duration::from_secs(30));
        opts.positive_max_ttl = Some(Duration::from_secs(3600));

        let resolver = AsyncResolver::tokio(config, opts);

        info!(
            "DNS resolver initialized - timeout: {}ms, attempts: {}, cache_size: {}",
            timeout_ms, attempts, cache_size
        );

        Ok(Self { resolver })
    }

    /// Check if a domain has MX records. Lookup errors count as "no MX records".
    pub async fn has_mx_records(&self, domain: &str) -> bool {
        debug!("Checking MX records for domain: {}", domain);

        match self.resolver.mx_lookup(domain).await {
            Ok(response) => {
                let mx_count = response.iter().count();
                debug!("Domain {} has {} MX record(s)", domain, mx_count);
                mx_count > 0
            }
            Err(e) => {
                debug!("MX record lookup failed for {}: {}", domain, e);
                false
            }
        }
    }
}

#[async_trait]
impl MailRoutingCheck for DnsResolver {
    async fn has_mail_routing(&self, domain: &str, budget: Duration) -> bool {
        if budget.is_zero() {
            debug!("No time left for MX lookup of {}", domain);
            return false;
        }

        match tokio::time::timeout(budget, self.has_mx_records(domain)).await {
            Ok(has_mx) => has_mx,
            Err(_) => {
                debug!("MX lookup for {} timed out after {:?}", domain, budget);
                false
            }
        }
    }
}

/// Fixed routing table, for offline operation and tests
#[derive(Debug, Clone, Default)]
pub struct StaticRoutingTable {
    routable: HashSet<String>,
    default_routable: bool,
}

impl StaticRoutingTable {
    /// Only the listed domains have routing
    pub fn with_routable<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            routable: domains.into_iter().map(|d| d.into().to_lowercase()).collect(),
            default_routable: false,
        }
    }

    /// Every domain has routing
    pub fn all_routable() -> Self {
        Self {
            routable: HashSet::new(),
            default_routable: true,
        }
    }
}

#[async_trait]
impl MailRoutingCheck for StaticRoutingTable {
    async fn has_mail_routing(&self, domain: &str, _budget: Duration) -> bool {
        self.default_routable || self.routable.contains(&domain.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUDGET: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_dns_resolver_creation() {
        let resolver = DnsResolver::new(1000, 2, 1000, false);
        assert!(resolver.is_ok());
    }

    #[tokio::test]
    async fn test_zero_budget_short_circuits() {
        let resolver = DnsResolver::new(1000, 2, 1000, false).unwrap();
        assert!(!resolver.has_mail_routing("gmail.com", Duration::ZERO).await);
    }

    #[tokio::test]
    #[ignore = "requires network access"]
    async fn test_mx_record_lookup() {
        let resolver = DnsResolver::new(1000, 2, 1000, false).unwrap();
        assert!(resolver.has_mail_routing("gmail.com", BUDGET).await);
        assert!(
            !resolver
                .has_mail_routing("this-domain-definitely-does-not-exist-12345.com", BUDGET)
                .await
        );
    }

    #[tokio::test]
    async fn test_static_routing_table() {
        let table = StaticRoutingTable::with_routable(["Example.com"]);
        assert!(table.has_mail_routing("example.com", BUDGET).await);
        assert!(table.has_mail_routing("EXAMPLE.COM", BUDGET).await);
        assert!(!table.has_mail_routing("nowhere.test", BUDGET).await);

        let open = StaticRoutingTable::all_routable();
        assert!(open.has_mail_routing("nowhere.test", BUDGET).await);
    }
}
