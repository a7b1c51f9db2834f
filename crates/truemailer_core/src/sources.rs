//! Remote disposable-domain sources and the refresh cycle
//!
//! A refresh fetches every configured source concurrently, each under its own timeout,
//! extracts domain-shaped tokens, unions them with the previously persisted set and the
//! active snapshot, persists the result and installs it into the [`BlocklistStore`].
//! A failing source is logged and skipped; the merged set never shrinks within a cycle.

use crate::blocklist::{BlocklistSnapshot, BlocklistStore};
use crate::persistence::BlocklistRepository;
use crate::{RefreshError, UpstreamFetchError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Public disposable-domain lists merged by default
pub const DEFAULT_SOURCE_URLS: &[&str] = &[
    "https://raw.githubusercontent.com/disposable-email-domains/disposable-email-domains/master/domains.txt",
    "https://raw.githubusercontent.com/ivolo/disposable-email-domains/master/index.json",
    "https://raw.githubusercontent.com/andreis/disposable-email-domains/master/domains.txt",
];

pub const DEFAULT_USER_AGENT: &str = concat!("truemailer/", env!("CARGO_PKG_VERSION"));

/// Alphanumeric/hyphen labels separated by dots, final label at least two letters
static DOMAIN_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$")
        .expect("domain pattern is valid")
});

const TOKEN_PUNCTUATION: &[char] = &[
    '"', '\'', '`', ',', ';', ':', '[', ']', '{', '}', '(', ')', '<', '>',
];

/// Remote source configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SourceConfig {
    /// Line-oriented domain lists to merge
    pub urls: Vec<String>,
    /// Per-source fetch timeout in seconds
    pub fetch_timeout_secs: u64,
    /// User-Agent sent with every fetch
    pub user_agent: String,
    /// Interval between scheduled refreshes in seconds
    pub refresh_interval_secs: u64,
    /// Run a refresh as soon as the scheduler starts
    pub refresh_on_startup: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            urls: DEFAULT_SOURCE_URLS.iter().map(|u| u.to_string()).collect(),
            fetch_timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            refresh_interval_secs: 86_400,
            refresh_on_startup: true,
        }
    }
}

/// A remote list of disposable domains
#[async_trait]
pub trait DomainSource: Send + Sync {
    /// Identifier used in logs and reports (usually the URL)
    fn name(&self) -> &str;
    /// Fetch the raw list body
    async fn fetch(&self) -> Result<String, UpstreamFetchError>;
}

/// Domain list served over HTTP(S)
pub struct HttpSource {
    url: String,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl DomainSource for HttpSource {
    fn name(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<String, UpstreamFetchError> {
        let response = self.client.get(&self.url).send().await.map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamFetchError::Status(status.as_u16()));
        }

        response.text().await.map_err(transport_error)
    }
}

fn transport_error(e: reqwest::Error) -> UpstreamFetchError {
    if e.is_timeout() {
        UpstreamFetchError::Timeout
    } else {
        UpstreamFetchError::Transport(e.to_string())
    }
}

/// Build one [`HttpSource`] per configured URL sharing a single client
pub fn http_sources(config: &SourceConfig) -> Result<Vec<Arc<dyn DomainSource>>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.fetch_timeout_secs))
        .user_agent(config.user_agent.as_str())
        .build()
        .context("Failed to build HTTP client for blocklist sources")?;

    Ok(config
        .urls
        .iter()
        .map(|url| Arc::new(HttpSource::new(url.clone(), client.clone())) as Arc<dyn DomainSource>)
        .collect())
}

/// Reduce one raw token to a normalized domain, if it has a domain shape
pub fn parse_token(raw: &str) -> Option<String> {
    let mut token = raw.trim().trim_matches(TOKEN_PUNCTUATION).trim();

    if token.matches('@').count() == 1 {
        token = token.split_once('@').map(|(_, domain)| domain).unwrap_or(token);
    }

    let domain = token.trim_end_matches('.').to_ascii_lowercase();
    if domain.len() > 253 || !DOMAIN_SHAPE.is_match(&domain) {
        return None;
    }
    Some(domain)
}

/// Extract every domain from line-oriented list content.
///
/// Blank lines and `#`/`//` comments are skipped; each line may carry several tokens
/// separated by whitespace or commas (which also covers JSON arrays).
pub fn parse_domain_list(content: &str) -> HashSet<String> {
    let mut domains = HashSet::new();
    let mut rejected = 0usize;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            continue;
        }

        for raw in line.split(|c: char| c.is_whitespace() || c == ',') {
            if raw.is_empty() {
                continue;
            }
            match parse_token(raw) {
                Some(domain) => {
                    domains.insert(domain);
                }
                None => rejected += 1,
            }
        }
    }

    if rejected > 0 {
        debug!("Skipped {} tokens without a domain shape", rejected);
    }
    domains
}

/// A source that could not be used in a refresh cycle
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

/// Outcome of a merge cycle
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    /// Domains in the installed snapshot
    pub domain_count: usize,
    /// Domains that were not present before this cycle
    pub added: usize,
    /// Generation of the installed snapshot
    pub generation: u64,
    /// Sources skipped in this cycle
    pub failed_sources: Vec<SourceFailure>,
}

/// Fetches, merges, persists and installs the disposable-domain blocklist
pub struct SourceAggregator {
    sources: Vec<Arc<dyn DomainSource>>,
    store: Arc<BlocklistStore>,
    repository: Arc<dyn BlocklistRepository>,
    fetch_timeout: Duration,
    cycle: tokio::sync::Mutex<()>,
}

impl SourceAggregator {
    pub fn new(
        sources: Vec<Arc<dyn DomainSource>>,
        store: Arc<BlocklistStore>,
        repository: Arc<dyn BlocklistRepository>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            sources,
            store,
            repository,
            fetch_timeout,
            cycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Install the persisted list into the store without fetching anything
    pub fn load_local(&self) -> Result<usize, crate::PersistenceError> {
        let domains = self.repository.load()?;
        let count = domains.len();
        self.store.replace(BlocklistSnapshot::from_domains(domains));
        Ok(count)
    }

    /// Run one full refresh cycle over every configured source
    #[instrument(skip(self), fields(sources = self.sources.len()))]
    pub async fn refresh(&self) -> Result<RefreshReport, RefreshError> {
        let _cycle = self.cycle.lock().await;
        info!("Refreshing disposable domain list from {} sources", self.sources.len());

        let results = join_all(self.sources.iter().map(|source| self.fetch_one(source))).await;

        let mut fetched = HashSet::new();
        let mut failed_sources = Vec::new();
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(domains) => {
                    info!("Source {} provided {} domains", source.name(), domains.len());
                    fetched.extend(domains);
                }
                Err(e) => {
                    warn!("Skipping source {}: {}", source.name(), e);
                    failed_sources.push(SourceFailure {
                        source: source.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !self.sources.is_empty() && failed_sources.len() == self.sources.len() {
            warn!("All {} sources failed, keeping local data", self.sources.len());
        }

        self.merge_and_install(fetched, failed_sources)
    }

    /// Merge administrator-supplied domains through the same path as a refresh
    pub async fn add_domains(&self, raw: &[String]) -> Result<RefreshReport, RefreshError> {
        let _cycle = self.cycle.lock().await;
        let domains: HashSet<String> = raw.iter().filter_map(|d| parse_token(d)).collect();
        info!("Merging {} administrator-supplied domains", domains.len());
        self.merge_and_install(domains, Vec::new())
    }

    async fn fetch_one(
        &self,
        source: &Arc<dyn DomainSource>,
    ) -> Result<HashSet<String>, UpstreamFetchError> {
        let body = tokio::time::timeout(self.fetch_timeout, source.fetch())
            .await
            .map_err(|_| UpstreamFetchError::Timeout)??;
        Ok(parse_domain_list(&body))
    }

    fn merge_and_install(
        &self,
        incoming: HashSet<String>,
        failed_sources: Vec<SourceFailure>,
    ) -> Result<RefreshReport, RefreshError> {
        let mut merged = match self.repository.load() {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!("Could not read persisted blocklist, merging with active set only: {}", e);
                HashSet::new()
            }
        };
        merged.extend(self.store.snapshot().domains().iter().cloned());

        let before = merged.len();
        merged.extend(incoming);

        if merged.is_empty() {
            return Err(RefreshError::TotalFailure {
                attempted: self.sources.len(),
                failed: failed_sources.len(),
            });
        }

        if let Err(e) = self.repository.save(&merged) {
            error!("Failed to persist merged blocklist: {}", e);
        }

        let added = merged.len() - before;
        let domain_count = merged.len();
        let generation = self.store.replace(BlocklistSnapshot::from_domains(merged));

        info!(
            "Blocklist refreshed: {} domains ({} new), {} sources failed",
            domain_count,
            added,
            failed_sources.len()
        );

        Ok(RefreshReport {
            domain_count,
            added,
            generation,
            failed_sources,
        })
    }
}

/// Run [`SourceAggregator::refresh`] every `every` for the lifetime of the runtime
pub fn spawn_refresh_task(
    aggregator: Arc<SourceAggregator>,
    every: Duration,
    run_immediately: bool,
) -> JoinHandle<()> {
    let every = every.max(Duration::from_secs(1));
    let start = if run_immediately {
        Instant::now()
    } else {
        Instant::now() + every
    };

    tokio::spawn(async move {
        let mut ticker = interval_at(start, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match aggregator.refresh().await {
                Ok(report) => debug!(
                    "Scheduled refresh installed generation {} ({} domains)",
                    report.generation, report.domain_count
                ),
                Err(e) => warn!("Scheduled refresh failed: {}", e),
            }
        }
    })
}
