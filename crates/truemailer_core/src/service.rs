//! Facade tying the quota ledger, the pipeline and the blocklist maintenance together
//!
//! This is the surface consumed by transport layers: every request-level operation goes
//! through [`ReputationService`], which owns the shared components and enforces API-key
//! and administrator authorization.

use crate::blocklist::BlocklistStore;
use crate::dns::DnsResolver;
use crate::heuristics::HeuristicClassifier;
use crate::persistence::{BlocklistRepository, DomainListFile, JsonClientStore};
use crate::privacy::EmailRedactor;
use crate::quota::{ClientSummary, ClientUsage, QuotaLedger, SystemClock};
use crate::sources::{http_sources, RefreshReport, SourceAggregator};
use crate::verification::{VerificationPipeline, VerificationVerdict};
use crate::{ReputationConfig, ServiceError};
use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// Read-only view of the engine state
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServiceStatus {
    pub loaded_domain_count: usize,
    pub generation: u64,
    pub client_ids: Vec<String>,
    pub trusted_provider_count: usize,
}

/// Domain-reputation engine with access control
pub struct ReputationService {
    ledger: Arc<QuotaLedger>,
    pipeline: Arc<VerificationPipeline>,
    aggregator: Arc<SourceAggregator>,
    store: Arc<BlocklistStore>,
    admin_secret: Option<String>,
}

impl ReputationService {
    /// Assemble a service from already constructed components
    pub fn new(
        ledger: Arc<QuotaLedger>,
        pipeline: Arc<VerificationPipeline>,
        aggregator: Arc<SourceAggregator>,
        store: Arc<BlocklistStore>,
        admin_secret: Option<String>,
    ) -> Self {
        if admin_secret.is_none() {
            warn!("No admin secret configured, administrative operations are disabled");
        }
        Self {
            ledger,
            pipeline,
            aggregator,
            store,
            admin_secret,
        }
    }

    /// Build the production wiring: file-backed stores, HTTP sources and a DNS resolver
    ///
    /// Fails if persisted state cannot be read; nothing is fetched from the network here.
    pub async fn from_config(config: ReputationConfig) -> Result<Self> {
        info!("Initializing reputation service");

        let store = Arc::new(BlocklistStore::new());
        let aggregator = Arc::new(SourceAggregator::new(
            http_sources(&config.sources)?,
            store.clone(),
            Arc::new(DomainListFile::new(&config.blocklist_path)),
            Duration::from_secs(config.sources.fetch_timeout_secs),
        ));
        let loaded = aggregator
            .load_local()
            .context("Failed to load persisted blocklist")?;
        info!("Loaded {} disposable domains from local storage", loaded);

        let ledger = QuotaLedger::load(
            Arc::new(JsonClientStore::new(&config.clients_path)),
            Arc::new(SystemClock),
            config.quota.clone(),
        )
        .context("Failed to load client records")?;

        let mut trusted = config.extra_trusted_providers.clone();
        if let Some(path) = &config.allowlist_path {
            let allowlist = DomainListFile::new(path)
                .load()
                .context("Failed to load trusted provider allowlist")?;
            trusted.extend(allowlist);
        }

        let resolver = DnsResolver::new(
            config.dns_timeout_ms,
            config.dns_attempts,
            config.dns_cache_size,
            config.use_system_resolver,
        )
        .context("Failed to initialize DNS resolver")?;

        let redactor = match &config.privacy_salt {
            Some(salt) => EmailRedactor::new(salt.as_bytes()),
            None => EmailRedactor::with_random_salt(),
        };

        let pipeline = VerificationPipeline::new(
            store.clone(),
            HeuristicClassifier::new(&config.heuristics),
            Arc::new(resolver),
            Duration::from_millis(config.mx_timeout_ms),
        )
        .with_trusted_providers(trusted)
        .with_redactor(redactor);

        info!("Reputation service initialized successfully");

        Ok(Self::new(
            Arc::new(ledger),
            Arc::new(pipeline),
            aggregator,
            store,
            config.admin_secret,
        ))
    }

    /// Consume one unit of `api_key`'s quota, then verify `email`
    pub async fn verify(
        &self,
        email: &str,
        api_key: &str,
    ) -> Result<VerificationVerdict, ServiceError> {
        self.verify_before(email, api_key, None).await
    }

    /// Like [`verify`](Self::verify), with the MX check bounded by the caller's deadline
    #[instrument(skip_all)]
    pub async fn verify_before(
        &self,
        email: &str,
        api_key: &str,
        deadline: Option<Instant>,
    ) -> Result<VerificationVerdict, ServiceError> {
        self.ledger.check_and_consume(api_key)?;
        Ok(self.pipeline.verify_before(email, deadline).await)
    }

    /// Provision a client. Requires the administrator secret.
    pub fn create_client(
        &self,
        name: &str,
        daily_limit: u32,
        admin_credential: &str,
    ) -> Result<ClientSummary, ServiceError> {
        self.authorize_admin(admin_credential)?;
        let record = self.ledger.create_client(name, daily_limit)?;
        Ok(ClientSummary {
            id: record.id,
            key: record.key,
            name: record.name,
            daily_limit: record.daily_limit,
        })
    }

    /// Today's usage for every client. Requires the administrator secret.
    pub fn list_clients(&self, admin_credential: &str) -> Result<Vec<ClientUsage>, ServiceError> {
        self.authorize_admin(admin_credential)?;
        Ok(self.ledger.usage_report())
    }

    /// Trigger a refresh now; a supplied credential must be a known API key
    pub async fn refresh_now(
        &self,
        credential: Option<&str>,
    ) -> Result<RefreshReport, ServiceError> {
        if let Some(key) = credential {
            if !self.ledger.is_known_key(key) {
                return Err(ServiceError::Unauthorized);
            }
        }
        Ok(self.aggregator.refresh().await?)
    }

    /// Merge domains into the blocklist. Requires the administrator secret.
    pub async fn add_domains(
        &self,
        domains: &[String],
        admin_credential: &str,
    ) -> Result<RefreshReport, ServiceError> {
        self.authorize_admin(admin_credential)?;
        if domains.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "No domains supplied".to_string(),
            ));
        }
        Ok(self.aggregator.add_domains(domains).await?)
    }

    pub fn status(&self) -> ServiceStatus {
        let snapshot = self.store.snapshot();
        ServiceStatus {
            loaded_domain_count: snapshot.len(),
            generation: snapshot.generation(),
            client_ids: self.ledger.client_ids(),
            trusted_provider_count: self.pipeline.trusted_provider_count(),
        }
    }

    pub fn aggregator(&self) -> &Arc<SourceAggregator> {
        &self.aggregator
    }

    fn authorize_admin(&self, credential: &str) -> Result<(), ServiceError> {
        match &self.admin_secret {
            Some(secret) if digests_match(secret, credential) => Ok(()),
            _ => {
                warn!("Rejected administrative request");
                Err(ServiceError::Unauthorized)
            }
        }
    }
}

/// Compare two secrets without short-circuiting on the first differing byte
fn digests_match(expected: &str, provided: &str) -> bool {
    let expected = Sha256::digest(expected.as_bytes());
    let provided = Sha256::digest(provided.as_bytes());
    expected
        .iter()
        .zip(provided.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
