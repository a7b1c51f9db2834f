//! # truemailer_core
//!
//! Domain-reputation engine behind the truemailer verification service: decides whether
//! an email address is well-formed, routable and not served by a disposable provider,
//! and gates access with per-API-key daily quotas.
//!
//! ## Components
//!
//! - **BlocklistStore** - active set of disposable domains, swapped atomically on reload
//! - **HeuristicClassifier** - flags domains that *look* disposable even when unlisted
//! - **SourceAggregator** - fetches remote domain lists, merges, persists and installs them
//! - **QuotaLedger** - per-client daily usage with atomic check-and-consume
//! - **VerificationPipeline** - syntax -> trusted provider -> disposable -> MX routing
//!
//! ## Example
//!
//! ```rust,no_run
//! use truemailer_core::{ReputationConfig, ReputationService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ReputationConfig {
//!         admin_secret: Some("admin-secret".to_string()),
//!         ..ReputationConfig::default()
//!     };
//!     let service = ReputationService::from_config(config).await?;
//!     let client = service.create_client("Acme", 100, "admin-secret")?;
//!
//!     let verdict = service.verify("someone@example.com", &client.key).await?;
//!     println!("{} -> {}", verdict.input_email, verdict.reason);
//!     Ok(())
//! }
//! ```

pub mod blocklist;
pub mod dns;
pub mod heuristics;
pub mod persistence;
pub mod privacy;
pub mod quota;
pub mod service;
pub mod sources;
pub mod verification;

use std::path::PathBuf;
use thiserror::Error;

pub use blocklist::{normalize_domain, BlocklistSnapshot, BlocklistStore};
pub use dns::{DnsResolver, MailRoutingCheck};
pub use heuristics::{HeuristicClassifier, HeuristicConfig, HeuristicMatch};
pub use privacy::EmailRedactor;
pub use quota::{ClientRecord, ClientSummary, ClientUsage, QuotaConfig, QuotaLedger};
pub use service::{ReputationService, ServiceStatus};
pub use sources::{RefreshReport, SourceAggregator, SourceConfig};
pub use verification::{ReasonCode, VerificationPipeline, VerificationVerdict};

/// Configuration for the whole reputation engine
#[derive(Debug, Clone)]
pub struct ReputationConfig {
    /// Per-query DNS timeout in milliseconds
    pub dns_timeout_ms: u64,
    /// Maximum number of DNS lookup attempts
    pub dns_attempts: usize,
    /// DNS cache size (number of entries)
    pub dns_cache_size: usize,
    /// Use /etc/resolv.conf instead of Cloudflare's public resolvers
    pub use_system_resolver: bool,
    /// Upper bound for a whole mail-routing check in milliseconds
    pub mx_timeout_ms: u64,
    /// Newline-delimited disposable domain list
    pub blocklist_path: PathBuf,
    /// Optional newline-delimited list of extra trusted providers
    pub allowlist_path: Option<PathBuf>,
    /// JSON client/quota store
    pub clients_path: PathBuf,
    /// Trusted providers added on top of the built-in set
    pub extra_trusted_providers: Vec<String>,
    /// Secret required by administrative operations; `None` disables them
    pub admin_secret: Option<String>,
    /// Salt used to pseudonymise addresses in logs; random when unset
    pub privacy_salt: Option<String>,
    pub heuristics: HeuristicConfig,
    pub sources: SourceConfig,
    pub quota: QuotaConfig,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            dns_timeout_ms: 1000,
            dns_attempts: 2,
            dns_cache_size: 10_000,
            use_system_resolver: false,
            mx_timeout_ms: 2000,
            blocklist_path: PathBuf::from("data/blocklist.txt"),
            allowlist_path: None,
            clients_path: PathBuf::from("data/clients.json"),
            extra_trusted_providers: Vec::new(),
            admin_secret: None,
            privacy_salt: None,
            heuristics: HeuristicConfig::default(),
            sources: SourceConfig::default(),
            quota: QuotaConfig::default(),
        }
    }
}

/// Durable-storage failures. Logged by callers; in-memory state stays authoritative.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed record store {}: {source}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure of a single remote source. Logged and skipped, never aborts a refresh.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamFetchError {
    #[error("request timed out")]
    Timeout,
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Quota ledger outcomes that deny a request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuotaError {
    #[error("Invalid API key")]
    InvalidApiKey,
    #[error("Daily limit of {limit} requests exceeded")]
    DailyLimitExceeded { limit: u32 },
    #[error("Daily limit must be a positive integer")]
    InvalidLimit,
    #[error("Client name must not be empty")]
    InvalidName,
}

/// Refresh cycle failures
#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("No domains available after merge ({failed} of {attempted} sources failed)")]
    TotalFailure { attempted: usize, failed: usize },
}

/// Errors surfaced to callers of [`ReputationService`]
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid API key")]
    InvalidApiKey,
    #[error("Daily limit of {limit} requests exceeded")]
    DailyLimitExceeded { limit: u32 },
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Refresh(#[from] RefreshError),
}

impl ServiceError {
    /// Stable machine-readable code reported to API callers
    pub fn reason_code(&self) -> &'static str {
        match self {
            ServiceError::InvalidApiKey => "invalid_api_key",
            ServiceError::DailyLimitExceeded { .. } => "daily_limit_exceeded",
            ServiceError::Unauthorized => "unauthorized",
            ServiceError::InvalidRequest(_) => "invalid_request",
            ServiceError::Refresh(_) => "refresh_failed",
        }
    }
}

impl From<QuotaError> for ServiceError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::InvalidApiKey => ServiceError::InvalidApiKey,
            QuotaError::DailyLimitExceeded { limit } => ServiceError::DailyLimitExceeded { limit },
            QuotaError::InvalidLimit | QuotaError::InvalidName => {
                ServiceError::InvalidRequest(err.to_string())
            }
        }
    }
}
