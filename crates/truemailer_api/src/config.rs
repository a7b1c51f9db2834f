//! Configuration management for the truemailer API
//!
//! Values are layered with figment: built-in defaults, then an optional
//! `Truemailer.toml`, then `TRUEMAILER_`-prefixed environment variables using `__`
//! as the section separator (e.g. `TRUEMAILER_SERVER__PORT=8080`).

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use truemailer_core::{HeuristicConfig, QuotaConfig, ReputationConfig, SourceConfig};

pub const CONFIG_FILE: &str = "Truemailer.toml";
pub const ENV_PREFIX: &str = "TRUEMAILER_";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub verification: VerificationConfig,
    pub sources: SourceConfig,
    pub storage: StorageConfig,
    pub quota: QuotaConfig,
    pub security: SecurityConfig,
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Deadline for a single verification request in seconds
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout_secs: 10,
        }
    }
}

/// Verification pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Per-query DNS timeout in milliseconds
    pub dns_timeout_ms: u64,
    /// Maximum number of DNS lookup attempts
    pub dns_attempts: usize,
    /// DNS cache size (number of entries)
    pub dns_cache_size: usize,
    /// Read nameservers from the host instead of using Cloudflare
    pub use_system_resolver: bool,
    /// Upper bound for a whole MX check in milliseconds
    pub mx_timeout_ms: u64,
    /// Providers trusted on top of the built-in list
    pub extra_trusted_providers: Vec<String>,
    pub heuristics: HeuristicConfig,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            dns_timeout_ms: 1000,
            dns_attempts: 2,
            dns_cache_size: 10_000,
            use_system_resolver: false,
            mx_timeout_ms: 2000,
            extra_trusted_providers: Vec::new(),
            heuristics: HeuristicConfig::default(),
        }
    }
}

/// Where persistent state lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub blocklist_path: PathBuf,
    pub allowlist_path: Option<PathBuf>,
    pub clients_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blocklist_path: PathBuf::from("data/blocklist.txt"),
            allowlist_path: None,
            clients_path: PathBuf::from("data/clients.json"),
        }
    }
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Secret expected in `x-admin-secret`; admin routes are disabled when unset
    pub admin_secret: Option<String>,
    /// Salt for pseudonymising addresses in logs
    pub privacy_salt: Option<String>,
    /// Maximum request body size in bytes
    pub max_body_size_bytes: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            admin_secret: None,
            privacy_salt: None,
            max_body_size_bytes: 64 * 1024,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable JSON structured logging
    pub json_logs: bool,
    /// Log level used when RUST_LOG is unset
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Engine configuration derived from the service configuration
    pub fn reputation_config(&self) -> ReputationConfig {
        ReputationConfig {
            dns_timeout_ms: self.verification.dns_timeout_ms,
            dns_attempts: self.verification.dns_attempts,
            dns_cache_size: self.verification.dns_cache_size,
            use_system_resolver: self.verification.use_system_resolver,
            mx_timeout_ms: self.verification.mx_timeout_ms,
            blocklist_path: self.storage.blocklist_path.clone(),
            allowlist_path: self.storage.allowlist_path.clone(),
            clients_path: self.storage.clients_path.clone(),
            extra_trusted_providers: self.verification.extra_trusted_providers.clone(),
            admin_secret: self.security.admin_secret.clone(),
            privacy_salt: self.security.privacy_salt.clone(),
            heuristics: self.verification.heuristics.clone(),
            sources: self.sources.clone(),
            quota: self.quota.clone(),
        }
    }
}

/// Layer defaults, an optional TOML file and the environment
pub fn layered(config_file: &Path) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if config_file.exists() {
        figment = figment.merge(Toml::file(config_file));
    }

    figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load application configuration from `Truemailer.toml` and the environment
pub fn load_config() -> Result<AppConfig, figment::Error> {
    layered(Path::new(CONFIG_FILE)).extract()
}
