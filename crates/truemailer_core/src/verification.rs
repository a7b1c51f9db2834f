//! Verification pipeline producing one verdict per email address
//!
//! The checks run in a fixed order and the first terminal rule wins:
//!
//! 1. empty input
//! 2. syntax shape
//! 3. trusted provider (skips the disposable checks)
//! 4. blocklist membership, then heuristics
//! 5. MX routing
//!
//! DNS failures of any kind collapse into `mail_routing_ok = false`; nothing in here
//! returns an error.

use crate::blocklist::{normalize_domain, BlocklistStore};
use crate::dns::MailRoutingCheck;
use crate::heuristics::HeuristicClassifier;
use crate::privacy::EmailRedactor;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

pub const MAX_LOCAL_PART_LEN: usize = 64;
pub const MAX_DOMAIN_LEN: usize = 255;

/// Well-known long-lived mailbox providers
pub const DEFAULT_TRUSTED_PROVIDERS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "outlook.com",
    "hotmail.com",
    "live.com",
    "msn.com",
    "yahoo.com",
    "ymail.com",
    "icloud.com",
    "me.com",
    "mac.com",
    "aol.com",
    "protonmail.com",
    "proton.me",
    "zoho.com",
    "yandex.com",
    "gmx.com",
    "gmx.de",
    "web.de",
    "mail.com",
    "fastmail.com",
    "tutanota.com",
    "qq.com",
    "163.com",
    "126.com",
    "naver.com",
];

/// Why a verdict was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Empty,
    InvalidSyntax,
    TrustedProvider,
    DisposableDomain,
    NoMailRouting,
    Valid,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Empty => "empty",
            ReasonCode::InvalidSyntax => "invalid_syntax",
            ReasonCode::TrustedProvider => "trusted_provider",
            ReasonCode::DisposableDomain => "disposable_domain",
            ReasonCode::NoMailRouting => "no_mail_routing",
            ReasonCode::Valid => "valid",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of verifying a single address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationVerdict {
    /// Address as received
    #[serde(rename = "email")]
    pub input_email: String,
    /// Normalized domain, when the syntax check got that far
    pub domain: Option<String>,
    pub valid: bool,
    pub reason: ReasonCode,
    pub disposable: bool,
    #[serde(rename = "mx")]
    pub mail_routing_ok: bool,
    /// Trusted provider that matched, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_provider: Option<String>,
}

impl VerificationVerdict {
    fn rejected(input: &str, reason: ReasonCode) -> Self {
        Self {
            input_email: input.to_string(),
            domain: None,
            valid: false,
            reason,
            disposable: false,
            mail_routing_ok: false,
            matched_provider: None,
        }
    }
}

/// Split `email` into local part and normalized domain if it has a plausible shape
pub fn split_address(email: &str) -> Option<(&str, String)> {
    if email.chars().any(char::is_whitespace) {
        return None;
    }

    let (local, domain) = email.split_once('@')?;
    if domain.contains('@') {
        return None;
    }
    if local.is_empty() || local.len() > MAX_LOCAL_PART_LEN {
        return None;
    }
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return None;
    }

    normalize_domain(domain).map(|domain| (local, domain))
}

/// Orchestrates the per-address checks
pub struct VerificationPipeline {
    blocklist: Arc<BlocklistStore>,
    classifier: HeuristicClassifier,
    routing: Arc<dyn MailRoutingCheck>,
    trusted: HashSet<String>,
    mx_timeout: Duration,
    redactor: EmailRedactor,
}

impl VerificationPipeline {
    /// Create a pipeline trusting only [`DEFAULT_TRUSTED_PROVIDERS`]
    ///
    /// # Arguments
    /// * `blocklist` - Shared disposable-domain store
    /// * `classifier` - Heuristics for unlisted domains
    /// * `routing` - MX check used for every syntactically valid address
    /// * `mx_timeout` - Upper bound for one MX check
    pub fn new(
        blocklist: Arc<BlocklistStore>,
        classifier: HeuristicClassifier,
        routing: Arc<dyn MailRoutingCheck>,
        mx_timeout: Duration,
    ) -> Self {
        let trusted = DEFAULT_TRUSTED_PROVIDERS
            .iter()
            .map(|d| d.to_string())
            .collect();

        Self {
            blocklist,
            classifier,
            routing,
            trusted,
            mx_timeout,
            redactor: EmailRedactor::with_random_salt(),
        }
    }

    /// Add providers on top of the built-in set
    pub fn with_trusted_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let before = self.trusted.len();
        self.trusted.extend(
            providers
                .into_iter()
                .filter_map(|p| normalize_domain(p.as_ref())),
        );
        info!(
            "Trusted providers: {} ({} added)",
            self.trusted.len(),
            self.trusted.len() - before
        );
        self
    }

    pub fn with_redactor(mut self, redactor: EmailRedactor) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn is_trusted(&self, domain: &str) -> bool {
        normalize_domain(domain).is_some_and(|d| self.trusted.contains(&d))
    }

    pub fn trusted_provider_count(&self) -> usize {
        self.trusted.len()
    }

    /// Verify one address with the default MX budget
    pub async fn verify(&self, email: &str) -> VerificationVerdict {
        self.verify_before(email, None).await
    }

    /// Verify one address; the MX check never runs past `deadline`
    #[instrument(skip_all, fields(email = %self.redactor.redact(email)))]
    pub async fn verify_before(
        &self,
        email: &str,
        deadline: Option<Instant>,
    ) -> VerificationVerdict {
        let trimmed = email.trim();
        if trimmed.is_empty() {
            debug!("Rejected empty input");
            return VerificationVerdict::rejected(email, ReasonCode::Empty);
        }

        let Some((_, domain)) = split_address(trimmed) else {
            debug!("Rejected malformed address");
            return VerificationVerdict::rejected(email, ReasonCode::InvalidSyntax);
        };

        let budget = self.mx_budget(deadline);

        if self.trusted.contains(&domain) {
            let mail_routing_ok = self.routing.has_mail_routing(&domain, budget).await;
            debug!("Trusted provider {} (mx: {})", domain, mail_routing_ok);
            return VerificationVerdict {
                input_email: email.to_string(),
                matched_provider: Some(domain.clone()),
                domain: Some(domain),
                valid: true,
                reason: ReasonCode::TrustedProvider,
                disposable: false,
                mail_routing_ok,
            };
        }

        let listed = self.blocklist.contains(&domain);
        let flagged = if listed {
            None
        } else {
            self.classifier.classify(&domain)
        };

        if listed || flagged.is_some() {
            let mail_routing_ok = self.routing.has_mail_routing(&domain, budget).await;
            match flagged {
                Some(rule) => debug!("Domain {} flagged by heuristic {:?}", domain, rule),
                None => debug!("Domain {} is on the blocklist", domain),
            }
            return VerificationVerdict {
                input_email: email.to_string(),
                domain: Some(domain),
                valid: false,
                reason: ReasonCode::DisposableDomain,
                disposable: true,
                mail_routing_ok,
                matched_provider: None,
            };
        }

        let mail_routing_ok = self.routing.has_mail_routing(&domain, budget).await;
        let reason = if mail_routing_ok {
            ReasonCode::Valid
        } else {
            ReasonCode::NoMailRouting
        };
        debug!("Domain {} verdict: {}", domain, reason);

        VerificationVerdict {
            input_email: email.to_string(),
            domain: Some(domain),
            valid: mail_routing_ok,
            reason,
            disposable: false,
            mail_routing_ok,
            matched_provider: None,
        }
    }

    fn mx_budget(&self, deadline: Option<Instant>) -> Duration {
        match deadline {
            Some(deadline) => self
                .mx_timeout
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.mx_timeout,
        }
    }
}
