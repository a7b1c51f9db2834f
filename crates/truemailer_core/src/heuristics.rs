//! Heuristic detection of disposable-looking domains
//!
//! Catches throwaway domains that are not (yet) present in any blocklist. Three rules are
//! applied in order and the first match wins:
//!
//! 1. the domain contains a suspicious token (case-insensitive substring match)
//! 2. the domain contains at least `digit_threshold` decimal digits
//! 3. a purely alphabetic label is at most `short_label_max_len` characters long

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Substrings that strongly indicate a throwaway mailbox provider
pub const DEFAULT_SUSPICIOUS_TOKENS: &[&str] = &[
    "temp",
    "trash",
    "mailinator",
    "spam",
    "fake",
    "guerrilla",
    "0mail",
    "10minute",
    "throwaway",
    "disposable",
    "dispostable",
    "yopmail",
    "sharklasers",
    "getnada",
    "maildrop",
    "burner",
];

pub const DEFAULT_DIGIT_THRESHOLD: usize = 4;
pub const DEFAULT_SHORT_LABEL_MAX_LEN: usize = 2;

/// Tunable thresholds for [`HeuristicClassifier`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HeuristicConfig {
    /// Case-insensitive substrings that flag a domain
    pub suspicious_tokens: Vec<String>,
    /// Number of decimal digits at which a domain is flagged
    pub digit_threshold: usize,
    /// Alphabetic labels at or below this length are flagged
    pub short_label_max_len: usize,
    /// Whether the top-level label takes part in the short-label rule
    pub check_top_level_label: bool,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            suspicious_tokens: DEFAULT_SUSPICIOUS_TOKENS
                .iter()
                .map(|t| t.to_string())
                .collect(),
            digit_threshold: DEFAULT_DIGIT_THRESHOLD,
            short_label_max_len: DEFAULT_SHORT_LABEL_MAX_LEN,
            check_top_level_label: true,
        }
    }
}

/// Which rule flagged a domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeuristicMatch {
    SuspiciousToken(String),
    DigitDensity(usize),
    ShortLabel(String),
}

/// Stateless scorer for domains that look disposable
#[derive(Debug, Clone)]
pub struct HeuristicClassifier {
    tokens: Vec<String>,
    digit_threshold: usize,
    short_label_max_len: usize,
    check_top_level_label: bool,
}

impl HeuristicClassifier {
    pub fn new(config: &HeuristicConfig) -> Self {
        let tokens: Vec<String> = config
            .suspicious_tokens
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        debug!(
            "Heuristic classifier initialized with {} tokens, digit threshold {}, short label <= {}",
            tokens.len(),
            config.digit_threshold,
            config.short_label_max_len
        );

        Self {
            tokens,
            digit_threshold: config.digit_threshold,
            short_label_max_len: config.short_label_max_len,
            check_top_level_label: config.check_top_level_label,
        }
    }

    /// Return the first rule that flags `domain`, if any
    pub fn classify(&self, domain: &str) -> Option<HeuristicMatch> {
        let domain = domain.to_lowercase();

        if let Some(token) = self.tokens.iter().find(|t| domain.contains(t.as_str())) {
            return Some(HeuristicMatch::SuspiciousToken(token.clone()));
        }

        let digits = domain.chars().filter(|c| c.is_ascii_digit()).count();
        if digits >= self.digit_threshold {
            return Some(HeuristicMatch::DigitDensity(digits));
        }

        let labels: Vec<&str> = domain.split('.').collect();
        let checked = if self.check_top_level_label {
            labels.len()
        } else {
            labels.len().saturating_sub(1)
        };

        labels[..checked]
            .iter()
            .find(|label| {
                !label.is_empty()
                    && label.len() <= self.short_label_max_len
                    && label.chars().all(|c| c.is_ascii_alphabetic())
            })
            .map(|label| HeuristicMatch::ShortLabel(label.to_string()))
    }

    /// Whether any rule flags `domain`
    pub fn looks_disposable(&self, domain: &str) -> bool {
        self.classify(domain).is_some()
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}

impl Default for HeuristicClassifier {
    fn default() -> Self {
        Self::new(&HeuristicConfig::default())
    }
}
