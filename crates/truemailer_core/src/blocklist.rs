//! Active disposable-domain blocklist
//!
//! The store holds an immutable [`BlocklistSnapshot`] behind an `Arc`. Readers clone the
//! `Arc` and query it without holding the lock; a replace installs a brand-new snapshot,
//! so anyone still holding the previous one keeps a complete, unchanged set.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Normalize a domain for storage and lookup: trimmed, ASCII-lowercased, no trailing dot
pub fn normalize_domain(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_ascii_lowercase())
}

/// Immutable point-in-time view of the blocklist
#[derive(Debug, Clone, Default)]
pub struct BlocklistSnapshot {
    domains: HashSet<String>,
    generation: u64,
}

impl BlocklistSnapshot {
    /// Build a snapshot from raw domains. The generation is stamped by the store on install.
    pub fn from_domains<I>(domains: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let domains = domains
            .into_iter()
            .filter_map(|d| normalize_domain(&d))
            .collect();

        Self {
            domains,
            generation: 0,
        }
    }

    pub fn contains(&self, domain: &str) -> bool {
        match normalize_domain(domain) {
            Some(normalized) => self.domains.contains(&normalized),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn domains(&self) -> &HashSet<String> {
        &self.domains
    }
}

/// Concurrently readable store of the active blocklist snapshot
#[derive(Debug, Default)]
pub struct BlocklistStore {
    active: RwLock<Arc<BlocklistSnapshot>>,
}

impl BlocklistStore {
    /// Create an empty store (generation 0)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with an initial set of domains
    pub fn with_domains<I>(domains: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let store = Self::new();
        store.replace(BlocklistSnapshot::from_domains(domains));
        store
    }

    /// Check whether a domain is blocked in the active snapshot
    pub fn contains(&self, domain: &str) -> bool {
        let blocked = self.snapshot().contains(domain);
        if blocked {
            debug!("Domain '{}' found in blocklist", domain);
        }
        blocked
    }

    /// Number of domains in the active snapshot
    pub fn size(&self) -> usize {
        self.active.read().len()
    }

    /// Generation of the active snapshot
    pub fn generation(&self) -> u64 {
        self.active.read().generation
    }

    /// Shared handle to the active snapshot
    pub fn snapshot(&self) -> Arc<BlocklistSnapshot> {
        Arc::clone(&self.active.read())
    }

    /// Atomically install a new snapshot and return its generation
    pub fn replace(&self, mut snapshot: BlocklistSnapshot) -> u64 {
        let mut active = self.active.write();
        snapshot.generation = active.generation + 1;
        let generation = snapshot.generation;
        let count = snapshot.len();
        *active = Arc::new(snapshot);
        drop(active);

        info!("Blocklist generation {} installed with {} domains", generation, count);
        generation
    }
}
