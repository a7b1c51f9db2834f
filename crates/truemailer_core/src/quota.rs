//! Per-client daily quota ledger
//!
//! Every client owns its own mutex, so the read-check-increment-persist sequence is
//! serialized per client while different clients proceed independently. The outer index
//! lock is held only long enough to resolve an API key to a client handle.

use crate::persistence::ClientRepository;
use crate::{PersistenceError, QuotaError};
use chrono::{Days, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A provisioned API client and its usage history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientRecord {
    /// Stable identifier; the key of the record in persisted storage
    #[serde(skip)]
    pub id: String,
    /// Secret API key presented by the client
    pub key: String,
    /// Human-readable name
    pub name: String,
    /// Maximum admitted requests per calendar day
    #[serde(rename = "limit_per_day")]
    pub daily_limit: u32,
    /// ISO date -> admitted requests on that date
    #[serde(default)]
    pub usage: BTreeMap<String, u32>,
}

impl ClientRecord {
    pub fn usage_on(&self, date: &str) -> u32 {
        self.usage.get(date).copied().unwrap_or(0)
    }
}

/// Result of a successful check-and-consume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub used_today: u32,
    pub daily_limit: u32,
}

impl Admission {
    pub fn remaining(&self) -> u32 {
        self.daily_limit.saturating_sub(self.used_today)
    }
}

/// Public view of a newly created client
#[derive(Debug, Clone, Serialize)]
pub struct ClientSummary {
    pub id: String,
    pub key: String,
    pub name: String,
    pub daily_limit: u32,
}

/// Usage listing entry; never carries the secret key
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ClientUsage {
    pub id: String,
    pub name: String,
    pub daily_limit: u32,
    pub used_today: u32,
}

/// Source of the current calendar date
pub trait Clock: Send + Sync + Debug {
    fn today(&self) -> NaiveDate;
}

/// UTC calendar date from the system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// Manually advanced clock for tests and replays
#[derive(Debug)]
pub struct FixedClock {
    date: Mutex<NaiveDate>,
}

impl FixedClock {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date: Mutex::new(date),
        }
    }

    pub fn set(&self, date: NaiveDate) {
        *self.date.lock() = date;
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        *self.date.lock()
    }
}

/// Quota ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QuotaConfig {
    /// Days of usage history kept per client; `None` keeps everything
    pub usage_retention_days: Option<u32>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            usage_retention_days: Some(30),
        }
    }
}

#[derive(Default)]
struct LedgerIndex {
    clients: BTreeMap<String, Arc<Mutex<ClientRecord>>>,
    by_key: HashMap<String, String>,
}

/// Tracks per-client daily usage against each client's limit
pub struct QuotaLedger {
    index: RwLock<LedgerIndex>,
    repository: Arc<dyn ClientRepository>,
    clock: Arc<dyn Clock>,
    config: QuotaConfig,
}

impl QuotaLedger {
    /// Create an empty ledger
    pub fn new(
        repository: Arc<dyn ClientRepository>,
        clock: Arc<dyn Clock>,
        config: QuotaConfig,
    ) -> Self {
        Self {
            index: RwLock::new(LedgerIndex::default()),
            repository,
            clock,
            config,
        }
    }

    /// Create a ledger populated from the repository
    pub fn load(
        repository: Arc<dyn ClientRepository>,
        clock: Arc<dyn Clock>,
        config: QuotaConfig,
    ) -> Result<Self, PersistenceError> {
        let records = repository.load_all()?;
        let ledger = Self::new(repository, clock, config);

        {
            let mut index = ledger.index.write();
            for record in records {
                if index.by_key.contains_key(&record.key) {
                    warn!("Client '{}' reuses an existing API key, skipping", record.id);
                    continue;
                }
                index.by_key.insert(record.key.clone(), record.id.clone());
                index
                    .clients
                    .insert(record.id.clone(), Arc::new(Mutex::new(record)));
            }
            info!("Quota ledger loaded with {} clients", index.clients.len());
        }

        Ok(ledger)
    }

    /// Admit one request for `api_key` if today's usage is below the client's limit.
    ///
    /// Usage is incremented and persisted only on admission.
    pub fn check_and_consume(&self, api_key: &str) -> Result<Admission, QuotaError> {
        let handle = {
            let index = self.index.read();
            index
                .by_key
                .get(api_key)
                .and_then(|id| index.clients.get(id))
                .cloned()
                .ok_or(QuotaError::InvalidApiKey)?
        };

        let today = self.clock.today();
        let day = today.format(DATE_FORMAT).to_string();

        let mut record = handle.lock();
        let used = record.usage_on(&day);
        if used >= record.daily_limit {
            info!(
                client = %record.id,
                limit = record.daily_limit,
                "Daily limit reached, request denied"
            );
            return Err(QuotaError::DailyLimitExceeded {
                limit: record.daily_limit,
            });
        }

        *record.usage.entry(day).or_insert(0) += 1;
        self.prune_usage(&mut record, today);
        self.persist(&record);

        debug!(client = %record.id, used = used + 1, limit = record.daily_limit, "Request admitted");

        Ok(Admission {
            used_today: used + 1,
            daily_limit: record.daily_limit,
        })
    }

    /// Provision a new client with a freshly generated API key
    pub fn create_client(&self, name: &str, daily_limit: u32) -> Result<ClientRecord, QuotaError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(QuotaError::InvalidName);
        }
        if daily_limit == 0 {
            return Err(QuotaError::InvalidLimit);
        }

        let record = {
            let mut index = self.index.write();

            let id = unique_id(&slugify(name), |candidate| index.clients.contains_key(candidate));
            let mut key = generate_key();
            while index.by_key.contains_key(&key) {
                key = generate_key();
            }

            let record = ClientRecord {
                id: id.clone(),
                key: key.clone(),
                name: name.to_string(),
                daily_limit,
                usage: BTreeMap::new(),
            };

            index.by_key.insert(key, id.clone());
            index
                .clients
                .insert(id, Arc::new(Mutex::new(record.clone())));
            record
        };

        self.persist(&record);
        info!(client = %record.id, limit = daily_limit, "Client created");
        Ok(record)
    }

    /// Whether `api_key` belongs to a known client
    pub fn is_known_key(&self, api_key: &str) -> bool {
        self.index.read().by_key.contains_key(api_key)
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.index.read().clients.keys().cloned().collect()
    }

    /// Today's usage for every client, ordered by id
    pub fn usage_report(&self) -> Vec<ClientUsage> {
        let day = self.clock.today().format(DATE_FORMAT).to_string();
        let handles: Vec<Arc<Mutex<ClientRecord>>> =
            self.index.read().clients.values().cloned().collect();

        handles
            .iter()
            .map(|handle| {
                let record = handle.lock();
                ClientUsage {
                    id: record.id.clone(),
                    name: record.name.clone(),
                    daily_limit: record.daily_limit,
                    used_today: record.usage_on(&day),
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.index.read().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune_usage(&self, record: &mut ClientRecord, today: NaiveDate) {
        let Some(days) = self.config.usage_retention_days else {
            return;
        };
        let Some(cutoff) = today.checked_sub_days(Days::new(u64::from(days))) else {
            return;
        };

        // Keys that do not parse as dates are left alone
        record.usage.retain(|date, _| {
            NaiveDate::parse_from_str(date, DATE_FORMAT)
                .map(|d| d >= cutoff)
                .unwrap_or(true)
        });
    }

    fn persist(&self, record: &ClientRecord) {
        if let Err(e) = self.repository.save(record) {
            error!(client = %record.id, "Failed to persist client record: {}", e);
        }
    }
}

fn generate_key() -> String {
    format!("tm_{}", Uuid::new_v4().simple())
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "client".to_string()
    } else {
        slug.to_string()
    }
}

fn unique_id(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| format!("{}-{}", base, Uuid::new_v4().simple()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{JsonClientStore, MemoryClientRepository};
    use pretty_assertions::assert_eq;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn ledger_at(day: &str) -> (QuotaLedger, Arc<FixedClock>, Arc<MemoryClientRepository>) {
        let clock = Arc::new(FixedClock::new(date(day)));
        let repository = Arc::new(MemoryClientRepository::default());
        let ledger = QuotaLedger::new(repository.clone(), clock.clone(), QuotaConfig::default());
        (ledger, clock, repository)
    }

    #[test]
    fn test_sequential_limit() {
        let (ledger, _, _) = ledger_at("2026-10-17");
        let client = ledger.create_client("Acme", 2).unwrap();

        assert_eq!(ledger.check_and_consume(&client.key).unwrap().used_today, 1);
        assert_eq!(ledger.check_and_consume(&client.key).unwrap().remaining(), 0);
        assert_eq!(
            ledger.check_and_consume(&client.key),
            Err(QuotaError::DailyLimitExceeded { limit: 2 })
        );
    }

    #[test]
    fn test_denied_request_is_not_counted() {
        let (ledger, _, repository) = ledger_at("2026-10-17");
        let client = ledger.create_client("Acme", 1).unwrap();

        ledger.check_and_consume(&client.key).unwrap();
        assert!(ledger.check_and_consume(&client.key).is_err());
        assert!(ledger.check_and_consume(&client.key).is_err());

        let saved = repository.get(&client.id).unwrap();
        assert_eq!(saved.usage_on("2026-10-17"), 1);
    }

    #[test]
    fn test_concurrent_consumption_never_over_admits() {
        let (ledger, _, _) = ledger_at("2026-10-17");
        let client = ledger.create_client("Acme", 2).unwrap();

        let results: Vec<Result<Admission, QuotaError>> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..3)
                .map(|_| scope.spawn(|| ledger.check_and_consume(&client.key)))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(QuotaError::DailyLimitExceeded { .. })))
                .count(),
            1
        );
    }

    #[test]
    fn test_heavy_contention() {
        let (ledger, _, _) = ledger_at("2026-10-17");
        let busy = ledger.create_client("Busy", 25).unwrap();
        let quiet = ledger.create_client("Quiet", 5).unwrap();

        let admitted: usize = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..100)
                .map(|i| {
                    let key = if i % 2 == 0 { &busy.key } else { &quiet.key };
                    let ledger = &ledger;
                    scope.spawn(move || ledger.check_and_consume(key).is_ok())
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap() as usize).sum()
        });

        assert_eq!(admitted, 30);
    }

    #[test]
    fn test_unknown_key() {
        let (ledger, _, _) = ledger_at("2026-10-17");
        ledger.create_client("Acme", 5).unwrap();

        assert_eq!(ledger.check_and_consume("nope"), Err(QuotaError::InvalidApiKey));
        assert_eq!(ledger.check_and_consume(""), Err(QuotaError::InvalidApiKey));
    }

    #[test]
    fn test_usage_resets_on_new_day() {
        let (ledger, clock, _) = ledger_at("2026-10-17");
        let client = ledger.create_client("Acme", 1).unwrap();

        ledger.check_and_consume(&client.key).unwrap();
        assert!(ledger.check_and_consume(&client.key).is_err());

        clock.set(date("2026-10-18"));
        assert!(ledger.check_and_consume(&client.key).is_ok());
    }

    #[test]
    fn test_old_usage_is_pruned() {
        let clock = Arc::new(FixedClock::new(date("2026-10-01")));
        let repository = Arc::new(MemoryClientRepository::default());
        let config = QuotaConfig {
            usage_retention_days: Some(7),
        };
        let ledger = QuotaLedger::new(repository.clone(), clock.clone(), config);
        let client = ledger.create_client("Acme", 10).unwrap();

        ledger.check_and_consume(&client.key).unwrap();
        clock.set(date("2026-10-05"));
        ledger.check_and_consume(&client.key).unwrap();
        clock.set(date("2026-10-17"));
        ledger.check_and_consume(&client.key).unwrap();

        let saved = repository.get(&client.id).unwrap();
        let days: Vec<&String> = saved.usage.keys().collect();
        assert_eq!(days, vec!["2026-10-17"]);
    }

    #[test]
    fn test_unbounded_retention_keeps_history() {
        let clock = Arc::new(FixedClock::new(date("2026-01-01")));
        let repository = Arc::new(MemoryClientRepository::default());
        let config = QuotaConfig {
            usage_retention_days: None,
        };
        let ledger = QuotaLedger::new(repository.clone(), clock.clone(), config);
        let client = ledger.create_client("Acme", 10).unwrap();

        ledger.check_and_consume(&client.key).unwrap();
        clock.set(date("2026-10-17"));
        ledger.check_and_consume(&client.key).unwrap();

        assert_eq!(repository.get(&client.id).unwrap().usage.len(), 2);
    }

    #[test]
    fn test_retention_beyond_calendar_range_keeps_history() {
        let clock = Arc::new(FixedClock::new(date("2026-01-01")));
        let repository = Arc::new(MemoryClientRepository::default());
        let config = QuotaConfig {
            usage_retention_days: Some(u32::MAX),
        };
        let ledger = QuotaLedger::new(repository.clone(), clock.clone(), config);
        let client = ledger.create_client("Acme", 10).unwrap();

        ledger.check_and_consume(&client.key).unwrap();
        clock.set(date("2026-10-17"));
        let admission = ledger.check_and_consume(&client.key).unwrap();

        assert_eq!(admission.used_today, 1);
        assert_eq!(repository.get(&client.id).unwrap().usage.len(), 2);
    }

    #[test]
    fn test_create_client_validation() {
        let (ledger, _, _) = ledger_at("2026-10-17");
        assert_eq!(ledger.create_client("Acme", 0), Err(QuotaError::InvalidLimit));
        assert_eq!(ledger.create_client("   ", 10), Err(QuotaError::InvalidName));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_client_ids_are_unique() {
        let (ledger, _, _) = ledger_at("2026-10-17");
        let first = ledger.create_client("Acme Corp", 5).unwrap();
        let second = ledger.create_client("acme corp!", 5).unwrap();
        let third = ledger.create_client("???", 5).unwrap();

        assert_eq!(first.id, "acme-corp");
        assert_eq!(second.id, "acme-corp-2");
        assert_eq!(third.id, "client");
        assert_ne!(first.key, second.key);
        assert!(first.key.starts_with("tm_"));
        assert_eq!(ledger.client_ids(), vec!["acme-corp", "acme-corp-2", "client"]);
    }

    #[test]
    fn test_usage_report_hides_keys() {
        let (ledger, _, _) = ledger_at("2026-10-17");
        let client = ledger.create_client("Acme", 3).unwrap();
        ledger.check_and_consume(&client.key).unwrap();

        assert_eq!(
            ledger.usage_report(),
            vec![ClientUsage {
                id: "acme".to_string(),
                name: "Acme".to_string(),
                daily_limit: 3,
                used_today: 1,
            }]
        );
    }

    #[test]
    fn test_ledger_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clients.json");
        let clock = Arc::new(FixedClock::new(date("2026-10-17")));

        let key = {
            let ledger = QuotaLedger::new(
                Arc::new(JsonClientStore::new(&path)),
                clock.clone(),
                QuotaConfig::default(),
            );
            let client = ledger.create_client("Acme", 2).unwrap();
            ledger.check_and_consume(&client.key).unwrap();
            client.key
        };

        let reloaded = QuotaLedger::load(
            Arc::new(JsonClientStore::new(&path)),
            clock,
            QuotaConfig::default(),
        )
        .unwrap();

        assert!(reloaded.is_known_key(&key));
        assert!(reloaded.check_and_consume(&key).is_ok());
        assert_eq!(
            reloaded.check_and_consume(&key),
            Err(QuotaError::DailyLimitExceeded { limit: 2 })
        );
    }

    #[test]
    fn test_persistence_failure_does_not_block_admission() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("occupied");
        std::fs::write(&blocker, "not a directory").unwrap();

        let ledger = QuotaLedger::new(
            Arc::new(JsonClientStore::new(blocker.join("clients.json"))),
            Arc::new(FixedClock::new(date("2026-10-17"))),
            QuotaConfig::default(),
        );
        let client = ledger.create_client("Acme", 1).unwrap();

        assert!(ledger.check_and_consume(&client.key).is_ok());
        assert!(ledger.check_and_consume(&client.key).is_err());
    }
}
