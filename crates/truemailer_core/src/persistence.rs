//! Durable storage for the blocklist and the client/quota records
//!
//! Both stores sit behind small traits so the ledger and the aggregator do not care
//! whether writes go straight to disk, get batched, or stay in memory (tests).
//!
//! File formats:
//! - domain lists are newline-delimited, lowercase, sorted
//! - client records are a JSON object keyed by client id

use crate::quota::ClientRecord;
use crate::sources::parse_domain_list;
use crate::PersistenceError;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Storage for the merged disposable-domain list
pub trait BlocklistRepository: Send + Sync {
    /// Load the persisted set. A missing store is an empty set, not an error.
    fn load(&self) -> Result<HashSet<String>, PersistenceError>;
    /// Replace the persisted set
    fn save(&self, domains: &HashSet<String>) -> Result<(), PersistenceError>;
}

/// Storage for client records
///
/// `save` is called synchronously while the ledger holds the client's lock, once per
/// admitted request. Implementations should keep it short; the JSON file store rewrites
/// the whole file and suits small deployments only.
pub trait ClientRepository: Send + Sync {
    /// Load every record. A missing store yields no records.
    fn load_all(&self) -> Result<Vec<ClientRecord>, PersistenceError>;
    /// Insert or overwrite a single record
    fn save(&self, record: &ClientRecord) -> Result<(), PersistenceError>;
}

/// Newline-delimited domain list on disk
#[derive(Debug, Clone)]
pub struct DomainListFile {
    path: PathBuf,
}

impl DomainListFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlocklistRepository for DomainListFile {
    fn load(&self) -> Result<HashSet<String>, PersistenceError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Domain list {} not found, starting empty", self.path.display());
                return Ok(HashSet::new());
            }
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let domains = parse_domain_list(&content);
        info!("Loaded {} domains from {}", domains.len(), self.path.display());
        Ok(domains)
    }

    fn save(&self, domains: &HashSet<String>) -> Result<(), PersistenceError> {
        let mut sorted: Vec<&str> = domains.iter().map(String::as_str).collect();
        sorted.sort_unstable();

        let mut content = sorted.join("\n");
        content.push('\n');

        write_atomic(&self.path, content.as_bytes())?;
        debug!("Wrote {} domains to {}", sorted.len(), self.path.display());
        Ok(())
    }
}

/// JSON file holding every client record, rewritten on each save
///
/// The file is read once, on `load_all` or on the first `save`, and the cached view is
/// written back whole each time a record changes.
#[derive(Debug)]
pub struct JsonClientStore {
    path: PathBuf,
    records: Mutex<Option<BTreeMap<String, ClientRecord>>>,
}

impl JsonClientStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Mutex::new(None),
        }
    }

    fn read_file(&self) -> Result<BTreeMap<String, ClientRecord>, PersistenceError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Client store {} not found, starting empty", self.path.display());
                return Ok(BTreeMap::new());
            }
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let mut parsed: BTreeMap<String, ClientRecord> =
            serde_json::from_slice(&content).map_err(|source| PersistenceError::Format {
                path: self.path.clone(),
                source,
            })?;

        for (id, record) in parsed.iter_mut() {
            record.id = id.clone();
        }
        Ok(parsed)
    }
}

impl ClientRepository for JsonClientStore {
    fn load_all(&self) -> Result<Vec<ClientRecord>, PersistenceError> {
        let parsed = self.read_file()?;
        let records: Vec<ClientRecord> = parsed.values().cloned().collect();
        *self.records.lock() = Some(parsed);

        info!("Loaded {} client records from {}", records.len(), self.path.display());
        Ok(records)
    }

    fn save(&self, record: &ClientRecord) -> Result<(), PersistenceError> {
        let mut guard = self.records.lock();
        // Never loaded: merge into what is on disk instead of clobbering it
        if guard.is_none() {
            *guard = Some(self.read_file()?);
        }
        let records = guard.get_or_insert_with(BTreeMap::new);
        records.insert(record.id.clone(), record.clone());

        let content =
            serde_json::to_vec_pretty(&*records).map_err(|source| PersistenceError::Format {
                path: self.path.clone(),
                source,
            })?;

        write_atomic(&self.path, &content)
    }
}

/// In-memory blocklist storage
#[derive(Debug, Default)]
pub struct MemoryBlocklistRepository {
    domains: Mutex<HashSet<String>>,
}

impl MemoryBlocklistRepository {
    pub fn with_domains<I>(domains: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            domains: Mutex::new(domains.into_iter().collect()),
        }
    }
}

impl BlocklistRepository for MemoryBlocklistRepository {
    fn load(&self) -> Result<HashSet<String>, PersistenceError> {
        Ok(self.domains.lock().clone())
    }

    fn save(&self, domains: &HashSet<String>) -> Result<(), PersistenceError> {
        *self.domains.lock() = domains.clone();
        Ok(())
    }
}

/// In-memory client storage
#[derive(Debug, Default)]
pub struct MemoryClientRepository {
    records: Mutex<BTreeMap<String, ClientRecord>>,
}

impl MemoryClientRepository {
    /// Look up a saved record by id
    pub fn get(&self, id: &str) -> Option<ClientRecord> {
        self.records.lock().get(id).cloned()
    }
}

impl ClientRepository for MemoryClientRepository {
    fn load_all(&self) -> Result<Vec<ClientRecord>, PersistenceError> {
        Ok(self.records.lock().values().cloned().collect())
    }

    fn save(&self, record: &ClientRecord) -> Result<(), PersistenceError> {
        self.records.lock().insert(record.id.clone(), record.clone());
        Ok(())
    }
}

/// Write through a sibling temp file and rename, so readers never see half a file
fn write_atomic(path: &Path, content: &[u8]) -> Result<(), PersistenceError> {
    let io_err = |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, content).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}
