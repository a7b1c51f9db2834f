//! Privacy utilities for log output
//!
//! Email addresses never reach the logs in clear text. The local part is replaced by a
//! salted SHA-256 pseudonym so that repeated requests for the same address can still be
//! correlated without exposing the mailbox.

use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

/// Hex characters kept from the local-part digest
const PSEUDONYM_LEN: usize = 12;

/// Pseudonymises email addresses with a salted hash
#[derive(Clone)]
pub struct EmailRedactor {
    salt: Vec<u8>,
}

impl EmailRedactor {
    /// Create a redactor with a persistent salt
    ///
    /// # Arguments
    /// * `salt` - Secret salt; the same salt yields the same pseudonyms across restarts
    pub fn new(salt: impl Into<Vec<u8>>) -> Self {
        let salt = salt.into();
        debug!("Email redactor initialized with {}-byte salt", salt.len());
        Self { salt }
    }

    /// Create a redactor whose pseudonyms are only stable for this process
    pub fn with_random_salt() -> Self {
        let mut salt = Uuid::new_v4().as_bytes().to_vec();
        salt.extend_from_slice(Uuid::new_v4().as_bytes());
        Self::new(salt)
    }

    /// Hash a local part with the salt
    ///
    /// # Returns
    /// * Hex-encoded SHA-256 digest of salt || local part
    pub fn hash_local_part(&self, local_part: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.salt);
        hasher.update(local_part.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Render an address for logs as `<pseudonym>@<domain>`.
    ///
    /// Input without a single `@` is fully pseudonymised.
    pub fn redact(&self, email: &str) -> String {
        let email = email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !domain.contains('@') => {
                format!("{}@{}", &self.hash_local_part(local)[..PSEUDONYM_LEN], domain)
            }
            _ => self.hash_local_part(email)[..PSEUDONYM_LEN].to_string(),
        }
    }
}

impl std::fmt::Debug for EmailRedactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailRedactor")
            .field("salt", &"<redacted>")
            .finish()
    }
}
