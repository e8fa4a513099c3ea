//! The consumed-signature set that prevents proof replay.
//!
//! Every accepted payment proof consumes its transaction signature here.
//! [`SignatureStore::try_register`] is the primitive the verifier builds its
//! critical section on: registration is atomic, so of any number of
//! concurrent verifications of the same signature, exactly one can win.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::kv::StoreError;

/// The consumed-signature set.
///
/// Entries are retained for a TTL after which the underlying transaction is
/// too old to verify anyway, keeping the set bounded.
#[async_trait]
pub trait SignatureStore: Send + Sync {
    /// Returns `true` if `signature` has been consumed and is still within
    /// its retention window.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn has(&self, signature: &str) -> Result<bool, StoreError>;

    /// Marks `signature` consumed for `ttl_secs` seconds, unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn add(&self, signature: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Atomically marks `signature` consumed, returning `false` if it already
    /// was. At most one concurrent caller observes `true` for a given
    /// signature.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn try_register(&self, signature: &str, ttl_secs: u64) -> Result<bool, StoreError>;

    /// Drops every consumed signature. Maintenance only.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn clear(&self) -> Result<(), StoreError>;
}

/// Process-local [`SignatureStore`] with lazy expiry.
///
/// Not safe across multiple verifier instances: two processes with separate
/// memory stores would each accept the same signature once. Use the Redis
/// implementation as soon as more than one instance verifies proofs.
#[derive(Debug, Default)]
pub struct MemorySignatureStore {
    entries: Mutex<HashMap<String, Instant>>,
}

impl MemorySignatureStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Instant>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Backend("signature store mutex poisoned".into()))
    }
}

#[async_trait]
impl SignatureStore for MemorySignatureStore {
    async fn has(&self, signature: &str) -> Result<bool, StoreError> {
        let mut entries = self.lock()?;
        match entries.get(signature) {
            Some(deadline) if Instant::now() < *deadline => Ok(true),
            Some(_) => {
                entries.remove(signature);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn add(&self, signature: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let deadline = Instant::now() + Duration::from_secs(ttl_secs);
        self.lock()?.insert(signature.to_owned(), deadline);
        Ok(())
    }

    async fn try_register(&self, signature: &str, ttl_secs: u64) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        if let Some(deadline) = entries.get(signature) {
            if now < *deadline {
                return Ok(false);
            }
        }
        entries.insert(signature.to_owned(), now + Duration::from_secs(ttl_secs));
        Ok(true)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.lock()?.clear();
        Ok(())
    }
}
