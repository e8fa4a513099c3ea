//! The key-value storage capability.
//!
//! Modeled on the subset of Redis the engine actually uses. A key holds
//! either a string value or a list, never both; TTLs apply to string values.
//! The two check-and-set primitives ([`KeyValueStore::set_if_absent`] and
//! [`KeyValueStore::compare_and_swap`]) are the building blocks for the
//! engine's critical sections: pending-settlement markers and optimistic
//! updates of escrow records.

use async_trait::async_trait;

/// Key-value operations the engine depends on.
///
/// Implementations must be safe to share across tasks (`Arc<dyn
/// KeyValueStore>`). List operations follow Redis `LPUSH`/`LRANGE`/`LTRIM`
/// semantics: `push_front` prepends, range indices may be negative to count
/// from the end, and `stop` is inclusive.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads the value at `key`, or `None` if absent or expired.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes `value` at `key` with no expiry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Writes `value` at `key`, expiring after `ttl_secs` seconds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn set_with_expiry(&self, key: &str, value: &str, ttl_secs: u64)
    -> Result<(), StoreError>;

    /// Writes `value` at `key` only if the key is absent (or expired).
    ///
    /// Returns `true` if this call claimed the key. The check and the write
    /// are atomic with respect to concurrent callers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> Result<bool, StoreError>;

    /// Replaces the value at `key` with `value` only if the current value
    /// equals `expected` (`None` meaning the key must be absent).
    ///
    /// Returns `true` if the swap happened. The written value carries no
    /// expiry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, StoreError>;

    /// Deletes `key` (value or list). Returns `true` if something was
    /// deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomically increments the integer at `key`, treating an absent key as
    /// zero. Returns the new value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotAnInteger`] if the stored value is not an
    /// integer, or [`StoreError::Backend`] if the backend fails.
    async fn incr(&self, key: &str) -> Result<i64, StoreError>;

    /// Returns `true` if `key` holds a live value or list.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Returns all live keys starting with `prefix`.
    ///
    /// Intended for maintenance and sweep scans, not hot paths.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Prepends `value` to the list at `key`, creating the list if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn push_front(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Reads the list slice `[start..=stop]`. Negative indices count from the
    /// end (`-1` is the last element). An absent key yields an empty vec.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError>;

    /// Trims the list at `key` to the slice `[start..=stop]`, deleting the
    /// key entirely when the slice is empty.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn trim(&self, key: &str, start: i64, stop: i64) -> Result<(), StoreError>;
}

/// Errors from a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend failed or returned an unusable response.
    #[error("store backend error: {0}")]
    Backend(String),

    /// An increment was attempted on a non-integer value.
    #[error("stored value at {0:?} is not an integer")]
    NotAnInteger(String),
}
