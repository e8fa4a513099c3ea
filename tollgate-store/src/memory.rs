//! Process-local in-memory store.
//!
//! Backs tests and single-instance deployments. Expired values are evicted
//! lazily, on the next read that touches them; there is no background
//! reaper task.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::kv::{KeyValueStore, StoreError};

#[derive(Debug, Clone)]
struct StoredValue {
    data: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(data: &str, ttl_secs: Option<u64>) -> Self {
        Self {
            data: data.to_owned(),
            expires_at: ttl_secs.map(|secs| Instant::now() + Duration::from_secs(secs)),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// In-memory [`KeyValueStore`] with lazy TTL eviction.
///
/// Not safe across multiple server instances: state lives and dies with the
/// process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    lists: DashMap<String, Vec<String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn live_value(&self, key: &str) -> Option<String> {
        {
            let entry = self.entries.get(key)?;
            if !entry.is_expired() {
                return Some(entry.data.clone());
            }
        }
        self.entries.remove_if(key, |_, value| value.is_expired());
        None
    }
}

/// Resolves LRANGE-style indices against a list length, returning the
/// inclusive `(start, stop)` bounds or `None` for an empty slice.
fn slice_bounds(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len_i = i64::try_from(len).ok()?;
    if len_i == 0 {
        return None;
    }
    let mut start = if start < 0 { start + len_i } else { start };
    let mut stop = if stop < 0 { stop + len_i } else { stop };
    if start < 0 {
        start = 0;
    }
    if stop >= len_i {
        stop = len_i - 1;
    }
    if start > stop || start >= len_i || stop < 0 {
        return None;
    }
    Some((usize::try_from(start).ok()?, usize::try_from(stop).ok()?))
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .insert(key.to_owned(), StoredValue::new(value, None));
        Ok(())
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        self.entries
            .insert(key.to_owned(), StoredValue::new(value, Some(ttl_secs)));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> Result<bool, StoreError> {
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(StoredValue::new(value, ttl_secs));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredValue::new(value, ttl_secs));
                Ok(true)
            }
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, StoreError> {
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if current.is_expired() {
                    if expected.is_none() {
                        occupied.insert(StoredValue::new(value, None));
                        return Ok(true);
                    }
                    occupied.remove();
                    return Ok(false);
                }
                if expected == Some(current.data.as_str()) {
                    occupied.insert(StoredValue::new(value, None));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                if expected.is_none() {
                    vacant.insert(StoredValue::new(value, None));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let had_value = self.entries.remove(key).is_some();
        let had_list = self.lists.remove(key).is_some();
        Ok(had_value || had_list)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut entry = self
            .entries
            .entry(key.to_owned())
            .or_insert_with(|| StoredValue::new("0", None));
        if entry.is_expired() {
            *entry = StoredValue::new("0", None);
        }
        let current: i64 = entry
            .data
            .parse()
            .map_err(|_| StoreError::NotAnInteger(key.to_owned()))?;
        let next = current + 1;
        entry.data = next.to_string();
        Ok(next)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.live_value(key).is_some() || self.lists.contains_key(key))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|kv| kv.key().starts_with(prefix) && !kv.value().is_expired())
            .map(|kv| kv.key().clone())
            .collect();
        keys.extend(
            self.lists
                .iter()
                .filter(|kv| kv.key().starts_with(prefix))
                .map(|kv| kv.key().clone()),
        );
        Ok(keys)
    }

    async fn push_front(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lists
            .entry(key.to_owned())
            .or_default()
            .insert(0, value.to_owned());
        Ok(())
    }

    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let Some(list) = self.lists.get(key) else {
            return Ok(Vec::new());
        };
        let Some((from, to)) = slice_bounds(list.len(), start, stop) else {
            return Ok(Vec::new());
        };
        Ok(list[from..=to].to_vec())
    }

    async fn trim(&self, key: &str, start: i64, stop: i64) -> Result<(), StoreError> {
        let emptied = {
            let Some(mut list) = self.lists.get_mut(key) else {
                return Ok(());
            };
            match slice_bounds(list.len(), start, stop) {
                Some((from, to)) => {
                    let kept = list[from..=to].to_vec();
                    *list = kept;
                    false
                }
                None => true,
            }
        };
        if emptied {
            self.lists.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_del() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".into()));
        assert!(store.exists("k").await.unwrap());
        assert!(store.del("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.del("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_expiry_evicts_lazily() {
        let store = MemoryStore::new();
        store.set_with_expiry("k", "v", 1).await.unwrap();
        assert!(store.exists("k").await.unwrap());
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_if_absent_claims_once() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("k", "first", None).await.unwrap());
        assert!(!store.set_if_absent("k", "second", None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("first".into()));
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = MemoryStore::new();
        assert!(store.compare_and_swap("k", None, "v1").await.unwrap());
        assert!(!store.compare_and_swap("k", None, "v2").await.unwrap());
        assert!(!store.compare_and_swap("k", Some("stale"), "v2").await.unwrap());
        assert!(store.compare_and_swap("k", Some("v1"), "v2").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("v2".into()));
    }

    #[tokio::test]
    async fn test_incr_from_absent() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("n").await.unwrap(), 1);
        assert_eq!(store.incr("n").await.unwrap(), 2);
        store.set("s", "text").await.unwrap();
        assert!(matches!(
            store.incr("s").await,
            Err(StoreError::NotAnInteger(_))
        ));
    }

    #[tokio::test]
    async fn test_list_push_range_trim() {
        let store = MemoryStore::new();
        store.push_front("log", "a").await.unwrap();
        store.push_front("log", "b").await.unwrap();
        store.push_front("log", "c").await.unwrap();

        // Newest first, like LPUSH.
        assert_eq!(
            store.range("log", 0, -1).await.unwrap(),
            vec!["c", "b", "a"]
        );
        assert_eq!(store.range("log", 0, 1).await.unwrap(), vec!["c", "b"]);
        assert_eq!(store.range("log", -1, -1).await.unwrap(), vec!["a"]);
        assert!(store.range("log", 5, 9).await.unwrap().is_empty());
        assert!(store.range("missing", 0, -1).await.unwrap().is_empty());

        store.trim("log", 0, 0).await.unwrap();
        assert_eq!(store.range("log", 0, -1).await.unwrap(), vec!["c"]);

        store.trim("log", 1, 0).await.unwrap();
        assert!(!store.exists("log").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_with_prefix() {
        let store = MemoryStore::new();
        store.set("escrow:alice", "{}").await.unwrap();
        store.set("escrow:bob", "{}").await.unwrap();
        store.push_front("escrow:alice:payments", "{}").await.unwrap();
        store.set("other", "x").await.unwrap();

        let mut keys = store.keys_with_prefix("escrow:").await.unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec!["escrow:alice", "escrow:alice:payments", "escrow:bob"]
        );
    }
}
