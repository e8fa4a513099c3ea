//! Redis-backed store implementations.
//!
//! Production backend for both capabilities. Connections go through a
//! [`ConnectionManager`], which multiplexes one connection and reconnects on
//! failure; each operation clones the manager handle, so the stores are
//! cheaply shareable.

use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use crate::kv::{KeyValueStore, StoreError};
use crate::signature::SignatureStore;

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Compare-and-swap over GET/SET, atomic because Redis runs scripts
/// single-threaded. ARGV[1] is "1" when an expected value is supplied,
/// ARGV[2] the expected value, ARGV[3] the replacement.
static CAS_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        local current = redis.call('GET', KEYS[1])
        if ARGV[1] == '1' then
            if current == ARGV[2] then
                redis.call('SET', KEYS[1], ARGV[3])
                return 1
            end
            return 0
        end
        if current then
            return 0
        end
        redis.call('SET', KEYS[1], ARGV[3])
        return 1
        ",
    )
});

/// Durable [`KeyValueStore`] backed by Redis.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connects to Redis at `url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the URL is malformed or the initial
    /// connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Wraps an existing managed connection.
    #[must_use]
    pub const fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Returns a clone of the underlying connection handle, for sharing with
    /// other Redis-backed components.
    #[must_use]
    pub fn manager(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

async fn scan_keys(conn: &mut ConnectionManager, pattern: &str) -> Result<Vec<String>, StoreError> {
    let mut keys = Vec::new();
    let mut cursor: u64 = 0;
    loop {
        let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(100)
            .query_async(conn)
            .await?;
        keys.extend(batch);
        if next == 0 {
            break;
        }
        cursor = next;
    }
    Ok(keys)
}

fn list_index(value: i64) -> Result<isize, StoreError> {
    isize::try_from(value).map_err(|_| StoreError::Backend("list index out of range".into()))
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_secs: Option<u64>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl_secs {
            cmd.arg("EX").arg(ttl);
        }
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let swapped: i64 = CAS_SCRIPT
            .key(key)
            .arg(u8::from(expected.is_some()).to_string())
            .arg(expected.unwrap_or_default())
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1i64).await.map_err(|err| {
            if err.kind() == redis::ErrorKind::TypeError {
                StoreError::NotAnInteger(key.to_owned())
            } else {
                StoreError::from(err)
            }
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let present: bool = conn.exists(key).await?;
        Ok(present)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        scan_keys(&mut conn, &format!("{prefix}*")).await
    }

    async fn push_front(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let items: Vec<String> = conn
            .lrange(key, list_index(start)?, list_index(stop)?)
            .await?;
        Ok(items)
    }

    async fn trim(&self, key: &str, start: i64, stop: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.ltrim::<_, ()>(key, list_index(start)?, list_index(stop)?)
            .await?;
        Ok(())
    }
}

/// Durable [`SignatureStore`] backed by Redis.
///
/// Keys follow the `{prefix}:signatures:{signature}` layout with a TTL, so
/// consumed signatures age out of the set once their retention window ends.
#[derive(Clone)]
pub struct RedisSignatureStore {
    conn: ConnectionManager,
    prefix: String,
}

impl fmt::Debug for RedisSignatureStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisSignatureStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisSignatureStore {
    /// Wraps a managed connection with the given key prefix.
    #[must_use]
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    fn key(&self, signature: &str) -> String {
        format!("{}:signatures:{signature}", self.prefix)
    }
}

#[async_trait]
impl SignatureStore for RedisSignatureStore {
    async fn has(&self, signature: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let present: bool = conn.exists(self.key(signature)).await?;
        Ok(present)
    }

    async fn add(&self, signature: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.key(signature), "1", ttl_secs)
            .await?;
        Ok(())
    }

    async fn try_register(&self, signature: &str, ttl_secs: u64) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(signature))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let keys = scan_keys(&mut conn, &format!("{}:signatures:*", self.prefix)).await?;
        for chunk in keys.chunks(100) {
            conn.del::<_, i64>(chunk).await?;
        }
        Ok(())
    }
}
