//! Key-value store backends: Redis in production, an in-process map when
//! Redis is unreachable. In the degraded mode TTLs and atomic increments
//! are best-effort and process-local.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dipwatch_core::{DipwatchError, KvStore};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

fn store_err(e: redis::RedisError) -> DipwatchError {
    DipwatchError::StoreUnavailable(e.to_string())
}

/// Redis-backed KV store.
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
}

impl RedisKv {
    pub async fn connect(url: &str) -> Result<Self, DipwatchError> {
        let client = redis::Client::open(url).map_err(store_err)?;
        let conn = ConnectionManager::new(client).await.map_err(store_err)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>, DipwatchError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(store_err)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DipwatchError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await.map_err(store_err)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), DipwatchError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds)
            .await
            .map_err(store_err)
    }

    async fn delete(&self, key: &str) -> Result<(), DipwatchError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(store_err)
    }

    async fn incr(&self, key: &str) -> Result<i64, DipwatchError> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1).await.map_err(store_err)
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<(), DipwatchError> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(key, ttl_seconds as i64)
            .await
            .map_err(store_err)
    }

    async fn incr_pair_with_ttl(
        &self,
        first_key: &str,
        second_key: &str,
        ttl_seconds: u64,
    ) -> Result<(i64, i64), DipwatchError> {
        let mut conn = self.conn.clone();
        let (first, second): (i64, i64) = redis::pipe()
            .atomic()
            .incr(first_key, 1)
            .expire(first_key, ttl_seconds as i64)
            .ignore()
            .incr(second_key, 1)
            .expire(second_key, ttl_seconds as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;

        Ok((first, second))
    }
}

struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process KV fallback. Expiry is evaluated lazily on access.
#[derive(Default)]
pub struct MemoryKv {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn incr_entry(&self, key: &str, ttl: Option<Duration>) -> i64 {
        let mut entry = self.entries.entry(key.to_string()).or_insert(MemoryEntry {
            value: "0".to_string(),
            expires_at: None,
        });

        if entry.expired() {
            entry.value = "0".to_string();
            entry.expires_at = None;
        }

        let next = entry.value.parse::<i64>().unwrap_or(0) + 1;
        entry.value = next.to_string();
        if let Some(ttl) = ttl {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        next
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, DipwatchError> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expired() {
                drop(entry);
                self.entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DipwatchError> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), DipwatchError> {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_seconds)),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DipwatchError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, DipwatchError> {
        Ok(self.incr_entry(key, None))
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<(), DipwatchError> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_seconds));
        }
        Ok(())
    }

    async fn incr_pair_with_ttl(
        &self,
        first_key: &str,
        second_key: &str,
        ttl_seconds: u64,
    ) -> Result<(i64, i64), DipwatchError> {
        let ttl = Duration::from_secs(ttl_seconds);
        let first = self.incr_entry(first_key, Some(ttl));
        let second = self.incr_entry(second_key, Some(ttl));
        Ok((first, second))
    }
}
