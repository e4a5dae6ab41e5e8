//! Cache backend implementations.

use super::key::{CacheKey, Namespace};
use crate::clock::{system_clock, SharedClock};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Minimal key-value contract every backend provides.
///
/// Failures are reported as [`Error::StoreUnavailable`]; callers decide whether
/// that becomes a miss. Expiry is the backend's job: an expired key must read
/// as absent.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>>;
    async fn set(&self, key: &CacheKey, value: Bytes, ttl: Duration) -> Result<()>;
    /// Returns whether a live entry was removed. Absent keys are not an error.
    async fn delete(&self, key: &CacheKey) -> Result<bool>;
    /// Delete only if the live value still equals `expected`, as one atomic
    /// step. Returns whether it was removed.
    async fn delete_if_eq(&self, key: &CacheKey, expected: &[u8]) -> Result<bool>;
    async fn exists(&self, key: &CacheKey) -> Result<bool>;
    /// Atomically increment an integer counter and return the new value.
    /// `ttl` is applied when the counter is created.
    async fn incr(&self, key: &CacheKey, ttl: Duration) -> Result<i64>;
    /// Live keys in one namespace. Keys that do not parse are skipped.
    async fn scan(&self, namespace: Namespace) -> Result<Vec<CacheKey>>;
    async fn close(&self) -> Result<()> {
        Ok(())
    }
    fn name(&self) -> &'static str;
}

#[derive(Clone)]
struct CacheEntry {
    data: Bytes,
    expires_at_ms: i64,
    last_accessed_ms: i64,
}

impl CacheEntry {
    fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// In-process store with TTL expiry driven by an injectable clock.
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    max_entries: usize,
    clock: SharedClock,
}

impl MemoryStore {
    pub fn new(max_entries: usize) -> Self {
        Self::with_clock(max_entries, system_clock())
    }

    pub fn with_clock(max_entries: usize, clock: SharedClock) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_entries: max_entries.max(1),
            clock,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, CacheEntry>>> {
        self.entries.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, CacheEntry>>> {
        self.entries.write().map_err(|_| poisoned())
    }

    fn expiry(&self, now_ms: i64, ttl: Duration) -> i64 {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_add(ttl_ms)
    }

    fn evict_if_needed(&self, entries: &mut HashMap<String, CacheEntry>, now_ms: i64) {
        entries.retain(|_, e| !e.is_expired(now_ms));
        while entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed_ms)
                .map(|(k, _)| k.clone());
            if let Some(k) = oldest {
                entries.remove(&k);
            } else {
                break;
            }
        }
    }
}

fn poisoned() -> Error {
    Error::store_unavailable(
        "memory store lock poisoned",
        ErrorContext::new().with_source("memory_store"),
    )
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        let now = self.clock.unix_millis();
        let encoded = key.encode();
        let mut entries = self.write()?;
        if let Some(entry) = entries.get_mut(&encoded) {
            if entry.is_expired(now) {
                entries.remove(&encoded);
                return Ok(None);
            }
            entry.last_accessed_ms = now;
            return Ok(Some(entry.data.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &CacheKey, value: Bytes, ttl: Duration) -> Result<()> {
        let now = self.clock.unix_millis();
        let encoded = key.encode();
        let mut entries = self.write()?;
        if !entries.contains_key(&encoded) {
            self.evict_if_needed(&mut entries, now);
        }
        entries.insert(
            encoded,
            CacheEntry {
                data: value,
                expires_at_ms: self.expiry(now, ttl),
                last_accessed_ms: now,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let now = self.clock.unix_millis();
        Ok(self
            .write()?
            .remove(&key.encode())
            .map(|e| !e.is_expired(now))
            .unwrap_or(false))
    }

    async fn delete_if_eq(&self, key: &CacheKey, expected: &[u8]) -> Result<bool> {
        let now = self.clock.unix_millis();
        let encoded = key.encode();
        let mut entries = self.write()?;
        match entries.get(&encoded) {
            Some(entry) if !entry.is_expired(now) && entry.data.as_ref() == expected => {
                entries.remove(&encoded);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn exists(&self, key: &CacheKey) -> Result<bool> {
        let now = self.clock.unix_millis();
        Ok(self
            .read()?
            .get(&key.encode())
            .map(|e| !e.is_expired(now))
            .unwrap_or(false))
    }

    async fn incr(&self, key: &CacheKey, ttl: Duration) -> Result<i64> {
        let now = self.clock.unix_millis();
        let encoded = key.encode();
        let mut entries = self.write()?;
        let existing = match entries.get(&encoded) {
            Some(entry) if !entry.is_expired(now) => {
                Some((parse_counter(key, &entry.data)?, entry.expires_at_ms))
            }
            _ => None,
        };
        let (next, expires_at_ms) = match existing {
            Some((value, expires_at_ms)) => (value.saturating_add(1), expires_at_ms),
            None => {
                if !entries.contains_key(&encoded) {
                    self.evict_if_needed(&mut entries, now);
                }
                (1, self.expiry(now, ttl))
            }
        };
        entries.insert(
            encoded,
            CacheEntry {
                data: Bytes::from(next.to_string()),
                expires_at_ms,
                last_accessed_ms: now,
            },
        );
        Ok(next)
    }

    async fn scan(&self, namespace: Namespace) -> Result<Vec<CacheKey>> {
        let now = self.clock.unix_millis();
        let prefix = namespace.prefix();
        let entries = self.read()?;
        let mut keys: Vec<CacheKey> = entries
            .iter()
            .filter(|(k, e)| k.starts_with(&prefix) && !e.is_expired(now))
            .filter_map(|(k, _)| CacheKey::parse(k).ok())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn close(&self) -> Result<()> {
        self.write()?.clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

fn parse_counter(key: &CacheKey, data: &[u8]) -> Result<i64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| {
            Error::decode(
                "counter holds a non-integer value",
                ErrorContext::new()
                    .with_field_path(key.encode())
                    .with_source("memory_store"),
            )
        })
}

/// Store that holds nothing: every read misses and counters never advance past 1.
pub struct NullStore;
impl NullStore {
    pub fn new() -> Self {
        Self
    }
}
impl Default for NullStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for NullStore {
    async fn get(&self, _: &CacheKey) -> Result<Option<Bytes>> {
        Ok(None)
    }
    async fn set(&self, _: &CacheKey, _: Bytes, _: Duration) -> Result<()> {
        Ok(())
    }
    async fn delete(&self, _: &CacheKey) -> Result<bool> {
        Ok(false)
    }
    async fn delete_if_eq(&self, _: &CacheKey, _: &[u8]) -> Result<bool> {
        Ok(false)
    }
    async fn exists(&self, _: &CacheKey) -> Result<bool> {
        Ok(false)
    }
    async fn incr(&self, _: &CacheKey, _: Duration) -> Result<i64> {
        Ok(1)
    }
    async fn scan(&self, _: Namespace) -> Result<Vec<CacheKey>> {
        Ok(Vec::new())
    }
    fn name(&self) -> &'static str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn key(ns: Namespace, id: &str) -> CacheKey {
        CacheKey::new(ns, id).unwrap()
    }

    #[tokio::test]
    async fn set_get_roundtrip() {
        let store = MemoryStore::new(16);
        let k = key(Namespace::Session, "u1");
        store
            .set(&k, Bytes::from_static(b"hello"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get(&k).await.unwrap(), Some(Bytes::from_static(b"hello")));
        assert!(store.exists(&k).await.unwrap());
    }

    #[tokio::test]
    async fn entries_expire_with_clock() {
        let clock = ManualClock::at_unix_secs(1_000);
        let store = MemoryStore::with_clock(16, clock.shared());
        let k = key(Namespace::Dashboard, "u1");
        store
            .set(&k, Bytes::from_static(b"v"), Duration::from_secs(3600))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(3599));
        assert!(store.get(&k).await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert!(store.get(&k).await.unwrap().is_none());
        assert!(!store.exists(&k).await.unwrap());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new(16);
        let k = key(Namespace::Profile, "u1");
        store
            .set(&k, Bytes::from_static(b"v"), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(store.delete(&k).await.unwrap());
        assert!(!store.delete(&k).await.unwrap());
    }

    #[tokio::test]
    async fn incr_counts_and_resets_after_ttl() {
        let clock = ManualClock::at_unix_secs(0);
        let store = MemoryStore::with_clock(16, clock.shared());
        let k = key(Namespace::RateLimit, "api.0.ip");
        for expected in 1..=3 {
            assert_eq!(store.incr(&k, Duration::from_secs(60)).await.unwrap(), expected);
        }
        // later increments keep the original expiry
        clock.advance(Duration::from_secs(30));
        assert_eq!(store.incr(&k, Duration::from_secs(60)).await.unwrap(), 4);
        clock.advance(Duration::from_secs(30));
        assert_eq!(store.incr(&k, Duration::from_secs(60)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn incr_on_non_counter_fails() {
        let store = MemoryStore::new(16);
        let k = key(Namespace::RateLimit, "x");
        store
            .set(&k, Bytes::from_static(b"not-a-number"), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(store.incr(&k, Duration::from_secs(60)).await.is_err());
    }

    #[tokio::test]
    async fn scan_lists_live_keys_in_namespace() {
        let clock = ManualClock::at_unix_secs(0);
        let store = MemoryStore::with_clock(16, clock.shared());
        let ttl = Duration::from_secs(10);
        store.set(&key(Namespace::Progress, "a"), Bytes::new(), ttl).await.unwrap();
        store.set(&key(Namespace::Progress, "b"), Bytes::new(), Duration::from_secs(1)).await.unwrap();
        store.set(&key(Namespace::Profile, "a"), Bytes::new(), ttl).await.unwrap();
        clock.advance(Duration::from_secs(2));

        let keys = store.scan(Namespace::Progress).await.unwrap();
        assert_eq!(keys, vec![key(Namespace::Progress, "a")]);
    }

    #[tokio::test]
    async fn eviction_respects_capacity() {
        let store = MemoryStore::new(2);
        let ttl = Duration::from_secs(60);
        for id in ["a", "b", "c"] {
            store.set(&key(Namespace::Session, id), Bytes::new(), ttl).await.unwrap();
        }
        assert_eq!(store.scan(Namespace::Session).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_if_eq_only_removes_the_expected_value() {
        let clock = ManualClock::at_unix_secs(0);
        let store = MemoryStore::with_clock(16, clock.shared());
        let k = key(Namespace::Dashboard, "u1");
        store
            .set(&k, Bytes::from_static(b"new"), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(!store.delete_if_eq(&k, b"old").await.unwrap());
        assert!(store.exists(&k).await.unwrap());
        assert!(store.delete_if_eq(&k, b"new").await.unwrap());
        assert!(!store.delete_if_eq(&k, b"new").await.unwrap());

        store
            .set(&k, Bytes::from_static(b"new"), Duration::from_secs(1))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(1));
        assert!(!store.delete_if_eq(&k, b"new").await.unwrap());
    }

    #[tokio::test]
    async fn null_store_never_holds() {
        let store = NullStore::new();
        let k = key(Namespace::Session, "u1");
        store.set(&k, Bytes::from_static(b"v"), Duration::from_secs(1)).await.unwrap();
        assert!(store.get(&k).await.unwrap().is_none());
        assert_eq!(store.incr(&k, Duration::from_secs(1)).await.unwrap(), 1);
        assert_eq!(store.name(), "null");
    }
}
