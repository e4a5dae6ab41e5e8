//! Shared store handle with bounded operation time and an explicit lifecycle.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{info, warn};

use super::backend::{CacheStore, MemoryStore};
use super::key::{CacheKey, Namespace};
use crate::clock::SharedClock;
use crate::config::StoreConfig;
use crate::{Error, ErrorContext, Result};

struct Inner {
    store: Arc<dyn CacheStore>,
    op_timeout: Duration,
    open: AtomicBool,
}

/// The one store connection every component shares.
///
/// Opened once at startup and passed to each component; every call is bounded
/// by `op_timeout` and a timeout is reported as [`Error::StoreUnavailable`].
/// After [`close`](Self::close) all operations fail the same way.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Inner>,
}

impl StoreHandle {
    pub fn new(store: Arc<dyn CacheStore>, op_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                op_timeout,
                open: AtomicBool::new(true),
            }),
        }
    }

    /// Build the backend named by the configured URL scheme.
    pub async fn open(config: &StoreConfig, clock: SharedClock) -> Result<Self> {
        let store: Arc<dyn CacheStore> = match config.url.scheme() {
            "memory" => Arc::new(MemoryStore::with_clock(config.max_entries, clock)),
            #[cfg(feature = "redis")]
            "redis" | "rediss" => {
                Arc::new(super::redis_store::RedisStore::connect(config.url.as_str()).await?)
            }
            other => {
                return Err(Error::configuration(
                    format!("unsupported store scheme '{}'", other),
                    ErrorContext::new()
                        .with_field_path("PREP_CACHE_STORE_URL")
                        .with_source("store_handle"),
                ))
            }
        };
        info!(
            backend = store.name(),
            endpoint = %config.redacted_url(),
            op_timeout_ms = config.op_timeout.as_millis() as u64,
            "cache store opened"
        );
        Ok(Self::new(store, config.op_timeout))
    }

    pub async fn close(&self) -> Result<()> {
        if self.inner.open.swap(false, Ordering::SeqCst) {
            info!(backend = self.backend_name(), "cache store closed");
            self.inner.store.close().await?;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.store.name()
    }

    pub fn op_timeout(&self) -> Duration {
        self.inner.op_timeout
    }

    async fn guard<T, F>(&self, op: &'static str, target: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if !self.is_open() {
            return Err(Error::store_unavailable(
                "store handle is closed",
                ErrorContext::new()
                    .with_field_path(target)
                    .with_source("store_handle"),
            ));
        }
        match tokio::time::timeout(self.inner.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    op,
                    key = target,
                    timeout_ms = self.inner.op_timeout.as_millis() as u64,
                    "cache store operation timed out"
                );
                Err(Error::store_unavailable(
                    format!("{} timed out", op),
                    ErrorContext::new()
                        .with_field_path(target)
                        .with_source("store_handle"),
                ))
            }
        }
    }

    pub async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        let target = key.encode();
        self.guard("get", &target, self.inner.store.get(key)).await
    }

    pub async fn set(&self, key: &CacheKey, value: Bytes, ttl: Duration) -> Result<()> {
        let target = key.encode();
        self.guard("set", &target, self.inner.store.set(key, value, ttl))
            .await
    }

    pub async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let target = key.encode();
        self.guard("delete", &target, self.inner.store.delete(key))
            .await
    }

    /// Delete `key` only while it still holds `expected`.
    pub async fn delete_if_eq(&self, key: &CacheKey, expected: &[u8]) -> Result<bool> {
        let target = key.encode();
        self.guard(
            "delete_if_eq",
            &target,
            self.inner.store.delete_if_eq(key, expected),
        )
        .await
    }

    pub async fn exists(&self, key: &CacheKey) -> Result<bool> {
        let target = key.encode();
        self.guard("exists", &target, self.inner.store.exists(key))
            .await
    }

    pub async fn incr(&self, key: &CacheKey, ttl: Duration) -> Result<i64> {
        let target = key.encode();
        self.guard("incr", &target, self.inner.store.incr(key, ttl))
            .await
    }

    pub async fn scan(&self, namespace: Namespace) -> Result<Vec<CacheKey>> {
        self.guard("scan", namespace.as_str(), self.inner.store.scan(namespace))
            .await
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("backend", &self.backend_name())
            .field("op_timeout", &self.inner.op_timeout)
            .field("open", &self.is_open())
            .finish()
    }
}
