use std::sync::Arc;

use crate::cache::{CacheService, CacheStore, KeyCodec, StoreHandle};
use crate::cleanup::CacheCleanup;
use crate::client::core::CacheClient;
use crate::clock::{system_clock, SharedClock};
use crate::config::CoreConfig;
use crate::invalidation::InvalidationCoordinator;
use crate::metrics::MetricsCollector;
use crate::ratelimit::RateLimiter;
use crate::Result;

/// Builder for [`CacheClient`].
///
/// Without an explicit store the backend is chosen by `config.store.url`.
pub struct CacheClientBuilder {
    config: CoreConfig,
    store: Option<Arc<dyn CacheStore>>,
    clock: Option<SharedClock>,
}

impl CacheClientBuilder {
    pub fn new() -> Self {
        Self {
            config: CoreConfig::default(),
            store: None,
            clock: None,
        }
    }

    /// Start from `PREP_CACHE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new().config(CoreConfig::from_env()?))
    }

    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this backend instead of opening one from the configured URL.
    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Inject a clock (tests use [`ManualClock`](crate::clock::ManualClock)).
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub async fn build(self) -> Result<CacheClient> {
        let config = self.config;
        let clock = self.clock.unwrap_or_else(system_clock);
        let store = match self.store {
            Some(backend) => StoreHandle::new(backend, config.store.op_timeout),
            None => StoreHandle::open(&config.store, clock.clone()).await?,
        };

        let cache = Arc::new(CacheService::new(
            store.clone(),
            KeyCodec::new(config.ttl.clone()),
            clock.clone(),
            config.coalesce_wait,
        ));
        let limiter = Arc::new(RateLimiter::new(
            store.clone(),
            config.rate_limits.clone(),
            clock.clone(),
        ));
        let metrics = Arc::new(MetricsCollector::new(
            store.clone(),
            config.metrics.clone(),
            clock.clone(),
        ));

        Ok(CacheClient {
            invalidation: InvalidationCoordinator::new(store.clone()),
            cleanup: CacheCleanup::new(store.clone()),
            config,
            clock,
            store,
            cache,
            limiter,
            metrics,
        })
    }
}

impl Default for CacheClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryStore, Namespace};
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn builds_on_configured_memory_store() {
        let client = CacheClientBuilder::new().build().await.unwrap();
        assert_eq!(client.store().backend_name(), "memory");
        assert!(client.health_check().await.healthy);
        client.close().await.unwrap();
        assert!(!client.health_check().await.healthy);
    }

    #[tokio::test]
    async fn explicit_store_and_clock_are_used() {
        let clock = ManualClock::at_unix_secs(0);
        let client = CacheClientBuilder::new()
            .store(Arc::new(MemoryStore::with_clock(64, clock.shared())))
            .clock(clock.shared())
            .build()
            .await
            .unwrap();
        client
            .get_or_compute(Namespace::Progress, "u1", || async { Ok::<_, ()>(1u8) })
            .await
            .unwrap();
        clock.advance(std::time::Duration::from_secs(21_600));
        let again = client
            .get_or_compute(Namespace::Progress, "u1", || async { Ok::<_, ()>(2u8) })
            .await
            .unwrap();
        assert!(!again.cache_hit);
        assert_eq!(again.value, 2);
    }
}
