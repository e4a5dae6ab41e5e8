use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use crate::cache::{CacheService, Cached, Namespace, StoreHandle};
use crate::cleanup::{CacheCleanup, CleanupReport};
use crate::clock::SharedClock;
use crate::config::CoreConfig;
use crate::health::{health_check, HealthStatus};
use crate::interceptors::{InterceptorPipeline, MetricsInterceptor, RateLimitInterceptor};
use crate::invalidation::{DomainEvent, InvalidationCoordinator, InvalidationReport};
use crate::metrics::{EndpointAnalytics, MetricRecord, MetricsCollector};
use crate::ratelimit::{RateLimitDecision, RateLimiter, RouteClass};
use crate::{Error, ErrorContext, Result};

/// Caching, invalidation, rate limiting and metrics over one shared store.
pub struct CacheClient {
    pub(crate) config: CoreConfig,
    pub(crate) clock: SharedClock,
    pub(crate) store: StoreHandle,
    pub(crate) cache: Arc<CacheService>,
    pub(crate) invalidation: InvalidationCoordinator,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) metrics: Arc<MetricsCollector>,
    pub(crate) cleanup: CacheCleanup,
}

impl CacheClient {
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Typed cache with per-domain helpers.
    pub fn cache(&self) -> &CacheService {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        namespace: Namespace,
        identifier: &str,
        compute: F,
    ) -> std::result::Result<Cached<T>, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.cache
            .get_or_compute(namespace, identifier, compute)
            .await
    }

    /// [`get_or_compute`](Self::get_or_compute) for fetchers whose error should
    /// surface as [`Error::Compute`].
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        namespace: Namespace,
        identifier: &str,
        fetch: F,
    ) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        E: fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.cache
            .get_or_compute(namespace, identifier, fetch)
            .await
            .map_err(|err| {
                Error::compute(
                    err.to_string(),
                    ErrorContext::new()
                        .with_field_path(format!("{}:{}", namespace, identifier))
                        .with_source("fetcher"),
                )
            })
    }

    pub async fn invalidate(&self, event: &DomainEvent) -> Result<InvalidationReport> {
        self.invalidation.invalidate(event).await
    }

    /// Count the request and decide. Never fails; an unreachable store allows.
    pub async fn check_rate_limit(&self, identifier: &str, route: RouteClass) -> RateLimitDecision {
        self.limiter.check(identifier, route).await
    }

    /// Like [`check_rate_limit`](Self::check_rate_limit) but a denial is an
    /// [`Error::RateLimitExceeded`](crate::Error::RateLimitExceeded).
    pub async fn enforce_rate_limit(
        &self,
        identifier: &str,
        route: RouteClass,
    ) -> Result<RateLimitDecision> {
        self.limiter.enforce(identifier, route).await
    }

    /// Record in the background; the caller never waits on the store.
    pub fn record_metric(&self, record: MetricRecord) {
        drop(self.metrics.spawn_record(record));
    }

    /// Record and wait for the write.
    pub async fn record_metric_now(&self, record: MetricRecord) -> Result<()> {
        self.metrics.record(record).await
    }

    pub async fn get_analytics(
        &self,
        endpoint: &str,
        method: &str,
        days: u32,
    ) -> Result<EndpointAnalytics> {
        self.metrics.endpoint_analytics(endpoint, method, days).await
    }

    pub async fn cleanup_corrupted(&self) -> CleanupReport {
        self.cleanup.cleanup_corrupted().await
    }

    pub async fn cleanup_user(&self, user_id: &str) -> Result<usize> {
        self.cleanup.cleanup_user(user_id).await
    }

    pub async fn health_check(&self) -> HealthStatus {
        health_check(&self.store).await
    }

    /// A request pipeline with rate limiting followed by metrics.
    pub fn pipeline(&self) -> InterceptorPipeline {
        InterceptorPipeline::new(self.clock.clone())
            .with(RateLimitInterceptor::new(Arc::clone(&self.limiter)))
            .with(MetricsInterceptor::new(Arc::clone(&self.metrics)))
    }

    /// Close the shared store. Every component fails over to its degraded
    /// path afterwards.
    pub async fn close(&self) -> Result<()> {
        let stats = self.cache.stats();
        info!(
            hits = stats.hits,
            misses = stats.misses,
            errors = stats.errors,
            decode_failures = stats.decode_failures,
            "cache client shutting down"
        );
        self.store.close().await
    }
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish()
    }
}
