//! Request pipeline hooks.
//!
//! A [`RequestInterceptor`] sees each request before the handler runs and
//! after its response is final. The pipeline captures the start time before
//! dispatch, so `after` hooks get the full handler latency.
//!
//! - [`RateLimitInterceptor`] rejects in `before` when the route's limit is hit
//! - [`MetricsInterceptor`] emits a [`MetricRecord`] in `after` on a detached
//!   task, so metric writes never delay the response

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::clock::SharedClock;
use crate::metrics::{MetricRecord, MetricsCollector};
use crate::ratelimit::{RateLimiter, RouteClass};
use crate::{Error, Result};

/// Per-request context passed to interceptors.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub endpoint: String,
    pub method: String,
    /// Rate-limit identity: user id when authenticated, client address otherwise.
    pub identifier: String,
    pub user_id: Option<String>,
    pub route: RouteClass,
    cache_hit: Arc<AtomicBool>,
}

impl RequestContext {
    pub fn new(
        endpoint: impl Into<String>,
        method: impl Into<String>,
        identifier: impl Into<String>,
        route: RouteClass,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: method.into().to_ascii_uppercase(),
            identifier: identifier.into(),
            user_id: None,
            route,
            cache_hit: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Called by the handler when its answer came from the cache.
    pub fn mark_cache_hit(&self) {
        self.cache_hit.store(true, Ordering::Relaxed);
    }

    pub fn cache_hit(&self) -> bool {
        self.cache_hit.load(Ordering::Relaxed)
    }
}

/// Outcome passed to `after` and `on_rejected`.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub status_code: u16,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub cache_hit: bool,
}

#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    /// Runs before the handler. An error rejects the request.
    async fn before(&self, _ctx: &RequestContext) -> Result<()> {
        Ok(())
    }

    async fn after(&self, _ctx: &RequestContext, _resp: &ResponseContext) {}

    /// Runs for every interceptor when a `before` hook rejected the request.
    async fn on_rejected(&self, _ctx: &RequestContext, _resp: &ResponseContext, _err: &Error) {
    }
}

/// Runs interceptors, in insertion order, around a handler.
pub struct InterceptorPipeline {
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
    clock: SharedClock,
}

impl InterceptorPipeline {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            interceptors: Vec::new(),
            clock,
        }
    }

    pub fn with<I: RequestInterceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run `handler`, which yields its HTTP status and body.
    ///
    /// Returns the body, or the error a `before` hook rejected with.
    pub async fn execute<T, F, Fut>(&self, ctx: &RequestContext, handler: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = (u16, T)>,
    {
        let started_at = self.clock.now();
        let started = Instant::now();

        for ic in &self.interceptors {
            if let Err(err) = ic.before(ctx).await {
                let resp = ResponseContext {
                    status_code: err.status_code(),
                    started_at,
                    elapsed: started.elapsed(),
                    cache_hit: false,
                };
                for ic in &self.interceptors {
                    ic.on_rejected(ctx, &resp, &err).await;
                }
                return Err(err);
            }
        }

        let (status_code, body) = handler().await;
        let resp = ResponseContext {
            status_code,
            started_at,
            elapsed: started.elapsed(),
            cache_hit: ctx.cache_hit(),
        };
        for ic in &self.interceptors {
            ic.after(ctx, &resp).await;
        }
        Ok(body)
    }
}

pub struct RateLimitInterceptor {
    limiter: Arc<RateLimiter>,
}

impl RateLimitInterceptor {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl RequestInterceptor for RateLimitInterceptor {
    async fn before(&self, ctx: &RequestContext) -> Result<()> {
        self.limiter
            .enforce(&ctx.identifier, ctx.route)
            .await
            .map(|_| ())
    }
}

pub struct MetricsInterceptor {
    collector: Arc<MetricsCollector>,
}

impl MetricsInterceptor {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self { collector }
    }

    fn emit(&self, ctx: &RequestContext, resp: &ResponseContext) {
        let mut record = MetricRecord::new(
            ctx.endpoint.clone(),
            ctx.method.clone(),
            resp.started_at,
            resp.elapsed.as_millis() as u64,
            resp.status_code,
        )
        .with_cache_hit(resp.cache_hit);
        if let Some(user) = &ctx.user_id {
            record = record.with_user(user.clone());
        }
        // detached: the response does not wait for the write
        drop(self.collector.spawn_record(record));
    }
}

#[async_trait]
impl RequestInterceptor for MetricsInterceptor {
    async fn after(&self, ctx: &RequestContext, resp: &ResponseContext) {
        self.emit(ctx, resp);
    }

    async fn on_rejected(&self, ctx: &RequestContext, resp: &ResponseContext, _err: &Error) {
        self.emit(ctx, resp);
    }
}
