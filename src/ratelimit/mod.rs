//! Request rate limiting.
//!
//! Fixed-window counters keyed by `(identifier, route class)`, stored in the
//! same [`StoreHandle`](crate::cache::StoreHandle) as the cache under the
//! `rate-limit:` namespace.
//!
//! | Route class | Default |
//! |-------------|---------|
//! | `auth` | 5 per 15 minutes |
//! | `api` | 60 per minute |
//! | `interview` | 10 per minute |
//! | `code-submission` | 20 per minute |
//!
//! ```rust
//! use prep_cache::cache::{MemoryStore, StoreHandle};
//! use prep_cache::clock::system_clock;
//! use prep_cache::ratelimit::{RateLimitPolicy, RateLimiter, RouteClass};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let store = StoreHandle::new(Arc::new(MemoryStore::new(1024)), Duration::from_millis(500));
//! let limiter = RateLimiter::new(store, RateLimitPolicy::default(), system_clock());
//! let decision = limiter.check("203.0.113.7", RouteClass::Auth).await;
//! assert!(decision.is_allowed());
//! # });
//! ```

mod limiter;
mod policy;

pub use limiter::{RateLimitDecision, RateLimiter};
pub use policy::{RateLimitPolicy, RateLimitRule, RouteClass};
