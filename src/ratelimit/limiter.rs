use std::time::Duration;

use tracing::{debug, warn};

use super::policy::{RateLimitPolicy, RouteClass};
use crate::cache::{CacheKey, KeyCodec, Namespace, StoreHandle};
use crate::clock::SharedClock;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed {
        /// Requests counted in the current window, this one included.
        count: u32,
        limit: u32,
        remaining: u32,
        reset_after_secs: u64,
    },
    Denied {
        count: u32,
        limit: u32,
        retry_after_secs: u64,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            RateLimitDecision::Denied {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            RateLimitDecision::Allowed { .. } => None,
        }
    }
}

/// Fixed-window request counter.
///
/// - One counter per `(route, window, identifier)`, stored under `rate-limit:`
/// - Counting uses the store's atomic increment; there is no read-then-write
/// - A counter expires with its window, which is the reset
/// - If the store cannot be reached the request is allowed and a warning logged
pub struct RateLimiter {
    store: StoreHandle,
    policy: RateLimitPolicy,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(store: StoreHandle, policy: RateLimitPolicy, clock: SharedClock) -> Self {
        Self {
            store,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn counter_key(
        &self,
        identifier: &str,
        route: RouteClass,
        window_index: i64,
    ) -> Result<CacheKey> {
        CacheKey::new(
            Namespace::RateLimit,
            format!(
                "{}.{}.{}",
                route.as_str(),
                window_index,
                KeyCodec::escape(identifier)
            ),
        )
    }

    /// Count this request and decide whether it may proceed.
    pub async fn check(&self, identifier: &str, route: RouteClass) -> RateLimitDecision {
        let rule = self.policy.rule(route);
        let window_secs = rule.window_secs() as i64;
        let now = self.clock.unix_secs();
        let window_index = now.div_euclid(window_secs);
        let reset_after_secs = (window_secs - now.rem_euclid(window_secs)) as u64;
        let fail_open = RateLimitDecision::Allowed {
            count: 0,
            limit: rule.limit,
            remaining: rule.limit,
            reset_after_secs,
        };

        let key = match self.counter_key(identifier, route, window_index) {
            Ok(key) => key,
            Err(err) => {
                warn!(route = %route, error = %err, "rate limit key rejected, allowing request");
                return fail_open;
            }
        };

        // the counter must outlive the whole window it counts
        let ttl = Duration::from_secs(window_secs as u64);
        let count = match self.store.incr(&key, ttl).await {
            Ok(count) => u32::try_from(count.max(0)).unwrap_or(u32::MAX),
            Err(err) => {
                warn!(route = %route, key = %key, error = %err, "rate limit counter unavailable, allowing request");
                return fail_open;
            }
        };

        if count > rule.limit {
            debug!(route = %route, key = %key, count, limit = rule.limit, "rate limit exceeded");
            RateLimitDecision::Denied {
                count,
                limit: rule.limit,
                retry_after_secs: reset_after_secs,
            }
        } else {
            RateLimitDecision::Allowed {
                count,
                limit: rule.limit,
                remaining: rule.limit - count,
                reset_after_secs,
            }
        }
    }

    /// Like [`check`](Self::check) but a denial becomes [`Error::RateLimitExceeded`].
    pub async fn enforce(&self, identifier: &str, route: RouteClass) -> Result<RateLimitDecision> {
        match self.check(identifier, route).await {
            RateLimitDecision::Denied {
                limit,
                retry_after_secs,
                ..
            } => Err(Error::RateLimitExceeded {
                route: route.as_str().to_string(),
                identifier: identifier.to_string(),
                limit,
                retry_after_secs,
            }),
            allowed => Ok(allowed),
        }
    }
}
