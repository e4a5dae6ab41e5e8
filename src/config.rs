//! Startup configuration.
//!
//! Read once from `PREP_CACHE_*` environment variables. Unset variables take
//! their defaults; a variable that is set but malformed is an
//! [`Error::Configuration`], never silently ignored.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::cache::{Namespace, TtlPolicy};
use crate::metrics::MetricsConfig;
use crate::ratelimit::{RateLimitPolicy, RateLimitRule, RouteClass};
use crate::{Error, ErrorContext, Result};

pub const ENV_PREFIX: &str = "PREP_CACHE_";
pub const DEFAULT_STORE_URL: &str = "memory://local";
pub const DEFAULT_OP_TIMEOUT_MS: u64 = 500;
pub const DEFAULT_COALESCE_WAIT_MS: u64 = 2000;
pub const DEFAULT_MEMORY_MAX_ENTRIES: usize = 100_000;

/// Where the store lives and how long a single operation may take.
#[derive(Clone)]
pub struct StoreConfig {
    /// `memory://local`, or `redis://host:port/db` with the `redis` feature.
    pub url: Url,
    pub op_timeout: Duration,
    /// Capacity of the in-process store; ignored by networked backends.
    pub max_entries: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: Url::parse(DEFAULT_STORE_URL).expect("default store URL"),
            op_timeout: Duration::from_millis(DEFAULT_OP_TIMEOUT_MS),
            max_entries: DEFAULT_MEMORY_MAX_ENTRIES,
        }
    }
}

impl StoreConfig {
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            url: parse_url(url, "PREP_CACHE_STORE_URL")?,
            ..Self::default()
        })
    }

    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Embed credentials into the URL.
    pub fn with_credentials(
        mut self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self> {
        let reject = |what: &str| {
            Error::configuration(
                format!("store URL cannot carry a {}", what),
                ErrorContext::new()
                    .with_field_path("PREP_CACHE_STORE_URL")
                    .with_source("store_config"),
            )
        };
        if let Some(user) = username {
            self.url.set_username(user).map_err(|_| reject("username"))?;
        }
        if let Some(pass) = password {
            self.url
                .set_password(Some(pass))
                .map_err(|_| reject("password"))?;
        }
        Ok(self)
    }

    /// The URL with any password masked, for logs.
    pub fn redacted_url(&self) -> String {
        let mut url = self.url.clone();
        if url.password().is_some() {
            let _ = url.set_password(Some("***"));
        }
        url.to_string()
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("url", &self.redacted_url())
            .field("op_timeout", &self.op_timeout)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

/// Everything the components need at startup.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub store: StoreConfig,
    pub ttl: TtlPolicy,
    pub rate_limits: RateLimitPolicy,
    /// Bounded wait for another caller's in-flight computation of the same key.
    /// `None` disables coalescing.
    pub coalesce_wait: Option<Duration>,
    pub metrics: MetricsConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            ttl: TtlPolicy::default(),
            rate_limits: RateLimitPolicy::default(),
            coalesce_wait: Some(Duration::from_millis(DEFAULT_COALESCE_WAIT_MS)),
            metrics: MetricsConfig::default(),
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let name = format!("{}{}", ENV_PREFIX, suffix);
            lookup(&name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (name, v))
        };

        let mut store = match var("STORE_URL") {
            Some((name, raw)) => StoreConfig {
                url: parse_url(&raw, &name)?,
                ..StoreConfig::default()
            },
            None => StoreConfig::default(),
        };
        let username = var("STORE_USERNAME").map(|(_, v)| v);
        let password = var("STORE_PASSWORD").map(|(_, v)| v);
        store = store.with_credentials(username.as_deref(), password.as_deref())?;
        if let Some((name, raw)) = var("OP_TIMEOUT_MS") {
            let ms: u64 = parse_number(&raw, &name)?;
            if ms == 0 {
                return Err(invalid(&name, &raw, "must be positive"));
            }
            store.op_timeout = Duration::from_millis(ms);
        }
        if let Some((name, raw)) = var("MEMORY_MAX_ENTRIES") {
            store.max_entries = parse_number(&raw, &name)?;
        }

        let mut ttl = TtlPolicy::default();
        for namespace in Namespace::ALL {
            if let Some((name, raw)) = var(&format!("TTL_{}", namespace.env_suffix())) {
                let secs = parse_number(&raw, &name)?;
                ttl = ttl
                    .with_override(namespace, secs)
                    .map_err(|_| invalid(&name, &raw, "TTL must be positive"))?;
            }
        }

        let mut rate_limits = RateLimitPolicy::default();
        for route in RouteClass::ALL {
            if let Some((_, raw)) = var(&format!("RATE_{}", route.env_suffix())) {
                rate_limits = rate_limits.with_rule(route, RateLimitRule::parse(&raw)?);
            }
        }

        let coalesce_wait = match var("COALESCE_WAIT_MS") {
            Some((name, raw)) => match parse_number::<u64>(&raw, &name)? {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            None => Some(Duration::from_millis(DEFAULT_COALESCE_WAIT_MS)),
        };

        let mut metrics = MetricsConfig::default();
        if let Some((name, raw)) = var("METRICS_CAPACITY") {
            let capacity: usize = parse_number(&raw, &name)?;
            if capacity == 0 {
                return Err(invalid(&name, &raw, "must be positive"));
            }
            metrics = metrics.with_capacity(capacity);
        }
        if let Some((name, raw)) = var("METRICS_RETENTION_DAYS") {
            let days: u32 = parse_number(&raw, &name)?;
            if days == 0 {
                return Err(invalid(&name, &raw, "must be positive"));
            }
            metrics = metrics.with_retention_days(days);
        }
        if let Some((name, raw)) = var("SLOW_REQUEST_MS") {
            metrics = metrics.with_slow_request_ms(parse_number(&raw, &name)?);
        }

        Ok(Self {
            store,
            ttl,
            rate_limits,
            coalesce_wait,
            metrics,
        })
    }
}

fn invalid(name: &str, raw: &str, why: &str) -> Error {
    Error::configuration(
        format!("invalid value '{}' for {}", raw, name),
        ErrorContext::new()
            .with_field_path(name)
            .with_details(why)
            .with_source("core_config"),
    )
}

fn parse_number<T: FromStr>(raw: &str, name: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| invalid(name, raw, "expected a non-negative integer"))
}

fn parse_url(raw: &str, name: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| invalid(name, raw, &e.to_string()))
}
