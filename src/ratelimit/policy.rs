use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, ErrorContext, Result};

/// Request categories with independent limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// Login, registration, password reset.
    Auth,
    /// Everything else under the API.
    Api,
    /// Starting/answering interview questions.
    Interview,
    /// Running or submitting code.
    CodeSubmission,
}

impl RouteClass {
    pub const ALL: [RouteClass; 4] = [
        RouteClass::Auth,
        RouteClass::Api,
        RouteClass::Interview,
        RouteClass::CodeSubmission,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Auth => "auth",
            RouteClass::Api => "api",
            RouteClass::Interview => "interview",
            RouteClass::CodeSubmission => "code-submission",
        }
    }

    /// Suffix used by `PREP_CACHE_RATE_<SUFFIX>`.
    pub fn env_suffix(&self) -> &'static str {
        match self {
            RouteClass::Auth => "AUTH",
            RouteClass::Api => "API",
            RouteClass::Interview => "INTERVIEW",
            RouteClass::CodeSubmission => "CODE_SUBMISSION",
        }
    }

    pub fn default_rule(&self) -> RateLimitRule {
        match self {
            RouteClass::Auth => RateLimitRule::new(5, Duration::from_secs(15 * 60)),
            RouteClass::Api => RateLimitRule::new(60, Duration::from_secs(60)),
            RouteClass::Interview => RateLimitRule::new(10, Duration::from_secs(60)),
            RouteClass::CodeSubmission => RateLimitRule::new(20, Duration::from_secs(60)),
        }
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        RouteClass::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| {
                Error::validation(
                    format!("unknown route class '{}'", s),
                    ErrorContext::new().with_source("rate_limit_policy"),
                )
            })
    }
}

/// `limit` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitRule {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    pub fn window_secs(&self) -> u64 {
        self.window.as_secs().max(1)
    }

    /// Parse `"<limit>/<window_secs>"`, e.g. `"5/900"`.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |why: &str| {
            Error::configuration(
                format!("invalid rate limit '{}': {}", raw, why),
                ErrorContext::new()
                    .with_details("expected <limit>/<window_secs>")
                    .with_source("rate_limit_policy"),
            )
        };
        let (limit, window) = raw
            .trim()
            .split_once('/')
            .ok_or_else(|| invalid("missing '/'"))?;
        let limit = limit
            .trim()
            .parse::<u32>()
            .map_err(|_| invalid("limit is not an integer"))?;
        let window = window
            .trim()
            .parse::<u64>()
            .map_err(|_| invalid("window is not an integer"))?;
        if limit == 0 {
            return Err(invalid("limit must be positive"));
        }
        if window == 0 {
            return Err(invalid("window must be positive"));
        }
        Ok(Self::new(limit, Duration::from_secs(window)))
    }
}

/// Rule per route class. Immutable after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    rules: HashMap<RouteClass, RateLimitRule>,
}

impl RateLimitPolicy {
    pub fn new() -> Self {
        Self {
            rules: RouteClass::ALL
                .iter()
                .map(|r| (*r, r.default_rule()))
                .collect(),
        }
    }

    pub fn with_rule(mut self, route: RouteClass, rule: RateLimitRule) -> Self {
        self.rules.insert(route, rule);
        self
    }

    pub fn rule(&self, route: RouteClass) -> RateLimitRule {
        self.rules
            .get(&route)
            .copied()
            .unwrap_or_else(|| route.default_rule())
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::new()
    }
}
