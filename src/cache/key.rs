//! Cache key namespacing and per-namespace TTL policy.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, ErrorContext, Result};

/// Separator between namespace and identifier.
pub const SEPARATOR: char = ':';

/// Closed set of key prefixes. The string forms are reserved: an identifier can
/// never contain [`SEPARATOR`], so two keys in different namespaces never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Namespace {
    Session,
    InterviewState,
    CodingSession,
    Progress,
    Dashboard,
    Profile,
    Feedback,
    RateLimit,
    Metrics,
}

impl Namespace {
    pub const ALL: [Namespace; 9] = [
        Namespace::Session,
        Namespace::InterviewState,
        Namespace::CodingSession,
        Namespace::Progress,
        Namespace::Dashboard,
        Namespace::Profile,
        Namespace::Feedback,
        Namespace::RateLimit,
        Namespace::Metrics,
    ];

    /// Namespaces holding domain payloads (everything except counters and metrics).
    pub const DOMAIN: [Namespace; 7] = [
        Namespace::Session,
        Namespace::InterviewState,
        Namespace::CodingSession,
        Namespace::Progress,
        Namespace::Dashboard,
        Namespace::Profile,
        Namespace::Feedback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Session => "session",
            Namespace::InterviewState => "interview-state",
            Namespace::CodingSession => "coding-session",
            Namespace::Progress => "progress",
            Namespace::Dashboard => "dashboard",
            Namespace::Profile => "profile",
            Namespace::Feedback => "feedback",
            Namespace::RateLimit => "rate-limit",
            Namespace::Metrics => "metrics",
        }
    }

    /// Suffix used by `PREP_CACHE_TTL_<SUFFIX>` overrides.
    pub fn env_suffix(&self) -> &'static str {
        match self {
            Namespace::Session => "SESSION",
            Namespace::InterviewState => "INTERVIEW_STATE",
            Namespace::CodingSession => "CODING_SESSION",
            Namespace::Progress => "PROGRESS",
            Namespace::Dashboard => "DASHBOARD",
            Namespace::Profile => "PROFILE",
            Namespace::Feedback => "FEEDBACK",
            Namespace::RateLimit => "RATE_LIMIT",
            Namespace::Metrics => "METRICS",
        }
    }

    /// Default TTL in seconds.
    ///
    /// Rate-limit counters normally carry their window length instead; the
    /// value here only applies to writes that do not supply one.
    pub fn default_ttl_secs(&self) -> u64 {
        match self {
            Namespace::Session => 86_400,
            Namespace::InterviewState => 7_200,
            Namespace::CodingSession => 14_400,
            Namespace::Progress => 21_600,
            Namespace::Dashboard => 3_600,
            Namespace::Profile => 3_600,
            Namespace::Feedback => 43_200,
            Namespace::RateLimit => 60,
            Namespace::Metrics => 7 * 86_400,
        }
    }

    pub fn is_domain(&self) -> bool {
        !matches!(self, Namespace::RateLimit | Namespace::Metrics)
    }

    /// `"<namespace>:"`, the prefix shared by every key in this namespace.
    pub fn prefix(&self) -> String {
        format!("{}{}", self.as_str(), SEPARATOR)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Namespace::ALL
            .iter()
            .copied()
            .find(|ns| ns.as_str() == s)
            .ok_or_else(|| {
                Error::validation(
                    format!("unknown namespace '{}'", s),
                    ErrorContext::new().with_source("key_codec"),
                )
            })
    }
}

/// A validated `(namespace, identifier)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    namespace: Namespace,
    identifier: String,
}

impl CacheKey {
    pub fn new(namespace: Namespace, identifier: impl Into<String>) -> Result<Self> {
        let identifier = identifier.into();
        validate_identifier(&identifier)?;
        Ok(Self {
            namespace,
            identifier,
        })
    }

    /// Parse `"<namespace>:<identifier>"`.
    pub fn parse(raw: &str) -> Result<Self> {
        let (ns, identifier) = raw.split_once(SEPARATOR).ok_or_else(|| {
            Error::validation(
                "cache key has no namespace separator",
                ErrorContext::new()
                    .with_field_path(raw)
                    .with_source("key_codec"),
            )
        })?;
        let namespace = ns.parse::<Namespace>()?;
        Self::new(namespace, identifier)
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.namespace, SEPARATOR, self.identifier)
    }
}

fn validate_identifier(identifier: &str) -> Result<()> {
    let reject = |why: &str| {
        Err(Error::validation(
            format!("invalid cache identifier: {}", why),
            ErrorContext::new()
                .with_field_path(identifier)
                .with_source("key_codec"),
        ))
    };
    if identifier.is_empty() {
        return reject("empty");
    }
    if identifier.contains(SEPARATOR) {
        return reject("contains the namespace separator");
    }
    if !identifier.bytes().all(|b| b.is_ascii_graphic()) {
        return reject("must be printable ASCII without whitespace");
    }
    Ok(())
}

/// Per-namespace TTLs. Built once at startup and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    ttls: HashMap<Namespace, u64>,
}

impl TtlPolicy {
    pub fn new() -> Self {
        Self {
            ttls: Namespace::ALL
                .iter()
                .map(|ns| (*ns, ns.default_ttl_secs()))
                .collect(),
        }
    }

    /// Override one namespace's TTL. Zero is rejected: every entry must expire.
    pub fn with_override(mut self, namespace: Namespace, ttl_secs: u64) -> Result<Self> {
        if ttl_secs == 0 {
            return Err(Error::configuration(
                "TTL must be greater than zero",
                ErrorContext::new()
                    .with_field_path(format!("PREP_CACHE_TTL_{}", namespace.env_suffix()))
                    .with_source("ttl_policy"),
            ));
        }
        self.ttls.insert(namespace, ttl_secs);
        Ok(self)
    }

    pub fn ttl_secs(&self, namespace: Namespace) -> u64 {
        self.ttls
            .get(&namespace)
            .copied()
            .unwrap_or_else(|| namespace.default_ttl_secs())
    }

    pub fn ttl(&self, namespace: Namespace) -> Duration {
        Duration::from_secs(self.ttl_secs(namespace))
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds and parses namespaced keys and answers TTL lookups.
#[derive(Debug, Clone, Default)]
pub struct KeyCodec {
    policy: TtlPolicy,
}

impl KeyCodec {
    pub fn new(policy: TtlPolicy) -> Self {
        Self { policy }
    }

    pub fn key(&self, namespace: Namespace, identifier: &str) -> Result<CacheKey> {
        CacheKey::new(namespace, identifier)
    }

    pub fn parse(&self, raw: &str) -> Result<CacheKey> {
        CacheKey::parse(raw)
    }

    pub fn ttl(&self, namespace: Namespace) -> Duration {
        self.policy.ttl(namespace)
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    /// Percent-encode untrusted input (IPs, request paths) into a valid identifier.
    ///
    /// Injective, so distinct inputs never share a key.
    pub fn escape(raw: &str) -> Cow<'_, str> {
        let clean = raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'*'));
        if clean && !raw.is_empty() {
            return Cow::Borrowed(raw);
        }
        let encoded: String = url::form_urlencoded::byte_serialize(raw.as_bytes()).collect();
        if encoded.is_empty() {
            // a lone '%' is never produced by encoding a non-empty input
            Cow::Borrowed("%")
        } else {
            Cow::Owned(encoded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display_and_parse() {
        let key = CacheKey::new(Namespace::InterviewState, "sess-9").unwrap();
        assert_eq!(key.to_string(), "interview-state:sess-9");
        let parsed = CacheKey::parse("interview-state:sess-9").unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn identifier_with_separator_is_rejected() {
        let err = CacheKey::new(Namespace::Session, "a:b").unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(CacheKey::parse("session:a:b").is_err());
        assert!(CacheKey::new(Namespace::Session, "").is_err());
        assert!(CacheKey::new(Namespace::Session, "has space").is_err());
    }

    #[test]
    fn unknown_namespace_is_rejected() {
        assert!(CacheKey::parse("users:42").is_err());
        assert!(CacheKey::parse("no-separator").is_err());
    }

    #[test]
    fn namespace_strings_roundtrip() {
        for ns in Namespace::ALL {
            assert_eq!(ns.as_str().parse::<Namespace>().unwrap(), ns);
            assert!(!ns.as_str().contains(SEPARATOR));
        }
    }

    #[test]
    fn default_ttls_follow_table() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.ttl_secs(Namespace::Session), 86_400);
        assert_eq!(policy.ttl_secs(Namespace::InterviewState), 7_200);
        assert_eq!(policy.ttl_secs(Namespace::CodingSession), 14_400);
        assert_eq!(policy.ttl_secs(Namespace::Progress), 21_600);
        assert_eq!(policy.ttl_secs(Namespace::Dashboard), 3_600);
        assert_eq!(policy.ttl_secs(Namespace::Feedback), 43_200);
    }

    #[test]
    fn ttl_override() {
        let policy = TtlPolicy::new()
            .with_override(Namespace::Dashboard, 120)
            .unwrap();
        assert_eq!(policy.ttl(Namespace::Dashboard), Duration::from_secs(120));
        assert!(TtlPolicy::new().with_override(Namespace::Session, 0).is_err());
    }

    #[test]
    fn escape_is_valid_and_injective() {
        assert_eq!(KeyCodec::escape("user-1"), "user-1");
        let v6 = KeyCodec::escape("fe80::1");
        assert!(!v6.contains(SEPARATOR));
        assert!(CacheKey::new(Namespace::RateLimit, v6.as_ref()).is_ok());
        assert_ne!(KeyCodec::escape("a:b"), KeyCodec::escape("a%3Ab"));
        assert_ne!(KeyCodec::escape("/api/x y"), KeyCodec::escape("/api/x+y"));
        assert_eq!(KeyCodec::escape(""), "%");
        assert_ne!(KeyCodec::escape(""), KeyCodec::escape("%"));
    }
}
