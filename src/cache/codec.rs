//! Payload encoding.
//!
//! Every value is written as a tagged envelope `{"ns": .., "stored_at": .., "data": ..}`.
//! Decoding checks the tag against the key's namespace, so a payload written
//! under one shape is never handed back as another.

use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::key::Namespace;
use crate::{Error, ErrorContext, Result};

/// Placeholders left behind by a serializer that stringified objects instead of
/// encoding them (`[object Object]`, `undefined`, `NaN`), optionally JSON-quoted.
static SENTINEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^"?(\[object [A-Za-z]+\]|undefined|NaN)"?$"#).expect("sentinel pattern")
});

/// Contract tying a payload type to the namespace it lives in.
pub trait CachedValue: Serialize + DeserializeOwned + Send + Sync {
    const NAMESPACE: Namespace;
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    ns: Namespace,
    stored_at: i64,
    data: &'a T,
}

/// Decoded payload together with its envelope metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub ns: Namespace,
    /// Unix seconds at write time.
    pub stored_at: i64,
    pub data: T,
}

/// Why a stored payload is considered corrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    /// Matches a known stringified-object placeholder.
    Sentinel,
    /// Not parseable as JSON at all.
    Unparseable,
}

pub fn encode<T: Serialize>(namespace: Namespace, value: &T, stored_at: i64) -> Result<Bytes> {
    let envelope = EnvelopeRef {
        ns: namespace,
        stored_at,
        data: value,
    };
    Ok(Bytes::from(serde_json::to_vec(&envelope)?))
}

pub fn decode<T: DeserializeOwned>(namespace: Namespace, payload: &[u8]) -> Result<Envelope<T>> {
    if let Some(kind) = detect_corruption(payload) {
        return Err(Error::decode(
            format!("corrupted payload ({:?})", kind),
            ErrorContext::new()
                .with_field_path(namespace.as_str())
                .with_source("codec"),
        ));
    }
    let envelope: Envelope<T> = serde_json::from_slice(payload).map_err(|e| {
        Error::decode(
            "payload does not match the namespace schema",
            ErrorContext::new()
                .with_field_path(namespace.as_str())
                .with_details(e.to_string())
                .with_source("codec"),
        )
    })?;
    if envelope.ns != namespace {
        return Err(Error::decode(
            format!("payload tagged '{}' read from '{}'", envelope.ns, namespace),
            ErrorContext::new()
                .with_field_path(namespace.as_str())
                .with_source("codec"),
        ));
    }
    Ok(envelope)
}

/// Positive identification only: a well-formed JSON value of the wrong shape is
/// not reported here, because it may belong to a newer writer.
pub fn detect_corruption(payload: &[u8]) -> Option<Corruption> {
    let text = match std::str::from_utf8(payload) {
        Ok(text) => text.trim(),
        Err(_) => return Some(Corruption::Unparseable),
    };
    if SENTINEL.is_match(text) {
        return Some(Corruption::Sentinel);
    }
    if serde_json::from_str::<serde::de::IgnoredAny>(text).is_err() {
        return Some(Corruption::Unparseable);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        score: u32,
    }

    #[test]
    fn envelope_roundtrip() {
        let bytes = encode(Namespace::Progress, &Sample { score: 7 }, 1_700_000_000).unwrap();
        let env: Envelope<Sample> = decode(Namespace::Progress, &bytes).unwrap();
        assert_eq!(env.data, Sample { score: 7 });
        assert_eq!(env.stored_at, 1_700_000_000);
        assert_eq!(env.ns, Namespace::Progress);
    }

    #[test]
    fn namespace_mismatch_is_a_decode_failure() {
        let bytes = encode(Namespace::Progress, &Sample { score: 7 }, 0).unwrap();
        let err = decode::<Sample>(Namespace::Dashboard, &bytes).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn legacy_unwrapped_payload_is_a_decode_failure() {
        let raw = serde_json::to_vec(&json!({"score": 7})).unwrap();
        assert!(decode::<Sample>(Namespace::Progress, &raw).is_err());
        // still valid JSON, so it is not positively corrupted
        assert_eq!(detect_corruption(&raw), None);
    }

    #[test]
    fn sentinels_are_detected() {
        for raw in [
            "[object Object]",
            "\"[object Object]\"",
            "[object Array]",
            "undefined",
            " NaN ",
        ] {
            assert_eq!(
                detect_corruption(raw.as_bytes()),
                Some(Corruption::Sentinel),
                "{raw}"
            );
            assert!(decode::<Sample>(Namespace::Session, raw.as_bytes()).is_err());
        }
    }

    #[test]
    fn garbage_is_unparseable() {
        assert_eq!(
            detect_corruption(b"{\"ns\": \"session\""),
            Some(Corruption::Unparseable)
        );
        assert_eq!(detect_corruption(&[0xff, 0xfe]), Some(Corruption::Unparseable));
        assert_eq!(detect_corruption(b"42"), None);
    }
}
