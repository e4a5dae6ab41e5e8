//! Maintenance sweeps over stored payloads.
//!
//! [`CacheCleanup::cleanup_corrupted`] walks the domain namespaces and deletes
//! entries that are positively identified as corrupted: a stringified-object
//! placeholder such as `[object Object]`, or bytes that are not JSON at all.
//! Well-formed JSON of an unexpected shape is left alone.

use std::collections::BTreeMap;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::cache::codec::detect_corruption;
use crate::cache::{CacheKey, Corruption, Namespace, StoreHandle};
use crate::{Error, Result};

const DEFAULT_CONCURRENCY: usize = 16;

/// Namespaces cleared by [`CacheCleanup::cleanup_user`].
pub const USER_NAMESPACES: [Namespace; 4] = [
    Namespace::Session,
    Namespace::Progress,
    Namespace::Dashboard,
    Namespace::Profile,
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceSweep {
    pub scanned: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub namespace: Namespace,
    /// Present when a single key failed rather than the whole namespace.
    pub key: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub scanned: usize,
    pub removed: usize,
    pub per_namespace: BTreeMap<Namespace, NamespaceSweep>,
    pub failures: Vec<CleanupFailure>,
}

enum Verdict {
    Healthy,
    Gone,
    Removed(Corruption),
}

pub struct CacheCleanup {
    store: StoreHandle,
    namespaces: Vec<Namespace>,
    concurrency: usize,
}

impl CacheCleanup {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            store,
            namespaces: Namespace::DOMAIN.to_vec(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_namespaces(mut self, namespaces: impl IntoIterator<Item = Namespace>) -> Self {
        self.namespaces = namespaces.into_iter().collect();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Delete corrupted entries. A namespace that fails is recorded in
    /// [`CleanupReport::failures`] and the sweep moves on.
    pub async fn cleanup_corrupted(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        for &namespace in &self.namespaces {
            let keys = match self.store.scan(namespace).await {
                Ok(keys) => keys,
                Err(err) => {
                    warn!(
                        namespace = %namespace,
                        error = %err,
                        "cleanup could not list namespace"
                    );
                    report.failures.push(CleanupFailure {
                        namespace,
                        key: None,
                        error: err.to_string(),
                    });
                    continue;
                }
            };

            let mut sweep = NamespaceSweep {
                scanned: keys.len(),
                removed: 0,
            };
            let verdicts: Vec<(CacheKey, Result<Verdict>)> = futures::stream::iter(keys)
                .map(|key| async move {
                    let verdict = self.inspect(&key).await;
                    (key, verdict)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            for (key, verdict) in verdicts {
                match verdict {
                    Ok(Verdict::Removed(kind)) => {
                        debug!(key = %key, kind = ?kind, "removed corrupted entry");
                        sweep.removed += 1;
                    }
                    Ok(Verdict::Healthy) | Ok(Verdict::Gone) => {}
                    Err(err) => report.failures.push(CleanupFailure {
                        namespace,
                        key: Some(key.encode()),
                        error: err.to_string(),
                    }),
                }
            }

            report.scanned += sweep.scanned;
            report.removed += sweep.removed;
            report.per_namespace.insert(namespace, sweep);
        }

        info!(
            scanned = report.scanned,
            removed = report.removed,
            failures = report.failures.len(),
            "corrupted entry cleanup finished"
        );
        report
    }

    async fn inspect(&self, key: &CacheKey) -> Result<Verdict> {
        let Some(payload) = self.store.get(key).await? else {
            return Ok(Verdict::Gone);
        };
        match detect_corruption(&payload) {
            // a value rewritten since the read is not ours to delete
            Some(kind) if self.store.delete_if_eq(key, &payload).await? => {
                Ok(Verdict::Removed(kind))
            }
            Some(_) => Ok(Verdict::Gone),
            None => Ok(Verdict::Healthy),
        }
    }

    /// Delete the per-user keys of one account. Every key is attempted; if
    /// any delete failed the first error is returned afterwards.
    pub async fn cleanup_user(&self, user_id: &str) -> Result<usize> {
        let keys = USER_NAMESPACES
            .iter()
            .map(|ns| CacheKey::new(*ns, user_id))
            .collect::<Result<Vec<_>>>()?;

        let mut removed = 0;
        let mut first_error: Option<Error> = None;
        for key in &keys {
            match self.store.delete(key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(key = %key, error = %err, "user cleanup delete failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        info!(user_id, removed, "user cache cleared");
        match first_error {
            Some(err) => Err(err),
            None => Ok(removed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{
        codec, CacheService, CacheStore, KeyCodec, MemoryStore, ProfileData, TtlPolicy,
    };
    use crate::clock::system_clock;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    fn store() -> StoreHandle {
        StoreHandle::new(Arc::new(MemoryStore::new(256)), Duration::from_millis(500))
    }

    async fn put(store: &StoreHandle, ns: Namespace, id: &str, payload: Bytes) {
        let key = CacheKey::new(ns, id).unwrap();
        store.set(&key, payload, Duration::from_secs(600)).await.unwrap();
    }

    async fn exists(store: &StoreHandle, ns: Namespace, id: &str) -> bool {
        store.exists(&CacheKey::new(ns, id).unwrap()).await.unwrap()
    }

    fn valid_profile() -> Bytes {
        codec::encode(
            Namespace::Profile,
            &ProfileData {
                user_id: "u1".into(),
                display_name: "Grace".into(),
                email: "grace@example.com".into(),
                target_role: None,
                experience_years: None,
            },
            0,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn removes_only_the_sentinel_entry() {
        let store = store();
        put(&store, Namespace::Profile, "u1", valid_profile()).await;
        let sentinel = Bytes::from_static(b"\"[object Object]\"");
        put(&store, Namespace::Profile, "u2", sentinel).await;

        let report = CacheCleanup::new(store.clone()).cleanup_corrupted().await;
        assert_eq!(report.removed, 1);
        assert_eq!(report.scanned, 2);
        assert_eq!(
            report.per_namespace[&Namespace::Profile],
            NamespaceSweep {
                scanned: 2,
                removed: 1
            }
        );
        assert!(report.failures.is_empty());
        assert!(exists(&store, Namespace::Profile, "u1").await);
        assert!(!exists(&store, Namespace::Profile, "u2").await);
    }

    /// Memory store whose conditional deletes take a while to land.
    struct SlowDeletes {
        inner: MemoryStore,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl CacheStore for SlowDeletes {
        async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &CacheKey, value: Bytes, ttl: Duration) -> Result<()> {
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &CacheKey) -> Result<bool> {
            tokio::time::sleep(self.delay).await;
            self.inner.delete(key).await
        }
        async fn delete_if_eq(&self, key: &CacheKey, expected: &[u8]) -> Result<bool> {
            tokio::time::sleep(self.delay).await;
            self.inner.delete_if_eq(key, expected).await
        }
        async fn exists(&self, key: &CacheKey) -> Result<bool> {
            self.inner.exists(key).await
        }
        async fn incr(&self, key: &CacheKey, ttl: Duration) -> Result<i64> {
            self.inner.incr(key, ttl).await
        }
        async fn scan(&self, namespace: Namespace) -> Result<Vec<CacheKey>> {
            self.inner.scan(namespace).await
        }
        fn name(&self) -> &'static str {
            "slow-deletes"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn value_rewritten_during_sweep_survives() {
        let slow = SlowDeletes {
            inner: MemoryStore::new(256),
            delay: Duration::from_millis(20),
        };
        let store = StoreHandle::new(Arc::new(slow), Duration::from_secs(5));
        let sentinel = Bytes::from_static(b"\"[object Object]\"");
        put(&store, Namespace::Dashboard, "u1", sentinel).await;

        let service = CacheService::new(
            store.clone(),
            KeyCodec::new(TtlPolicy::default()),
            system_clock(),
            None,
        );
        let cleanup = CacheCleanup::new(store.clone()).with_namespaces([Namespace::Dashboard]);
        let (report, recomputed) = tokio::join!(cleanup.cleanup_corrupted(), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            service
                .get_or_compute(Namespace::Dashboard, "u1", || async { Ok::<_, ()>(7u32) })
                .await
        });
        assert_eq!(recomputed.unwrap().value, 7);
        assert_eq!(report.removed, 0);
        assert!(report.failures.is_empty());

        let cached = service
            .get_or_compute(Namespace::Dashboard, "u1", || async { Ok::<_, ()>(0u32) })
            .await
            .unwrap();
        assert!(cached.cache_hit);
        assert_eq!(cached.value, 7);
    }

    #[tokio::test]
    async fn unknown_but_valid_json_is_kept() {
        let store = store();
        let newer_shape = Bytes::from_static(br#"{"v":2,"tiles":[]}"#);
        put(&store, Namespace::Dashboard, "u1", newer_shape).await;
        put(&store, Namespace::Dashboard, "u2", Bytes::from_static(b"not json {")).await;
        put(&store, Namespace::Session, "u3", Bytes::from_static(b"undefined")).await;

        let report = CacheCleanup::new(store.clone()).cleanup_corrupted().await;
        assert_eq!(report.removed, 2);
        assert!(exists(&store, Namespace::Dashboard, "u1").await);
    }

    #[tokio::test]
    async fn operational_namespaces_are_not_swept_by_default() {
        let store = store();
        put(&store, Namespace::RateLimit, "api.1.x", Bytes::from_static(b"3")).await;
        put(&store, Namespace::Metrics, "junk", Bytes::from_static(b"NaN")).await;
        let report = CacheCleanup::new(store.clone()).cleanup_corrupted().await;
        assert_eq!(report.removed, 0);
        assert!(!report.per_namespace.contains_key(&Namespace::Metrics));

        let report = CacheCleanup::new(store)
            .with_namespaces([Namespace::Metrics])
            .cleanup_corrupted()
            .await;
        assert_eq!(report.removed, 1);
    }

    #[tokio::test]
    async fn unavailable_store_is_reported_per_namespace() {
        let store = store();
        store.close().await.unwrap();
        let report = CacheCleanup::new(store).cleanup_corrupted().await;
        assert_eq!(report.failures.len(), Namespace::DOMAIN.len());
        assert_eq!(report.removed, 0);
    }

    #[tokio::test]
    async fn cleanup_user_removes_account_keys() {
        let store = store();
        for ns in USER_NAMESPACES {
            put(&store, ns, "u1", valid_profile()).await;
        }
        put(&store, Namespace::Profile, "u2", valid_profile()).await;

        let cleanup = CacheCleanup::new(store.clone());
        assert_eq!(cleanup.cleanup_user("u1").await.unwrap(), 4);
        assert_eq!(cleanup.cleanup_user("u1").await.unwrap(), 0);
        assert!(exists(&store, Namespace::Profile, "u2").await);
    }
}
