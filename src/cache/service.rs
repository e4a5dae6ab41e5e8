//! Typed cache service.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::codec::{self, CachedValue};
use super::handle::StoreHandle;
use super::key::{CacheKey, KeyCodec, Namespace};
use super::locks::{KeyedGuard, KeyedLocks};
use super::types::{
    CodingResult, CodingSession, DashboardSnapshot, FeedbackReport, InterviewState, ProfileData,
    ProgressSnapshot, SessionData,
};
use crate::clock::SharedClock;
use crate::Result;

/// Lifetime of a cached execution result. Short on purpose: it only has to
/// absorb duplicate submissions of the same source.
pub const CODING_RESULT_TTL: Duration = Duration::from_secs(300);

/// A value returned by [`CacheService::get_or_compute`].
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    /// `true` when served from the store without running the fetcher.
    pub cache_hit: bool,
}

impl<T> Cached<T> {
    fn hit(value: T) -> Self {
        Self {
            value,
            cache_hit: true,
        }
    }

    fn computed(value: T) -> Self {
        Self {
            value,
            cache_hit: false,
        }
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Store operations that failed or timed out.
    pub errors: u64,
    /// Entries that were present but could not be decoded.
    pub decode_failures: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    decode_failures: AtomicU64,
}

impl AtomicStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
        }
    }
}

/// Read-through cache over a [`StoreHandle`].
///
/// Store failures and undecodable entries are absorbed here and behave as a
/// miss: callers of [`get_or_compute`](Self::get_or_compute) only ever see a
/// value or their own fetcher's error.
///
/// Concurrent misses for one key are coalesced when a coalescing wait is
/// configured: the first caller computes, later callers wait at most that
/// long for it and then compute themselves.
pub struct CacheService {
    store: StoreHandle,
    codec: KeyCodec,
    clock: SharedClock,
    stats: Arc<AtomicStats>,
    inflight: KeyedLocks,
    coalesce_wait: Option<Duration>,
}

impl CacheService {
    pub fn new(
        store: StoreHandle,
        codec: KeyCodec,
        clock: SharedClock,
        coalesce_wait: Option<Duration>,
    ) -> Self {
        Self {
            store,
            codec,
            clock,
            stats: Arc::new(AtomicStats::default()),
            inflight: KeyedLocks::new(),
            coalesce_wait,
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }

    /// Return the cached value for `(namespace, identifier)`, or run `compute`,
    /// store its result with the namespace TTL, and return that.
    ///
    /// A fetcher error is returned unchanged and nothing is stored.
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
        let ttl = self.codec.ttl(namespace);
        self.get_or_compute_with_ttl(namespace, identifier, ttl, compute)
            .await
    }

    /// [`get_or_compute`](Self::get_or_compute) with the namespace taken from
    /// the payload type.
    pub async fn get_or_compute_typed<T, E, F, Fut>(
        &self,
        identifier: &str,
        compute: F,
    ) -> std::result::Result<Cached<T>, E>
    where
        T: CachedValue,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.get_or_compute(T::NAMESPACE, identifier, compute).await
    }

    async fn get_or_compute_with_ttl<T, E, F, Fut>(
        &self,
        namespace: Namespace,
        identifier: &str,
        ttl: Duration,
        compute: F,
    ) -> std::result::Result<Cached<T>, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let key = match self.codec.key(namespace, identifier) {
            Ok(key) => key,
            Err(err) => {
                warn!(
                    namespace = %namespace,
                    error = %err,
                    "uncacheable identifier, computing directly"
                );
                AtomicStats::bump(&self.stats.errors);
                return compute().await.map(Cached::computed);
            }
        };

        if let Some(value) = self.lookup::<T>(&key).await {
            return Ok(Cached::hit(value));
        }

        let guard = match self.coalesce_wait {
            Some(wait) => match self.join_inflight(&key, wait).await {
                Inflight::Leader(guard) => Some(guard),
                Inflight::Finished(guard) => {
                    if let Some(value) = self.lookup::<T>(&key).await {
                        return Ok(Cached::hit(value));
                    }
                    Some(guard)
                }
                Inflight::TimedOut => None,
            },
            None => None,
        };

        let computed = compute().await;
        if let Ok(value) = &computed {
            self.write(&key, value, ttl).await;
        }
        drop(guard);
        computed.map(Cached::computed)
    }

    async fn join_inflight(&self, key: &CacheKey, wait: Duration) -> Inflight<'_> {
        let encoded = key.encode();
        if let Some(guard) = self.inflight.try_lock(&encoded) {
            return Inflight::Leader(guard);
        }
        debug!(key = %key, "waiting for in-flight computation");
        match self.inflight.lock_timeout(&encoded, wait).await {
            Some(guard) => Inflight::Finished(guard),
            None => {
                warn!(
                    key = %key,
                    wait_ms = wait.as_millis() as u64,
                    "in-flight computation still running, computing directly"
                );
                Inflight::TimedOut
            }
        }
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        match self.store.get(key).await {
            Ok(Some(payload)) => match codec::decode::<T>(key.namespace(), &payload) {
                Ok(envelope) => {
                    AtomicStats::bump(&self.stats.hits);
                    debug!(key = %key, "cache hit");
                    Some(envelope.data)
                }
                Err(err) => {
                    AtomicStats::bump(&self.stats.decode_failures);
                    AtomicStats::bump(&self.stats.misses);
                    warn!(key = %key, error = %err, "undecodable cache entry treated as miss");
                    None
                }
            },
            Ok(None) => {
                AtomicStats::bump(&self.stats.misses);
                debug!(key = %key, "cache miss");
                None
            }
            Err(err) => {
                AtomicStats::bump(&self.stats.errors);
                AtomicStats::bump(&self.stats.misses);
                warn!(key = %key, error = %err, "cache read failed, treating as miss");
                None
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) {
        if let Err(err) = self.try_write(key, value, ttl).await {
            warn!(key = %key, error = %err, "cache population failed");
        }
    }

    async fn try_write<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let payload = codec::encode(key.namespace(), value, self.clock.unix_secs())?;
        match self.store.set(key, payload, ttl).await {
            Ok(()) => {
                AtomicStats::bump(&self.stats.sets);
                Ok(())
            }
            Err(err) => {
                AtomicStats::bump(&self.stats.errors);
                Err(err)
            }
        }
    }

    /// Read without computing. Any failure reads as absent.
    pub async fn get<T: CachedValue>(&self, identifier: &str) -> Option<T> {
        let key = self.codec.key(T::NAMESPACE, identifier).ok()?;
        self.lookup(&key).await
    }

    /// Store `value` with its namespace TTL.
    pub async fn set<T: CachedValue>(&self, identifier: &str, value: &T) -> Result<()> {
        self.set_with_ttl(identifier, value, self.codec.ttl(T::NAMESPACE))
            .await
    }

    pub async fn set_with_ttl<T: CachedValue>(
        &self,
        identifier: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let key = self.codec.key(T::NAMESPACE, identifier)?;
        self.try_write(&key, value, ttl).await
    }

    /// Remove one entry. Removing an absent key is not an error.
    pub async fn delete(&self, namespace: Namespace, identifier: &str) -> Result<bool> {
        let key = self.codec.key(namespace, identifier)?;
        self.delete_key(&key).await
    }

    pub async fn delete_key(&self, key: &CacheKey) -> Result<bool> {
        match self.store.delete(key).await {
            Ok(removed) => {
                if removed {
                    AtomicStats::bump(&self.stats.deletes);
                }
                Ok(removed)
            }
            Err(err) => {
                AtomicStats::bump(&self.stats.errors);
                Err(err)
            }
        }
    }

    pub async fn exists(&self, namespace: Namespace, identifier: &str) -> Result<bool> {
        let key = self.codec.key(namespace, identifier)?;
        self.store.exists(&key).await
    }

    pub async fn session<E, F, Fut>(
        &self,
        user_id: &str,
        compute: F,
    ) -> std::result::Result<Cached<SessionData>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<SessionData, E>>,
    {
        self.get_or_compute_typed(user_id, compute).await
    }

    pub async fn interview_state<E, F, Fut>(
        &self,
        session_id: &str,
        compute: F,
    ) -> std::result::Result<Cached<InterviewState>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<InterviewState, E>>,
    {
        self.get_or_compute_typed(session_id, compute).await
    }

    pub async fn coding_session<E, F, Fut>(
        &self,
        session_id: &str,
        compute: F,
    ) -> std::result::Result<Cached<CodingSession>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<CodingSession, E>>,
    {
        self.get_or_compute_typed(session_id, compute).await
    }

    pub async fn progress<E, F, Fut>(
        &self,
        user_id: &str,
        compute: F,
    ) -> std::result::Result<Cached<ProgressSnapshot>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<ProgressSnapshot, E>>,
    {
        self.get_or_compute_typed(user_id, compute).await
    }

    pub async fn dashboard<E, F, Fut>(
        &self,
        user_id: &str,
        compute: F,
    ) -> std::result::Result<Cached<DashboardSnapshot>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<DashboardSnapshot, E>>,
    {
        self.get_or_compute_typed(user_id, compute).await
    }

    pub async fn profile<E, F, Fut>(
        &self,
        user_id: &str,
        compute: F,
    ) -> std::result::Result<Cached<ProfileData>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<ProfileData, E>>,
    {
        self.get_or_compute_typed(user_id, compute).await
    }

    pub async fn feedback<E, F, Fut>(
        &self,
        session_id: &str,
        compute: F,
    ) -> std::result::Result<Cached<FeedbackReport>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<FeedbackReport, E>>,
    {
        self.get_or_compute_typed(session_id, compute).await
    }

    /// Execution result for `(language, source)`, kept for
    /// [`CODING_RESULT_TTL`] so a resubmission of identical code is not run
    /// twice.
    pub async fn coding_result<E, F, Fut>(
        &self,
        language: &str,
        source: &str,
        compute: F,
    ) -> std::result::Result<Cached<CodingResult>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<CodingResult, E>>,
    {
        let identifier = coding_result_id(language, source);
        self.get_or_compute_with_ttl(
            CodingResult::NAMESPACE,
            &identifier,
            CODING_RESULT_TTL,
            compute,
        )
        .await
    }
}

/// Guards release the key when dropped, so a cancelled leader never leaves
/// its entry behind.
enum Inflight<'a> {
    /// No one else is computing; hold this until the result is stored.
    Leader(KeyedGuard<'a>),
    /// The previous computation finished while we waited.
    Finished(KeyedGuard<'a>),
    TimedOut,
}

/// `result.<sha256 hex>` over the language and source text.
pub fn coding_result_id(language: &str, source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(language.trim().to_ascii_lowercase().as_bytes());
    hasher.update([0u8]);
    hasher.update(source.as_bytes());
    let hash: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();
    format!("result.{}", hash)
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("store", &self.store)
            .field("coalesce_wait", &self.coalesce_wait)
            .field("inflight", &self.inflight.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::MemoryStore;
    use crate::cache::key::TtlPolicy;
    use crate::clock::ManualClock;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;

    fn service(clock: &ManualClock, coalesce: Option<Duration>) -> CacheService {
        let store = StoreHandle::new(
            Arc::new(MemoryStore::with_clock(1024, clock.shared())),
            Duration::from_millis(500),
        );
        CacheService::new(store, KeyCodec::new(TtlPolicy::default()), clock.shared(), coalesce)
    }

    fn profile(user: &str) -> ProfileData {
        ProfileData {
            user_id: user.into(),
            display_name: "Ada".into(),
            email: "ada@example.com".into(),
            target_role: Some("backend".into()),
            experience_years: Some(4),
        }
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let clock = ManualClock::at_unix_secs(1_000);
        let svc = service(&clock, None);
        let calls = AtomicUsize::new(0);

        for expected_hit in [false, true] {
            let got = svc
                .profile("u1", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::io::Error>(profile("u1"))
                })
                .await
                .unwrap();
            assert_eq!(got.cache_hit, expected_hit);
            assert_eq!(got.value, profile("u1"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = svc.stats();
        assert_eq!((stats.hits, stats.misses, stats.sets), (1, 1, 1));
        assert_eq!(stats.hit_ratio(), 0.5);
    }

    #[tokio::test]
    async fn entry_expires_with_namespace_ttl() {
        let clock = ManualClock::at_unix_secs(1_000);
        let svc = service(&clock, None);
        svc.set("u1", &profile("u1")).await.unwrap();
        clock.advance(Duration::from_secs(3_599));
        assert!(svc.get::<ProfileData>("u1").await.is_some());
        clock.advance(Duration::from_secs(1));
        assert!(svc.get::<ProfileData>("u1").await.is_none());
    }

    #[tokio::test]
    async fn compute_error_is_returned_unchanged_and_not_cached() {
        let clock = ManualClock::at_unix_secs(0);
        let svc = service(&clock, None);
        let err = svc
            .profile("u1", || async { Err::<ProfileData, _>("db down") })
            .await
            .unwrap_err();
        assert_eq!(err, "db down");
        assert!(!svc.exists(Namespace::Profile, "u1").await.unwrap());
    }

    #[tokio::test]
    async fn undecodable_entry_falls_through_to_compute() {
        let clock = ManualClock::at_unix_secs(0);
        let svc = service(&clock, None);
        let key = CacheKey::new(Namespace::Profile, "u1").unwrap();
        svc.store()
            .set(&key, Bytes::from_static(b"[object Object]"), Duration::from_secs(60))
            .await
            .unwrap();

        let got = svc
            .profile("u1", || async { Ok::<_, ()>(profile("u1")) })
            .await
            .unwrap();
        assert!(!got.cache_hit);
        assert_eq!(svc.stats().decode_failures, 1);
        // the recomputed value replaced the corrupted one
        assert_eq!(svc.get::<ProfileData>("u1").await, Some(profile("u1")));
    }

    #[tokio::test]
    async fn wrong_namespace_tag_is_a_miss() {
        let clock = ManualClock::at_unix_secs(0);
        let svc = service(&clock, None);
        let key = CacheKey::new(Namespace::Profile, "u1").unwrap();
        let foreign = codec::encode(Namespace::Session, &profile("u1"), 0).unwrap();
        svc.store()
            .set(&key, foreign, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(svc.get::<ProfileData>("u1").await.is_none());
    }

    #[tokio::test]
    async fn invalid_identifier_still_computes() {
        let clock = ManualClock::at_unix_secs(0);
        let svc = service(&clock, None);
        let got = svc
            .get_or_compute(Namespace::Dashboard, "a:b", || async { Ok::<_, ()>(7u32) })
            .await
            .unwrap();
        assert_eq!(got, Cached::computed(7));
        assert_eq!(svc.stats().errors, 1);
    }

    #[tokio::test]
    async fn closed_store_degrades_to_compute() {
        let clock = ManualClock::at_unix_secs(0);
        let svc = service(&clock, None);
        svc.store().close().await.unwrap();
        let got = svc
            .profile("u1", || async { Ok::<_, ()>(profile("u1")) })
            .await
            .unwrap();
        assert!(!got.cache_hit);
        assert!(svc.stats().errors >= 2);
        assert!(svc.set("u1", &profile("u1")).await.unwrap_err().is_store_unavailable());
    }

    #[tokio::test]
    async fn coding_result_uses_short_ttl_and_content_hash() {
        let clock = ManualClock::at_unix_secs(0);
        let svc = service(&clock, None);
        let run = || async {
            Ok::<_, ()>(CodingResult {
                passed: 3,
                total: 3,
                stdout: "ok".into(),
                stderr: String::new(),
                runtime_ms: 42,
            })
        };
        assert!(!svc.coding_result("Python", "print(1)", run).await.unwrap().cache_hit);
        assert!(svc.coding_result("python", "print(1)", run).await.unwrap().cache_hit);
        assert!(!svc.coding_result("python", "print(2)", run).await.unwrap().cache_hit);

        clock.advance(CODING_RESULT_TTL);
        assert!(!svc.coding_result("python", "print(1)", run).await.unwrap().cache_hit);
    }

    #[test]
    fn coding_result_id_is_a_valid_identifier() {
        let id = coding_result_id("rust", "fn main() { println!(\"a:b\"); }");
        assert!(CacheKey::new(Namespace::CodingSession, id.as_str()).is_ok());
        assert_eq!(id.len(), "result.".len() + 64);
    }

    #[tokio::test]
    async fn concurrent_misses_compute_once_when_coalescing() {
        let clock = ManualClock::at_unix_secs(0);
        let svc = Arc::new(service(&clock, Some(Duration::from_secs(5))));
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let svc = Arc::clone(&svc);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    svc.get_or_compute(Namespace::Dashboard, "u1", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, ()>(99u64)
                    })
                    .await
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().value, 99);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(svc.inflight.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn coalescing_wait_is_bounded() {
        let clock = ManualClock::at_unix_secs(0);
        let svc = Arc::new(service(&clock, Some(Duration::from_millis(100))));

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let slow = {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move {
                svc.get_or_compute(Namespace::Dashboard, "u1", || async move {
                    let _ = started_tx.send(());
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, ()>(1u64)
                })
                .await
            })
        };
        started_rx.await.unwrap();

        let fast = svc
            .get_or_compute(Namespace::Dashboard, "u1", || async { Ok::<_, ()>(2u64) })
            .await
            .unwrap();
        assert_eq!(fast, Cached::computed(2));
        slow.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_leader_releases_its_key() {
        let clock = ManualClock::at_unix_secs(0);
        let svc = service(&clock, Some(Duration::from_millis(100)));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            svc.get_or_compute(Namespace::Dashboard, "u1", || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, ()>(1u64)
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(svc.inflight.is_empty());

        // the next caller leads immediately instead of waiting out the gate
        let next = svc
            .get_or_compute(Namespace::Dashboard, "u1", || async { Ok::<_, ()>(2u64) })
            .await
            .unwrap();
        assert_eq!(next, Cached::computed(2));
        assert!(svc.inflight.is_empty());
    }

    #[tokio::test]
    async fn without_coalescing_every_miss_computes() {
        let clock = ManualClock::at_unix_secs(0);
        let svc = Arc::new(service(&clock, None));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(tokio::sync::Barrier::new(4));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let svc = Arc::clone(&svc);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    svc.get_or_compute(Namespace::Progress, "u1", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        barrier.wait().await;
                        Ok::<_, ()>(5u8)
                    })
                    .await
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().value, 5);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let clock = ManualClock::at_unix_secs(0);
        let svc = service(&clock, None);
        svc.set("u1", &profile("u1")).await.unwrap();
        assert!(svc.delete(Namespace::Profile, "u1").await.unwrap());
        assert!(!svc.delete(Namespace::Profile, "u1").await.unwrap());
        assert_eq!(svc.stats().deletes, 1);
    }
}
