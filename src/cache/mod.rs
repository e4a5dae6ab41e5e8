//! Namespaced TTL cache in front of the source of truth.
//!
//! ## Overview
//!
//! Keys are `<namespace>:<identifier>`, with the namespace drawn from a closed
//! set and a TTL per namespace. Values are written as tagged JSON envelopes
//! so a payload of the wrong shape is detected on read instead of being
//! returned.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheService`] | Read-through `get_or_compute` plus per-domain helpers and statistics |
//! | [`StoreHandle`] | Shared store connection with bounded operation time and open/close lifecycle |
//! | [`CacheStore`] | Trait for implementing backends |
//! | [`MemoryStore`] | In-process backend with TTL expiry |
//! | [`NullStore`] | Backend that stores nothing |
//! | [`KeyCodec`] | Builds and parses keys, answers TTL lookups |
//! | [`CachedValue`] | Ties a payload type to its namespace |
//!
//! A Redis backend is available with the `redis` feature.
//!
//! ## Example
//!
//! ```rust
//! use prep_cache::cache::{CacheService, KeyCodec, MemoryStore, Namespace, StoreHandle};
//! use prep_cache::clock::system_clock;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let store = StoreHandle::new(Arc::new(MemoryStore::new(1000)), Duration::from_millis(500));
//! let cache = CacheService::new(store, KeyCodec::default(), system_clock(), None);
//!
//! let first = cache
//!     .get_or_compute(Namespace::Dashboard, "user-42", || async { Ok::<_, ()>(vec![1u32, 2, 3]) })
//!     .await
//!     .unwrap();
//! assert!(!first.cache_hit);
//!
//! let second = cache
//!     .get_or_compute(Namespace::Dashboard, "user-42", || async { Ok::<_, ()>(Vec::<u32>::new()) })
//!     .await
//!     .unwrap();
//! assert!(second.cache_hit);
//! assert_eq!(second.value, vec![1, 2, 3]);
//! # });
//! ```

mod backend;
pub mod codec;
mod handle;
mod key;
pub(crate) mod locks;
#[cfg(feature = "redis")]
mod redis_store;
mod service;
pub mod types;

pub use backend::{CacheStore, MemoryStore, NullStore};
pub use codec::{CachedValue, Corruption};
pub use handle::StoreHandle;
pub use key::{CacheKey, KeyCodec, Namespace, TtlPolicy, SEPARATOR};
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use service::{coding_result_id, CacheService, CacheStats, Cached, CODING_RESULT_TTL};
pub use types::{
    CodingResult, CodingSession, DashboardSnapshot, FeedbackReport, InterviewAnswer,
    InterviewState, InterviewStatus, ProfileData, ProgressSnapshot, SessionData,
};
