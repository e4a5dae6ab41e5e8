//! # prep-cache
//!
//! Caching and rate-limiting layer for an interview-preparation backend.
//!
//! ## Overview
//!
//! Every component shares one key-value store behind a [`cache::StoreHandle`].
//! The store is an accelerator, never the source of truth: when it is slow,
//! unreachable or returns garbage, reads fall through to the computation,
//! writes are dropped, and rate limiting allows the request.
//!
//! ## Key Features
//!
//! - **Cache-aside**: [`CacheService::get_or_compute`](cache::CacheService::get_or_compute)
//!   with per-namespace TTLs and stampede coalescing
//! - **Invalidation**: domain events map to the keys they make stale via
//!   [`invalidation::InvalidationCoordinator`]
//! - **Rate limiting**: fixed-window counters per route class in [`ratelimit`]
//! - **Metrics**: per-endpoint daily sequences and analytics in [`metrics`]
//! - **Maintenance**: corrupted-entry sweeps and per-user purges in [`cleanup`]
//!
//! ## Quick Start
//!
//! ```rust
//! use prep_cache::cache::Namespace;
//! use prep_cache::CacheClientBuilder;
//!
//! # tokio_test::block_on(async {
//! let client = CacheClientBuilder::new().build().await?;
//! let progress = client
//!     .get_or_compute(Namespace::Progress, "user-42", || async {
//!         Ok::<_, prep_cache::Error>(vec![3u32, 5, 8])
//!     })
//!     .await?;
//! assert!(!progress.cache_hit);
//! # Ok::<(), prep_cache::Error>(())
//! # }).unwrap();
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Keys, envelope codec, store backends, cache-aside service |
//! | [`invalidation`] | Domain events and the keys they invalidate |
//! | [`ratelimit`] | Fixed-window request limits per route class |
//! | [`metrics`] | Request metrics collection and analytics |
//! | [`interceptors`] | Request pipeline hooks for rate limiting and metrics |
//! | [`cleanup`] | Corrupted-entry sweeps and per-user purges |
//! | [`health`] | Store liveness check |
//! | [`client`] | Facade wiring all components over one store |
//! | [`config`] | Environment-driven configuration |
//! | [`telemetry`] | Tracing subscriber setup |

pub mod cache;
pub mod cleanup;
pub mod client;
pub mod clock;
pub mod config;
pub mod health;
pub mod interceptors;
pub mod invalidation;
pub mod metrics;
pub mod ratelimit;
pub mod telemetry;

// Re-export main types for convenience
pub use cache::{CacheService, Cached, Namespace};
pub use client::{CacheClient, CacheClientBuilder};
pub use config::CoreConfig;
pub use health::HealthStatus;
pub use invalidation::DomainEvent;
pub use ratelimit::{RateLimitDecision, RouteClass};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
