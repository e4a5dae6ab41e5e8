//! The service boundary exposed to request handlers.
//!
//! [`CacheClient`] owns one [`StoreHandle`](crate::cache::StoreHandle) and
//! every component built on it. Build it once at startup with
//! [`CacheClientBuilder`] and close it on shutdown.

pub mod builder;
pub mod core;

pub use builder::CacheClientBuilder;
pub use core::CacheClient;
