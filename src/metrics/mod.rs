//! Request metrics.
//!
//! Each finished request becomes a [`MetricRecord`] appended to a bounded
//! sequence keyed by `(day, method, endpoint)` in the `metrics:` namespace.
//! Analytics read the last N daily sequences back and aggregate them.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`MetricsCollector`] | Appends records and computes analytics |
//! | [`MetricRecord`] | One request outcome |
//! | [`EndpointAnalytics`] | Totals over several days, weighted by volume |
//! | [`DailyAnalytics`] | Figures for one day |
//! | [`MetricsConfig`] | Capacity, retention and slow-request threshold |
//!
//! Recording on the request path should go through
//! [`MetricsCollector::spawn_record`], which never blocks the caller and only
//! logs a failed write.

mod collector;
mod record;

pub use collector::MetricsCollector;
pub use record::{
    DailyAnalytics, EndpointAnalytics, MetricRecord, MetricsConfig, DEFAULT_CAPACITY,
    DEFAULT_RETENTION_DAYS, DEFAULT_SLOW_REQUEST_MS,
};
